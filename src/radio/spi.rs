use embedded_hal::{
    blocking::spi::{Transfer, Write},
    digital::v2::OutputPin,
};

use crate::radio::traits::RegisterBus;

/// Errors of the SPI adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SpiError {
    /// SPI transfer error
    Spi,
    /// Chip select could not be driven
    Gpio,
}

/// [`RegisterBus`] over a blocking embedded-hal SPI bus and a chip-select pin
pub struct SpiBus<SPI, CS>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
{
    spi: SPI,
    cs: CS,
}

impl<SPI, CS> SpiBus<SPI, CS>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
{
    /// Take ownership of the bus and the NSS pin
    pub fn new(spi: SPI, mut cs: CS) -> Result<Self, SpiError> {
        cs.set_high().map_err(|_| SpiError::Gpio)?;
        Ok(Self { spi, cs })
    }

    /// Give the peripherals back
    pub fn release(self) -> (SPI, CS) {
        (self.spi, self.cs)
    }

    fn with_selected<T>(
        &mut self,
        f: impl FnOnce(&mut SPI) -> Result<T, SpiError>,
    ) -> Result<T, SpiError> {
        self.cs.set_low().map_err(|_| SpiError::Gpio)?;
        let result = f(&mut self.spi);
        // Release NSS even when the transfer failed.
        let released = self.cs.set_high().map_err(|_| SpiError::Gpio);
        let value = result?;
        released?;
        Ok(value)
    }
}

impl<SPI, CS> RegisterBus for SpiBus<SPI, CS>
where
    SPI: Transfer<u8> + Write<u8>,
    CS: OutputPin,
{
    type Error = SpiError;

    fn read(&mut self, header: u8, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.with_selected(|spi| {
            spi.write(&[header]).map_err(|_| SpiError::Spi)?;
            buf.fill(0);
            spi.transfer(buf).map_err(|_| SpiError::Spi)?;
            Ok(())
        })
    }

    fn write(&mut self, header: u8, data: &[u8]) -> Result<(), Self::Error> {
        self.with_selected(|spi| {
            spi.write(&[header]).map_err(|_| SpiError::Spi)?;
            spi.write(data).map_err(|_| SpiError::Spi)
        })
    }
}
