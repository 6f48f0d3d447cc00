/// Number of entries in the channel table.
pub const MAX_CHANNELS: usize = 16;

/// Magic marking a [`PersistentConfig`] image as valid.
pub const CONFIG_MAGIC: u16 = 0xAB67;

/// Default RX1 delay in seconds.
pub const DEFAULT_RX1_DELAY: u8 = 1;

/// EU868 channels every device must support. They occupy indices 0..=2 of the
/// channel table and cannot be modified by the network.
pub const DEFAULT_CHANNELS: [u32; 3] = [868_100_000, 868_300_000, 868_500_000];

/// Number of leading channel slots reserved for [`DEFAULT_CHANNELS`].
pub const FIXED_CHANNELS: usize = DEFAULT_CHANNELS.len();

/// AES-128 key (16 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AESKey([u8; 16]);

impl AESKey {
    /// Wrap raw key bytes
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// Device address.
///
/// Stored most significant byte first, the way it is printed by network
/// servers. Frames and crypto blocks carry it least significant byte first,
/// see [`DevAddr::to_wire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DevAddr([u8; 4]);

impl DevAddr {
    /// Wrap raw address bytes (MSB first)
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Raw address bytes (MSB first)
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Address in over-the-air byte order (LSB first)
    pub fn to_wire(&self) -> [u8; 4] {
        let [a, b, c, d] = self.0;
        [d, c, b, a]
    }
}

impl From<u32> for DevAddr {
    fn from(addr: u32) -> Self {
        Self(addr.to_be_bytes())
    }
}

/// Which downlink windows are opened after an uplink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReceiveMode {
    /// Transmit only
    None,
    /// Open RX1 only
    Rx1Only,
    /// Open RX1, then RX2 if nothing arrived in RX1
    Rx12,
}

/// Bounds on the blocking waits of a cycle, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Wait for the mode-ready IRQ after leaving sleep
    pub wakeup_ms: u32,
    /// Wait for TX done
    pub send_ms: u32,
    /// Wait for RX done or RX timeout once a window is open
    pub receive_ms: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            wakeup_ms: 10,
            send_ms: 500,
            receive_ms: 1000,
        }
    }
}

/// Static device configuration (ABP session)
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Device address
    pub dev_addr: DevAddr,
    /// Network session key
    pub nwk_skey: AESKey,
    /// Application session key
    pub app_skey: AESKey,
    /// Downlink windows to open after each uplink
    pub receive_mode: ReceiveMode,
    /// Frequency of the platform precision tick in Hz
    pub precision_tick_frequency: u32,
    /// Worst-case drift of the precision tick, in microseconds per second
    pub precision_tick_drift_us_per_s: u32,
    /// Wait bounds
    pub timeouts: Timeouts,
}

impl DeviceConfig {
    /// Create a new ABP configuration with RX1+RX2 reception, a 1 MHz tick and
    /// a 5 ms/s drift budget.
    pub fn new_abp(dev_addr: DevAddr, nwk_skey: AESKey, app_skey: AESKey) -> Self {
        Self {
            dev_addr,
            nwk_skey,
            app_skey,
            receive_mode: ReceiveMode::Rx12,
            precision_tick_frequency: 1_000_000,
            precision_tick_drift_us_per_s: 5_000,
            timeouts: Timeouts::default(),
        }
    }

    /// Select which downlink windows are opened
    pub fn with_receive_mode(mut self, mode: ReceiveMode) -> Self {
        self.receive_mode = mode;
        self
    }

    /// Describe the platform tick source
    pub fn with_precision_tick(mut self, frequency: u32, drift_us_per_s: u32) -> Self {
        self.precision_tick_frequency = frequency;
        self.precision_tick_drift_us_per_s = drift_us_per_s;
        self
    }

    /// Override the wait bounds
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Convert a duration in milliseconds to precision ticks
    pub fn ms_to_ticks(&self, ms: u32) -> u32 {
        (u64::from(ms) * u64::from(self.precision_tick_frequency) / 1000) as u32
    }
}

/// One entry of the channel table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelConfig {
    /// Uplink frequency in Hz
    pub frequency: u32,
}

/// State that survives reboots: frame counters, RX1 delay and channel plan.
///
/// Loaded through [`Platform::reload_config`](crate::platform::Platform::reload_config)
/// at init and handed to [`Platform::save_config`](crate::platform::Platform::save_config)
/// after every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentConfig {
    /// Validity marker, [`CONFIG_MAGIC`] when the image is usable
    pub magic: u16,
    /// Frame counter of the next uplink
    pub tx_frame_count: u32,
    /// Highest accepted downlink frame counter
    pub rx_frame_count: u32,
    /// RX1 delay in seconds (1..=15)
    pub rx1_delay: u8,
    /// Channel table
    pub channels: [ChannelConfig; MAX_CHANNELS],
    /// Bit `n` set when `channels[n]` is configured
    pub channel_mask: u16,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        let mut config = Self {
            magic: CONFIG_MAGIC,
            tx_frame_count: 0,
            rx_frame_count: 0,
            rx1_delay: DEFAULT_RX1_DELAY,
            channels: [ChannelConfig::default(); MAX_CHANNELS],
            channel_mask: 0,
        };
        for (index, frequency) in DEFAULT_CHANNELS.iter().enumerate() {
            config.set_channel(index, *frequency);
        }
        config
    }
}

impl PersistentConfig {
    /// Whether the image carries the expected magic
    pub fn is_valid(&self) -> bool {
        self.magic == CONFIG_MAGIC
    }

    /// Configure and enable a channel.
    ///
    /// # Panics
    /// If `index` is outside the channel table.
    pub fn set_channel(&mut self, index: usize, frequency: u32) {
        assert!(index < MAX_CHANNELS, "channel index out of range");
        self.channels[index].frequency = frequency;
        self.channel_mask |= 1 << index;
    }

    /// Disable a channel and forget its frequency
    pub fn clear_channel(&mut self, index: usize) {
        if index < MAX_CHANNELS {
            self.channels[index] = ChannelConfig::default();
            self.channel_mask &= !(1 << index);
        }
    }

    /// Frequency of an enabled channel
    pub fn channel_frequency(&self, index: usize) -> Option<u32> {
        if index < MAX_CHANNELS && self.channel_mask & (1 << index) != 0 {
            Some(self.channels[index].frequency)
        } else {
            None
        }
    }

    /// Number of enabled channels
    pub fn enabled_channels(&self) -> u32 {
        self.channel_mask.count_ones()
    }
}
