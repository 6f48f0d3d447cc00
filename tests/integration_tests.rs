use rfm95_lorawan::{
    class::{DiscardReason, Downlink},
    config::{PersistentConfig, ReceiveMode, Timeouts},
    device::DeviceError,
    lorawan::{
        commands::{CommandError, DeviceTime, LinkCheck},
        mac::FrameError,
        phy::RxWindow,
    },
    radio::{Dio, InterruptTimes, RadioError},
};

use mock::{downlink, frf, open_uplink, test_config, Air};

const RX1_OFFSET: u32 = 1_001_596;
const RX2_OFFSET: u32 = 1_000_000 + 131_072 - 2_500;

#[test]
fn test_init_falls_back_to_defaults_on_bad_magic() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::Rx12);

    let mut stored = PersistentConfig::default();
    stored.magic = 0x1234;
    stored.tx_frame_count = 99;
    stored.rx1_delay = 7;
    device.platform_mut().stored = Some(stored);

    device.init().unwrap();

    let config = device.persistent_config();
    assert_eq!(config, &PersistentConfig::default());
    assert_eq!(config.tx_frame_count, 0);
    assert_eq!(config.rx_frame_count, 0);
    assert_eq!(config.rx1_delay, 1);
    assert_eq!(config.channel_frequency(0), Some(868_100_000));
    assert_eq!(config.channel_frequency(1), Some(868_300_000));
    assert_eq!(config.channel_frequency(2), Some(868_500_000));
    assert_eq!(config.enabled_channels(), 3);
}

#[test]
fn test_init_restores_stored_config() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::Rx12);

    let mut stored = PersistentConfig::default();
    stored.tx_frame_count = 41;
    stored.rx_frame_count = 7;
    stored.set_channel(5, 867_500_000);
    device.platform_mut().stored = Some(stored.clone());

    device.init().unwrap();
    assert_eq!(device.persistent_config(), &stored);
}

#[test]
fn test_init_programs_chip_defaults() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::Rx12);
    device.init().unwrap();

    assert!(device.platform().interrupts_configured);

    let chip = device.radio().bus();
    // LoRa sleep
    assert_eq!(chip.regs[0x01], 0x80);
    // 17 dBm on PA_BOOST
    assert_eq!(chip.pa_config(), (0xFF, 0x84));
    assert_eq!(chip.regs[0x0C], 0x23);
    assert_eq!(chip.regs[0x21], 0x08);
    assert_eq!(chip.regs[0x39], 0x34);
    assert_eq!(chip.regs[0x0E], 0x80);
    assert_eq!(chip.regs[0x0F], 0x00);
    assert_eq!(chip.regs[0x23], 64);
}

#[test]
fn test_init_rejects_unknown_chip() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::Rx12);
    device.radio().bus_mut().regs[0x42] = 0x22;

    assert_eq!(device.init(), Err(RadioError::Version(0x22)));
    assert!(!device.platform().interrupts_configured);
}

#[test]
#[should_panic]
fn test_init_rejects_slow_tick() {
    let irq = InterruptTimes::new();
    let clock = mock::Clock::default();
    let chip = mock::FakeChip::new(&irq, clock.clone());
    let config = test_config().with_precision_tick(10_000, 0);
    let mut device = rfm95_lorawan::Device::new(chip, mock::FakePlatform::new(clock), &irq, config);
    let _ = device.init();
}

#[test]
fn test_uplink_without_receive_windows() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::None);
    device.init().unwrap();

    // A downlink on air must be ignored
    let frame = downlink(&test_config(), 1, &[], Some(1), b"nope");
    device.radio().bus_mut().air.push_back(Air::frame(frame));

    let report = device.send_receive_cycle(1, b"hello").unwrap();
    assert_eq!(report.uplinks, 1);
    assert_eq!(report.downlink, Downlink::NotRequested);
    assert_eq!(device.persistent_config().tx_frame_count, 1);

    let chip = device.radio().bus();
    assert!(chip.receives.is_empty());
    assert_eq!(chip.air.len(), 1);
    assert_eq!(chip.sent.len(), 1);
    // Back to LoRa sleep
    assert_eq!(chip.mode(), 0);

    let uplink = open_uplink(&test_config(), &chip.sent[0].bytes, 0).unwrap();
    assert_eq!(uplink.fcnt, 0);
    assert_eq!(uplink.port, 1);
    assert_eq!(uplink.payload, b"hello");
    // Normal IQ, SF7 / 125 kHz / 4/5 with CRC
    assert_eq!(chip.sent[0].invert_iq, 0x27);
    assert_eq!(chip.sent[0].modem_config, [0x72, 0x74, 0x04]);

    let saved = &device.platform().saved;
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].tx_frame_count, 1);
}

#[test]
fn test_frame_counter_advances_once_per_cycle() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::Rx12);
    device.init().unwrap();

    for expected in 1..=3 {
        let report = device.send_receive_cycle(2, &[expected as u8]).unwrap();
        assert_eq!(report.uplinks, 1);
        assert_eq!(report.downlink, Downlink::None);
        assert_eq!(device.persistent_config().tx_frame_count, expected);
    }

    let chip = device.radio().bus();
    for (fcnt, event) in chip.sent.iter().enumerate() {
        let uplink = open_uplink(&test_config(), &event.bytes, fcnt as u32).unwrap();
        assert_eq!(uplink.fcnt, fcnt as u16);
        assert_eq!(uplink.payload, [fcnt as u8 + 1]);
    }
    assert_eq!(device.platform().saved.len(), 3);
}

#[test]
fn test_channel_comes_from_rng() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::None);
    device.init().unwrap();
    device.platform_mut().draws.push_back(2);

    let report = device.send_receive_cycle(1, b"x").unwrap();
    assert_eq!(report.channel, 2);
    assert_eq!(device.platform().draw_bounds, [3]);
    assert_eq!(device.radio().bus().sent[0].frf, frf(868_500_000));
}

#[test]
fn test_rx1_downlink_is_delivered() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::Rx12);
    device.init().unwrap();
    device.platform_mut().draws.push_back(1);

    let frame = downlink(&test_config(), 3, &[], Some(5), b"ok");
    device.radio().bus_mut().air.push_back(Air::Frame { bytes: frame, snr: 6 });

    let report = device.send_receive_cycle(1, b"ping").unwrap();
    match report.downlink {
        Downlink::Received {
            window,
            port,
            frame_count,
            snr,
            mac_answer_len,
            ref payload,
            ..
        } => {
            assert_eq!(window, RxWindow::Rx1);
            assert_eq!(port, 5);
            assert_eq!(frame_count, 3);
            assert_eq!(snr, 6);
            assert_eq!(mac_answer_len, 0);
            assert_eq!(payload.as_slice(), b"ok");
        }
        other => panic!("unexpected downlink {:?}", other),
    }
    assert_eq!(report.uplinks, 1);
    assert_eq!(device.persistent_config().rx_frame_count, 3);

    let chip = device.radio().bus();
    assert_eq!(chip.receives.len(), 1);
    let rx = &chip.receives[0];
    assert_eq!(rx.frf, frf(868_300_000));
    assert_eq!(rx.tick, chip.sent[0].tick.wrapping_add(RX1_OFFSET));
    assert_eq!(rx.symbol_timeout, 11);
    // Inverted IQ for downlinks
    assert_eq!(rx.invert_iq, 0x67);
    assert_eq!(device.platform().saved.last().unwrap().rx_frame_count, 3);
}

#[test]
fn test_rx2_after_silent_rx1() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::Rx12);
    device.init().unwrap();

    let frame = downlink(&test_config(), 1, &[], Some(9), b"late");
    let chip = device.radio().bus_mut();
    chip.air.push_back(Air::Silence);
    chip.air.push_back(Air::frame(frame));

    let report = device.send_receive_cycle(1, b"ping").unwrap();
    assert!(matches!(
        report.downlink,
        Downlink::Received { window: RxWindow::Rx2, port: 9, .. }
    ));

    let chip = device.radio().bus();
    assert_eq!(chip.receives.len(), 2);
    let rx2 = &chip.receives[1];
    assert_eq!(rx2.frf, frf(869_525_000));
    assert_eq!(rx2.tick, chip.sent[0].tick.wrapping_add(RX2_OFFSET));
    // SF12 / 125 kHz, low data rate optimisation on
    assert_eq!(rx2.modem_config[1] >> 4, 12);
    assert_eq!(rx2.modem_config[2], 0x0C);
    assert_eq!(rx2.symbol_timeout, 2);
}

#[test]
fn test_rx1_only_skips_rx2() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::Rx1Only);
    device.init().unwrap();

    let frame = downlink(&test_config(), 1, &[], Some(9), b"late");
    let chip = device.radio().bus_mut();
    chip.air.push_back(Air::Silence);
    chip.air.push_back(Air::frame(frame));

    let report = device.send_receive_cycle(1, b"ping").unwrap();
    assert_eq!(report.downlink, Downlink::None);
    assert_eq!(device.radio().bus().receives.len(), 1);
}

#[test]
fn test_rx_timing_setup_is_answered() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::Rx12);
    device.init().unwrap();

    let frame = downlink(&test_config(), 1, &[0x08, 0x03], None, &[]);
    device.radio().bus_mut().air.push_back(Air::frame(frame));

    let report = device.send_receive_cycle(1, b"ping").unwrap();
    assert!(matches!(
        report.downlink,
        Downlink::Received { port: 0, mac_answer_len: 1, .. }
    ));
    assert_eq!(report.uplinks, 2);
    assert_eq!(device.persistent_config().rx1_delay, 3);
    assert_eq!(device.persistent_config().tx_frame_count, 2);

    let chip = device.radio().bus();
    assert_eq!(chip.sent.len(), 2);
    assert_eq!(chip.sent[1].frf, chip.sent[0].frf);
    let answer = open_uplink(&test_config(), &chip.sent[1].bytes, 1).unwrap();
    assert_eq!(answer.fcnt, 1);
    assert_eq!(answer.port, 0);
    assert_eq!(answer.payload, [0x08]);

    assert_eq!(device.platform().saved.last().unwrap().rx1_delay, 3);
}

#[test]
fn test_new_rx1_delay_moves_the_window() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::Rx1Only);
    device.init().unwrap();
    device.persistent_config_mut().rx1_delay = 3;

    device.send_receive_cycle(1, b"ping").unwrap();

    let chip = device.radio().bus();
    // 4 symbols minus half of 15 ms of drift
    assert_eq!(
        chip.receives[0].tick,
        chip.sent[0].tick.wrapping_add(3_000_000 + 4_096 - 7_500)
    );
}

#[test]
fn test_dev_status_reports_battery_and_snr() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::Rx12);
    device.init().unwrap();
    device.platform_mut().battery = Some(200);

    let frame = downlink(&test_config(), 1, &[], Some(0), &[0x06]);
    device.radio().bus_mut().air.push_back(Air::Frame { bytes: frame, snr: 8 });

    let report = device.send_receive_cycle(1, b"ping").unwrap();
    assert_eq!(report.uplinks, 2);

    let chip = device.radio().bus();
    let answer = open_uplink(&test_config(), &chip.sent[1].bytes, 1).unwrap();
    assert_eq!(answer.payload, [0x06, 200, 8]);
}

#[test]
fn test_new_channel_is_persisted() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::Rx12);
    device.init().unwrap();

    let freq = (867_700_000u32 / 100).to_le_bytes();
    let commands = [0x07, 0x06, freq[0], freq[1], freq[2], 0x50];
    let frame = downlink(&test_config(), 1, &commands, Some(2), b"app");
    device.radio().bus_mut().air.push_back(Air::frame(frame));

    let report = device.send_receive_cycle(1, b"ping").unwrap();
    assert!(matches!(
        report.downlink,
        Downlink::Received { port: 2, mac_answer_len: 2, .. }
    ));

    let saved = device.platform().saved.last().unwrap();
    assert_eq!(saved.channel_frequency(6), Some(867_700_000));
    assert_eq!(saved.enabled_channels(), 4);
}

#[test]
fn test_network_answers_are_surfaced_without_uplink() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::Rx12);
    device.init().unwrap();

    let seconds = 1_300_000_000u32.to_le_bytes();
    let commands = [0x02, 20, 3, 0x0D, seconds[0], seconds[1], seconds[2], seconds[3], 0x80];
    let frame = downlink(&test_config(), 1, &commands, Some(4), b"t");
    device.radio().bus_mut().air.push_back(Air::frame(frame));

    let report = device.send_receive_cycle(1, b"ping").unwrap();
    match report.downlink {
        Downlink::Received {
            link_check,
            device_time,
            mac_answer_len,
            ..
        } => {
            assert_eq!(link_check, Some(LinkCheck { margin: 20, gateway_count: 3 }));
            assert_eq!(
                device_time,
                Some(DeviceTime {
                    seconds: 1_300_000_000,
                    fraction: 0x80
                })
            );
            assert_eq!(mac_answer_len, 0);
        }
        other => panic!("unexpected downlink {:?}", other),
    }
    assert_eq!(report.uplinks, 1);
    assert_eq!(device.radio().bus().sent.len(), 1);
}

#[test]
fn test_stale_downlink_is_discarded() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::Rx12);
    device.init().unwrap();
    device.persistent_config_mut().rx_frame_count = 10;

    let frame = downlink(&test_config(), 4, &[0x08, 0x05], None, &[]);
    device.radio().bus_mut().air.push_back(Air::frame(frame));

    let report = device.send_receive_cycle(1, b"ping").unwrap();
    assert_eq!(
        report.downlink,
        Downlink::Discarded(DiscardReason::Frame(FrameError::StaleFrameCounter {
            received: 4,
            stored: 10,
        }))
    );
    assert_eq!(report.uplinks, 1);

    let config = device.persistent_config();
    assert_eq!(config.rx_frame_count, 10);
    assert_eq!(config.rx1_delay, 1);
    // RX2 was still tried
    assert_eq!(device.radio().bus().receives.len(), 2);
}

#[test]
fn test_corrupted_downlink_is_discarded() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::Rx1Only);
    device.init().unwrap();

    let mut frame = downlink(&test_config(), 1, &[], Some(1), b"data");
    frame[10] ^= 0x20;
    device.radio().bus_mut().air.push_back(Air::frame(frame));

    let report = device.send_receive_cycle(1, b"ping").unwrap();
    assert_eq!(
        report.downlink,
        Downlink::Discarded(DiscardReason::Frame(FrameError::InvalidMic))
    );
    assert_eq!(device.persistent_config().rx_frame_count, 0);
}

#[test]
fn test_crc_error_is_discarded() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::Rx12);
    device.init().unwrap();
    device.radio().bus_mut().air.push_back(Air::CrcError);

    let report = device.send_receive_cycle(1, b"ping").unwrap();
    assert_eq!(report.downlink, Downlink::Discarded(DiscardReason::Crc));
    assert_eq!(device.radio().bus().receives.len(), 2);
}

#[test]
fn test_truncated_mac_command_is_discarded() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::Rx12);
    device.init().unwrap();

    let frame = downlink(&test_config(), 2, &[0x07, 0x03], None, &[]);
    device.radio().bus_mut().air.push_back(Air::frame(frame));

    let report = device.send_receive_cycle(1, b"ping").unwrap();
    assert_eq!(
        report.downlink,
        Downlink::Discarded(DiscardReason::Command(CommandError::Truncated(0x07)))
    );
    assert_eq!(report.uplinks, 1);
    // The frame itself was authentic
    assert_eq!(device.persistent_config().rx_frame_count, 2);
}

#[test]
fn test_tx_timeout_forces_sleep() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::Rx12);
    device.init().unwrap();
    device.radio().bus_mut().tx_completes = false;

    assert_eq!(
        device.send_receive_cycle(1, b"ping"),
        Err(DeviceError::Radio(RadioError::Timeout(Dio::Dio0)))
    );
    assert_eq!(device.persistent_config().tx_frame_count, 0);
    assert_eq!(device.radio().bus().mode(), 0);
    assert_eq!(device.platform().saved.len(), 1);
}

#[test]
fn test_wakeup_timeout() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::Rx12);
    device.init().unwrap();
    device.radio().bus_mut().mode_ready = false;

    assert_eq!(
        device.send_receive_cycle(1, b"ping"),
        Err(DeviceError::Radio(RadioError::Timeout(Dio::Dio5)))
    );
    assert!(device.radio().bus().sent.is_empty());
}

#[test]
fn test_bus_failure_is_reported() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::Rx12);
    device.init().unwrap();
    device.radio().bus_mut().fail_writes = true;

    assert_eq!(
        device.send_receive_cycle(1, b"ping"),
        Err(DeviceError::Radio(RadioError::Bus(mock::BusError)))
    );
    assert_eq!(device.platform().saved.len(), 1);
}

#[test]
fn test_custom_timeouts_bound_the_wait() {
    let irq = InterruptTimes::new();
    let clock = mock::Clock::default();
    let chip = mock::FakeChip::new(&irq, clock.clone());
    let config = test_config().with_timeouts(Timeouts {
        wakeup_ms: 2,
        send_ms: 5,
        receive_ms: 50,
    });
    let mut device = rfm95_lorawan::Device::new(chip, mock::FakePlatform::new(clock.clone()), &irq, config);
    device.init().unwrap();
    device.radio().bus_mut().tx_completes = false;

    let start = clock.now();
    assert!(device.send_receive_cycle(1, b"ping").is_err());
    let elapsed = clock.now().wrapping_sub(start);
    assert!(elapsed > 5_000 && elapsed < 6_000, "waited {} ticks", elapsed);
}

#[test]
fn test_empty_channel_mask() {
    let irq = InterruptTimes::new();
    let mut device = mock::device(&irq, ReceiveMode::Rx12);
    device.init().unwrap();
    device.persistent_config_mut().channel_mask = 0;

    assert_eq!(device.send_receive_cycle(1, b"ping"), Err(DeviceError::NoChannel));
    assert!(device.radio().bus().sent.is_empty());
}
