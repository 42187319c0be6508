//! Session lifecycle and end-to-end behaviour against the simulated device

use pretty_assertions::assert_eq;
use radarlink_core::demo::{SimulatedRadar, SimulatorHandle, SIM_FOV};
use radarlink_core::protocol::{
    ChannelEvent, Clock, ConnectionState, DeviceSession, ManualClock, RadarError, RadarMode,
    SessionConfig,
};
use std::sync::Arc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config() -> SessionConfig {
    SessionConfig {
        port_name: "sim0".into(),
        io_timeout_ms: 50,
        ..SessionConfig::default()
    }
}

fn open() -> (DeviceSession, SimulatorHandle, Arc<ManualClock>) {
    init_tracing();
    let clock = Arc::new(ManualClock::default());
    let sim = SimulatedRadar::new(clock.clone()).handle();
    let session = DeviceSession::open_with(config(), sim.connector(), clock.clone())
        .expect("simulated device should open");
    (session, sim, clock)
}

#[test]
fn test_open_and_query() {
    let (mut radar, sim, _) = open();
    assert_eq!(radar.state(), ConnectionState::Connected);
    assert_eq!(radar.port_name(), "sim0");
    assert_eq!(radar.get_fov().unwrap(), SIM_FOV);
    assert_eq!(sim.connects(), 1);
    // INIT then GET_FOV
    assert_eq!(sim.requests().len(), 2);
}

#[test]
fn test_open_retries_then_succeeds() {
    init_tracing();
    let clock = Arc::new(ManualClock::default());
    let sim = SimulatedRadar::new(clock.clone()).handle();
    sim.fail_next_connects(2);

    let radar = DeviceSession::open_with(config(), sim.connector(), clock).unwrap();
    assert_eq!(radar.state(), ConnectionState::Connected);
    assert_eq!(sim.connects(), 3);
}

#[test]
fn test_open_fails_after_three_attempts() {
    init_tracing();
    let clock = Arc::new(ManualClock::default());
    let sim = SimulatedRadar::new(clock.clone()).handle();
    sim.set_mute(true);

    let result = DeviceSession::open_with(config(), sim.connector(), clock.clone());
    assert!(matches!(result, Err(RadarError::PortFailed(_))));
    assert_eq!(sim.connects(), 3);
    assert!(sim.is_closed());
    // Every INIT ran into its timeout
    assert!(clock.now_ms() >= 150);
}

#[test]
fn test_close_powers_down_and_releases() {
    let (mut radar, sim, _) = open();
    radar.set_laser_power(75).unwrap();
    radar.set_mode(RadarMode::Continuous).unwrap();
    radar.start_depth().unwrap();
    assert!(sim.is_streaming());

    radar.close().unwrap();
    assert!(!sim.is_streaming());
    assert_eq!(sim.laser_power(), 0);
    assert!(sim.is_closed());
}

#[test]
fn test_close_releases_transport_even_when_device_is_silent() {
    let (mut radar, sim, _) = open();
    radar.set_laser_power(40).unwrap();
    sim.set_mute(true);

    let result = radar.close();
    assert!(matches!(result, Err(RadarError::PortFailed(_))));
    assert!(sim.is_closed());
    assert_eq!(sim.laser_power(), 40);
}

#[test]
fn test_drop_closes_session() {
    let (mut radar, sim, _) = open();
    radar.set_laser_power(10).unwrap();
    drop(radar);
    assert!(sim.is_closed());
    assert_eq!(sim.laser_power(), 0);
}

#[test]
fn test_fault_latch_until_reopen() {
    let (mut radar, sim, _) = open();
    sim.inject_fault();

    assert!(matches!(radar.get_fov(), Err(RadarError::DeviceFailed)));
    assert!(radar.fault_latched());

    let written = sim.bytes_written();
    let writes = sim.write_calls();
    for _ in 0..3 {
        assert!(matches!(radar.init(), Err(RadarError::DeviceFailed)));
        assert!(matches!(
            radar.set_laser_power(0),
            Err(RadarError::DeviceFailed)
        ));
    }
    assert_eq!(sim.bytes_written(), written);
    assert_eq!(sim.write_calls(), writes);

    radar.reopen().unwrap();
    assert!(!radar.fault_latched());
    assert_eq!(radar.state(), ConnectionState::Connected);
    assert_eq!(radar.get_fov().unwrap(), SIM_FOV);
    assert_eq!(sim.connects(), 2);
}

#[test]
fn test_reopen_failure_leaves_error_state() {
    let (mut radar, sim, _) = open();
    sim.fail_next_connects(3);
    assert!(matches!(radar.reopen(), Err(RadarError::PortFailed(_))));
    assert_eq!(radar.state(), ConnectionState::Error);

    // A later reopen can still recover
    radar.reopen().unwrap();
    assert_eq!(radar.state(), ConnectionState::Connected);
}

#[test]
fn test_noise_between_messages() {
    let (mut radar, sim, _) = open();
    for _ in 0..5 {
        sim.inject_random_noise(37);
        assert_eq!(radar.get_fov().unwrap(), SIM_FOV);
    }
    let stats = radar.stats();
    assert_eq!(stats.resync_discards, 5 * 37);
    assert_eq!(stats.crc_failures, 0);
}

#[test]
fn test_stale_responses_do_not_match() {
    let (mut radar, sim, _) = open();
    sim.set_stale_responses(true);
    assert_eq!(radar.get_fov().unwrap(), SIM_FOV);
    radar.set_resolution(200).unwrap();
    assert_eq!(sim.resolution(), 200);
}

#[test]
fn test_wrong_echo_is_wrong_param() {
    let (mut radar, sim, _) = open();
    sim.set_wrong_echo(true);
    assert!(matches!(
        radar.set_laser_power(50),
        Err(RadarError::WrongParam(_))
    ));
    assert!(matches!(
        radar.set_mode(RadarMode::Trigger),
        Err(RadarError::WrongParam(_))
    ));
    // The exchange itself worked: the device did take the value
    assert_eq!(sim.laser_power(), 50);
}

#[test]
fn test_slow_link_in_both_directions() {
    let (mut radar, sim, _) = open();
    sim.set_max_read(Some(1));
    sim.set_max_write(Some(2));

    let info = radar.get_info().unwrap();
    assert_eq!(info.serial_number, "SIM-000001");
    radar.set_resolution(300).unwrap();
    assert_eq!(sim.resolution(), 300);
}

#[test]
fn test_request_ids_wrap_over_a_session() {
    let (mut radar, sim, _) = open();
    // INIT used id 0
    for _ in 0..256 {
        radar.init().unwrap();
    }
    let ids: Vec<u8> = sim.requests().iter().map(|m| m.id).collect();
    assert_eq!(ids.len(), 257);
    assert_eq!(ids[255], 255);
    assert_eq!(ids[256], 0);
}

#[test]
fn test_continuous_depth_streaming() {
    let (mut radar, sim, clock) = open();
    sim.set_frame_interval_ms(20);
    radar.set_resolution(32).unwrap();
    radar.set_mode(RadarMode::Continuous).unwrap();
    radar.start_depth().unwrap();

    let mut last = None;
    for _ in 0..5 {
        let frame = radar.continuous_depth(100).unwrap();
        assert_eq!(frame.samples.len(), 32);
        if let Some(prev) = last {
            assert!(frame.timestamp_ms > prev);
        }
        last = Some(frame.timestamp_ms);
    }

    radar.stop_depth().unwrap();
    let before = clock.now_ms();
    assert!(matches!(
        radar.continuous_depth(100),
        Err(RadarError::DepthUnavailable)
    ));
    assert!(clock.now_ms().wrapping_sub(before) >= 100);
}

#[test]
fn test_continuous_depth_keeps_only_newest() {
    let (mut radar, sim, _) = open();
    sim.push_depth_frame();
    sim.push_depth_frame();
    let newest = sim.push_depth_frame();

    // Drain the link without consuming a frame
    while radar.pump() != ChannelEvent::NoEvent {}
    assert_eq!(radar.continuous_depth(10).unwrap(), newest);
    assert!(matches!(
        radar.continuous_depth(10),
        Err(RadarError::DepthUnavailable)
    ));
}

#[test]
fn test_debug_image_transfer() {
    let (mut radar, sim, _) = open();
    sim.set_debug_image_size(64, 20);

    let image = radar.fetch_debug_image().unwrap();
    assert_eq!((image.width, image.height), (64, 20));
    assert_eq!(image.data.len(), 1280);
    assert!(image.is_complete());
    assert_eq!(image.data[65], 2); // row 1, column 1

    // 512 + 512 + 256
    let reads = sim
        .requests()
        .iter()
        .filter(|m| m.opcode() == 0x61)
        .count();
    assert_eq!(reads, 3);

    let dir = tempfile::tempdir().unwrap();
    let path = image.save_timestamped(dir.path()).unwrap();
    assert_eq!(std::fs::read(path).unwrap(), image.data);
}

#[test]
fn test_debug_image_exact_multiple_of_chunk() {
    let (mut radar, sim, _) = open();
    sim.set_debug_image_size(32, 32);

    let image = radar.fetch_debug_image().unwrap();
    assert_eq!(image.data.len(), 1024);
    // Two full chunks and a terminating empty one
    let reads = sim
        .requests()
        .iter()
        .filter(|m| m.opcode() == 0x61)
        .count();
    assert_eq!(reads, 3);
}

#[test]
fn test_timeout_respects_configured_value() {
    let (mut radar, sim, clock) = open();
    sim.set_mute(true);
    let before = clock.now_ms();
    assert!(matches!(radar.get_fov(), Err(RadarError::AccessTimeout)));
    let waited = clock.now_ms().wrapping_sub(before);
    assert!((50..=51).contains(&waited), "waited {} ms", waited);
}
