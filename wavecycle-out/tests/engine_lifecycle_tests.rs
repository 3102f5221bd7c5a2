//! Output engine lifecycle tests
//!
//! Open/start/pause/close transitions and format validation, driven
//! through the simulated device.

mod helpers;

use helpers::*;
use std::time::Duration;
use wavecycle_out::{EngineState, ErrorCode, OutputEngine, WaveFormat};

const SHUTDOWN: Duration = Duration::from_secs(2);

#[test]
fn test_every_supported_format_opens() {
    for sample_rate in [11025, 22050, 44100] {
        for bit_depth in [8, 16] {
            for channels in [1, 2] {
                let log = RenderLog::new();
                let mut engine = engine_with(fast_driver(), SHUTDOWN);
                let format = logged_format(sample_rate, bit_depth, channels, 256, &log);

                assert!(
                    engine.open(format),
                    "{} Hz {} bit {} ch failed: {}",
                    sample_rate,
                    bit_depth,
                    channels,
                    engine.last_error()
                );
                assert_eq!(engine.last_error(), ErrorCode::Ok);
                assert_eq!(engine.state(), EngineState::OpenSuspended);

                let total = 256 * usize::from(channels) * usize::from(bit_depth / 8);
                assert_eq!(engine.slot_len(), Some(total / 4));
                assert!(engine.close());
            }
        }
    }
}

#[test]
fn test_invalid_formats_rejected_then_valid_open_succeeds() {
    let log = RenderLog::new();
    let invalid = vec![
        ("frames not a power of two", logged_format(44100, 16, 2, 1000, &log)),
        ("zero frames", logged_format(44100, 16, 2, 0, &log)),
        ("no renderer", WaveFormat::new(44100, 16, 2, 1024)),
        ("24 bit", logged_format(44100, 24, 2, 1024, &log)),
        ("48 kHz", logged_format(48000, 16, 2, 1024, &log)),
        ("6 channels", logged_format(44100, 16, 6, 1024, &log)),
        ("buffer under 64 bytes", logged_format(44100, 16, 2, 8, &log)),
    ];

    let driver = fast_driver();
    let probe = driver.probe();
    let mut engine = engine_with(driver, SHUTDOWN);

    for (case, format) in invalid {
        assert!(!engine.open(format), "{} was accepted", case);
        assert_eq!(engine.last_error(), ErrorCode::InvalidFormat, "{}", case);
        assert_eq!(engine.state(), EngineState::Closed, "{}", case);
        assert!(!engine.is_open());
    }
    // validation happens before the device is touched
    assert_eq!(probe.opens(), 0);

    assert!(engine.open(standard_format(&log)));
    assert!(engine.is_open());
    assert!(engine.close());
}

#[test]
fn test_double_open_rejected_first_session_keeps_running() {
    let first = RenderLog::new();
    let second = RenderLog::new();
    let driver = fast_driver();
    let probe = driver.probe();
    let mut engine = engine_with(driver, SHUTDOWN);

    assert!(engine.open(standard_format(&first)));
    assert!(engine.start());
    assert!(wait_until(Duration::from_secs(2), || first.calls() >= 4));

    assert!(!engine.open(standard_format(&second)));
    assert_eq!(engine.last_error(), ErrorCode::AlreadyOpen);
    assert_eq!(engine.state(), EngineState::Running);
    assert_eq!(probe.opens(), 1);

    let before = first.calls();
    assert!(wait_until(Duration::from_secs(2), || first.calls() > before + 4));
    assert_eq!(second.calls(), 0);

    assert!(engine.close());
}

#[test]
fn test_close_without_open_succeeds() {
    let mut engine = engine_with(fast_driver(), SHUTDOWN);
    assert!(engine.close());
    assert!(engine.close());
    assert_eq!(engine.last_error(), ErrorCode::Ok);
    assert_eq!(engine.state(), EngineState::Closed);
}

#[test]
fn test_start_and_pause_need_a_session() {
    let mut engine = engine_with(fast_driver(), SHUTDOWN);
    assert!(!engine.start());
    assert!(!engine.pause());
    assert_eq!(engine.state(), EngineState::Closed);
    assert_eq!(engine.last_error(), ErrorCode::Ok);
}

#[test]
fn test_state_transitions() {
    let log = RenderLog::new();
    let mut engine = engine_with(fast_driver(), SHUTDOWN);
    assert_eq!(engine.state(), EngineState::Closed);

    assert!(engine.open(standard_format(&log)));
    assert_eq!(engine.state(), EngineState::OpenSuspended);

    assert!(engine.start());
    assert_eq!(engine.state(), EngineState::Running);
    // repeated start is harmless
    assert!(engine.start());
    assert_eq!(engine.state(), EngineState::Running);

    assert!(engine.pause());
    assert_eq!(engine.state(), EngineState::Paused);
    assert!(engine.pause());

    assert!(engine.start());
    assert_eq!(engine.state(), EngineState::Running);

    assert!(engine.close());
    assert_eq!(engine.state(), EngineState::Closed);
    assert_eq!(engine.slot_len(), None);
    assert_eq!(engine.spec(), None);
    assert_eq!(engine.renders(), 0);
}

#[test]
fn test_close_from_suspended_and_paused() {
    let driver = fast_driver();
    let probe = driver.probe();
    let mut engine = engine_with(driver, SHUTDOWN);

    let log = RenderLog::new();
    assert!(engine.open(standard_format(&log)));
    assert!(engine.close());
    assert_eq!(log.calls(), 0);

    assert!(engine.open(standard_format(&log)));
    assert!(engine.start());
    assert!(wait_until(Duration::from_secs(2), || log.calls() >= 2));
    assert!(engine.pause());
    assert!(engine.close());

    assert_eq!(probe.opens(), 2);
    assert_eq!(probe.open_devices(), 0);
    assert_eq!(engine.last_error(), ErrorCode::Ok);
}

#[test]
fn test_standard_format_renders_quarter_buffers() {
    let log = RenderLog::new();
    let mut engine = engine_with(fast_driver(), SHUTDOWN);

    // 512 frames * 4 bytes = 2048 bytes, 512 per slot
    assert!(engine.open(standard_format(&log)));
    assert_eq!(engine.slot_len(), Some(512));
    assert!(engine.start());
    assert!(wait_until(Duration::from_secs(2), || log.calls() >= 8));
    assert!(engine.close());

    let lengths = log.lengths();
    assert!(lengths.len() >= 8);
    assert!(lengths.iter().all(|&len| len == 512));
}

#[test]
fn test_drop_closes_device() {
    let driver = fast_driver();
    let probe = driver.probe();
    let log = RenderLog::new();

    {
        let mut engine = engine_with(driver, SHUTDOWN);
        assert!(engine.open(standard_format(&log)));
        assert!(engine.start());
        assert!(wait_until(Duration::from_secs(2), || log.calls() >= 1));
        assert_eq!(probe.open_devices(), 1);
    }

    assert_eq!(probe.open_devices(), 0);
    assert_eq!(probe.closes(), 1);
}

#[test]
fn test_reopen_after_close() {
    let driver = fast_driver();
    let probe = driver.probe();
    let mut engine = engine_with(driver, SHUTDOWN);

    for round in 0..3 {
        let log = RenderLog::new();
        assert!(engine.open(logged_format(22050, 8, 1, 1024, &log)), "round {}", round);
        assert!(engine.start());
        assert!(wait_until(Duration::from_secs(2), || log.calls() >= 2));
        assert!(engine.close());
    }

    assert_eq!(probe.opens(), 3);
    assert_eq!(probe.closes(), 3);
    assert_eq!(engine.last_error(), ErrorCode::Ok);
}

#[test]
fn test_engine_shares_driver() {
    use std::sync::Arc;
    use wavecycle_out::DeviceDriver;

    let driver = fast_driver();
    let probe = driver.probe();
    let shared: Arc<dyn DeviceDriver> = Arc::new(driver);

    let mut a = OutputEngine::with_driver(Arc::clone(&shared));
    let mut b = OutputEngine::with_driver(shared);

    let log_a = RenderLog::new();
    let log_b = RenderLog::new();
    assert!(a.open(standard_format(&log_a)));
    assert!(b.open(standard_format(&log_b)));
    assert_eq!(probe.open_devices(), 2);

    assert!(a.close());
    assert!(b.close());
    assert_eq!(probe.open_devices(), 0);
}
