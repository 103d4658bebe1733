use lasergantry_communication::firmware::grbl::{
    CommandRequest, GrblConnection, GrblOptions, SettingKey,
};
use lasergantry_core::{ConnectionError, ControllerError, Error, SharedClock, SimulatedClock};
use std::io;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::mock::MockPort;

const SETTINGS_DUMP: &[&str] = &[
    "$0=10",
    "$1=25 (step idle delay, msec)",
    "$100=250.000 (x, step/mm)",
    "$101=40.000 (y, step/mm)",
    "$102=40.000 (z, step/mm)",
    "ok",
];

fn connect_with(
    mut responder: impl FnMut(&str) -> Vec<String> + Send + 'static,
) -> (GrblConnection, Arc<Mutex<Vec<String>>>, SharedClock) {
    let clock: SharedClock = Arc::new(SimulatedClock::new());
    let port = MockPort::new(clock.clone(), move |line| {
        if line == "$$" {
            SETTINGS_DUMP.iter().map(|s| s.to_string()).collect()
        } else {
            responder(line)
        }
    });
    let written = port.written.clone();
    let connection = GrblConnection::connect(Box::new(port), clock.clone(), GrblOptions::default())
        .expect("handshake");
    written.lock().unwrap().clear();
    (connection, written, clock)
}

#[test]
fn test_connect_loads_settings() {
    let (connection, _, clock) = connect_with(|_| vec!["ok".to_string()]);
    assert_eq!(connection.get_setting(SettingKey::XStepsPerMm), Some(250.0));
    assert_eq!(connection.get_setting(SettingKey::StepIdleDelay), Some(25.0));
    assert_eq!(connection.get_setting(SettingKey::XMaxRate), None);
    // boot delay + wake delay + settings wait
    assert!(clock.now() >= Duration::from_millis(3300));
}

#[test]
fn test_failed_handshake_closes_port() {
    let clock: SharedClock = Arc::new(SimulatedClock::new());
    let port = MockPort::failing_reads(clock.clone(), io::ErrorKind::BrokenPipe);
    let closed = port.closed.clone();

    let err = GrblConnection::connect(Box::new(port), clock, GrblOptions::default()).unwrap_err();

    match err {
        Error::Connection(ConnectionError::Handshake { port, reason }) => {
            assert_eq!(port, "mock");
            assert!(reason.contains("mock read failure"), "{}", reason);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(closed.load(Ordering::SeqCst));
}

#[test]
fn test_send_command_ok_first_attempt() {
    let (mut connection, written, _) = connect_with(|_| vec!["ok".to_string()]);
    let response = connection
        .send_command(&CommandRequest::new("G90"))
        .unwrap();
    assert!(response.success);
    assert_eq!(response.attempts, 1);
    assert_eq!(response.response, "ok");
    assert_eq!(written.lock().unwrap().as_slice(), ["G90"]);
}

#[test]
fn test_send_command_exhausts_retries_on_error() {
    let (mut connection, written, _) = connect_with(|_| vec!["error:9".to_string()]);
    let response = connection
        .send_command(&CommandRequest::new("G1 X10 F100").with_retries(4))
        .unwrap();
    assert!(!response.success);
    assert_eq!(response.attempts, 4);
    assert_eq!(response.response, "error:9");
    assert_eq!(written.lock().unwrap().len(), 4);
}

#[test]
fn test_send_command_collects_informational_lines() {
    let (mut connection, _, _) = connect_with(|line| {
        if line == "$X" {
            vec!["[MSG:Caution: Unlocked]".to_string(), "ok".to_string()]
        } else {
            vec!["ok".to_string()]
        }
    });
    let response = connection.send_command(&CommandRequest::new("$X")).unwrap();
    assert!(response.success);
    assert_eq!(response.response, "[MSG:Caution: Unlocked]\nok");
}

#[test]
fn test_send_command_times_out() {
    let (mut connection, _, clock) = connect_with(|_| Vec::new());
    let start = clock.now();
    let response = connection
        .send_command(
            &CommandRequest::new("M3 S100")
                .with_retries(2)
                .with_timeout(Duration::from_millis(500)),
        )
        .unwrap();
    assert!(!response.success);
    assert_eq!(response.attempts, 2);
    assert!(response.response.is_empty());
    assert!(clock.now() - start >= Duration::from_secs(1));
}

#[test]
fn test_update_setting_writes_then_caches() {
    let (mut connection, written, _) = connect_with(|_| vec!["ok".to_string()]);
    connection
        .update_setting(SettingKey::XStepsPerMm, 257.7319587628866)
        .unwrap();
    assert_eq!(written.lock().unwrap().as_slice(), ["$100=257.732"]);
    assert_eq!(
        connection.get_setting(SettingKey::XStepsPerMm),
        Some(257.7319587628866)
    );

    connection.update_setting_named("step_idle_delay", 255.0).unwrap();
    assert_eq!(written.lock().unwrap().last().unwrap(), "$1=255");
    assert_eq!(connection.get_setting(SettingKey::StepIdleDelay), Some(255.0));
}

#[test]
fn test_unknown_setting_never_reaches_the_wire() {
    let (mut connection, written, _) = connect_with(|_| vec!["ok".to_string()]);
    let err = connection.update_setting_named("a_steps_per_mm", 80.0).unwrap_err();
    assert!(matches!(
        err,
        Error::Controller(ControllerError::UnknownSetting { ref key }) if key == "a_steps_per_mm"
    ));
    assert!(written.lock().unwrap().is_empty());
}

#[test]
fn test_query_position_without_mpos() {
    let (mut connection, _, _) =
        connect_with(|line| match line {
            "?" => vec!["<Idle|WPos:1.000,2.000,2.000|FS:0,0>".to_string()],
            _ => vec!["ok".to_string()],
        });
    let position = connection.query_position().unwrap();
    assert_eq!(position.x, None);
    assert_eq!(position.y, None);
    assert_eq!(position.z, None);
    assert!(position.raw.contains("WPos"));
}

#[test]
fn test_query_position_parses_mpos() {
    let (mut connection, written, _) = connect_with(|line| match line {
        "?" => vec!["<Run|MPos:12.500,-3.000,-3.000|FS:800,0>".to_string()],
        _ => vec!["ok".to_string()],
    });
    let position = connection.query_position().unwrap();
    assert_eq!(position.xy(), Some((12.5, -3.0)));
    assert_eq!(position.z, Some(-3.0));
    assert_eq!(written.lock().unwrap().as_slice(), ["?"]);
}

#[test]
fn test_movement_primitives_couple_y_and_z() {
    let (mut connection, written, _) = connect_with(|_| vec!["ok".to_string()]);
    connection.set_mode_relative().unwrap();
    connection
        .move_relative(Some(1.0), Some(-2.0), None, Some(800.0))
        .unwrap();
    connection.set_mode_absolute().unwrap();
    connection
        .move_absolute(None, None, Some(4.0), Some(200.0))
        .unwrap();
    connection
        .set_work_offset(Some(0.0), Some(0.0), Some(9.0))
        .unwrap();

    assert_eq!(
        written.lock().unwrap().as_slice(),
        [
            "G91",
            "G1 X1.000 Y-2.000 Z-2.000 F800",
            "G90",
            "G1 Z4.000 F200",
            "?",
            "G92 X0.000 Y0.000 Z0.000",
        ]
    );
}

#[test]
fn test_work_offset_tracked_from_declared_position() {
    let (mut connection, _, _) = connect_with(|line| match line {
        "?" => vec!["<Idle|MPos:12.500,-3.000,-3.000|FS:0,0>".to_string()],
        _ => vec!["ok".to_string()],
    });
    assert_eq!(connection.work_offset(), [0.0; 3]);

    connection
        .set_work_offset(Some(2.5), Some(0.0), None)
        .unwrap();
    assert_eq!(connection.work_offset(), [10.0, -3.0, -3.0]);

    let position = connection.query_position().unwrap();
    assert_eq!(position.xy(), Some((12.5, -3.0)));
    assert_eq!(position.work_offset, Some([10.0, -3.0, -3.0]));
    assert_eq!(position.work_xy(), Some((2.5, 0.0)));

    connection.soft_reset().unwrap();
    assert_eq!(connection.work_offset(), [0.0; 3]);
}

#[test]
fn test_reported_wco_replaces_tracked_offset() {
    let (mut connection, _, _) = connect_with(|line| match line {
        "?" => vec!["<Idle|MPos:1.000,2.000,2.000|FS:0,0|WCO:1.000,1.000,1.000>".to_string()],
        _ => vec!["ok".to_string()],
    });
    let position = connection.query_position().unwrap();
    assert_eq!(connection.work_offset(), [1.0, 1.0, 1.0]);
    assert_eq!(position.work_xy(), Some((0.0, 1.0)));
}

#[test]
fn test_realtime_commands() {
    let (mut connection, written, clock) = connect_with(|_| vec!["ok".to_string()]);
    let start = clock.now();
    connection.feed_hold().unwrap();
    connection.soft_reset().unwrap();
    connection.unlock_alarm().unwrap();
    assert_eq!(written.lock().unwrap().as_slice(), ["!", "\u{18}", "$X"]);
    assert!(clock.now() - start >= Duration::from_secs(1));
}
