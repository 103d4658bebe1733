use lasergantry_communication::{
    discover_port_with, LimitController, LimitOptions, SerialPort, DEFAULT_DEVICE_ID,
};
use lasergantry_core::{ConnectionError, Error, SharedClock, SimulatedClock};
use std::sync::Arc;
use std::time::Duration;

use crate::mock::MockPort;

fn frame(states: &[(u32, u8)]) -> String {
    let switches: Vec<String> = states
        .iter()
        .map(|(id, state)| format!(r#"{{"id": {}, "state": {}}}"#, id, state))
        .collect();
    format!(
        r#"{{"device": "limit-controller", "switches": [{}]}}"#,
        switches.join(", ")
    )
}

fn controller(lines: Vec<String>) -> (LimitController, SharedClock) {
    let clock: SharedClock = Arc::new(SimulatedClock::new());
    let port = MockPort::streaming(clock.clone(), lines);
    (
        LimitController::new(Box::new(port), clock.clone(), DEFAULT_DEVICE_ID),
        clock,
    )
}

#[test]
fn test_read_frame_skips_noise() {
    let (mut limits, _) = controller(vec![
        "boot ok".to_string(),
        r#"{"device": "limit-contr"#.to_string(),
        r#"{"device": "other", "switches": [{"id": 3, "state": 1}]}"#.to_string(),
        frame(&[(2, 0), (3, 1)]),
    ]);
    let frame = limits.read_frame(Duration::from_millis(500)).unwrap().unwrap();
    assert_eq!(frame.device, DEFAULT_DEVICE_ID);
    assert!(frame.switch(3).unwrap().is_pressed());
}

#[test]
fn test_switch_state_lookup() {
    let (mut limits, _) = controller(vec![frame(&[(0, 0), (3, 1)])]);

    let reading = limits.get_switch_state(3, Duration::from_millis(500)).unwrap();
    assert!(reading.found);
    assert_eq!(reading.state, 1);

    let reading = limits.get_switch_state(0, Duration::from_millis(500)).unwrap();
    assert!(reading.found);
    assert_eq!(reading.state, 0);
}

#[test]
fn test_missing_switch_times_out() {
    let (mut limits, clock) = controller(vec![frame(&[(0, 0)])]);
    let start = clock.now();
    let reading = limits.get_switch_state(9, Duration::from_millis(500)).unwrap();
    assert!(!reading.found);
    assert_eq!(reading.state, 0);
    assert!(clock.now() - start >= Duration::from_millis(500));
}

#[test]
fn test_first_pressed_and_any_pressed() {
    let (mut limits, _) = controller(vec![frame(&[(0, 0), (1, 1), (4, 1)])]);
    let timeout = Duration::from_millis(10);
    assert_eq!(limits.first_pressed(&[0, 1], timeout).unwrap(), Some(1));
    assert_eq!(limits.first_pressed(&[4, 5], timeout).unwrap(), Some(4));
    assert!(!limits.any_pressed(&[0, 2], timeout).unwrap());
    assert!(limits.any_pressed(&[5, 1], timeout).unwrap());
}

#[test]
fn test_all_states() {
    let (mut limits, _) = controller(vec![frame(&[(2, 0), (3, 1)])]);
    let states = limits.all_states(Duration::from_millis(100)).unwrap().unwrap();
    assert_eq!(states.len(), 2);
    assert_eq!(states[&3], 1);
}

#[test]
fn test_discovery_picks_the_limit_controller() {
    let clock: SharedClock = Arc::new(SimulatedClock::new());
    let candidates = vec![
        "/dev/ttyS0".to_string(),
        "/dev/ttyUSB1".to_string(),
        "/dev/ttyACM0".to_string(),
    ];
    let options = LimitOptions::default();
    let port_clock = clock.clone();

    let found = discover_port_with(&candidates, &clock, &options, |path| match path {
        "/dev/ttyS0" => Err(Error::from(ConnectionError::FailedToOpen {
            port: path.to_string(),
            reason: "permission denied".to_string(),
        })),
        "/dev/ttyUSB1" => Ok(Box::new(MockPort::streaming(
            port_clock.clone(),
            vec!["Grbl 1.1h ['$' for help]".to_string()],
        )) as Box<dyn SerialPort>),
        _ => Ok(Box::new(MockPort::streaming(port_clock.clone(), vec![frame(&[(0, 0)])]))
            as Box<dyn SerialPort>),
    });

    assert_eq!(found.as_deref(), Some("/dev/ttyACM0"));
}

#[test]
fn test_discovery_finds_nothing() {
    let clock: SharedClock = Arc::new(SimulatedClock::new());
    let candidates = vec!["/dev/ttyUSB0".to_string()];
    let port_clock = clock.clone();
    let found = discover_port_with(&candidates, &clock, &LimitOptions::default(), |_| {
        Ok(Box::new(MockPort::streaming(port_clock.clone(), vec!["noise".to_string()]))
            as Box<dyn SerialPort>)
    });
    assert_eq!(found, None);
}
