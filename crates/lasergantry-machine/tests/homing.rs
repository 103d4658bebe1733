use lasergantry_communication::sim::{SimConfig, SimMode, SimulatedGantry, SwitchOverride, TRANSCRIPT_RESET};
use lasergantry_communication::{GrblConnection, LimitController};
use lasergantry_core::{Axis, Error, HomingError, HomingStage, MachineState};
use lasergantry_machine::{Direction, Homing, HomingStatus, Machine};
use lasergantry_settings::{Config, HomingSettings};
use std::time::Duration;

fn connect(gantry: &SimulatedGantry) -> (GrblConnection, LimitController) {
    let config = Config::default();
    let grbl = GrblConnection::connect(gantry.grbl_port(), gantry.clock(), config.grbl.to_options())
        .expect("simulated handshake");
    let limits = LimitController::new(gantry.limit_port(), gantry.clock(), config.limits.device_id);
    (grbl, limits)
}

fn position_of(transcript: &[String], entry: &str) -> usize {
    transcript
        .iter()
        .position(|line| line == entry)
        .unwrap_or_else(|| panic!("{} not in transcript {:?}", entry, transcript))
}

#[test]
fn test_rough_seek_stops_with_hold_reset_unlock() {
    let gantry = SimulatedGantry::new(SimConfig::default());
    let (mut grbl, mut limits) = connect(&gantry);
    let settings = HomingSettings::default();

    grbl.set_mode_relative().unwrap();
    gantry.clear_transcript();
    let pressed_at = gantry.clock().now() + Duration::from_secs(2);
    gantry.override_switch(3, SwitchOverride::PressedAfter(pressed_at));

    let seek = Homing::new(&mut grbl, &mut limits, &settings)
        .move_until_limit_fast(Axis::X, Direction::Plus, &[3], 800.0)
        .unwrap();

    assert_eq!(seek.switch_id, 3);
    assert!(seek.elapsed >= Duration::from_secs(2));
    assert!(seek.elapsed < Duration::from_millis(2100));
    // 2 s at 800 mm/min
    assert!((seek.estimated_distance - 26.67).abs() < 1.5);

    let transcript = gantry.transcript();
    assert_eq!(transcript[0], "G1 X1000.000 F800");
    let hold = position_of(&transcript, "!");
    let reset = position_of(&transcript, TRANSCRIPT_RESET);
    let unlock = position_of(&transcript, "$X");
    let relock = position_of(&transcript, "$1=255");
    assert!(hold < reset && reset < unlock && unlock < relock);
    assert_eq!(gantry.mode(), SimMode::Idle);

    // Carriage stopped where the switch fired, not at the end of the move
    let physical = gantry.physical_position()[0];
    assert!(physical < 150.0, "carriage ran on to {}", physical);
}

#[test]
fn test_rough_seek_gives_up_without_switch() {
    let gantry = SimulatedGantry::new(SimConfig::default());
    let (mut grbl, mut limits) = connect(&gantry);
    let mut settings = HomingSettings::default();
    settings.x.rough_max_distance = 20.0;
    gantry.override_switch(3, SwitchOverride::Disconnected);

    grbl.set_mode_relative().unwrap();
    let err = Homing::new(&mut grbl, &mut limits, &settings)
        .move_until_limit_fast(Axis::X, Direction::Plus, &[3], 800.0)
        .unwrap_err();

    match err {
        Error::Homing(HomingError::LimitNotReached {
            axis,
            stage,
            switches,
        }) => {
            assert_eq!(axis, Axis::X);
            assert_eq!(stage, HomingStage::RoughSeekForward);
            assert_eq!(switches, vec![3]);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!gantry.transcript().iter().any(|line| line == TRANSCRIPT_RESET));
}

#[test]
fn test_fine_seek_reaches_switch_in_steps() {
    let gantry = SimulatedGantry::new(SimConfig::default());
    let (mut grbl, mut limits) = connect(&gantry);
    let settings = HomingSettings::default();

    // Park 2 mm short of the plus switch (X starts 171 mm away)
    grbl.set_mode_relative().unwrap();
    let distance = (291.0 - 120.0 - 2.0) * 250.0 * 300.0 / 291.0 / 250.0;
    grbl.move_relative(Some(distance), None, None, Some(20_000.0))
        .unwrap();
    gantry.clock().sleep(Duration::from_secs(2));
    gantry.clear_transcript();

    let traveled = Homing::new(&mut grbl, &mut limits, &settings)
        .move_until_limit_fine(Axis::X, Direction::Plus, &[3])
        .unwrap();

    // 2 true mm is 2.06 firmware mm
    assert!((traveled - 2.06).abs() < 0.15, "traveled {}", traveled);
    let transcript = gantry.transcript();
    assert!(transcript.iter().all(|line| line == "G1 X0.100 F200"));
    assert!(!transcript.iter().any(|line| line == TRANSCRIPT_RESET));
}

#[test]
fn test_fine_seek_aborts_on_controller_error() {
    let gantry = SimulatedGantry::new(SimConfig::default());
    let (mut grbl, mut limits) = connect(&gantry);
    let settings = HomingSettings::default();

    // Reset mid-move leaves the controller in alarm
    grbl.set_mode_relative().unwrap();
    grbl.move_relative(Some(20.0), None, None, Some(600.0)).unwrap();
    gantry.clock().sleep(Duration::from_secs(1));
    grbl.soft_reset().unwrap();
    grbl.set_mode_relative().unwrap();
    gantry.clear_transcript();

    let err = Homing::new(&mut grbl, &mut limits, &settings)
        .move_until_limit_fine(Axis::X, Direction::Plus, &[3])
        .unwrap_err();

    match err {
        Error::Homing(HomingError::ControllerFault {
            axis,
            stage,
            response,
        }) => {
            assert_eq!(axis, Axis::X);
            assert_eq!(stage, HomingStage::FineSeekForward);
            assert!(response.starts_with("error:"), "{}", response);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // No recovery is attempted during the fine pass
    let transcript = gantry.transcript();
    assert!(!transcript.iter().any(|line| line == TRANSCRIPT_RESET || line == "$X"));
}

#[test]
fn test_fine_seek_gives_up_after_max_travel() {
    let gantry = SimulatedGantry::new(SimConfig::default());
    let (mut grbl, mut limits) = connect(&gantry);
    let mut settings = HomingSettings::default();
    settings.fine_max_travel = 1.0;

    grbl.set_mode_relative().unwrap();
    let err = Homing::new(&mut grbl, &mut limits, &settings)
        .move_until_limit_fine(Axis::Y, Direction::Minus, &[4, 5])
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Homing(HomingError::LimitNotReached {
            axis: Axis::Y,
            stage: HomingStage::FineSeekBackward,
            ..
        })
    ));
    let [_, y, z] = gantry.physical_position();
    assert!((400.0 - y) < 1.3);
    assert!((y - z).abs() < 1e-9);
}

#[test]
fn test_home_x_calibrates_short_axis() {
    let gantry = SimulatedGantry::new(SimConfig::default());
    let (mut grbl, mut limits) = connect(&gantry);
    let settings = HomingSettings::default();

    let result = Homing::new(&mut grbl, &mut limits, &settings)
        .home_axis(Axis::X)
        .unwrap();

    // Firmware reads 300 mm on a 291 mm axis
    assert_eq!(result.axis, Axis::X);
    assert_eq!(result.status, HomingStatus::Complete);
    assert_eq!(result.known_length, 291.0);
    assert!((result.measured_length - 300.0).abs() < 0.3, "{}", result.measured_length);
    assert!((result.correction_factor - 300.0 / 291.0).abs() < 0.002);
    assert!((result.steps_per_mm - 257.73).abs() < 0.5);

    let written = gantry.setting(100).unwrap();
    assert!((written - result.steps_per_mm).abs() < 0.001);
    assert_eq!(gantry.setting(101), Some(40.0));

    // Limits are in the new scale and straddle the parked position
    let minus = result.minus_limit.unwrap();
    let plus = result.plus_limit.unwrap();
    assert!((plus - minus - 291.0).abs() < 0.3);

    let physical = gantry.physical_position()[0];
    assert!((physical - 145.5).abs() < 0.5, "parked at {}", physical);

    let transcript = gantry.transcript();
    assert_eq!(transcript.last().map(String::as_str), Some("G90"));
    assert!(transcript.iter().any(|line| line == "$1=25"));
}

#[test]
fn test_home_y_updates_both_long_axis_motors() {
    let gantry = SimulatedGantry::new(SimConfig::default());
    let (mut grbl, mut limits) = connect(&gantry);
    let settings = HomingSettings::default();

    let result = Homing::new(&mut grbl, &mut limits, &settings)
        .home_axis(Axis::Y)
        .unwrap();

    assert!((result.measured_length - 910.0).abs() < 0.3);
    let y = gantry.setting(101).unwrap();
    let z = gantry.setting(102).unwrap();
    assert_eq!(y, z);
    assert!((y - 40.0 * 910.0 / 899.0).abs() < 0.05);

    let [_, y, z] = gantry.physical_position();
    assert!((y - 449.5).abs() < 0.5);
    assert!((y - z).abs() < 1e-6);
}

#[test]
fn test_home_all_sets_origin_and_outlines() {
    let gantry = SimulatedGantry::new(SimConfig::default());
    let machine = Machine::simulated(Config::default(), &gantry).unwrap();

    let result = machine.home_all(true).unwrap();

    assert_eq!(result.status, HomingStatus::Complete);
    assert!(result.outlined);
    assert!((result.x_axis_length() - 300.0).abs() < 0.3);
    assert!((result.y_axis_length() - 910.0).abs() < 0.3);
    // Parked at the centre, 10 mm inside the minus limits
    assert!((result.origin_offset_x - 135.5).abs() < 0.5);
    assert!((result.origin_offset_y - 439.5).abs() < 0.5);

    // The outline ends back on the origin
    let [x, y, z] = gantry.physical_position();
    assert!((x - 10.0).abs() < 0.5, "x at {}", x);
    assert!((y - 10.0).abs() < 0.5, "y at {}", y);
    assert!((z - 10.0).abs() < 0.5, "z at {}", z);

    assert_eq!(machine.status().unwrap().state, MachineState::Idle);
    assert!(!machine.is_busy());
}
