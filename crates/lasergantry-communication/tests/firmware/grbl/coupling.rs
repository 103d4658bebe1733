use lasergantry_communication::firmware::grbl::{format_coordinate, MoveCommand};
use proptest::prelude::*;

fn word(line: &str, letter: char) -> Option<String> {
    line.split_whitespace()
        .find(|w| w.starts_with(letter))
        .map(|w| w[1..].to_string())
}

proptest! {
    #[test]
    fn y_always_drives_z(
        x in proptest::option::of(-1000.0f64..1000.0),
        y in -1000.0f64..1000.0,
        z in proptest::option::of(-1000.0f64..1000.0),
        feed in proptest::option::of(1.0f64..20000.0),
    ) {
        let line = MoveCommand::linear().maybe(x, Some(y), z, feed).to_line();
        prop_assert_eq!(word(&line, 'Y'), Some(format_coordinate(y)));
        prop_assert_eq!(word(&line, 'Z'), word(&line, 'Y'));
    }

    #[test]
    fn z_alone_never_gains_y(
        x in proptest::option::of(-1000.0f64..1000.0),
        z in -1000.0f64..1000.0,
    ) {
        let line = MoveCommand::linear().maybe(x, None, Some(z), None).to_line();
        prop_assert_eq!(word(&line, 'Y'), None);
        prop_assert_eq!(word(&line, 'Z'), Some(format_coordinate(z)));
    }

    #[test]
    fn work_offset_is_coupled_too(y in -1000.0f64..1000.0) {
        let line = MoveCommand::work_offset().y(y).to_line();
        prop_assert!(line.starts_with("G92 "));
        prop_assert_eq!(word(&line, 'Z'), word(&line, 'Y'));
    }
}
