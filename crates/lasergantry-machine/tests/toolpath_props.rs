use lasergantry_machine::{apply_laser_power, parse_program, path_length, BoundingBox, GcodeLine};
use proptest::prelude::*;

proptest! {
    #[test]
    fn laser_power_is_written_once_per_m3(
        powers in proptest::collection::vec(proptest::option::of(0u32..2000), 1..8),
        power in 0u32..=1000,
    ) {
        let program: String = powers
            .iter()
            .map(|p| match p {
                Some(p) => format!("M3 S{}\nG1 X1 Y1\n", p),
                None => "M3\nG1 X1 Y1\n".to_string(),
            })
            .collect();
        let mut lines = parse_program(&program, false).unwrap();
        apply_laser_power(&mut lines, power);

        let expected = format!("M3 S{}", power);
        for line in &lines {
            if let GcodeLine::MCommand { text, .. } = line {
                prop_assert_eq!(text, &expected);
            }
        }
    }

    #[test]
    fn bounding_box_contains_every_point(
        points in proptest::collection::vec((-500i32..500, -500i32..500), 1..20),
    ) {
        let program: String = points
            .iter()
            .map(|(x, y)| format!("G1 X{} Y{}\n", x, y))
            .collect();
        let lines = parse_program(&program, false).unwrap();
        let bounds = BoundingBox::of(&lines).unwrap();

        for (x, y) in &points {
            let (x, y) = (f64::from(*x), f64::from(*y));
            prop_assert!(bounds.min_x <= x && x <= bounds.max_x);
            prop_assert!(bounds.min_y <= y && y <= bounds.max_y);
        }
        let (cx, cy) = bounds.center();
        prop_assert!(bounds.min_x <= cx && cx <= bounds.max_x);
        prop_assert!(bounds.min_y <= cy && cy <= bounds.max_y);
    }

    #[test]
    fn coupled_path_is_never_shorter_than_planar(dx in -1000.0f64..1000.0, dy in -1000.0f64..1000.0) {
        prop_assert!(path_length(dx, dy) + 1e-9 >= dx.hypot(dy));
    }
}
