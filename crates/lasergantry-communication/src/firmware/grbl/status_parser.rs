//! GRBL status report parsing
//!
//! A `?` query answers with one bracketed block such as
//! `<Idle|MPos:10.000,20.000,20.000|FS:0,0>`, with `WCO:` appended on the
//! reports GRBL chooses to carry it. Parsing is best effort: any field that
//! cannot be read is left as `None` and no error is raised.

use lasergantry_core::{MachineState, Position, PositioningMode};

/// Parse everything the controller sent back after a `?`
pub fn parse_position(raw: &str) -> Position {
    let mut position = Position {
        raw: raw.to_string(),
        ..Default::default()
    };

    let Some(block) = status_block(raw) else {
        return position;
    };
    position.status = Some(block.to_string());
    position.state = parse_machine_state(block);
    position.mode = parse_mode(block);

    if let Some((x, y, z)) = extract_field(block, "MPos:").and_then(parse_triple) {
        position.x = Some(x);
        position.y = Some(y);
        position.z = Some(z);
    }
    if let Some((x, y, z)) = extract_field(block, "WCO:").and_then(parse_triple) {
        position.work_offset = Some([x, y, z]);
    }

    position
}

/// First `<...>` block in the reply, brackets included
pub fn status_block(raw: &str) -> Option<&str> {
    let start = raw.find('<')?;
    let end = start + raw[start..].find('>')?;
    Some(&raw[start..=end])
}

/// Leading state word of a status block
pub fn parse_machine_state(block: &str) -> MachineState {
    let inner = block.trim_start_matches('<').trim_end_matches('>');
    let word = inner.split('|').next().unwrap_or_default();
    MachineState::from_grbl_state(word)
}

fn parse_mode(block: &str) -> PositioningMode {
    if block.contains("G91") {
        PositioningMode::Relative
    } else if block.contains("G90") {
        PositioningMode::Absolute
    } else {
        PositioningMode::Unknown
    }
}

/// Value of `field_prefix` up to the next `|` or the closing bracket
fn extract_field<'a>(block: &'a str, field_prefix: &str) -> Option<&'a str> {
    let start = block.find(field_prefix)? + field_prefix.len();
    let rest = &block[start..];
    let end = rest.find(['|', '>']).unwrap_or(rest.len());
    Some(&rest[..end])
}

fn parse_triple(field: &str) -> Option<(f64, f64, f64)> {
    let mut coords = field.split(',').map(|s| s.trim().parse::<f64>());
    let x = coords.next()?.ok()?;
    let y = coords.next()?.ok()?;
    let z = coords.next()?.ok()?;
    Some((x, y, z))
}
