//! Frame lines: parsing and canonical emission
//!
//! A frame line is a frame count followed by comma-separated action
//! characters, e.g. `10,R,J`. Characters toggle their flag with XOR, the
//! dash-only (`A`), move-only (`M`) and pressed-key (`P`) markers re-type the
//! characters that follow them, and a feather (`F`) consumes the rest of the
//! line as `angle[,magnitude]`. Emission walks the canonical character table
//! so equivalent lines always print the same way.

use std::fmt;

use smallvec::SmallVec;

use crate::input::actions::{Actions, ACTION_CHARS, DASH_ONLY_CHARS, MOVE_ONLY_CHARS};

/// Highest frame count a single line may carry. Larger counts are clamped.
pub const MAX_FRAMES: i32 = 9999;

const UPPER_LIMIT_MIN: f32 = 0.26;
const UPPER_LIMIT_MAX: f32 = 1.0;

/// One parsed frame line. The controller expands it into `frames` copies on
/// the playback timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct InputFrame {
    pub frames: u32,
    pub actions: Actions,
    /// Feather angle in degrees, clockwise from up.
    pub angle: f32,
    /// Feather magnitude cap, clamped to `[0.26, 1.0]`.
    pub upper_limit: f32,
    /// Raw key presses behind the `P` marker, deduplicated and kept sorted
    /// so emission is deterministic.
    pub pressed_keys: SmallVec<[char; 4]>,
    /// Line in the root-file view this input came from.
    pub line: u32,
    pub repeat_index: u32,
    pub repeat_count: u32,
    pub frame_offset: i32,
}

impl Default for InputFrame {
    fn default() -> Self {
        Self {
            frames: 0,
            actions: Actions::empty(),
            angle: 0.0,
            upper_limit: 1.0,
            pressed_keys: SmallVec::new(),
            line: 0,
            repeat_index: 0,
            repeat_count: 0,
            frame_offset: 0,
        }
    }
}

impl InputFrame {
    /// Parses a trimmed frame line. Returns `None` when the leading token is
    /// not a positive integer.
    pub fn parse(line: &str, studio_line: u32) -> Option<InputFrame> {
        Self::parse_with_repeat(line, studio_line, 0, 0, 0)
    }

    pub fn parse_with_repeat(
        line: &str,
        studio_line: u32,
        repeat_index: u32,
        repeat_count: u32,
        frame_offset: i32,
    ) -> Option<InputFrame> {
        let chars: Vec<char> = line.chars().collect();
        let comma = chars.iter().position(|&c| c == ',');
        let frames_str: String = match comma {
            Some(i) => chars[..i].iter().collect(),
            None => line.to_string(),
        };
        let start = comma.unwrap_or(0);

        let frames: i32 = frames_str.trim().parse().ok()?;
        if frames <= 0 {
            return None;
        }

        let mut frame = InputFrame {
            frames: frames.min(MAX_FRAMES) as u32,
            line: studio_line,
            repeat_index,
            repeat_count,
            frame_offset,
            ..InputFrame::default()
        };

        let mut index = start;
        while index < chars.len() {
            let c = chars[index].to_ascii_uppercase();

            if c.is_ascii_uppercase() && ends_with_marker_run(&chars, index, 'P', is_key_char) {
                frame.add_pressed_key(c);
            } else if let Some(mut actions) = Actions::from_char(c) {
                if ends_with_marker_run(&chars, index, 'A', is_direction_char) {
                    actions = actions.to_dash_only();
                } else if ends_with_marker_run(&chars, index, 'M', is_direction_char) {
                    actions = actions.to_move_only();
                } else if actions == Actions::FEATHER {
                    frame.actions ^= Actions::FEATHER;
                    index += 1;
                    frame.parse_feather(&chars, index + 1);
                    break;
                }

                frame.actions ^= actions;
            }

            index += 1;
        }

        Some(frame)
    }

    /// The rest of the line after a feather is `angle[,magnitude]`. A missing
    /// or malformed angle stays 0, a magnitude outside `[0.26, 1.0]` is
    /// clamped.
    fn parse_feather(&mut self, chars: &[char], from: usize) {
        if from >= chars.len() {
            return;
        }
        let rest: String = chars[from..].iter().collect();
        let rest = rest.trim();
        if rest.is_empty() {
            return;
        }

        let mut args = rest.split(',');
        if let Some(angle) = args.next() {
            if let Ok(angle) = angle.trim().parse::<f32>() {
                self.angle = angle;
            }
        }
        if let Some(limit) = args.next() {
            if let Ok(limit) = limit.trim().parse::<f32>() {
                self.upper_limit = limit.clamp(UPPER_LIMIT_MIN, UPPER_LIMIT_MAX);
            }
        }
    }

    fn add_pressed_key(&mut self, key: char) {
        match self.pressed_keys.binary_search(&key) {
            Ok(_) => {}
            Err(pos) => self.pressed_keys.insert(pos, key),
        }
    }

    pub fn has_actions(&self, actions: Actions) -> bool {
        self.actions.has(actions)
    }

    /// Horizontal analog axis for the feather angle. Cardinal angles map to
    /// exact values so floating point noise never leaks into straight aims.
    pub fn aim_x(&self) -> f32 {
        match self.angle {
            a if a == 0.0 => 0.0,
            a if a == 90.0 => 1.0,
            a if a == 180.0 => 0.0,
            a if a == 270.0 => -1.0,
            a if a == 360.0 => 0.0,
            a => (f64::from(a) * std::f64::consts::PI / 180.0).sin() as f32,
        }
    }

    /// Vertical analog axis for the feather angle, positive up.
    pub fn aim_y(&self) -> f32 {
        match self.angle {
            a if a == 0.0 => 1.0,
            a if a == 90.0 => 0.0,
            a if a == 180.0 => -1.0,
            a if a == 270.0 => 0.0,
            a if a == 360.0 => 1.0,
            a => (f64::from(a) * std::f64::consts::PI / 180.0).cos() as f32,
        }
    }

    /// Suffix shown next to the line number while inside a repeat, e.g.
    /// ` 2/5`. Empty outside repeats.
    pub fn repeat_string(&self) -> String {
        if self.repeat_count > 1 {
            format!(" {}/{}", self.repeat_index, self.repeat_count)
        } else {
            String::new()
        }
    }

    /// Canonical action-character suffix including the leading comma, e.g.
    /// `,R,J`. Walks the canonical table so flag order never depends on the
    /// order the script author typed.
    pub fn to_actions_string(&self) -> String {
        let mut out = String::new();

        for (c, actions) in ACTION_CHARS {
            if !self.actions.has(*actions) {
                continue;
            }
            out.push(',');
            out.push(*c);

            if *actions == Actions::DASH_ONLY {
                for (dir, flag) in DASH_ONLY_CHARS {
                    if self.actions.has(*flag) {
                        out.push(*dir);
                    }
                }
            } else if *actions == Actions::MOVE_ONLY {
                for (dir, flag) in MOVE_ONLY_CHARS {
                    if self.actions.has(*flag) {
                        out.push(*dir);
                    }
                }
            } else if *actions == Actions::PRESSED_KEY {
                for key in &self.pressed_keys {
                    out.push(*key);
                }
            } else if *actions == Actions::FEATHER {
                out.push(',');
                if self.angle != 0.0 {
                    out.push_str(&self.angle.to_string());
                }
                if (self.upper_limit - 1.0).abs() > 1e-10 {
                    out.push(',');
                    out.push_str(&self.upper_limit.to_string());
                }
            }
        }

        out
    }
}

impl fmt::Display for InputFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.frames, self.to_actions_string())
    }
}

fn is_direction_char(c: char) -> bool {
    matches!(c, 'L' | 'R' | 'U' | 'D')
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_uppercase()
}

/// True when the characters before `end` form `marker` followed by a run of
/// `allowed` characters reaching `end` itself. This is how the dash-only,
/// move-only and pressed-key markers claim the characters after them.
fn ends_with_marker_run(chars: &[char], end: usize, marker: char, allowed: fn(char) -> bool) -> bool {
    if end == 0 || !allowed(chars[end].to_ascii_uppercase()) {
        return false;
    }
    let mut i = end;
    while i > 0 {
        let prev = chars[i - 1].to_ascii_uppercase();
        if prev == marker {
            return true;
        }
        if !allowed(prev) {
            return false;
        }
        i -= 1;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> InputFrame {
        InputFrame::parse(line, 0).unwrap_or_else(|| panic!("line {line:?} should parse"))
    }

    #[test]
    fn parses_frames_and_actions() {
        let frame = parse("10,R,J");
        assert_eq!(frame.frames, 10);
        assert_eq!(frame.actions, Actions::RIGHT | Actions::JUMP);
    }

    #[test]
    fn rejects_non_positive_frame_counts() {
        assert!(InputFrame::parse("0,R", 0).is_none());
        assert!(InputFrame::parse("-1,R", 0).is_none());
        assert!(InputFrame::parse("x,R", 0).is_none());
        assert!(InputFrame::parse("", 0).is_none());
    }

    #[test]
    fn clamps_frame_count() {
        assert_eq!(parse("20000,R").frames, 9999);
        assert_eq!(parse("9999").frames, 9999);
    }

    #[test]
    fn repeated_characters_cancel_out() {
        let frame = parse("10,RR");
        assert!(frame.actions.is_empty());

        let frame = parse("10,R,J,R");
        assert_eq!(frame.actions, Actions::JUMP);
    }

    #[test]
    fn dash_only_directions_do_not_set_plain_directions() {
        let frame = parse("10,AR");
        assert!(frame.actions.has(Actions::DASH_ONLY));
        assert!(frame.actions.has(Actions::RIGHT_DASH_ONLY));
        assert!(!frame.actions.has(Actions::RIGHT));
    }

    #[test]
    fn move_only_directions_do_not_set_plain_directions() {
        let frame = parse("10,MLU");
        assert!(frame.actions.has(Actions::MOVE_ONLY));
        assert!(frame.actions.has(Actions::LEFT_MOVE_ONLY));
        assert!(frame.actions.has(Actions::UP_MOVE_ONLY));
        assert!(!frame.actions.has(Actions::LEFT));
        assert!(!frame.actions.has(Actions::UP));
    }

    #[test]
    fn marker_only_claims_its_own_run() {
        // J is not a direction, so it lands as a plain jump after the marker.
        let frame = parse("10,ALJ");
        assert!(frame.actions.has(Actions::LEFT_DASH_ONLY));
        assert!(frame.actions.has(Actions::JUMP));
        assert!(!frame.actions.has(Actions::LEFT));
    }

    #[test]
    fn pressed_keys_collect_after_marker() {
        let frame = parse("10,PKJ");
        assert!(frame.actions.has(Actions::PRESSED_KEY));
        assert_eq!(frame.pressed_keys.as_slice(), &['J', 'K']);
        assert!(!frame.actions.has(Actions::JUMP));
        assert!(!frame.actions.has(Actions::JUMP2));
    }

    #[test]
    fn pressed_keys_deduplicate() {
        let frame = parse("10,PKK");
        assert_eq!(frame.pressed_keys.as_slice(), &['K']);
    }

    #[test]
    fn lowercase_lines_parse() {
        let frame = parse("10,r,j");
        assert_eq!(frame.actions, Actions::RIGHT | Actions::JUMP);
    }

    #[test]
    fn feather_parses_angle_and_magnitude() {
        let frame = parse("5,F,90");
        assert!(frame.actions.has(Actions::FEATHER));
        assert_eq!(frame.angle, 90.0);
        assert_eq!(frame.upper_limit, 1.0);

        let frame = parse("5,F,42.5,0.5");
        assert_eq!(frame.angle, 42.5);
        assert_eq!(frame.upper_limit, 0.5);
    }

    #[test]
    fn feather_magnitude_is_clamped() {
        assert_eq!(parse("5,F,90,0.1").upper_limit, 0.26);
        assert_eq!(parse("5,F,90,2").upper_limit, 1.0);
    }

    #[test]
    fn feather_defaults_survive_bad_input() {
        let frame = parse("5,F,x");
        assert_eq!(frame.angle, 0.0);
        assert_eq!(frame.upper_limit, 1.0);
    }

    #[test]
    fn feather_consumes_the_rest_of_the_line() {
        // The angle tail is not scanned for actions.
        let frame = parse("5,F,90,1,J");
        assert!(!frame.actions.has(Actions::JUMP));
    }

    #[test]
    fn aim_axes_special_case_cardinals() {
        let up = parse("5,F,0");
        assert_eq!((up.aim_x(), up.aim_y()), (0.0, 1.0));
        let right = parse("5,F,90");
        assert_eq!((right.aim_x(), right.aim_y()), (1.0, 0.0));
        let down = parse("5,F,180");
        assert_eq!((down.aim_x(), down.aim_y()), (0.0, -1.0));
        let left = parse("5,F,270");
        assert_eq!((left.aim_x(), left.aim_y()), (-1.0, 0.0));
        let wrap = parse("5,F,360");
        assert_eq!((wrap.aim_x(), wrap.aim_y()), (0.0, 1.0));

        let diag = parse("5,F,45");
        assert!((diag.aim_x() - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!((diag.aim_y() - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn emission_is_canonical_and_idempotent() {
        let samples = [
            "10,J,R",
            "10,R,J",
            "3,AUD,X",
            "7,MLR",
            "10,PJK,G",
            "5,F,90,0.5",
            "5,F,",
            "1",
        ];
        for line in samples {
            let once = parse(line).to_string();
            let twice = parse(&once).to_string();
            assert_eq!(once, twice, "emission of {line:?} should be stable");
        }
    }

    #[test]
    fn emission_orders_by_canonical_table() {
        assert_eq!(parse("10,J,R").to_string(), "10,R,J");
        assert_eq!(parse("10,X,U,L").to_string(), "10,L,U,X");
    }

    #[test]
    fn feather_emission_matches_parse_shape() {
        assert_eq!(parse("5,F,90").to_string(), "5,F,90");
        assert_eq!(parse("5,F").to_string(), "5,F,");
        assert_eq!(parse("5,F,0,0.5").to_string(), "5,F,,0.5");
        assert_eq!(parse("5,F,90,2").to_string(), "5,F,90");
    }

    #[test]
    fn repeat_string_shows_only_inside_repeats() {
        let mut frame = parse("10,R");
        assert_eq!(frame.repeat_string(), "");
        frame.repeat_index = 2;
        frame.repeat_count = 5;
        assert_eq!(frame.repeat_string(), " 2/5");
    }

    #[test]
    fn records_studio_line() {
        let frame = InputFrame::parse("4,J", 17).unwrap();
        assert_eq!(frame.line, 17);
    }
}
