//! Action flags and the script character vocabulary
//!
//! Every input a frame line can express is a flag in one set, including the
//! dash-only/move-only axis splits and the pressed-key escape. Frame lines
//! toggle flags with XOR, so a repeated character cancels itself out.

bitflags::bitflags! {
    /// Inputs held during an expanded frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Actions: u32 {
        const LEFT = 1 << 0;
        const RIGHT = 1 << 1;
        const UP = 1 << 2;
        const DOWN = 1 << 3;
        const JUMP = 1 << 4;
        const DASH = 1 << 5;
        const GRAB = 1 << 6;
        const START = 1 << 7;
        const RESTART = 1 << 8;
        /// Analog aim. The angle and magnitude cap live on the frame itself.
        const FEATHER = 1 << 9;
        const JOURNAL = 1 << 10;
        /// Secondary jump binding.
        const JUMP2 = 1 << 11;
        /// Secondary dash binding.
        const DASH2 = 1 << 12;
        /// Secondary grab binding.
        const GRAB2 = 1 << 13;
        const DEMO_DASH = 1 << 14;
        const DEMO_DASH2 = 1 << 15;
        const CONFIRM = 1 << 16;
        /// Marker that the following directions feed the dash axis only.
        const DASH_ONLY = 1 << 17;
        const LEFT_DASH_ONLY = 1 << 18;
        const RIGHT_DASH_ONLY = 1 << 19;
        const UP_DASH_ONLY = 1 << 20;
        const DOWN_DASH_ONLY = 1 << 21;
        /// Marker that the following directions feed the movement axis only.
        const MOVE_ONLY = 1 << 22;
        const LEFT_MOVE_ONLY = 1 << 23;
        const RIGHT_MOVE_ONLY = 1 << 24;
        const UP_MOVE_ONLY = 1 << 25;
        const DOWN_MOVE_ONLY = 1 << 26;
        /// Marker that the following characters are raw key presses.
        const PRESSED_KEY = 1 << 27;
    }
}

/// Canonical `(character, action)` table. Parsing accepts characters in any
/// order; emission walks this table front to back so equivalent frames always
/// print identically, which the script checksum relies on.
pub const ACTION_CHARS: &[(char, Actions)] = &[
    ('L', Actions::LEFT),
    ('R', Actions::RIGHT),
    ('U', Actions::UP),
    ('D', Actions::DOWN),
    ('J', Actions::JUMP),
    ('K', Actions::JUMP2),
    ('X', Actions::DASH),
    ('C', Actions::DASH2),
    ('Z', Actions::DEMO_DASH),
    ('V', Actions::DEMO_DASH2),
    ('G', Actions::GRAB),
    ('H', Actions::GRAB2),
    ('S', Actions::START),
    ('Q', Actions::RESTART),
    ('N', Actions::JOURNAL),
    ('O', Actions::CONFIRM),
    ('A', Actions::DASH_ONLY),
    ('M', Actions::MOVE_ONLY),
    ('P', Actions::PRESSED_KEY),
    ('F', Actions::FEATHER),
];

/// Direction characters valid after a dash-only marker, in emission order.
pub const DASH_ONLY_CHARS: &[(char, Actions)] = &[
    ('L', Actions::LEFT_DASH_ONLY),
    ('R', Actions::RIGHT_DASH_ONLY),
    ('U', Actions::UP_DASH_ONLY),
    ('D', Actions::DOWN_DASH_ONLY),
];

/// Direction characters valid after a move-only marker, in emission order.
pub const MOVE_ONLY_CHARS: &[(char, Actions)] = &[
    ('L', Actions::LEFT_MOVE_ONLY),
    ('R', Actions::RIGHT_MOVE_ONLY),
    ('U', Actions::UP_MOVE_ONLY),
    ('D', Actions::DOWN_MOVE_ONLY),
];

impl Actions {
    /// Looks up the action for an uppercase script character.
    pub fn from_char(c: char) -> Option<Actions> {
        ACTION_CHARS
            .iter()
            .find(|(ch, _)| *ch == c)
            .map(|(_, actions)| *actions)
    }

    /// Remaps a plain direction to its dash-only counterpart. Anything that
    /// is not a plain direction passes through unchanged.
    pub fn to_dash_only(self) -> Actions {
        if self == Actions::LEFT {
            Actions::LEFT_DASH_ONLY
        } else if self == Actions::RIGHT {
            Actions::RIGHT_DASH_ONLY
        } else if self == Actions::UP {
            Actions::UP_DASH_ONLY
        } else if self == Actions::DOWN {
            Actions::DOWN_DASH_ONLY
        } else {
            self
        }
    }

    /// Remaps a plain direction to its move-only counterpart.
    pub fn to_move_only(self) -> Actions {
        if self == Actions::LEFT {
            Actions::LEFT_MOVE_ONLY
        } else if self == Actions::RIGHT {
            Actions::RIGHT_MOVE_ONLY
        } else if self == Actions::UP {
            Actions::UP_MOVE_ONLY
        } else if self == Actions::DOWN {
            Actions::DOWN_MOVE_ONLY
        } else {
            self
        }
    }

    /// True when any of the given flags is set.
    pub fn has(self, actions: Actions) -> bool {
        self.intersects(actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn char_table_round_trips() {
        for (c, actions) in ACTION_CHARS {
            assert_eq!(Actions::from_char(*c), Some(*actions), "char {c}");
        }
        assert_eq!(Actions::from_char('B'), None);
        assert_eq!(Actions::from_char('1'), None);
        assert_eq!(Actions::from_char(','), None);
    }

    #[test]
    fn dash_only_remap_covers_directions() {
        assert_eq!(Actions::LEFT.to_dash_only(), Actions::LEFT_DASH_ONLY);
        assert_eq!(Actions::RIGHT.to_dash_only(), Actions::RIGHT_DASH_ONLY);
        assert_eq!(Actions::UP.to_dash_only(), Actions::UP_DASH_ONLY);
        assert_eq!(Actions::DOWN.to_dash_only(), Actions::DOWN_DASH_ONLY);
        // Non-directions are left alone.
        assert_eq!(Actions::JUMP.to_dash_only(), Actions::JUMP);
    }

    #[test]
    fn move_only_remap_covers_directions() {
        assert_eq!(Actions::LEFT.to_move_only(), Actions::LEFT_MOVE_ONLY);
        assert_eq!(Actions::DOWN.to_move_only(), Actions::DOWN_MOVE_ONLY);
        assert_eq!(Actions::GRAB.to_move_only(), Actions::GRAB);
    }

    #[test]
    fn xor_toggles_flags() {
        let mut actions = Actions::empty();
        actions ^= Actions::RIGHT;
        assert!(actions.has(Actions::RIGHT));
        actions ^= Actions::RIGHT;
        assert!(actions.is_empty());
    }
}
