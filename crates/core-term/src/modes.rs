//! Terminal mode bits.

bitflags::bitflags! {
    /// The ANSI and DEC-private modes the controller tracks. One bit each;
    /// consumers that need a mode (key encoders, renderers, the controller
    /// itself) test the set directly.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct ModeSet: u32 {
        const ORIGIN              = 1 << 0;
        const AUTO_WRAP           = 1 << 1;
        const AUTO_REPEAT         = 1 << 2;
        const SHOW_CURSOR         = 1 << 3;
        const ALT_SENDS_ESC       = 1 << 4;
        const DELETE_SENDS_DEL    = 1 << 5;
        const CR_ON_LF            = 1 << 6;
        const INSERT              = 1 << 7;
        const ECHO                = 1 << 8;
        const KBD_LOCK            = 1 << 9;
        const APP_KEYPAD          = 1 << 10;
        const APP_CURSOR          = 1 << 11;
        const REVERSE_VIDEO       = 1 << 12;
        const MOUSE_PRESS_RELEASE = 1 << 13;
        const MOUSE_DRAG          = 1 << 14;
        const MOUSE_MOTION        = 1 << 15;
        const MOUSE_SELECT        = 1 << 16;
        const MOUSE_FORMAT_SGR    = 1 << 17;
        const BRACKETED_PASTE     = 1 << 18;
        const META_8BIT           = 1 << 19;
        const FOCUS               = 1 << 20;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_fit_one_word() {
        assert_eq!(std::mem::size_of::<ModeSet>(), 4);
        assert!(ModeSet::all().bits() < 1 << 21);
    }

    #[test]
    fn set_and_clear() {
        let mut modes = ModeSet::default();
        modes.insert(ModeSet::AUTO_WRAP | ModeSet::SHOW_CURSOR);
        assert!(modes.contains(ModeSet::AUTO_WRAP));
        modes.remove(ModeSet::AUTO_WRAP);
        assert!(!modes.contains(ModeSet::AUTO_WRAP));
        assert!(modes.contains(ModeSet::SHOW_CURSOR));
    }
}
