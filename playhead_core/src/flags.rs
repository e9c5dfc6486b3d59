use gstreamer::glib::{
    Type, Value, bitflags, gobject_ffi, prelude::*, translate::*, value::FromValue,
};
use std::fmt;

bitflags::bitflags! {
    /// The `flags` property of playbin, as a typed view.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PlaybinFlags: u32 {
        /// Render the video stream
        const VIDEO             = 0x00000001;
        /// Render the audio stream
        const AUDIO             = 0x00000002;
        /// Render subtitles
        const TEXT              = 0x00000004;
        /// Render a visualisation when no video is present
        const VIS               = 0x00000008;
        /// Use software volume
        const SOFT_VOLUME       = 0x00000010;
        /// Only use native audio formats
        const NATIVE_AUDIO      = 0x00000020;
        /// Only use native video formats
        const NATIVE_VIDEO      = 0x00000040;
        /// Attempt progressive download buffering
        const DOWNLOAD          = 0x00000080;
        /// Buffer demuxed/parsed data
        const BUFFERING         = 0x00000100;
        /// Deinterlace video if necessary
        const DEINTERLACE       = 0x00000200;
        /// Use software color balance
        const SOFT_COLORBALANCE = 0x00000400;
        /// Force audio/video filter(s) to be applied
        const FORCE_FILTERS     = 0x00000800;
        /// Force only software-based decoders (no effect for playbin3)
        const FORCE_SW_DECODERS = 0x00001000;
    }
}

impl Default for PlaybinFlags {
    fn default() -> Self {
        PlaybinFlags::VIDEO | PlaybinFlags::AUDIO | PlaybinFlags::TEXT | PlaybinFlags::SOFT_VOLUME
    }
}

impl fmt::Display for PlaybinFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        write!(f, "PlaybinFlags({})", names.join(" | "))
    }
}

impl StaticType for PlaybinFlags {
    fn static_type() -> Type {
        // Registered by playbin itself
        Type::from_name("GstPlayFlags")
            .expect("GstPlayFlags type should be registered by GStreamer")
    }
}

impl ToValue for PlaybinFlags {
    fn to_value(&self) -> Value {
        unsafe {
            let mut value = Value::from_type(Self::static_type());
            gobject_ffi::g_value_set_flags(value.to_glib_none_mut().0, self.bits());
            value
        }
    }

    fn value_type(&self) -> Type {
        Self::static_type()
    }
}

impl From<PlaybinFlags> for Value {
    fn from(flags: PlaybinFlags) -> Self {
        flags.to_value()
    }
}

unsafe impl<'a> FromValue<'a> for PlaybinFlags {
    type Checker = gstreamer::glib::value::GenericValueTypeChecker<Self>;

    unsafe fn from_value(value: &'a Value) -> Self {
        unsafe {
            let bits = gobject_ffi::g_value_get_flags(value.to_glib_none().0);
            PlaybinFlags::from_bits_truncate(bits)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_renders_all_track_kinds() {
        let flags = PlaybinFlags::default();
        assert!(flags.contains(PlaybinFlags::VIDEO));
        assert!(flags.contains(PlaybinFlags::AUDIO));
        assert!(flags.contains(PlaybinFlags::TEXT));
        assert!(!flags.contains(PlaybinFlags::VIS));
    }

    #[test]
    fn display_lists_set_bits() {
        let flags = PlaybinFlags::AUDIO | PlaybinFlags::VIS;
        assert_eq!(flags.to_string(), "PlaybinFlags(AUDIO | VIS)");
    }
}
