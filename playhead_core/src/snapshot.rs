use gstreamer as gst;

/// Output format of a snapshot frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotFormat {
    /// Raw video in whatever format the pipeline produces.
    RawNative,
    /// Raw video converted to xRGB.
    RawXrgb,
    /// Raw video converted to BGRx.
    RawBgrx,
    Jpeg,
    Png,
}

/// Optional scaling applied while converting the snapshot frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SnapshotSpec {
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub pixel_aspect_ratio: Option<gst::Fraction>,
}

/// Caps handed to playbin's `convert-sample` action signal.
pub(crate) fn snapshot_caps(format: SnapshotFormat, spec: SnapshotSpec) -> gst::Caps {
    let (name, raw_format) = match format {
        SnapshotFormat::RawNative => ("video/x-raw", None),
        SnapshotFormat::RawXrgb => ("video/x-raw", Some("xRGB")),
        SnapshotFormat::RawBgrx => ("video/x-raw", Some("BGRx")),
        SnapshotFormat::Jpeg => ("image/jpeg", None),
        SnapshotFormat::Png => ("image/png", None),
    };

    let mut builder = gst::Caps::builder(name);
    if let Some(raw_format) = raw_format {
        builder = builder.field("format", raw_format);
    }
    if let Some(width) = spec.width {
        builder = builder.field("width", width);
    }
    if let Some(height) = spec.height {
        builder = builder.field("height", height);
    }
    match (spec.pixel_aspect_ratio, format) {
        (Some(par), _) => builder = builder.field("pixel-aspect-ratio", par),
        // Raw conversions keep square pixels unless told otherwise.
        (None, SnapshotFormat::RawNative | SnapshotFormat::RawXrgb | SnapshotFormat::RawBgrx) => {
            builder = builder.field("pixel-aspect-ratio", gst::Fraction::new(1, 1));
        }
        (None, _) => {}
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_formats_carry_format_and_square_par() {
        gst::init().unwrap();
        let caps = snapshot_caps(SnapshotFormat::RawXrgb, SnapshotSpec::default());
        let s = caps.structure(0).unwrap();
        assert_eq!(s.name(), "video/x-raw");
        assert_eq!(s.get::<&str>("format").unwrap(), "xRGB");
        assert_eq!(
            s.get::<gst::Fraction>("pixel-aspect-ratio").unwrap(),
            gst::Fraction::new(1, 1)
        );
    }

    #[test]
    fn encoded_formats_omit_unrequested_fields() {
        gst::init().unwrap();
        let caps = snapshot_caps(SnapshotFormat::Png, SnapshotSpec::default());
        let s = caps.structure(0).unwrap();
        assert_eq!(s.name(), "image/png");
        assert!(!s.has_field("format"));
        assert!(!s.has_field("pixel-aspect-ratio"));
    }

    #[test]
    fn scaling_fields_are_applied() {
        gst::init().unwrap();
        let spec = SnapshotSpec {
            width: Some(320),
            height: Some(180),
            pixel_aspect_ratio: Some(gst::Fraction::new(4, 3)),
        };
        let caps = snapshot_caps(SnapshotFormat::Jpeg, spec);
        let s = caps.structure(0).unwrap();
        assert_eq!(s.get::<i32>("width").unwrap(), 320);
        assert_eq!(s.get::<i32>("height").unwrap(), 180);
        assert_eq!(
            s.get::<gst::Fraction>("pixel-aspect-ratio").unwrap(),
            gst::Fraction::new(4, 3)
        );
    }
}
