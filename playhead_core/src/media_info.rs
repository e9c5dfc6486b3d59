use gstreamer as gst;
use gstreamer_pbutils as gst_pbutils;
use gstreamer_video as gst_video;

/// Kind of an elementary stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
}

/// Kind-specific fields of a stream entry.
#[derive(Debug, Clone)]
pub enum StreamDetails {
    Video {
        width: u32,
        height: u32,
        framerate: gst::Fraction,
        pixel_aspect_ratio: gst::Fraction,
        bitrate: u32,
        max_bitrate: u32,
    },
    Audio {
        channels: i32,
        sample_rate: i32,
        bitrate: u32,
        max_bitrate: u32,
        language: Option<String>,
    },
    Subtitle {
        language: Option<String>,
    },
}

impl StreamDetails {
    pub fn kind(&self) -> StreamKind {
        match self {
            StreamDetails::Video { .. } => StreamKind::Video,
            StreamDetails::Audio { .. } => StreamKind::Audio,
            StreamDetails::Subtitle { .. } => StreamKind::Subtitle,
        }
    }
}

/// One elementary stream of the loaded media.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Position of this stream within its kind (0-based).
    pub index: i32,
    /// Stable stream id, present when the pipeline runs in
    /// stream-collection mode.
    pub stream_id: Option<String>,
    pub tags: Option<gst::TagList>,
    pub caps: Option<gst::Caps>,
    /// Human-readable codec description.
    pub codec: Option<String>,
    pub details: StreamDetails,
}

impl StreamInfo {
    pub fn kind(&self) -> StreamKind {
        self.details.kind()
    }
}

/// Snapshot of everything known about the loaded URI.
///
/// Snapshots are immutable from the application's point of view: the player
/// republishes a fresh copy whenever anything changes, and accessors on the
/// player hand out copies, never references into live state.
#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub uri: String,
    pub duration: Option<gst::ClockTime>,
    pub seekable: bool,
    pub is_live: bool,
    pub title: Option<String>,
    pub container: Option<String>,
    /// Cover art or preview image, if the media carries one.
    pub cover: Option<gst::Sample>,
    /// Global tags of the media.
    pub tags: Option<gst::TagList>,
    pub streams: Vec<StreamInfo>,
}

impl MediaInfo {
    pub(crate) fn new(uri: String) -> Self {
        MediaInfo {
            uri,
            duration: None,
            seekable: false,
            is_live: false,
            title: None,
            container: None,
            cover: None,
            tags: None,
            streams: Vec::new(),
        }
    }

    pub fn video_streams(&self) -> impl Iterator<Item = &StreamInfo> {
        self.streams.iter().filter(|s| s.kind() == StreamKind::Video)
    }

    pub fn audio_streams(&self) -> impl Iterator<Item = &StreamInfo> {
        self.streams.iter().filter(|s| s.kind() == StreamKind::Audio)
    }

    pub fn subtitle_streams(&self) -> impl Iterator<Item = &StreamInfo> {
        self.streams
            .iter()
            .filter(|s| s.kind() == StreamKind::Subtitle)
    }

    pub fn stream(&self, kind: StreamKind, index: i32) -> Option<&StreamInfo> {
        self.streams
            .iter()
            .find(|s| s.kind() == kind && s.index == index)
    }

    pub(crate) fn stream_mut(&mut self, kind: StreamKind, index: i32) -> Option<&mut StreamInfo> {
        self.streams
            .iter_mut()
            .find(|s| s.kind() == kind && s.index == index)
    }

    pub(crate) fn stream_by_id_mut(&mut self, stream_id: &str) -> Option<&mut StreamInfo> {
        self.streams
            .iter_mut()
            .find(|s| s.stream_id.as_deref() == Some(stream_id))
    }

    /// Re-derive title, container and cover image from the known tags.
    ///
    /// Probe order: global tags, then each video stream, then each audio
    /// stream; the first non-empty value wins.
    pub(crate) fn resolve_metadata(&mut self) {
        let mut sources: Vec<&gst::TagList> = Vec::new();
        if let Some(tags) = &self.tags {
            sources.push(tags);
        }
        sources.extend(self.video_streams().filter_map(|s| s.tags.as_ref()));
        sources.extend(self.audio_streams().filter_map(|s| s.tags.as_ref()));

        let title = sources.iter().find_map(|t| title_from_tags(t));
        let container = sources.iter().find_map(|t| container_from_tags(t));
        let cover = sources.iter().find_map(|t| cover_from_tags(t));

        self.title = title;
        self.container = container;
        self.cover = cover;
    }
}

fn tag_string<'a, T>(tags: &'a gst::TagListRef) -> Option<String>
where
    T: gst::tags::Tag<'a, TagType = &'a str>,
{
    tags.get::<T>()
        .map(|v| v.get().to_string())
        .filter(|s| !s.is_empty())
}

fn tag_u32<'a, T>(tags: &'a gst::TagListRef) -> Option<u32>
where
    T: gst::tags::Tag<'a, TagType = u32>,
{
    tags.get::<T>().map(|v| v.get())
}

pub(crate) fn title_from_tags(tags: &gst::TagListRef) -> Option<String> {
    tag_string::<gst::tags::Title>(tags).or_else(|| tag_string::<gst::tags::TitleSortname>(tags))
}

pub(crate) fn container_from_tags(tags: &gst::TagListRef) -> Option<String> {
    tag_string::<gst::tags::ContainerFormat>(tags)
}

pub(crate) fn cover_from_tags(tags: &gst::TagListRef) -> Option<gst::Sample> {
    tags.get::<gst::tags::Image>()
        .map(|v| v.get())
        .or_else(|| tags.get::<gst::tags::PreviewImage>().map(|v| v.get()))
}

/// Language of a stream: the spelled-out name when tagged, otherwise the raw
/// language code.
pub(crate) fn language_from_tags(tags: &gst::TagListRef) -> Option<String> {
    tag_string::<gst::tags::LanguageName>(tags)
        .or_else(|| tag_string::<gst::tags::LanguageCode>(tags))
}

/// Codec description: kind-specific tag, then the generic codec tag, then a
/// guess derived from the stream caps.
pub(crate) fn codec_description(
    kind: StreamKind,
    tags: Option<&gst::TagListRef>,
    caps: Option<&gst::CapsRef>,
) -> Option<String> {
    if let Some(tags) = tags {
        let tagged = match kind {
            StreamKind::Video => tag_string::<gst::tags::VideoCodec>(tags),
            StreamKind::Audio => tag_string::<gst::tags::AudioCodec>(tags),
            StreamKind::Subtitle => tag_string::<gst::tags::SubtitleCodec>(tags),
        };
        if let Some(codec) = tagged.or_else(|| tag_string::<gst::tags::Codec>(tags)) {
            return Some(codec);
        }
    }
    caps.map(|caps| gst_pbutils::pb_utils_get_codec_description(caps).to_string())
}

pub(crate) fn video_details(
    tags: Option<&gst::TagListRef>,
    caps: Option<&gst::CapsRef>,
) -> StreamDetails {
    let info = caps.and_then(|c| gst_video::VideoInfo::from_caps(c).ok());
    StreamDetails::Video {
        width: info.as_ref().map(|i| i.width()).unwrap_or(0),
        height: info.as_ref().map(|i| i.height()).unwrap_or(0),
        framerate: info
            .as_ref()
            .map(|i| i.fps())
            .unwrap_or_else(|| gst::Fraction::new(0, 1)),
        pixel_aspect_ratio: info
            .as_ref()
            .map(|i| i.par())
            .unwrap_or_else(|| gst::Fraction::new(1, 1)),
        bitrate: tags.and_then(tag_u32::<gst::tags::Bitrate>).unwrap_or(0),
        max_bitrate: tags
            .and_then(tag_u32::<gst::tags::MaximumBitrate>)
            .unwrap_or(0),
    }
}

pub(crate) fn audio_details(
    tags: Option<&gst::TagListRef>,
    caps: Option<&gst::CapsRef>,
) -> StreamDetails {
    let structure = caps.and_then(|c| c.structure(0));
    StreamDetails::Audio {
        channels: structure
            .and_then(|s| s.get::<i32>("channels").ok())
            .unwrap_or(0),
        sample_rate: structure.and_then(|s| s.get::<i32>("rate").ok()).unwrap_or(0),
        bitrate: tags.and_then(tag_u32::<gst::tags::Bitrate>).unwrap_or(0),
        max_bitrate: tags
            .and_then(tag_u32::<gst::tags::MaximumBitrate>)
            .unwrap_or(0),
        language: tags.and_then(language_from_tags),
    }
}

/// `external_name` is used as the language label for an externally loaded
/// subtitle file when its tags carry no language of their own.
pub(crate) fn subtitle_details(
    tags: Option<&gst::TagListRef>,
    external_name: Option<&str>,
) -> StreamDetails {
    StreamDetails::Subtitle {
        language: tags
            .and_then(language_from_tags)
            .or_else(|| external_name.map(str::to_string)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(build: impl FnOnce(&mut gst::TagListRef)) -> gst::TagList {
        gst::init().unwrap();
        let mut tags = gst::TagList::new();
        build(tags.get_mut().unwrap());
        tags
    }

    #[test]
    fn title_falls_back_to_sortname() {
        let list = tags(|t| {
            t.add::<gst::tags::TitleSortname>(&"Movie, The", gst::TagMergeMode::Replace);
        });
        assert_eq!(title_from_tags(&list).as_deref(), Some("Movie, The"));

        let list = tags(|t| {
            t.add::<gst::tags::Title>(&"The Movie", gst::TagMergeMode::Replace);
            t.add::<gst::tags::TitleSortname>(&"Movie, The", gst::TagMergeMode::Replace);
        });
        assert_eq!(title_from_tags(&list).as_deref(), Some("The Movie"));
    }

    #[test]
    fn language_prefers_spelled_out_name() {
        let list = tags(|t| {
            t.add::<gst::tags::LanguageCode>(&"de", gst::TagMergeMode::Replace);
            t.add::<gst::tags::LanguageName>(&"German", gst::TagMergeMode::Replace);
        });
        assert_eq!(language_from_tags(&list).as_deref(), Some("German"));

        let list = tags(|t| {
            t.add::<gst::tags::LanguageCode>(&"de", gst::TagMergeMode::Replace);
        });
        assert_eq!(language_from_tags(&list).as_deref(), Some("de"));
    }

    #[test]
    fn codec_prefers_kind_specific_tag() {
        let list = tags(|t| {
            t.add::<gst::tags::Codec>(&"Generic", gst::TagMergeMode::Replace);
            t.add::<gst::tags::AudioCodec>(&"Opus", gst::TagMergeMode::Replace);
        });
        assert_eq!(
            codec_description(StreamKind::Audio, Some(&list), None).as_deref(),
            Some("Opus")
        );
        assert_eq!(
            codec_description(StreamKind::Video, Some(&list), None).as_deref(),
            Some("Generic")
        );
    }

    #[test]
    fn external_subtitle_name_is_last_resort() {
        gst::init().unwrap();
        let details = subtitle_details(None, Some("movie.srt"));
        let StreamDetails::Subtitle { language } = details else {
            panic!("expected subtitle details");
        };
        assert_eq!(language.as_deref(), Some("movie.srt"));

        let list = tags(|t| {
            t.add::<gst::tags::LanguageName>(&"French", gst::TagMergeMode::Replace);
        });
        let StreamDetails::Subtitle { language } = subtitle_details(Some(&list), Some("movie.srt"))
        else {
            panic!("expected subtitle details");
        };
        assert_eq!(language.as_deref(), Some("French"));
    }

    #[test]
    fn audio_details_come_from_caps() {
        gst::init().unwrap();
        let caps = gst::Caps::builder("audio/x-raw")
            .field("channels", 2i32)
            .field("rate", 48_000i32)
            .build();
        let StreamDetails::Audio {
            channels,
            sample_rate,
            ..
        } = audio_details(None, Some(&caps))
        else {
            panic!("expected audio details");
        };
        assert_eq!(channels, 2);
        assert_eq!(sample_rate, 48_000);
    }

    #[test]
    fn streams_index_per_kind() {
        gst::init().unwrap();
        let mut info = MediaInfo::new("file:///tmp/a.mkv".into());
        info.streams.push(StreamInfo {
            index: 0,
            stream_id: None,
            tags: None,
            caps: None,
            codec: None,
            details: video_details(None, None),
        });
        info.streams.push(StreamInfo {
            index: 0,
            stream_id: None,
            tags: None,
            caps: None,
            codec: None,
            details: audio_details(None, None),
        });
        info.streams.push(StreamInfo {
            index: 1,
            stream_id: None,
            tags: None,
            caps: None,
            codec: None,
            details: audio_details(None, None),
        });

        assert_eq!(info.video_streams().count(), 1);
        assert_eq!(info.audio_streams().count(), 2);
        assert!(info.stream(StreamKind::Audio, 1).is_some());
        assert!(info.stream(StreamKind::Subtitle, 0).is_none());
    }

    #[test]
    fn metadata_resolution_probes_global_then_streams() {
        gst::init().unwrap();
        let mut info = MediaInfo::new("file:///tmp/a.mkv".into());
        info.streams.push(StreamInfo {
            index: 0,
            stream_id: None,
            tags: Some(tags(|t| {
                t.add::<gst::tags::Title>(&"From Video Stream", gst::TagMergeMode::Replace);
            })),
            caps: None,
            codec: None,
            details: video_details(None, None),
        });

        info.resolve_metadata();
        assert_eq!(info.title.as_deref(), Some("From Video Stream"));

        info.tags = Some(tags(|t| {
            t.add::<gst::tags::Title>(&"Global Title", gst::TagMergeMode::Replace);
        }));
        info.resolve_metadata();
        assert_eq!(info.title.as_deref(), Some("Global Title"));
    }
}
