use std::sync::Arc;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_video as gst_video;
use gstreamer_video::prelude::*;
use parking_lot::Mutex;

use crate::config::PlayerConfig;
use crate::error::Error;
use crate::flags::PlaybinFlags;
use crate::internal::{self, LoopItem, PlayerInner, Shared};
use crate::media_info::{MediaInfo, StreamInfo, StreamKind};
use crate::message::MessageBus;
use crate::renderer::VideoRenderer;
use crate::snapshot::{self, SnapshotFormat, SnapshotSpec};
use crate::state::PlaybackState;
use crate::visualization::{Visualization, VisualizationRegistry};

/// Color balance channel of the video chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BalanceChannel {
    Brightness,
    Contrast,
    Saturation,
    Hue,
}

impl BalanceChannel {
    fn label(&self) -> &'static str {
        match self {
            BalanceChannel::Brightness => "BRIGHTNESS",
            BalanceChannel::Contrast => "CONTRAST",
            BalanceChannel::Saturation => "SATURATION",
            BalanceChannel::Hue => "HUE",
        }
    }
}

fn kind_name(kind: StreamKind) -> &'static str {
    match kind {
        StreamKind::Video => "video",
        StreamKind::Audio => "audio",
        StreamKind::Subtitle => "subtitle",
    }
}

/// URI-based media player.
///
/// All mutating operations are fire-and-forget: they enqueue a command for
/// the playback thread and return immediately. Results surface as
/// [`PlayMessage`](crate::PlayMessage)s on the player's [`MessageBus`].
/// Reads return snapshots of cached state.
pub struct Player {
    playbin: gst::Pipeline,
    shared: Arc<Mutex<Shared>>,
    bus: MessageBus,
    tx: Sender<LoopItem>,
    visualizations: Mutex<VisualizationRegistry>,
    worker: Option<JoinHandle<()>>,
}

impl Player {
    /// Create a player with the default configuration.
    ///
    /// Blocks until the playback thread is running. Fails if the pipeline
    /// element cannot be created, typically because the playback plugins
    /// are not installed.
    pub fn new(renderer: Option<Box<dyn VideoRenderer>>) -> Result<Self, Error> {
        Self::with_config(renderer, PlayerConfig::default())
    }

    pub fn with_config(
        renderer: Option<Box<dyn VideoRenderer>>,
        config: PlayerConfig,
    ) -> Result<Self, Error> {
        gst::init().map_err(|err| Error::failed(format!("failed to initialize gstreamer: {}", err)))?;
        config.validate()?;

        let shared = Arc::new(Mutex::new(Shared::new(config)));
        let bus = MessageBus::new();
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let worker = {
            let shared = shared.clone();
            let bus = bus.clone();
            let tx = tx.clone();
            thread::Builder::new()
                .name("playhead-loop".into())
                .spawn(move || internal::run_loop(shared, bus, tx, rx, ready_tx, renderer))
                .map_err(|err| Error::failed(format!("failed to spawn playback thread: {}", err)))?
        };

        // Startup rendezvous: nothing is usable until the loop is running.
        let playbin = ready_rx
            .recv()
            .map_err(|_| Error::failed("playback thread exited during startup"))??;

        Ok(Player {
            playbin,
            shared,
            bus,
            tx,
            visualizations: Mutex::new(VisualizationRegistry::new()),
            worker: Some(worker),
        })
    }

    fn send(&self, cmd: impl FnOnce(&mut PlayerInner) + Send + 'static) {
        let _ = self.tx.send(LoopItem::Command(Box::new(cmd)));
    }

    /// The queue playback messages are delivered on. Drain it regularly;
    /// it grows without bound otherwise.
    pub fn message_bus(&self) -> MessageBus {
        self.bus.clone()
    }

    /// The underlying pipeline, for callers that need direct access.
    pub fn pipeline(&self) -> gst::Pipeline {
        self.playbin.clone()
    }

    // Playback control

    pub fn set_uri(&self, uri: &url::Url) {
        let uri = uri.clone();
        self.send(move |inner| inner.set_uri(uri));
    }

    pub fn uri(&self) -> Option<url::Url> {
        self.shared.lock().uri.clone()
    }

    pub fn set_subtitle_uri(&self, uri: &url::Url) {
        let uri = uri.clone();
        self.send(move |inner| inner.set_suburi(uri));
    }

    pub fn subtitle_uri(&self) -> Option<url::Url> {
        self.shared.lock().suburi.clone()
    }

    pub fn play(&self) {
        self.send(|inner| inner.play());
    }

    pub fn pause(&self) {
        self.send(|inner| inner.pause());
    }

    pub fn stop(&self) {
        self.send(|inner| inner.stop(false));
    }

    /// Seek to an absolute position.
    ///
    /// Rapid requests are coalesced: at most one pipeline seek is issued
    /// per debounce window, always targeting the latest requested position.
    pub fn seek(&self, position: gst::ClockTime) {
        self.send(move |inner| inner.request_seek(position));
    }

    /// Change the playback rate. Negative rates play in reverse. A rate of
    /// zero is not a valid rate; use [`pause`](Self::pause) instead.
    pub fn set_rate(&self, rate: f64) {
        self.send(move |inner| inner.set_rate(rate));
    }

    pub fn rate(&self) -> f64 {
        self.shared.lock().rate
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.lock().app_state
    }

    // Pipeline queries can block (flushing seek, stalled source), so they
    // run before the shared lock is taken; the worker holds that lock in
    // nearly every handler.

    pub fn position(&self) -> Option<gst::ClockTime> {
        let queried = self.playbin.query_position::<gst::ClockTime>();
        let mut shared = self.shared.lock();
        if let Some(position) = queried {
            shared.cached_position = Some(position);
        }
        shared.cached_position
    }

    pub fn duration(&self) -> Option<gst::ClockTime> {
        if let Some(duration) = self.shared.lock().cached_duration {
            return Some(duration);
        }
        let queried = self.playbin.query_duration::<gst::ClockTime>();
        if let Some(duration) = queried {
            self.shared.lock().cached_duration = Some(duration);
        }
        queried
    }

    // Volume and mute are plain properties, safe to touch from any thread.

    pub fn volume(&self) -> f64 {
        self.playbin.property::<f64>("volume")
    }

    pub fn set_volume(&self, volume: f64) {
        self.playbin.set_property("volume", volume);
    }

    pub fn is_muted(&self) -> bool {
        self.playbin.property::<bool>("mute")
    }

    pub fn set_muted(&self, muted: bool) {
        self.playbin.set_property("mute", muted);
    }

    // Media info and tracks

    /// A copy of the current media-info snapshot, if one has been built.
    pub fn media_info(&self) -> Option<MediaInfo> {
        self.shared.lock().media_info.clone()
    }

    pub fn current_video_track(&self) -> Option<StreamInfo> {
        self.current_track(StreamKind::Video, PlaybinFlags::VIDEO, "current-video")
    }

    pub fn current_audio_track(&self) -> Option<StreamInfo> {
        self.current_track(StreamKind::Audio, PlaybinFlags::AUDIO, "current-audio")
    }

    pub fn current_subtitle_track(&self) -> Option<StreamInfo> {
        self.current_track(StreamKind::Subtitle, PlaybinFlags::TEXT, "current-text")
    }

    fn current_track(
        &self,
        kind: StreamKind,
        flag: PlaybinFlags,
        current_property: &str,
    ) -> Option<StreamInfo> {
        if !self.playbin.property::<PlaybinFlags>("flags").contains(flag) {
            return None;
        }
        let shared = self.shared.lock();
        let info = shared.media_info.as_ref()?;
        let selected = match kind {
            StreamKind::Video => &shared.selected_video_sid,
            StreamKind::Audio => &shared.selected_audio_sid,
            StreamKind::Subtitle => &shared.selected_text_sid,
        };
        if let Some(sid) = selected {
            info.streams
                .iter()
                .find(|s| s.stream_id.as_deref() == Some(sid.as_str()))
                .cloned()
        } else {
            let index = self.playbin.property::<i32>(current_property);
            if index < 0 {
                None
            } else {
                info.stream(kind, index).cloned()
            }
        }
    }

    pub fn set_video_track(&self, index: i32) -> Result<(), Error> {
        self.select_track(StreamKind::Video, index)
    }

    pub fn set_audio_track(&self, index: i32) -> Result<(), Error> {
        self.select_track(StreamKind::Audio, index)
    }

    pub fn set_subtitle_track(&self, index: i32) -> Result<(), Error> {
        self.select_track(StreamKind::Subtitle, index)
    }

    fn select_track(&self, kind: StreamKind, index: i32) -> Result<(), Error> {
        let known = {
            let shared = self.shared.lock();
            shared
                .media_info
                .as_ref()
                .is_some_and(|info| info.stream(kind, index).is_some())
        };
        if !known {
            return Err(Error::failed(format!(
                "no {} track with index {}",
                kind_name(kind),
                index
            )));
        }
        self.send(move |inner| inner.select_track(kind, index));
        Ok(())
    }

    pub fn set_video_track_enabled(&self, enabled: bool) {
        self.send(move |inner| inner.set_flag(PlaybinFlags::VIDEO, enabled));
    }

    pub fn set_audio_track_enabled(&self, enabled: bool) {
        self.send(move |inner| inner.set_flag(PlaybinFlags::AUDIO, enabled));
    }

    pub fn set_subtitle_track_enabled(&self, enabled: bool) {
        self.send(move |inner| inner.set_flag(PlaybinFlags::TEXT, enabled));
    }

    // Visualization

    /// The audio visualizations available in the installed plugin set.
    pub fn visualizations(&self) -> Vec<Visualization> {
        self.visualizations.lock().entries().to_vec()
    }

    /// Select a visualization by factory name, or `None` to clear it.
    pub fn set_visualization(&self, name: Option<&str>) -> Result<(), Error> {
        if let Some(name) = name
            && gst::ElementFactory::find(name).is_none()
        {
            return Err(Error::failed(format!(
                "no visualization factory named {}",
                name
            )));
        }
        let name = name.map(str::to_string);
        self.send(move |inner| inner.set_visualization(name));
        Ok(())
    }

    pub fn visualization(&self) -> Option<String> {
        self.shared.lock().visualization.clone()
    }

    pub fn set_visualization_enabled(&self, enabled: bool) {
        self.send(move |inner| inner.set_flag(PlaybinFlags::VIS, enabled));
    }

    // Color balance

    pub fn has_color_balance(&self) -> bool {
        self.playbin
            .dynamic_cast_ref::<gst_video::ColorBalance>()
            .is_some()
    }

    /// Set a color balance channel to a value normalized to `[0, 1]`.
    pub fn set_color_balance(&self, channel: BalanceChannel, value: f64) -> Result<(), Error> {
        let balance = self
            .playbin
            .dynamic_cast_ref::<gst_video::ColorBalance>()
            .ok_or_else(|| Error::failed("pipeline exposes no color balance interface"))?;
        let value = value.clamp(0.0, 1.0);
        for ch in balance.list_channels() {
            if ch.label() == channel.label() {
                let min = ch.min_value() as f64;
                let max = ch.max_value() as f64;
                balance.set_value(&ch, (value * (max - min) + min).round() as i32);
                return Ok(());
            }
        }
        Err(Error::failed(format!(
            "color balance channel {} not available",
            channel.label()
        )))
    }

    /// The current value of a color balance channel, normalized to `[0, 1]`.
    pub fn color_balance(&self, channel: BalanceChannel) -> Option<f64> {
        let balance = self.playbin.dynamic_cast_ref::<gst_video::ColorBalance>()?;
        for ch in balance.list_channels() {
            if ch.label() == channel.label() {
                let min = ch.min_value() as f64;
                let max = ch.max_value() as f64;
                if max <= min {
                    return None;
                }
                return Some((balance.value(&ch) as f64 - min) / (max - min));
            }
        }
        None
    }

    // Multiview

    pub fn multiview_mode(&self) -> gst_video::VideoMultiviewFramePacking {
        self.playbin
            .property::<gst_video::VideoMultiviewFramePacking>("video-multiview-mode")
    }

    pub fn set_multiview_mode(&self, mode: gst_video::VideoMultiviewFramePacking) {
        self.playbin.set_property("video-multiview-mode", mode);
    }

    pub fn multiview_flags(&self) -> gst_video::VideoMultiviewFlags {
        self.playbin
            .property::<gst_video::VideoMultiviewFlags>("video-multiview-flags")
    }

    pub fn set_multiview_flags(&self, flags: gst_video::VideoMultiviewFlags) {
        self.playbin.set_property("video-multiview-flags", flags);
    }

    // Offsets, signed nanoseconds

    pub fn audio_video_offset(&self) -> i64 {
        self.playbin.property::<i64>("av-offset")
    }

    pub fn set_audio_video_offset(&self, offset: i64) {
        self.playbin.set_property("av-offset", offset);
    }

    pub fn subtitle_video_offset(&self) -> i64 {
        self.playbin.property::<i64>("text-offset")
    }

    pub fn set_subtitle_video_offset(&self, offset: i64) {
        self.playbin.set_property("text-offset", offset);
    }

    // Snapshot

    /// Convert the currently displayed video frame. Fails when no video
    /// frame is available, for example before preroll or on audio-only
    /// media.
    pub fn snapshot(&self, format: SnapshotFormat, spec: SnapshotSpec) -> Result<gst::Sample, Error> {
        let caps = snapshot::snapshot_caps(format, spec);
        self.playbin
            .emit_by_name::<Option<gst::Sample>>("convert-sample", &[&caps])
            .ok_or_else(|| Error::failed("failed to convert the current video frame"))
    }

    // Configuration

    pub fn config(&self) -> PlayerConfig {
        self.shared.lock().config.clone()
    }

    /// Replace the configuration. Rejected unless playback is stopped.
    pub fn set_config(&self, config: PlayerConfig) -> Result<(), Error> {
        config.validate()?;
        let mut shared = self.shared.lock();
        if shared.app_state != PlaybackState::Stopped {
            return Err(Error::failed(
                "configuration can only be changed while stopped",
            ));
        }
        shared.config = config;
        Ok(())
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.bus.set_flushing(true);
        let _ = self.tx.send(LoopItem::Quit);
        if let Some(worker) = self.worker.take() {
            if thread::current().id() == worker.thread().id() {
                // Dropping on the playback thread itself: joining would
                // deadlock, let the thread unwind on its own.
                log::warn!("player dropped on its own playback thread, detaching");
            } else {
                let _ = worker.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::PlayMessage;
    use std::time::Duration;

    // Pipeline-backed tests need the playback plugins; skip quietly where
    // they are not installed.
    fn make_player() -> Option<Player> {
        gst::init().ok()?;
        gst::ElementFactory::find("playbin")?;
        Player::new(None).ok()
    }

    #[test]
    fn fresh_player_is_stopped_and_empty() {
        let Some(player) = make_player() else {
            return;
        };
        assert_eq!(player.state(), PlaybackState::Stopped);
        assert!(player.uri().is_none());
        assert!(player.media_info().is_none());
        assert_eq!(player.rate(), 1.0);
    }

    #[test]
    fn position_and_duration_are_none_before_preroll() {
        let Some(player) = make_player() else {
            return;
        };
        assert!(player.position().is_none());
        assert!(player.duration().is_none());
    }

    #[test]
    fn config_round_trips_while_stopped() {
        let Some(player) = make_player() else {
            return;
        };
        let mut config = player.config();
        config.user_agent = Some("test-agent/1.0".into());
        config.position_update_interval_ms = 500;
        config.accurate_seek = true;
        player.set_config(config.clone()).unwrap();
        assert_eq!(player.config(), config);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let Some(player) = make_player() else {
            return;
        };
        let before = player.config();
        let mut config = before.clone();
        config.position_update_interval_ms = 60_000;
        assert!(player.set_config(config).is_err());
        assert_eq!(player.config(), before);
    }

    #[test]
    fn stop_while_stopped_is_silent() {
        let Some(player) = make_player() else {
            return;
        };
        let bus = player.message_bus();
        player.stop();
        assert!(bus.wait_timeout(Duration::from_millis(200)).is_none());
    }

    #[test]
    fn track_selection_without_media_fails() {
        let Some(player) = make_player() else {
            return;
        };
        assert!(player.set_audio_track(0).is_err());
        assert!(player.set_subtitle_track(3).is_err());
    }

    #[test]
    fn uri_load_posts_uri_loaded() {
        let Some(player) = make_player() else {
            return;
        };
        let bus = player.message_bus();
        let uri = url::Url::parse("file:///nonexistent/media.mkv").unwrap();
        player.set_uri(&uri);
        match bus.wait_timeout(Duration::from_secs(5)) {
            Some(PlayMessage::UriLoaded { uri: loaded }) => assert_eq!(loaded, uri),
            other => panic!("expected UriLoaded, got {:?}", other),
        }
        assert_eq!(player.uri(), Some(uri));
    }
}
