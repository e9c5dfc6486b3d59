use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::time::Instant;

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_video as gst_video;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::config::PlayerConfig;
use crate::error::Error;
use crate::flags::PlaybinFlags;
use crate::media_info::{self, MediaInfo, StreamDetails, StreamInfo, StreamKind};
use crate::message::{MessageBus, PlayMessage};
use crate::reconcile::{self, BufferingAction, PausedSettled, SeekCompletion};
use crate::renderer::VideoRenderer;
use crate::seek::{self, SeekSchedule};
use crate::state::PlaybackState;

// Commands are closures applied to the worker's state on the loop thread
pub(crate) type Cmd = Box<dyn FnOnce(&mut PlayerInner) + Send + 'static>;

pub(crate) enum LoopItem {
    Command(Cmd),
    Bus(gst::Message),
    Quit,
}

static USE_PLAYBIN3: Lazy<bool> = Lazy::new(|| {
    std::env::var("PLAYHEAD_USE_PLAYBIN3").is_ok_and(|v| v.starts_with('1'))
});

/// State readable from application threads. Everything else lives inside
/// the worker and is only observable through posted messages.
pub(crate) struct Shared {
    pub(crate) uri: Option<url::Url>,
    pub(crate) suburi: Option<url::Url>,
    pub(crate) redirect_uri: Option<String>,
    pub(crate) app_state: PlaybackState,
    pub(crate) cached_position: Option<gst::ClockTime>,
    pub(crate) cached_duration: Option<gst::ClockTime>,
    pub(crate) rate: f64,
    pub(crate) media_info: Option<MediaInfo>,
    pub(crate) visualization: Option<String>,
    // Stream ids chosen by the pipeline, stream-collection mode only
    pub(crate) selected_video_sid: Option<String>,
    pub(crate) selected_audio_sid: Option<String>,
    pub(crate) selected_text_sid: Option<String>,
    pub(crate) config: PlayerConfig,
}

impl Shared {
    pub(crate) fn new(config: PlayerConfig) -> Self {
        Shared {
            uri: None,
            suburi: None,
            redirect_uri: None,
            app_state: PlaybackState::Stopped,
            cached_position: None,
            cached_duration: None,
            rate: 1.0,
            media_info: None,
            visualization: None,
            selected_video_sid: None,
            selected_audio_sid: None,
            selected_text_sid: None,
            config,
        }
    }
}

/// Worker-owned playback state. Lives on the loop thread only.
pub(crate) struct PlayerInner {
    playbin: gst::Pipeline,
    use_playbin3: bool,
    shared: Arc<Mutex<Shared>>,
    bus: MessageBus,
    tx: Sender<LoopItem>,

    target_state: gst::State,
    current_state: gst::State,
    buffering_percent: i32,
    is_live: bool,
    is_eos: bool,

    // Global tags seen before the first media-info snapshot exists
    global_tags: Option<gst::TagList>,
    collection: Option<gst::StreamCollection>,
    stream_notify_handler: Option<(gst::StreamCollection, gst::glib::SignalHandlerId)>,
    watched_sink_pad: Option<gst::Pad>,

    seek_pending: bool,
    queued_seek: Option<gst::ClockTime>,
    last_seek_position: Option<gst::ClockTime>,
    last_seek_dispatch: Option<Instant>,

    seek_deadline: Option<Instant>,
    tick_deadline: Option<Instant>,
    ready_deadline: Option<Instant>,

    last_dimensions: Option<(u32, u32)>,
}

/// Build the playbin element and wire the renderer-provided sink into it.
fn build_playbin(renderer: Option<&dyn VideoRenderer>) -> Result<gst::Pipeline, Error> {
    let name = if *USE_PLAYBIN3 { "playbin3" } else { "playbin" };
    let element = gst::ElementFactory::make(name)
        .name("playhead-playbin")
        .build()
        .map_err(|err| Error::failed(format!("failed to create {}: {}", name, err)))?;
    let playbin = element
        .downcast::<gst::Pipeline>()
        .map_err(|_| Error::failed("playbin element is not a pipeline"))?;

    // Keep audio pitch stable during trick-mode playback
    match gst::ElementFactory::make("scaletempo").build() {
        Ok(scaletempo) => playbin.set_property("audio-filter", &scaletempo),
        Err(_) => log::warn!("scaletempo element missing, audio pitch will shift with rate changes"),
    }

    if let Some(renderer) = renderer
        && let Some(sink) = renderer.create_video_sink(&playbin)
    {
        playbin.set_property("video-sink", &sink);
    }

    Ok(playbin)
}

/// Entry point of the worker thread. Signals readiness (or the construction
/// failure) through `ready_tx`, then serves commands and bus messages until
/// a `Quit` arrives or all senders are gone.
pub(crate) fn run_loop(
    shared: Arc<Mutex<Shared>>,
    bus: MessageBus,
    tx: Sender<LoopItem>,
    rx: Receiver<LoopItem>,
    ready_tx: Sender<Result<gst::Pipeline, Error>>,
    renderer: Option<Box<dyn VideoRenderer>>,
) {
    let playbin = match build_playbin(renderer.as_deref()) {
        Ok(playbin) => playbin,
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    };

    let mut inner = PlayerInner::new(playbin.clone(), shared, bus, tx);
    inner.connect_signals();

    if ready_tx.send(Ok(playbin)).is_err() {
        inner.teardown();
        return;
    }

    loop {
        let item = match inner.next_deadline() {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(timeout) {
                    Ok(item) => Some(item),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match rx.recv() {
                Ok(item) => Some(item),
                Err(_) => break,
            },
        };

        match item {
            Some(LoopItem::Command(cmd)) => cmd(&mut inner),
            Some(LoopItem::Bus(message)) => inner.handle_bus_message(&message),
            Some(LoopItem::Quit) => break,
            None => inner.fire_due_timers(),
        }
    }

    inner.teardown();
}

impl PlayerInner {
    fn new(
        playbin: gst::Pipeline,
        shared: Arc<Mutex<Shared>>,
        bus: MessageBus,
        tx: Sender<LoopItem>,
    ) -> Self {
        PlayerInner {
            playbin,
            use_playbin3: *USE_PLAYBIN3,
            shared,
            bus,
            tx,
            target_state: gst::State::Null,
            current_state: gst::State::Null,
            buffering_percent: 100,
            is_live: false,
            is_eos: false,
            global_tags: None,
            collection: None,
            stream_notify_handler: None,
            watched_sink_pad: None,
            seek_pending: false,
            queued_seek: None,
            last_seek_position: None,
            last_seek_dispatch: None,
            seek_deadline: None,
            tick_deadline: None,
            ready_deadline: None,
            last_dimensions: None,
        }
    }

    fn connect_signals(&self) {
        let gst_bus = self.playbin.bus().expect("pipeline without a bus");
        let tx = self.tx.clone();
        gst_bus.set_sync_handler(move |_, message| {
            let _ = tx.send(LoopItem::Bus(message.clone()));
            gst::BusSyncReply::Drop
        });

        let bus = self.bus.clone();
        self.playbin.connect_notify(Some("volume"), move |playbin, _| {
            let volume = playbin.property::<f64>("volume");
            bus.post(PlayMessage::VolumeChanged { volume });
        });
        let bus = self.bus.clone();
        self.playbin.connect_notify(Some("mute"), move |playbin, _| {
            let muted = playbin.property::<bool>("mute");
            bus.post(PlayMessage::MuteChanged { muted });
        });

        let shared = self.shared.clone();
        self.playbin.connect("source-setup", false, move |values| {
            if let Ok(source) = values[1].get::<gst::Element>() {
                let user_agent = shared.lock().config.user_agent.clone();
                if let Some(agent) = user_agent
                    && source.find_property("user-agent").is_some()
                {
                    log::debug!("setting source user agent to {}", agent);
                    source.set_property("user-agent", &agent);
                }
            }
            None
        });

        if !self.use_playbin3 {
            for signal in ["video-changed", "audio-changed", "text-changed"] {
                let tx = self.tx.clone();
                self.playbin.connect(signal, false, move |_| {
                    let _ = tx.send(LoopItem::Command(Box::new(|inner| {
                        inner.on_legacy_streams_changed();
                    })));
                    None
                });
            }
            for (signal, kind) in [
                ("video-tags-changed", StreamKind::Video),
                ("audio-tags-changed", StreamKind::Audio),
                ("text-tags-changed", StreamKind::Subtitle),
            ] {
                let tx = self.tx.clone();
                self.playbin.connect(signal, false, move |values| {
                    if let Ok(index) = values[1].get::<i32>() {
                        let _ = tx.send(LoopItem::Command(Box::new(move |inner| {
                            inner.on_legacy_tags_changed(kind, index);
                        })));
                    }
                    None
                });
            }
        }
    }

    fn teardown(&mut self) {
        if let Some(gst_bus) = self.playbin.bus() {
            gst_bus.unset_sync_handler();
            gst_bus.set_flushing(true);
        }
        let _ = self.playbin.set_state(gst::State::Null);
    }

    fn next_deadline(&self) -> Option<Instant> {
        [self.tick_deadline, self.seek_deadline, self.ready_deadline]
            .into_iter()
            .flatten()
            .min()
    }

    fn fire_due_timers(&mut self) {
        let now = Instant::now();
        if let Some(deadline) = self.seek_deadline
            && now >= deadline
        {
            self.seek_deadline = None;
            self.dispatch_seek();
        }
        if let Some(deadline) = self.tick_deadline
            && now >= deadline
        {
            self.tick_deadline = None;
            self.emit_position_tick();
            self.arm_tick();
        }
        if let Some(deadline) = self.ready_deadline
            && now >= deadline
        {
            self.ready_deadline = None;
            self.on_ready_timeout();
        }
    }

    fn set_app_state(&mut self, state: PlaybackState) {
        let changed = {
            let mut shared = self.shared.lock();
            if shared.app_state != state {
                log::debug!("state changed: {} -> {}", shared.app_state, state);
                shared.app_state = state;
                true
            } else {
                false
            }
        };
        if changed {
            self.bus.post(PlayMessage::StateChanged { state });
        }
    }

    fn playbin_flags(&self) -> PlaybinFlags {
        self.playbin.property::<PlaybinFlags>("flags")
    }

    // Timers

    fn arm_tick(&mut self) {
        if self.tick_deadline.is_some()
            || self.seek_pending
            || self.queued_seek.is_some()
            || self.seek_deadline.is_some()
        {
            return;
        }
        if self.target_state < gst::State::Playing {
            return;
        }
        if let Some(interval) = self.shared.lock().config.tick_interval() {
            self.tick_deadline = Some(Instant::now() + interval);
        }
    }

    fn remove_tick(&mut self) {
        self.tick_deadline = None;
    }

    fn arm_ready_timeout(&mut self) {
        let timeout = self.shared.lock().config.ready_timeout;
        self.ready_deadline = Some(Instant::now() + timeout);
    }

    fn on_ready_timeout(&mut self) {
        log::debug!("idle timeout expired, releasing pipeline resources");
        let _ = self.playbin.set_state(gst::State::Null);
        self.current_state = gst::State::Null;
        self.target_state = gst::State::Null;
    }

    fn emit_position_tick(&mut self) {
        let Some(position) = self.playbin.query_position::<gst::ClockTime>() else {
            return;
        };
        let changed = {
            let mut shared = self.shared.lock();
            if shared.cached_position != Some(position) {
                shared.cached_position = Some(position);
                true
            } else {
                false
            }
        };
        if changed {
            self.bus.post(PlayMessage::PositionUpdated { position });
        }
    }

    // Commands

    pub(crate) fn set_uri(&mut self, uri: url::Url) {
        log::debug!("loading {}", uri);
        self.stop(false);
        {
            let mut shared = self.shared.lock();
            shared.uri = Some(uri.clone());
            shared.suburi = None;
            shared.redirect_uri = None;
        }
        self.playbin.set_property("uri", uri.as_str());
        self.playbin.set_property("suburi", None::<&str>);
        self.bus.post(PlayMessage::UriLoaded { uri });
    }

    pub(crate) fn set_suburi(&mut self, suburi: url::Url) {
        let target = self.target_state;
        let position = self.playbin.query_position::<gst::ClockTime>();

        self.stop(true);
        self.shared.lock().suburi = Some(suburi.clone());
        self.playbin.set_property("suburi", suburi.as_str());

        if let Some(position) = position {
            self.queued_seek = Some(position);
            self.shared.lock().cached_position = Some(position);
        }
        if target >= gst::State::Playing {
            self.play();
        } else if target >= gst::State::Paused {
            self.pause();
        }
    }

    pub(crate) fn play(&mut self) {
        if self.shared.lock().uri.is_none() {
            log::warn!("play requested without a uri");
            return;
        }
        self.ready_deadline = None;
        self.target_state = gst::State::Playing;
        // Preroll through paused first; the reconciler requests playing
        // once buffers and seeks have settled.
        let desired = if self.current_state < gst::State::Paused {
            gst::State::Paused
        } else {
            gst::State::Playing
        };
        match self.playbin.set_state(desired) {
            Err(_) => {
                self.on_error(Error::failed("failed to start playback"));
                return;
            }
            Ok(gst::StateChangeSuccess::NoPreroll) => self.mark_live(),
            Ok(_) => {}
        }
        if self.is_eos {
            self.resume_from_eos();
        }
    }

    pub(crate) fn pause(&mut self) {
        if self.shared.lock().uri.is_none() {
            log::warn!("pause requested without a uri");
            return;
        }
        self.ready_deadline = None;
        self.target_state = gst::State::Paused;
        match self.playbin.set_state(gst::State::Paused) {
            Err(_) => {
                self.on_error(Error::failed("failed to pause playback"));
                return;
            }
            Ok(gst::StateChangeSuccess::NoPreroll) => self.mark_live(),
            Ok(_) => {}
        }
        if self.is_eos {
            self.resume_from_eos();
        }
    }

    fn mark_live(&mut self) {
        self.is_live = true;
        let mut shared = self.shared.lock();
        if let Some(info) = shared.media_info.as_mut() {
            info.is_live = true;
        }
    }

    fn resume_from_eos(&mut self) {
        if self
            .playbin
            .seek_simple(gst::SeekFlags::FLUSH, gst::ClockTime::ZERO)
            .is_ok()
        {
            self.is_eos = false;
            self.shared.lock().cached_position = Some(gst::ClockTime::ZERO);
        } else {
            log::warn!("failed to rewind after end of stream, restarting pipeline");
            let target = self.target_state;
            self.stop(true);
            if target >= gst::State::Playing {
                self.play();
            } else {
                self.pause();
            }
        }
    }

    pub(crate) fn stop(&mut self, transient: bool) {
        let app_state = self.shared.lock().app_state;
        if !transient
            && app_state == PlaybackState::Stopped
            && self.current_state <= gst::State::Ready
        {
            return;
        }

        self.remove_tick();
        self.cancel_seek();
        self.target_state = gst::State::Ready;
        self.is_live = false;
        self.is_eos = false;
        self.last_dimensions = None;
        self.disconnect_stream_notify();
        self.collection = None;
        self.watched_sink_pad = None;
        self.global_tags = None;
        self.buffering_percent = 100;

        // Flush so the downward transition does not feed stale messages
        // back into the reconciler.
        if let Some(gst_bus) = self.playbin.bus() {
            gst_bus.set_flushing(true);
            let _ = self.playbin.set_state(gst::State::Ready);
            gst_bus.set_flushing(false);
        }
        self.current_state = gst::State::Ready;

        {
            let mut shared = self.shared.lock();
            shared.cached_position = None;
            shared.cached_duration = None;
            shared.media_info = None;
            shared.rate = 1.0;
            shared.selected_video_sid = None;
            shared.selected_audio_sid = None;
            shared.selected_text_sid = None;
        }

        self.set_app_state(if transient && app_state != PlaybackState::Stopped {
            PlaybackState::Buffering
        } else {
            PlaybackState::Stopped
        });
        self.arm_ready_timeout();
    }

    fn cancel_seek(&mut self) {
        self.seek_pending = false;
        self.queued_seek = None;
        self.last_seek_position = None;
        self.last_seek_dispatch = None;
        self.seek_deadline = None;
    }

    pub(crate) fn request_seek(&mut self, position: gst::ClockTime) {
        self.remove_tick();
        self.shared.lock().cached_position = Some(position);
        self.queued_seek = Some(position);

        // An in-flight seek picks the new position up on completion, a
        // scheduled dispatch reads it when it fires.
        if self.seek_pending || self.seek_deadline.is_some() {
            return;
        }
        let now = Instant::now();
        let window = self.shared.lock().config.seek_debounce;
        self.seek_deadline = Some(match seek::schedule_seek(self.last_seek_dispatch, now, window) {
            SeekSchedule::Immediate => now,
            SeekSchedule::Delayed(delay) => now + delay,
        });
    }

    fn dispatch_seek(&mut self) {
        let Some(position) = self.queued_seek else {
            return;
        };
        if self.current_state != gst::State::Paused {
            // The paused-settled handler re-dispatches once we get there.
            if self.playbin.set_state(gst::State::Paused).is_err() {
                self.on_error(Error::failed("failed to pause for seeking"));
            }
            return;
        }

        self.queued_seek = None;
        self.seek_pending = true;
        self.last_seek_position = Some(position);
        self.last_seek_dispatch = Some(Instant::now());
        self.remove_tick();

        let (rate, accurate) = {
            let shared = self.shared.lock();
            (shared.rate, shared.config.accurate_seek)
        };
        let flags = seek::seek_flags(accurate, rate);
        log::debug!("seeking to {} at rate {} with {:?}", position, rate, flags);
        let event = if rate >= 0.0 {
            gst::event::Seek::new(
                rate,
                flags,
                gst::SeekType::Set,
                Some(position),
                gst::SeekType::None,
                gst::ClockTime::NONE,
            )
        } else {
            gst::event::Seek::new(
                rate,
                flags,
                gst::SeekType::Set,
                Some(gst::ClockTime::ZERO),
                gst::SeekType::Set,
                Some(position),
            )
        };
        if !self.playbin.send_event(event) {
            self.seek_pending = false;
            self.on_error(Error::failed(format!("failed to seek to {}", position)));
        }
    }

    fn finish_seek(&mut self) {
        let position = self
            .playbin
            .query_position::<gst::ClockTime>()
            .or(self.last_seek_position)
            .unwrap_or(gst::ClockTime::ZERO);
        self.shared.lock().cached_position = Some(position);
        self.bus.post(PlayMessage::SeekDone { position });
    }

    /// Rate changes ride the seek path so that rate and position are always
    /// applied in one pipeline operation.
    pub(crate) fn set_rate(&mut self, rate: f64) {
        if rate == 0.0 {
            log::warn!("ignoring request for rate 0.0, use pause instead");
            return;
        }
        self.shared.lock().rate = rate;
        let position = self
            .playbin
            .query_position::<gst::ClockTime>()
            .or_else(|| self.shared.lock().cached_position);
        if let Some(position) = position {
            self.request_seek(position);
        }
    }

    // Track and flag handling

    pub(crate) fn set_flag(&mut self, flag: PlaybinFlags, enabled: bool) {
        let mut flags = self.playbin_flags();
        if enabled {
            flags.insert(flag);
        } else {
            flags.remove(flag);
        }
        self.playbin.set_property("flags", flags);
        if self.use_playbin3
            && flag.intersects(PlaybinFlags::VIDEO | PlaybinFlags::AUDIO | PlaybinFlags::TEXT)
        {
            self.send_stream_selection();
        }
    }

    pub(crate) fn select_track(&mut self, kind: StreamKind, index: i32) {
        if !self.use_playbin3 {
            let property = match kind {
                StreamKind::Video => "current-video",
                StreamKind::Audio => "current-audio",
                StreamKind::Subtitle => "current-text",
            };
            self.playbin.set_property(property, index);
            return;
        }

        let Some(collection) = self.collection.clone() else {
            log::warn!("cannot select a track before the stream collection is known");
            return;
        };
        let wanted = match kind {
            StreamKind::Video => gst::StreamType::VIDEO,
            StreamKind::Audio => gst::StreamType::AUDIO,
            StreamKind::Subtitle => gst::StreamType::TEXT,
        };
        let mut seen = 0;
        let mut selected = None;
        for i in 0..collection.len() {
            if let Some(stream) = collection.stream(i as u32)
                && stream.stream_type().contains(wanted)
            {
                if seen == index {
                    selected = stream.stream_id().map(|s| s.to_string());
                    break;
                }
                seen += 1;
            }
        }
        let Some(sid) = selected else {
            log::warn!("no {:?} stream with index {}", kind, index);
            return;
        };
        {
            let mut shared = self.shared.lock();
            match kind {
                StreamKind::Video => shared.selected_video_sid = Some(sid),
                StreamKind::Audio => shared.selected_audio_sid = Some(sid),
                StreamKind::Subtitle => shared.selected_text_sid = Some(sid),
            }
        }
        self.send_stream_selection();
    }

    fn send_stream_selection(&mut self) {
        let Some(collection) = self.collection.clone() else {
            return;
        };
        let flags = self.playbin_flags();
        let (video_sid, audio_sid, text_sid) = {
            let shared = self.shared.lock();
            (
                shared.selected_video_sid.clone(),
                shared.selected_audio_sid.clone(),
                shared.selected_text_sid.clone(),
            )
        };
        let mut ids: Vec<String> = Vec::new();
        for (enabled, selected, wanted) in [
            (
                flags.contains(PlaybinFlags::VIDEO),
                video_sid,
                gst::StreamType::VIDEO,
            ),
            (
                flags.contains(PlaybinFlags::AUDIO),
                audio_sid,
                gst::StreamType::AUDIO,
            ),
            (
                flags.contains(PlaybinFlags::TEXT),
                text_sid,
                gst::StreamType::TEXT,
            ),
        ] {
            if !enabled {
                continue;
            }
            if let Some(sid) = selected {
                ids.push(sid);
                continue;
            }
            for i in 0..collection.len() {
                if let Some(stream) = collection.stream(i as u32)
                    && stream.stream_type().contains(wanted)
                {
                    if let Some(sid) = stream.stream_id() {
                        ids.push(sid.to_string());
                    }
                    break;
                }
            }
        }
        if ids.is_empty() {
            return;
        }
        let event = gst::event::SelectStreams::new(ids.iter().map(|s| s.as_str()));
        if !self.playbin.send_event(event) {
            log::warn!("failed to send stream selection event");
        }
    }

    pub(crate) fn set_visualization(&mut self, name: Option<String>) {
        match name {
            Some(name) => match gst::ElementFactory::make(&name).build() {
                Ok(vis) => {
                    self.playbin.set_property("vis-plugin", &vis);
                    self.shared.lock().visualization = Some(name);
                }
                Err(err) => {
                    self.bus.post(PlayMessage::Warning {
                        warning: Error::failed(format!(
                            "failed to create visualization {}: {}",
                            name, err
                        )),
                    });
                }
            },
            None => {
                self.playbin.set_property("vis-plugin", None::<&gst::Element>);
                self.shared.lock().visualization = None;
            }
        }
    }

    // Engine bridge

    fn handle_bus_message(&mut self, message: &gst::Message) {
        use gst::MessageView;

        match message.view() {
            MessageView::Error(err) => {
                let source = message
                    .src()
                    .map(|s| s.path_string().to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let text = match err.debug() {
                    Some(debug) => {
                        format!("Error from element {}: {} ({})", source, err.error(), debug)
                    }
                    None => format!("Error from element {}: {}", source, err.error()),
                };
                let details = err.structure().map(|s| s.to_owned());
                self.on_error(Error::with_details(text, details));
            }
            MessageView::Warning(warn) => {
                let source = message
                    .src()
                    .map(|s| s.path_string().to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                let text = match warn.debug() {
                    Some(debug) => {
                        format!("Warning from element {}: {} ({})", source, warn.error(), debug)
                    }
                    None => format!("Warning from element {}: {}", source, warn.error()),
                };
                log::warn!("{}", text);
                let details = warn.structure().map(|s| s.to_owned());
                self.bus.post(PlayMessage::Warning {
                    warning: Error::with_details(text, details),
                });
            }
            MessageView::Eos(_) => self.on_eos(),
            MessageView::StateChanged(change) => {
                if message.src() == Some(self.playbin.upcast_ref()) {
                    self.on_state_changed(change.old(), change.current(), change.pending());
                }
            }
            MessageView::Buffering(buffering) => self.on_buffering(buffering.percent()),
            MessageView::ClockLost(_) => self.on_clock_lost(),
            MessageView::DurationChanged(_) => self.update_duration(),
            MessageView::Latency(_) => {
                log::debug!("latency changed, recalculating");
                let _ = self.playbin.recalculate_latency();
            }
            MessageView::RequestState(request) => {
                let requested = request.requested_state();
                log::debug!("pipeline requested state {:?}", requested);
                self.target_state = requested;
                if self.playbin.set_state(requested).is_err() {
                    self.on_error(Error::failed(format!(
                        "failed to honor requested state {:?}",
                        requested
                    )));
                }
            }
            MessageView::Element(_) => {
                if let Some(structure) = message.structure()
                    && structure.name() == "redirect"
                    && let Ok(location) = structure.get::<&str>("new-location")
                {
                    let location = location.to_string();
                    self.on_redirect(&location);
                }
            }
            MessageView::Tag(tag) => self.on_global_tags(tag.tags()),
            MessageView::StreamCollection(msg) => {
                let collection = msg.stream_collection();
                self.on_stream_collection(collection);
            }
            MessageView::StreamsSelected(msg) => self.on_streams_selected(msg),
            _ => {}
        }
    }

    fn on_error(&mut self, error: Error) {
        log::error!("{}", error);
        self.bus.post(PlayMessage::Error { error });

        self.remove_tick();
        self.cancel_seek();
        if let Some(gst_bus) = self.playbin.bus() {
            gst_bus.set_flushing(true);
            let _ = self.playbin.set_state(gst::State::Null);
            gst_bus.set_flushing(false);
        }
        self.target_state = gst::State::Null;
        self.current_state = gst::State::Null;
        self.buffering_percent = 100;
        self.is_live = false;
        self.is_eos = false;
        self.global_tags = None;
        self.disconnect_stream_notify();
        self.collection = None;
        self.watched_sink_pad = None;
        self.last_dimensions = None;
        {
            let mut shared = self.shared.lock();
            shared.media_info = None;
            shared.cached_position = None;
            shared.cached_duration = None;
            shared.selected_video_sid = None;
            shared.selected_audio_sid = None;
            shared.selected_text_sid = None;
        }
        self.set_app_state(PlaybackState::Stopped);
    }

    fn on_eos(&mut self) {
        log::debug!("end of stream");
        self.emit_position_tick();
        self.remove_tick();
        self.is_eos = true;
        self.buffering_percent = 100;
        self.bus.post(PlayMessage::EndOfStream);
        self.set_app_state(PlaybackState::Stopped);
    }

    fn on_state_changed(&mut self, old: gst::State, new: gst::State, pending: gst::State) {
        log::trace!("pipeline state {:?} -> {:?} (pending {:?})", old, new, pending);
        self.current_state = new;

        if old == gst::State::Ready && new == gst::State::Paused {
            // First preroll after leaving stopped
            if self.shared.lock().media_info.is_none() {
                self.build_media_info();
            }
            self.watch_video_sink();
            self.check_video_dimensions();
            self.update_duration();
        }

        if new == gst::State::Paused && pending == gst::State::VoidPending {
            self.on_paused_settled();
        } else if new == gst::State::Playing
            && pending == gst::State::VoidPending
            && !self.seek_pending
            && self.queued_seek.is_none()
        {
            self.arm_tick();
            self.set_app_state(PlaybackState::Playing);
        } else if new <= gst::State::Ready && old > gst::State::Ready {
            self.set_app_state(PlaybackState::Stopped);
        } else if self.target_state >= gst::State::Paused {
            // Still settling towards the target
            self.set_app_state(PlaybackState::Buffering);
        }
    }

    fn on_paused_settled(&mut self) {
        self.remove_tick();
        let queued = self.queued_seek.is_some();
        match reconcile::on_paused_settled(
            self.seek_pending,
            queued,
            self.target_state,
            self.buffering_percent,
        ) {
            PausedSettled::SeekCompleted => {
                self.seek_pending = false;
                let seekable = {
                    let shared = self.shared.lock();
                    shared.media_info.as_ref().map(|i| i.seekable).unwrap_or(true)
                };
                match reconcile::on_seek_completed(seekable, self.queued_seek.is_some()) {
                    SeekCompletion::DropQueued => {
                        self.queued_seek = None;
                        self.seek_deadline = None;
                        self.settle_paused();
                    }
                    SeekCompletion::DispatchQueued => self.dispatch_seek(),
                    SeekCompletion::Finish => {
                        self.finish_seek();
                        self.settle_paused();
                    }
                }
            }
            PausedSettled::DispatchQueuedSeek => {
                self.seek_deadline = None;
                self.dispatch_seek();
            }
            // Mid-rebuffer pause confirming; the buffering handler reports
            PausedSettled::RemainBuffering => {}
            PausedSettled::ResumePlaying => {
                self.emit_position_tick();
                if self.playbin.set_state(gst::State::Playing).is_err() {
                    self.on_error(Error::failed("failed to continue into playing state"));
                }
            }
            PausedSettled::SettlePaused => {
                self.emit_position_tick();
                self.set_app_state(PlaybackState::Paused);
            }
        }
    }

    fn settle_paused(&mut self) {
        if self.buffering_percent < 100 {
            return;
        }
        if self.target_state >= gst::State::Playing {
            if self.playbin.set_state(gst::State::Playing).is_err() {
                self.on_error(Error::failed("failed to continue into playing state"));
            }
        } else {
            self.set_app_state(PlaybackState::Paused);
        }
    }

    fn on_buffering(&mut self, percent: i32) {
        let seek_active =
            self.seek_pending || self.queued_seek.is_some() || self.seek_deadline.is_some();
        let action = reconcile::buffering_action(
            percent,
            self.is_live,
            self.target_state,
            self.current_state,
            seek_active,
        );
        if action == BufferingAction::Ignore {
            return;
        }
        if percent != self.buffering_percent {
            self.buffering_percent = percent;
            self.bus.post(PlayMessage::Buffering { percent });
        }
        match action {
            BufferingAction::Underflow => {
                if self.playbin.set_state(gst::State::Paused).is_err() {
                    self.on_error(Error::failed("failed to pause for rebuffering"));
                    return;
                }
                self.set_app_state(PlaybackState::Buffering);
            }
            BufferingAction::DeferToSeek => {}
            BufferingAction::ResumePlaying => {
                if self.playbin.set_state(gst::State::Playing).is_err() {
                    self.on_error(Error::failed("failed to resume after buffering"));
                }
            }
            BufferingAction::SettlePaused => self.set_app_state(PlaybackState::Paused),
            BufferingAction::Ignore => unreachable!(),
        }
    }

    fn on_clock_lost(&mut self) {
        log::debug!("clock lost, cycling through paused to reselect one");
        if self.target_state >= gst::State::Playing
            && (self.playbin.set_state(gst::State::Paused).is_err()
                || self.playbin.set_state(gst::State::Playing).is_err())
        {
            self.on_error(Error::failed("failed to recover from clock loss"));
        }
    }

    fn on_redirect(&mut self, location: &str) {
        log::debug!("following redirect to {}", location);
        let target = self.target_state;
        self.stop(true);
        self.shared.lock().redirect_uri = Some(location.to_string());
        self.playbin.set_property("uri", location);
        if target >= gst::State::Playing {
            self.play();
        } else if target >= gst::State::Paused {
            self.pause();
        }
    }

    fn on_global_tags(&mut self, tags: gst::TagList) {
        if tags.scope() != gst::TagScope::Global {
            return;
        }
        let copy = {
            let mut shared = self.shared.lock();
            match shared.media_info.as_mut() {
                Some(info) => {
                    info.tags = Some(merge_tags(info.tags.take(), &tags));
                    info.resolve_metadata();
                    Some(info.clone())
                }
                None => None,
            }
        };
        match copy {
            Some(info) => self.bus.post(PlayMessage::MediaInfoUpdated { info }),
            // Stage them for the first snapshot
            None => self.global_tags = Some(merge_tags(self.global_tags.take(), &tags)),
        }
    }

    fn update_duration(&mut self) {
        let duration = self.playbin.query_duration::<gst::ClockTime>();
        let copy = {
            let mut shared = self.shared.lock();
            if shared.cached_duration == duration {
                None
            } else {
                shared.cached_duration = duration;
                if let Some(info) = shared.media_info.as_mut() {
                    info.duration = duration;
                }
                Some(shared.media_info.clone())
            }
        };
        if let Some(info) = copy {
            self.bus.post(PlayMessage::DurationChanged { duration });
            if let Some(info) = info {
                self.bus.post(PlayMessage::MediaInfoUpdated { info });
            }
        }
    }

    fn on_stream_collection(&mut self, collection: gst::StreamCollection) {
        if self.collection.as_ref() == Some(&collection) {
            return;
        }
        log::debug!("new stream collection with {} streams", collection.len());
        self.disconnect_stream_notify();
        let tx = self.tx.clone();
        let handler = collection.connect("stream-notify", true, move |values| {
            if let Ok(stream) = values[1].get::<gst::Stream>() {
                let _ = tx.send(LoopItem::Command(Box::new(move |inner| {
                    inner.on_stream_notify(stream);
                })));
            }
            None
        });
        self.stream_notify_handler = Some((collection.clone(), handler));
        self.collection = Some(collection);
        if self.shared.lock().media_info.is_some() {
            self.rebuild_streams();
        }
    }

    fn on_streams_selected(&mut self, msg: &gst::message::StreamsSelected) {
        {
            let mut shared = self.shared.lock();
            shared.selected_video_sid = None;
            shared.selected_audio_sid = None;
            shared.selected_text_sid = None;
            for stream in msg.streams() {
                let Some(sid) = stream.stream_id() else {
                    continue;
                };
                let sid = sid.to_string();
                let ty = stream.stream_type();
                if ty.contains(gst::StreamType::VIDEO) {
                    shared.selected_video_sid = Some(sid);
                } else if ty.contains(gst::StreamType::AUDIO) {
                    shared.selected_audio_sid = Some(sid);
                } else if ty.contains(gst::StreamType::TEXT) {
                    shared.selected_text_sid = Some(sid);
                }
            }
        }
        self.check_video_dimensions();
        let copy = self.shared.lock().media_info.clone();
        if let Some(info) = copy {
            self.bus.post(PlayMessage::MediaInfoUpdated { info });
        }
    }

    fn on_stream_notify(&mut self, stream: gst::Stream) {
        let Some(sid) = stream.stream_id() else {
            return;
        };
        let sid = sid.to_string();
        let tags = stream.tags();
        let caps = stream.caps();
        let kind = match kind_of(stream.stream_type()) {
            Some(kind) => kind,
            None => return,
        };
        let external = (kind == StreamKind::Subtitle
            && self.shared.lock().selected_text_sid.as_deref() == Some(sid.as_str()))
        .then(|| self.external_subtitle_name())
        .flatten();

        let copy = {
            let mut shared = self.shared.lock();
            let Some(info) = shared.media_info.as_mut() else {
                return;
            };
            let Some(entry) = info.stream_by_id_mut(&sid) else {
                return;
            };
            update_stream_entry(entry, kind, tags, caps, external.as_deref());
            info.resolve_metadata();
            info.clone()
        };
        self.bus.post(PlayMessage::MediaInfoUpdated { info: copy });
        if kind == StreamKind::Video {
            self.check_video_dimensions();
        }
    }

    fn on_legacy_streams_changed(&mut self) {
        if self.shared.lock().media_info.is_none() {
            return;
        }
        self.rebuild_streams();
        self.check_video_dimensions();
    }

    fn on_legacy_tags_changed(&mut self, kind: StreamKind, index: i32) {
        let signal = match kind {
            StreamKind::Video => "get-video-tags",
            StreamKind::Audio => "get-audio-tags",
            StreamKind::Subtitle => "get-text-tags",
        };
        let tags = self
            .playbin
            .emit_by_name::<Option<gst::TagList>>(signal, &[&index]);
        let external = (kind == StreamKind::Subtitle
            && self.playbin.property::<i32>("current-text") == index)
            .then(|| self.external_subtitle_name())
            .flatten();

        let copy = {
            let mut shared = self.shared.lock();
            let Some(info) = shared.media_info.as_mut() else {
                return;
            };
            let Some(entry) = info.stream_mut(kind, index) else {
                return;
            };
            let caps = entry.caps.clone();
            update_stream_entry(entry, kind, tags, caps, external.as_deref());
            info.resolve_metadata();
            info.clone()
        };
        self.bus.post(PlayMessage::MediaInfoUpdated { info: copy });
    }

    // Media info building

    fn build_media_info(&mut self) {
        let uri = {
            let shared = self.shared.lock();
            shared
                .uri
                .as_ref()
                .map(|u| u.to_string())
                .unwrap_or_default()
        };
        let mut info = MediaInfo::new(uri);
        info.is_live = self.is_live;
        let mut query = gst::query::Seeking::new(gst::Format::Time);
        if self.playbin.query(&mut query) {
            info.seekable = query.result().0;
        }
        info.duration = self.playbin.query_duration::<gst::ClockTime>();
        info.tags = self.global_tags.take();
        info.streams = self.collect_streams();
        info.resolve_metadata();

        {
            let mut shared = self.shared.lock();
            shared.cached_duration = info.duration;
            shared.media_info = Some(info.clone());
        }
        self.bus.post(PlayMessage::MediaInfoUpdated { info });
    }

    fn rebuild_streams(&mut self) {
        let streams = self.collect_streams();
        let copy = {
            let mut shared = self.shared.lock();
            let Some(info) = shared.media_info.as_mut() else {
                return;
            };
            info.streams = streams;
            info.resolve_metadata();
            info.clone()
        };
        self.bus.post(PlayMessage::MediaInfoUpdated { info: copy });
    }

    fn collect_streams(&self) -> Vec<StreamInfo> {
        match self.collection.clone() {
            Some(collection) if self.use_playbin3 => self.streams_from_collection(&collection),
            _ => self.streams_from_properties(),
        }
    }

    fn streams_from_collection(&self, collection: &gst::StreamCollection) -> Vec<StreamInfo> {
        let suburi_name = self.external_subtitle_name();
        let selected_text_sid = self.shared.lock().selected_text_sid.clone();
        let mut counts = [0i32; 3];
        let mut streams = Vec::new();
        for i in 0..collection.len() {
            let Some(stream) = collection.stream(i as u32) else {
                continue;
            };
            let Some(kind) = kind_of(stream.stream_type()) else {
                continue;
            };
            let slot = match kind {
                StreamKind::Video => 0,
                StreamKind::Audio => 1,
                StreamKind::Subtitle => 2,
            };
            let index = counts[slot];
            counts[slot] += 1;

            let sid = stream.stream_id().map(|s| s.to_string());
            let external = (kind == StreamKind::Subtitle && sid.is_some() && sid == selected_text_sid)
                .then(|| suburi_name.clone())
                .flatten();
            streams.push(make_stream(
                kind,
                index,
                sid,
                stream.tags(),
                stream.caps(),
                external.as_deref(),
            ));
        }
        streams
    }

    fn streams_from_properties(&self) -> Vec<StreamInfo> {
        let suburi_name = self.external_subtitle_name();
        let current_text = self.playbin.property::<i32>("current-text");
        let mut streams = Vec::new();
        for (kind, count_prop, tags_signal, pad_signal) in [
            (StreamKind::Video, "n-video", "get-video-tags", "get-video-pad"),
            (StreamKind::Audio, "n-audio", "get-audio-tags", "get-audio-pad"),
            (StreamKind::Subtitle, "n-text", "get-text-tags", "get-text-pad"),
        ] {
            let count = self.playbin.property::<i32>(count_prop);
            for index in 0..count {
                let tags = self
                    .playbin
                    .emit_by_name::<Option<gst::TagList>>(tags_signal, &[&index]);
                let caps = self
                    .playbin
                    .emit_by_name::<Option<gst::Pad>>(pad_signal, &[&index])
                    .and_then(|pad| pad.current_caps());
                let external = (kind == StreamKind::Subtitle && index == current_text)
                    .then(|| suburi_name.clone())
                    .flatten();
                streams.push(make_stream(kind, index, None, tags, caps, external.as_deref()));
            }
        }
        streams
    }

    fn external_subtitle_name(&self) -> Option<String> {
        self.shared.lock().suburi.as_ref().and_then(|suburi| {
            suburi
                .path_segments()
                .and_then(|segments| segments.last())
                .filter(|name| !name.is_empty())
                .map(str::to_string)
        })
    }

    fn disconnect_stream_notify(&mut self) {
        if let Some((collection, handler)) = self.stream_notify_handler.take() {
            collection.disconnect(handler);
        }
    }

    /// Watch the video sink's input pad so mid-stream caps renegotiations
    /// (resolution switches on adaptive streams) republish dimensions.
    fn watch_video_sink(&mut self) {
        let Some(sink) = self.playbin.property::<Option<gst::Element>>("video-sink") else {
            return;
        };
        let Some(pad) = sink.static_pad("sink") else {
            return;
        };
        if self.watched_sink_pad.as_ref() == Some(&pad) {
            return;
        }
        watch_sink_caps(&pad, self.tx.clone());
        self.watched_sink_pad = Some(pad);
    }

    fn check_video_dimensions(&mut self) {
        let Some(caps) = self.current_video_caps() else {
            return;
        };
        let Ok(info) = gst_video::VideoInfo::from_caps(&caps) else {
            return;
        };
        let par = info.par();
        let width =
            (info.width() as u64 * par.numer().max(0) as u64 / par.denom().max(1) as u64) as u32;
        let height = info.height();
        if width == 0 || height == 0 {
            return;
        }
        if self.last_dimensions != Some((width, height)) {
            self.last_dimensions = Some((width, height));
            self.bus
                .post(PlayMessage::VideoDimensionsChanged { width, height });
        }
    }

    fn current_video_caps(&self) -> Option<gst::Caps> {
        if self.use_playbin3 {
            let collection = self.collection.as_ref()?;
            let selected_video_sid = self.shared.lock().selected_video_sid.clone();
            for i in 0..collection.len() {
                if let Some(stream) = collection.stream(i as u32)
                    && stream.stream_type().contains(gst::StreamType::VIDEO)
                {
                    let sid = stream.stream_id().map(|s| s.to_string());
                    if selected_video_sid.is_none() || sid == selected_video_sid {
                        return stream.caps();
                    }
                }
            }
            None
        } else {
            let current = self.playbin.property::<i32>("current-video").max(0);
            self.playbin
                .emit_by_name::<Option<gst::Pad>>("get-video-pad", &[&current])
                .and_then(|pad| pad.current_caps())
        }
    }
}

fn watch_sink_caps(pad: &gst::Pad, tx: Sender<LoopItem>) {
    pad.connect_notify(Some("caps"), move |_, _| {
        let _ = tx.send(LoopItem::Command(Box::new(|inner| {
            inner.check_video_dimensions();
        })));
    });
}

fn kind_of(ty: gst::StreamType) -> Option<StreamKind> {
    if ty.contains(gst::StreamType::VIDEO) {
        Some(StreamKind::Video)
    } else if ty.contains(gst::StreamType::AUDIO) {
        Some(StreamKind::Audio)
    } else if ty.contains(gst::StreamType::TEXT) {
        Some(StreamKind::Subtitle)
    } else {
        None
    }
}

fn merge_tags(current: Option<gst::TagList>, new: &gst::TagListRef) -> gst::TagList {
    match current {
        Some(current) => current.merge(new, gst::TagMergeMode::Replace),
        None => new.to_owned(),
    }
}

fn make_stream(
    kind: StreamKind,
    index: i32,
    stream_id: Option<String>,
    tags: Option<gst::TagList>,
    caps: Option<gst::Caps>,
    external_name: Option<&str>,
) -> StreamInfo {
    let details = details_for(kind, tags.as_deref(), caps.as_deref(), external_name);
    let codec = media_info::codec_description(kind, tags.as_deref(), caps.as_deref());
    StreamInfo {
        index,
        stream_id,
        tags,
        caps,
        codec,
        details,
    }
}

fn details_for(
    kind: StreamKind,
    tags: Option<&gst::TagListRef>,
    caps: Option<&gst::CapsRef>,
    external_name: Option<&str>,
) -> StreamDetails {
    match kind {
        StreamKind::Video => media_info::video_details(tags, caps),
        StreamKind::Audio => media_info::audio_details(tags, caps),
        StreamKind::Subtitle => media_info::subtitle_details(tags, external_name),
    }
}

fn update_stream_entry(
    entry: &mut StreamInfo,
    kind: StreamKind,
    tags: Option<gst::TagList>,
    caps: Option<gst::Caps>,
    external_name: Option<&str>,
) {
    if caps.is_some() {
        entry.caps = caps;
    }
    entry.tags = tags;
    entry.codec = media_info::codec_description(kind, entry.tags.as_deref(), entry.caps.as_deref());
    entry.details = details_for(kind, entry.tags.as_deref(), entry.caps.as_deref(), external_name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::{self, Receiver};

    // These drive the worker state directly, without a running loop thread.
    // They need the playback plugins; skip quietly where they are missing.
    fn make_inner() -> Option<(PlayerInner, Receiver<LoopItem>)> {
        gst::init().ok()?;
        gst::ElementFactory::find("playbin")?;
        let playbin = build_playbin(None).ok()?;
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Mutex::new(Shared::new(PlayerConfig::default())));
        let inner = PlayerInner::new(playbin, shared, MessageBus::new(), tx);
        Some((inner, rx))
    }

    #[test]
    fn pause_settling_cancels_the_position_tick() {
        let Some((mut inner, _rx)) = make_inner() else {
            return;
        };
        inner.target_state = gst::State::Playing;
        inner.arm_tick();
        assert!(inner.tick_deadline.is_some());

        inner.target_state = gst::State::Paused;
        inner.current_state = gst::State::Paused;
        inner.on_paused_settled();
        assert!(inner.tick_deadline.is_none());
    }

    #[test]
    fn rebuffer_pause_settle_keeps_buffering_state() {
        let Some((mut inner, _rx)) = make_inner() else {
            return;
        };
        inner.target_state = gst::State::Playing;
        inner.current_state = gst::State::Paused;
        inner.buffering_percent = 40;
        inner.shared.lock().app_state = PlaybackState::Buffering;

        inner.on_paused_settled();
        assert_eq!(inner.shared.lock().app_state, PlaybackState::Buffering);
        assert!(inner.bus.is_empty());
    }

    #[test]
    fn completed_seek_on_non_seekable_media_posts_no_seek_done() {
        let Some((mut inner, _rx)) = make_inner() else {
            return;
        };
        inner.target_state = gst::State::Paused;
        inner.current_state = gst::State::Paused;
        inner.seek_pending = true;
        inner.queued_seek = Some(gst::ClockTime::from_seconds(3));
        let mut info = MediaInfo::new("file:///tmp/a.ts".into());
        info.seekable = false;
        inner.shared.lock().media_info = Some(info);

        inner.on_paused_settled();
        assert!(!inner.seek_pending);
        assert!(inner.queued_seek.is_none());
        while let Some(message) = inner.bus.pop() {
            assert!(!matches!(message, PlayMessage::SeekDone { .. }));
        }
    }

    #[test]
    fn replacing_the_stream_collection_drops_the_old_handler() {
        let Some((mut inner, _rx)) = make_inner() else {
            return;
        };
        let first = gst::StreamCollection::builder(None).build();
        let second = gst::StreamCollection::builder(None).build();

        inner.on_stream_collection(first);
        inner.on_stream_collection(second.clone());
        let (watched, _) = inner.stream_notify_handler.as_ref().unwrap();
        assert_eq!(watched, &second);

        inner.shared.lock().app_state = PlaybackState::Buffering;
        inner.stop(false);
        assert!(inner.stream_notify_handler.is_none());
        assert!(inner.collection.is_none());
    }

    #[test]
    fn sink_caps_changes_enqueue_a_dimension_check() {
        if gst::init().is_err() {
            return;
        }
        let Ok(sink) = gst::ElementFactory::make("fakesink").build() else {
            return;
        };
        let pad = sink.static_pad("sink").unwrap();
        let (tx, rx) = mpsc::channel();
        watch_sink_caps(&pad, tx);

        pad.notify("caps");
        assert!(matches!(rx.try_recv(), Ok(LoopItem::Command(_))));
    }
}
