//! Callback-style dispatch on top of [`playhead_core::MessageBus`].
//!
//! [`SignalAdapter`] spawns a thread that drains a player's message bus and
//! invokes registered callbacks per message kind. Applications that prefer a
//! poll loop should use the bus directly instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use gstreamer as gst;
use parking_lot::Mutex;
use playhead_core::{Error, MediaInfo, MessageBus, PlayMessage, PlaybackState, Player};

type Callback<T> = Box<dyn Fn(&T) + Send + 'static>;

#[derive(Default)]
struct Handlers {
    uri_loaded: Vec<Callback<url::Url>>,
    position_updated: Vec<Callback<gst::ClockTime>>,
    duration_changed: Vec<Callback<Option<gst::ClockTime>>>,
    state_changed: Vec<Callback<PlaybackState>>,
    buffering: Vec<Callback<i32>>,
    end_of_stream: Vec<Callback<()>>,
    error: Vec<Callback<Error>>,
    warning: Vec<Callback<Error>>,
    video_dimensions_changed: Vec<Callback<(u32, u32)>>,
    media_info_updated: Vec<Callback<MediaInfo>>,
    volume_changed: Vec<Callback<f64>>,
    mute_changed: Vec<Callback<bool>>,
    seek_done: Vec<Callback<gst::ClockTime>>,
}

fn emit<T>(callbacks: &[Callback<T>], value: &T) {
    for callback in callbacks {
        callback(value);
    }
}

fn dispatch(handlers: &Handlers, message: PlayMessage) {
    match message {
        PlayMessage::UriLoaded { uri } => emit(&handlers.uri_loaded, &uri),
        PlayMessage::PositionUpdated { position } => emit(&handlers.position_updated, &position),
        PlayMessage::DurationChanged { duration } => emit(&handlers.duration_changed, &duration),
        PlayMessage::StateChanged { state } => emit(&handlers.state_changed, &state),
        PlayMessage::Buffering { percent } => emit(&handlers.buffering, &percent),
        PlayMessage::EndOfStream => emit(&handlers.end_of_stream, &()),
        PlayMessage::Error { error } => emit(&handlers.error, &error),
        PlayMessage::Warning { warning } => emit(&handlers.warning, &warning),
        PlayMessage::VideoDimensionsChanged { width, height } => {
            emit(&handlers.video_dimensions_changed, &(width, height))
        }
        PlayMessage::MediaInfoUpdated { info } => emit(&handlers.media_info_updated, &info),
        PlayMessage::VolumeChanged { volume } => emit(&handlers.volume_changed, &volume),
        PlayMessage::MuteChanged { muted } => emit(&handlers.mute_changed, &muted),
        PlayMessage::SeekDone { position } => emit(&handlers.seek_done, &position),
    }
}

/// Drains a player's message bus on a dedicated thread and fans messages out
/// to registered callbacks.
///
/// Callbacks run on the adapter's dispatch thread. Keep them short; a slow
/// callback delays every message behind it.
pub struct SignalAdapter {
    handlers: Arc<Mutex<Handlers>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SignalAdapter {
    pub fn new(player: &Player) -> Self {
        Self::with_bus(player.message_bus())
    }

    pub fn with_bus(bus: MessageBus) -> Self {
        let handlers = Arc::new(Mutex::new(Handlers::default()));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = {
            let handlers = handlers.clone();
            let stop = stop.clone();
            thread::Builder::new()
                .name("playhead-signals".into())
                .spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        let Some(message) = bus.wait_timeout(Duration::from_millis(100)) else {
                            continue;
                        };
                        log::trace!("dispatching {:?}", message);
                        dispatch(&handlers.lock(), message);
                    }
                })
                .ok()
        };
        if worker.is_none() {
            log::error!("failed to spawn the signal dispatch thread");
        }

        SignalAdapter {
            handlers,
            stop,
            worker,
        }
    }

    pub fn connect_uri_loaded(&self, f: impl Fn(&url::Url) + Send + 'static) {
        self.handlers.lock().uri_loaded.push(Box::new(f));
    }

    pub fn connect_position_updated(&self, f: impl Fn(&gst::ClockTime) + Send + 'static) {
        self.handlers.lock().position_updated.push(Box::new(f));
    }

    pub fn connect_duration_changed(&self, f: impl Fn(&Option<gst::ClockTime>) + Send + 'static) {
        self.handlers.lock().duration_changed.push(Box::new(f));
    }

    pub fn connect_state_changed(&self, f: impl Fn(&PlaybackState) + Send + 'static) {
        self.handlers.lock().state_changed.push(Box::new(f));
    }

    pub fn connect_buffering(&self, f: impl Fn(&i32) + Send + 'static) {
        self.handlers.lock().buffering.push(Box::new(f));
    }

    pub fn connect_end_of_stream(&self, f: impl Fn(&()) + Send + 'static) {
        self.handlers.lock().end_of_stream.push(Box::new(f));
    }

    pub fn connect_error(&self, f: impl Fn(&Error) + Send + 'static) {
        self.handlers.lock().error.push(Box::new(f));
    }

    pub fn connect_warning(&self, f: impl Fn(&Error) + Send + 'static) {
        self.handlers.lock().warning.push(Box::new(f));
    }

    pub fn connect_video_dimensions_changed(&self, f: impl Fn(&(u32, u32)) + Send + 'static) {
        self.handlers.lock().video_dimensions_changed.push(Box::new(f));
    }

    pub fn connect_media_info_updated(&self, f: impl Fn(&MediaInfo) + Send + 'static) {
        self.handlers.lock().media_info_updated.push(Box::new(f));
    }

    pub fn connect_volume_changed(&self, f: impl Fn(&f64) + Send + 'static) {
        self.handlers.lock().volume_changed.push(Box::new(f));
    }

    pub fn connect_mute_changed(&self, f: impl Fn(&bool) + Send + 'static) {
        self.handlers.lock().mute_changed.push(Box::new(f));
    }

    pub fn connect_seek_done(&self, f: impl Fn(&gst::ClockTime) + Send + 'static) {
        self.handlers.lock().seek_done.push(Box::new(f));
    }
}

impl Drop for SignalAdapter {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    // Posting is crate-private in playhead_core, so tests drive the adapter
    // through a real player where the plugins allow, and fall back to
    // asserting clean startup and shutdown otherwise.

    #[test]
    fn adapter_starts_and_stops_cleanly() {
        let Ok(()) = gst::init() else { return };
        let Some(player) = make_player() else { return };
        let adapter = SignalAdapter::new(&player);
        adapter.connect_end_of_stream(|_| {});
        drop(adapter);
    }

    #[test]
    fn state_changes_reach_callbacks() {
        let Ok(()) = gst::init() else { return };
        let Some(player) = make_player() else { return };

        let adapter = SignalAdapter::new(&player);
        let (tx, rx) = mpsc::channel();
        adapter.connect_state_changed(move |state| {
            let _ = tx.send(*state);
        });

        let uri = url::Url::parse("file:///nonexistent/media.mkv").unwrap();
        player.set_uri(&uri);
        player.play();

        // Playing a missing file still transitions through buffering before
        // the pipeline reports the error.
        let state = rx.recv_timeout(Duration::from_secs(5));
        assert!(matches!(state, Ok(PlaybackState::Buffering)));
    }

    fn make_player() -> Option<Player> {
        gst::ElementFactory::find("playbin")?;
        Player::new(None).ok()
    }
}
