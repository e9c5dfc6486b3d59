use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gstreamer as gst;
use parking_lot::{Condvar, Mutex};

use crate::error::Error;
use crate::media_info::MediaInfo;
use crate::state::PlaybackState;

/// Typed playback event published to the application.
#[derive(Debug, Clone)]
pub enum PlayMessage {
    /// A new URI was accepted and loaded into the pipeline.
    UriLoaded { uri: url::Url },
    PositionUpdated { position: gst::ClockTime },
    DurationChanged { duration: Option<gst::ClockTime> },
    StateChanged { state: PlaybackState },
    Buffering { percent: i32 },
    EndOfStream,
    Error { error: Error },
    Warning { warning: Error },
    VideoDimensionsChanged { width: u32, height: u32 },
    MediaInfoUpdated { info: MediaInfo },
    VolumeChanged { volume: f64 },
    MuteChanged { muted: bool },
    /// A requested seek finished; carries the position that was reached.
    SeekDone { position: gst::ClockTime },
}

struct Queue {
    items: VecDeque<PlayMessage>,
    flushing: bool,
}

/// Drainable queue of [`PlayMessage`]s, separate from the pipeline's own bus.
///
/// Messages accumulate unboundedly until drained; keeping up is the
/// consumer's responsibility. While flushing, pending messages are dropped
/// and new posts are discarded.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<(Mutex<Queue>, Condvar)>,
}

impl MessageBus {
    pub(crate) fn new() -> Self {
        MessageBus {
            inner: Arc::new((
                Mutex::new(Queue {
                    items: VecDeque::new(),
                    flushing: false,
                }),
                Condvar::new(),
            )),
        }
    }

    pub(crate) fn post(&self, message: PlayMessage) {
        let (lock, cond) = &*self.inner;
        let mut queue = lock.lock();
        if queue.flushing {
            log::trace!("dropping message while flushing: {:?}", message);
            return;
        }
        queue.items.push_back(message);
        cond.notify_one();
    }

    /// Take the oldest pending message without blocking.
    pub fn pop(&self) -> Option<PlayMessage> {
        self.inner.0.lock().items.pop_front()
    }

    /// Wait up to `timeout` for a message.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<PlayMessage> {
        let (lock, cond) = &*self.inner;
        let mut queue = lock.lock();
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = queue.items.pop_front() {
                return Some(message);
            }
            if queue.flushing || cond.wait_until(&mut queue, deadline).timed_out() {
                return queue.items.pop_front();
            }
        }
    }

    /// While flushing the queue is emptied and further posts are dropped.
    pub fn set_flushing(&self, flushing: bool) {
        let (lock, cond) = &*self.inner;
        let mut queue = lock.lock();
        queue.flushing = flushing;
        if flushing {
            queue.items.clear();
            cond.notify_all();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.0.lock().items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(bus: &MessageBus) -> Vec<PlayMessage> {
        std::iter::from_fn(|| bus.pop()).collect()
    }

    #[test]
    fn messages_come_out_in_post_order() {
        let bus = MessageBus::new();
        bus.post(PlayMessage::Buffering { percent: 40 });
        bus.post(PlayMessage::Buffering { percent: 100 });
        bus.post(PlayMessage::EndOfStream);

        let drained = drain(&bus);
        assert_eq!(drained.len(), 3);
        assert!(matches!(drained[0], PlayMessage::Buffering { percent: 40 }));
        assert!(matches!(drained[1], PlayMessage::Buffering { percent: 100 }));
        assert!(matches!(drained[2], PlayMessage::EndOfStream));
    }

    #[test]
    fn flushing_drops_pending_and_subsequent_posts() {
        let bus = MessageBus::new();
        bus.post(PlayMessage::EndOfStream);
        bus.set_flushing(true);
        assert!(bus.is_empty());

        bus.post(PlayMessage::EndOfStream);
        assert!(bus.pop().is_none());

        bus.set_flushing(false);
        bus.post(PlayMessage::EndOfStream);
        assert!(matches!(bus.pop(), Some(PlayMessage::EndOfStream)));
    }

    #[test]
    fn wait_timeout_returns_posted_message() {
        let bus = MessageBus::new();
        let poster = bus.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            poster.post(PlayMessage::MuteChanged { muted: true });
        });
        let message = bus.wait_timeout(Duration::from_secs(5));
        handle.join().unwrap();
        assert!(matches!(message, Some(PlayMessage::MuteChanged { muted: true })));
    }

    #[test]
    fn wait_timeout_times_out_when_idle() {
        let bus = MessageBus::new();
        assert!(bus.wait_timeout(Duration::from_millis(5)).is_none());
    }
}
