use std::time::{Duration, Instant};

use gstreamer as gst;

/// How a new seek request should be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SeekSchedule {
    /// Dispatch on the next loop turn.
    Immediate,
    /// Dispatch after this delay, completing the debounce window.
    Delayed(Duration),
}

/// Decide when a newly requested seek may hit the pipeline.
///
/// Requests are rate-limited to one pipeline seek per debounce window; a
/// request landing inside the window of the previous dispatch waits out the
/// remainder. The caller is responsible for merging into an
/// already-scheduled dispatch instead of calling this again.
pub(crate) fn schedule_seek(
    last_dispatch: Option<Instant>,
    now: Instant,
    window: Duration,
) -> SeekSchedule {
    match last_dispatch {
        None => SeekSchedule::Immediate,
        Some(last) => {
            let elapsed = now.saturating_duration_since(last);
            if elapsed >= window {
                SeekSchedule::Immediate
            } else {
                SeekSchedule::Delayed(window - elapsed)
            }
        }
    }
}

/// Flags for a seek event: always flushing, sample-accurate on request,
/// trick-mode whenever the rate is not normal forward speed.
pub(crate) fn seek_flags(accurate: bool, rate: f64) -> gst::SeekFlags {
    let mut flags = gst::SeekFlags::FLUSH;
    if accurate {
        flags |= gst::SeekFlags::ACCURATE;
    }
    if rate != 1.0 {
        flags |= gst::SeekFlags::TRICKMODE;
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(250);

    #[test]
    fn first_seek_dispatches_immediately() {
        let now = Instant::now();
        assert_eq!(schedule_seek(None, now, WINDOW), SeekSchedule::Immediate);
    }

    #[test]
    fn seek_outside_window_dispatches_immediately() {
        let now = Instant::now();
        let last = now - Duration::from_millis(300);
        assert_eq!(schedule_seek(Some(last), now, WINDOW), SeekSchedule::Immediate);
    }

    #[test]
    fn seek_inside_window_waits_out_the_remainder() {
        let now = Instant::now();
        let last = now - Duration::from_millis(100);
        assert_eq!(
            schedule_seek(Some(last), now, WINDOW),
            SeekSchedule::Delayed(Duration::from_millis(150))
        );
    }

    #[test]
    fn flags_always_flush() {
        assert_eq!(seek_flags(false, 1.0), gst::SeekFlags::FLUSH);
        assert_eq!(
            seek_flags(true, 1.0),
            gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE
        );
    }

    #[test]
    fn non_unit_rate_requests_trick_mode() {
        assert!(seek_flags(false, 2.0).contains(gst::SeekFlags::TRICKMODE));
        assert!(seek_flags(false, -1.0).contains(gst::SeekFlags::TRICKMODE));
        assert!(!seek_flags(false, 1.0).contains(gst::SeekFlags::TRICKMODE));
    }
}
