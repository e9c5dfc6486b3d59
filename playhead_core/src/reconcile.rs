use gstreamer as gst;

/// What a buffering update asks the player to do.
///
/// The branch priority is deliberate: a pending or queued seek always wins,
/// then the intent to play, then settling into paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BufferingAction {
    /// Not buffering-managed right now (live stream, or no active intent).
    Ignore,
    /// Buffer underrun: hold the pipeline in paused and report buffering.
    Underflow,
    /// Buffers are full but seek handling owns the next transition.
    DeferToSeek,
    /// Buffers are full and the caller wants playback: request playing.
    ResumePlaying,
    /// Buffers are full with a paused intent: settle into paused.
    SettlePaused,
}

pub(crate) fn buffering_action(
    percent: i32,
    is_live: bool,
    target: gst::State,
    current: gst::State,
    seek_active: bool,
) -> BufferingAction {
    if is_live || target < gst::State::Paused {
        return BufferingAction::Ignore;
    }
    if percent < 100 {
        return BufferingAction::Underflow;
    }
    if seek_active {
        BufferingAction::DeferToSeek
    } else if target >= gst::State::Playing && current >= gst::State::Paused {
        BufferingAction::ResumePlaying
    } else if target >= gst::State::Paused {
        BufferingAction::SettlePaused
    } else {
        BufferingAction::Ignore
    }
}

/// What to do after the pipeline confirmed a transition into paused with no
/// further transition pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PausedSettled {
    /// An in-flight seek just completed.
    SeekCompleted,
    /// A queued seek position is waiting: dispatch it.
    DispatchQueuedSeek,
    /// Buffers are still filling; the buffering handler owns the next
    /// state report.
    RemainBuffering,
    /// Buffers are full and the caller wants playback: request playing.
    ResumePlaying,
    /// Settle into paused.
    SettlePaused,
}

pub(crate) fn on_paused_settled(
    seek_pending: bool,
    queued_seek: bool,
    target: gst::State,
    buffering_percent: i32,
) -> PausedSettled {
    if seek_pending {
        PausedSettled::SeekCompleted
    } else if queued_seek {
        PausedSettled::DispatchQueuedSeek
    } else if buffering_percent < 100 {
        PausedSettled::RemainBuffering
    } else if target >= gst::State::Playing {
        PausedSettled::ResumePlaying
    } else {
        PausedSettled::SettlePaused
    }
}

/// Follow-up after an in-flight seek confirmed completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SeekCompletion {
    /// Media cannot seek: drop anything still queued and settle without
    /// reporting completion.
    DropQueued,
    /// Dispatch the next queued position.
    DispatchQueued,
    /// Report completion and settle.
    Finish,
}

pub(crate) fn on_seek_completed(seekable: bool, queued_seek: bool) -> SeekCompletion {
    if !seekable {
        SeekCompletion::DropQueued
    } else if queued_seek {
        SeekCompletion::DispatchQueued
    } else {
        SeekCompletion::Finish
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gst::State;

    #[test]
    fn live_streams_are_not_buffer_managed() {
        assert_eq!(
            buffering_action(40, true, State::Playing, State::Playing, false),
            BufferingAction::Ignore
        );
    }

    #[test]
    fn underrun_pauses_while_active() {
        assert_eq!(
            buffering_action(40, false, State::Playing, State::Playing, false),
            BufferingAction::Underflow
        );
        assert_eq!(
            buffering_action(99, false, State::Paused, State::Paused, false),
            BufferingAction::Underflow
        );
    }

    #[test]
    fn underrun_is_ignored_when_stopped() {
        assert_eq!(
            buffering_action(40, false, State::Ready, State::Ready, false),
            BufferingAction::Ignore
        );
    }

    #[test]
    fn full_buffers_defer_to_seek_first() {
        assert_eq!(
            buffering_action(100, false, State::Playing, State::Paused, true),
            BufferingAction::DeferToSeek
        );
    }

    #[test]
    fn full_buffers_resume_play_intent() {
        assert_eq!(
            buffering_action(100, false, State::Playing, State::Paused, false),
            BufferingAction::ResumePlaying
        );
    }

    #[test]
    fn full_buffers_settle_paused_without_play_intent() {
        assert_eq!(
            buffering_action(100, false, State::Paused, State::Paused, false),
            BufferingAction::SettlePaused
        );
    }

    #[test]
    fn paused_settle_priority_is_seek_then_queue_then_state() {
        assert_eq!(
            on_paused_settled(true, true, State::Playing, 100),
            PausedSettled::SeekCompleted
        );
        assert_eq!(
            on_paused_settled(false, true, State::Playing, 100),
            PausedSettled::DispatchQueuedSeek
        );
        assert_eq!(
            on_paused_settled(false, false, State::Playing, 100),
            PausedSettled::ResumePlaying
        );
        assert_eq!(
            on_paused_settled(false, false, State::Paused, 100),
            PausedSettled::SettlePaused
        );
    }

    #[test]
    fn paused_settle_during_rebuffer_reports_nothing() {
        // A rebuffer pause confirming must not surface as paused; the
        // buffering handler keeps ownership until buffers are full again.
        assert_eq!(
            on_paused_settled(false, false, State::Playing, 40),
            PausedSettled::RemainBuffering
        );
        assert_eq!(
            on_paused_settled(false, false, State::Paused, 40),
            PausedSettled::RemainBuffering
        );
    }

    #[test]
    fn completed_seek_on_non_seekable_media_is_dropped_silently() {
        assert_eq!(on_seek_completed(false, true), SeekCompletion::DropQueued);
        assert_eq!(on_seek_completed(false, false), SeekCompletion::DropQueued);
        assert_eq!(
            on_seek_completed(true, true),
            SeekCompletion::DispatchQueued
        );
        assert_eq!(on_seek_completed(true, false), SeekCompletion::Finish);
    }
}
