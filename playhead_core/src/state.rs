use std::fmt;

/// Application-visible playback state.
///
/// This is a simplification of the pipeline's own state ladder. It only
/// changes in response to confirmed pipeline transitions, never
/// optimistically when a command is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlaybackState {
    /// Nothing loaded or playback torn down.
    #[default]
    Stopped,
    /// The pipeline is settling: prerolling, seeking, or refilling buffers.
    Buffering,
    Paused,
    Playing,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Stopped => "stopped",
            PlaybackState::Buffering => "buffering",
            PlaybackState::Paused => "paused",
            PlaybackState::Playing => "playing",
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_stopped() {
        assert_eq!(PlaybackState::default(), PlaybackState::Stopped);
    }

    #[test]
    fn display_uses_lowercase_nicks() {
        assert_eq!(PlaybackState::Buffering.to_string(), "buffering");
        assert_eq!(PlaybackState::Playing.to_string(), "playing");
    }
}
