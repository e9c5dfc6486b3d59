use std::time::Duration;

use crate::error::Error;

/// Longest accepted position-update interval, in milliseconds.
pub const MAX_POSITION_UPDATE_INTERVAL_MS: u32 = 10_000;

/// Playback configuration.
///
/// A config round-trips through [`Player::config`](crate::Player::config) /
/// [`Player::set_config`](crate::Player::set_config) by value. Replacing it
/// is only allowed while playback is stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerConfig {
    /// User agent handed to network source elements that expose a
    /// `user-agent` property.
    pub user_agent: Option<String>,
    /// Interval between position-updated messages while playing, in
    /// milliseconds. `0` disables position updates entirely.
    pub position_update_interval_ms: u32,
    /// Request sample-accurate seeks instead of keyframe-aligned ones.
    pub accurate_seek: bool,
    /// Window within which rapid seek requests are coalesced into a single
    /// pipeline seek.
    pub seek_debounce: Duration,
    /// How long a stopped pipeline is kept in its ready state before being
    /// dropped to null to release decoder resources.
    pub ready_timeout: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            user_agent: Some(concat!("playhead/", env!("CARGO_PKG_VERSION")).to_string()),
            position_update_interval_ms: 100,
            accurate_seek: false,
            seek_debounce: Duration::from_millis(250),
            ready_timeout: Duration::from_secs(60),
        }
    }
}

impl PlayerConfig {
    pub(crate) fn validate(&self) -> Result<(), Error> {
        if self.position_update_interval_ms > MAX_POSITION_UPDATE_INTERVAL_MS {
            return Err(Error::failed(format!(
                "position update interval {}ms exceeds the maximum of {}ms",
                self.position_update_interval_ms, MAX_POSITION_UPDATE_INTERVAL_MS
            )));
        }
        Ok(())
    }

    /// The tick interval as a duration, or `None` when updates are disabled.
    pub(crate) fn tick_interval(&self) -> Option<Duration> {
        if self.position_update_interval_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.position_update_interval_ms as u64))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PlayerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.position_update_interval_ms, 100);
        assert_eq!(config.seek_debounce, Duration::from_millis(250));
        assert_eq!(config.ready_timeout, Duration::from_secs(60));
    }

    #[test]
    fn interval_above_maximum_is_rejected() {
        let config = PlayerConfig {
            position_update_interval_ms: MAX_POSITION_UPDATE_INTERVAL_MS + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_interval_disables_ticks() {
        let config = PlayerConfig {
            position_update_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.tick_interval(), None);
    }
}
