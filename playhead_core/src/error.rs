use gstreamer as gst;

/// Operational failure reported by the player.
///
/// All runtime failures collapse into one kind: a human-readable message
/// plus whatever structured details the pipeline attached to the
/// originating bus message. Callers that need to distinguish causes should
/// inspect `details`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct Error {
    message: String,
    details: Option<gst::Structure>,
}

impl Error {
    pub fn failed(message: impl Into<String>) -> Self {
        Error {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(message: impl Into<String>, details: Option<gst::Structure>) -> Self {
        Error {
            message: message.into(),
            details,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&gst::Structure> {
        self.details.as_ref()
    }
}

impl From<gst::glib::BoolError> for Error {
    fn from(err: gst::glib::BoolError) -> Self {
        Error::failed(err.message.to_string())
    }
}

impl From<gst::StateChangeError> for Error {
    fn from(err: gst::StateChangeError) -> Self {
        Error::failed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_is_displayed() {
        let err = Error::failed("could not preroll");
        assert_eq!(err.to_string(), "could not preroll");
        assert!(err.details().is_none());
    }

    #[test]
    fn details_are_carried_verbatim() {
        gst::init().unwrap();
        let details = gst::Structure::builder("origin").field("code", 7i32).build();
        let err = Error::with_details("decode failed", Some(details.clone()));
        assert_eq!(err.details(), Some(&details));
    }
}
