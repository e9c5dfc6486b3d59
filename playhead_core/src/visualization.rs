use gstreamer as gst;
use gstreamer::prelude::*;

/// An audio visualization element available in the installed plugin set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Visualization {
    /// Factory name, as accepted by
    /// [`Player::set_visualization`](crate::Player::set_visualization).
    pub name: String,
    pub description: String,
}

/// Lazily built list of visualization factories.
///
/// The list is rebuilt whenever the registry's feature-list cookie moves,
/// so plugins installed at runtime show up without a process restart.
pub(crate) struct VisualizationRegistry {
    cookie: Option<u32>,
    entries: Vec<Visualization>,
}

impl VisualizationRegistry {
    pub(crate) fn new() -> Self {
        VisualizationRegistry {
            cookie: None,
            entries: Vec::new(),
        }
    }

    pub(crate) fn entries(&mut self) -> &[Visualization] {
        let registry = gst::Registry::get();
        let cookie = registry.feature_list_cookie();
        if self.cookie != Some(cookie) {
            log::debug!("rebuilding visualization list, registry cookie {}", cookie);
            self.entries = gst::ElementFactory::factories_with_type(
                gst::ElementFactoryType::VISUALIZATION,
                gst::Rank::NONE,
            )
            .iter()
            .map(|factory| Visualization {
                name: factory.name().to_string(),
                description: factory.longname().to_string(),
            })
            .collect();
            self.cookie = Some(cookie);
        }
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_is_cached_until_the_registry_changes() {
        gst::init().unwrap();
        let mut registry = VisualizationRegistry::new();
        let first = registry.entries().to_vec();
        // A second call without registry changes must not re-enumerate into
        // a different result.
        assert_eq!(registry.entries(), first.as_slice());
    }
}
