use gstreamer as gst;

/// Strategy for providing the video sink the pipeline renders into.
///
/// The renderer is consulted once, on the worker thread, while the pipeline
/// is being assembled. Returning `None` lets playbin pick its default sink.
pub trait VideoRenderer: Send + 'static {
    fn create_video_sink(&self, pipeline: &gst::Pipeline) -> Option<gst::Element>;
}

/// Renderer wrapping an already constructed sink element.
pub struct SinkRenderer {
    sink: gst::Element,
}

impl SinkRenderer {
    pub fn new(sink: gst::Element) -> Self {
        SinkRenderer { sink }
    }
}

impl VideoRenderer for SinkRenderer {
    fn create_video_sink(&self, _pipeline: &gst::Pipeline) -> Option<gst::Element> {
        Some(self.sink.clone())
    }
}
