use std::sync::mpsc::Sender;

use crate::audio::features::SpectrumFrame;
use crate::error::CaptureError;

#[derive(Clone, Debug, PartialEq)]
pub enum PipelineEvent {
    Frame(SpectrumFrame),
    /// Delivered once in place of a frame; ends the activation.
    Error(CaptureError),
}

/// Ordered, single-consumer event channel fed by the capture thread.
///
/// `deliver` is fire-and-forget: it must not wait for the consumer to
/// process the event, so slow consumers have to buffer internally.
pub trait DeliverySink: Send + Sync {
    fn deliver(&self, event: PipelineEvent);
}

impl DeliverySink for Sender<PipelineEvent> {
    fn deliver(&self, event: PipelineEvent) {
        // A vanished receiver means nobody is listening any more.
        let _ = self.send(event);
    }
}

/// Adapts a closure into a sink.
pub struct CallbackSink<F>(pub F);

impl<F> DeliverySink for CallbackSink<F>
where
    F: Fn(PipelineEvent) + Send + Sync,
{
    fn deliver(&self, event: PipelineEvent) {
        (self.0)(event)
    }
}
