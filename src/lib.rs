//! Live microphone spectrum bands for real-time visualization.
//!
//! A [`pipeline::CapturePipeline`] reads fixed-size PCM frames from a
//! [`audio::source::PcmSource`] on a dedicated thread, turns each frame into
//! a handful of log-scaled frequency bands, and pushes them in order into a
//! [`sink::DeliverySink`].

pub mod audio;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod sink;

pub use error::{CaptureError, ErrorKind};
pub use pipeline::{CapturePipeline, PipelineConfig, PipelineState};
pub use sink::{DeliverySink, PipelineEvent};
