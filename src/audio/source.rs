use thiserror::Error;

use crate::error::Result;

/// Why a single frame could not be read.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ReadError {
    /// The device was closed or the input is exhausted.
    #[error("end of stream")]
    EndOfStream,

    #[error("{0}")]
    Device(String),
}

/// Blocking producer of fixed-size mono i16 frames. Lives on the capture
/// thread.
pub trait FrameReader: Send {
    /// Fill `frame` completely, blocking until enough samples are available.
    fn read_frame(&mut self, frame: &mut [i16]) -> std::result::Result<(), ReadError>;
}

/// Control-side handle of an open device. Closing it must wake a reader
/// blocked in [`FrameReader::read_frame`] and be safe to repeat.
pub trait DeviceHandle: Send {
    fn close(&mut self);
}

/// An opened source, split into the half the capture thread reads from and
/// the half the control thread releases.
pub struct PcmStream {
    pub reader: Box<dyn FrameReader>,
    pub handle: Box<dyn DeviceHandle>,
}

impl PcmStream {
    pub fn new(reader: impl FrameReader + 'static, handle: impl DeviceHandle + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            handle: Box::new(handle),
        }
    }
}

/// Factory for PCM streams, called once per activation.
pub trait PcmSource: Send + Sync {
    fn open(&self, sample_rate: u32, frame_size: usize) -> Result<PcmStream>;
}

/// Device buffer size (in frames) to request: at least two analysis frames,
/// never below the platform minimum, never above its maximum.
pub fn requested_buffer_size(frame_size: usize, platform_min: u32, platform_max: u32) -> u32 {
    let wanted = (frame_size as u32).saturating_mul(2).max(platform_min);
    wanted.min(platform_max.max(platform_min))
}
