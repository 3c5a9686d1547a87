use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig, SupportedBufferSize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::source::{requested_buffer_size, DeviceHandle, FrameReader, PcmSource, PcmStream, ReadError};
use crate::error::{CaptureError, Result};

/// Callback chunks buffered between the device and the capture thread.
const CHUNK_QUEUE: usize = 64;

enum Chunk {
    Samples(Vec<i16>),
    Error(String),
}

// cpal::Stream is not Send: each open device gets an owner thread that
// builds the stream and drops it on close.
#[derive(Clone, Debug, Default)]
pub struct MicrophoneSource {
    device_name: Option<String>,
}

impl MicrophoneSource {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }
}

impl PcmSource for MicrophoneSource {
    fn open(&self, sample_rate: u32, frame_size: usize) -> Result<PcmStream> {
        let (chunk_tx, chunk_rx) = mpsc::sync_channel(CHUNK_QUEUE);
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let (close_tx, close_rx) = mpsc::channel::<()>();
        let dropped = Arc::new(AtomicU64::new(0));
        let dropped_in_callback = Arc::clone(&dropped);
        let device_name = self.device_name.clone();

        let owner = thread::Builder::new()
            .name("mic-device".into())
            .spawn(move || {
                let stream = match build_stream(
                    device_name.as_deref(),
                    sample_rate,
                    frame_size,
                    chunk_tx,
                    dropped_in_callback,
                ) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // Returns once the handle sends or is dropped.
                let _ = close_rx.recv();
                drop(stream);
            })
            .map_err(|e| CaptureError::DeviceInit(format!("failed to spawn device thread: {}", e)))?;

        let ready = ready_rx.recv().unwrap_or_else(|_| {
            Err(CaptureError::DeviceInit("device thread exited during setup".into()))
        });
        if let Err(err) = ready {
            let _ = owner.join();
            return Err(err);
        }

        Ok(PcmStream::new(
            MicReader {
                rx: chunk_rx,
                pending: VecDeque::with_capacity(frame_size * 2),
            },
            MicHandle {
                close_tx: Some(close_tx),
                owner: Some(owner),
                dropped,
            },
        ))
    }
}

struct MicReader {
    rx: Receiver<Chunk>,
    pending: VecDeque<i16>,
}

impl FrameReader for MicReader {
    fn read_frame(&mut self, frame: &mut [i16]) -> std::result::Result<(), ReadError> {
        while self.pending.len() < frame.len() {
            match self.rx.recv() {
                Ok(Chunk::Samples(samples)) => self.pending.extend(samples),
                Ok(Chunk::Error(message)) => return Err(ReadError::Device(message)),
                Err(_) => return Err(ReadError::EndOfStream),
            }
        }
        let len = frame.len();
        for (dst, src) in frame.iter_mut().zip(self.pending.drain(..len)) {
            *dst = src;
        }
        Ok(())
    }
}

struct MicHandle {
    close_tx: Option<Sender<()>>,
    owner: Option<JoinHandle<()>>,
    dropped: Arc<AtomicU64>,
}

impl DeviceHandle for MicHandle {
    fn close(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
        if let Some(owner) = self.owner.take() {
            if owner.join().is_err() {
                log::warn!("Microphone device thread panicked");
            }
            let dropped = self.dropped.load(Ordering::Relaxed);
            if dropped > 0 {
                log::warn!("Dropped {} audio chunks while the capture thread lagged", dropped);
            }
        }
    }
}

impl Drop for MicHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_stream(
    device_name: Option<&str>,
    sample_rate: u32,
    frame_size: usize,
    tx: SyncSender<Chunk>,
    dropped: Arc<AtomicU64>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = find_device(&host, device_name)?;

    let supported = device
        .supported_input_configs()
        .map_err(init_error)?
        .filter(|c| c.min_sample_rate().0 <= sample_rate && sample_rate <= c.max_sample_rate().0)
        .min_by_key(|c| c.channels())
        .ok_or_else(|| {
            CaptureError::DeviceInit(format!("no input configuration supports {} Hz", sample_rate))
        })?
        .with_sample_rate(cpal::SampleRate(sample_rate));

    let buffer_size = match supported.buffer_size() {
        SupportedBufferSize::Range { min, max } => {
            cpal::BufferSize::Fixed(requested_buffer_size(frame_size, *min, *max))
        }
        SupportedBufferSize::Unknown => cpal::BufferSize::Default,
    };
    let config = StreamConfig {
        channels: supported.channels(),
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size,
    };

    log::info!(
        "Microphone: {} @ {}Hz, {} channel(s), {:?}, buffer {:?}",
        device.name().unwrap_or_else(|_| "Unknown".to_string()),
        sample_rate,
        config.channels,
        supported.sample_format(),
        config.buffer_size
    );

    let stream = match supported.sample_format() {
        SampleFormat::I16 => build_typed::<i16>(&device, &config, tx, dropped),
        SampleFormat::U16 => build_typed::<u16>(&device, &config, tx, dropped),
        SampleFormat::F32 => build_typed::<f32>(&device, &config, tx, dropped),
        other => Err(CaptureError::DeviceInit(format!(
            "unsupported sample format {:?}",
            other
        ))),
    }?;

    stream.play().map_err(init_error)?;
    Ok(stream)
}

fn build_typed<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    tx: SyncSender<Chunk>,
    dropped: Arc<AtomicU64>,
) -> Result<cpal::Stream>
where
    T: SizedSample + 'static,
    i16: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    let err_tx = tx.clone();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let chunk = downmix::<T>(data, channels);
                if let Err(TrySendError::Full(_)) = tx.try_send(Chunk::Samples(chunk)) {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
            },
            move |err| {
                let _ = err_tx.try_send(Chunk::Error(err.to_string()));
            },
            None,
        )
        .map_err(init_error)
}

fn downmix<T>(data: &[T], channels: usize) -> Vec<i16>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    data.chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i16::from_sample(s) as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

fn find_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device> {
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceInit("no default input device".into())),
        Some(wanted) => host
            .input_devices()
            .map_err(init_error)?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| CaptureError::DeviceInit(format!("input device '{}' not found", wanted))),
    }
}

fn init_error(err: impl std::fmt::Display) -> CaptureError {
    CaptureError::DeviceInit(err.to_string())
}

/// An input device as reported by the platform host.
#[derive(Debug)]
pub struct InputDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub default_sample_rate: Option<u32>,
    pub max_channels: u16,
}

pub fn list_devices() -> Result<Vec<InputDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut infos = Vec::new();
    for device in host.input_devices().map_err(init_error)? {
        let name = device.name().unwrap_or_else(|_| "Unknown Device".to_string());
        let default_sample_rate = device.default_input_config().ok().map(|c| c.sample_rate().0);
        let max_channels = device
            .supported_input_configs()
            .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
            .unwrap_or(0);

        infos.push(InputDeviceInfo {
            is_default: default_name.as_deref() == Some(name.as_str()),
            name,
            default_sample_rate,
            max_channels,
        });
    }
    Ok(infos)
}
