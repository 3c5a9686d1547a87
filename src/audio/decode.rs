use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::source::{DeviceHandle, FrameReader, PcmSource, PcmStream, ReadError};
use crate::error::{CaptureError, Result};

pub struct AudioData {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

pub fn decode_audio(path: &Path) -> Result<AudioData> {
    let file = std::fs::File::open(path).map_err(|e| {
        CaptureError::DeviceInit(format!("failed to open audio file {}: {}", path.display(), e))
    })?;

    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| decode_error("failed to probe audio format", e))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| CaptureError::DeviceInit("no audio tracks found".into()))?;

    let track_id = track.id;
    let channels = track.codec_params.channels.map_or(1, |c| c.count());
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| CaptureError::DeviceInit("unknown sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| decode_error("failed to create audio decoder", e))?;

    let mut all_samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(decode_error("failed to read packet", e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
            Err(e) => return Err(decode_error("failed to decode packet", e)),
        };

        let spec = *decoded.spec();
        let num_frames = decoded.frames();

        let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);

        let samples = sample_buf.samples();

        // Downmix to mono
        if channels == 1 {
            all_samples.extend_from_slice(samples);
        } else {
            for frame_samples in samples.chunks(channels) {
                let mono: f32 = frame_samples.iter().sum::<f32>() / channels as f32;
                all_samples.push(mono);
            }
        }
    }

    log::info!(
        "Decoded audio: {} samples, {}Hz, {:.1}s",
        all_samples.len(),
        sample_rate,
        all_samples.len() as f32 / sample_rate as f32
    );

    Ok(AudioData {
        samples: all_samples,
        sample_rate,
    })
}

fn decode_error(what: &str, err: symphonia::core::errors::Error) -> CaptureError {
    CaptureError::DeviceInit(format!("{}: {}", what, err))
}

/// Linear-interpolation resample and conversion to i16.
pub fn to_pcm16(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<i16> {
    let quantize = |s: f32| (s * 32767.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;

    if from_rate == to_rate || samples.is_empty() {
        return samples.iter().map(|&s| quantize(s)).collect();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx];
            let b = samples.get(idx + 1).copied().unwrap_or(a);
            quantize(a + (b - a) * frac)
        })
        .collect()
}

/// PCM source backed by an audio file. Each activation decodes the file and
/// replays it from the start, optionally paced to wall-clock time.
#[derive(Clone, Debug)]
pub struct FileSource {
    path: PathBuf,
    realtime: bool,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>, realtime: bool) -> Self {
        Self {
            path: path.into(),
            realtime,
        }
    }
}

impl PcmSource for FileSource {
    fn open(&self, sample_rate: u32, frame_size: usize) -> Result<PcmStream> {
        let audio = decode_audio(&self.path)?;
        if audio.sample_rate != sample_rate {
            log::info!("Resampling {}Hz -> {}Hz", audio.sample_rate, sample_rate);
        }
        let samples = to_pcm16(&audio.samples, audio.sample_rate, sample_rate);

        let closed = Arc::new(AtomicBool::new(false));
        let pace = self
            .realtime
            .then(|| Duration::from_secs_f64(frame_size as f64 / sample_rate as f64));

        Ok(PcmStream::new(
            FileReader {
                samples,
                position: 0,
                pace,
                next_deadline: None,
                closed: Arc::clone(&closed),
            },
            FileHandle { closed },
        ))
    }
}

struct FileReader {
    samples: Vec<i16>,
    position: usize,
    pace: Option<Duration>,
    next_deadline: Option<Instant>,
    closed: Arc<AtomicBool>,
}

impl FrameReader for FileReader {
    fn read_frame(&mut self, frame: &mut [i16]) -> std::result::Result<(), ReadError> {
        if self.closed.load(Ordering::Acquire) || self.position >= self.samples.len() {
            return Err(ReadError::EndOfStream);
        }

        if let Some(pace) = self.pace {
            let deadline = self.next_deadline.unwrap_or_else(Instant::now) + pace;
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
            self.next_deadline = Some(deadline);
        }

        let end = (self.position + frame.len()).min(self.samples.len());
        let available = &self.samples[self.position..end];
        frame[..available.len()].copy_from_slice(available);
        // The final partial frame is zero-padded.
        frame[available.len()..].fill(0);
        self.position = end;
        Ok(())
    }
}

struct FileHandle {
    closed: Arc<AtomicBool>,
}

impl DeviceHandle for FileHandle {
    fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_wav(path: &Path, sample_rate: u32, samples: &[i16]) {
        let data_len = (samples.len() * 2) as u32;
        let mut bytes = Vec::with_capacity(44 + data_len as usize);
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
        bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
        bytes.extend_from_slice(&sample_rate.to_le_bytes());
        bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        let mut file = std::fs::File::create(path).unwrap();
        file.write_all(&bytes).unwrap();
    }

    fn temp_wav(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("bandstream-{}-{}.wav", name, std::process::id()))
    }

    #[test]
    fn replays_file_in_frames_then_ends() {
        let path = temp_wav("replay");
        let samples: Vec<i16> = (0..2100).map(|i| (i % 100) as i16 * 100).collect();
        write_wav(&path, 44100, &samples);

        let mut stream = FileSource::new(&path, false).open(44100, 1024).unwrap();
        let mut frame = vec![0i16; 1024];

        stream.reader.read_frame(&mut frame).unwrap();
        assert_eq!(&frame[..], &samples[..1024]);
        stream.reader.read_frame(&mut frame).unwrap();
        assert_eq!(&frame[..], &samples[1024..2048]);
        stream.reader.read_frame(&mut frame).unwrap();
        assert_eq!(&frame[..52], &samples[2048..]);
        assert!(frame[52..].iter().all(|&s| s == 0));
        assert_eq!(stream.reader.read_frame(&mut frame), Err(ReadError::EndOfStream));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn close_ends_the_stream() {
        let path = temp_wav("close");
        write_wav(&path, 44100, &vec![1000i16; 4096]);

        let mut stream = FileSource::new(&path, false).open(44100, 1024).unwrap();
        let mut frame = vec![0i16; 1024];
        stream.reader.read_frame(&mut frame).unwrap();
        stream.handle.close();
        assert_eq!(stream.reader.read_frame(&mut frame), Err(ReadError::EndOfStream));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_file_is_an_init_failure() {
        let err = FileSource::new("/nonexistent/bandstream.wav", false)
            .open(44100, 1024)
            .err()
            .unwrap();
        assert!(matches!(err, CaptureError::DeviceInit(_)));
    }

    #[test]
    fn resample_halves_length() {
        let samples: Vec<f32> = (0..1000).map(|i| i as f32 / 1000.0).collect();
        let out = to_pcm16(&samples, 48000, 24000);
        assert_eq!(out.len(), 500);
        assert_eq!(out[0], 0);
        assert_eq!(out[250], (0.5f32 * 32767.0).round() as i16);
    }

    #[test]
    fn quantize_clamps_full_scale() {
        assert_eq!(to_pcm16(&[1.5, -1.5, 0.0], 8000, 8000), vec![i16::MAX, i16::MIN, 0]);
    }
}
