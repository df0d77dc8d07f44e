//! Audio output devices
//!
//! Devices are opened on the playback thread and never leave it; the cpal
//! stream handle is not `Send`.

use std::collections::VecDeque;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream};

use super::{AudioFrame, SAMPLE_RATE};
use crate::{Error, Result};

/// Buffered speaker audio before writes start to block (250ms at 24 kHz)
const SPEAKER_BUFFER_SAMPLES: usize = 6_000;

/// Poll interval while waiting for buffer space
const BACKPRESSURE_POLL: Duration = Duration::from_millis(5);

/// Longest a write may wait without the stream consuming anything
const STALL_TIMEOUT: Duration = Duration::from_secs(1);

/// Extra drain time on top of the queued audio's duration
const DRAIN_MARGIN: Duration = Duration::from_millis(500);

/// Something that renders PCM audio
pub trait OutputDevice {
    /// Write one frame, blocking while the device is saturated
    ///
    /// # Errors
    ///
    /// Returns error if the device failed; the caller reopens it
    fn write(&mut self, frame: &AudioFrame) -> Result<()>;

    /// Discard audio written but not yet rendered
    ///
    /// # Errors
    ///
    /// Returns error if the device failed
    fn flush(&mut self) -> Result<()>;

    /// Block until everything written has been rendered
    ///
    /// # Errors
    ///
    /// Returns error if the device failed
    fn drain(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Where synthesized speech goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// Default system output device
    Speaker,
    /// A WAV file
    Wav(PathBuf),
    /// Nowhere
    Null,
}

impl OutputTarget {
    /// Open the device for this target
    ///
    /// # Errors
    ///
    /// Returns error if the device or file cannot be opened
    pub fn open(&self) -> Result<Box<dyn OutputDevice>> {
        Ok(match self {
            Self::Speaker => Box::new(SpeakerDevice::open()?),
            Self::Wav(path) => Box::new(WavRecorder::create(path)?),
            Self::Null => Box::new(NullDevice),
        })
    }
}

/// Sample queue shared between the speaker and the cpal callbacks
///
/// The stream's error callback records a failure here; once set, every
/// write and drain reports it so the playback worker reopens the device.
struct RingBuffer {
    samples: Mutex<VecDeque<f32>>,
    capacity: usize,
    failure: Mutex<Option<String>>,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            failure: Mutex::new(None),
        }
    }

    fn fail(&self, reason: String) {
        if let Ok(mut failure) = self.failure.lock() {
            failure.get_or_insert(reason);
        }
    }

    fn check(&self) -> Result<()> {
        match self.failure.lock() {
            Ok(failure) => failure
                .as_ref()
                .map_or(Ok(()), |reason| Err(Error::Audio(reason.clone()))),
            Err(_) => Err(Error::Audio("speaker state poisoned".to_string())),
        }
    }

    fn queue(&self) -> Result<std::sync::MutexGuard<'_, VecDeque<f32>>> {
        self.samples
            .lock()
            .map_err(|_| Error::Audio("speaker buffer poisoned".to_string()))
    }

    /// Fill one callback period, padding with silence
    fn render(&self, data: &mut [f32], channels: usize) {
        let Ok(mut queue) = self.samples.lock() else {
            data.fill(0.0);
            return;
        };
        for frame in data.chunks_mut(channels) {
            frame.fill(queue.pop_front().unwrap_or(0.0));
        }
    }

    /// Queue samples, blocking while full
    ///
    /// Fails if the stream reported an error or consumed nothing for
    /// `stall` while the buffer was full.
    fn push(&self, samples: impl Iterator<Item = f32>, stall: Duration) -> Result<()> {
        let mut pending = samples.peekable();
        let mut last_progress = Instant::now();

        while pending.peek().is_some() {
            self.check()?;
            {
                let mut queue = self.queue()?;
                let room = self.capacity.saturating_sub(queue.len());
                if room > 0 {
                    queue.extend(pending.by_ref().take(room));
                    last_progress = Instant::now();
                }
            }
            if pending.peek().is_some() {
                if last_progress.elapsed() > stall {
                    return Err(Error::Audio(format!("speaker stalled for {stall:?}")));
                }
                std::thread::sleep(BACKPRESSURE_POLL);
            }
        }

        Ok(())
    }

    /// Wait until the callback has consumed everything queued
    fn drain(&self, margin: Duration) -> Result<()> {
        let budget = playback_time(self.queue()?.len()) + margin;
        let start = Instant::now();

        loop {
            self.check()?;
            if self.queue()?.is_empty() {
                return Ok(());
            }
            if start.elapsed() > budget {
                return Err(Error::Audio(format!("speaker did not drain within {budget:?}")));
            }
            std::thread::sleep(BACKPRESSURE_POLL);
        }
    }

    fn clear(&self) -> Result<()> {
        self.queue()?.clear();
        Ok(())
    }
}

/// Time needed to play `samples` mono samples
#[allow(clippy::cast_precision_loss)]
fn playback_time(samples: usize) -> Duration {
    Duration::from_secs_f64(samples as f64 / f64::from(SAMPLE_RATE))
}

/// Default output device via cpal
pub struct SpeakerDevice {
    buffer: Arc<RingBuffer>,
    _stream: Stream,
}

impl SpeakerDevice {
    /// Open the default output device at 24 kHz
    ///
    /// # Errors
    ///
    /// Returns error if no output device or suitable config is available
    pub fn open() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let rate = SampleRate(SAMPLE_RATE);
        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| c.channels() == 1 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2 && c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
                })
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config = supported_config.with_sample_rate(rate).config();
        let channels = usize::from(config.channels);

        let buffer = Arc::new(RingBuffer::new(SPEAKER_BUFFER_SAMPLES));
        let source = Arc::clone(&buffer);
        let errors = Arc::clone(&buffer);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    source.render(data, channels);
                },
                move |err| {
                    tracing::error!(error = %err, "audio playback error");
                    errors.fail(err.to_string());
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels,
            "speaker opened"
        );

        Ok(Self {
            buffer,
            _stream: stream,
        })
    }
}

impl OutputDevice for SpeakerDevice {
    fn write(&mut self, frame: &AudioFrame) -> Result<()> {
        let samples = frame.samples().map(|s| f32::from(s) / 32768.0);
        self.buffer.push(samples, STALL_TIMEOUT)
    }

    fn flush(&mut self) -> Result<()> {
        self.buffer.clear()
    }

    fn drain(&mut self) -> Result<()> {
        self.buffer.drain(DRAIN_MARGIN)?;

        // Let the final callback period reach the hardware
        std::thread::sleep(Duration::from_millis(50));
        Ok(())
    }
}

/// Records speech to a 16-bit mono WAV file
pub struct WavRecorder {
    writer: hound::WavWriter<BufWriter<File>>,
    samples: u64,
}

impl WavRecorder {
    /// Create (or truncate) a WAV file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created
    pub fn create(path: &Path) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(path, spec)
            .map_err(|e| Error::Audio(format!("failed to create {}: {e}", path.display())))?;

        tracing::debug!(path = %path.display(), "recording speech to WAV");

        Ok(Self { writer, samples: 0 })
    }

    /// Samples written so far
    #[must_use]
    pub const fn samples_written(&self) -> u64 {
        self.samples
    }
}

impl OutputDevice for WavRecorder {
    fn write(&mut self, frame: &AudioFrame) -> Result<()> {
        for sample in frame.samples() {
            self.writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
            self.samples += 1;
        }
        Ok(())
    }

    // Written samples are already committed
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| Error::Audio(e.to_string()))
    }
}

/// Discards all audio
#[derive(Debug, Default)]
pub struct NullDevice;

impl OutputDevice for NullDevice {
    fn write(&mut self, _frame: &AudioFrame) -> Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_recorder_writes_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("speech.wav");

        {
            let mut recorder = WavRecorder::create(&path).unwrap();
            recorder.write(&AudioFrame::from_samples(0, &[1, 2, 3])).unwrap();
            recorder.write(&AudioFrame::from_samples(1, &[4])).unwrap();
            recorder.drain().unwrap();
            assert_eq!(recorder.samples_written(), 4);
        }

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, SAMPLE_RATE);
        assert_eq!(reader.spec().channels, 1);
        let samples: Vec<i16> = reader.into_samples().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, 2, 3, 4]);
    }

    fn samples(n: usize) -> impl Iterator<Item = f32> {
        std::iter::repeat_n(0.25, n)
    }

    #[test]
    fn stalled_stream_fails_write() {
        let buffer = RingBuffer::new(4);

        let started = Instant::now();
        let err = buffer.push(samples(8), Duration::from_millis(30)).unwrap_err();

        assert!(matches!(err, Error::Audio(msg) if msg.contains("stalled")));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn stream_error_fails_write_and_drain() {
        let buffer = RingBuffer::new(16);
        buffer.push(samples(4), STALL_TIMEOUT).unwrap();

        buffer.fail("device unplugged".to_string());

        assert!(matches!(
            buffer.push(samples(1), STALL_TIMEOUT),
            Err(Error::Audio(msg)) if msg == "device unplugged"
        ));
        assert!(buffer.drain(DRAIN_MARGIN).is_err());
    }

    #[test]
    fn consumed_buffer_accepts_more_than_capacity() {
        let buffer = Arc::new(RingBuffer::new(4));
        let consumer = Arc::clone(&buffer);
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let running = Arc::clone(&stop);

        let handle = std::thread::spawn(move || {
            let mut period = [0.0_f32; 2];
            while !running.load(std::sync::atomic::Ordering::SeqCst) {
                consumer.render(&mut period, 1);
                std::thread::sleep(Duration::from_millis(1));
            }
        });

        buffer.push(samples(20), STALL_TIMEOUT).unwrap();
        buffer.drain(DRAIN_MARGIN).unwrap();

        stop.store(true, std::sync::atomic::Ordering::SeqCst);
        handle.join().unwrap();
    }

    #[test]
    fn undrained_buffer_times_out() {
        let buffer = RingBuffer::new(8);
        buffer.push(samples(8), STALL_TIMEOUT).unwrap();

        assert!(buffer.drain(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn playback_time_matches_sample_rate() {
        assert_eq!(playback_time(24_000), Duration::from_secs(1));
        assert_eq!(playback_time(0), Duration::ZERO);
    }

    #[test]
    fn null_target_opens() {
        let mut device = OutputTarget::Null.open().unwrap();
        device.write(&AudioFrame::from_samples(0, &[1])).unwrap();
        device.flush().unwrap();
        device.drain().unwrap();
    }
}
