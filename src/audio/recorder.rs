//! Microphone capture, chunking and upload dispatch.
//!
//! [`Recorder`] owns the cpal input device and stream.  The hardware
//! callback delivers small `f32` blocks at arbitrary times; the recorder
//! converts them to i16, accumulates them, resamples to the service rate
//! and emits fixed-duration chunks to a [`ChunkSink`].  Chunk dispatch is a
//! channel send, so the audio callback never blocks on network I/O.
//!
//! `cpal::Stream` is not `Send`, so a `Recorder` must live on the thread
//! that created it (the application event loop).

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, StreamTrait};
use thiserror::Error;

use crate::audio::device::{pick_input_device, DeviceError};
use crate::audio::resample::resample;
use crate::audio::stats;
use crate::audio::wav::encode_wav;
use crate::config::AudioConfig;

// ---------------------------------------------------------------------------
// ChunkSink
// ---------------------------------------------------------------------------

/// Consumer of the recorder's output chunks.
///
/// Implementations must be non-blocking: both methods are called from the
/// audio callback thread (or the stop path) and may only do cheap work such
/// as pushing onto a channel.
pub trait ChunkSink: Send + Sync {
    /// A chunk of target-rate samples for `request_id`.  `is_last` marks the
    /// flushed remainder emitted on stop.
    fn on_audio_chunk(&self, request_id: &str, samples: &[i16], is_last: bool);

    /// The capture session for `request_id` ended with no buffered audio
    /// left to flush.
    fn on_capture_complete(&self, request_id: &str);
}

// ---------------------------------------------------------------------------
// RecorderError
// ---------------------------------------------------------------------------

/// Errors that can occur while setting up or running audio capture.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("audio input not initialized")]
    NotInitialized,

    #[error("a capture session is already in progress")]
    Busy,

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("failed to encode wav: {0}")]
    Wav(#[from] hound::Error),

    #[error("failed to write recording: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// CaptureSession
// ---------------------------------------------------------------------------

/// Buffers owned by one capture session, reset when the session ends.
#[derive(Debug, Default)]
struct CaptureSession {
    /// Correlates every chunk of this session to one transport exchange.
    request_id: String,
    /// Capture-rate samples not yet resampled.
    accum: Vec<i16>,
    /// Target-rate samples not yet emitted as a full chunk.
    resampled: Vec<i16>,
}

impl CaptureSession {
    fn new(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            ..Self::default()
        }
    }
}

/// Slice full chunk-durations out of the accumulation buffer, resample them
/// and return every complete target-rate chunk now ready for dispatch.
///
/// One chunk duration is measured at the *actual* capture rate; the output
/// chunks hold `chunk_samples` target-rate samples each.
fn drain_ready_chunks(
    session: &mut CaptureSession,
    capture_rate: u32,
    output_rate: u32,
    chunk_duration_ms: u64,
    chunk_samples: usize,
) -> Vec<Vec<i16>> {
    let capture_chunk = (capture_rate as u64 * chunk_duration_ms / 1000) as usize;
    if capture_chunk == 0 || chunk_samples == 0 {
        return Vec::new();
    }

    let mut ready = Vec::new();
    while session.accum.len() >= capture_chunk {
        let block: Vec<i16> = session.accum.drain(..capture_chunk).collect();
        let converted = resample(&block, capture_rate, output_rate);
        session.resampled.extend_from_slice(&converted);

        while session.resampled.len() >= chunk_samples {
            ready.push(session.resampled.drain(..chunk_samples).collect());
        }
    }
    ready
}

/// Flush a finished session: resample whatever is left in the accumulation
/// buffer and dispatch the combined remainder as a final chunk, or a bare
/// completion notice when the session captured nothing.
fn finish_session(
    mut session: CaptureSession,
    capture_rate: u32,
    output_rate: u32,
    sink: &dyn ChunkSink,
) {
    if !session.accum.is_empty() {
        let tail = resample(&session.accum, capture_rate, output_rate);
        session.resampled.extend_from_slice(&tail);
    }

    if session.resampled.is_empty() {
        log::warn!(
            "capture session {} ended with no audio",
            session.request_id
        );
        sink.on_capture_complete(&session.request_id);
        return;
    }

    log_chunk_stats(&session.request_id, &session.resampled, true);
    sink.on_audio_chunk(&session.request_id, &session.resampled, true);
}

fn log_chunk_stats(request_id: &str, samples: &[i16], is_last: bool) {
    if log::log_enabled!(log::Level::Debug) {
        let s = stats::analyze(samples, 100);
        log::debug!(
            "chunk for {request_id}: {} samples, rms {:.1}, peak {}, silence {:.2}, last={is_last}",
            s.total_samples,
            s.rms,
            s.peak,
            s.silence_ratio
        );
    }
}

#[inline]
fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Pick the rate to open a capture stream at, plus an optional fallback for
/// one retry when the first open is rejected.
///
/// When the device default already matches the service rate, opening there
/// makes resampling an identity and avoids mislabeling a silently
/// substituted hardware rate; no fallback is needed.  Otherwise the
/// configured capture rate is tried first, falling back to the device
/// default when they differ.
fn rate_plan(device_default: u32, service_rate: u32, capture_rate: u32) -> (u32, Option<u32>) {
    if device_default == service_rate || capture_rate == device_default {
        (device_default, None)
    } else {
        (capture_rate, Some(device_default))
    }
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

/// Capture device binding plus the chunking pipeline.
///
/// Construction is cheap; [`initialize`](Self::initialize) binds the input
/// device and must succeed before any recording call.
pub struct Recorder {
    config: AudioConfig,
    sink: Arc<dyn ChunkSink>,
    device: Option<cpal::Device>,
    stream: Option<cpal::Stream>,
    session: Arc<Mutex<Option<CaptureSession>>>,
    recording: Arc<AtomicBool>,
    /// Rate the open stream actually runs at; authoritative for resampling.
    actual_rate: Arc<AtomicU32>,
}

impl Recorder {
    pub fn new(config: AudioConfig, sink: Arc<dyn ChunkSink>) -> Self {
        Self {
            config,
            sink,
            device: None,
            stream: None,
            session: Arc::new(Mutex::new(None)),
            recording: Arc::new(AtomicBool::new(false)),
            actual_rate: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Bind the best-scoring input device.  Idempotent.
    ///
    /// # Errors
    ///
    /// Device discovery failure is fatal; there is no point running without
    /// a microphone.
    pub fn initialize(&mut self) -> Result<(), RecorderError> {
        if self.device.is_some() {
            log::debug!("recorder already initialized");
            return Ok(());
        }

        let host = cpal::default_host();
        let device = pick_input_device(&host)?;
        if let Ok(cfg) = device.default_input_config() {
            log::info!(
                "input device ready ({} ch, default {} Hz)",
                cfg.channels(),
                cfg.sample_rate().0
            );
        }
        self.device = Some(device);
        Ok(())
    }

    /// Whether a capture session is currently running.
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Acquire)
    }

    /// Capture rate of the most recently opened stream, 0 if none yet.
    pub fn actual_capture_rate(&self) -> u32 {
        self.actual_rate.load(Ordering::Acquire)
    }

    /// Begin a capture session streaming chunks tagged with `request_id`.
    ///
    /// Starting while already recording is a no-op (logged).  The stream is
    /// opened at the device default rate when it matches the service rate;
    /// otherwise at the configured capture rate, with one fallback retry at
    /// the device default.
    pub fn start_recording(&mut self, request_id: &str) -> Result<(), RecorderError> {
        if self.recording.load(Ordering::Acquire) {
            log::warn!("start ignored, capture already running");
            return Ok(());
        }
        let device = self.device.as_ref().ok_or(RecorderError::NotInitialized)?;

        let device_default = device.default_input_config()?.sample_rate().0;
        let (preferred, fallback) = rate_plan(
            device_default,
            self.config.sample_rate,
            self.config.capture_sample_rate,
        );

        {
            let mut guard = self.session.lock().unwrap();
            *guard = Some(CaptureSession::new(request_id));
        }

        let stream = match self.build_capture_stream(device, preferred) {
            Ok(stream) => {
                self.actual_rate.store(preferred, Ordering::Release);
                stream
            }
            Err(e) => match fallback {
                Some(fb) => {
                    log::warn!(
                        "capture at {preferred} Hz rejected ({e}), retrying at device default \
                         {fb} Hz"
                    );
                    let stream = self.build_capture_stream(device, fb)?;
                    self.actual_rate.store(fb, Ordering::Release);
                    stream
                }
                None => return Err(e.into()),
            },
        };

        self.recording.store(true, Ordering::Release);
        if let Err(e) = stream.play() {
            self.recording.store(false, Ordering::Release);
            self.session.lock().unwrap().take();
            return Err(e.into());
        }
        self.stream = Some(stream);

        log::info!(
            "recording started for {request_id} at {} Hz",
            self.actual_rate.load(Ordering::Acquire)
        );
        Ok(())
    }

    /// End the current capture session, flushing any buffered remainder as
    /// a final `is_last` chunk.  Stopping while idle is a no-op.
    pub fn stop_recording(&mut self) {
        if !self.recording.swap(false, Ordering::AcqRel) {
            log::debug!("stop ignored, no capture running");
            return;
        }

        // Dropping the stream stops the callback before the flush below
        // touches the session buffers.
        self.stream = None;

        let session = self.session.lock().unwrap().take();
        if let Some(session) = session {
            let rate = self.actual_rate.load(Ordering::Acquire);
            log::info!("recording stopped for {}", session.request_id);
            finish_session(session, rate, self.config.sample_rate, self.sink.as_ref());
        }
    }

    /// Record `duration_secs` of audio to a WAV file at `path`, blocking the
    /// caller for the duration.  Used for microphone checkout from the
    /// console.
    pub fn test_recording(&mut self, duration_secs: u64, path: &Path) -> Result<(), RecorderError> {
        if self.recording.load(Ordering::Acquire) {
            return Err(RecorderError::Busy);
        }
        self.initialize()?;
        let device = self.device.as_ref().ok_or(RecorderError::NotInitialized)?;

        let device_default = device.default_input_config()?.sample_rate().0;
        let (preferred, fallback) = rate_plan(
            device_default,
            self.config.sample_rate,
            self.config.capture_sample_rate,
        );

        let captured = Arc::new(Mutex::new(Vec::<i16>::new()));
        let build = |rate: u32| -> Result<cpal::Stream, cpal::BuildStreamError> {
            let captured = Arc::clone(&captured);
            let stream_config = cpal::StreamConfig {
                channels: 1,
                sample_rate: cpal::SampleRate(rate),
                buffer_size: cpal::BufferSize::Default,
            };
            device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = captured.lock() {
                        buf.extend(data.iter().copied().map(f32_to_i16));
                    }
                },
                |err: cpal::StreamError| log::error!("test capture stream error: {err}"),
                None,
            )
        };
        let (stream, rate) = match build(preferred) {
            Ok(stream) => (stream, preferred),
            Err(e) => match fallback {
                Some(fb) => {
                    log::warn!(
                        "test capture at {preferred} Hz rejected ({e}), retrying at device \
                         default {fb} Hz"
                    );
                    (build(fb)?, fb)
                }
                None => return Err(e.into()),
            },
        };
        stream.play()?;

        log::info!("test recording for {duration_secs}s at {rate} Hz...");
        std::thread::sleep(std::time::Duration::from_secs(duration_secs));
        drop(stream);

        let raw = std::mem::take(&mut *captured.lock().unwrap());
        let samples = resample(&raw, rate, self.config.sample_rate);

        let s = stats::analyze(&samples, 100);
        log::info!(
            "test recording captured {} samples (rms {:.1}, peak {})",
            s.total_samples,
            s.rms,
            s.peak
        );

        let wav = encode_wav(&samples, self.config.sample_rate, self.config.channels)?;
        std::fs::write(path, wav)?;
        log::info!("test recording written to {}", path.display());
        Ok(())
    }

    fn build_capture_stream(
        &self,
        device: &cpal::Device,
        rate: u32,
    ) -> Result<cpal::Stream, cpal::BuildStreamError> {
        let stream_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let recording = Arc::clone(&self.recording);
        let session = Arc::clone(&self.session);
        let sink = Arc::clone(&self.sink);
        let output_rate = self.config.sample_rate;
        let chunk_duration_ms = self.config.chunk_duration_ms;
        let chunk_samples = self.config.chunk_samples();

        device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                if !recording.load(Ordering::Acquire) {
                    return;
                }

                // Collect ready chunks under the lock, dispatch outside it.
                let (ready, request_id) = {
                    let Ok(mut guard) = session.lock() else {
                        return;
                    };
                    let Some(sess) = guard.as_mut() else {
                        return;
                    };
                    sess.accum.extend(data.iter().copied().map(f32_to_i16));
                    let ready = drain_ready_chunks(
                        sess,
                        rate,
                        output_rate,
                        chunk_duration_ms,
                        chunk_samples,
                    );
                    let request_id = if ready.is_empty() {
                        String::new()
                    } else {
                        sess.request_id.clone()
                    };
                    (ready, request_id)
                };

                for chunk in ready {
                    log_chunk_stats(&request_id, &chunk, false);
                    sink.on_audio_chunk(&request_id, &chunk, false);
                }
            },
            |err: cpal::StreamError| log::error!("capture stream error: {err}"),
            None,
        )
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.is_recording() {
            self.stop_recording();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every sink call for later assertions.
    #[derive(Default)]
    struct MockSink {
        chunks: Mutex<Vec<(String, Vec<i16>, bool)>>,
        completions: Mutex<Vec<String>>,
    }

    impl ChunkSink for MockSink {
        fn on_audio_chunk(&self, request_id: &str, samples: &[i16], is_last: bool) {
            self.chunks
                .lock()
                .unwrap()
                .push((request_id.to_string(), samples.to_vec(), is_last));
        }

        fn on_capture_complete(&self, request_id: &str) {
            self.completions.lock().unwrap().push(request_id.to_string());
        }
    }

    // ---- f32 conversion ----------------------------------------------------

    #[test]
    fn f32_conversion_clamps_and_scales() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(1.0), 32_767);
        assert_eq!(f32_to_i16(-1.0), -32_767);
        assert_eq!(f32_to_i16(2.0), 32_767);
        assert_eq!(f32_to_i16(-2.0), -32_768);
    }

    // ---- rate negotiation --------------------------------------------------

    #[test]
    fn rate_plan_prefers_matching_device_default_without_fallback() {
        assert_eq!(rate_plan(16_000, 16_000, 48_000), (16_000, None));
    }

    #[test]
    fn rate_plan_tries_capture_rate_then_device_default() {
        // Both streaming capture and the console test recording open with
        // this plan, so a device that rejects 48 kHz still records after
        // the one retry at its default rate.
        assert_eq!(rate_plan(44_100, 16_000, 48_000), (48_000, Some(44_100)));
    }

    #[test]
    fn rate_plan_skips_redundant_fallback() {
        assert_eq!(rate_plan(48_000, 16_000, 48_000), (48_000, None));
    }

    // ---- chunking ----------------------------------------------------------

    #[test]
    fn identity_rate_emits_exactly_one_chunk_per_duration() {
        // Capture rate == output rate, so resampling is identity and K full
        // chunk-durations of input yield exactly K chunks.
        let mut session = CaptureSession::new("req-1");
        let chunk_samples = 3_200; // 200 ms at 16 kHz

        let mut total = Vec::new();
        for k in 0..4 {
            let block: Vec<i16> = (0..chunk_samples).map(|i| (k * 7 + i % 100) as i16).collect();
            session.accum.extend_from_slice(&block);
            let ready = drain_ready_chunks(&mut session, 16_000, 16_000, 200, chunk_samples);
            assert_eq!(ready.len(), 1, "iteration {k}");
            assert_eq!(ready[0].len(), chunk_samples);
            assert_eq!(ready[0], block);
            total.extend(ready);
        }
        assert_eq!(total.len(), 4);
        assert!(session.accum.is_empty());
        assert!(session.resampled.is_empty());
    }

    #[test]
    fn partial_duration_emits_nothing() {
        let mut session = CaptureSession::new("req-1");
        session.accum.extend(vec![5i16; 3_199]);
        let ready = drain_ready_chunks(&mut session, 16_000, 16_000, 200, 3_200);
        assert!(ready.is_empty());
        assert_eq!(session.accum.len(), 3_199);
    }

    #[test]
    fn downsampling_accumulates_until_output_chunk_fills() {
        // 48 kHz capture, 16 kHz output: one 200 ms capture slice (9600
        // samples) resamples to one full 3200-sample output chunk.
        let mut session = CaptureSession::new("req-1");
        session.accum.extend(vec![100i16; 9_600]);
        let ready = drain_ready_chunks(&mut session, 48_000, 16_000, 200, 3_200);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].len(), 3_200);
        assert!(ready[0].iter().all(|&s| s == 100));
    }

    #[test]
    fn oversized_backlog_drains_multiple_chunks_at_once() {
        let mut session = CaptureSession::new("req-1");
        session.accum.extend(vec![1i16; 3_200 * 3 + 10]);
        let ready = drain_ready_chunks(&mut session, 16_000, 16_000, 200, 3_200);
        assert_eq!(ready.len(), 3);
        assert_eq!(session.accum.len(), 10);
    }

    // ---- stop flush --------------------------------------------------------

    #[test]
    fn finish_flushes_remainder_as_last_chunk() {
        let sink = MockSink::default();
        let mut session = CaptureSession::new("req-9");
        session.accum.extend(vec![42i16; 1_000]);
        session.resampled.extend(vec![7i16; 50]);

        finish_session(session, 16_000, 16_000, &sink);

        let chunks = sink.chunks.lock().unwrap();
        assert_eq!(chunks.len(), 1);
        let (id, samples, is_last) = &chunks[0];
        assert_eq!(id, "req-9");
        assert!(*is_last);
        assert_eq!(samples.len(), 1_050);
        assert_eq!(samples[0], 7);
        assert_eq!(samples[50], 42);
        assert!(sink.completions.lock().unwrap().is_empty());
    }

    #[test]
    fn finish_with_no_audio_sends_completion_only() {
        let sink = MockSink::default();
        finish_session(CaptureSession::new("req-0"), 16_000, 16_000, &sink);

        assert!(sink.chunks.lock().unwrap().is_empty());
        assert_eq!(*sink.completions.lock().unwrap(), vec!["req-0".to_string()]);
    }

    #[test]
    fn finish_resamples_remainder_at_actual_rate() {
        // 48 kHz remainder shrinks by 3x on flush.
        let sink = MockSink::default();
        let mut session = CaptureSession::new("req-2");
        session.accum.extend(vec![300i16; 900]);

        finish_session(session, 48_000, 16_000, &sink);

        let chunks = sink.chunks.lock().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].1.len(), 300);
    }

    // ---- stop while idle ---------------------------------------------------

    #[test]
    fn stop_without_start_is_a_no_op() {
        let sink = Arc::new(MockSink::default());
        let mut recorder = Recorder::new(AudioConfig::default(), sink.clone());
        recorder.stop_recording();
        assert!(!recorder.is_recording());
        assert!(sink.chunks.lock().unwrap().is_empty());
        assert!(sink.completions.lock().unwrap().is_empty());
    }

    #[test]
    fn start_without_initialize_fails() {
        let sink = Arc::new(MockSink::default());
        let mut recorder = Recorder::new(AudioConfig::default(), sink);
        assert!(matches!(
            recorder.start_recording("req-1"),
            Err(RecorderError::NotInitialized)
        ));
    }
}
