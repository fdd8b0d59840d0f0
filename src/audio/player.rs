//! Response audio playback with start-on-write and interruption.
//!
//! [`Player`] accepts arbitrary-sized byte blocks of little-endian i16 PCM
//! from the transport receive path and plays them through the default
//! output device.  The first write of a response starts a playback thread;
//! that thread owns the cpal output stream (`cpal::Stream` is not `Send`)
//! and polls a set of stop conditions every 100 ms:
//!
//! 1. the transport signalled response-complete and the ring is drained;
//! 2. no new data became readable for 5 seconds;
//! 3. ten consecutive output callbacks found the ring empty;
//! 4. the ring was closed.
//!
//! [`stop_playback`](Player::stop_playback) is the interruption path: the
//! output callback checks the interruption flag itself and goes silent on
//! its very next invocation, the run thread is joined, and only then is the
//! ring cleared so no stale bytes survive into the next response.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use crate::audio::ring::AudioRing;
use crate::config::AudioConfig;

/// Milliseconds without readable data before a run gives up.
const STALL_TIMEOUT_MS: u64 = 5_000;
/// Consecutive empty callbacks before a run gives up.
const MAX_EMPTY_READS: u32 = 10;
/// Stop-condition poll cadence.
const TICK: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// PlayerError
// ---------------------------------------------------------------------------

/// Errors raised while opening the output stream.  Playback runs on its own
/// thread, so these surface as log lines rather than caller errors.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("no output device found on the default audio host")]
    NoDevice,

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

// ---------------------------------------------------------------------------
// Player
// ---------------------------------------------------------------------------

/// Playback half of the audio pipeline.  Shareable across threads; the
/// transport receive task writes, the application loop interrupts.
pub struct Player {
    sample_rate: u32,
    ring: Arc<AudioRing>,
    playing: Arc<AtomicBool>,
    complete: Arc<AtomicBool>,
    interrupted: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Player {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            ring: Arc::new(AudioRing::new(config.playback_buffer_bytes())),
            playing: Arc::new(AtomicBool::new(false)),
            complete: Arc::new(AtomicBool::new(false)),
            interrupted: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    /// Append response bytes and start a playback run if none is active.
    ///
    /// A full ring drops the overflow (the ring holds many seconds of audio;
    /// persistent fullness means the output device stalled).
    pub fn write_audio_data(&self, data: &[u8]) {
        let written = self.ring.write(data);
        if written < data.len() {
            log::warn!(
                "playback buffer full, dropped {} of {} bytes",
                data.len() - written,
                data.len()
            );
        }

        let mut thread = self.thread.lock().unwrap();
        if self.playing.load(Ordering::Acquire) {
            return;
        }
        // Reap a run that ended on its own before starting the next one.
        if let Some(handle) = thread.take() {
            let _ = handle.join();
        }

        self.playing.store(true, Ordering::Release);
        self.interrupted.store(false, Ordering::Release);

        let run = PlaybackRun {
            sample_rate: self.sample_rate,
            ring: Arc::clone(&self.ring),
            playing: Arc::clone(&self.playing),
            complete: Arc::clone(&self.complete),
            interrupted: Arc::clone(&self.interrupted),
        };
        *thread = Some(
            std::thread::Builder::new()
                .name("playback".into())
                .spawn(move || run.run())
                .expect("failed to spawn playback thread"),
        );
    }

    /// Mark whether the transport has delivered the last chunk of the
    /// current response.  With `true` set, playback ends as soon as the
    /// ring drains.
    pub fn set_audio_complete(&self, complete: bool) {
        self.complete.store(complete, Ordering::Release);
    }

    /// Whether a playback run is currently active.
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Unplayed bytes currently buffered.
    pub fn buffered_bytes(&self) -> usize {
        self.ring.len()
    }

    /// Interrupt playback immediately.
    ///
    /// Aborts the active run (buffered audio is not drained), waits for the
    /// playback thread to exit, then clears the ring and resets the
    /// completion flag.  Clearing only after the join means no stale bytes
    /// can be consumed after this call returns.
    pub fn stop_playback(&self) {
        let handle = {
            let mut thread = self.thread.lock().unwrap();
            if self.playing.load(Ordering::Acquire) {
                self.interrupted.store(true, Ordering::Release);
            }
            thread.take()
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        self.ring.clear();
        self.complete.store(false, Ordering::Release);
    }

    /// Terminal shutdown: interrupt any run and close the ring so later
    /// writes are rejected.
    pub fn stop(&self) {
        self.stop_playback();
        self.ring.close();
    }
}

// ---------------------------------------------------------------------------
// PlaybackRun
// ---------------------------------------------------------------------------

/// State for one playback run; owned by the playback thread.
struct PlaybackRun {
    sample_rate: u32,
    ring: Arc<AudioRing>,
    playing: Arc<AtomicBool>,
    complete: Arc<AtomicBool>,
    interrupted: Arc<AtomicBool>,
}

impl PlaybackRun {
    fn run(self) {
        if let Err(e) = self.play() {
            log::error!("playback failed: {e}");
        }
        self.playing.store(false, Ordering::Release);
        log::debug!("playback run ended");
    }

    fn play(&self) -> Result<(), PlayerError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(PlayerError::NoDevice)?;

        // Prefer mono; duplicate samples across channels when the device
        // only does stereo.
        let channels: usize = match device.supported_output_configs() {
            Ok(mut configs) => {
                if configs.any(|c| c.channels() == 1) {
                    1
                } else {
                    2
                }
            }
            Err(_) => 2,
        };
        let stream_config = cpal::StreamConfig {
            channels: channels as u16,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let should_stop = Arc::new(AtomicBool::new(false));
        let epoch = Instant::now();
        // Elapsed-millis timestamp of the last callback that got data.
        let last_data_ms = Arc::new(AtomicU64::new(0));
        let empty_reads = Arc::new(AtomicU32::new(0));

        let stream = {
            let ring = Arc::clone(&self.ring);
            let complete = Arc::clone(&self.complete);
            let interrupted = Arc::clone(&self.interrupted);
            let should_stop = Arc::clone(&should_stop);
            let last_data_ms = Arc::clone(&last_data_ms);
            let empty_reads = Arc::clone(&empty_reads);
            let mut scratch: Vec<u8> = Vec::new();

            device.build_output_stream(
                &stream_config,
                move |out: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let Some((bytes_read, drained)) =
                        render_output(out, channels, &ring, &mut scratch, &interrupted)
                    else {
                        should_stop.store(true, Ordering::Release);
                        return;
                    };
                    if bytes_read > 0 {
                        last_data_ms.store(epoch.elapsed().as_millis() as u64, Ordering::Release);
                        empty_reads.store(0, Ordering::Release);
                    } else {
                        empty_reads.fetch_add(1, Ordering::AcqRel);
                    }

                    // Stop conditions, evaluated on every callback.
                    let now_ms = epoch.elapsed().as_millis() as u64;
                    let stalled =
                        now_ms.saturating_sub(last_data_ms.load(Ordering::Acquire))
                            > STALL_TIMEOUT_MS;
                    if (complete.load(Ordering::Acquire) && ring.is_empty())
                        || stalled
                        || empty_reads.load(Ordering::Acquire) >= MAX_EMPTY_READS
                        || drained
                        || ring.is_closed()
                    {
                        should_stop.store(true, Ordering::Release);
                    }
                },
                |err: cpal::StreamError| log::error!("output stream error: {err}"),
                None,
            )?
        };
        stream.play()?;
        log::info!("playback started ({channels} ch at {} Hz)", self.sample_rate);

        loop {
            std::thread::sleep(TICK);
            if self.interrupted.load(Ordering::Acquire) {
                log::info!("playback interrupted");
                break;
            }
            if should_stop.load(Ordering::Acquire) {
                log::debug!("playback stop condition met");
                break;
            }
        }

        // Dropping the stream aborts output immediately; interruption must
        // not drain buffered audio.
        drop(stream);
        Ok(())
    }
}

/// Fill one output callback's worth of samples from the ring.
///
/// Returns `None` with `out` silenced, leaving the ring untouched, when an
/// interruption has been requested; the pending buffer then stays in place
/// for [`Player::stop_playback`] to discard after the join.  Otherwise
/// returns the ring read result `(bytes_read, drained)`.
fn render_output(
    out: &mut [f32],
    channels: usize,
    ring: &AudioRing,
    scratch: &mut Vec<u8>,
    interrupted: &AtomicBool,
) -> Option<(usize, bool)> {
    if interrupted.load(Ordering::Acquire) {
        out.fill(0.0);
        return None;
    }

    let frames = out.len() / channels;
    scratch.resize(frames * 2, 0);
    let (bytes_read, drained) = ring.read(scratch);
    decode_into(out, channels, scratch, bytes_read);
    Some((bytes_read, drained))
}

/// Decode `n` little-endian i16 bytes from `bytes` into `out`, duplicating
/// each sample across `channels` and zero-filling any shortfall so underrun
/// produces silence instead of garbage.
fn decode_into(out: &mut [f32], channels: usize, bytes: &[u8], n: usize) {
    let frames = out.len() / channels;
    let samples_read = n / 2;
    for frame in 0..frames {
        let value = if frame < samples_read {
            let raw = i16::from_le_bytes([bytes[frame * 2], bytes[frame * 2 + 1]]);
            raw as f32 / 32_768.0
        } else {
            0.0
        };
        for ch in 0..channels {
            out[frame * channels + ch] = value;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AudioConfig;

    fn test_player() -> Player {
        Player::new(&AudioConfig::default())
    }

    // ---- sample decoding ---------------------------------------------------

    #[test]
    fn decode_fills_mono_frames() {
        let bytes = [0x00, 0x40, 0x00, 0xC0]; // 16384, -16384
        let mut out = [9.9f32; 2];
        decode_into(&mut out, 1, &bytes, 4);
        assert!((out[0] - 0.5).abs() < 1e-4);
        assert!((out[1] + 0.5).abs() < 1e-4);
    }

    #[test]
    fn decode_duplicates_across_stereo_channels() {
        let bytes = [0x00, 0x40];
        let mut out = [0.0f32; 4];
        decode_into(&mut out, 2, &bytes, 2);
        assert_eq!(out[0], out[1]);
        assert!((out[0] - 0.5).abs() < 1e-4);
        // Second frame had no data: silence on both channels.
        assert_eq!(out[2], 0.0);
        assert_eq!(out[3], 0.0);
    }

    #[test]
    fn decode_zero_fills_underrun_leftovers() {
        // Stale garbage in the output slice must be overwritten with
        // silence, not left to play.
        let mut out = [1.0f32; 8];
        decode_into(&mut out, 1, &[], 0);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    // ---- interruption ------------------------------------------------------

    #[test]
    fn interrupted_callback_goes_silent_without_touching_the_ring() {
        // Once interruption is requested the very next callback must emit
        // silence and must not consume buffered response audio; the pending
        // bytes belong to stop_playback's post-join clear.
        let ring = AudioRing::new(4_096);
        assert_eq!(ring.write(&[0x00, 0x40, 0x00, 0x40]), 4);
        let interrupted = AtomicBool::new(true);

        let mut out = [1.0f32; 8];
        let mut scratch = Vec::new();
        let rendered = render_output(&mut out, 1, &ring, &mut scratch, &interrupted);

        assert!(rendered.is_none());
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn callback_keeps_draining_while_not_interrupted() {
        let ring = AudioRing::new(4_096);
        assert_eq!(ring.write(&[0x00, 0x40]), 2);
        let interrupted = AtomicBool::new(false);

        let mut out = [0.0f32; 1];
        let mut scratch = Vec::new();
        let (bytes_read, drained) =
            render_output(&mut out, 1, &ring, &mut scratch, &interrupted)
                .expect("active run must render");

        assert_eq!(bytes_read, 2);
        assert!(!drained);
        assert!((out[0] - 0.5).abs() < 1e-4);
        assert!(ring.is_empty());
    }

    #[test]
    fn stop_playback_clears_buffer_and_completion_flag() {
        let player = test_player();
        player.write_audio_data(&[0u8; 6_400]);
        player.set_audio_complete(true);

        player.stop_playback();

        assert_eq!(player.buffered_bytes(), 0);
        assert!(!player.is_playing());
        // Flag must be reset so the next response does not stop instantly.
        assert!(!player.complete.load(Ordering::Acquire));
    }

    #[test]
    fn stop_playback_races_live_writer_and_settles_empty() {
        let player = Arc::new(test_player());
        let done_writing = Arc::new(AtomicBool::new(false));

        let writer = {
            let player = Arc::clone(&player);
            let done_writing = Arc::clone(&done_writing);
            std::thread::spawn(move || {
                let mut writes = 0u32;
                while !done_writing.load(Ordering::Acquire) && writes < 10_000 {
                    player.write_audio_data(&[1u8; 640]);
                    writes += 1;
                }
            })
        };

        // Wait until bytes are visibly streaming in, then interrupt while
        // the writer is still hammering the ring.
        while player.buffered_bytes() == 0 {
            std::thread::yield_now();
        }
        player.stop_playback();

        // Quiesce the writer and interrupt once more; anything it appended
        // after the first clear must also be discarded.
        done_writing.store(true, Ordering::Release);
        writer.join().unwrap();
        player.stop_playback();

        assert_eq!(player.buffered_bytes(), 0);
        assert!(!player.is_playing());
    }

    #[test]
    fn stop_playback_without_any_write_is_safe() {
        let player = test_player();
        player.stop_playback();
        assert_eq!(player.buffered_bytes(), 0);
    }

    #[test]
    fn stop_closes_ring_against_further_writes() {
        let player = test_player();
        player.stop();
        player.write_audio_data(&[1u8; 64]);
        assert_eq!(player.buffered_bytes(), 0);
    }
}
