//! Audio pipeline — microphone capture → resampling → chunked upload, and
//! the inbound half: byte ring buffer → speaker playback.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → resample → 200ms chunks → ChunkSink
//! Server PCM → AudioRing → playback thread → cpal output stream
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use voice_intercom::audio::{ChunkSink, Recorder};
//! use voice_intercom::config::AudioConfig;
//!
//! struct Printer;
//!
//! impl ChunkSink for Printer {
//!     fn on_audio_chunk(&self, request_id: &str, samples: &[i16], is_last: bool) {
//!         println!("{request_id}: {} samples (last: {is_last})", samples.len());
//!     }
//!     fn on_capture_complete(&self, request_id: &str) {
//!         println!("{request_id}: no audio captured");
//!     }
//! }
//!
//! let mut recorder = Recorder::new(AudioConfig::default(), Arc::new(Printer));
//! recorder.initialize().unwrap();
//! recorder.start_recording("req-1").unwrap();
//! ```

pub mod device;
pub mod player;
pub mod recorder;
pub mod resample;
pub mod ring;
pub mod stats;
pub mod wav;

pub use device::{pick_input_device, score_input_device, DeviceError};
pub use player::{Player, PlayerError};
pub use recorder::{ChunkSink, Recorder, RecorderError};
pub use resample::resample;
pub use ring::AudioRing;
pub use stats::{analyze, is_silent, rms, AudioStats};
pub use wav::encode_wav;
