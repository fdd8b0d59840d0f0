//! Voice Intercom — a full-duplex voice assistant client.
//!
//! Captures microphone audio, streams it to a chat service over WebSocket as
//! WAV-wrapped chunks, and plays the synthesized response while it is still
//! arriving.  Three control front ends (console, polled file, sysfs GPIO)
//! drive the same command set; GPIO mode adds a wake-signal session machine
//! with silence-based auto-sleep.
//!
//! # Modules
//!
//! * [`audio`] — capture, resampling, WAV framing, playback ring.
//! * [`transport`] — WebSocket client, wire protocol, reconnect loop.
//! * [`session`] — wake-mode state machine (sleep / wait / active).
//! * [`control`] — console, file, and GPIO command front ends.
//! * [`app`] — event loop and the glue between the sync and async halves.
//! * [`config`] — TOML settings and platform paths.

pub mod app;
pub mod audio;
pub mod config;
pub mod control;
pub mod session;
pub mod transport;
