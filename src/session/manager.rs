//! Wake-mode session orchestration.
//!
//! [`SessionManager`] sits between the continuously-running recorder and
//! the transport.  Capture never stops while armed; the manager only decides
//! where each chunk goes based on the current [`SessionState`]:
//!
//! - `Sleeping`: into a bounded most-recent-N-seconds pre-roll buffer;
//! - `WaitingResponse`: straight to the transport;
//! - `Active`: to the transport *and* into the silence window, which a
//!   periodic check evaluates to decide when the conversation ended.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use crate::audio::{ChunkSink, Player};
use crate::config::{AudioConfig, WakeConfig};
use crate::session::SessionState;
use crate::transport::generate_request_id;

// ---------------------------------------------------------------------------
// SessionTransport
// ---------------------------------------------------------------------------

/// Outbound operations the session machine needs from the transport.
///
/// All methods are best-effort and non-blocking; failures are logged inside
/// the implementation, never surfaced here.
pub trait SessionTransport: Send + Sync {
    /// Stream one chunk of session audio.
    fn send_audio_chunk(&self, request_id: &str, samples: &[i16], is_last: bool);

    /// Signal end-of-audio for the request with no trailing payload.
    fn send_audio_complete(&self, request_id: &str);

    /// Cancel any in-flight response for the request.
    fn send_cancel(&self, request_id: &str);
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

/// Session state machine for wake-button operation.
pub struct SessionManager {
    state: AtomicU8,
    /// Most-recent pre-roll samples retained while sleeping.
    wake_buffer: Mutex<Vec<i16>>,
    /// Recent samples evaluated for end-of-utterance silence.
    silence_window: Mutex<Vec<i16>>,
    /// Request id of the session being streamed; empty while sleeping
    /// before the first wake.
    request_id: Mutex<String>,
    wake_capacity: usize,
    window_capacity: usize,
    rms_threshold: f64,
    ratio_threshold: f64,
    serial_number: String,
    transport: Arc<dyn SessionTransport>,
    player: Arc<Player>,
}

impl SessionManager {
    pub fn new(
        wake: &WakeConfig,
        audio: &AudioConfig,
        serial_number: String,
        transport: Arc<dyn SessionTransport>,
        player: Arc<Player>,
    ) -> Self {
        let rate = audio.sample_rate as usize;
        Self {
            state: AtomicU8::new(SessionState::Sleeping as u8),
            wake_buffer: Mutex::new(Vec::new()),
            silence_window: Mutex::new(Vec::new()),
            request_id: Mutex::new(String::new()),
            wake_capacity: rate * wake.preroll_secs as usize,
            window_capacity: rate * wake.silence_window_secs as usize,
            rms_threshold: wake.silence_rms_threshold,
            ratio_threshold: wake.silence_ratio_threshold,
            serial_number,
            transport,
            player,
        }
    }

    /// Current routing state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SessionState) {
        let prev = self.state.swap(state as u8, Ordering::AcqRel);
        if prev != state as u8 {
            log::info!(
                "session {} -> {}",
                SessionState::from_u8(prev).label(),
                state.label()
            );
        }
    }

    /// External wake trigger (GPIO edge or console command).
    ///
    /// A wake while a session is already running first runs the interruption
    /// routine, then a fresh request id is allocated and the pre-roll buffer
    /// is flushed as the first chunk of the new session.
    pub fn wake(&self) {
        if self.state() != SessionState::Sleeping {
            self.interrupt();
        }

        let request_id = generate_request_id(&self.serial_number);
        *self.request_id.lock().unwrap() = request_id.clone();
        self.set_state(SessionState::WaitingResponse);

        let preroll = std::mem::take(&mut *self.wake_buffer.lock().unwrap());
        if !preroll.is_empty() {
            log::debug!("flushing {} pre-roll samples for {request_id}", preroll.len());
            self.transport.send_audio_chunk(&request_id, &preroll, false);
        }
        log::info!("session woken as {request_id}");
    }

    /// The transport finished delivering the response audio; the user may
    /// speak again, so silence evaluation starts now.
    pub fn on_playback_complete(&self) {
        if self.state() == SessionState::WaitingResponse {
            self.silence_window.lock().unwrap().clear();
            self.set_state(SessionState::Active);
        }
    }

    /// Periodic silence evaluation; returns `true` when the session was put
    /// back to sleep.
    ///
    /// The window must be at least half full before it is judged, so a
    /// freshly-cleared window cannot produce a false positive.
    pub fn check_silence(&self) -> bool {
        if self.state() != SessionState::Active {
            return false;
        }

        let silent = {
            let window = self.silence_window.lock().unwrap();
            if window.len() < self.window_capacity / 2 {
                return false;
            }
            crate::audio::is_silent(&window, self.rms_threshold, self.ratio_threshold)
        };
        if !silent {
            return false;
        }

        let request_id = self.request_id.lock().unwrap().clone();
        log::info!("silence detected, ending session {request_id}");
        self.transport.send_audio_complete(&request_id);

        self.wake_buffer.lock().unwrap().clear();
        self.silence_window.lock().unwrap().clear();
        self.set_state(SessionState::Sleeping);
        true
    }

    /// Interruption routine: stop playback, drop buffered audio, and cancel
    /// the in-flight response (best-effort).
    pub fn interrupt(&self) {
        if self.player.is_playing() {
            self.player.stop_playback();
        }
        self.silence_window.lock().unwrap().clear();
        self.wake_buffer.lock().unwrap().clear();

        let request_id = self.request_id.lock().unwrap().clone();
        if !request_id.is_empty() {
            log::info!("cancelling in-flight response for {request_id}");
            self.transport.send_cancel(&request_id);
        }
    }

    /// Terminal shutdown: end a live session cleanly.
    pub fn shutdown(&self) {
        if self.state() != SessionState::Sleeping {
            self.interrupt();
            self.set_state(SessionState::Sleeping);
        }
    }

    fn append_bounded(buffer: &Mutex<Vec<i16>>, samples: &[i16], capacity: usize) {
        let Ok(mut buffer) = buffer.lock() else {
            return;
        };
        buffer.extend_from_slice(samples);
        let len = buffer.len();
        if len > capacity {
            // Keep the newest `capacity` samples.
            buffer.drain(..len - capacity);
        }
    }
}

/// Chunk routing.  Called from the audio callback thread, so every branch
/// is a channel send or a short buffer append; lock poisoning is treated as
/// a dropped chunk rather than a panic.
impl ChunkSink for SessionManager {
    fn on_audio_chunk(&self, _request_id: &str, samples: &[i16], _is_last: bool) {
        match self.state() {
            SessionState::Sleeping => {
                Self::append_bounded(&self.wake_buffer, samples, self.wake_capacity);
            }
            SessionState::WaitingResponse => {
                let Ok(request_id) = self.request_id.lock() else {
                    return;
                };
                self.transport.send_audio_chunk(&request_id, samples, false);
            }
            SessionState::Active => {
                {
                    let Ok(request_id) = self.request_id.lock() else {
                        return;
                    };
                    self.transport.send_audio_chunk(&request_id, samples, false);
                }
                Self::append_bounded(&self.silence_window, samples, self.window_capacity);
            }
        }
    }

    fn on_capture_complete(&self, request_id: &str) {
        log::debug!("capture completed for {request_id}");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every transport call for later assertions.
    #[derive(Default)]
    struct MockTransport {
        chunks: Mutex<Vec<(String, Vec<i16>, bool)>>,
        completes: Mutex<Vec<String>>,
        cancels: Mutex<Vec<String>>,
    }

    impl SessionTransport for MockTransport {
        fn send_audio_chunk(&self, request_id: &str, samples: &[i16], is_last: bool) {
            self.chunks
                .lock()
                .unwrap()
                .push((request_id.to_string(), samples.to_vec(), is_last));
        }

        fn send_audio_complete(&self, request_id: &str) {
            self.completes.lock().unwrap().push(request_id.to_string());
        }

        fn send_cancel(&self, request_id: &str) {
            self.cancels.lock().unwrap().push(request_id.to_string());
        }
    }

    fn test_manager() -> (Arc<MockTransport>, SessionManager) {
        let transport = Arc::new(MockTransport::default());
        let player = Arc::new(Player::new(&AudioConfig::default()));
        let manager = SessionManager::new(
            &WakeConfig::default(),
            &AudioConfig::default(),
            "DEV-TEST".into(),
            transport.clone(),
            player,
        );
        (transport, manager)
    }

    // ---- routing -----------------------------------------------------------

    #[test]
    fn sleeping_chunks_buffer_locally_and_never_reach_transport() {
        let (transport, manager) = test_manager();
        manager.on_audio_chunk("", &[1i16; 3_200], false);

        assert!(transport.chunks.lock().unwrap().is_empty());
        assert_eq!(manager.wake_buffer.lock().unwrap().len(), 3_200);
    }

    #[test]
    fn wake_buffer_keeps_only_newest_samples() {
        let (_, manager) = test_manager();
        let capacity = manager.wake_capacity;

        manager.on_audio_chunk("", &vec![1i16; capacity], false);
        manager.on_audio_chunk("", &vec![2i16; 1_000], false);

        let buffer = manager.wake_buffer.lock().unwrap();
        assert_eq!(buffer.len(), capacity);
        // Oldest samples were trimmed from the front.
        assert_eq!(buffer[0], 1);
        assert_eq!(buffer[capacity - 1], 2);
        assert_eq!(buffer[capacity - 1_000], 2);
    }

    #[test]
    fn waiting_response_forwards_without_silence_tracking() {
        let (transport, manager) = test_manager();
        manager.wake();
        manager.on_audio_chunk("", &[5i16; 320], false);

        let chunks = transport.chunks.lock().unwrap();
        let forwarded = chunks.last().unwrap();
        assert_eq!(forwarded.1, vec![5i16; 320]);
        assert!(!forwarded.2);
        assert!(manager.silence_window.lock().unwrap().is_empty());
    }

    #[test]
    fn active_forwards_and_feeds_silence_window() {
        let (transport, manager) = test_manager();
        manager.wake();
        manager.on_playback_complete();
        assert_eq!(manager.state(), SessionState::Active);

        manager.on_audio_chunk("", &[3i16; 320], false);
        assert!(!transport.chunks.lock().unwrap().is_empty());
        assert_eq!(manager.silence_window.lock().unwrap().len(), 320);
    }

    // ---- transitions -------------------------------------------------------

    #[test]
    fn wake_flushes_preroll_with_new_request_id() {
        let (transport, manager) = test_manager();
        manager.on_audio_chunk("", &[7i16; 1_600], false);
        manager.wake();

        assert_eq!(manager.state(), SessionState::WaitingResponse);
        assert!(manager.wake_buffer.lock().unwrap().is_empty());

        let chunks = transport.chunks.lock().unwrap();
        assert_eq!(chunks.len(), 1);
        let (request_id, samples, is_last) = &chunks[0];
        assert!(request_id.starts_with("DEV-TEST-"));
        assert_eq!(samples.len(), 1_600);
        assert!(!*is_last);
    }

    #[test]
    fn playback_complete_only_advances_from_waiting() {
        let (_, manager) = test_manager();
        manager.on_playback_complete();
        assert_eq!(manager.state(), SessionState::Sleeping);

        manager.wake();
        manager.on_playback_complete();
        assert_eq!(manager.state(), SessionState::Active);

        // Already active: no-op.
        manager.on_playback_complete();
        assert_eq!(manager.state(), SessionState::Active);
    }

    #[test]
    fn silent_window_returns_session_to_sleep() {
        let (transport, manager) = test_manager();
        manager.wake();
        manager.on_playback_complete();

        // Fill the window past half capacity with silence.
        let half = manager.window_capacity / 2;
        manager.on_audio_chunk("", &vec![0i16; half + 100], false);

        assert!(manager.check_silence());
        assert_eq!(manager.state(), SessionState::Sleeping);
        assert!(manager.wake_buffer.lock().unwrap().is_empty());
        assert!(manager.silence_window.lock().unwrap().is_empty());

        let completes = transport.completes.lock().unwrap();
        assert_eq!(completes.len(), 1);
        assert!(completes[0].starts_with("DEV-TEST-"));
    }

    #[test]
    fn nearly_empty_window_is_never_judged() {
        let (_, manager) = test_manager();
        manager.wake();
        manager.on_playback_complete();

        manager.on_audio_chunk("", &[0i16; 100], false);
        assert!(!manager.check_silence());
        assert_eq!(manager.state(), SessionState::Active);
    }

    #[test]
    fn loud_window_keeps_session_active() {
        let (_, manager) = test_manager();
        manager.wake();
        manager.on_playback_complete();

        let half = manager.window_capacity / 2;
        let loud: Vec<i16> = (0..half + 100)
            .map(|i| if i % 2 == 0 { 10_000 } else { -10_000 })
            .collect();
        manager.on_audio_chunk("", &loud, false);

        assert!(!manager.check_silence());
        assert_eq!(manager.state(), SessionState::Active);
    }

    #[test]
    fn check_silence_is_inert_while_sleeping() {
        let (transport, manager) = test_manager();
        assert!(!manager.check_silence());
        assert!(transport.completes.lock().unwrap().is_empty());
    }

    // ---- interruption ------------------------------------------------------

    #[test]
    fn wake_during_session_cancels_previous_request() {
        let (transport, manager) = test_manager();
        manager.wake();
        let first_id = manager.request_id.lock().unwrap().clone();

        manager.wake();
        let cancels = transport.cancels.lock().unwrap();
        assert_eq!(*cancels, vec![first_id.clone()]);

        let second_id = manager.request_id.lock().unwrap().clone();
        assert_ne!(first_id, second_id);
        assert_eq!(manager.state(), SessionState::WaitingResponse);
    }

    #[test]
    fn interrupt_clears_buffers() {
        let (_, manager) = test_manager();
        manager.on_audio_chunk("", &[1i16; 500], false);
        manager.interrupt();
        assert!(manager.wake_buffer.lock().unwrap().is_empty());
        assert!(manager.silence_window.lock().unwrap().is_empty());
    }
}
