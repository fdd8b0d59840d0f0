//! Application wiring — event loop, transport bridging, and shutdown.
//!
//! # Architecture
//!
//! [`App`] runs a blocking event loop on the main thread and owns the
//! [`Recorder`] (cpal input streams are not `Send`, so every capture call
//! happens here).  Two adapters connect the loop to the async transport:
//!
//! * [`EventBridge`] — implements [`EventHandler`]; called from the tokio
//!   runtime for every decoded server event.  Response audio is written
//!   straight into the [`Player`] ring (never queued through the loop), the
//!   config-ack flag is latched, and everything else is forwarded as an
//!   [`AppEvent`].
//! * [`TransportSink`] — implements [`ChunkSink`] and [`SessionTransport`];
//!   WAV-encodes capture chunks and hands typed [`ClientRequest`]s to the
//!   transport task's queue.
//!
//! [`Shutdown`] fans the quit signal out to both worlds: an [`AtomicBool`]
//! for polling threads and a tokio `watch` channel for the transport task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch};

use crate::audio::{encode_wav, ChunkSink, Player, Recorder};
use crate::config::{AppConfig, AppPaths};
use crate::control::Command;
use crate::session::{SessionManager, SessionTransport};
use crate::transport::{generate_request_id, ClientRequest, EventHandler, TransportEvent};

/// How long to wait for the service to acknowledge a config update before
/// giving up on starting a capture.
const CONFIG_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Duration of a console-triggered microphone checkout recording.
const TEST_RECORDING_SECS: u64 = 5;

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Shared shutdown signal, observable from both sync and async code.
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            tx,
        }
    }

    /// Flip the signal.  Idempotent.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
        let _ = self.tx.send(true);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Watch half for async tasks (`changed()` wakes on trigger).
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Atomic half for polling threads.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// AppEvent
// ---------------------------------------------------------------------------

/// Everything the main event loop reacts to, from either front end.
#[derive(Debug)]
pub enum AppEvent {
    /// A console / control-file / GPIO command.
    Command(Command),
    /// A server event forwarded by the [`EventBridge`].
    Transport(TransportEvent),
}

// ---------------------------------------------------------------------------
// EventBridge — transport events → playback ring + event loop
// ---------------------------------------------------------------------------

/// [`EventHandler`] installed on the transport task.
///
/// Audio chunks bypass the event loop entirely; buffering them through a
/// channel would add a hop of latency for no benefit since the [`Player`]
/// ring is already lock-free on the write side.
pub struct EventBridge {
    player: Arc<Player>,
    config_acked: Arc<AtomicBool>,
    events: Sender<AppEvent>,
}

impl EventBridge {
    pub fn new(player: Arc<Player>, config_acked: Arc<AtomicBool>, events: Sender<AppEvent>) -> Self {
        Self {
            player,
            config_acked,
            events,
        }
    }
}

impl EventHandler for EventBridge {
    fn on_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::ResponseAudioChunk(bytes) => {
                self.player.write_audio_data(&bytes);
            }
            TransportEvent::ResponseAudioComplete => {
                self.player.set_audio_complete(true);
                let _ = self.events.send(AppEvent::Transport(TransportEvent::ResponseAudioComplete));
            }
            TransportEvent::ConfigAcked { success, message } => {
                // Latched here so the loop can poll it while blocked in a
                // config-ack wait.
                self.config_acked.store(success, Ordering::Release);
                let _ = self
                    .events
                    .send(AppEvent::Transport(TransportEvent::ConfigAcked { success, message }));
            }
            other => {
                let _ = self.events.send(AppEvent::Transport(other));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TransportSink — capture chunks → typed requests
// ---------------------------------------------------------------------------

/// WAV-encodes capture output and queues it for the transport task.
///
/// Serves both capture paths: the [`Recorder`] drives it directly in
/// push-to-talk mode (as a [`ChunkSink`]), and the [`SessionManager`] drives
/// it in wake mode (as a [`SessionTransport`]).
pub struct TransportSink {
    requests: mpsc::UnboundedSender<ClientRequest>,
    sample_rate: u32,
    channels: u16,
}

impl TransportSink {
    pub fn new(requests: mpsc::UnboundedSender<ClientRequest>, sample_rate: u32, channels: u16) -> Self {
        Self {
            requests,
            sample_rate,
            channels,
        }
    }

    fn encode(&self, samples: &[i16]) -> Option<Vec<u8>> {
        match encode_wav(samples, self.sample_rate, self.channels) {
            Ok(wav) => Some(wav),
            Err(e) => {
                log::error!("wav encoding failed, dropping chunk: {e}");
                None
            }
        }
    }

    fn submit(&self, request: ClientRequest) {
        if self.requests.send(request).is_err() {
            log::warn!("transport queue closed, request dropped");
        }
    }
}

impl ChunkSink for TransportSink {
    fn on_audio_chunk(&self, request_id: &str, samples: &[i16], is_last: bool) {
        let Some(wav) = self.encode(samples) else {
            return;
        };
        let request_id = request_id.to_string();
        if is_last {
            self.submit(ClientRequest::AudioComplete {
                request_id,
                wav: Some(wav),
            });
        } else {
            self.submit(ClientRequest::AudioStream { request_id, wav });
        }
    }

    fn on_capture_complete(&self, request_id: &str) {
        self.submit(ClientRequest::AudioComplete {
            request_id: request_id.to_string(),
            wav: None,
        });
    }
}

impl SessionTransport for TransportSink {
    fn send_audio_chunk(&self, request_id: &str, samples: &[i16], is_last: bool) {
        ChunkSink::on_audio_chunk(self, request_id, samples, is_last);
    }

    fn send_audio_complete(&self, request_id: &str) {
        self.submit(ClientRequest::AudioComplete {
            request_id: request_id.to_string(),
            wav: None,
        });
    }

    fn send_cancel(&self, request_id: &str) {
        self.submit(ClientRequest::Cancel {
            request_id: request_id.to_string(),
        });
    }
}

// ---------------------------------------------------------------------------
// App
// ---------------------------------------------------------------------------

/// Main-thread event loop.  Owns the recorder and dispatches commands and
/// forwarded transport events until shutdown.
pub struct App {
    config: AppConfig,
    recorder: Recorder,
    player: Arc<Player>,
    /// Wake-mode session state machine; `None` in push-to-talk modes.
    session: Option<Arc<SessionManager>>,
    requests: mpsc::UnboundedSender<ClientRequest>,
    config_acked: Arc<AtomicBool>,
    shutdown: Arc<Shutdown>,
    /// Id of the most recently started exchange, for cut-in cancellation.
    last_request_id: String,
}

impl App {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        recorder: Recorder,
        player: Arc<Player>,
        session: Option<Arc<SessionManager>>,
        requests: mpsc::UnboundedSender<ClientRequest>,
        config_acked: Arc<AtomicBool>,
        shutdown: Arc<Shutdown>,
    ) -> Self {
        Self {
            config,
            recorder,
            player,
            session,
            requests,
            config_acked,
            shutdown,
            last_request_id: String::new(),
        }
    }

    /// Announce device identity, then (wake mode only) open the continuous
    /// capture stream feeding the session manager.
    ///
    /// Returns `false` when the service never acknowledged the config, in
    /// which case wake mode cannot start.
    pub fn startup(&mut self) -> bool {
        let request_id = generate_request_id(&self.config.device.serial_number);
        if !self.update_config_and_wait(&request_id) {
            log::error!("service did not acknowledge device config");
            return false;
        }

        if self.session.is_some() {
            let request_id = generate_request_id(&self.config.device.serial_number);
            if let Err(e) = self.recorder.start_recording(&request_id) {
                log::error!("continuous capture failed to start: {e}");
                return false;
            }
            log::info!("wake mode armed, listening for wake signal");
        }
        true
    }

    /// Run until the shutdown signal fires or every event sender is gone.
    pub fn run(mut self, events: Receiver<AppEvent>) {
        loop {
            if self.shutdown.is_triggered() {
                break;
            }
            match events.recv_timeout(Duration::from_millis(100)) {
                Ok(AppEvent::Command(command)) => self.handle_command(command),
                Ok(AppEvent::Transport(event)) => self.handle_transport_event(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.cleanup();
    }

    // ── Command dispatch ─────────────────────────────────────────────────

    fn handle_command(&mut self, command: Command) {
        log::debug!("command: {command:?}");
        match command {
            Command::StartRecording => self.start_capture(),
            Command::StopRecording => self.recorder.stop_recording(),
            Command::TestRecording => self.run_test_recording(),
            Command::Wake => match &self.session {
                Some(session) => session.wake(),
                None => log::warn!("wake command ignored, wake mode is not active"),
            },
            Command::Quit => self.shutdown.trigger(),
        }
    }

    /// Push-to-talk start: announce config for this exchange, then open the
    /// capture stream.  A failed or timed-out ack aborts the start.
    fn start_capture(&mut self) {
        if self.session.is_some() {
            log::warn!("start ignored, wake mode captures continuously");
            return;
        }
        if self.recorder.is_recording() {
            log::warn!("start ignored, capture already running");
            return;
        }

        let request_id = generate_request_id(&self.config.device.serial_number);
        if !self.update_config_and_wait(&request_id) {
            log::error!("config not acknowledged, capture not started");
            return;
        }

        match self.recorder.start_recording(&request_id) {
            Ok(()) => self.last_request_id = request_id,
            Err(e) => log::error!("capture failed to start: {e}"),
        }
    }

    /// Send an `updateConfig` and poll for the service ack.
    ///
    /// The ack flag is latched by the [`EventBridge`] on the transport task,
    /// so polling here works even though this thread is not draining the
    /// event channel meanwhile.
    fn update_config_and_wait(&self, request_id: &str) -> bool {
        self.config_acked.store(false, Ordering::Release);
        if self
            .requests
            .send(ClientRequest::UpdateConfig {
                request_id: request_id.to_string(),
                device: self.config.device.clone(),
            })
            .is_err()
        {
            log::warn!("transport queue closed, config update dropped");
            return false;
        }

        let deadline = Instant::now() + CONFIG_ACK_TIMEOUT;
        while Instant::now() < deadline {
            if self.shutdown.is_triggered() {
                return false;
            }
            if self.config_acked.load(Ordering::Acquire) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        false
    }

    /// Record a short WAV to the recordings directory for microphone
    /// checkout.  Blocks the loop for the duration, which is fine for a
    /// manual console command.
    fn run_test_recording(&mut self) {
        let paths = AppPaths::new();
        if let Err(e) = std::fs::create_dir_all(&paths.recordings_dir) {
            log::error!("cannot create recordings dir: {e}");
            return;
        }
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let path = paths.recordings_dir.join(format!("test_recording_{secs}.wav"));

        match self.recorder.test_recording(TEST_RECORDING_SECS, &path) {
            Ok(()) => log::info!("test recording saved to {}", path.display()),
            Err(e) => log::error!("test recording failed: {e}"),
        }
    }

    // ── Transport event dispatch ─────────────────────────────────────────

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::ResponseAudioComplete => {
                if let Some(session) = &self.session {
                    session.on_playback_complete();
                }
            }
            TransportEvent::ResponseText { role, text } => self.handle_text(&role, &text),
            TransportEvent::ExchangeComplete { success, errors } => {
                if success {
                    log::info!("exchange complete");
                } else {
                    for e in &errors {
                        log::error!("exchange failed: [{}] {}", e.code, e.message);
                    }
                }
            }
            TransportEvent::ConfigAcked { success, message } => {
                if success {
                    log::info!("device config acknowledged");
                } else {
                    log::warn!("device config rejected: {message}");
                }
            }
            // Audio chunks are consumed by the EventBridge and never reach
            // the loop.
            TransportEvent::ResponseAudioChunk(_) => {}
        }
    }

    /// Streamed transcript fragment.  A user echo arriving while a response
    /// is playing means the person started talking over the answer, so the
    /// answer is cut off and cancelled.
    fn handle_text(&mut self, role: &str, text: &str) {
        log::info!("[{role}] {text}");

        if !is_cut_in(role, text) || !self.player.is_playing() {
            return;
        }

        log::info!("user cut in, stopping playback");
        if let Some(session) = &self.session {
            session.interrupt();
        } else {
            self.player.stop_playback();
            if !self.last_request_id.is_empty() {
                let request_id = std::mem::take(&mut self.last_request_id);
                if self.requests.send(ClientRequest::Cancel { request_id }).is_err() {
                    log::warn!("transport queue closed, cancel dropped");
                }
            }
        }
    }

    fn cleanup(&mut self) {
        log::info!("shutting down");
        self.recorder.stop_recording();
        if let Some(session) = &self.session {
            session.shutdown();
        }
        self.player.stop();
    }
}

/// Whether a transcript fragment counts as the user talking over a playing
/// response.  The threshold is byte length, not character count, so a single
/// multi-byte character (one CJK syllable, say) already triggers while a
/// lone ASCII filler like "a" does not.
fn is_cut_in(role: &str, text: &str) -> bool {
    role == "user" && text.len() >= 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AudioConfig;

    fn sink_pair() -> (TransportSink, mpsc::UnboundedReceiver<ClientRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TransportSink::new(tx, 16_000, 1), rx)
    }

    // ---- TransportSink ----

    #[test]
    fn chunk_becomes_audio_stream_request() {
        let (sink, mut rx) = sink_pair();
        sink.on_audio_chunk("req-1", &[1, 2, 3], false);

        match rx.try_recv().unwrap() {
            ClientRequest::AudioStream { request_id, wav } => {
                assert_eq!(request_id, "req-1");
                assert_eq!(&wav[..4], b"RIFF");
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn last_chunk_becomes_complete_with_payload() {
        let (sink, mut rx) = sink_pair();
        sink.on_audio_chunk("req-2", &[5; 40], true);

        match rx.try_recv().unwrap() {
            ClientRequest::AudioComplete { request_id, wav } => {
                assert_eq!(request_id, "req-2");
                assert!(wav.is_some());
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn empty_capture_completes_without_payload() {
        let (sink, mut rx) = sink_pair();
        sink.on_capture_complete("req-3");

        match rx.try_recv().unwrap() {
            ClientRequest::AudioComplete { request_id, wav } => {
                assert_eq!(request_id, "req-3");
                assert!(wav.is_none());
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn cancel_passes_through() {
        let (sink, mut rx) = sink_pair();
        SessionTransport::send_cancel(&sink, "req-4");

        match rx.try_recv().unwrap() {
            ClientRequest::Cancel { request_id } => assert_eq!(request_id, "req-4"),
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn closed_queue_does_not_panic() {
        let (sink, rx) = sink_pair();
        drop(rx);
        sink.on_audio_chunk("req-5", &[0; 10], false);
        sink.on_capture_complete("req-5");
    }

    // ---- EventBridge ----

    #[test]
    fn config_ack_is_latched_and_forwarded() {
        let player = Arc::new(Player::new(&AudioConfig::default()));
        let acked = Arc::new(AtomicBool::new(false));
        let (tx, rx) = std::sync::mpsc::channel();
        let bridge = EventBridge::new(player, Arc::clone(&acked), tx);

        bridge.on_event(TransportEvent::ConfigAcked {
            success: true,
            message: "ok".into(),
        });

        assert!(acked.load(Ordering::Acquire));
        assert!(matches!(
            rx.try_recv().unwrap(),
            AppEvent::Transport(TransportEvent::ConfigAcked { success: true, .. })
        ));
    }

    #[test]
    fn text_events_are_forwarded_unchanged() {
        let player = Arc::new(Player::new(&AudioConfig::default()));
        let acked = Arc::new(AtomicBool::new(false));
        let (tx, rx) = std::sync::mpsc::channel();
        let bridge = EventBridge::new(player, acked, tx);

        bridge.on_event(TransportEvent::ResponseText {
            role: "assistant".into(),
            text: "hello".into(),
        });

        match rx.try_recv().unwrap() {
            AppEvent::Transport(TransportEvent::ResponseText { role, text }) => {
                assert_eq!(role, "assistant");
                assert_eq!(text, "hello");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    // ---- cut-in detection ----

    #[test]
    fn cut_in_counts_bytes_not_characters() {
        // A lone CJK syllable is one character but three UTF-8 bytes, and
        // real speech behind it, so it must trigger.
        assert!(is_cut_in("user", "好"));
        assert!(is_cut_in("user", "ok"));
    }

    #[test]
    fn cut_in_ignores_short_or_non_user_text() {
        assert!(!is_cut_in("user", "a"));
        assert!(!is_cut_in("user", ""));
        assert!(!is_cut_in("assistant", "a full assistant sentence"));
    }

    // ---- Shutdown ----

    #[test]
    fn shutdown_reaches_both_halves() {
        let shutdown = Shutdown::new();
        let mut watch_rx = shutdown.subscribe();
        let flag = shutdown.flag();

        assert!(!shutdown.is_triggered());
        shutdown.trigger();

        assert!(flag.load(Ordering::Acquire));
        assert!(watch_rx.has_changed().unwrap());
        assert!(*watch_rx.borrow_and_update());
    }
}
