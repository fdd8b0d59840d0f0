//! Application entry point — Voice Intercom.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Create the [`tokio`] runtime (multi-thread, 2 workers) for the
//!    WebSocket transport.
//! 4. Wire the channels: control commands and forwarded transport events
//!    both land in one `AppEvent` queue drained by the main-thread loop;
//!    outbound requests flow through a tokio queue into the transport task.
//! 5. Build the playback [`Player`], the [`TransportSink`], the wake-mode
//!    [`SessionManager`] (GPIO mode only), and the [`Recorder`].
//! 6. Spawn the transport task and the Ctrl-C watcher.
//! 7. Start the configured control front end (console / file / GPIO).
//! 8. Run the [`App`] event loop — blocks the main thread until shutdown.

use std::sync::atomic::AtomicBool;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use anyhow::Context;
use voice_intercom::{
    app::{App, AppEvent, EventBridge, Shutdown, TransportSink},
    audio::{ChunkSink, Player, Recorder},
    config::{AppConfig, ControlMode},
    control::{init_control_file, init_gpio_pin, spawn_file_monitor, spawn_gpio_monitor,
              spawn_stdin_monitor, Command},
    session::{SessionManager, SessionTransport},
    transport::{ClientRequest, TransportClient},
};

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("voice intercom starting up");

    // 2. Configuration
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("failed to load config ({e}); using defaults");
        AppConfig::default()
    });
    log::info!(
        "device {} -> {} ({:?} control)",
        config.device.serial_number,
        config.transport.url,
        config.control.mode
    );

    // 3. Tokio runtime (transport task + signal watcher)
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("create tokio runtime")?;

    let shutdown = Arc::new(Shutdown::new());

    // 4. Channels
    let (event_tx, event_rx) = mpsc::channel::<AppEvent>();
    let (command_tx, command_rx) = mpsc::channel::<Command>();
    let (request_tx, request_rx) = tokio::sync::mpsc::unbounded_channel::<ClientRequest>();

    // Forward control commands into the single event queue.
    {
        let event_tx = event_tx.clone();
        std::thread::Builder::new()
            .name("command-forward".into())
            .spawn(move || {
                while let Ok(command) = command_rx.recv() {
                    if event_tx.send(AppEvent::Command(command)).is_err() {
                        return;
                    }
                }
            })
            .expect("failed to spawn command forwarder thread");
    }

    // 5. Core components
    let player = Arc::new(Player::new(&config.audio));
    let sink = Arc::new(TransportSink::new(
        request_tx.clone(),
        config.audio.sample_rate,
        config.audio.channels,
    ));
    let config_acked = Arc::new(AtomicBool::new(false));

    // Wake mode rides on the GPIO front end: capture runs continuously and
    // the session machine decides what reaches the service.
    let session = match config.control.mode {
        ControlMode::Gpio => Some(Arc::new(SessionManager::new(
            &config.wake,
            &config.audio,
            config.device.serial_number.clone(),
            Arc::clone(&sink) as Arc<dyn SessionTransport>,
            Arc::clone(&player),
        ))),
        _ => None,
    };

    let chunk_sink: Arc<dyn ChunkSink> = match &session {
        Some(session) => Arc::clone(session) as Arc<dyn ChunkSink>,
        None => Arc::clone(&sink) as Arc<dyn ChunkSink>,
    };
    let mut recorder = Recorder::new(config.audio.clone(), chunk_sink);
    recorder.initialize().context("bind input device")?;

    // 6. Transport task + Ctrl-C watcher
    let bridge = Arc::new(EventBridge::new(
        Arc::clone(&player),
        Arc::clone(&config_acked),
        event_tx.clone(),
    ));
    rt.spawn(
        TransportClient::new(
            config.transport.clone(),
            bridge,
            request_rx,
            shutdown.subscribe(),
        )
        .run(),
    );
    {
        let shutdown = Arc::clone(&shutdown);
        rt.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("interrupt received");
                shutdown.trigger();
            }
        });
    }

    // 7. Control front end
    let poll_interval = Duration::from_millis(config.control.poll_interval_ms);
    let _control_handle = match config.control.mode {
        ControlMode::Stdin => spawn_stdin_monitor(command_tx.clone(), shutdown.flag()),
        ControlMode::File => {
            init_control_file(&config.control.file_path).context("init control file")?;
            spawn_file_monitor(
                config.control.file_path.clone(),
                poll_interval,
                command_tx.clone(),
                shutdown.flag(),
            )
        }
        ControlMode::Gpio => {
            init_gpio_pin(config.control.gpio_pin).context("init gpio pin")?;
            spawn_gpio_monitor(
                config.control.gpio_pin,
                poll_interval,
                command_tx.clone(),
                shutdown.flag(),
            )
        }
    };

    // Silence ticker puts an Active session back to sleep after the speaker
    // stops talking.
    if let Some(session) = &session {
        let session = Arc::clone(session);
        let flag = shutdown.flag();
        let interval = Duration::from_millis(config.wake.check_interval_ms);
        std::thread::Builder::new()
            .name("silence-check".into())
            .spawn(move || {
                while !flag.load(std::sync::atomic::Ordering::Acquire) {
                    std::thread::sleep(interval);
                    session.check_silence();
                }
            })
            .expect("failed to spawn silence check thread");
    }

    // 8. Event loop (blocks until shutdown)
    let wake_mode = session.is_some();
    let mut app = App::new(
        config,
        recorder,
        player,
        session,
        request_tx,
        config_acked,
        Arc::clone(&shutdown),
    );

    if wake_mode && !app.startup() {
        shutdown.trigger();
        anyhow::bail!("wake mode startup failed");
    }

    app.run(event_rx);

    rt.shutdown_timeout(Duration::from_secs(2));
    log::info!("voice intercom stopped");
    Ok(())
}
