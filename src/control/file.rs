//! Polled control-file front end for scripted devices.
//!
//! External scripts drive the client by writing a command token into the
//! control file (`echo 1 > /tmp/chat-control`).  The monitor polls the file,
//! dispatches any new token, and truncates the file afterwards.  The same
//! token written twice in a row is ignored, so a script stuck re-writing
//! its last command cannot flood the application loop.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::control::{parse_command, Command};

/// Truncate (and create) the control file so stale commands from a previous
/// run are not replayed.
pub fn init_control_file(path: &PathBuf) -> Result<()> {
    std::fs::write(path, b"").with_context(|| format!("init control file {}", path.display()))
}

/// Spawn the polling thread.  Call [`init_control_file`] first; polling a
/// missing file only logs errors.
pub fn spawn_file_monitor(
    path: PathBuf,
    poll_interval: Duration,
    commands: Sender<Command>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("file-control".into())
        .spawn(move || {
            let mut last_token = String::new();
            log::info!("watching control file {}", path.display());

            while !shutdown.load(Ordering::Acquire) {
                std::thread::sleep(poll_interval);

                let content = match std::fs::read_to_string(&path) {
                    Ok(content) => content,
                    Err(e) => {
                        log::warn!("control file read failed: {e}");
                        continue;
                    }
                };
                let token = content.trim();
                if token.is_empty() || token == last_token {
                    continue;
                }
                last_token = token.to_string();

                match parse_command(token) {
                    Some(command) => {
                        log::info!("control file command: {command:?}");
                        if commands.send(command).is_err() {
                            return;
                        }
                        if command == Command::Quit {
                            return;
                        }
                    }
                    None => log::warn!("unknown control token: {token}"),
                }

                if let Err(e) = std::fs::write(&path, b"") {
                    log::warn!("control file truncate failed: {e}");
                }
            }
        })
        .expect("failed to spawn file control thread")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::tempdir;

    #[test]
    fn picks_up_written_command_and_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("control");
        init_control_file(&path).unwrap();

        let (tx, rx) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = spawn_file_monitor(
            path.clone(),
            Duration::from_millis(10),
            tx,
            shutdown.clone(),
        );

        std::fs::write(&path, "1\n").unwrap();
        let command = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("command not dispatched");
        assert_eq!(command, Command::StartRecording);

        // The file is eventually truncated after dispatch.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            if std::fs::read_to_string(&path).unwrap().is_empty() {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "file never truncated");
            std::thread::sleep(Duration::from_millis(10));
        }

        shutdown.store(true, Ordering::Release);
        handle.join().unwrap();
    }

    #[test]
    fn quit_token_stops_the_monitor() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("control");
        init_control_file(&path).unwrap();

        let (tx, rx) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let handle = spawn_file_monitor(path.clone(), Duration::from_millis(10), tx, shutdown);

        std::fs::write(&path, "q").unwrap();
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            Command::Quit
        );
        handle.join().unwrap();
    }
}
