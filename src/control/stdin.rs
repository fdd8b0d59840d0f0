//! Interactive console front end (debug mode).

use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::control::{parse_command, Command};

/// Spawn a thread reading commands from standard input.
///
/// The thread exits on EOF, on a quit command, or when `shutdown` is set
/// (checked between lines; a blocked `read_line` cannot be interrupted, so
/// a clean quit should come through the console itself).
pub fn spawn_stdin_monitor(
    commands: Sender<Command>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("stdin-control".into())
        .spawn(move || {
            println!("=== debug console ===");
            println!("  1 | start  begin recording");
            println!("  2 | stop   stop recording and send");
            println!("  3 | test   record 5s to a wav file");
            println!("  w | wake   wake the session");
            println!("  q | quit   exit");

            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                if shutdown.load(Ordering::Acquire) {
                    return;
                }
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        log::warn!("stdin read failed: {e}");
                        return;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }

                match parse_command(&line) {
                    Some(command) => {
                        log::info!("console command: {command:?}");
                        if commands.send(command).is_err() {
                            return;
                        }
                        if command == Command::Quit {
                            return;
                        }
                    }
                    None => println!("unknown command: {}", line.trim()),
                }
            }
        })
        .expect("failed to spawn stdin control thread")
}
