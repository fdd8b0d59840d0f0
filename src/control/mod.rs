//! Control front ends: the sources of start/stop/test/wake/quit commands.
//!
//! Three interchangeable front ends feed the same channel of abstract
//! [`Command`]s: an interactive stdin console, a polled control file for
//! scripted devices, and a sysfs GPIO wake button for embedded boards.
//! The application loop neither knows nor cares which one is active.

pub mod file;
pub mod gpio;
pub mod stdin;

pub use file::{init_control_file, spawn_file_monitor};
pub use gpio::{init_gpio_pin, spawn_gpio_monitor};
pub use stdin::spawn_stdin_monitor;

/// Abstract control command, independent of its front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    StartRecording,
    StopRecording,
    /// Record a short clip to a WAV file for microphone checkout.
    TestRecording,
    /// Wake trigger for the session state machine.
    Wake,
    Quit,
}

/// Parse a console/file token into a [`Command`].
///
/// Accepts the digit shorthand used by the control file (`1`/`2`/`3`) and
/// the word forms used on the console; case-insensitive.
pub fn parse_command(input: &str) -> Option<Command> {
    match input.trim().to_lowercase().as_str() {
        "1" | "start" => Some(Command::StartRecording),
        "2" | "stop" => Some(Command::StopRecording),
        "3" | "test" => Some(Command::TestRecording),
        "w" | "wake" => Some(Command::Wake),
        "q" | "quit" | "exit" => Some(Command::Quit),
        _ => None,
    }
}
