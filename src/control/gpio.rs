//! sysfs GPIO wake-button front end for embedded boards.
//!
//! Polls `/sys/class/gpio/gpio<N>/value` and emits [`Command::Wake`] on a
//! falling edge (button press pulls the pin low).  The sysfs interface is
//! deprecated upstream but remains the lowest-common-denominator way to
//! read a pin on the small boards this client targets.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::control::Command;

const SYSFS_GPIO: &str = "/sys/class/gpio";

/// Export the pin and set its direction to input.  Idempotent: an already
/// exported pin is left as is apart from the direction write.
pub fn init_gpio_pin(pin: u32) -> Result<()> {
    init_gpio_pin_at(Path::new(SYSFS_GPIO), pin)
}

fn init_gpio_pin_at(root: &Path, pin: u32) -> Result<()> {
    let pin_dir = root.join(format!("gpio{pin}"));
    if !pin_dir.exists() {
        std::fs::write(root.join("export"), pin.to_string())
            .with_context(|| format!("export gpio {pin}"))?;
        // sysfs needs a moment to create the pin directory.
        std::thread::sleep(Duration::from_millis(50));
    }

    std::fs::write(pin_dir.join("direction"), "in")
        .with_context(|| format!("set gpio {pin} direction"))?;
    Ok(())
}

fn read_pin_value(value_path: &Path) -> Result<u8> {
    let raw = std::fs::read_to_string(value_path)?;
    Ok(if raw.trim() == "0" { 0 } else { 1 })
}

/// Spawn the polling thread.  Call [`init_gpio_pin`] first.
pub fn spawn_gpio_monitor(
    pin: u32,
    poll_interval: Duration,
    commands: Sender<Command>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    let value_path = PathBuf::from(SYSFS_GPIO).join(format!("gpio{pin}/value"));
    spawn_gpio_monitor_at(value_path, pin, poll_interval, commands, shutdown)
}

fn spawn_gpio_monitor_at(
    value_path: PathBuf,
    pin: u32,
    poll_interval: Duration,
    commands: Sender<Command>,
    shutdown: Arc<AtomicBool>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("gpio-control".into())
        .spawn(move || {
            // Assume released (high) when the initial read fails.
            let mut previous = read_pin_value(&value_path).unwrap_or_else(|e| {
                log::warn!("initial gpio {pin} read failed: {e}");
                1
            });
            log::info!("gpio monitor started on pin {pin}");

            while !shutdown.load(Ordering::Acquire) {
                std::thread::sleep(poll_interval);

                let current = match read_pin_value(&value_path) {
                    Ok(value) => value,
                    Err(e) => {
                        log::warn!("gpio {pin} read failed: {e}");
                        continue;
                    }
                };

                if previous == 1 && current == 0 {
                    log::info!("gpio wake trigger (falling edge on pin {pin})");
                    if commands.send(Command::Wake).is_err() {
                        return;
                    }
                }
                previous = current;
            }
        })
        .expect("failed to spawn gpio control thread")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
