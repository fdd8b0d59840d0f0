//! Input device selection with ALSA/Pulse-aware priority scoring.
//!
//! Embedded boards and desktop Linux expose wildly different device lists;
//! picking `default` blindly lands on dsnoop or a monitor source on half of
//! them.  [`pick_input_device`] scores every input device by name and takes
//! the best, falling back to the host default when nothing matches.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;
use thiserror::Error;

/// Errors raised during input device discovery.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("no usable audio input device found")]
    NoDevice,
    #[error("failed to enumerate input devices: {0}")]
    Enumerate(#[from] cpal::DevicesError),
}

/// Score an input device by name, or `None` if it must not be used.
///
/// Bridge/monitor devices and ALSA rate-converter plugins are excluded
/// outright.  Devices with no input channels are excluded.  Everything else
/// gets an additive score; unrecognized names still receive a small base
/// score so headless boards with vendor-named codecs remain selectable.
pub fn score_input_device(name: &str, input_channels: u16) -> Option<u32> {
    if input_channels == 0 {
        return None;
    }

    let name = name.to_lowercase();
    for excluded in [
        "monitor",
        "loopback",
        "sysdefault",
        "lavrate",
        "samplerate",
        "speexrate",
        "upmix",
        "vdownmix",
    ] {
        if name.contains(excluded) {
            return None;
        }
    }

    let mut score: u32 = 0;

    // Desktop sound servers route through the user's chosen source.
    if name.contains("pulse") {
        score = 200;
    } else if name.contains("pipewire") {
        score = 190;
    }

    if name.contains("microphone") || name.contains("mic") {
        score += 100;
    }
    if name.contains("digital") {
        score += 50;
    }
    if name.contains("sof-hda-dsp") {
        score += 40;
    }

    // Embedded codecs and card-0 hardware addresses.
    if name.contains("audiocodec")
        || name.contains("sunxi-codec")
        || name.contains("allwinner")
        || name.contains("hw:0,0")
        || name.contains("plughw:0,0")
    {
        score += 180;
    }

    // Direct capture PCMs, skipping dsnoop mixers.
    if name.starts_with("capture") && !name.contains("dsnoop") {
        score += 170;
    }

    // `default` is usable but generic; a flat score keeps it below any
    // recognized hardware device.
    if name == "default" {
        score = 150;
    }

    if name.contains("plughw") {
        score += 25;
    }

    if score == 0 {
        score = 10;
    }
    Some(score)
}

/// Pick the best-scoring input device on `host`.
///
/// Falls back to the host default input device when no candidate scores,
/// and fails only when the host has no input devices at all.
pub fn pick_input_device(host: &cpal::Host) -> Result<Device, DeviceError> {
    let mut best: Option<(u32, Device)> = None;

    for device in host.input_devices()? {
        let name = match device.name() {
            Ok(name) => name,
            Err(e) => {
                log::debug!("skipping unnamed input device: {e}");
                continue;
            }
        };
        let channels = device
            .default_input_config()
            .map(|cfg| cfg.channels())
            .unwrap_or(0);

        if let Some(score) = score_input_device(&name, channels) {
            log::debug!("candidate input device: {name} (score {score}, {channels} ch)");
            if best.as_ref().map_or(true, |(top, _)| score > *top) {
                best = Some((score, device));
            }
        }
    }

    if let Some((score, device)) = best {
        if let Ok(name) = device.name() {
            log::info!("selected input device: {name} (score {score})");
        }
        return Ok(device);
    }

    match host.default_input_device() {
        Some(device) => {
            log::warn!("no matching input device, falling back to host default");
            Ok(device)
        }
        None => Err(DeviceError::NoDevice),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
