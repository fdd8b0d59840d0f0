//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// ControlMode
// ---------------------------------------------------------------------------

/// Selects which control front end produces start/stop/wake commands.
///
/// | Variant | Source                                        | Typical use      |
/// |---------|-----------------------------------------------|------------------|
/// | Stdin   | Interactive console commands                  | Development      |
/// | File    | Polled control file (`echo 1 > /tmp/...`)     | Scripted devices |
/// | Gpio    | sysfs GPIO falling edge (wake-button mode)    | Embedded boards  |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMode {
    /// Read commands from standard input (debug console).
    Stdin,
    /// Poll a control file for command digits.
    File,
    /// Poll a GPIO pin; a falling edge is a wake trigger.
    Gpio,
}

impl Default for ControlMode {
    fn default() -> Self {
        Self::Stdin
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for audio capture, chunking and playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Sample rate in Hz of the audio exchanged with the service.  Chunks
    /// are resampled to this rate before upload, and response audio is
    /// played back at it.
    pub sample_rate: u32,
    /// Preferred hardware capture rate in Hz.  Used when the device's own
    /// default rate differs from `sample_rate`; the device may still refuse
    /// it, in which case its default rate is used instead.
    pub capture_sample_rate: u32,
    /// Channel count for uploaded audio (mono in practice).
    pub channels: u16,
    /// Duration of one uploaded audio chunk in milliseconds.
    pub chunk_duration_ms: u64,
    /// Seconds of response audio the playback ring buffer can hold.
    pub playback_buffer_secs: u32,
}

impl AudioConfig {
    /// Samples per uploaded chunk at `sample_rate`.
    pub fn chunk_samples(&self) -> usize {
        (self.sample_rate as u64 * self.chunk_duration_ms / 1000) as usize
    }

    /// Bytes per uploaded chunk (16-bit samples).
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_samples() * 2
    }

    /// Playback ring buffer capacity in bytes.
    pub fn playback_buffer_bytes(&self) -> usize {
        self.sample_rate as usize * self.channels as usize * 2 * self.playback_buffer_secs as usize
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            capture_sample_rate: 48_000,
            channels: 1,
            chunk_duration_ms: 200,
            playback_buffer_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// TransportConfig
// ---------------------------------------------------------------------------

/// Settings for the WebSocket transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Full WebSocket URL of the chat service, including any auth token
    /// query parameter.
    pub url: String,
    /// Seconds to wait between reconnect attempts.
    pub reconnect_delay_secs: u64,
    /// Seconds between keep-alive pings.
    pub ping_interval_secs: u64,
    /// Maximum seconds a single outgoing send may take before the
    /// connection is considered dead.
    pub write_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "wss://localhost:10543/api/v1/chat/ws".into(),
            reconnect_delay_secs: 5,
            ping_interval_secs: 30,
            write_timeout_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// ControlConfig
// ---------------------------------------------------------------------------

/// Settings for the control front end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Which front end is active.
    pub mode: ControlMode,
    /// Path of the polled control file (`File` mode).
    pub file_path: std::path::PathBuf,
    /// Poll interval in milliseconds (`File` and `Gpio` modes).
    pub poll_interval_ms: u64,
    /// sysfs GPIO pin number (`Gpio` mode).
    pub gpio_pin: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            mode: ControlMode::default(),
            file_path: "/tmp/chat-control".into(),
            poll_interval_ms: 100,
            gpio_pin: 7,
        }
    }
}

// ---------------------------------------------------------------------------
// DeviceConfig
// ---------------------------------------------------------------------------

/// Device identity and response preferences announced to the service in the
/// config-update handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Serial number; also the prefix of every generated request id.
    pub serial_number: String,
    /// Voice the service should synthesize responses with.
    pub voice_id: String,
    /// Speech rate adjustment (0 = service default).
    pub speech_rate: i32,
    /// Ask the service to stream response text alongside audio.
    pub output_text: bool,
    /// Reported device latitude.
    pub latitude: f64,
    /// Reported device longitude.
    pub longitude: f64,
    /// IANA timezone name, or empty to omit.
    pub timezone: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            serial_number: "DEV-001".into(),
            voice_id: "xiaole".into(),
            speech_rate: 0,
            output_text: false,
            latitude: 0.0,
            longitude: 0.0,
            timezone: String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// WakeConfig
// ---------------------------------------------------------------------------

/// Settings for the wake-button session state machine (`Gpio` mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WakeConfig {
    /// Seconds of most-recent audio retained while sleeping and flushed as
    /// pre-roll on wake.
    pub preroll_secs: u32,
    /// Seconds of audio the silence-detection window holds.
    pub silence_window_secs: u32,
    /// RMS below this level counts as silence (typical 100..500).
    pub silence_rms_threshold: f64,
    /// Fraction of near-silent samples above which a window is silent.
    pub silence_ratio_threshold: f64,
    /// Milliseconds between silence checks while Active.
    pub check_interval_ms: u64,
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            preroll_secs: 3,
            silence_window_secs: 2,
            silence_rms_threshold: 200.0,
            silence_ratio_threshold: 0.9,
            check_interval_ms: 1_000,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use voice_intercom::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Audio capture / chunking / playback settings.
    pub audio: AudioConfig,
    /// WebSocket transport settings.
    pub transport: TransportConfig,
    /// Control front end settings.
    pub control: ControlConfig,
    /// Device identity announced to the service.
    pub device: DeviceConfig,
    /// Wake-mode session settings.
    pub wake: WakeConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first-run scenario) so callers never need to special-case a missing
    /// file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
