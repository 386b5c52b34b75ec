//! Process configuration.
//!
//! `Settings` is resolved once at startup from environment variables
//! (`BUS_SCHEME`, `BUS_HOST`, `BUS_PORT`, `BUS_USERNAME`, `BUS_PASSWORD`,
//! `CAMERA_FRAMERATE`, `MZI_RATE`, `LOG_LEVEL`) layered under a handful of CLI
//! flags, the same `figment` Env+Toml layering the V4 configuration module
//! uses. A missing `BUS_HOST` is treated as a fatal configuration error:
//! there is no sensible default broker to fall back to.

use std::path::PathBuf;

use clap::Parser;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use crate::error::{DriverError, DriverResult};

/// Command-line flags accepted by the driver binary.
#[derive(Parser, Debug)]
#[command(name = "seone-camera-driver")]
pub struct Cli {
    /// Path to a file whose (trimmed) contents are this device's serial number.
    #[arg(long)]
    pub serial_number_file: PathBuf,

    /// Optional TOML file layered under environment variables.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// MQTT broker connection parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct BusSettings {
    #[serde(default = "default_bus_scheme")]
    pub scheme: String,
    pub host: String,
    #[serde(default = "default_bus_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn default_bus_scheme() -> String {
    "mqtt".to_string()
}

fn default_bus_port() -> u16 {
    1883
}

#[derive(Debug, Clone, Deserialize)]
struct RawSettings {
    bus_scheme: Option<String>,
    bus_host: String,
    bus_port: Option<u16>,
    bus_username: Option<String>,
    bus_password: Option<String>,
    #[serde(default = "default_camera_framerate")]
    camera_framerate: u32,
    #[serde(default = "default_mzi_rate")]
    mzi_rate: u32,
    #[serde(default = "default_log_level")]
    log_level: String,
}

fn default_camera_framerate() -> u32 {
    10
}

/// Target cadence for published MZI/MMI frames (Hz). Deliberately lower than
/// the camera's raw capture rate: the orchestrator accumulates and means raw
/// frames between publishes rather than publishing every one.
fn default_mzi_rate() -> u32 {
    5
}

fn default_log_level() -> String {
    "INFO".to_string()
}

/// Fully resolved, immutable process configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub bus: BusSettings,
    pub camera_framerate: u32,
    pub mzi_rate: u32,
    pub log_level: String,
    pub serial_number: String,
}

impl Settings {
    /// Loads settings from environment variables (and an optional TOML
    /// overlay), then attaches the serial number read from the file named on
    /// the command line.
    pub fn load(cli: &Cli) -> DriverResult<Self> {
        let mut figment = Figment::new().merge(Env::raw());
        if let Some(path) = &cli.config {
            figment = figment.merge(Toml::file(path));
        }

        let raw: RawSettings = figment
            .extract()
            .map_err(|e| DriverError::ConfigError(e.to_string()))?;

        let serial_number = std::fs::read_to_string(&cli.serial_number_file)
            .map_err(|e| {
                DriverError::ConfigError(format!(
                    "failed to read serial number file {}: {e}",
                    cli.serial_number_file.display()
                ))
            })?
            .trim()
            .to_string();

        Ok(Settings {
            bus: BusSettings {
                scheme: raw.bus_scheme.unwrap_or_else(default_bus_scheme),
                host: raw.bus_host,
                port: raw.bus_port.unwrap_or_else(default_bus_port),
                username: raw.bus_username,
                password: raw.bus_password,
            },
            camera_framerate: raw.camera_framerate,
            mzi_rate: raw.mzi_rate,
            log_level: raw.log_level,
            serial_number,
        })
    }

    /// The MQTT topic prefix for this device: `seone/<serial_number>`.
    pub fn topic_prefix(&self) -> String {
        format!("seone/{}", self.serial_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_serial_file(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().expect("tempfile");
        write!(f, "{contents}").expect("write");
        f
    }

    #[test]
    fn topic_prefix_uses_serial_number() {
        let settings = Settings {
            bus: BusSettings {
                scheme: "mqtt".into(),
                host: "localhost".into(),
                port: 1883,
                username: None,
                password: None,
            },
            camera_framerate: 10,
            mzi_rate: 5,
            log_level: "INFO".into(),
            serial_number: "SN-0042".into(),
        };
        assert_eq!(settings.topic_prefix(), "seone/SN-0042");
    }

    #[test]
    fn load_trims_serial_number_whitespace() {
        let file = write_serial_file("  SN-TEST \n");
        std::env::set_var("BUS_HOST", "broker.local");
        let cli = Cli {
            serial_number_file: file.path().to_path_buf(),
            config: None,
        };
        let settings = Settings::load(&cli).expect("load settings");
        assert_eq!(settings.serial_number, "SN-TEST");
        std::env::remove_var("BUS_HOST");
    }
}
