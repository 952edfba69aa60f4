// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project configuration interface.
//!
//! Projects describe their build environments in `platformio.ini`:
//!
//! ```ini
//! [env:uno]
//! platform = atmelavr
//! board = uno
//! build_flags = -DLED_PIN=13
//! ```
//!
//! Config parsing is a collaborator; the engine consumes it through
//! [`ProjectConfig`] so processors and tests can substitute fixtures.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Config errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("platformio.ini not found in {0}")]
    NotFound(String),

    #[error("failed to parse platformio.ini: {0}")]
    Parse(String),

    #[error("environment [env:{0}] not found in platformio.ini")]
    NoSuchEnv(String),

    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),
}

/// Platform family an environment builds for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// Arduino Uno / Mega / Teensy-style AVR targets
    AtmelAvr,
    /// ESP32 family
    Espressif32,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::AtmelAvr => write!(f, "atmelavr"),
            Platform::Espressif32 => write!(f, "espressif32"),
        }
    }
}

impl Platform {
    /// Normalize a raw `platform =` value, including URL-style references
    /// (`https://.../platform-espressif32.zip` maps to `espressif32`).
    pub fn normalize(raw: &str) -> Result<Self, ConfigError> {
        let lowered = raw.trim().to_lowercase();

        if lowered == "atmelavr" || lowered.contains("platform-atmelavr") {
            return Ok(Platform::AtmelAvr);
        }
        if lowered == "espressif32" || lowered.contains("platform-espressif32") {
            return Ok(Platform::Espressif32);
        }

        Err(ConfigError::UnsupportedPlatform(raw.trim().to_string()))
    }
}

/// One `[env:name]` section, resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvConfig {
    pub platform: String,
    pub board: Option<String>,
    pub build_flags: Vec<String>,
    pub monitor_speed: Option<u32>,
    pub upload_speed: Option<u32>,
    pub upload_port: Option<String>,
}

impl EnvConfig {
    /// The normalized platform family.
    pub fn platform_family(&self) -> Result<Platform, ConfigError> {
        Platform::normalize(&self.platform)
    }
}

/// Source of per-environment configuration.
pub trait ProjectConfig: Send + Sync {
    fn env_config(&self, env: &str) -> Result<EnvConfig, ConfigError>;

    /// Names of all defined environments.
    fn environments(&self) -> Vec<String>;
}

/// `platformio.ini`-backed implementation.
pub struct IniProjectConfig {
    sections: HashMap<String, HashMap<String, String>>,
}

impl IniProjectConfig {
    /// Read `<project_dir>/platformio.ini`.
    pub fn load(project_dir: &Path) -> Result<Self, ConfigError> {
        let ini_path = project_dir.join("platformio.ini");
        if !ini_path.exists() {
            return Err(ConfigError::NotFound(project_dir.display().to_string()));
        }

        let ini = ini::Ini::load_from_file(&ini_path).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut sections = HashMap::new();
        for (section, properties) in ini.iter() {
            let Some(name) = section else { continue };
            let mut values = HashMap::new();
            for (key, value) in properties.iter() {
                values.insert(key.to_string(), value.to_string());
            }
            sections.insert(name.to_string(), values);
        }

        Ok(Self { sections })
    }

    fn get(&self, env: &str, key: &str) -> Option<&str> {
        self.sections
            .get(&format!("env:{env}"))
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }
}

impl ProjectConfig for IniProjectConfig {
    fn env_config(&self, env: &str) -> Result<EnvConfig, ConfigError> {
        if !self.sections.contains_key(&format!("env:{env}")) {
            return Err(ConfigError::NoSuchEnv(env.to_string()));
        }

        let platform = self
            .get(env, "platform")
            .unwrap_or_default()
            .trim()
            .to_string();

        // build_flags may span multiple lines; each whitespace-separated
        // token is one flag
        let build_flags = self
            .get(env, "build_flags")
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Ok(EnvConfig {
            platform,
            board: self.get(env, "board").map(str::to_string),
            build_flags,
            monitor_speed: self.get(env, "monitor_speed").and_then(|v| v.trim().parse().ok()),
            upload_speed: self.get(env, "upload_speed").and_then(|v| v.trim().parse().ok()),
            upload_port: self.get(env, "upload_port").map(str::to_string),
        })
    }

    fn environments(&self) -> Vec<String> {
        let mut envs: Vec<String> = self
            .sections
            .keys()
            .filter_map(|name| name.strip_prefix("env:"))
            .map(str::to_string)
            .collect();
        envs.sort();
        envs
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
