//! Configuration management for xtbrun.
//!
//! Program-level settings (where xtb lives, whether to run in scratch, how
//! many threads to give it, which extra files to keep) are read from an INI
//! file. Configuration is hierarchical, with the following precedence:
//!
//! 1. Local configuration (`./xtbrun_config.cfg`)
//! 2. User configuration (`~/.config/xtbrun/xtbrun_config.cfg`)
//! 3. System configuration (`/etc/xtbrun/xtbrun_config.cfg`)
//! 4. Built-in defaults
//!
//! # Configuration File Format
//!
//! ```ini
//! [executable]
//! name = xtb
//! path = /opt/xtb/bin
//!
//! [runner]
//! scratch = true
//! scratch_dir = /scratch/me
//! threads = 4
//!
//! [artifacts]
//! extra = xtbtopo.mol, gradient
//!
//! [logging]
//! level = info
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use xtbrun::settings::SettingsManager;
//!
//! let settings = SettingsManager::load()?;
//! let resolver = settings.resolver();
//! println!("xtb resolved to {:?}", resolver.resolve());
//! # Ok::<(), xtbrun::settings::ConfigError>(())
//! ```

use crate::artifacts::ArtifactConfig;
use crate::executable::ExecutableResolver;
use crate::runner::RunnerOptions;
use configparser::ini::Ini;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name of the configuration file searched for in each location.
pub const CONFIG_FILE_NAME: &str = "xtbrun_config.cfg";

/// Errors that can occur during configuration loading and processing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// I/O error when reading configuration files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// INI parsing error
    #[error("INI parsing error: {0}")]
    IniParse(String),
    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Main configuration structure containing all program settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    /// Executable lookup
    pub executable: ExecutableSettings,
    /// Job execution
    pub runner: RunnerSettings,
    /// Artifact retrieval
    pub artifacts: ArtifactSettings,
    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Where to find the xtb program.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutableSettings {
    /// Program name looked up on PATH (default: "xtb")
    pub name: String,
    /// Manual override: the executable or the folder holding it
    pub path: Option<PathBuf>,
}

impl Default for ExecutableSettings {
    fn default() -> Self {
        Self {
            name: "xtb".to_string(),
            path: None,
        }
    }
}

/// Job execution settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RunnerSettings {
    /// Run in a temporary scratch directory (default: false)
    pub scratch: bool,
    /// Parent of scratch directories (default: system temp directory)
    pub scratch_dir: Option<PathBuf>,
    /// Default thread count when a job does not set one
    pub threads: Option<u32>,
}

/// Artifact retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ArtifactSettings {
    /// Additional file names copied back from the working directory
    pub extra: Vec<String>,
}

/// Logging configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingSettings {
    /// Log level (default: "info")
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingSettings {
    /// Log level as a filter, falling back to `Info` for unknown names.
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

type Section = HashMap<String, Option<String>>;

/// Configuration manager that handles loading and accessing program settings.
pub struct SettingsManager {
    settings: Settings,
    config_source: String,
}

impl SettingsManager {
    /// Loads configuration from the available configuration files.
    ///
    /// Files that exist but fail to parse are reported with a warning and
    /// skipped, so a broken system file never prevents a run.
    pub fn load() -> Result<Self, ConfigError> {
        let (settings, source) = Self::load_from_files()?;
        info!("Configuration loaded from: {}", source);
        Ok(Self {
            settings,
            config_source: source,
        })
    }

    /// Loads configuration from one explicit file, on top of the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let settings = Self::load_config(path)?;
        Ok(Self {
            settings,
            config_source: format!("file ({})", path.display()),
        })
    }

    /// Wraps already-built settings.
    pub fn from_settings(settings: Settings) -> Self {
        Self {
            settings,
            config_source: "in-memory settings".to_string(),
        }
    }

    /// Returns the source of the loaded configuration.
    pub fn config_source(&self) -> &str {
        &self.config_source
    }

    /// Gets a reference to the settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Builds the executable resolver described by `[executable]`.
    pub fn resolver(&self) -> ExecutableResolver {
        ExecutableResolver::new(
            self.settings.executable.name.clone(),
            self.settings.executable.path.clone(),
        )
    }

    /// Builds runner options from `[runner]` and `[artifacts]`.
    pub fn runner_options(&self) -> RunnerOptions {
        RunnerOptions {
            scratch: self.settings.runner.scratch,
            scratch_dir: self.settings.runner.scratch_dir.clone(),
            threads: self.settings.runner.threads,
            artifacts: ArtifactConfig::default().with_extra(self.settings.artifacts.extra.clone()),
        }
    }

    /// Loads configuration from files with hierarchical precedence.
    fn load_from_files() -> Result<(Settings, String), ConfigError> {
        let mut settings = Settings::default();
        let mut config_source = "built-in defaults".to_string();

        let candidates = [
            ("system", Self::get_system_config_path()),
            ("user", Self::get_user_config_path()),
            ("local", Some(PathBuf::from(CONFIG_FILE_NAME))),
        ];

        // Later entries override earlier ones
        for (scope, path) in candidates {
            let Some(path) = path else { continue };
            if !path.exists() {
                continue;
            }
            match Self::read_sections(&path) {
                Ok(sections) => {
                    settings.merge(&sections)?;
                    config_source = format!("{} config ({})", scope, path.display());
                    debug!("Loaded {} configuration from: {}", scope, path.display());
                }
                Err(e) => {
                    warn!(
                        "Failed to load {} config from {}: {}",
                        scope,
                        path.display(),
                        e
                    );
                }
            }
        }

        Ok((settings, config_source))
    }

    /// Loads configuration from a single INI file.
    fn load_config(path: &Path) -> Result<Settings, ConfigError> {
        let sections = Self::read_sections(path)?;
        let mut settings = Settings::default();
        settings.merge(&sections)?;
        Ok(settings)
    }

    fn read_sections(path: &Path) -> Result<HashMap<String, Section>, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_sections(content)
    }

    fn parse_sections(content: String) -> Result<HashMap<String, Section>, ConfigError> {
        let mut ini = Ini::new();
        ini.read(content)
            .map_err(|e| ConfigError::IniParse(format!("Failed to parse INI: {}", e)))
    }

    /// Gets the system configuration file path.
    fn get_system_config_path() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            Some(PathBuf::from("/etc/xtbrun").join(CONFIG_FILE_NAME))
        }
        #[cfg(windows)]
        {
            std::env::var("PROGRAMDATA")
                .ok()
                .map(|pd| PathBuf::from(pd).join("xtbrun").join(CONFIG_FILE_NAME))
        }
    }

    /// Gets the user configuration file path.
    fn get_user_config_path() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            std::env::var("HOME").ok().map(|home| {
                PathBuf::from(home)
                    .join(".config")
                    .join("xtbrun")
                    .join(CONFIG_FILE_NAME)
            })
        }
        #[cfg(windows)]
        {
            std::env::var("APPDATA")
                .ok()
                .map(|appdata| PathBuf::from(appdata).join("xtbrun").join(CONFIG_FILE_NAME))
        }
    }

    /// Creates a commented configuration template at `path`.
    pub fn create_template(path: &Path) -> Result<(), ConfigError> {
        fs::write(path, Self::generate_template_content())?;
        info!("Created settings template at: {}", path.display());
        Ok(())
    }

    fn generate_template_content() -> String {
        format!(
            r#"# xtbrun configuration file
#
# Searched in ./{name}, ~/.config/xtbrun/{name} and /etc/xtbrun/{name};
# values in earlier locations override later ones.

[executable]
# Program looked up on PATH
name = xtb
# Used when the program is not on PATH: the executable or its folder
# path = /opt/xtb/bin

[runner]
# Run each job in a temporary directory and copy results back
scratch = false
# Parent directory for scratch directories (default: system temp dir)
# scratch_dir = /scratch
# Threads given to xtb via OMP_NUM_THREADS when a job does not set them
# threads = 4

[artifacts]
# Extra files to copy back besides the standard xtb outputs (comma separated)
# extra = xtbtopo.mol, gradient

[logging]
# error, warn, info, debug or trace
level = info
"#,
            name = CONFIG_FILE_NAME
        )
    }
}

impl Settings {
    /// Applies the values present in `sections` over the current ones.
    fn merge(&mut self, sections: &HashMap<String, Section>) -> Result<(), ConfigError> {
        if let Some(section) = sections.get("executable") {
            if let Some(name) = value(section, "name") {
                self.executable.name = name.to_string();
            }
            if let Some(path) = value(section, "path") {
                self.executable.path = Some(PathBuf::from(path));
            }
        }

        if let Some(section) = sections.get("runner") {
            if let Some(scratch) = value(section, "scratch") {
                self.runner.scratch = parse_bool(scratch).ok_or_else(|| {
                    ConfigError::InvalidValue(format!("Invalid scratch value: {}", scratch))
                })?;
            }
            if let Some(dir) = value(section, "scratch_dir") {
                self.runner.scratch_dir = Some(PathBuf::from(dir));
            }
            if let Some(threads) = value(section, "threads") {
                let threads: u32 = threads.parse().map_err(|_| {
                    ConfigError::InvalidValue(format!("Invalid threads: {}", threads))
                })?;
                if threads == 0 {
                    return Err(ConfigError::InvalidValue(
                        "threads must be at least 1".to_string(),
                    ));
                }
                self.runner.threads = Some(threads);
            }
        }

        if let Some(section) = sections.get("artifacts") {
            if let Some(extra) = value(section, "extra") {
                self.artifacts.extra = extra
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
        }

        if let Some(section) = sections.get("logging") {
            if let Some(level) = value(section, "level") {
                self.logging.level = level.to_string();
            }
        }

        Ok(())
    }
}

fn value<'a>(section: &'a Section, key: &str) -> Option<&'a str> {
    section
        .get(key)
        .and_then(|v| v.as_deref())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}
