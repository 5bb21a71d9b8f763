//! Application configuration

use crate::queue::Lane;
use crate::EngineError;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fixed concurrency of the metadata lane
pub const METADATA_LANE_LIMIT: usize = 4;

/// Smallest accepted copy chunk
pub const MIN_COPY_CHUNK: usize = 4 * 1024;

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub filer: FilerConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            filer: FilerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Action engine settings, handed to the engine at construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Concurrency of the download lane
    pub parallel_downloads: usize,
    /// Buffer size for chunked copies; pause and cancel are checked per chunk
    pub copy_chunk_size: usize,
    /// How long cancelled workers get to stop on their own before being aborted
    pub cancel_grace_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallel_downloads: 4,
            copy_chunk_size: 1024 * 1024,
            cancel_grace_ms: 2000,
        }
    }
}

impl EngineConfig {
    /// Concurrency limit of a lane. Only the download lane is configurable.
    pub fn lane_limit(&self, lane: Lane) -> usize {
        match lane {
            Lane::MoveCopy | Lane::MoveDelete => 1,
            Lane::WriteMetadata => METADATA_LANE_LIMIT,
            Lane::Download => self.parallel_downloads.max(1),
        }
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.parallel_downloads == 0 {
            return Err(EngineError::Config(
                "engine.parallel_downloads must be at least 1".to_string(),
            ));
        }
        if self.copy_chunk_size < MIN_COPY_CHUNK {
            return Err(EngineError::Config(format!(
                "engine.copy_chunk_size must be at least {} bytes",
                MIN_COPY_CHUNK
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilerConfig {
    /// Send deleted files to the recycle bin
    pub use_recycle_bin: bool,
    pub create_missing_dirs: bool,
}

impl Default for FilerConfig {
    fn default() -> Self {
        Self {
            use_recycle_bin: false,
            create_missing_dirs: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log files older than this are removed at startup
    pub keep_days: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { keep_days: 7 }
    }
}

impl AppConfig {
    /// Load configuration from the default location
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from file, falling back to defaults when absent
    pub fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            tracing::info!("Configuration loaded from {:?}", config_path);
            Ok(config)
        } else {
            tracing::info!("Using default configuration");
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to file
    pub fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;

        tracing::info!("Configuration saved to {:?}", config_path);
        Ok(())
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.engine.validate()
    }

    /// Get the configuration file path
    pub fn config_path() -> PathBuf {
        ProjectDirs::from("com", "MediaLibrarian", "MediaLibrarian")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("./config.toml"))
    }
}
