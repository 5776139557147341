use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kernel::{Placement, SchedulingAlgorithm};

/// Largest logical address range a single partition may expose.
pub const MAX_ADDRESSABLE: usize = 256;

/// Bytes taken by the flag, pointer, date and size fields of a directory block.
const DIRECTORY_HEADER_SIZE: usize = 15;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Machine parameters, loaded from TOML. Every field has a default so an empty
/// file (or no file at all) boots the stock machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub memory: MemoryConfig,
    pub disk: DiskConfig,
    pub scheduler: SchedulerConfig,
    pub clock: ClockConfig,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub partitions: usize,
    pub partition_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            partitions: 3,
            partition_size: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    pub tracks: usize,
    pub sectors: usize,
    pub blocks: usize,
    pub block_size: usize,
    /// Leading tracks that make up the directory partition.
    pub directory_tracks: usize,
    /// Raw disk image to load at boot and save at shutdown.
    pub image: Option<PathBuf>,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            tracks: 4,
            sectors: 8,
            blocks: 8,
            block_size: 64,
            directory_tracks: 1,
            image: None,
        }
    }
}

impl DiskConfig {
    pub fn total_blocks(&self) -> usize {
        self.tracks * self.sectors * self.blocks
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub algorithm: SchedulingAlgorithm,
    pub quantum: u32,
    /// Priority every process shares while round robin or FCFS is active.
    pub default_priority: i32,
    /// Priority given to a loaded program when the caller does not supply one.
    pub user_priority: i32,
    pub placement: Placement,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            algorithm: SchedulingAlgorithm::RoundRobin,
            quantum: 6,
            default_priority: 0,
            user_priority: 32,
            placement: Placement::FirstFit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub tick_ms: u64,
    pub max_ticks: Option<u64>,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            max_ticks: None,
        }
    }
}

impl KernelConfig {
    /// Parses without validating; overrides are applied on top before the
    /// kernel boots and checks the result.
    pub fn from_toml_str(source: &str) -> Result<KernelConfig, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<KernelConfig, ConfigError> {
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Rejects machines the block and instruction formats cannot address.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let memory = &self.memory;
        if memory.partitions == 0 {
            return Err(ConfigError::Invalid("at least one memory partition is required".into()));
        }
        if memory.partition_size == 0 || memory.partition_size > MAX_ADDRESSABLE {
            return Err(ConfigError::Invalid(format!(
                "partition size must be between 1 and {} bytes",
                MAX_ADDRESSABLE
            )));
        }

        let disk = &self.disk;
        for (name, value) in [("tracks", disk.tracks), ("sectors", disk.sectors), ("blocks", disk.blocks)] {
            if value == 0 || value > 255 {
                return Err(ConfigError::Invalid(format!("disk {} must be between 1 and 255", name)));
            }
        }
        if disk.block_size <= DIRECTORY_HEADER_SIZE + 1 {
            return Err(ConfigError::Invalid(format!(
                "disk block size must exceed {} bytes",
                DIRECTORY_HEADER_SIZE + 1
            )));
        }
        if disk.directory_tracks == 0 || disk.directory_tracks >= disk.tracks {
            return Err(ConfigError::Invalid(
                "directory tracks must leave at least one data track".into(),
            ));
        }

        if self.scheduler.quantum == 0 {
            return Err(ConfigError::Invalid("quantum must be at least one burst".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_describe_stock_machine() {
        let config = KernelConfig::default();
        assert_eq!(config.memory.partitions, 3);
        assert_eq!(config.disk.total_blocks() * config.disk.block_size, 16 * 1024);
        assert_eq!(config.scheduler.quantum, 6);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_partial_toml() {
        let config = KernelConfig::from_toml_str(
            r#"
            log_level = "debug"

            [scheduler]
            algorithm = "priority"
            quantum = 2
            placement = "worst_fit"
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.algorithm, SchedulingAlgorithm::Priority);
        assert_eq!(config.scheduler.quantum, 2);
        assert_eq!(config.scheduler.placement, Placement::WorstFit);
        assert_eq!(config.memory, MemoryConfig::default());
        assert_eq!(config.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_config_rejects_oversized_partition() {
        let result = KernelConfig::from_toml_str("[memory]\npartition_size = 512\n").unwrap().validate();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_config_rejects_zero_quantum() {
        let result = KernelConfig::from_toml_str("[scheduler]\nquantum = 0\n").unwrap().validate();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_config_rejects_disk_without_data_tracks() {
        let result = KernelConfig::from_toml_str("[disk]\ntracks = 1\n").unwrap().validate();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_config_rejects_malformed_toml() {
        let result = KernelConfig::from_toml_str("[scheduler\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }
}
