//! Configuration loading with JSON file support and environment variable overrides.
//!
//! Pattern: `HIERFLOW_*` environment variables override config file values.
//! Example: `HIERFLOW_NCCL_USE_COMPUTE_STREAM=true` overrides
//! `resource.nccl_use_compute_stream`.

use crate::parallel::{DeviceType, ParallelDesc};
use crate::utils::error::{HierflowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Cluster resources visible to the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Number of machines (processes) in the job
    #[serde(default = "default_one")]
    pub machine_num: usize,

    /// GPUs per machine
    #[serde(default = "default_one")]
    pub gpu_device_num: usize,

    /// CPU devices per machine
    #[serde(default = "default_one")]
    pub cpu_device_num: usize,

    /// When set, collectives must not share the compute stream and go
    /// through explicit copy/transport tasks instead.
    #[serde(default)]
    pub nccl_use_compute_stream: bool,
}

/// Complete configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HierflowConfig {
    #[serde(default)]
    pub resource: ResourceConfig,

    /// Additional key-value configuration
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_one() -> usize { 1 }

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            machine_num: default_one(),
            gpu_device_num: default_one(),
            cpu_device_num: default_one(),
            nccl_use_compute_stream: false,
        }
    }
}

impl ResourceConfig {
    /// Number of devices of `device_type` on each machine.
    pub fn device_num(&self, device_type: DeviceType) -> usize {
        match device_type {
            DeviceType::Cpu => self.cpu_device_num,
            DeviceType::Gpu => self.gpu_device_num,
        }
    }

    /// Reject placements that name machines or devices this job does not have.
    pub fn check_placement(&self, parallel_desc: &ParallelDesc) -> Result<()> {
        let device_num = self.device_num(parallel_desc.device_type());
        for (machine_id, device_id) in parallel_desc.devices() {
            if *machine_id >= self.machine_num {
                return Err(HierflowError::MalformedDescriptor(format!(
                    "placement {} names machine {} but machine_num is {}",
                    parallel_desc, machine_id, self.machine_num
                )));
            }
            if *device_id >= device_num {
                return Err(HierflowError::MalformedDescriptor(format!(
                    "placement {} names device {} but each machine has {} {} device(s)",
                    parallel_desc, device_id, device_num, parallel_desc.device_type()
                )));
            }
        }
        Ok(())
    }
}

impl HierflowConfig {
    /// Load configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| HierflowError::Config(format!("Failed to parse config: {}", e)))?;

        info!(config_file = %path.display(), "Loaded configuration from file");
        Ok(config)
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Environment variables are prefixed with `HIERFLOW_` and use uppercase.
    /// Nested keys use double underscore: `HIERFLOW_RESOURCE__MACHINE_NUM`.
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from environment only (no file).
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        for (key, value) in env::vars() {
            let Some(config_key) = key.strip_prefix("HIERFLOW_") else {
                continue;
            };
            let config_key = config_key.to_lowercase();
            let parts: Vec<&str> = config_key.split("__").collect();

            match parts.as_slice() {
                ["resource", field] | [field] => self.apply_resource_override(field, &value),
                _ => {
                    debug!(key = %key, "Unknown config key pattern");
                }
            }
        }
    }

    fn apply_resource_override(&mut self, field: &str, value: &str) {
        match field {
            "machine_num" => if let Ok(v) = value.parse() { self.resource.machine_num = v; }
            "gpu_device_num" => if let Ok(v) = value.parse() { self.resource.gpu_device_num = v; }
            "cpu_device_num" => if let Ok(v) = value.parse() { self.resource.cpu_device_num = v; }
            "nccl_use_compute_stream" => {
                self.resource.nccl_use_compute_stream = value.to_lowercase() == "true" || value == "1";
            }
            _ => {}
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        if self.resource.machine_num == 0 {
            return Err(HierflowError::Config("machine_num must be >= 1".to_string()));
        }
        if self.resource.gpu_device_num == 0 && self.resource.cpu_device_num == 0 {
            return Err(HierflowError::Config(
                "at least one of gpu_device_num / cpu_device_num must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Save configuration to a JSON file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| HierflowError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::ParallelConf;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = HierflowConfig::default();
        assert_eq!(config.resource.machine_num, 1);
        assert!(!config.resource.nccl_use_compute_stream);
    }

    #[test]
    fn test_config_save_load() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("config.json");

        let mut config = HierflowConfig::default();
        config.resource.gpu_device_num = 8;
        config.save(&path)?;

        let loaded = HierflowConfig::from_file(&path)?;
        assert_eq!(loaded.resource.gpu_device_num, 8);
        Ok(())
    }

    #[test]
    fn test_partial_file_uses_defaults() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"resource": {"machine_num": 2}}"#)?;

        let loaded = HierflowConfig::from_file(&path)?;
        assert_eq!(loaded.resource.machine_num, 2);
        assert_eq!(loaded.resource.gpu_device_num, 1);
        Ok(())
    }

    #[test]
    fn test_env_override() {
        env::set_var("HIERFLOW_RESOURCE__NCCL_USE_COMPUTE_STREAM", "true");
        env::set_var("HIERFLOW_CPU_DEVICE_NUM", "4");

        let config = HierflowConfig::from_env();
        assert!(config.resource.nccl_use_compute_stream);
        assert_eq!(config.resource.cpu_device_num, 4);

        env::remove_var("HIERFLOW_RESOURCE__NCCL_USE_COMPUTE_STREAM");
        env::remove_var("HIERFLOW_CPU_DEVICE_NUM");
    }

    #[test]
    fn test_validation() {
        let mut config = HierflowConfig::default();
        assert!(config.validate().is_ok());

        config.resource.machine_num = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_check_placement() -> Result<()> {
        let resource = ResourceConfig { machine_num: 2, gpu_device_num: 4, ..Default::default() };
        let inside = ParallelDesc::new(&ParallelConf::new("gpu", &["0:0-3", "1:0-3"]))?;
        assert!(resource.check_placement(&inside).is_ok());

        let outside = ParallelDesc::new(&ParallelConf::new("gpu", &["0:0-7"]))?;
        assert!(resource.check_placement(&outside).is_err());
        Ok(())
    }
}
