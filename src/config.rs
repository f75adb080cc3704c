use std::path::Path;

use anyhow::Result;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::constants::KIB;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub run_id: String,
    /// Worker thread count; 0 selects one per logical CPU.
    pub workers: usize,
    pub min_chunk_kib: u64,
    pub max_chunk_kib: u64,
    /// Fraction of available memory a job may target, across all workers.
    pub memory_target_fraction: f64,
    pub monitor_interval_ms: u64,
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    pub config_hash: String,
}

impl Config {
    /// Reject caller-meaningless settings before any thread is spawned.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_chunk_kib == 0 {
            return Err("min_chunk_kib must be at least 1".to_string());
        }
        if self.min_chunk_kib > self.max_chunk_kib {
            return Err(format!(
                "min_chunk_kib {} exceeds max_chunk_kib {}",
                self.min_chunk_kib, self.max_chunk_kib
            ));
        }
        if !(self.memory_target_fraction > 0.0 && self.memory_target_fraction <= 1.0) {
            return Err(format!(
                "memory_target_fraction {} is outside (0, 1]",
                self.memory_target_fraction
            ));
        }
        if self.monitor_interval_ms == 0 {
            return Err("monitor_interval_ms must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn resolve_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    pub fn min_chunk_bytes(&self) -> u64 {
        self.min_chunk_kib * KIB
    }

    pub fn max_chunk_bytes(&self) -> u64 {
        self.max_chunk_kib * KIB
    }
}

pub fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    let bytes: Vec<u8> = if let Some(p) = path {
        std::fs::read(p)?
    } else {
        include_bytes!("../config/default.yml").to_vec()
    };

    let mut config: Config = serde_yaml::from_slice(&bytes)?;
    if config.run_id.trim().is_empty() {
        config.run_id = generate_run_id();
    }

    let config_hash = hash_bytes(&bytes);

    Ok(LoadedConfig { config, config_hash })
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    hex::encode(digest)
}

fn generate_run_id() -> String {
    let now = chrono::Utc::now();
    format!("{}_{}", now.format("%Y%m%dT%H%M%SZ"), rand_suffix())
}

fn rand_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{nanos:08x}")
}
