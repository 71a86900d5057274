//! Configuration of [`ReplayMemory`](super::ReplayMemory).
use crate::error::RepsError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`ReplayMemory`](super::ReplayMemory).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ReplayMemoryConfig {
    /// Maximum number of transitions that can be stored in the memory.
    /// When the memory is full, new transitions replace the oldest ones.
    pub capacity: usize,

    /// Random seed used for sampling transitions.
    pub seed: u64,
}

impl Default for ReplayMemoryConfig {
    fn default() -> Self {
        Self {
            capacity: 10000,
            seed: 42,
        }
    }
}

impl ReplayMemoryConfig {
    /// Sets the capacity of the memory.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the random seed for sampling.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Checks the configuration.
    pub fn validate(&self) -> Result<(), RepsError> {
        if self.capacity < 1 {
            return Err(RepsError::config("capacity must be at least 1"));
        }
        Ok(())
    }

    /// Constructs [`ReplayMemoryConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves [`ReplayMemoryConfig`] as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_serde_replay_memory_config() -> Result<()> {
        let config = ReplayMemoryConfig::default().capacity(100).seed(7);

        let dir = TempDir::new("replay_memory_config")?;
        let path = dir.path().join("replay_memory_config.yaml");
        println!("{:?}", path);

        config.save(&path)?;
        let config_ = ReplayMemoryConfig::load(&path)?;
        assert_eq!(config, config_);

        Ok(())
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let config = ReplayMemoryConfig::default().capacity(0);
        assert!(matches!(
            config.validate(),
            Err(RepsError::Configuration(_))
        ));
    }
}
