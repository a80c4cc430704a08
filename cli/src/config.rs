use common::constants::{BIOS_START, MEM_DEFAULT_BYTES};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Size of the address space.
    pub memory_bytes: u64,
    /// Run without the terminal UI.
    pub headless: bool,
    /// Default address for `load` and `asm` without an explicit one.
    pub load_offset: u64,
    /// Modules loaded at startup.
    pub modules: Vec<String>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            memory_bytes: MEM_DEFAULT_BYTES,
            headless: false,
            load_offset: BIOS_START,
            modules: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Parse(#[from] serde_json::Error),
    #[error("memory_bytes {0:#x} does not cover the BIOS region")]
    MemoryTooSmall(u64),
}

impl Config {
    pub fn load(path: &str) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()
    }

    pub fn validate(self) -> Result<Config, ConfigError> {
        if self.memory_bytes < BIOS_START {
            return Err(ConfigError::MemoryTooSmall(self.memory_bytes));
        }
        Ok(self)
    }
}
