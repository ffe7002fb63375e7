//! VM tuning knobs.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::runtime::gc::gc_heap::{DEFAULT_FIRST_GC, DEFAULT_GROW_RATE};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Value-stack slots reserved up front.
    pub initial_stack: usize,
    /// Call depth at which `StackOverflowException` is raised.
    pub max_frames: usize,
    /// Bytes allocated before the first collection.
    pub first_gc: usize,
    /// Multiplier applied to the live heap size to get the next threshold.
    pub heap_grow_rate: f64,
    /// `try` blocks that may be open at once in a single frame.
    pub max_handlers: usize,
    /// Nested host-to-guest calls (natives calling back into the VM).
    pub max_reentrant: usize,
    /// Print every executed instruction.
    pub trace: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            initial_stack: 256,
            max_frames: 100_000,
            first_gc: DEFAULT_FIRST_GC,
            heap_grow_rate: DEFAULT_GROW_RATE,
            max_handlers: 10,
            max_reentrant: 1000,
            trace: false,
        }
    }
}

impl VmConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: VmConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.heap_grow_rate > 1.0) {
            return Err(ConfigError::Invalid {
                field: "heap_grow_rate",
                reason: format!("must be greater than 1, got {}", self.heap_grow_rate),
            });
        }
        if self.max_frames == 0 {
            return Err(ConfigError::Invalid {
                field: "max_frames",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_handlers == 0 {
            return Err(ConfigError::Invalid {
                field: "max_handlers",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_reentrant == 0 {
            return Err(ConfigError::Invalid {
                field: "max_reentrant",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
