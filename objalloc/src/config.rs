//! # Phase Configuration
//!
//! Knobs for the object allocation phase.
//!
//! Configuration comes from three layers, later ones winning:
//!
//! 1. [`ObjectAllocConfig::default`]
//! 2. A TOML fragment (usually the `[object_alloc]` table of a JIT config
//!    file), see [`ObjectAllocConfig::from_toml_str`]
//! 3. Environment variables, see [`ObjectAllocConfig::with_env_overrides`]
//!
//! ## Example
//!
//! ```toml
//! enable_stack_allocation = true
//! max_stack_alloc_size = 4096
//! run_after_morph = false
//! ```
//!
//! | Variable | Field |
//! |----------|-------|
//! | `OBJALLOC_STACK_ALLOC` | `enable_stack_allocation` (`0`/`1`/`true`/`false`) |
//! | `OBJALLOC_MAX_SIZE` | `max_stack_alloc_size` (decimal or `0x` hex) |

use serde::{Deserialize, Serialize};

use crate::error::{AllocError, Result};

/// Default ceiling, in bytes, for a single stack-allocated object.
pub const DEFAULT_MAX_STACK_ALLOC_SIZE: u32 = 0x2000;

/// Environment variable enabling object stack allocation.
pub const ENV_STACK_ALLOC: &str = "OBJALLOC_STACK_ALLOC";

/// Environment variable overriding the size ceiling.
pub const ENV_MAX_SIZE: &str = "OBJALLOC_MAX_SIZE";

/// Configuration for the object allocation phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectAllocConfig {
    /// Run escape analysis and allocate non-escaping objects on the stack.
    /// When off, every allocation becomes a helper call.
    pub enable_stack_allocation: bool,

    /// Largest object (header included) that may live in a stack frame.
    pub max_stack_alloc_size: u32,

    /// The phase runs after global morph, so statements it creates or
    /// changes must be normalized on the spot.
    pub run_after_morph: bool,

    /// Check every statement for allocations outside canonical form, and
    /// scan blocks that are not flagged as containing allocations.
    pub verify_canonical_shapes: bool,
}

impl Default for ObjectAllocConfig {
    fn default() -> Self {
        Self {
            enable_stack_allocation: false,
            max_stack_alloc_size: DEFAULT_MAX_STACK_ALLOC_SIZE,
            run_after_morph: true,
            verify_canonical_shapes: cfg!(debug_assertions),
        }
    }
}

impl ObjectAllocConfig {
    /// Parse a TOML fragment; missing keys keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|var| std::env::var(var).ok())
    }

    /// Apply overrides from `lookup`, which maps variable names to values.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_STACK_ALLOC) {
            self.enable_stack_allocation = parse_bool(&value)
                .ok_or(AllocError::InvalidEnv { var: ENV_STACK_ALLOC, value })?;
        }
        if let Some(value) = lookup(ENV_MAX_SIZE) {
            self.max_stack_alloc_size = parse_size(&value)
                .ok_or(AllocError::InvalidEnv { var: ENV_MAX_SIZE, value })?;
        }
        Ok(self)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" => Some(true),
        "0" | "false" | "off" => Some(false),
        _ => None,
    }
}

fn parse_size(value: &str) -> Option<u32> {
    let value = value.trim();
    match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}
