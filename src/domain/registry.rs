//! Model Registry
//!
//! Maps a model identifier (e.g. `H6008`) to the packet layout and
//! brightness range its firmware expects. Unknown models fall back to the
//! `default` entry so unrecognised hardware stays controllable.

use crate::domain::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_MODEL: &str = "default";

/// LED mode codes placed at the start of a color payload.
pub mod led_mode {
    pub const MODE_2: u8 = 0x02;
    pub const MODE_D: u8 = 0x0D;
    /// Longer structured color command.
    pub const MODE_1501: u8 = 0x15;
    pub const MICROPHONE: u8 = 0x06;
    pub const SCENES: u8 = 0x05;
}

/// Color payload layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    /// `[led_mode, r, g, b]`
    Simple,
    /// `[led_mode, 0x01, r, g, b, 0, 0, 0, 0, 0, 0xFF, 0x74]`
    Extended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub led_mode: u8,
    pub color_mode: ColorMode,
    pub brightness_max: u16,
}

impl ModelDescriptor {
    pub const fn new(led_mode: u8, color_mode: ColorMode, brightness_max: u16) -> Self {
        Self {
            led_mode,
            color_mode,
            brightness_max,
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.brightness_max == 0 || self.brightness_max > u16::from(u8::MAX) {
            return Err(ValidationError::out_of_range(
                "brightness_max",
                i64::from(self.brightness_max),
                1,
                i64::from(u8::MAX),
            ));
        }
        Ok(())
    }
}

impl Default for ModelDescriptor {
    fn default() -> Self {
        BUILTIN_DEFAULT
    }
}

const BUILTIN_DEFAULT: ModelDescriptor =
    ModelDescriptor::new(led_mode::MODE_2, ColorMode::Simple, 255);

const BUILTIN_MODELS: &[(&str, ModelDescriptor)] = &[
    (DEFAULT_MODEL, BUILTIN_DEFAULT),
    (
        "H6008",
        ModelDescriptor::new(led_mode::MODE_D, ColorMode::Simple, 245),
    ),
    (
        "H6046",
        ModelDescriptor::new(led_mode::MODE_1501, ColorMode::Extended, 100),
    ),
    (
        "H6072",
        ModelDescriptor::new(led_mode::MODE_1501, ColorMode::Extended, 100),
    ),
    (
        "H6076",
        ModelDescriptor::new(led_mode::MODE_1501, ColorMode::Extended, 100),
    ),
];

/// Immutable after startup.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: HashMap<String, ModelDescriptor>,
}

impl ModelRegistry {
    pub fn builtin() -> Self {
        let models = BUILTIN_MODELS
            .iter()
            .map(|(key, descriptor)| (normalise(key), *descriptor))
            .collect();
        Self { models }
    }

    /// Built-in table with entries from settings merged on top.
    pub fn with_overrides(
        overrides: &HashMap<String, ModelDescriptor>,
    ) -> Result<Self, ValidationError> {
        let mut registry = Self::builtin();
        for (key, descriptor) in overrides {
            descriptor.validate()?;
            registry.models.insert(normalise(key), *descriptor);
        }
        Ok(registry)
    }

    pub fn lookup(&self, model: &str) -> ModelDescriptor {
        self.models
            .get(&normalise(model))
            .or_else(|| self.models.get(DEFAULT_MODEL))
            .copied()
            .unwrap_or(BUILTIN_DEFAULT)
    }

    pub fn is_known(&self, model: &str) -> bool {
        self.models.contains_key(&normalise(model))
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn normalise(model: &str) -> String {
    model.trim().to_ascii_lowercase()
}
