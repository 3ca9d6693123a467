use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Which screen colour to remove
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    #[default]
    Green,
    Blue,
}

impl ColorMode {
    pub const ALL: [ColorMode; 2] = [Self::Green, Self::Blue];

    /// Key settings preset for this mode
    pub fn settings(self) -> KeySettings {
        match self {
            Self::Green => KeySettings::green_screen(),
            Self::Blue => KeySettings::blue_screen(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Green => "green",
            Self::Blue => "blue",
        }
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ColorMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "green" => Ok(Self::Green),
            "blue" => Ok(Self::Blue),
            other => Err(ConfigError::InvalidValue {
                key: "color_mode".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Thresholds for the HSV key.
///
/// Hue is in degrees, everything else is normalized to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KeySettings {
    /// Centre of the key hue window (degrees, `[0, 360)`)
    pub hue_target: f32,
    /// Hue distance at which the match falls to zero (degrees, `(0, 180]`)
    pub hue_range: f32,
    /// Saturation at which a sample fully counts as key colour
    pub sat_min: f32,
    /// Darkest value still considered key colour
    pub val_min: f32,
    /// Brightest value still considered key colour
    pub val_max: f32,
    /// Half-width of the alpha transition around the 0.3 key-strength threshold
    pub smoothness: f32,
    /// Strength of key-colour removal from kept pixels
    pub spill_suppression: f32,
}

impl KeySettings {
    const HUE_RANGE: f32 = 80.0;
    const SAT_MIN: f32 = 0.15;
    const VAL_MIN: f32 = 0.1;
    const VAL_MAX: f32 = 0.98;
    const SMOOTHNESS: f32 = 0.12;
    const SPILL_SUPPRESSION: f32 = 0.7;

    fn preset(hue_target: f32) -> Self {
        Self {
            hue_target,
            hue_range: Self::HUE_RANGE,
            sat_min: Self::SAT_MIN,
            val_min: Self::VAL_MIN,
            val_max: Self::VAL_MAX,
            smoothness: Self::SMOOTHNESS,
            spill_suppression: Self::SPILL_SUPPRESSION,
        }
    }

    /// Green screen preset
    pub fn green_screen() -> Self {
        Self::preset(120.0)
    }

    /// Blue screen preset
    pub fn blue_screen() -> Self {
        Self::preset(240.0)
    }

    /// Green family keys dominate on the green channel, everything else on blue
    pub fn is_green_family(&self) -> bool {
        self.hue_target < 180.0
    }

    pub fn validate(&self) -> Result<()> {
        let unit = |key: &str, value: f32| -> Result<()> {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(invalid(key, value))
            }
        };

        if !(0.0..360.0).contains(&self.hue_target) {
            return Err(invalid("hue_target", self.hue_target));
        }
        if !(self.hue_range > 0.0 && self.hue_range <= 180.0) {
            return Err(invalid("hue_range", self.hue_range));
        }
        unit("sat_min", self.sat_min)?;
        unit("val_min", self.val_min)?;
        unit("val_max", self.val_max)?;
        unit("smoothness", self.smoothness)?;
        unit("spill_suppression", self.spill_suppression)?;

        if self.val_min > self.val_max {
            return Err(ConfigError::InvalidValue {
                key: "val_min..val_max".to_string(),
                value: format!("{}..{}", self.val_min, self.val_max),
            }
            .into());
        }

        Ok(())
    }
}

impl Default for KeySettings {
    fn default() -> Self {
        Self::green_screen()
    }
}

fn invalid(key: &str, value: f32) -> crate::KeyerError {
    ConfigError::InvalidValue {
        key: format!("key_settings.{key}"),
        value: value.to_string(),
    }
    .into()
}
