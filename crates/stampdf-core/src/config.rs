//! Editor configuration
//!
//! Every field has a default, so a page can hand in a partial JSON object
//! (or nothing at all) and get the stock behaviour for the rest.

use serde::{Deserialize, Serialize};

use crate::error::StampError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EditorConfig {
    pub defaults: ElementDefaults,
    pub limits: SizeLimits,
    pub zoom: ZoomRange,
    /// Pointer travel (screen pixels) a press must exceed to count as a drag.
    pub drag_threshold_px: f64,
    pub fonts: FontConfig,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            defaults: ElementDefaults::default(),
            limits: SizeLimits::default(),
            zoom: ZoomRange::default(),
            drag_threshold_px: 5.0,
            fonts: FontConfig::default(),
        }
    }
}

impl EditorConfig {
    pub fn from_json(json: &str) -> Result<Self, StampError> {
        serde_json::from_str(json).map_err(|e| StampError::SerializationError(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, StampError> {
        serde_json::to_string(self).map_err(|e| StampError::SerializationError(e.to_string()))
    }
}

/// Values used when a new element is created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ElementDefaults {
    pub font_size: f64,
    pub text_width: f64,
    pub text: String,
    pub image_x: f64,
    pub image_y: f64,
    /// Largest side of a freshly placed image, in document units.
    pub image_max_side: f64,
}

impl Default for ElementDefaults {
    fn default() -> Self {
        Self {
            font_size: 12.0,
            text_width: 200.0,
            text: "テキストを入力".to_string(),
            image_x: 100.0,
            image_y: 100.0,
            image_max_side: 200.0,
        }
    }
}

/// Size floors (and the font size ceiling used by property edits).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SizeLimits {
    pub min_font_size: f64,
    pub max_font_size: f64,
    pub min_text_width: f64,
    pub min_image_side: f64,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            min_font_size: 8.0,
            max_font_size: 72.0,
            min_text_width: 20.0,
            min_image_side: 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ZoomRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub initial: f64,
}

impl Default for ZoomRange {
    fn default() -> Self {
        Self {
            min: 0.5,
            max: 2.0,
            step: 0.1,
            initial: 1.0,
        }
    }
}

impl ZoomRange {
    /// Clamp a requested zoom into range and snap it to the step grid.
    pub fn clamp(&self, scale: f64) -> f64 {
        if !scale.is_finite() {
            return self.initial;
        }
        let clamped = scale.clamp(self.min, self.max);
        if self.step > 0.0 {
            let steps = ((clamped - self.min) / self.step).round();
            (self.min + steps * self.step).clamp(self.min, self.max)
        } else {
            clamped
        }
    }
}

/// One candidate location for the fallback font.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FontSource {
    pub url: String,
}

impl FontSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FontConfig {
    /// Tried in order; the first one that yields a parseable face wins.
    pub sources: Vec<FontSource>,
    pub timeout_ms: u32,
}

impl Default for FontConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                FontSource::new("/fonts/NotoSansJP-Regular.ttf"),
                FontSource::new(
                    "https://cdn.jsdelivr.net/fontsource/fonts/noto-sans-jp@latest/japanese-400-normal.ttf",
                ),
                FontSource::new(
                    "https://raw.githubusercontent.com/google/fonts/main/ofl/notosansjp/NotoSansJP%5Bwght%5D.ttf",
                ),
            ],
            timeout_ms: 10_000,
        }
    }
}
