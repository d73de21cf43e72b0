//! Conversion options supplied at submission time.
//!
//! Options are validated synchronously when a job is submitted, so bad zoom
//! bounds or an empty layer selection never reach the queue.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Highest zoom level the pipeline will tile to.
pub const ZOOM_CEILING: u8 = 20;

/// OSM layers `ogr2ogr` can extract from a PBF/XML extract.
pub const KNOWN_LAYERS: [&str; 5] = [
    "points",
    "lines",
    "multilinestrings",
    "multipolygons",
    "other_relations",
];

/// Layers extracted when the caller doesn't select any explicitly.
pub fn default_layers() -> Vec<String> {
    ["points", "lines", "multilinestrings", "multipolygons"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Invalid submission options, reported synchronously to the caller.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    /// Zoom value above the supported ceiling.
    #[error("{which} zoom {value} is out of range (0-{ZOOM_CEILING})")]
    ZoomOutOfRange { which: &'static str, value: u8 },

    /// min_zoom must not exceed max_zoom.
    #[error("min zoom {min} exceeds max zoom {max}")]
    ZoomOrder { min: u8, max: u8 },

    /// At least one layer must be selected.
    #[error("no layers selected")]
    NoLayers,

    /// Layer name `ogr2ogr` doesn't know.
    #[error("unknown layer '{0}'")]
    UnknownLayer(String),
}

/// How tippecanoe thins dense features when a tile overflows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Simplification {
    /// Drop the densest features as needed (`--drop-densest-as-needed`).
    #[default]
    DropDensest,

    /// Merge the densest features as needed (`--coalesce-densest-as-needed`).
    Coalesce,

    /// No thinning; oversized tiles fail the tiling run.
    None,
}

impl Simplification {
    /// The tippecanoe flag for this mode, if any.
    pub fn as_tippecanoe_flag(&self) -> Option<&'static str> {
        match self {
            Self::DropDensest => Some("--drop-densest-as-needed"),
            Self::Coalesce => Some("--coalesce-densest-as-needed"),
            Self::None => None,
        }
    }
}

impl fmt::Display for Simplification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::DropDensest => "drop-densest",
            Self::Coalesce => "coalesce",
            Self::None => "none",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Simplification {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "drop-densest" => Ok(Self::DropDensest),
            "coalesce" => Ok(Self::Coalesce),
            "none" => Ok(Self::None),
            other => Err(format!(
                "unknown simplification '{}' (expected drop-densest, coalesce, or none)",
                other
            )),
        }
    }
}

/// Parameters controlling a single conversion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConvertOptions {
    /// Minimum zoom level to tile (0-20).
    pub min_zoom: u8,

    /// Maximum zoom level to tile (0-20, >= min_zoom).
    pub max_zoom: u8,

    /// OSM layers to extract and tile.
    pub layers: Vec<String>,

    /// Feature-thinning mode passed to the tiler.
    #[serde(default)]
    pub simplification: Simplification,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            min_zoom: 0,
            max_zoom: 14,
            layers: default_layers(),
            simplification: Simplification::default(),
        }
    }
}

impl ConvertOptions {
    /// Validates zoom bounds and layer selection.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.min_zoom > ZOOM_CEILING {
            return Err(OptionsError::ZoomOutOfRange {
                which: "min",
                value: self.min_zoom,
            });
        }
        if self.max_zoom > ZOOM_CEILING {
            return Err(OptionsError::ZoomOutOfRange {
                which: "max",
                value: self.max_zoom,
            });
        }
        if self.min_zoom > self.max_zoom {
            return Err(OptionsError::ZoomOrder {
                min: self.min_zoom,
                max: self.max_zoom,
            });
        }
        if self.layers.is_empty() {
            return Err(OptionsError::NoLayers);
        }
        for layer in &self.layers {
            if !KNOWN_LAYERS.contains(&layer.as_str()) {
                return Err(OptionsError::UnknownLayer(layer.clone()));
            }
        }
        Ok(())
    }
}
