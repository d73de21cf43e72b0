//! Static stage table for the conversion pipeline.
//!
//! The stage sequence is fixed: `validate → extract → tile → package →
//! finalize`. Each stage is a tagged variant selected from this table rather
//! than a per-tool type, so adding or reordering stages is a data change.
//!
//! Subprocess stages run inside the job's working directory, so tool
//! invocations reference their inputs and outputs by bare file name; only the
//! source extract is passed as an absolute path.

use crate::job::ConvertOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// File name of the tiling stage's output inside the working directory.
pub const MBTILES_NAME: &str = "tiles.mbtiles";

/// File name of the packaging stage's output inside the working directory.
pub const ARCHIVE_NAME: &str = "tiles.pmtiles";

/// Extension of the result artifact in the results directory.
pub const RESULT_EXTENSION: &str = "pmtiles";

/// One ordered step of the conversion pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    /// Check the source extract (exists, size bounds, extension).
    Validate,

    /// Extract the selected layers to GeoJSON with `ogr2ogr`.
    Extract,

    /// Build vector tiles with `tippecanoe`.
    Tile,

    /// Package the tileset into a PMTiles archive with `pmtiles`.
    Package,

    /// Publish the archive into the results directory.
    Finalize,
}

impl StageKind {
    /// The fixed stage execution order.
    pub const SEQUENCE: [StageKind; 5] = [
        StageKind::Validate,
        StageKind::Extract,
        StageKind::Tile,
        StageKind::Package,
        StageKind::Finalize,
    ];

    /// Stage name as reported in job status.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Extract => "extract",
            Self::Tile => "tile",
            Self::Package => "package",
            Self::Finalize => "finalize",
        }
    }

    /// Share of overall job progress this stage represents. Sums to 100.
    pub fn weight(&self) -> u8 {
        match self {
            Self::Validate => 10,
            Self::Extract => 30,
            Self::Tile => 40,
            Self::Package => 15,
            Self::Finalize => 5,
        }
    }

    /// Overall progress when this stage begins (sum of prior weights).
    pub fn progress_base(&self) -> u8 {
        Self::SEQUENCE
            .iter()
            .take_while(|kind| **kind != *self)
            .map(|kind| kind.weight())
            .sum()
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Locations of the external conversion tools.
#[derive(Clone, Debug)]
pub struct ToolPaths {
    /// GDAL's `ogr2ogr` (layer extraction).
    pub ogr2ogr: PathBuf,

    /// `tippecanoe` (vector tiling).
    pub tippecanoe: PathBuf,

    /// `pmtiles` (archive packaging).
    pub pmtiles: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ogr2ogr: PathBuf::from("ogr2ogr"),
            tippecanoe: PathBuf::from("tippecanoe"),
            pmtiles: PathBuf::from("pmtiles"),
        }
    }
}

/// One external tool invocation within a stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Short label for logs (e.g. the layer being extracted).
    pub label: String,

    /// Tool binary to run.
    pub program: PathBuf,

    /// Argument list.
    pub args: Vec<String>,
}

/// What a stage actually does when it runs.
#[derive(Clone, Debug)]
pub enum StageWork {
    /// In-process source check.
    CheckSource,

    /// Run one or more external tools in order.
    RunTools(Vec<ToolInvocation>),

    /// In-process copy of the packaged archive into the results directory.
    PublishArchive,
}

/// A stage plus its concrete work for one job.
#[derive(Clone, Debug)]
pub struct StageSpec {
    /// Which stage this is.
    pub kind: StageKind,

    /// The work to perform.
    pub work: StageWork,

    /// Artifacts the stage must leave in the working directory (relative
    /// paths). Checked by the runner after subprocess stages; the next
    /// stage's input contract.
    pub outputs: Vec<PathBuf>,
}

/// Builds the full stage sequence for one job.
///
/// `source` must be absolute (or resolvable from any directory): subprocess
/// stages run with the job working directory as their current directory.
pub fn build_stage_sequence(
    source: &Path,
    options: &ConvertOptions,
    tools: &ToolPaths,
) -> Vec<StageSpec> {
    vec![
        StageSpec {
            kind: StageKind::Validate,
            work: StageWork::CheckSource,
            outputs: vec![],
        },
        StageSpec {
            kind: StageKind::Extract,
            work: StageWork::RunTools(extract_invocations(source, options, tools)),
            outputs: options
                .layers
                .iter()
                .map(|layer| PathBuf::from(format!("{}.geojson", layer)))
                .collect(),
        },
        StageSpec {
            kind: StageKind::Tile,
            work: StageWork::RunTools(vec![tile_invocation(options, tools)]),
            outputs: vec![PathBuf::from(MBTILES_NAME)],
        },
        StageSpec {
            kind: StageKind::Package,
            work: StageWork::RunTools(vec![package_invocation(tools)]),
            outputs: vec![PathBuf::from(ARCHIVE_NAME)],
        },
        StageSpec {
            kind: StageKind::Finalize,
            work: StageWork::PublishArchive,
            outputs: vec![],
        },
    ]
}

/// One `ogr2ogr` run per selected layer, producing `<layer>.geojson`.
fn extract_invocations(
    source: &Path,
    options: &ConvertOptions,
    tools: &ToolPaths,
) -> Vec<ToolInvocation> {
    options
        .layers
        .iter()
        .map(|layer| ToolInvocation {
            label: layer.clone(),
            program: tools.ogr2ogr.clone(),
            args: vec![
                "-f".to_string(),
                "GeoJSON".to_string(),
                format!("{}.geojson", layer),
                source.display().to_string(),
                layer.clone(),
            ],
        })
        .collect()
}

/// The `tippecanoe` run over all extracted layers.
fn tile_invocation(options: &ConvertOptions, tools: &ToolPaths) -> ToolInvocation {
    let mut args = vec![
        "-o".to_string(),
        MBTILES_NAME.to_string(),
        "--force".to_string(),
        "--minimum-zoom".to_string(),
        options.min_zoom.to_string(),
        "--maximum-zoom".to_string(),
        options.max_zoom.to_string(),
    ];
    if let Some(flag) = options.simplification.as_tippecanoe_flag() {
        args.push(flag.to_string());
    }
    for layer in &options.layers {
        args.push("-l".to_string());
        args.push(layer.clone());
        args.push(format!("{}.geojson", layer));
    }

    ToolInvocation {
        label: "tippecanoe".to_string(),
        program: tools.tippecanoe.clone(),
        args,
    }
}

/// The `pmtiles convert` run producing the final archive.
fn package_invocation(tools: &ToolPaths) -> ToolInvocation {
    ToolInvocation {
        label: "pmtiles".to_string(),
        program: tools.pmtiles.clone(),
        args: vec![
            "convert".to_string(),
            MBTILES_NAME.to_string(),
            ARCHIVE_NAME.to_string(),
        ],
    }
}
