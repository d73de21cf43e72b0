//! TileForge - asynchronous OSM-to-PMTiles conversion pipeline.
//!
//! TileForge accepts OpenStreetMap extracts and converts them into PMTiles
//! archives through a fixed sequence of external tool stages
//! (`ogr2ogr` → `tippecanoe` → `pmtiles`), with a durable job queue, a
//! bounded worker pool, per-attempt progress tracking, retry with
//! exponential backoff, and cooperative cancellation that kills in-flight
//! subprocesses.
//!
//! # High-Level API
//!
//! The [`service`] module provides the facade most callers want:
//!
//! ```ignore
//! use tileforge::config::ConfigFile;
//! use tileforge::job::ConvertOptions;
//! use tileforge::service::ConversionService;
//!
//! let config = ConfigFile::load()?;
//! let service = ConversionService::start(&config)?;
//!
//! let job_id = service.submit("/data/region.osm.pbf", ConvertOptions::default()).await?;
//! loop {
//!     let report = service.status(&job_id)?;
//!     if report.status.is_terminal() {
//!         break;
//!     }
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod job;
pub mod logging;
pub mod pipeline;
pub mod queue;
pub mod service;
pub mod stage;
pub mod store;
pub mod telemetry;
pub mod worker;

/// Version of the TileForge library and CLI.
///
/// This is synchronized across all components in the workspace. The version
/// is defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
