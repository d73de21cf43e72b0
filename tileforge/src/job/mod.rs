//! Job data model: identifiers, options, descriptors, records, status.
//!
//! # Ownership
//!
//! - [`JobDescriptor`] is immutable; the queue owns it until dispatch, then
//!   the executing worker does.
//! - [`JobRecord`] is mutable and lives in the store; workers mutate it only
//!   through [`RecordPatch`]es serialized by the store's compare-and-set.

mod descriptor;
mod id;
mod options;
mod record;
mod status;

pub use descriptor::JobDescriptor;
pub use id::JobId;
pub use options::{
    default_layers, ConvertOptions, OptionsError, Simplification, KNOWN_LAYERS, ZOOM_CEILING,
};
pub use record::{JobRecord, RecordPatch, ResultRef};
pub use status::JobStatus;
