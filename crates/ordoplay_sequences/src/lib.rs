// SPDX-License-Identifier: MIT OR Apache-2.0
//! Indexed sequences of records for `OrdoPlay`.
//!
//! This crate provides the data side of sequence browsing:
//! - Records with typed content (images, meshes, transforms, point sets,
//!   cameras, display properties, generic classes)
//! - An object registry with batched change notification
//! - Per-kind content copiers
//! - Indexed sequences with deep-copy insert semantics
//!
//! ## Architecture
//!
//! The registry is the sole owner of records; everything else refers to them
//! by [`ObjectId`]. A [`Scene`] pairs the live registry with the sequences
//! that are browsed into it.

pub mod change;
pub mod copier;
pub mod error;
pub mod record;
pub mod registry;
pub mod scene;
pub mod sequence;

pub use change::ChangeTracker;
pub use copier::{
    CameraCopier, ContentCopier, CopierRegistry, GenericCopier, ImageCopier, MeshCopier,
    PointSetCopier, TransformCopier,
};
pub use error::{Result, SequenceError};
pub use record::{
    CameraContent, ControlPoint, DisplayContent, GenericContent, ImageContent, Matrix4,
    MeshContent, MeshData, PixelBuffer, PointSetContent, Record, RecordContent, RecordKind,
    TransformContent, TransformFunction, BASE_NAME_ATTRIBUTE, IDENTITY,
};
pub use registry::{ObjectId, Registry, RegistryEvent};
pub use scene::Scene;
pub use sequence::{
    format_index_value, parse_index_value, read_index_values, IndexLookup, IndexType,
    IndexedSequence, SequenceDocument, SequenceId,
};
