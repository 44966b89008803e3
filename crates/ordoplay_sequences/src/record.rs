// SPDX-License-Identifier: MIT OR Apache-2.0
//! Heterogeneous records stored in sequences and mirrored into proxies.
//!
//! A [`Record`] is a named object with string attributes, optional links to
//! display records and a typed [`RecordContent`] payload. Bulk payloads (pixel
//! buffers, meshes, transform functions) are held behind `Arc` so proxies can
//! share them with sequence items without copying the data.

use crate::change::ChangeTracker;
use crate::registry::ObjectId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Attribute holding the name a record had before a proxy rename
pub const BASE_NAME_ATTRIBUTE: &str = "Sequences.BaseName";

/// Row-major 4x4 matrix
pub type Matrix4 = [[f64; 4]; 4];

/// Identity matrix
pub const IDENTITY: Matrix4 = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
    [0.0, 0.0, 0.0, 1.0],
];

/// Kind of content carried by a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    /// Voxel/pixel data with geometry
    Image,
    /// Surface mesh
    Mesh,
    /// Spatial transform
    Transform,
    /// Point list / annotations
    PointSet,
    /// Viewing camera
    Camera,
    /// Display properties of another record
    Display,
    /// Anything else, identified by its own class name
    Generic,
}

impl RecordKind {
    /// Class name used for the built-in kinds
    pub fn class_name(&self) -> &'static str {
        match self {
            Self::Image => "ImageRecord",
            Self::Mesh => "MeshRecord",
            Self::Transform => "TransformRecord",
            Self::PointSet => "PointSetRecord",
            Self::Camera => "CameraRecord",
            Self::Display => "DisplayRecord",
            Self::Generic => "GenericRecord",
        }
    }
}

/// Pixel buffer of an image record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelBuffer {
    /// Extent along i, j, k
    pub dimensions: [u32; 3],
    /// Scalar values, i fastest
    pub scalars: Vec<f32>,
}

impl PixelBuffer {
    /// Create a buffer filled with a constant value
    pub fn filled(dimensions: [u32; 3], value: f32) -> Self {
        let len = dimensions.iter().map(|d| *d as usize).product();
        Self {
            dimensions,
            scalars: vec![value; len],
        }
    }
}

/// Image content: pixels plus their geometry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageContent {
    /// Shared pixel data
    pub pixels: Option<Arc<PixelBuffer>>,
    /// Voxel index to world coordinates
    pub ijk_to_world: Matrix4,
}

/// Triangle mesh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    /// Vertex positions
    pub points: Vec<[f32; 3]>,
    /// Triangle vertex indices
    pub triangles: Vec<[u32; 3]>,
}

/// Mesh content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshContent {
    /// Shared mesh data
    pub mesh: Option<Arc<MeshData>>,
}

/// Transform function object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformFunction {
    /// Homogeneous matrix mapping to the parent frame
    pub matrix: Matrix4,
}

impl TransformFunction {
    /// A pure translation
    pub fn translation(offset: [f64; 3]) -> Self {
        let mut matrix = IDENTITY;
        for (row, value) in offset.iter().enumerate() {
            matrix[row][3] = *value;
        }
        Self { matrix }
    }
}

/// Transform content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformContent {
    /// Shared transform-to-parent function
    pub to_parent: Option<Arc<TransformFunction>>,
}

/// One point of a point set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPoint {
    /// Point label
    pub label: String,
    /// World position
    pub position: [f64; 3],
    /// Selection state
    pub selected: bool,
}

/// Point set / annotation content
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointSetContent {
    /// Points in order
    pub points: Vec<ControlPoint>,
}

impl PointSetContent {
    /// Replace all points with a copy of `other`'s points
    pub fn deep_copy_from(&mut self, other: &PointSetContent) {
        self.points.clear();
        self.points.extend(other.points.iter().cloned());
    }
}

/// Camera parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraContent {
    /// Eye position
    pub position: [f64; 3],
    /// Point the camera looks at
    pub focal_point: [f64; 3],
    /// Up direction
    pub view_up: [f64; 3],
    /// Orthographic projection
    pub parallel_projection: bool,
    /// Half height of the viewport in orthographic mode
    pub parallel_scale: f64,
    /// Vertical view angle in degrees
    pub view_angle: f64,
    /// Near and far clipping distances, derived from the other fields
    pub clipping_range: [f64; 2],
}

impl CameraContent {
    const NEAR_FACTOR: f64 = 0.01;
    const FAR_FACTOR: f64 = 100.0;
    const MIN_NEAR: f64 = 0.001;

    /// Distance between the eye and the focal point
    pub fn distance(&self) -> f64 {
        self.position
            .iter()
            .zip(self.focal_point.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f64>()
            .sqrt()
    }

    /// Recompute the clipping range from the eye/focal distance
    pub fn reset_clipping_range(&mut self) {
        let distance = self.distance();
        let near = (distance * Self::NEAR_FACTOR).max(Self::MIN_NEAR);
        let far = (distance * Self::FAR_FACTOR).max(near * Self::FAR_FACTOR);
        self.clipping_range = [near, far];
    }
}

impl Default for CameraContent {
    fn default() -> Self {
        let mut camera = Self {
            position: [0.0, 500.0, 0.0],
            focal_point: [0.0, 0.0, 0.0],
            view_up: [0.0, 0.0, 1.0],
            parallel_projection: false,
            parallel_scale: 1.0,
            view_angle: 30.0,
            clipping_range: [0.0, 0.0],
        };
        camera.reset_clipping_range();
        camera
    }
}

/// Display properties of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayContent {
    /// Visibility
    pub visible: bool,
    /// RGB color
    pub color: [f32; 3],
    /// Opacity in 0..=1
    pub opacity: f32,
    /// Any further display settings
    pub properties: IndexMap<String, String>,
}

impl Default for DisplayContent {
    fn default() -> Self {
        Self {
            visible: true,
            color: [1.0, 1.0, 1.0],
            opacity: 1.0,
            properties: IndexMap::new(),
        }
    }
}

/// Content of a class without a dedicated kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericContent {
    /// Class name of the record
    pub class_name: String,
    /// Named field values
    pub fields: IndexMap<String, serde_json::Value>,
}

/// Typed payload of a record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RecordContent {
    /// Image data
    Image(ImageContent),
    /// Mesh data
    Mesh(MeshContent),
    /// Transform
    Transform(TransformContent),
    /// Point set
    PointSet(PointSetContent),
    /// Camera
    Camera(CameraContent),
    /// Display properties
    Display(DisplayContent),
    /// Other classes
    Generic(GenericContent),
}

impl RecordContent {
    /// Content kind
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Image(_) => RecordKind::Image,
            Self::Mesh(_) => RecordKind::Mesh,
            Self::Transform(_) => RecordKind::Transform,
            Self::PointSet(_) => RecordKind::PointSet,
            Self::Camera(_) => RecordKind::Camera,
            Self::Display(_) => RecordKind::Display,
            Self::Generic(_) => RecordKind::Generic,
        }
    }

    /// Class name; generic content reports its own
    pub fn class_name(&self) -> &str {
        match self {
            Self::Generic(generic) => &generic.class_name,
            other => other.kind().class_name(),
        }
    }

    /// Empty content of the same class, used when creating a proxy
    pub fn empty_like(&self) -> Self {
        match self {
            Self::Image(_) => Self::Image(ImageContent {
                pixels: None,
                ijk_to_world: IDENTITY,
            }),
            Self::Mesh(_) => Self::Mesh(MeshContent { mesh: None }),
            Self::Transform(_) => Self::Transform(TransformContent { to_parent: None }),
            Self::PointSet(_) => Self::PointSet(PointSetContent::default()),
            Self::Camera(_) => Self::Camera(CameraContent::default()),
            Self::Display(_) => Self::Display(DisplayContent::default()),
            Self::Generic(generic) => Self::Generic(GenericContent {
                class_name: generic.class_name.clone(),
                fields: IndexMap::new(),
            }),
        }
    }

    /// Copy that owns fresh bulk data instead of sharing it
    pub fn deep_clone(&self) -> Self {
        fn detach<T: Clone>(shared: &Option<Arc<T>>) -> Option<Arc<T>> {
            shared.as_ref().map(|data| Arc::new(T::clone(data)))
        }

        match self {
            Self::Image(image) => Self::Image(ImageContent {
                pixels: detach(&image.pixels),
                ijk_to_world: image.ijk_to_world,
            }),
            Self::Mesh(mesh) => Self::Mesh(MeshContent {
                mesh: detach(&mesh.mesh),
            }),
            Self::Transform(transform) => Self::Transform(TransformContent {
                to_parent: detach(&transform.to_parent),
            }),
            other => other.clone(),
        }
    }
}

/// A named, observable object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    name: String,
    attributes: IndexMap<String, String>,
    content: RecordContent,
    display_ids: Vec<ObjectId>,
    parent_transform: Option<ObjectId>,
    #[serde(skip)]
    changes: ChangeTracker,
}

impl Record {
    /// Create a record
    pub fn new(name: impl Into<String>, content: RecordContent) -> Self {
        Self {
            name: name.into(),
            attributes: IndexMap::new(),
            content,
            display_ids: Vec::new(),
            parent_transform: None,
            changes: ChangeTracker::new(),
        }
    }

    /// Create a record of a class without a dedicated content kind
    pub fn generic(name: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self::new(
            name,
            RecordContent::Generic(GenericContent {
                class_name: class_name.into(),
                fields: IndexMap::new(),
            }),
        )
    }

    /// Builder: set a generic field
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        if let RecordContent::Generic(generic) = &mut self.content {
            generic.fields.insert(key.into(), value);
        }
        self
    }

    /// Builder: set an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Record name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class name of the record
    pub fn class_name(&self) -> &str {
        self.content.class_name()
    }

    /// Content kind
    pub fn kind(&self) -> RecordKind {
        self.content.kind()
    }

    /// Typed content
    pub fn content(&self) -> &RecordContent {
        &self.content
    }

    /// Mutable content access; counts as a change
    pub fn content_mut(&mut self) -> &mut RecordContent {
        self.changes.mark();
        &mut self.content
    }

    /// Attribute value
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// All attributes in insertion order
    pub fn attributes(&self) -> &IndexMap<String, String> {
        &self.attributes
    }

    /// Display records linked to this record
    pub fn display_ids(&self) -> &[ObjectId] {
        &self.display_ids
    }

    /// Transform the record is placed under
    pub fn parent_transform(&self) -> Option<ObjectId> {
        self.parent_transform
    }

    /// Rename; returns whether the name changed
    pub fn set_name(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.name == name {
            return false;
        }
        self.name = name;
        self.changes.mark();
        true
    }

    /// Set an attribute; returns whether the value changed
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        let value = value.into();
        if self.attributes.get(&key) == Some(&value) {
            return false;
        }
        self.attributes.insert(key, value);
        self.changes.mark();
        true
    }

    /// Replace all attributes
    pub fn set_attributes(&mut self, attributes: IndexMap<String, String>) -> bool {
        if self.attributes == attributes {
            return false;
        }
        self.attributes = attributes;
        self.changes.mark();
        true
    }

    /// Replace the display links
    pub fn set_display_ids(&mut self, display_ids: Vec<ObjectId>) -> bool {
        if self.display_ids == display_ids {
            return false;
        }
        self.display_ids = display_ids;
        self.changes.mark();
        true
    }

    /// Place the record under a transform
    pub fn set_parent_transform(&mut self, parent: Option<ObjectId>) -> bool {
        if self.parent_transform == parent {
            return false;
        }
        self.parent_transform = parent;
        self.changes.mark();
        true
    }

    /// Replace the content wholesale
    pub fn set_content(&mut self, content: RecordContent) {
        self.content = content;
        self.changes.mark();
    }

    /// Deep copy with detached bulk data and a fresh change tracker
    pub fn deep_copy(&self) -> Record {
        Record {
            name: self.name.clone(),
            attributes: self.attributes.clone(),
            content: self.content.deep_clone(),
            display_ids: self.display_ids.clone(),
            parent_transform: self.parent_transform,
            changes: ChangeTracker::new(),
        }
    }

    pub(crate) fn changes_mut(&mut self) -> &mut ChangeTracker {
        &mut self.changes
    }
}
