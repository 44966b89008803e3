// SPDX-License-Identifier: MIT OR Apache-2.0
//! Content copy strategies, one per record kind.
//!
//! Proxies mirror sequence items through a shallow copy whose details depend
//! on the kind of content: bulk data is shared, some fields must be left
//! alone, some values are derived. Each kind implements [`ContentCopier`]; a
//! [`CopierRegistry`] maps class names to copiers and falls back to
//! [`GenericCopier`] for unknown classes. Adding a kind means registering one
//! more copier.

use crate::error::{Result, SequenceError};
use crate::record::{Record, RecordContent, RecordKind};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Copies the content of one record into another record of the same class
pub trait ContentCopier: Send + Sync {
    /// Class name handled by this copier
    fn class_name(&self) -> &str;

    /// Copy `source`'s content into `target`.
    ///
    /// Must not touch the target's name or display links. Implementations
    /// should leave the target unchanged (no change mark) when the content is
    /// already identical.
    fn copy_content(&self, source: &Record, target: &mut Record) -> Result<()>;
}

fn mismatch(expected: &str, found: &Record) -> SequenceError {
    SequenceError::TypeMismatch {
        expected: expected.to_string(),
        found: found.class_name().to_string(),
    }
}

fn same_shared<T>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Image records: pixel buffer reference and geometry.
///
/// The target's parent transform is deliberately left as is so a transform
/// the user applied to the proxy survives item changes.
#[derive(Debug, Default)]
pub struct ImageCopier;

impl ContentCopier for ImageCopier {
    fn class_name(&self) -> &str {
        RecordKind::Image.class_name()
    }

    fn copy_content(&self, source: &Record, target: &mut Record) -> Result<()> {
        let RecordContent::Image(src) = source.content() else {
            return Err(mismatch(self.class_name(), source));
        };
        match target.content() {
            RecordContent::Image(dst)
                if same_shared(&dst.pixels, &src.pixels) && dst.ijk_to_world == src.ijk_to_world =>
            {
                return Ok(());
            }
            RecordContent::Image(_) => {}
            _ => return Err(mismatch(self.class_name(), target)),
        }
        if let RecordContent::Image(dst) = target.content_mut() {
            dst.pixels = src.pixels.clone();
            dst.ijk_to_world = src.ijk_to_world;
        }
        Ok(())
    }
}

/// Mesh records: mesh data reference
#[derive(Debug, Default)]
pub struct MeshCopier;

impl ContentCopier for MeshCopier {
    fn class_name(&self) -> &str {
        RecordKind::Mesh.class_name()
    }

    fn copy_content(&self, source: &Record, target: &mut Record) -> Result<()> {
        let RecordContent::Mesh(src) = source.content() else {
            return Err(mismatch(self.class_name(), source));
        };
        match target.content() {
            RecordContent::Mesh(dst) if same_shared(&dst.mesh, &src.mesh) => return Ok(()),
            RecordContent::Mesh(_) => {}
            _ => return Err(mismatch(self.class_name(), target)),
        }
        if let RecordContent::Mesh(dst) = target.content_mut() {
            dst.mesh = src.mesh.clone();
        }
        Ok(())
    }
}

/// Transform records: transform-to-parent function object
#[derive(Debug, Default)]
pub struct TransformCopier;

impl ContentCopier for TransformCopier {
    fn class_name(&self) -> &str {
        RecordKind::Transform.class_name()
    }

    fn copy_content(&self, source: &Record, target: &mut Record) -> Result<()> {
        let RecordContent::Transform(src) = source.content() else {
            return Err(mismatch(self.class_name(), source));
        };
        match target.content() {
            RecordContent::Transform(dst) if same_shared(&dst.to_parent, &src.to_parent) => {
                return Ok(());
            }
            RecordContent::Transform(_) => {}
            _ => return Err(mismatch(self.class_name(), target)),
        }
        if let RecordContent::Transform(dst) = target.content_mut() {
            dst.to_parent = src.to_parent.clone();
        }
        Ok(())
    }
}

/// Point sets: the content's own deep copy
#[derive(Debug, Default)]
pub struct PointSetCopier;

impl ContentCopier for PointSetCopier {
    fn class_name(&self) -> &str {
        RecordKind::PointSet.class_name()
    }

    fn copy_content(&self, source: &Record, target: &mut Record) -> Result<()> {
        let RecordContent::PointSet(src) = source.content() else {
            return Err(mismatch(self.class_name(), source));
        };
        match target.content() {
            RecordContent::PointSet(dst) if dst == src => return Ok(()),
            RecordContent::PointSet(_) => {}
            _ => return Err(mismatch(self.class_name(), target)),
        }
        if let RecordContent::PointSet(dst) = target.content_mut() {
            dst.deep_copy_from(src);
        }
        Ok(())
    }
}

/// Cameras: scalar fields one by one, clipping range recomputed
#[derive(Debug, Default)]
pub struct CameraCopier;

impl ContentCopier for CameraCopier {
    fn class_name(&self) -> &str {
        RecordKind::Camera.class_name()
    }

    fn copy_content(&self, source: &Record, target: &mut Record) -> Result<()> {
        let RecordContent::Camera(src) = source.content() else {
            return Err(mismatch(self.class_name(), source));
        };
        match target.content() {
            RecordContent::Camera(dst)
                if dst.position == src.position
                    && dst.focal_point == src.focal_point
                    && dst.view_up == src.view_up
                    && dst.parallel_projection == src.parallel_projection
                    && dst.parallel_scale == src.parallel_scale
                    && dst.view_angle == src.view_angle =>
            {
                return Ok(());
            }
            RecordContent::Camera(_) => {}
            _ => return Err(mismatch(self.class_name(), target)),
        }
        if let RecordContent::Camera(dst) = target.content_mut() {
            dst.position = src.position;
            dst.focal_point = src.focal_point;
            dst.view_up = src.view_up;
            dst.parallel_projection = src.parallel_projection;
            dst.parallel_scale = src.parallel_scale;
            dst.view_angle = src.view_angle;
            dst.reset_clipping_range();
        }
        Ok(())
    }
}

/// Fallback for any class: full content and attribute copy.
///
/// Runs in the caller's change bracket, so observers see a single
/// notification for the whole copy.
#[derive(Debug, Default)]
pub struct GenericCopier;

impl ContentCopier for GenericCopier {
    fn class_name(&self) -> &str {
        RecordKind::Generic.class_name()
    }

    fn copy_content(&self, source: &Record, target: &mut Record) -> Result<()> {
        if source.class_name() != target.class_name() {
            return Err(mismatch(source.class_name(), target));
        }
        let mut attributes = source.attributes().clone();
        // the target keeps its own base name
        match target.attribute(crate::record::BASE_NAME_ATTRIBUTE) {
            Some(base) => {
                attributes.insert(crate::record::BASE_NAME_ATTRIBUTE.to_string(), base.to_string());
            }
            None => {
                attributes.shift_remove(crate::record::BASE_NAME_ATTRIBUTE);
            }
        }
        target.set_attributes(attributes);
        let unchanged = match (source.content(), target.content()) {
            (RecordContent::Generic(a), RecordContent::Generic(b)) => a == b,
            (RecordContent::Display(a), RecordContent::Display(b)) => a == b,
            (RecordContent::PointSet(a), RecordContent::PointSet(b)) => a == b,
            (RecordContent::Camera(a), RecordContent::Camera(b)) => a == b,
            _ => false,
        };
        if !unchanged {
            target.set_content(source.content().clone());
        }
        Ok(())
    }
}

/// Class name to copier table, built once and passed to whoever copies
pub struct CopierRegistry {
    copiers: HashMap<String, Box<dyn ContentCopier>>,
    fallback: GenericCopier,
}

impl CopierRegistry {
    /// Registry with only the generic fallback
    pub fn empty() -> Self {
        Self {
            copiers: HashMap::new(),
            fallback: GenericCopier,
        }
    }

    /// Registry with a copier for every built-in kind
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(ImageCopier));
        registry.register(Box::new(MeshCopier));
        registry.register(Box::new(TransformCopier));
        registry.register(Box::new(PointSetCopier));
        registry.register(Box::new(CameraCopier));
        registry
    }

    /// Register a copier, replacing any previous one for the same class
    pub fn register(&mut self, copier: Box<dyn ContentCopier>) -> Option<Box<dyn ContentCopier>> {
        self.copiers.insert(copier.class_name().to_string(), copier)
    }

    /// Copier for a class, or the generic fallback
    pub fn copier_for(&self, class_name: &str) -> &dyn ContentCopier {
        match self.copiers.get(class_name) {
            Some(copier) => copier.as_ref(),
            None => &self.fallback,
        }
    }

    /// Whether a dedicated copier exists for the class
    pub fn has_copier(&self, class_name: &str) -> bool {
        self.copiers.contains_key(class_name)
    }

    /// Copy `source` into `target` with the copier of the target's class
    pub fn copy(&self, source: &Record, target: &mut Record) -> Result<()> {
        if source.class_name() != target.class_name() {
            return Err(mismatch(source.class_name(), target));
        }
        self.copier_for(target.class_name()).copy_content(source, target)
    }
}

impl Default for CopierRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for CopierRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut classes: Vec<&str> = self.copiers.keys().map(String::as_str).collect();
        classes.sort_unstable();
        f.debug_struct("CopierRegistry").field("classes", &classes).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{
        CameraContent, ControlPoint, ImageContent, MeshContent, MeshData, PixelBuffer,
        PointSetContent, TransformContent, TransformFunction, IDENTITY,
    };
    use crate::registry::{ObjectId, Registry};

    fn image(pixels: Option<Arc<PixelBuffer>>, scale: f64) -> Record {
        let mut geometry = IDENTITY;
        geometry[0][0] = scale;
        Record::new(
            "Frame",
            RecordContent::Image(ImageContent {
                pixels,
                ijk_to_world: geometry,
            }),
        )
    }

    #[test]
    fn test_image_copy_shares_pixels_and_keeps_transform() {
        let copiers = CopierRegistry::with_defaults();
        let pixels = Arc::new(PixelBuffer::filled([4, 4, 1], 1.0));
        let source = image(Some(pixels.clone()), 2.0);

        let parent = ObjectId::new();
        let mut proxy = image(None, 1.0);
        proxy.set_parent_transform(Some(parent));

        copiers.copy(&source, &mut proxy).unwrap();

        let RecordContent::Image(content) = proxy.content() else {
            panic!("expected image");
        };
        assert!(Arc::ptr_eq(content.pixels.as_ref().unwrap(), &pixels));
        assert_eq!(content.ijk_to_world[0][0], 2.0);
        assert_eq!(proxy.parent_transform(), Some(parent));
    }

    #[test]
    fn test_transform_copy_shares_function() {
        let copiers = CopierRegistry::with_defaults();
        let function = Arc::new(TransformFunction::translation([1.0, 2.0, 3.0]));
        let source = Record::new(
            "Tracker",
            RecordContent::Transform(TransformContent {
                to_parent: Some(function.clone()),
            }),
        );
        let mut proxy = Record::new("Proxy", RecordContent::Transform(TransformContent { to_parent: None }));

        copiers.copy(&source, &mut proxy).unwrap();
        let RecordContent::Transform(content) = proxy.content() else {
            panic!("expected transform");
        };
        assert!(Arc::ptr_eq(content.to_parent.as_ref().unwrap(), &function));
    }

    fn mesh(data: Option<Arc<MeshData>>) -> Record {
        Record::new("Surface", RecordContent::Mesh(MeshContent { mesh: data }))
    }

    fn points(labels: &[&str]) -> Record {
        let points = labels
            .iter()
            .enumerate()
            .map(|(i, label)| ControlPoint {
                label: label.to_string(),
                position: [i as f64, 0.0, 0.0],
                selected: false,
            })
            .collect();
        Record::new("Landmarks", RecordContent::PointSet(PointSetContent { points }))
    }

    /// Copy through a registry bracket; returns whether observers were notified
    fn copy_notifies(copiers: &CopierRegistry, source: &Record, registry: &mut Registry, target: ObjectId) -> bool {
        registry.take_events();
        registry
            .modify(target, |record| copiers.copy(source, record))
            .unwrap()
            .unwrap();
        !registry.take_events().is_empty()
    }

    #[test]
    fn test_mesh_copy_shares_data() {
        let copiers = CopierRegistry::with_defaults();
        let data = Arc::new(MeshData {
            points: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
            triangles: vec![[0, 1, 2]],
        });
        let source = mesh(Some(data.clone()));
        let mut registry = Registry::new();
        let proxy = registry.add(mesh(None));

        assert!(copy_notifies(&copiers, &source, &mut registry, proxy));
        let RecordContent::Mesh(content) = registry.get(proxy).unwrap().content() else {
            panic!("expected mesh");
        };
        assert!(Arc::ptr_eq(content.mesh.as_ref().unwrap(), &data));

        // same data again: nothing to announce
        assert!(!copy_notifies(&copiers, &source, &mut registry, proxy));
    }

    #[test]
    fn test_point_set_copy_is_independent() {
        let copiers = CopierRegistry::with_defaults();
        let mut source = points(&["A", "B"]);
        let mut registry = Registry::new();
        let proxy = registry.add(points(&["old"]));

        assert!(copy_notifies(&copiers, &source, &mut registry, proxy));
        assert!(!copy_notifies(&copiers, &source, &mut registry, proxy));

        let (RecordContent::PointSet(src), RecordContent::PointSet(dst)) =
            (source.content(), registry.get(proxy).unwrap().content())
        else {
            panic!("expected point sets");
        };
        assert_eq!(dst, src);
        assert_ne!(dst.points.as_ptr(), src.points.as_ptr());

        if let RecordContent::PointSet(src) = source.content_mut() {
            src.points[0].label = "moved".to_string();
        }
        let RecordContent::PointSet(dst) = registry.get(proxy).unwrap().content() else {
            panic!("expected point set");
        };
        assert_eq!(dst.points[0].label, "A");
        assert_eq!(dst.points.len(), 2);
    }

    #[test]
    fn test_camera_copy_recomputes_clipping() {
        let copiers = CopierRegistry::with_defaults();
        let source = Record::new(
            "Cam",
            RecordContent::Camera(CameraContent {
                position: [0.0, 0.0, 20.0],
                clipping_range: [123.0, 456.0],
                ..CameraContent::default()
            }),
        );
        let mut proxy = Record::new("Proxy", RecordContent::Camera(CameraContent::default()));

        copiers.copy(&source, &mut proxy).unwrap();
        let RecordContent::Camera(camera) = proxy.content() else {
            panic!("expected camera");
        };
        assert_eq!(camera.position, [0.0, 0.0, 20.0]);
        assert!((camera.clipping_range[0] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_generic_fallback_copies_fields() {
        let copiers = CopierRegistry::with_defaults();
        assert!(!copiers.has_copier("ChartRecord"));

        let source = Record::generic("Chart", "ChartRecord")
            .with_field("title", serde_json::json!("Heart rate"))
            .with_attribute("color", "red");
        let mut proxy = Record::generic("Proxy", "ChartRecord");

        copiers.copy(&source, &mut proxy).unwrap();
        assert_eq!(proxy.attribute("color"), Some("red"));
        assert_eq!(proxy.name(), "Proxy");
        let RecordContent::Generic(generic) = proxy.content() else {
            panic!("expected generic");
        };
        assert_eq!(generic.fields["title"], serde_json::json!("Heart rate"));
    }

    #[test]
    fn test_class_mismatch_is_rejected() {
        let copiers = CopierRegistry::with_defaults();
        let source = image(None, 1.0);
        let mut target = Record::generic("Other", "ChartRecord");
        assert!(matches!(
            copiers.copy(&source, &mut target),
            Err(SequenceError::TypeMismatch { .. })
        ));
    }

    struct CountingCopier;

    impl ContentCopier for CountingCopier {
        fn class_name(&self) -> &str {
            "CounterRecord"
        }

        fn copy_content(&self, _source: &Record, target: &mut Record) -> Result<()> {
            let count = target
                .attribute("copies")
                .and_then(|c| c.parse::<u32>().ok())
                .unwrap_or(0);
            target.set_attribute("copies", (count + 1).to_string());
            Ok(())
        }
    }

    #[test]
    fn test_registering_a_new_kind() {
        let mut copiers = CopierRegistry::with_defaults();
        copiers.register(Box::new(CountingCopier));

        let source = Record::generic("Counter", "CounterRecord");
        let mut target = Record::generic("Proxy", "CounterRecord");
        copiers.copy(&source, &mut target).unwrap();
        copiers.copy(&source, &mut target).unwrap();
        assert_eq!(target.attribute("copies"), Some("2"));
    }
}
