// SPDX-License-Identifier: MIT OR Apache-2.0
//! Proxy maintenance for browser tracks.
//!
//! Each track mirrors the record selected by the browser's cursor into a live
//! proxy record in the host registry. [`ProxyManager::refresh`] creates,
//! reuses or replaces that proxy, copies content into it through the
//! [`CopierRegistry`] and keeps its display records in step with the
//! sequence's.

use crate::sync::Track;
use ordoplay_sequences::{
    CopierRegistry, IndexedSequence, ObjectId, Record, Registry, Result, SequenceError,
    BASE_NAME_ATTRIBUTE,
};

/// Result of refreshing one track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Nothing to show for this track this cycle
    Skipped,
    /// The proxy was updated; its change bracket is still open
    Updated {
        /// Proxy record
        proxy: ObjectId,
        /// The proxy did not exist before this refresh
        created: bool,
    },
}

/// Creates and updates track proxies
#[derive(Debug, Default)]
pub struct ProxyManager;

impl ProxyManager {
    /// Proxy name for an item: `"<sequence> [<index name>=<value><unit>]"`
    pub fn proxy_name(sequence: &IndexedSequence, index_value: &str) -> String {
        let mut name = format!("{} [", sequence.name);
        if !sequence.index_name().is_empty() {
            name.push_str(sequence.index_name());
            name.push('=');
        }
        name.push_str(index_value);
        name.push_str(sequence.index_unit());
        name.push(']');
        name
    }

    /// Mirror the item at `index_value` into the track's proxy.
    ///
    /// On [`RefreshOutcome::Updated`] the proxy's change bracket is left open
    /// so a whole browser update reaches observers as one change per proxy;
    /// the caller closes it with [`Registry::end_change`].
    pub fn refresh(
        track: &mut Track,
        sequence: &mut IndexedSequence,
        index_value: &str,
        registry: &mut Registry,
        copiers: &CopierRegistry,
    ) -> Result<RefreshOutcome> {
        if !track.props.playback {
            return Ok(RefreshOutcome::Skipped);
        }
        if track.props.save_changes {
            Self::ensure_exact_item(track, sequence, index_value, registry)?;
        }
        let Some(record) = sequence.get(index_value) else {
            return Ok(RefreshOutcome::Skipped);
        };

        if let Some(proxy) = track.proxy {
            match registry.get(proxy) {
                Some(existing) if existing.class_name() != record.class_name() => {
                    tracing::debug!(
                        "Replacing proxy {} of track {}: {} is now {}",
                        proxy,
                        track.postfix,
                        existing.class_name(),
                        record.class_name()
                    );
                    Self::remove_proxy(track, registry);
                }
                Some(_) => {}
                None => {
                    tracing::warn!("Proxy {} of track {} no longer exists", proxy, track.postfix);
                    track.proxy = None;
                    track.displays.clear();
                }
            }
        }

        let (proxy, created) = match track.proxy {
            Some(proxy) => (proxy, false),
            None => {
                let name = registry.generate_unique_name(&sequence.name);
                let proxy = registry.add(Record::new(name, record.content().empty_like()));
                track.proxy = Some(proxy);
                (proxy, true)
            }
        };

        registry.begin_change(proxy)?;
        let updated = Self::update_proxy(
            track,
            proxy,
            created,
            sequence,
            record,
            index_value,
            registry,
            copiers,
        );
        if let Err(e) = updated {
            registry.end_change(proxy)?;
            return Err(e);
        }
        Ok(RefreshOutcome::Updated { proxy, created })
    }

    /// Remove the track's proxy and its display records from the registry
    pub fn remove_proxy(track: &mut Track, registry: &mut Registry) {
        for display in track.displays.drain(..) {
            registry.remove(display.proxy);
        }
        if let Some(proxy) = track.proxy.take() {
            registry.remove(proxy);
        }
    }

    fn update_proxy(
        track: &mut Track,
        proxy: ObjectId,
        created: bool,
        sequence: &IndexedSequence,
        record: &Record,
        index_value: &str,
        registry: &mut Registry,
        copiers: &CopierRegistry,
    ) -> Result<()> {
        // rename first so observers never see new content under an old name
        if created || track.props.overwrite_proxy_name {
            let name = Self::proxy_name(sequence, index_value);
            registry.modify(proxy, |target| {
                target.set_attribute(BASE_NAME_ATTRIBUTE, sequence.name.clone());
                target.set_name(name);
            })?;
        }
        registry.modify(proxy, |target| copiers.copy(record, target))??;
        Self::reconcile_displays(track, proxy, sequence, record, registry, copiers)
    }

    fn reconcile_displays(
        track: &mut Track,
        proxy: ObjectId,
        sequence: &IndexedSequence,
        record: &Record,
        registry: &mut Registry,
        copiers: &CopierRegistry,
    ) -> Result<()> {
        let desired = record.display_ids();
        let overlap = desired.len().min(track.displays.len());

        for (slot, source_id) in desired.iter().enumerate().take(overlap) {
            if track.displays[slot].source == *source_id {
                continue;
            }
            let Some(source) = sequence.get_by_id(*source_id) else {
                tracing::warn!("Display record {} missing from sequence {}", source_id, sequence.name);
                continue;
            };
            let target = track.displays[slot].proxy;
            let copied = registry.modify(target, |display| copiers.copy(source, display));
            match copied {
                Ok(Ok(())) => {}
                Ok(Err(SequenceError::TypeMismatch { .. })) | Err(_) => {
                    registry.remove(target);
                    track.displays[slot].proxy = Self::add_display(registry, source);
                }
                Ok(Err(e)) => return Err(e),
            }
            track.displays[slot].source = *source_id;
        }

        for extra in track.displays.drain(overlap..) {
            registry.remove(extra.proxy);
        }

        for source_id in &desired[overlap..] {
            let Some(source) = sequence.get_by_id(*source_id) else {
                tracing::warn!("Display record {} missing from sequence {}", source_id, sequence.name);
                continue;
            };
            track.displays.push(DisplayBinding {
                proxy: Self::add_display(registry, source),
                source: *source_id,
            });
        }

        let linked: Vec<ObjectId> = track.displays.iter().map(|display| display.proxy).collect();
        registry.modify(proxy, |target| {
            target.set_display_ids(linked);
        })?;
        Ok(())
    }

    fn add_display(registry: &mut Registry, source: &Record) -> ObjectId {
        let mut display = source.clone();
        display.set_name(registry.generate_unique_name(source.name()));
        registry.add(display)
    }

    /// Make sure `sequence` has an item at exactly `index_value` so edits of
    /// the proxy have somewhere to go.
    fn ensure_exact_item(
        track: &Track,
        sequence: &mut IndexedSequence,
        index_value: &str,
        registry: &Registry,
    ) -> Result<()> {
        if sequence.get(index_value).is_some() {
            return Ok(());
        }
        if !sequence.is_empty() {
            let closest = sequence.record_at_value(index_value, false).map(|record| {
                let displays: Vec<Record> = sequence
                    .display_records_for(record)
                    .into_iter()
                    .cloned()
                    .collect();
                (record.clone(), displays)
            });
            if let Some((record, displays)) = closest {
                let displays: Vec<&Record> = displays.iter().collect();
                sequence.upsert_with_displays(&record, &displays, index_value)?;
            }
            return Ok(());
        }
        if let Some(proxy) = track.proxy.and_then(|id| registry.get(id)) {
            let displays: Vec<&Record> = proxy
                .display_ids()
                .iter()
                .filter_map(|id| registry.get(*id))
                .collect();
            sequence.upsert_with_displays(proxy, &displays, index_value)?;
        }
        Ok(())
    }
}

/// A proxy display record and the sequence display record it mirrors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayBinding {
    /// Display record in the host registry
    pub proxy: ObjectId,
    /// Display record in the sequence
    pub source: ObjectId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{SynchronizationProperties, SynchronizationTable};
    use ordoplay_sequences::{
        DisplayContent, ImageContent, PixelBuffer, RecordContent, SequenceId, IDENTITY,
    };
    use std::sync::Arc;

    fn new_track() -> Track {
        let mut table = SynchronizationTable::new();
        let (postfix, _) = table.add(SequenceId::new());
        table.track(&postfix).unwrap().clone()
    }

    fn notes() -> IndexedSequence {
        let mut sequence = IndexedSequence::new("Notes");
        for (value, text) in [("0", "A"), ("1", "B"), ("2", "C")] {
            let record = Record::generic(text, "NoteRecord").with_field("text", serde_json::json!(text));
            sequence.upsert(&record, value).unwrap();
        }
        sequence
    }

    fn refresh(
        track: &mut Track,
        sequence: &mut IndexedSequence,
        value: &str,
        registry: &mut Registry,
    ) -> RefreshOutcome {
        let copiers = CopierRegistry::with_defaults();
        let outcome = ProxyManager::refresh(track, sequence, value, registry, &copiers).unwrap();
        if let RefreshOutcome::Updated { proxy, .. } = outcome {
            registry.end_change(proxy).unwrap();
        }
        outcome
    }

    fn text_of(registry: &Registry, id: ObjectId) -> serde_json::Value {
        match registry.get(id).unwrap().content() {
            RecordContent::Generic(content) => content.fields["text"].clone(),
            other => panic!("unexpected content {:?}", other.kind()),
        }
    }

    #[test]
    fn test_proxy_name() {
        let sequence = notes();
        assert_eq!(ProxyManager::proxy_name(&sequence, "1"), "Notes [time=1s]");

        let unnamed = IndexedSequence::new("Frames").with_index("", "", ordoplay_sequences::IndexType::Numeric);
        assert_eq!(ProxyManager::proxy_name(&unnamed, "3"), "Frames [3]");
    }

    #[test]
    fn test_creates_then_reuses_proxy() {
        let mut registry = Registry::new();
        let mut sequence = notes();
        let mut track = new_track();

        let RefreshOutcome::Updated { proxy, created } = refresh(&mut track, &mut sequence, "1", &mut registry) else {
            panic!("expected update");
        };
        assert!(created);
        assert_eq!(text_of(&registry, proxy), serde_json::json!("B"));
        assert_eq!(registry.get(proxy).unwrap().name(), "Notes [time=1s]");

        let outcome = refresh(&mut track, &mut sequence, "2", &mut registry);
        assert_eq!(outcome, RefreshOutcome::Updated { proxy, created: false });
        assert_eq!(text_of(&registry, proxy), serde_json::json!("C"));
        // name is only refreshed when asked to
        assert_eq!(registry.get(proxy).unwrap().name(), "Notes [time=1s]");
    }

    #[test]
    fn test_overwrite_proxy_name() {
        let mut registry = Registry::new();
        let mut sequence = notes();
        let mut track = new_track();
        track.props.overwrite_proxy_name = true;

        refresh(&mut track, &mut sequence, "0", &mut registry);
        refresh(&mut track, &mut sequence, "2", &mut registry);
        let proxy = registry.get(track.proxy.unwrap()).unwrap();
        assert_eq!(proxy.name(), "Notes [time=2s]");
        assert_eq!(proxy.attribute(BASE_NAME_ATTRIBUTE), Some("Notes"));
    }

    #[test]
    fn test_missing_item_skips_track() {
        let mut registry = Registry::new();
        let mut sequence = notes();
        let mut track = new_track();
        assert_eq!(refresh(&mut track, &mut sequence, "7", &mut registry), RefreshOutcome::Skipped);
        assert!(track.proxy.is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_playback_disabled_skips_track() {
        let mut registry = Registry::new();
        let mut sequence = notes();
        let mut track = new_track();
        track.props = SynchronizationProperties {
            playback: false,
            ..Default::default()
        };
        assert_eq!(refresh(&mut track, &mut sequence, "0", &mut registry), RefreshOutcome::Skipped);
    }

    #[test]
    fn test_class_change_recreates_proxy() {
        let mut registry = Registry::new();
        let mut sequence = notes();
        let mut track = new_track();
        refresh(&mut track, &mut sequence, "0", &mut registry);
        let first = track.proxy.unwrap();

        let image = Record::new(
            "Frame",
            RecordContent::Image(ImageContent {
                pixels: Some(Arc::new(PixelBuffer::filled([2, 2, 1], 0.0))),
                ijk_to_world: IDENTITY,
            }),
        );
        sequence.upsert(&image, "1").unwrap();
        refresh(&mut track, &mut sequence, "1", &mut registry);

        let second = track.proxy.unwrap();
        assert_ne!(first, second);
        assert!(registry.get(first).is_none());
        assert_eq!(registry.get(second).unwrap().class_name(), "ImageRecord");
    }

    #[test]
    fn test_single_notification_per_refresh() {
        let mut registry = Registry::new();
        let mut sequence = notes();
        let mut track = new_track();
        refresh(&mut track, &mut sequence, "0", &mut registry);
        registry.take_events();

        refresh(&mut track, &mut sequence, "1", &mut registry);
        let events = registry.take_events();
        assert_eq!(events, vec![ordoplay_sequences::RegistryEvent::ObjectModified(track.proxy.unwrap())]);
    }

    #[test]
    fn test_display_reconciliation() {
        let mut registry = Registry::new();
        let mut sequence = IndexedSequence::new("Frames");
        let display = Record::new("Look", RecordContent::Display(DisplayContent::default()));
        let record = Record::generic("F", "NoteRecord").with_field("text", serde_json::json!("F"));
        sequence.upsert_with_displays(&record, &[&display], "0").unwrap();
        sequence.upsert(&record, "1").unwrap();

        let mut track = new_track();
        refresh(&mut track, &mut sequence, "0", &mut registry);
        assert_eq!(track.displays.len(), 1);
        let display_proxy = track.displays[0].proxy;
        let proxy = registry.get(track.proxy.unwrap()).unwrap();
        assert_eq!(proxy.display_ids(), &[display_proxy]);

        // same source display on the next item: slot kept as is
        refresh(&mut track, &mut sequence, "1", &mut registry);
        assert_eq!(track.displays[0].proxy, display_proxy);
        assert!(registry.get(display_proxy).is_some());
    }

    fn look(name: &str, opacity: f32) -> Record {
        Record::new(
            name,
            RecordContent::Display(DisplayContent {
                opacity,
                ..DisplayContent::default()
            }),
        )
    }

    /// One-item sequence whose record links to copies of `displays`
    fn framed(displays: &[&Record]) -> IndexedSequence {
        let mut sequence = IndexedSequence::new("Frames");
        let record = Record::generic("F", "NoteRecord").with_field("text", serde_json::json!("F"));
        sequence.upsert_with_displays(&record, displays, "0").unwrap();
        sequence
    }

    fn source_displays(sequence: &IndexedSequence) -> Vec<ObjectId> {
        sequence.get("0").unwrap().display_ids().to_vec()
    }

    fn assert_linked(track: &Track, registry: &Registry) {
        let linked: Vec<ObjectId> = track.displays.iter().map(|display| display.proxy).collect();
        assert_eq!(registry.get(track.proxy.unwrap()).unwrap().display_ids(), linked.as_slice());
        for display in &linked {
            assert!(registry.contains(*display));
        }
    }

    #[test]
    fn test_display_rebinds_to_new_source() {
        let mut registry = Registry::new();
        let mut track = new_track();
        let mut first = framed(&[&look("Look", 1.0), &look("Outline", 1.0)]);
        refresh(&mut track, &mut first, "0", &mut registry);
        let before: Vec<ObjectId> = track.displays.iter().map(|display| display.proxy).collect();

        // same kind in slot 0 is copied in place, another kind in slot 1 is replaced
        let label = Record::generic("Label", "LabelRecord");
        let mut second = framed(&[&look("Look", 0.5), &label]);
        refresh(&mut track, &mut second, "0", &mut registry);

        let sources: Vec<ObjectId> = track.displays.iter().map(|display| display.source).collect();
        assert_eq!(sources, source_displays(&second));
        assert_eq!(track.displays[0].proxy, before[0]);
        assert_ne!(track.displays[1].proxy, before[1]);
        assert!(!registry.contains(before[1]));
        let RecordContent::Display(content) = registry.get(before[0]).unwrap().content() else {
            panic!("expected display");
        };
        assert_eq!(content.opacity, 0.5);
        assert_eq!(registry.get(track.displays[1].proxy).unwrap().class_name(), "LabelRecord");
        assert_linked(&track, &registry);
    }

    #[test]
    fn test_extra_display_proxies_are_removed() {
        let mut registry = Registry::new();
        let mut track = new_track();
        let mut first = framed(&[&look("Look", 1.0), &look("Outline", 1.0)]);
        refresh(&mut track, &mut first, "0", &mut registry);
        let extra = track.displays[1].proxy;

        let mut second = framed(&[&look("Look", 1.0)]);
        refresh(&mut track, &mut second, "0", &mut registry);

        assert_eq!(track.displays.len(), 1);
        assert_eq!(track.displays[0].source, source_displays(&second)[0]);
        assert!(!registry.contains(extra));
        // proxy and its single display
        assert_eq!(registry.len(), 2);
        assert_linked(&track, &registry);
    }

    #[test]
    fn test_missing_display_proxies_are_added() {
        let mut registry = Registry::new();
        let mut track = new_track();
        let mut first = framed(&[]);
        refresh(&mut track, &mut first, "0", &mut registry);
        assert!(track.displays.is_empty());
        assert_eq!(registry.len(), 1);

        let mut second = framed(&[&look("Look", 1.0), &look("Outline", 0.25)]);
        refresh(&mut track, &mut second, "0", &mut registry);

        let sources: Vec<ObjectId> = track.displays.iter().map(|display| display.source).collect();
        assert_eq!(sources, source_displays(&second));
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get(track.displays[1].proxy).unwrap().name(), "Outline");
        assert_linked(&track, &registry);
    }

    #[test]
    fn test_save_changes_creates_exact_item() {
        let mut registry = Registry::new();
        let mut sequence = notes();
        let mut track = new_track();
        track.props.save_changes = true;

        refresh(&mut track, &mut sequence, "1.5", &mut registry);
        assert_eq!(sequence.count(), 4);
        assert_eq!(sequence.get("1.5").unwrap().name(), "B");
        assert_eq!(text_of(&registry, track.proxy.unwrap()), serde_json::json!("B"));
    }

    #[test]
    fn test_remove_proxy() {
        let mut registry = Registry::new();
        let mut sequence = notes();
        let mut track = new_track();
        refresh(&mut track, &mut sequence, "0", &mut registry);
        ProxyManager::remove_proxy(&mut track, &mut registry);
        assert!(track.proxy.is_none());
        assert!(registry.is_empty());
    }
}
