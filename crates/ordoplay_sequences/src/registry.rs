// SPDX-License-Identifier: MIT OR Apache-2.0
//! Object registry owning records.
//!
//! The registry is the sole owner of every record it holds. Everything else
//! (browsers, sequences, display links) refers to records by [`ObjectId`].
//! Additions, removals and modifications are queued as [`RegistryEvent`]s for
//! the host to drain.

use crate::error::{Result, SequenceError};
use crate::record::Record;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a registry object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub Uuid);

impl ObjectId {
    /// Create a new random object ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ObjectId {
    type Err = SequenceError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| SequenceError::invalid(format!("object id {s:?}: {e}")))
    }
}

/// Observation event emitted by a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A record was added
    ObjectAdded(ObjectId),
    /// A record was removed and destroyed
    ObjectRemoved(ObjectId),
    /// A record changed (one event per outermost change bracket)
    ObjectModified(ObjectId),
}

/// Record store with id lookup and change notification
#[derive(Debug, Default)]
pub struct Registry {
    records: IndexMap<ObjectId, Record>,
    events: Vec<RegistryEvent>,
    silent: bool,
}

impl Registry {
    /// Create an empty registry that queues events
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry that never queues events.
    ///
    /// Used for storage that nobody observes, such as a sequence's private
    /// item store.
    pub fn silent() -> Self {
        Self {
            silent: true,
            ..Self::default()
        }
    }

    /// Add a record and take ownership of it
    pub fn add(&mut self, record: Record) -> ObjectId {
        let id = ObjectId::new();
        self.records.insert(id, record);
        self.emit(RegistryEvent::ObjectAdded(id));
        tracing::trace!(%id, "registered record");
        id
    }

    /// Add a record under a known id (used when restoring documents)
    pub fn add_with_id(&mut self, id: ObjectId, record: Record) -> Result<()> {
        if self.records.contains_key(&id) {
            return Err(SequenceError::invalid(format!("object id {id} already in use")));
        }
        self.records.insert(id, record);
        self.emit(RegistryEvent::ObjectAdded(id));
        Ok(())
    }

    /// Remove and destroy a record
    pub fn remove(&mut self, id: ObjectId) -> Option<Record> {
        let removed = self.records.shift_remove(&id);
        if removed.is_some() {
            self.emit(RegistryEvent::ObjectRemoved(id));
        }
        removed
    }

    /// Remove every record
    pub fn clear(&mut self) {
        let ids: Vec<ObjectId> = self.records.keys().copied().collect();
        for id in ids {
            self.remove(id);
        }
    }

    /// Look up a record
    pub fn get(&self, id: ObjectId) -> Option<&Record> {
        self.records.get(&id)
    }

    /// Whether a record with this id exists
    pub fn contains(&self, id: ObjectId) -> bool {
        self.records.contains_key(&id)
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the registry holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &Record)> {
        self.records.iter().map(|(id, record)| (*id, record))
    }

    /// First record with the given name
    pub fn find_by_name(&self, name: &str) -> Option<ObjectId> {
        self.records
            .iter()
            .find(|(_, record)| record.name() == name)
            .map(|(id, _)| *id)
    }

    /// Mutate a record inside its own change bracket.
    ///
    /// One `ObjectModified` event is queued if the closure changed anything
    /// and no outer bracket is open on the record.
    pub fn modify<R>(&mut self, id: ObjectId, f: impl FnOnce(&mut Record) -> R) -> Result<R> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| SequenceError::not_found(format!("record {id}")))?;
        record.changes_mut().begin();
        let result = f(record);
        if record.changes_mut().end() {
            self.emit(RegistryEvent::ObjectModified(id));
        }
        Ok(result)
    }

    /// Open an outer change bracket on a record
    pub fn begin_change(&mut self, id: ObjectId) -> Result<()> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| SequenceError::not_found(format!("record {id}")))?;
        record.changes_mut().begin();
        Ok(())
    }

    /// Close an outer change bracket; returns whether a notification fired
    pub fn end_change(&mut self, id: ObjectId) -> Result<bool> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or_else(|| SequenceError::not_found(format!("record {id}")))?;
        let notify = record.changes_mut().end();
        if notify {
            self.emit(RegistryEvent::ObjectModified(id));
        }
        Ok(notify)
    }

    /// Return `base` if unused, otherwise the first free `base_N`
    pub fn generate_unique_name(&self, base: &str) -> String {
        if self.find_by_name(base).is_none() {
            return base.to_string();
        }
        let mut suffix = 1usize;
        loop {
            let candidate = format!("{base}_{suffix}");
            if self.find_by_name(&candidate).is_none() {
                return candidate;
            }
            suffix += 1;
        }
    }

    /// Take queued events
    pub fn take_events(&mut self) -> Vec<RegistryEvent> {
        std::mem::take(&mut self.events)
    }

    fn emit(&mut self, event: RegistryEvent) {
        if !self.silent {
            self.events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_get_remove() {
        let mut registry = Registry::new();
        let id = registry.add(Record::generic("Note", "NoteRecord"));
        assert_eq!(registry.get(id).map(Record::name), Some("Note"));

        assert!(registry.remove(id).is_some());
        assert!(registry.get(id).is_none());
        assert_eq!(
            registry.take_events(),
            vec![RegistryEvent::ObjectAdded(id), RegistryEvent::ObjectRemoved(id)]
        );
    }

    #[test]
    fn test_batched_modification_fires_once() {
        let mut registry = Registry::new();
        let id = registry.add(Record::generic("Note", "NoteRecord"));
        registry.take_events();

        registry.begin_change(id).unwrap();
        for i in 0..5 {
            registry
                .modify(id, |record| record.set_attribute(format!("k{i}"), "v"))
                .unwrap();
        }
        assert!(registry.take_events().is_empty());
        assert!(registry.end_change(id).unwrap());
        assert_eq!(registry.take_events(), vec![RegistryEvent::ObjectModified(id)]);
    }

    #[test]
    fn test_unchanged_modification_is_silent() {
        let mut registry = Registry::new();
        let id = registry.add(Record::generic("Note", "NoteRecord"));
        registry.take_events();

        registry.modify(id, |record| record.set_name("Note")).unwrap();
        assert!(registry.take_events().is_empty());
    }

    #[test]
    fn test_unique_names() {
        let mut registry = Registry::new();
        registry.add(Record::generic("Frame", "NoteRecord"));
        registry.add(Record::generic("Frame_1", "NoteRecord"));
        assert_eq!(registry.generate_unique_name("Frame"), "Frame_2");
        assert_eq!(registry.generate_unique_name("Other"), "Other");
    }

    #[test]
    fn test_silent_registry_queues_nothing() {
        let mut registry = Registry::silent();
        let id = registry.add(Record::generic("Note", "NoteRecord"));
        registry.modify(id, |record| record.set_name("Renamed")).unwrap();
        assert!(registry.take_events().is_empty());
    }

    #[test]
    fn test_object_id_parse() {
        let id = ObjectId::new();
        let parsed: ObjectId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<ObjectId>().is_err());
    }
}
