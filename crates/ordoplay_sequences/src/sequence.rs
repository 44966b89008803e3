// SPDX-License-Identifier: MIT OR Apache-2.0
//! Indexed sequence of records.
//!
//! An [`IndexedSequence`] is an insertion-ordered list of `(index value,
//! record)` entries. Index values are unique strings; inserting at an existing
//! value replaces that entry's record in place. Records are deep copies owned
//! by a private store that never shares objects with the host registry.

use crate::copier::CopierRegistry;
use crate::error::{Result, SequenceError};
use crate::record::{Record, BASE_NAME_ATTRIBUTE};
use crate::registry::{ObjectId, Registry};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted document format version
pub const SEQUENCE_DOCUMENT_VERSION: u32 = 1;

/// Unique identifier for a sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SequenceId(pub Uuid);

impl SequenceId {
    /// Create a new random sequence ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SequenceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SequenceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SequenceId {
    type Err = SequenceError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| SequenceError::invalid(format!("sequence id {s:?}: {e}")))
    }
}

/// How index values are interpreted for display and closest-match lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndexType {
    /// Values are numbers (time, position, ...)
    #[default]
    Numeric,
    /// Values are arbitrary labels
    Text,
}

impl IndexType {
    /// Persisted name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Numeric => "numeric",
            Self::Text => "text",
        }
    }

    /// Parse a persisted name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "numeric" => Some(Self::Numeric),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

/// Strategy used to match a requested index value against stored ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndexLookup {
    /// Exact string equality
    #[default]
    Exact,
    /// Numeric comparison within the sequence's tolerance, exact match for
    /// values that do not parse
    NumericTolerance,
}

/// Format a numeric index value the way sequences store it
pub fn format_index_value(value: f64) -> String {
    format!("{value}")
}

/// Parse an index value as a number
pub fn parse_index_value(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Ordered, uniquely keyed collection of records
#[derive(Debug)]
pub struct IndexedSequence {
    /// Sequence name, used to name proxies
    pub name: String,
    index_name: String,
    index_unit: String,
    index_type: IndexType,
    numeric_tolerance: f64,
    lookup: IndexLookup,
    entries: IndexMap<String, ObjectId>,
    shared_displays: Vec<ObjectId>,
    store: Registry,
    revision: u64,
}

impl IndexedSequence {
    /// Default index name
    pub const DEFAULT_INDEX_NAME: &'static str = "time";
    /// Default index unit
    pub const DEFAULT_INDEX_UNIT: &'static str = "s";
    /// Default tolerance of numeric comparisons
    pub const DEFAULT_NUMERIC_TOLERANCE: f64 = 0.001;

    /// Create an empty sequence indexed by time in seconds
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            index_name: Self::DEFAULT_INDEX_NAME.to_string(),
            index_unit: Self::DEFAULT_INDEX_UNIT.to_string(),
            index_type: IndexType::Numeric,
            numeric_tolerance: Self::DEFAULT_NUMERIC_TOLERANCE,
            lookup: IndexLookup::Exact,
            entries: IndexMap::new(),
            shared_displays: Vec::new(),
            store: Registry::silent(),
            revision: 0,
        }
    }

    /// Builder: set index metadata
    pub fn with_index(
        mut self,
        name: impl Into<String>,
        unit: impl Into<String>,
        index_type: IndexType,
    ) -> Self {
        self.index_name = name.into();
        self.index_unit = unit.into();
        self.index_type = index_type;
        self
    }

    /// Counter bumped by every change to the entries or index metadata
    pub fn revision(&self) -> u64 {
        self.revision
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    /// Index name (e.g. "time")
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Set the index name
    pub fn set_index_name(&mut self, name: impl Into<String>) {
        self.index_name = name.into();
        self.touch();
    }

    /// Index unit (e.g. "s")
    pub fn index_unit(&self) -> &str {
        &self.index_unit
    }

    /// Set the index unit
    pub fn set_index_unit(&mut self, unit: impl Into<String>) {
        self.index_unit = unit.into();
        self.touch();
    }

    /// Index type
    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    /// Set the index type
    pub fn set_index_type(&mut self, index_type: IndexType) {
        self.index_type = index_type;
        self.touch();
    }

    /// Tolerance used by numeric comparisons
    pub fn numeric_tolerance(&self) -> f64 {
        self.numeric_tolerance
    }

    /// Set the numeric tolerance (negative values are clamped to zero)
    pub fn set_numeric_tolerance(&mut self, tolerance: f64) {
        self.numeric_tolerance = tolerance.max(0.0);
        self.touch();
    }

    /// Lookup strategy
    pub fn lookup(&self) -> IndexLookup {
        self.lookup
    }

    /// Select the lookup strategy
    pub fn set_lookup(&mut self, lookup: IndexLookup) {
        self.lookup = lookup;
        self.touch();
    }

    /// Number of entries
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Whether the sequence has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Class name of the first record, or "" when empty
    pub fn class_name(&self) -> &str {
        self.entries
            .values()
            .next()
            .and_then(|id| self.store.get(*id))
            .map(Record::class_name)
            .unwrap_or("")
    }

    /// Index values in insertion order
    pub fn index_values(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Deep-copy `record` into the sequence at `index_value`.
    ///
    /// Replaces the record of an existing entry in place, appends otherwise.
    /// An existing entry is matched with the configured lookup strategy and
    /// keeps its stored index value. Returns the id of the stored copy.
    pub fn upsert(&mut self, record: &Record, index_value: &str) -> Result<ObjectId> {
        self.upsert_with_displays(record, &[], index_value)
    }

    /// Like [`upsert`](Self::upsert), also taking the record's display records.
    ///
    /// Display records are copied the first time any are supplied; every
    /// later entry is linked to those same copies.
    pub fn upsert_with_displays(
        &mut self,
        record: &Record,
        displays: &[&Record],
        index_value: &str,
    ) -> Result<ObjectId> {
        if index_value.trim().is_empty() {
            return Err(SequenceError::invalid("empty index value"));
        }

        if self.shared_displays.is_empty() && !displays.is_empty() {
            self.shared_displays = displays
                .iter()
                .map(|display| self.store.add(display.deep_copy()))
                .collect();
        }

        let mut copy = record.deep_copy();
        let base_name = record
            .attribute(BASE_NAME_ATTRIBUTE)
            .unwrap_or(record.name())
            .to_string();
        copy.set_name(base_name.clone());
        copy.set_attribute(BASE_NAME_ATTRIBUTE, base_name);
        copy.set_display_ids(self.shared_displays.clone());

        let id = self.store.add(copy);
        match self.position_of(index_value) {
            Some(position) => {
                if let Some((_, slot)) = self.entries.get_index_mut(position) {
                    let previous = std::mem::replace(slot, id);
                    self.store.remove(previous);
                }
            }
            None => {
                self.entries.insert(index_value.to_string(), id);
            }
        }
        self.touch();
        Ok(id)
    }

    /// Remove the entry at `index_value` and destroy its record.
    ///
    /// Returns whether an entry was removed.
    pub fn remove(&mut self, index_value: &str) -> bool {
        let Some(position) = self.position_of(index_value) else {
            tracing::warn!(
                "IndexedSequence::remove: no item at index value {:?} in {}",
                index_value,
                self.name
            );
            return false;
        };
        if let Some((_, id)) = self.entries.shift_remove_index(position) {
            self.store.remove(id);
        }
        if self.entries.is_empty() {
            self.drop_shared_displays();
        }
        self.touch();
        true
    }

    /// Remove every entry and destroy all records
    pub fn remove_all(&mut self) {
        self.entries.clear();
        self.shared_displays.clear();
        self.store.clear();
        self.touch();
    }

    /// Record at `index_value` using the configured lookup strategy
    pub fn get(&self, index_value: &str) -> Option<&Record> {
        self.position_of(index_value)
            .and_then(|position| self.get_nth(position).ok())
    }

    /// Record stored under an id returned by [`upsert`](Self::upsert)
    pub fn get_by_id(&self, id: ObjectId) -> Option<&Record> {
        self.store.get(id)
    }

    /// Record at a position in insertion order
    pub fn get_nth(&self, position: usize) -> Result<&Record> {
        self.entries
            .get_index(position)
            .and_then(|(_, id)| self.store.get(*id))
            .ok_or_else(|| self.out_of_range(position))
    }

    /// Index value at a position in insertion order
    pub fn nth_index_value(&self, position: usize) -> Result<&str> {
        self.entries
            .get_index(position)
            .map(|(value, _)| value.as_str())
            .ok_or_else(|| self.out_of_range(position))
    }

    /// Id of the record at a position
    pub fn nth_record_id(&self, position: usize) -> Option<ObjectId> {
        self.entries.get_index(position).map(|(_, id)| *id)
    }

    /// Last index value, if any
    pub fn last_index_value(&self) -> Option<&str> {
        self.entries.last().map(|(value, _)| value.as_str())
    }

    /// Position of the entry for `index_value`.
    ///
    /// With `exact == false` on a numeric sequence the entry with the greatest
    /// value not above the requested one is returned, or the first entry when
    /// all stored values are greater.
    pub fn item_number(&self, index_value: &str, exact: bool) -> Option<usize> {
        if let Some(position) = self.position_of(index_value) {
            return Some(position);
        }
        if exact || self.index_type != IndexType::Numeric || self.entries.is_empty() {
            return None;
        }
        let target = parse_index_value(index_value)?;
        let closest = self
            .entries
            .keys()
            .enumerate()
            .filter_map(|(position, value)| parse_index_value(value).map(|v| (position, v)))
            .filter(|(_, value)| *value <= target + self.numeric_tolerance)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(position, _)| position);
        Some(closest.unwrap_or(0))
    }

    /// Record for `index_value`, optionally falling back to the closest one
    pub fn record_at_value(&self, index_value: &str, exact: bool) -> Option<&Record> {
        self.item_number(index_value, exact)
            .and_then(|position| self.get_nth(position).ok())
    }

    /// Display records linked to a stored record
    pub fn display_records_for(&self, record: &Record) -> Vec<&Record> {
        record
            .display_ids()
            .iter()
            .filter_map(|id| self.store.get(*id))
            .collect()
    }

    /// Copy `source`'s content into the existing entry at `index_value`.
    ///
    /// The entry keeps its own name.
    pub fn update_record_at_value(
        &mut self,
        source: &Record,
        index_value: &str,
        copiers: &CopierRegistry,
    ) -> Result<()> {
        let position = self
            .position_of(index_value)
            .ok_or_else(|| SequenceError::not_found(format!("index value {index_value:?}")))?;
        let id = self.entries[position];
        self.store.modify(id, |target| copiers.copy(source, target))??;
        self.touch();
        Ok(())
    }

    /// Change the index value of an entry, keeping its position
    pub fn update_index_value(&mut self, old_value: &str, new_value: &str) -> Result<()> {
        if new_value.trim().is_empty() {
            return Err(SequenceError::invalid("empty index value"));
        }
        if !self.entries.contains_key(old_value) {
            return Err(SequenceError::not_found(format!("index value {old_value:?}")));
        }
        if old_value == new_value {
            return Ok(());
        }
        if self.entries.contains_key(new_value) {
            return Err(SequenceError::invalid(format!(
                "index value {new_value:?} already exists"
            )));
        }
        self.entries = self
            .entries
            .drain(..)
            .map(|(value, id)| {
                if value == old_value {
                    (new_value.to_string(), id)
                } else {
                    (value, id)
                }
            })
            .collect();
        self.touch();
        Ok(())
    }

    /// Whether two sequences can be browsed together (same index name, unit
    /// and type)
    pub fn is_compatible_for_browsing(&self, other: &IndexedSequence) -> bool {
        self.index_name == other.index_name
            && self.index_unit == other.index_unit
            && self.index_type == other.index_type
    }

    /// Compact `"id:value;id:value"` form of the entries
    pub fn index_values_attribute(&self) -> String {
        self.entries
            .iter()
            .map(|(value, id)| format!("{id}:{value}"))
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Snapshot into the persisted document form
    pub fn to_document(&self) -> SequenceDocument {
        SequenceDocument {
            version: SEQUENCE_DOCUMENT_VERSION,
            name: self.name.clone(),
            index_name: self.index_name.clone(),
            index_unit: self.index_unit.clone(),
            index_type: self.index_type.name().to_string(),
            numeric_tolerance: self.numeric_tolerance,
            items: self
                .entries
                .iter()
                .map(|(value, id)| (*id, value.clone()))
                .collect(),
            records: self
                .store
                .iter()
                .map(|(id, record)| (id, record.clone()))
                .collect(),
        }
    }

    /// Rebuild a sequence from its persisted form
    pub fn from_document(document: SequenceDocument) -> Result<Self> {
        if document.version > SEQUENCE_DOCUMENT_VERSION {
            return Err(SequenceError::Serialization(format!(
                "unsupported sequence document version {}",
                document.version
            )));
        }
        let index_type = IndexType::from_name(&document.index_type).unwrap_or_else(|| {
            tracing::warn!(
                "Unknown index type {:?}, using numeric",
                document.index_type
            );
            IndexType::Numeric
        });

        let mut sequence = Self::new(document.name).with_index(
            document.index_name,
            document.index_unit,
            index_type,
        );
        sequence.set_numeric_tolerance(document.numeric_tolerance);

        for (id, record) in document.records {
            sequence.store.add_with_id(id, record)?;
        }
        for (id, value) in document.items {
            if !sequence.store.contains(id) {
                tracing::warn!("Sequence item {} references missing record {}", value, id);
                continue;
            }
            if sequence.entries.insert(value.clone(), id).is_some() {
                tracing::warn!("Duplicate index value {:?} in sequence document", value);
            }
        }
        sequence.shared_displays = sequence
            .entries
            .values()
            .next()
            .and_then(|id| sequence.store.get(*id))
            .map(|record| record.display_ids().to_vec())
            .unwrap_or_default();
        Ok(sequence)
    }

    /// Serialize to a RON string
    pub fn to_ron(&self) -> Result<String> {
        ron::ser::to_string_pretty(&self.to_document(), ron::ser::PrettyConfig::default())
            .map_err(|e| SequenceError::Serialization(e.to_string()))
    }

    /// Deserialize from a RON string
    pub fn from_ron(content: &str) -> Result<Self> {
        let document: SequenceDocument =
            ron::from_str(content).map_err(|e| SequenceError::Serialization(e.to_string()))?;
        Self::from_document(document)
    }

    fn position_of(&self, index_value: &str) -> Option<usize> {
        if let Some(position) = self.entries.get_index_of(index_value) {
            return Some(position);
        }
        match self.lookup {
            IndexLookup::Exact => None,
            IndexLookup::NumericTolerance => {
                let target = parse_index_value(index_value)?;
                self.entries.keys().position(|value| {
                    parse_index_value(value)
                        .is_some_and(|v| (v - target).abs() <= self.numeric_tolerance)
                })
            }
        }
    }

    fn drop_shared_displays(&mut self) {
        for id in std::mem::take(&mut self.shared_displays) {
            self.store.remove(id);
        }
    }

    fn out_of_range(&self, position: usize) -> SequenceError {
        SequenceError::not_found(format!(
            "item {position} of {} (count {})",
            self.name,
            self.entries.len()
        ))
    }
}

/// Read the compact `"id:value;id:value"` form
pub fn read_index_values(attribute: &str) -> Result<Vec<(ObjectId, String)>> {
    attribute
        .split(';')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (id, value) = item
                .split_once(':')
                .ok_or_else(|| SequenceError::invalid(format!("index value item {item:?}")))?;
            Ok((id.parse()?, value.to_string()))
        })
        .collect()
}

/// Persisted form of a sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceDocument {
    /// Format version
    pub version: u32,
    /// Sequence name
    pub name: String,
    /// Index name
    pub index_name: String,
    /// Index unit
    pub index_unit: String,
    /// `"numeric"` or `"text"`
    pub index_type: String,
    /// Numeric comparison tolerance
    #[serde(default = "default_tolerance")]
    pub numeric_tolerance: f64,
    /// Ordered `(record id, index value)` pairs
    pub items: Vec<(ObjectId, String)>,
    /// Item and display records
    pub records: IndexMap<ObjectId, Record>,
}

fn default_tolerance() -> f64 {
    IndexedSequence::DEFAULT_NUMERIC_TOLERANCE
}
