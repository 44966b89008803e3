// SPDX-License-Identifier: MIT OR Apache-2.0
//! Host scene: live records plus the sequences they are browsed from.

use crate::registry::Registry;
use crate::sequence::{IndexedSequence, SequenceId};
use indexmap::IndexMap;
use std::collections::HashMap;

/// Records and sequences of one document.
///
/// Fields are public so callers can borrow the registry and a sequence at the
/// same time.
#[derive(Debug, Default)]
pub struct Scene {
    /// Live records: proxies, display records, user data
    pub registry: Registry,
    /// Sequences by id
    pub sequences: IndexMap<SequenceId, IndexedSequence>,
    observed: HashMap<SequenceId, u64>,
}

impl Scene {
    /// Create an empty scene
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sequence and take ownership of it
    pub fn add_sequence(&mut self, sequence: IndexedSequence) -> SequenceId {
        let id = SequenceId::new();
        tracing::debug!("Adding sequence {} ({})", sequence.name, id);
        self.observed.insert(id, sequence.revision());
        self.sequences.insert(id, sequence);
        id
    }

    /// Remove a sequence
    pub fn remove_sequence(&mut self, id: SequenceId) -> Option<IndexedSequence> {
        self.observed.remove(&id);
        self.sequences.shift_remove(&id)
    }

    /// Look up a sequence
    pub fn sequence(&self, id: SequenceId) -> Option<&IndexedSequence> {
        self.sequences.get(&id)
    }

    /// Look up a sequence mutably
    pub fn sequence_mut(&mut self, id: SequenceId) -> Option<&mut IndexedSequence> {
        self.sequences.get_mut(&id)
    }

    /// Sequences changed since the last call, in scene order.
    ///
    /// Sequences inserted into [`Self::sequences`] directly are reported on
    /// the first call that sees them.
    pub fn take_modified_sequences(&mut self) -> Vec<SequenceId> {
        self.observed.retain(|id, _| self.sequences.contains_key(id));
        let mut modified = Vec::new();
        for (id, sequence) in &self.sequences {
            let revision = sequence.revision();
            if self.observed.insert(*id, revision) != Some(revision) {
                modified.push(*id);
            }
        }
        modified
    }

    /// First sequence with the given name
    pub fn find_sequence_by_name(&self, name: &str) -> Option<SequenceId> {
        self.sequences
            .iter()
            .find(|(_, sequence)| sequence.name == name)
            .map(|(id, _)| *id)
    }

    /// Sequences that can be browsed together with `master`, excluding it
    pub fn compatible_sequences(&self, master: SequenceId) -> Vec<SequenceId> {
        let Some(master_sequence) = self.sequences.get(&master) else {
            return Vec::new();
        };
        self.sequences
            .iter()
            .filter(|(id, sequence)| {
                **id != master && master_sequence.is_compatible_for_browsing(sequence)
            })
            .map(|(id, _)| *id)
            .collect()
    }
}
