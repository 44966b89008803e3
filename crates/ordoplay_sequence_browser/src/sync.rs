// SPDX-License-Identifier: MIT OR Apache-2.0
//! Master/satellite synchronization table.
//!
//! A browser tracks one master sequence and any number of synchronized
//! sequences. Each track is identified by a postfix string; the first track is
//! always the master.

use crate::proxy::DisplayBinding;
use ordoplay_sequences::{ObjectId, SequenceId};
use serde::{Deserialize, Serialize};

/// Per-track synchronization flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynchronizationProperties {
    /// Mirror the track into its proxy during browsing
    pub playback: bool,
    /// Write proxy snapshots back into the track while recording
    pub recording: bool,
    /// Rename the proxy on every refresh
    pub overwrite_proxy_name: bool,
    /// Write proxy edits back into the track when not recording
    pub save_changes: bool,
}

impl Default for SynchronizationProperties {
    fn default() -> Self {
        Self {
            playback: true,
            recording: false,
            overwrite_proxy_name: false,
            save_changes: false,
        }
    }
}

impl SynchronizationProperties {
    /// Encode as `"playback <bool> recording <bool> overwriteProxyName <bool> saveChanges <bool>"`
    pub fn to_attribute(&self) -> String {
        format!(
            "playback {} recording {} overwriteProxyName {} saveChanges {}",
            self.playback, self.recording, self.overwrite_proxy_name, self.save_changes
        )
    }

    /// Decode the attribute form. Missing keys keep their defaults.
    pub fn from_attribute(value: &str) -> Self {
        let mut props = Self::default();
        let mut tokens = value.split_whitespace();
        while let Some(key) = tokens.next() {
            let Some(flag) = tokens.next() else {
                tracing::warn!("SynchronizationProperties: key {} has no value", key);
                break;
            };
            let flag = flag == "true";
            match key {
                "playback" => props.playback = flag,
                "recording" => props.recording = flag,
                "overwriteProxyName" => props.overwrite_proxy_name = flag,
                "saveChanges" => props.save_changes = flag,
                other => tracing::warn!("SynchronizationProperties: unknown key {}", other),
            }
        }
        props
    }
}

/// One synchronized sequence of a browser
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    /// Track identifier
    pub postfix: String,
    /// Sequence browsed by this track
    pub sequence: SequenceId,
    /// Proxy record in the host registry
    pub proxy: Option<ObjectId>,
    /// Display records owned by the proxy
    pub displays: Vec<DisplayBinding>,
    /// Synchronization flags
    pub props: SynchronizationProperties,
}

impl Track {
    fn new(postfix: String, sequence: SequenceId, props: SynchronizationProperties) -> Self {
        Self {
            postfix,
            sequence,
            proxy: None,
            displays: Vec::new(),
            props,
        }
    }
}

/// Ordered tracks, master first
#[derive(Debug, Clone, Default)]
pub struct SynchronizationTable {
    tracks: Vec<Track>,
    last_postfix_index: u32,
    default_props: SynchronizationProperties,
}

impl SynchronizationTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table whose new tracks start with `props`
    pub fn with_default_props(props: SynchronizationProperties) -> Self {
        Self {
            default_props: props,
            ..Self::default()
        }
    }

    /// Next counter value not already used as a postfix
    pub fn generate_unique_postfix(&mut self) -> String {
        loop {
            let candidate = self.last_postfix_index.to_string();
            self.last_postfix_index += 1;
            if self.position(&candidate).is_none() {
                return candidate;
            }
        }
    }

    /// Counter used for the next postfix
    pub fn last_postfix_index(&self) -> u32 {
        self.last_postfix_index
    }

    /// Postfix of the track browsing `sequence`
    pub fn postfix_of(&self, sequence: SequenceId) -> Option<&str> {
        self.tracks
            .iter()
            .find(|track| track.sequence == sequence)
            .map(|track| track.postfix.as_str())
    }

    /// Postfix of the track whose proxy is `proxy`
    pub fn postfix_of_proxy(&self, proxy: ObjectId) -> Option<&str> {
        self.tracks
            .iter()
            .find(|track| track.proxy == Some(proxy))
            .map(|track| track.postfix.as_str())
    }

    /// Append a track for `sequence`, or return the existing postfix.
    ///
    /// The boolean is `true` when a track was added.
    pub fn add(&mut self, sequence: SequenceId) -> (String, bool) {
        if let Some(postfix) = self.postfix_of(sequence) {
            return (postfix.to_string(), false);
        }
        let postfix = self.generate_unique_postfix();
        self.tracks
            .push(Track::new(postfix.clone(), sequence, self.default_props));
        (postfix, true)
    }

    /// Insert a track with a known postfix (used when restoring attributes)
    pub fn insert_restored(&mut self, postfix: String, sequence: SequenceId) {
        if self.position(&postfix).is_some() {
            tracing::warn!("Duplicate track postfix {} ignored", postfix);
            return;
        }
        self.tracks
            .push(Track::new(postfix, sequence, self.default_props));
    }

    /// Remove a track
    pub fn remove(&mut self, postfix: &str) -> Option<Track> {
        self.position(postfix).map(|index| self.tracks.remove(index))
    }

    /// Remove every track
    pub fn clear(&mut self) -> Vec<Track> {
        std::mem::take(&mut self.tracks)
    }

    /// Move a track to the front, making it the master
    pub fn promote(&mut self, postfix: &str) -> bool {
        match self.position(postfix) {
            Some(0) => true,
            Some(index) => {
                let track = self.tracks.remove(index);
                self.tracks.insert(0, track);
                true
            }
            None => false,
        }
    }

    /// Master track
    pub fn master(&self) -> Option<&Track> {
        self.tracks.first()
    }

    /// Whether `postfix` is the master track
    pub fn is_master(&self, postfix: &str) -> bool {
        self.master().is_some_and(|track| track.postfix == postfix)
    }

    /// Tracks after the master
    pub fn satellites(&self) -> &[Track] {
        self.tracks.get(1..).unwrap_or(&[])
    }

    /// All tracks, master first
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Postfixes in order
    pub fn postfixes(&self) -> Vec<String> {
        self.tracks.iter().map(|track| track.postfix.clone()).collect()
    }

    /// Track by postfix
    pub fn track(&self, postfix: &str) -> Option<&Track> {
        self.tracks.iter().find(|track| track.postfix == postfix)
    }

    /// Mutable track by postfix
    pub fn track_mut(&mut self, postfix: &str) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|track| track.postfix == postfix)
    }

    /// Synchronization flags of a track
    pub fn sync_props(&self, postfix: &str) -> Option<&SynchronizationProperties> {
        self.track(postfix).map(|track| &track.props)
    }

    /// Mutable synchronization flags of a track
    pub fn sync_props_mut(&mut self, postfix: &str) -> Option<&mut SynchronizationProperties> {
        self.track_mut(postfix).map(|track| &mut track.props)
    }

    /// Number of tracks
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Whether no track is set
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    fn position(&self, postfix: &str) -> Option<usize> {
        self.tracks.iter().position(|track| track.postfix == postfix)
    }
}
