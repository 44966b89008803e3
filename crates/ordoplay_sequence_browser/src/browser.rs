// SPDX-License-Identifier: MIT OR Apache-2.0
//! Browser node: the aggregate of tracks, cursor, playback and recording.
//!
//! A [`BrowserNode`] owns no records. It refers to sequences and proxies by
//! id and takes the [`Scene`] as an argument whenever an operation has to look
//! at or change them. Every state change is announced as a
//! [`BrowserEvent::Modified`]; multi-field changes are wrapped in
//! [`BrowserNode::begin_modify`]/[`BrowserNode::end_modify`] so they produce a
//! single event.

use crate::playback::{PlaybackController, PlaybackState};
use crate::proxy::ProxyManager;
use crate::recording::{RecordingController, RecordingState, SamplingMode};
use crate::settings::BrowserSettings;
use crate::sync::{SynchronizationProperties, SynchronizationTable};
use ordoplay_sequences::{
    format_index_value, parse_index_value, ChangeTracker, ObjectId, Record, Result, Scene,
    SequenceError, SequenceId,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a browser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrowserId(pub Uuid);

impl BrowserId {
    /// Create a new random browser ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BrowserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BrowserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Notification emitted by browsers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserEvent {
    /// Browser state changed (one event per outermost modify bracket)
    Modified(BrowserId),
    /// A proxy of the browser was modified
    ProxyModified {
        /// Browser owning the proxy
        browser: BrowserId,
        /// Modified proxy record
        proxy: ObjectId,
    },
}

/// Synchronized browsing and recording of a set of sequences
#[derive(Debug, Clone)]
pub struct BrowserNode {
    pub(crate) id: BrowserId,
    /// Browser name
    pub name: String,
    pub(crate) table: SynchronizationTable,
    pub(crate) selected_item_number: i32,
    pub(crate) playback: PlaybackController,
    pub(crate) recording: RecordingController,
    changes: ChangeTracker,
    events: Vec<BrowserEvent>,
}

impl BrowserNode {
    /// Create a browser with default settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: BrowserId::new(),
            name: name.into(),
            table: SynchronizationTable::new(),
            selected_item_number: -1,
            playback: PlaybackController::new(),
            recording: RecordingController::new(),
            changes: ChangeTracker::new(),
            events: Vec::new(),
        }
    }

    /// Create a browser configured from `settings`
    pub fn with_settings(name: impl Into<String>, settings: &BrowserSettings) -> Self {
        let mut browser = Self::new(name);
        browser.table = SynchronizationTable::with_default_props(settings.default_sync_props);
        browser.playback.rate_fps = settings.playback_rate_fps;
        browser.playback.looped = settings.playback_looped;
        browser.playback.item_skipping = settings.playback_item_skipping;
        browser.recording.sampling_mode = settings.recording_sampling_mode;
        browser.recording.record_master_only = settings.record_master_only;
        browser
    }

    /// Browser ID
    pub fn id(&self) -> BrowserId {
        self.id
    }

    /// Open a modify bracket. Returns `true` if one was already open.
    pub fn begin_modify(&mut self) -> bool {
        self.changes.begin()
    }

    /// Close a modify bracket, emitting one `Modified` event if anything
    /// changed inside the outermost bracket
    pub fn end_modify(&mut self) {
        if self.changes.end() {
            self.events.push(BrowserEvent::Modified(self.id));
        }
    }

    /// Record a state change
    pub(crate) fn touch(&mut self) {
        if self.changes.mark() {
            self.events.push(BrowserEvent::Modified(self.id));
        }
    }

    /// Take queued events
    pub fn take_events(&mut self) -> Vec<BrowserEvent> {
        std::mem::take(&mut self.events)
    }

    /// Synchronization table
    pub fn table(&self) -> &SynchronizationTable {
        &self.table
    }

    // ---- Tracks ----

    /// Master sequence
    pub fn master_sequence(&self) -> Option<SequenceId> {
        self.table.master().map(|track| track.sequence)
    }

    /// Tracked sequences in track order
    pub fn synchronized_sequences(&self, include_master: bool) -> Vec<SequenceId> {
        let skip = usize::from(!include_master);
        self.table
            .tracks()
            .iter()
            .skip(skip)
            .map(|track| track.sequence)
            .collect()
    }

    /// Whether `sequence` is tracked by this browser
    pub fn is_synchronized_sequence(&self, sequence: SequenceId, include_master: bool) -> bool {
        match self.table.postfix_of(sequence) {
            Some(postfix) => include_master || !self.table.is_master(postfix),
            None => false,
        }
    }

    /// Postfix of the track browsing `sequence`
    pub fn postfix_of(&self, sequence: SequenceId) -> Option<&str> {
        self.table.postfix_of(sequence)
    }

    /// Add a track for `sequence`; an already tracked sequence keeps its
    /// postfix
    pub fn add_synchronized_sequence(&mut self, sequence: SequenceId) -> String {
        match self.try_add_synchronized_sequence(sequence) {
            Ok(postfix) | Err(SequenceError::AlreadyTracked(postfix)) => postfix,
            Err(_) => String::new(),
        }
    }

    /// Add a track for `sequence`, failing with
    /// [`SequenceError::AlreadyTracked`] if it is tracked already
    pub fn try_add_synchronized_sequence(&mut self, sequence: SequenceId) -> Result<String> {
        let (postfix, added) = self.table.add(sequence);
        if !added {
            return Err(SequenceError::AlreadyTracked(postfix));
        }
        tracing::debug!("Browser {}: tracking sequence {} as {}", self.name, sequence, postfix);
        self.touch();
        Ok(postfix)
    }

    /// Stop tracking `sequence`, removing its proxy and display records.
    ///
    /// Removing the master removes every track.
    pub fn remove_synchronized_sequence(&mut self, sequence: SequenceId, scene: &mut Scene) -> bool {
        let Some(postfix) = self.table.postfix_of(sequence).map(str::to_string) else {
            tracing::warn!(
                "Browser {}: sequence {} is not synchronized, nothing to remove",
                self.name,
                sequence
            );
            return false;
        };
        if self.table.is_master(&postfix) {
            self.remove_all_sequences(scene);
            return true;
        }

        self.begin_modify();
        let stops_playback = self
            .table
            .sync_props(&postfix)
            .is_some_and(|props| props.playback || props.recording);
        if stops_playback {
            self.set_playback_active(false);
            self.stop_recording();
        }
        if let Some(mut track) = self.table.remove(&postfix) {
            ProxyManager::remove_proxy(&mut track, &mut scene.registry);
        }
        self.touch();
        self.end_modify();
        true
    }

    /// Remove every track, its proxy and display records
    pub fn remove_all_sequences(&mut self, scene: &mut Scene) {
        self.begin_modify();
        self.set_playback_active(false);
        self.stop_recording();
        // master last
        for mut track in self.table.clear().into_iter().rev() {
            ProxyManager::remove_proxy(&mut track, &mut scene.registry);
        }
        self.set_cursor(-1);
        self.touch();
        self.end_modify();
    }

    /// Remove all proxies but keep the tracks
    pub fn remove_all_proxies(&mut self, scene: &mut Scene) {
        let postfixes = self.table.postfixes();
        let mut removed = false;
        for postfix in postfixes {
            if let Some(track) = self.table.track_mut(&postfix) {
                removed |= track.proxy.is_some() || !track.displays.is_empty();
                ProxyManager::remove_proxy(track, &mut scene.registry);
            }
        }
        if removed {
            self.touch();
        }
    }

    /// Make `sequence` the master.
    ///
    /// Setting the current master does nothing. A tracked satellite is moved
    /// to the front and the cursor keeps pointing at the same index value.
    /// Any other sequence replaces all tracks.
    pub fn set_master_sequence(&mut self, sequence: Option<SequenceId>, scene: &mut Scene) {
        let Some(sequence) = sequence else {
            self.remove_all_sequences(scene);
            return;
        };
        if self.master_sequence() == Some(sequence) {
            return;
        }

        self.begin_modify();
        if let Some(postfix) = self.table.postfix_of(sequence).map(str::to_string) {
            let previous_value = self.selected_index_value(scene);
            self.table.promote(&postfix);
            let cursor = match (previous_value, scene.sequence(sequence)) {
                (Some(value), Some(master)) => master
                    .item_number(&value, false)
                    .and_then(|item| i32::try_from(item).ok())
                    .unwrap_or(-1),
                (None, Some(master)) if !master.is_empty() => 0,
                _ => -1,
            };
            self.set_cursor(cursor);
        } else {
            self.remove_all_sequences(scene);
            self.table.add(sequence);
            let count = self.number_of_items(scene);
            self.set_cursor(if count > 0 { 0 } else { -1 });
        }
        self.touch();
        self.end_modify();
    }

    // ---- Proxies ----

    /// Proxy of the track `postfix`
    pub fn proxy(&self, postfix: &str) -> Option<ObjectId> {
        self.table.track(postfix).and_then(|track| track.proxy)
    }

    /// Proxy mirroring `sequence`
    pub fn proxy_for_sequence(&self, sequence: SequenceId) -> Option<ObjectId> {
        self.table.postfix_of(sequence).and_then(|postfix| self.proxy(postfix))
    }

    /// Display records of the proxy mirroring `sequence`
    pub fn display_proxies_for_sequence(&self, sequence: SequenceId) -> Vec<ObjectId> {
        self.table
            .postfix_of(sequence)
            .and_then(|postfix| self.table.track(postfix))
            .map(|track| track.displays.iter().map(|display| display.proxy).collect())
            .unwrap_or_default()
    }

    /// Sequence mirrored by `proxy`
    pub fn sequence_for_proxy(&self, proxy: ObjectId) -> Option<SequenceId> {
        self.table
            .postfix_of_proxy(proxy)
            .and_then(|postfix| self.table.track(postfix))
            .map(|track| track.sequence)
    }

    /// Whether `record` is one of this browser's proxies
    pub fn is_proxy(&self, record: ObjectId) -> bool {
        self.table.postfix_of_proxy(record).is_some()
    }

    /// Use an existing record as the proxy of `sequence`'s track
    pub fn set_proxy_for_sequence(&mut self, sequence: SequenceId, proxy: Option<ObjectId>) -> Result<()> {
        let postfix = self
            .table
            .postfix_of(sequence)
            .map(str::to_string)
            .ok_or_else(|| SequenceError::not_found(format!("track for sequence {sequence}")))?;
        let Some(track) = self.table.track_mut(&postfix) else {
            return Err(SequenceError::not_found(format!("track {postfix}")));
        };
        if track.proxy == proxy {
            return Ok(());
        }
        track.proxy = proxy;
        track.displays.clear();
        self.touch();
        Ok(())
    }

    /// Forget a proxy that was removed from the registry
    pub(crate) fn forget_proxy(&mut self, record: ObjectId) {
        let mut changed = false;
        let postfixes = self.table.postfixes();
        for postfix in postfixes {
            let Some(track) = self.table.track_mut(&postfix) else {
                continue;
            };
            if track.proxy == Some(record) {
                track.proxy = None;
                changed = true;
            }
            let before = track.displays.len();
            track.displays.retain(|display| display.proxy != record);
            changed |= before != track.displays.len();
        }
        if changed {
            self.touch();
        }
    }

    /// Synchronization flags of `sequence`'s track
    pub fn sync_props(&self, sequence: SequenceId) -> Option<SynchronizationProperties> {
        self.table
            .postfix_of(sequence)
            .and_then(|postfix| self.table.sync_props(postfix))
            .copied()
    }

    /// Replace the synchronization flags of `sequence`'s track
    pub fn set_sync_props(&mut self, sequence: SequenceId, props: SynchronizationProperties) -> Result<()> {
        let postfix = self
            .table
            .postfix_of(sequence)
            .map(str::to_string)
            .ok_or_else(|| SequenceError::not_found(format!("track for sequence {sequence}")))?;
        let Some(current) = self.table.sync_props_mut(&postfix) else {
            return Err(SequenceError::not_found(format!("track {postfix}")));
        };
        if *current == props {
            return Ok(());
        }
        *current = props;
        self.touch();
        Ok(())
    }

    /// Change one or more flags of `sequence`'s track
    pub fn update_sync_props(
        &mut self,
        sequence: SequenceId,
        update: impl FnOnce(&mut SynchronizationProperties),
    ) -> Result<()> {
        let mut props = self
            .sync_props(sequence)
            .ok_or_else(|| SequenceError::not_found(format!("track for sequence {sequence}")))?;
        update(&mut props);
        self.set_sync_props(sequence, props)
    }

    // ---- Cursor ----

    /// Selected item of the master, -1 when nothing is selected
    pub fn selected_item_number(&self) -> i32 {
        self.selected_item_number
    }

    /// Number of items of the master sequence
    pub fn number_of_items(&self, scene: &Scene) -> usize {
        self.master_sequence()
            .and_then(|master| scene.sequence(master))
            .map_or(0, |master| master.count())
    }

    /// Select an item; the value is clamped to the master's items.
    /// Returns the selected item.
    pub fn set_selected_item_number(&mut self, item: i32, scene: &Scene) -> i32 {
        let count = self.number_of_items(scene);
        let clamped = if count == 0 {
            -1
        } else {
            let last = i32::try_from(count - 1).unwrap_or(i32::MAX);
            item.clamp(-1, last)
        };
        if clamped != item {
            tracing::debug!(
                "Browser {}: item {} clamped to {} ({} items)",
                self.name,
                item,
                clamped,
                count
            );
        }
        self.set_cursor(clamped);
        clamped
    }

    /// Index value of the master at the cursor
    pub fn selected_index_value(&self, scene: &Scene) -> Option<String> {
        let position = usize::try_from(self.selected_item_number).ok()?;
        let master = scene.sequence(self.master_sequence()?)?;
        master.nth_index_value(position).ok().map(str::to_string)
    }

    /// Select the master's first item
    pub fn select_first_item(&mut self, scene: &Scene) -> i32 {
        let item = if self.number_of_items(scene) > 0 { 0 } else { -1 };
        self.set_cursor(item);
        item
    }

    /// Select the master's last item
    pub fn select_last_item(&mut self, scene: &Scene) -> i32 {
        let count = self.number_of_items(scene);
        let item = i32::try_from(count).unwrap_or(i32::MAX) - 1;
        self.set_cursor(item);
        item
    }

    /// Move the cursor by `increment` items following the loop policy.
    /// Returns the new item, -1 when the master is empty.
    pub fn select_next_item(&mut self, increment: i32, scene: &Scene) -> i32 {
        let count = self.number_of_items(scene);
        if count == 0 {
            return -1;
        }
        self.begin_modify();
        let was_playing = self.playback.is_playing();
        let next = self
            .playback
            .advance(self.selected_item_number, increment, count);
        if was_playing != self.playback.is_playing() {
            tracing::debug!("Browser {}: reached the end, playback stopped", self.name);
            self.touch();
        }
        self.set_cursor(next);
        self.end_modify();
        next
    }

    /// Clamp the cursor after the master changed size
    pub(crate) fn validate_cursor(&mut self, scene: &Scene) {
        let count = self.number_of_items(scene);
        let last = i32::try_from(count).unwrap_or(i32::MAX) - 1;
        if self.selected_item_number > last {
            self.set_cursor(last);
        }
    }

    fn set_cursor(&mut self, item: i32) {
        if self.selected_item_number != item {
            self.selected_item_number = item;
            self.touch();
        }
    }

    // ---- Playback ----

    /// Playback state
    pub fn playback_state(&self) -> PlaybackState {
        self.playback.state
    }

    /// Whether playback is running
    pub fn is_playback_active(&self) -> bool {
        self.playback.is_playing()
    }

    /// Start or stop playback
    pub fn set_playback_active(&mut self, active: bool) {
        if self.playback.set_active(active) {
            self.touch();
        }
    }

    /// Playback rate in items per second
    pub fn playback_rate_fps(&self) -> f64 {
        self.playback.rate_fps
    }

    /// Set the playback rate; negative or non-finite rates are ignored
    pub fn set_playback_rate_fps(&mut self, rate_fps: f64) {
        if !rate_fps.is_finite() || rate_fps < 0.0 {
            tracing::warn!("Browser {}: invalid playback rate {}", self.name, rate_fps);
            return;
        }
        if self.playback.rate_fps != rate_fps {
            self.playback.rate_fps = rate_fps;
            self.touch();
        }
    }

    /// Whether playback wraps around
    pub fn is_playback_looped(&self) -> bool {
        self.playback.looped
    }

    /// Set looping
    pub fn set_playback_looped(&mut self, looped: bool) {
        if self.playback.looped != looped {
            self.playback.looped = looped;
            self.touch();
        }
    }

    /// Whether late ticks skip items
    pub fn is_playback_item_skipping_enabled(&self) -> bool {
        self.playback.item_skipping
    }

    /// Set item skipping
    pub fn set_playback_item_skipping_enabled(&mut self, enabled: bool) {
        if self.playback.item_skipping != enabled {
            self.playback.item_skipping = enabled;
            self.touch();
        }
    }

    // ---- Recording ----

    /// Recording state
    pub fn recording_state(&self) -> RecordingState {
        self.recording.state
    }

    /// Whether recording is running
    pub fn is_recording_active(&self) -> bool {
        self.recording.is_active()
    }

    /// Start or stop recording at time `now` (seconds)
    pub fn set_recording_active(&mut self, active: bool, now: f64, scene: &Scene) {
        let last_value = self.last_master_value(scene).unwrap_or(0.0);
        if self.recording.set_active(active, now, last_value) {
            tracing::debug!(
                "Browser {}: recording {}",
                self.name,
                if active { "started" } else { "stopped" }
            );
            self.touch();
        }
    }

    fn stop_recording(&mut self) {
        if self.recording.set_active(false, 0.0, 0.0) {
            self.touch();
        }
    }

    /// Whether only master proxy modifications trigger snapshots
    pub fn record_master_only(&self) -> bool {
        self.recording.record_master_only
    }

    /// Set master-only recording
    pub fn set_record_master_only(&mut self, master_only: bool) {
        if self.recording.record_master_only != master_only {
            self.recording.record_master_only = master_only;
            self.touch();
        }
    }

    /// Recording sampling mode
    pub fn recording_sampling_mode(&self) -> SamplingMode {
        self.recording.sampling_mode
    }

    /// Set the recording sampling mode
    pub fn set_recording_sampling_mode(&mut self, mode: SamplingMode) {
        if self.recording.sampling_mode != mode {
            self.recording.sampling_mode = mode;
            self.touch();
        }
    }

    /// Offset between wall-clock time and recorded index values
    pub fn recording_time_offset(&self) -> f64 {
        self.recording.time_offset()
    }

    /// Time of the last continuous snapshot
    pub fn last_save_time(&self) -> f64 {
        self.recording.last_save_time()
    }

    /// Write the current proxies of all recording tracks into their sequences.
    ///
    /// While recording, the index value follows wall-clock time and the
    /// sampling mode may drop the snapshot. Otherwise a single snapshot is
    /// appended one frame period after the master's last item. Returns
    /// whether anything was written; if so the cursor moves to the master's
    /// last item.
    pub fn save_proxy_nodes_state(&mut self, now: f64, scene: &mut Scene) -> Result<bool> {
        if self.master_sequence().is_none() {
            return Err(SequenceError::not_found("master sequence"));
        }
        let last_value = self.last_master_value(scene);
        let Some(timestamp) = self
            .recording
            .sample_time(now, self.playback.rate_fps, last_value)
        else {
            return Ok(false);
        };
        let index_value = format_index_value(timestamp);

        let mut written = false;
        {
            let Scene { registry, sequences, .. } = &mut *scene;
            for track in self.table.tracks() {
                if !track.props.recording {
                    continue;
                }
                let Some(proxy) = track.proxy.and_then(|id| registry.get(id)) else {
                    tracing::warn!(
                        "Browser {}: track {} has no proxy to record",
                        self.name,
                        track.postfix
                    );
                    continue;
                };
                let Some(sequence) = sequences.get_mut(&track.sequence) else {
                    tracing::warn!(
                        "Browser {}: sequence {} of track {} is missing",
                        self.name,
                        track.sequence,
                        track.postfix
                    );
                    continue;
                };
                let displays: Vec<&Record> = proxy
                    .display_ids()
                    .iter()
                    .filter_map(|id| registry.get(*id))
                    .collect();
                match sequence.upsert_with_displays(proxy, &displays, &index_value) {
                    Ok(_) => written = true,
                    Err(e) => tracing::warn!("Recording track {} failed: {}", track.postfix, e),
                }
            }
        }

        if written {
            self.begin_modify();
            self.select_last_item(scene);
            self.end_modify();
        }
        Ok(written)
    }

    fn last_master_value(&self, scene: &Scene) -> Option<f64> {
        self.master_sequence()
            .and_then(|master| scene.sequence(master))
            .and_then(|master| master.last_index_value())
            .and_then(parse_index_value)
    }
}
