// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scene-level driver for all browsers.
//!
//! [`SequenceBrowserLogic`] owns the scene and the browsers, advances playing
//! browsers on [`tick`](SequenceBrowserLogic::tick) and routes notifications:
//! browser and sequence modifications refresh proxies from sequences, proxy
//! modifications are written back into sequences (recording or save-changes).
//! Every event is also queued for the host, up to [`MAX_QUEUED_EVENTS`]
//! between two [`take_events`](SequenceBrowserLogic::take_events) calls.

use crate::browser::{BrowserEvent, BrowserId, BrowserNode};
use crate::proxy::{ProxyManager, RefreshOutcome};
use crate::settings::BrowserSettings;
use indexmap::IndexMap;
use ordoplay_sequences::{
    CopierRegistry, IndexedSequence, ObjectId, RegistryEvent, Result, Scene, SequenceError,
    SequenceId,
};
use std::collections::{HashMap, HashSet, VecDeque};

/// Upper bound on event rounds handled by one `process_events` call
const MAX_EVENT_ROUNDS: usize = 64;

/// Host notifications kept until [`SequenceBrowserLogic::take_events`]; the
/// oldest are dropped beyond this
pub const MAX_QUEUED_EVENTS: usize = 4096;

/// Notification forwarded to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneEvent {
    /// Registry notification
    Registry(RegistryEvent),
    /// Browser notification
    Browser(BrowserEvent),
    /// Entries or index metadata of a sequence changed
    SequenceModified(SequenceId),
}

/// Owns the scene and drives every browser in it
#[derive(Debug, Default)]
pub struct SequenceBrowserLogic {
    scene: Option<Scene>,
    browsers: IndexMap<BrowserId, BrowserNode>,
    copiers: CopierRegistry,
    settings: BrowserSettings,
    last_tick: HashMap<BrowserId, f64>,
    updating: HashSet<BrowserId>,
    events: VecDeque<SceneEvent>,
    dropped_events: usize,
}

impl SequenceBrowserLogic {
    /// Create a logic without a scene, using the default copiers
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a logic using `copiers` for proxy updates
    pub fn with_copiers(copiers: CopierRegistry) -> Self {
        Self {
            copiers,
            ..Self::default()
        }
    }

    /// Content copiers
    pub fn copiers(&self) -> &CopierRegistry {
        &self.copiers
    }

    /// Mutable content copiers, e.g. to register a copier for a custom class
    pub fn copiers_mut(&mut self) -> &mut CopierRegistry {
        &mut self.copiers
    }

    /// Settings applied to browsers created by [`Self::create_browser`]
    pub fn settings(&self) -> &BrowserSettings {
        &self.settings
    }

    /// Replace the settings used for new browsers
    pub fn set_settings(&mut self, settings: BrowserSettings) {
        self.settings = settings;
    }

    /// Attach a scene, returning the previous one.
    ///
    /// Browser cursors beyond their master's item count are clamped to the
    /// last item.
    pub fn set_scene(&mut self, scene: Scene) -> Option<Scene> {
        self.last_tick.clear();
        for browser in self.browsers.values_mut() {
            browser.validate_cursor(&scene);
        }
        self.scene.replace(scene)
    }

    /// Detach the scene
    pub fn take_scene(&mut self) -> Option<Scene> {
        self.last_tick.clear();
        self.scene.take()
    }

    /// Attached scene
    pub fn scene(&self) -> Option<&Scene> {
        self.scene.as_ref()
    }

    /// Mutable attached scene
    pub fn scene_mut(&mut self) -> Option<&mut Scene> {
        self.scene.as_mut()
    }

    fn scene_or_err(&mut self) -> Result<&mut Scene> {
        self.scene.as_mut().ok_or(SequenceError::RegistryUnavailable)
    }

    /// Add a sequence to the scene
    pub fn add_sequence(&mut self, sequence: IndexedSequence) -> Result<SequenceId> {
        Ok(self.scene_or_err()?.add_sequence(sequence))
    }

    // ---- Browsers ----

    /// Add a browser
    pub fn add_browser(&mut self, browser: BrowserNode) -> BrowserId {
        let id = browser.id();
        self.browsers.insert(id, browser);
        id
    }

    /// Create a browser configured from the current settings
    pub fn create_browser(&mut self, name: impl Into<String>) -> BrowserId {
        let browser = BrowserNode::with_settings(name, &self.settings);
        self.add_browser(browser)
    }

    /// Remove a browser together with its proxies
    pub fn remove_browser(&mut self, id: BrowserId) -> Option<BrowserNode> {
        let mut browser = self.browsers.shift_remove(&id)?;
        self.last_tick.remove(&id);
        if let Some(scene) = self.scene.as_mut() {
            browser.remove_all_proxies(scene);
        }
        Some(browser)
    }

    /// Browser by ID
    pub fn browser(&self, id: BrowserId) -> Option<&BrowserNode> {
        self.browsers.get(&id)
    }

    /// Mutable browser by ID
    pub fn browser_mut(&mut self, id: BrowserId) -> Option<&mut BrowserNode> {
        self.browsers.get_mut(&id)
    }

    /// All browsers
    pub fn browsers(&self) -> impl Iterator<Item = &BrowserNode> {
        self.browsers.values()
    }

    /// Browsers tracking `sequence` (as master or satellite)
    pub fn browsers_for_sequence(&self, sequence: SequenceId) -> Vec<BrowserId> {
        self.browsers
            .values()
            .filter(|browser| browser.is_synchronized_sequence(sequence, true))
            .map(BrowserNode::id)
            .collect()
    }

    /// First browser tracking `sequence`
    pub fn first_browser_for_sequence(&self, sequence: SequenceId) -> Option<BrowserId> {
        self.browsers
            .values()
            .find(|browser| browser.is_synchronized_sequence(sequence, true))
            .map(BrowserNode::id)
    }

    /// Browser owning `proxy`
    pub fn browser_for_proxy(&self, proxy: ObjectId) -> Option<BrowserId> {
        self.browsers
            .values()
            .find(|browser| browser.is_proxy(proxy))
            .map(BrowserNode::id)
    }

    /// Sequences that can be browsed together with `master`
    pub fn compatible_sequences(&self, master: SequenceId) -> Vec<SequenceId> {
        self.scene
            .as_ref()
            .map(|scene| scene.compatible_sequences(master))
            .unwrap_or_default()
    }

    /// Whether `sequence` can be browsed together with `master`
    pub fn is_compatible_for_browsing(&self, master: SequenceId, sequence: SequenceId) -> bool {
        let Some(scene) = self.scene.as_ref() else {
            return false;
        };
        match (scene.sequence(master), scene.sequence(sequence)) {
            (Some(master), Some(sequence)) => master.is_compatible_for_browsing(sequence),
            _ => false,
        }
    }

    fn browser_or_err(
        browsers: &mut IndexMap<BrowserId, BrowserNode>,
        id: BrowserId,
    ) -> Result<&mut BrowserNode> {
        browsers
            .get_mut(&id)
            .ok_or_else(|| SequenceError::not_found(format!("browser {id}")))
    }

    // ---- Track management ----

    /// Make `sequence` the master of `browser`
    pub fn set_master_sequence(&mut self, browser: BrowserId, sequence: Option<SequenceId>) -> Result<()> {
        let scene = self.scene.as_mut().ok_or(SequenceError::RegistryUnavailable)?;
        Self::browser_or_err(&mut self.browsers, browser)?.set_master_sequence(sequence, scene);
        Ok(())
    }

    /// Track `sequence` in `browser`
    pub fn add_synchronized_sequence(&mut self, browser: BrowserId, sequence: SequenceId) -> Result<String> {
        Ok(Self::browser_or_err(&mut self.browsers, browser)?.add_synchronized_sequence(sequence))
    }

    /// Stop tracking `sequence` in `browser`
    pub fn remove_synchronized_sequence(&mut self, browser: BrowserId, sequence: SequenceId) -> Result<bool> {
        let scene = self.scene.as_mut().ok_or(SequenceError::RegistryUnavailable)?;
        Ok(Self::browser_or_err(&mut self.browsers, browser)?.remove_synchronized_sequence(sequence, scene))
    }

    /// Start or stop playback of `browser`
    pub fn set_playback_active(&mut self, browser: BrowserId, active: bool) -> Result<()> {
        Self::browser_or_err(&mut self.browsers, browser)?.set_playback_active(active);
        Ok(())
    }

    /// Start or stop recording in `browser` at time `now`
    pub fn set_recording_active(&mut self, browser: BrowserId, active: bool, now: f64) -> Result<()> {
        let scene = self.scene.as_ref().ok_or(SequenceError::RegistryUnavailable)?;
        let node = self
            .browsers
            .get_mut(&browser)
            .ok_or_else(|| SequenceError::not_found(format!("browser {browser}")))?;
        node.set_recording_active(active, now, scene);
        Ok(())
    }

    /// Select an item of `browser`'s master
    pub fn set_selected_item_number(&mut self, browser: BrowserId, item: i32) -> Result<i32> {
        let scene = self.scene.as_ref().ok_or(SequenceError::RegistryUnavailable)?;
        let node = self
            .browsers
            .get_mut(&browser)
            .ok_or_else(|| SequenceError::not_found(format!("browser {browser}")))?;
        Ok(node.set_selected_item_number(item, scene))
    }

    /// Synchronize a sequence, creating it if needed, and optionally use an
    /// existing record as its proxy.
    ///
    /// Playback and recording are stopped first. Without `sequence` a new
    /// empty sequence named `"<proxy name>-Sequence"` is created with the
    /// master's index settings. The sequence must be compatible with the
    /// master.
    pub fn add_synchronized_node(
        &mut self,
        browser: BrowserId,
        sequence: Option<SequenceId>,
        proxy: Option<ObjectId>,
    ) -> Result<SequenceId> {
        let scene = self.scene.as_mut().ok_or(SequenceError::RegistryUnavailable)?;
        let node = Self::browser_or_err(&mut self.browsers, browser)?;

        node.begin_modify();
        let result = Self::synchronize_node(node, scene, sequence, proxy);
        node.end_modify();
        result
    }

    fn synchronize_node(
        node: &mut BrowserNode,
        scene: &mut Scene,
        sequence: Option<SequenceId>,
        proxy: Option<ObjectId>,
    ) -> Result<SequenceId> {
        node.set_playback_active(false);
        node.set_recording_active(false, 0.0, scene);

        if let Some(proxy) = proxy {
            if !scene.registry.contains(proxy) {
                return Err(SequenceError::not_found(format!("proxy record {proxy}")));
            }
        }

        let master = node
            .master_sequence()
            .and_then(|master| scene.sequence(master).map(|sequence| (master, sequence)));
        let sequence = match sequence {
            Some(id) => {
                if scene.sequence(id).is_none() {
                    return Err(SequenceError::not_found(format!("sequence {id}")));
                }
                id
            }
            None => {
                let name = proxy
                    .and_then(|id| scene.registry.get(id))
                    .map_or_else(|| "Sequence".to_string(), |record| format!("{}-Sequence", record.name()));
                let mut created = IndexedSequence::new(name);
                if let Some((_, master)) = master {
                    created.set_index_name(master.index_name());
                    created.set_index_unit(master.index_unit());
                    created.set_index_type(master.index_type());
                }
                scene.add_sequence(created)
            }
        };

        let master = node.master_sequence();
        match master {
            None => node.set_master_sequence(Some(sequence), scene),
            Some(master) if master == sequence => {}
            Some(master) => {
                let compatible = match (scene.sequence(master), scene.sequence(sequence)) {
                    (Some(master), Some(candidate)) => master.is_compatible_for_browsing(candidate),
                    _ => false,
                };
                if !compatible {
                    return Err(SequenceError::invalid(format!(
                        "sequence {sequence} is not compatible with master {master}"
                    )));
                }
                if let Err(SequenceError::AlreadyTracked(postfix)) =
                    node.try_add_synchronized_sequence(sequence)
                {
                    tracing::debug!("Sequence {} already tracked as {}", sequence, postfix);
                }
            }
        }

        if let Some(proxy) = proxy {
            node.set_proxy_for_sequence(sequence, Some(proxy))?;
        }
        Ok(sequence)
    }

    // ---- Tick and event routing ----

    /// Advance playing browsers to time `now` (seconds) and process the
    /// resulting notifications
    pub fn tick(&mut self, now: f64) {
        self.update_all_proxy_nodes(now);
        self.process_events(now);
    }

    fn update_all_proxy_nodes(&mut self, now: f64) {
        let Some(scene) = self.scene.as_ref() else {
            return;
        };
        for (id, browser) in self.browsers.iter_mut() {
            if !browser.is_playback_active() {
                self.last_tick.remove(id);
                continue;
            }
            let Some(last) = self.last_tick.get(id).copied() else {
                // first tick since playback started
                self.last_tick.insert(*id, now);
                continue;
            };
            let increment = browser.playback.increment_for(now - last);
            if increment == 0 {
                continue;
            }
            self.last_tick.insert(*id, now);
            tracing::trace!("Browser {}: advancing {} items", browser.name, increment);
            browser.select_next_item(increment, scene);
        }
    }

    /// Route queued registry and browser notifications until none are left
    pub fn process_events(&mut self, now: f64) {
        for _ in 0..MAX_EVENT_ROUNDS {
            if !self.dispatch_pending(now) {
                return;
            }
        }
        tracing::warn!(
            "Event processing did not settle after {} rounds",
            MAX_EVENT_ROUNDS
        );
    }

    /// Handle one batch of queued notifications; returns whether there was any
    fn dispatch_pending(&mut self, now: f64) -> bool {
        let mut pending = Vec::new();
        if let Some(scene) = self.scene.as_mut() {
            pending.extend(scene.registry.take_events().into_iter().map(SceneEvent::Registry));
            pending.extend(
                scene
                    .take_modified_sequences()
                    .into_iter()
                    .map(SceneEvent::SequenceModified),
            );
        }
        for browser in self.browsers.values_mut() {
            pending.extend(browser.take_events().into_iter().map(SceneEvent::Browser));
        }
        if pending.is_empty() {
            return false;
        }
        for event in pending {
            self.handle_event(event, now);
        }
        true
    }

    fn handle_event(&mut self, event: SceneEvent, now: f64) {
        match event {
            SceneEvent::Browser(BrowserEvent::Modified(browser)) => {
                self.update_proxy_nodes_from_sequences(browser, now);
            }
            SceneEvent::SequenceModified(sequence) => {
                for browser in self.browsers_for_sequence(sequence) {
                    if let (Some(scene), Some(node)) =
                        (self.scene.as_ref(), self.browsers.get_mut(&browser))
                    {
                        node.validate_cursor(scene);
                    }
                    self.update_proxy_nodes_from_sequences(browser, now);
                }
            }
            SceneEvent::Registry(RegistryEvent::ObjectModified(record)) => {
                let owners: Vec<BrowserId> = self
                    .browsers
                    .values()
                    .filter(|browser| browser.is_proxy(record))
                    .map(BrowserNode::id)
                    .collect();
                for browser in owners {
                    self.queue_event(SceneEvent::Browser(BrowserEvent::ProxyModified {
                        browser,
                        proxy: record,
                    }));
                    self.update_sequences_from_proxy_nodes(browser, record, now);
                }
            }
            SceneEvent::Registry(RegistryEvent::ObjectRemoved(record)) => {
                for browser in self.browsers.values_mut() {
                    browser.forget_proxy(record);
                }
            }
            SceneEvent::Browser(BrowserEvent::ProxyModified { .. })
            | SceneEvent::Registry(RegistryEvent::ObjectAdded(_)) => {}
        }
        self.queue_event(event);
    }

    fn queue_event(&mut self, event: SceneEvent) {
        if self.events.len() >= MAX_QUEUED_EVENTS {
            if self.dropped_events == 0 {
                tracing::warn!(
                    "More than {} host notifications queued, dropping the oldest",
                    MAX_QUEUED_EVENTS
                );
            }
            self.events.pop_front();
            self.dropped_events += 1;
        }
        self.events.push_back(event);
    }

    /// Mirror the items at `browser`'s cursor into its proxies.
    ///
    /// Suspended while the browser records. Proxy modifications caused by the
    /// refresh are routed before the browser leaves its update, so they are
    /// not written back into the sequences.
    pub fn update_proxy_nodes_from_sequences(&mut self, browser: BrowserId, now: f64) {
        if self.updating.contains(&browser) {
            tracing::trace!("Browser {} is already updating", browser);
            return;
        }
        let Some(scene) = self.scene.as_mut() else {
            return;
        };
        let Some(node) = self.browsers.get_mut(&browser) else {
            tracing::warn!("Unknown browser {}", browser);
            return;
        };
        if node.is_recording_active() {
            return;
        }

        self.updating.insert(browser);
        Self::refresh_proxies(node, scene, &self.copiers);
        self.dispatch_pending(now);
        self.updating.remove(&browser);
    }

    fn refresh_proxies(node: &mut BrowserNode, scene: &mut Scene, copiers: &CopierRegistry) {
        if node.master_sequence().is_none() {
            node.remove_all_proxies(scene);
            return;
        }
        node.validate_cursor(scene);
        let Some(index_value) = node.selected_index_value(scene) else {
            return;
        };

        let Scene { registry, sequences, .. } = scene;
        let mut open_brackets = Vec::new();
        let mut proxies_changed = false;
        for postfix in node.table.postfixes() {
            let Some(track) = node.table.track_mut(&postfix) else {
                continue;
            };
            let Some(sequence) = sequences.get_mut(&track.sequence) else {
                tracing::warn!(
                    "Browser {}: sequence {} of track {} is missing",
                    node.name,
                    track.sequence,
                    postfix
                );
                continue;
            };
            match ProxyManager::refresh(track, sequence, &index_value, registry, copiers) {
                Ok(RefreshOutcome::Updated { proxy, created }) => {
                    proxies_changed |= created;
                    open_brackets.push(proxy);
                }
                Ok(RefreshOutcome::Skipped) => {}
                Err(e) => tracing::warn!(
                    "Browser {}: refreshing track {} failed: {}",
                    node.name,
                    postfix,
                    e
                ),
            }
        }

        // all proxies of the browser announce their new state together
        for proxy in open_brackets {
            if let Err(e) = registry.end_change(proxy) {
                tracing::warn!("Closing change of proxy {} failed: {}", proxy, e);
            }
        }
        if proxies_changed {
            node.touch();
        }
    }

    /// Write a modified proxy back into its sequence.
    ///
    /// Suspended while the browser plays. While recording, a snapshot of all
    /// recording tracks is taken (master proxy only when
    /// `record_master_only` is set); otherwise the proxy is copied into the
    /// item at the cursor when its track has `save_changes`.
    pub fn update_sequences_from_proxy_nodes(&mut self, browser: BrowserId, proxy: ObjectId, now: f64) {
        if self.updating.contains(&browser) {
            return;
        }
        let Some(node) = self.browsers.get(&browser) else {
            tracing::warn!("Unknown browser {}", browser);
            return;
        };
        if node.is_playback_active() {
            return;
        }

        if node.is_recording_active() {
            let is_master = node.table.master().and_then(|track| track.proxy) == Some(proxy);
            if !node.recording.accepts_modification(is_master) {
                return;
            }
            if let Err(e) = self.save_proxy_nodes_state(browser, now) {
                tracing::warn!("Browser {}: recording failed: {}", browser, e);
            }
            return;
        }

        let Some(scene) = self.scene.as_mut() else {
            return;
        };
        let Some(track) = node
            .table
            .postfix_of_proxy(proxy)
            .and_then(|postfix| node.table.track(postfix))
        else {
            return;
        };
        if !track.props.save_changes {
            return;
        }
        let Some(index_value) = node.selected_index_value(scene) else {
            return;
        };
        let Scene { registry, sequences, .. } = scene;
        let Some(record) = registry.get(proxy) else {
            return;
        };
        let Some(sequence) = sequences.get_mut(&track.sequence) else {
            tracing::warn!("Sequence {} of proxy {} is missing", track.sequence, proxy);
            return;
        };
        if let Err(e) = sequence.update_record_at_value(record, &index_value, &self.copiers) {
            tracing::warn!(
                "Saving proxy {} into {} at {} failed: {}",
                proxy,
                sequence.name,
                index_value,
                e
            );
        }
    }

    /// Snapshot the proxies of `browser`'s recording tracks; see
    /// [`BrowserNode::save_proxy_nodes_state`]
    pub fn save_proxy_nodes_state(&mut self, browser: BrowserId, now: f64) -> Result<bool> {
        let scene = self.scene.as_mut().ok_or(SequenceError::RegistryUnavailable)?;
        let node = self
            .browsers
            .get_mut(&browser)
            .ok_or_else(|| SequenceError::not_found(format!("browser {browser}")))?;
        if !self.updating.insert(browser) {
            return Ok(false);
        }
        let saved = node.save_proxy_nodes_state(now, scene);
        self.updating.remove(&browser);
        saved
    }

    /// Take notifications forwarded to the host
    pub fn take_events(&mut self) -> Vec<SceneEvent> {
        if self.dropped_events > 0 {
            tracing::debug!("{} host notifications were dropped", self.dropped_events);
            self.dropped_events = 0;
        }
        self.events.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordoplay_sequences::{Record, RecordContent};

    fn notes(name: &str, count: usize) -> IndexedSequence {
        let mut sequence = IndexedSequence::new(name);
        for i in 0..count {
            let record = Record::generic(format!("{name}{i}"), "NoteRecord")
                .with_field("text", serde_json::json!(format!("{name}{i}")));
            sequence.upsert(&record, &i.to_string()).unwrap();
        }
        sequence
    }

    fn text_of(record: &Record) -> String {
        match record.content() {
            RecordContent::Generic(content) => content.fields["text"].as_str().unwrap_or_default().to_string(),
            other => panic!("unexpected content {:?}", other.kind()),
        }
    }

    fn logic_with_browser(count: usize) -> (SequenceBrowserLogic, BrowserId, SequenceId) {
        let mut logic = SequenceBrowserLogic::new();
        logic.set_scene(Scene::new());
        let sequence = logic.add_sequence(notes("Notes", count)).unwrap();
        let browser = logic.create_browser("Browser");
        logic.set_master_sequence(browser, Some(sequence)).unwrap();
        logic.process_events(0.0);
        (logic, browser, sequence)
    }

    #[test]
    fn test_requires_scene() {
        let mut logic = SequenceBrowserLogic::new();
        assert_eq!(
            logic.add_sequence(IndexedSequence::new("S")),
            Err(SequenceError::RegistryUnavailable)
        );
        let browser = logic.create_browser("Browser");
        assert!(logic.add_synchronized_node(browser, None, None).is_err());
    }

    #[test]
    fn test_master_change_creates_proxy() {
        let (logic, browser, sequence) = logic_with_browser(3);
        let node = logic.browser(browser).unwrap();
        let proxy = node.proxy_for_sequence(sequence).unwrap();
        let scene = logic.scene().unwrap();
        assert_eq!(scene.registry.get(proxy).unwrap().name(), "Notes [time=0s]");
        assert_eq!(logic.browser_for_proxy(proxy), Some(browser));
    }

    #[test]
    fn test_first_tick_only_records_time() {
        let (mut logic, browser, _) = logic_with_browser(5);
        logic.set_playback_active(browser, true).unwrap();

        logic.tick(10.0);
        assert_eq!(logic.browser(browser).unwrap().selected_item_number(), 0);
        logic.tick(10.05);
        assert_eq!(logic.browser(browser).unwrap().selected_item_number(), 0);
        logic.tick(10.25);
        assert_eq!(logic.browser(browser).unwrap().selected_item_number(), 2);
    }

    #[test]
    fn test_stopped_browser_loses_clock() {
        let (mut logic, browser, _) = logic_with_browser(5);
        logic.set_playback_active(browser, true).unwrap();
        logic.tick(0.0);
        logic.set_playback_active(browser, false).unwrap();
        logic.tick(1.0);
        logic.set_playback_active(browser, true).unwrap();
        // restarting begins a new clock instead of jumping 20 items
        logic.tick(3.0);
        assert_eq!(logic.browser(browser).unwrap().selected_item_number(), 0);
    }

    #[test]
    fn test_refresh_notifies_host_once_per_proxy() {
        let (mut logic, browser, sequence) = logic_with_browser(3);
        let proxy = logic.browser(browser).unwrap().proxy_for_sequence(sequence).unwrap();
        logic.take_events();

        logic.set_selected_item_number(browser, 2).unwrap();
        logic.process_events(0.0);
        let events = logic.take_events();
        let modified = events
            .iter()
            .filter(|event| **event == SceneEvent::Registry(RegistryEvent::ObjectModified(proxy)))
            .count();
        assert_eq!(modified, 1);
        assert!(events.contains(&SceneEvent::Browser(BrowserEvent::Modified(browser))));
        assert_eq!(text_of(logic.scene().unwrap().registry.get(proxy).unwrap()), "Notes2");
    }

    #[test]
    fn test_save_changes_writes_proxy_edits() {
        let (mut logic, browser, sequence) = logic_with_browser(3);
        logic
            .browser_mut(browser)
            .unwrap()
            .update_sync_props(sequence, |props| props.save_changes = true)
            .unwrap();
        let proxy = logic.browser(browser).unwrap().proxy_for_sequence(sequence).unwrap();

        let edited = Record::generic("edit", "NoteRecord").with_field("text", serde_json::json!("edited"));
        let copiers = CopierRegistry::with_defaults();
        logic
            .scene_mut()
            .unwrap()
            .registry
            .modify(proxy, |record| copiers.copy(&edited, record))
            .unwrap()
            .unwrap();
        logic.process_events(1.0);

        let scene = logic.scene().unwrap();
        let stored = scene.sequence(sequence).unwrap().get("0").unwrap();
        assert_eq!(text_of(stored), "edited");
        assert!(logic.take_events().iter().any(|event| matches!(
            event,
            SceneEvent::Browser(BrowserEvent::ProxyModified { proxy: p, .. }) if *p == proxy
        )));
    }

    #[test]
    fn test_refresh_is_not_written_back() {
        let (mut logic, browser, sequence) = logic_with_browser(3);
        logic
            .browser_mut(browser)
            .unwrap()
            .update_sync_props(sequence, |props| {
                props.save_changes = true;
                props.recording = true;
            })
            .unwrap();
        logic.process_events(0.5);
        let revision = logic.scene().unwrap().sequence(sequence).unwrap().revision();
        let proxy = logic.browser(browser).unwrap().proxy_for_sequence(sequence).unwrap();

        for item in [2, 1, 0, 2] {
            logic.set_selected_item_number(browser, item).unwrap();
            logic.process_events(1.0 + f64::from(item));
        }

        let scene = logic.scene().unwrap();
        let stored = scene.sequence(sequence).unwrap();
        assert_eq!(stored.revision(), revision);
        assert_eq!(stored.count(), 3);
        let texts: Vec<String> = (0..3).map(|i| text_of(stored.get_nth(i).unwrap())).collect();
        assert_eq!(texts, ["Notes0", "Notes1", "Notes2"]);
        assert_eq!(text_of(scene.registry.get(proxy).unwrap()), "Notes2");
        assert!(!logic.browser(browser).unwrap().is_recording_active());
    }

    #[test]
    fn test_sequence_edit_refreshes_proxy() {
        let (mut logic, browser, sequence) = logic_with_browser(3);
        let proxy = logic.browser(browser).unwrap().proxy_for_sequence(sequence).unwrap();
        logic.take_events();

        let replacement = Record::generic("Z", "NoteRecord").with_field("text", serde_json::json!("replaced"));
        logic
            .scene_mut()
            .unwrap()
            .sequence_mut(sequence)
            .unwrap()
            .upsert(&replacement, "0")
            .unwrap();
        logic.process_events(1.0);

        assert_eq!(text_of(logic.scene().unwrap().registry.get(proxy).unwrap()), "replaced");
        let events = logic.take_events();
        assert!(events.contains(&SceneEvent::SequenceModified(sequence)));
        assert!(events.contains(&SceneEvent::Registry(RegistryEvent::ObjectModified(proxy))));
    }

    #[test]
    fn test_set_scene_clamps_restored_cursor() {
        let (mut logic, browser, _) = logic_with_browser(3);
        let mut attributes = logic.browser(browser).unwrap().write_attributes();
        attributes.insert("selectedItemNumber".to_string(), "9".to_string());
        let scene = logic.take_scene().unwrap();

        let mut restored = BrowserNode::new("Restored");
        restored.read_attributes(&attributes);
        assert_eq!(restored.selected_item_number(), 9);
        let restored = logic.add_browser(restored);

        logic.set_scene(scene);
        assert_eq!(logic.browser(restored).unwrap().selected_item_number(), 2);
        assert_eq!(logic.browser(browser).unwrap().selected_item_number(), 0);
    }

    #[test]
    fn test_host_queue_keeps_newest_events() {
        let mut logic = SequenceBrowserLogic::new();
        let ids: Vec<SequenceId> = (0..MAX_QUEUED_EVENTS + 10).map(|_| SequenceId::new()).collect();
        for id in &ids {
            logic.queue_event(SceneEvent::SequenceModified(*id));
        }

        let events = logic.take_events();
        assert_eq!(events.len(), MAX_QUEUED_EVENTS);
        assert_eq!(events[0], SceneEvent::SequenceModified(ids[10]));
        assert_eq!(events.last(), Some(&SceneEvent::SequenceModified(ids[ids.len() - 1])));

        logic.queue_event(SceneEvent::SequenceModified(ids[0]));
        assert_eq!(logic.take_events().len(), 1);
    }

    #[test]
    fn test_removed_proxy_is_forgotten_and_recreated() {
        let (mut logic, browser, sequence) = logic_with_browser(3);
        let proxy = logic.browser(browser).unwrap().proxy_for_sequence(sequence).unwrap();
        logic.scene_mut().unwrap().registry.remove(proxy);
        logic.process_events(0.0);

        let recreated = logic.browser(browser).unwrap().proxy_for_sequence(sequence);
        assert!(recreated.is_some());
        assert_ne!(recreated, Some(proxy));
    }

    #[test]
    fn test_add_synchronized_node_creates_sequence() {
        let (mut logic, browser, master) = logic_with_browser(3);
        let record = Record::generic("Marker", "NoteRecord");
        let proxy = logic.scene_mut().unwrap().registry.add(record);

        let created = logic.add_synchronized_node(browser, None, Some(proxy)).unwrap();
        let scene = logic.scene().unwrap();
        let sequence = scene.sequence(created).unwrap();
        assert_eq!(sequence.name, "Marker-Sequence");
        assert!(sequence.is_empty());
        assert!(scene.sequence(master).unwrap().is_compatible_for_browsing(sequence));

        let node = logic.browser(browser).unwrap();
        assert_eq!(node.proxy_for_sequence(created), Some(proxy));
        assert_eq!(node.sequence_for_proxy(proxy), Some(created));
    }

    #[test]
    fn test_add_synchronized_node_rejects_incompatible() {
        let (mut logic, browser, _) = logic_with_browser(3);
        let frames = IndexedSequence::new("Frames").with_index("frame", "", ordoplay_sequences::IndexType::Numeric);
        let frames = logic.add_sequence(frames).unwrap();
        let result = logic.add_synchronized_node(browser, Some(frames), None);
        assert!(matches!(result, Err(SequenceError::InvalidArgument(_))));
        assert!(!logic.browser(browser).unwrap().is_synchronized_sequence(frames, true));
    }

    #[test]
    fn test_browsers_for_sequence() {
        let (mut logic, first, sequence) = logic_with_browser(3);
        let second = logic.create_browser("Second");
        logic.set_master_sequence(second, Some(sequence)).unwrap();

        assert_eq!(logic.browsers_for_sequence(sequence), vec![first, second]);
        assert_eq!(logic.first_browser_for_sequence(sequence), Some(first));
        assert!(logic.browsers_for_sequence(SequenceId::new()).is_empty());
    }

    #[test]
    fn test_remove_browser_removes_proxies() {
        let (mut logic, browser, _) = logic_with_browser(3);
        assert_eq!(logic.scene().unwrap().registry.len(), 1);
        assert!(logic.remove_browser(browser).is_some());
        assert!(logic.scene().unwrap().registry.is_empty());
    }
}
