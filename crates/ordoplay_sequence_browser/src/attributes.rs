// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persisted form of a browser node.
//!
//! The browser is stored as a flat string map so hosts can keep it next to
//! their other node attributes. Track references use the track postfix as key
//! suffix, e.g. `sequenceNodeRef0`, `proxyNodeRef0`.

use crate::browser::BrowserNode;
use crate::playback::PlaybackState;
use crate::proxy::DisplayBinding;
use crate::recording::SamplingMode;
use crate::sync::{SynchronizationProperties, SynchronizationTable};
use indexmap::IndexMap;
use ordoplay_sequences::{ObjectId, Result, SequenceError, SequenceId};
use std::str::FromStr;
use uuid::Uuid;

const PLAYBACK_ACTIVE: &str = "playbackActive";
const PLAYBACK_RATE_FPS: &str = "playbackRateFps";
const PLAYBACK_ITEM_SKIPPING: &str = "playbackItemSkippingEnabled";
const PLAYBACK_LOOPED: &str = "playbackLooped";
const SELECTED_ITEM_NUMBER: &str = "selectedItemNumber";
const RECORDING_ACTIVE: &str = "recordingActive";
const RECORD_MASTER_ONLY: &str = "recordOnMasterModifiedOnly";
const RECORDING_SAMPLING_MODE: &str = "recordingSamplingMode";
const POSTFIXES: &str = "virtualNodePostfixes";
const SEQUENCE_REF: &str = "sequenceNodeRef";
const PROXY_REF: &str = "proxyNodeRef";
const DISPLAYS_REF: &str = "displayNodesRef";
const SYNC_PROPS_REF: &str = "SynchronizationPropertiesRef";

// written by older versions
const OBSOLETE_SEQUENCE_REF: &str = "rootNodeRef";
const OBSOLETE_PROXY_REF: &str = "dataNodeRef";

/// Flat attribute map of a browser node
pub type AttributeMap = IndexMap<String, String>;

impl BrowserNode {
    /// Encode the browser state as attributes
    pub fn write_attributes(&self) -> AttributeMap {
        let mut attributes = AttributeMap::new();
        let mut set = |key: &str, value: String| {
            attributes.insert(key.to_string(), value);
        };

        set(PLAYBACK_ACTIVE, self.playback.is_playing().to_string());
        set(PLAYBACK_RATE_FPS, self.playback.rate_fps.to_string());
        set(PLAYBACK_ITEM_SKIPPING, self.playback.item_skipping.to_string());
        set(PLAYBACK_LOOPED, self.playback.looped.to_string());
        set(SELECTED_ITEM_NUMBER, self.selected_item_number.to_string());
        set(RECORDING_ACTIVE, self.recording.is_active().to_string());
        set(RECORD_MASTER_ONLY, self.recording.record_master_only.to_string());
        set(
            RECORDING_SAMPLING_MODE,
            self.recording.sampling_mode.name().to_string(),
        );
        set(POSTFIXES, self.table.postfixes().join(" "));

        for track in self.table.tracks() {
            let postfix = &track.postfix;
            set(&format!("{SEQUENCE_REF}{postfix}"), track.sequence.to_string());
            if let Some(proxy) = track.proxy {
                set(&format!("{PROXY_REF}{postfix}"), proxy.to_string());
            }
            if !track.displays.is_empty() {
                let displays: Vec<String> = track
                    .displays
                    .iter()
                    .map(|display| display.proxy.to_string())
                    .collect();
                set(&format!("{DISPLAYS_REF}{postfix}"), displays.join(" "));
            }
            set(&format!("{SYNC_PROPS_REF}{postfix}"), track.props.to_attribute());
        }
        attributes
    }

    /// Restore the browser state from attributes.
    ///
    /// Missing keys keep the current value; malformed values are logged and
    /// skipped. Tracks are rebuilt from `virtualNodePostfixes`.
    pub fn read_attributes(&mut self, attributes: &AttributeMap) {
        self.begin_modify();

        if let Some(active) = read_bool(attributes, PLAYBACK_ACTIVE) {
            self.playback.state = if active {
                PlaybackState::Playing
            } else {
                PlaybackState::Stopped
            };
        }
        if let Some(rate) = read_parsed::<f64>(attributes, PLAYBACK_RATE_FPS) {
            if rate.is_finite() && rate >= 0.0 {
                self.playback.rate_fps = rate;
            } else {
                tracing::warn!("Ignoring invalid {}: {}", PLAYBACK_RATE_FPS, rate);
            }
        }
        if let Some(skipping) = read_bool(attributes, PLAYBACK_ITEM_SKIPPING) {
            self.playback.item_skipping = skipping;
        }
        if let Some(looped) = read_bool(attributes, PLAYBACK_LOOPED) {
            self.playback.looped = looped;
        }
        if let Some(item) = read_parsed::<i32>(attributes, SELECTED_ITEM_NUMBER) {
            self.selected_item_number = item.max(-1);
        }
        if let Some(active) = read_bool(attributes, RECORDING_ACTIVE) {
            self.recording.restore(active);
        }
        if let Some(master_only) = read_bool(attributes, RECORD_MASTER_ONLY) {
            self.recording.record_master_only = master_only;
        }
        if let Some(mode) = attributes.get(RECORDING_SAMPLING_MODE) {
            match SamplingMode::from_name(mode) {
                Some(mode) => self.recording.sampling_mode = mode,
                None => tracing::warn!("Unknown {}: {}", RECORDING_SAMPLING_MODE, mode),
            }
        }

        if let Some(postfixes) = attributes.get(POSTFIXES) {
            self.table = read_tracks(attributes, postfixes, &self.table);
        }

        self.touch();
        self.end_modify();
    }
}

fn read_tracks(
    attributes: &AttributeMap,
    postfixes: &str,
    previous: &SynchronizationTable,
) -> SynchronizationTable {
    let mut table = previous.clone();
    table.clear();
    for postfix in postfixes.split_whitespace() {
        let sequence = read_reference::<SequenceId>(attributes, SEQUENCE_REF, postfix)
            .or_else(|| read_reference(attributes, OBSOLETE_SEQUENCE_REF, postfix));
        let Some(sequence) = sequence else {
            tracing::warn!("Track {} has no valid sequence reference, dropped", postfix);
            continue;
        };
        table.insert_restored(postfix.to_string(), sequence);
        let Some(track) = table.track_mut(postfix) else {
            continue;
        };
        track.proxy = read_reference::<ObjectId>(attributes, PROXY_REF, postfix)
            .or_else(|| read_reference(attributes, OBSOLETE_PROXY_REF, postfix));
        if let Some(displays) = attributes.get(&format!("{DISPLAYS_REF}{postfix}")) {
            track.displays = displays
                .split_whitespace()
                .filter_map(|id| parse_logged::<ObjectId>(DISPLAYS_REF, id))
                .map(|proxy| DisplayBinding {
                    proxy,
                    // source unknown until the next refresh rebinds the slot
                    source: ObjectId(Uuid::nil()),
                })
                .collect();
        }
        if let Some(props) = attributes.get(&format!("{SYNC_PROPS_REF}{postfix}")) {
            track.props = SynchronizationProperties::from_attribute(props);
        }
    }
    table
}

fn read_bool(attributes: &AttributeMap, key: &str) -> Option<bool> {
    match attributes.get(key)?.as_str() {
        "true" => Some(true),
        "false" => Some(false),
        other => {
            tracing::warn!("Invalid boolean for {}: {}", key, other);
            None
        }
    }
}

fn read_parsed<T: FromStr>(attributes: &AttributeMap, key: &str) -> Option<T> {
    parse_logged(key, attributes.get(key)?)
}

fn read_reference<T: FromStr>(attributes: &AttributeMap, prefix: &str, postfix: &str) -> Option<T> {
    let key = format!("{prefix}{postfix}");
    parse_logged(&key, attributes.get(&key)?)
}

fn parse_logged<T: FromStr>(key: &str, value: &str) -> Option<T> {
    let parsed = value.trim().parse().ok();
    if parsed.is_none() {
        tracing::warn!("Invalid value for {}: {}", key, value);
    }
    parsed
}

/// Serialize an attribute map to RON
pub fn attributes_to_ron(attributes: &AttributeMap) -> Result<String> {
    ron::ser::to_string_pretty(attributes, ron::ser::PrettyConfig::default())
        .map_err(|e| SequenceError::Serialization(e.to_string()))
}

/// Parse an attribute map from RON
pub fn attributes_from_ron(content: &str) -> Result<AttributeMap> {
    ron::from_str(content).map_err(|e| SequenceError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordoplay_sequences::{IndexedSequence, Record, Scene};

    fn browser_with_tracks() -> (BrowserNode, Scene, Vec<SequenceId>) {
        let mut scene = Scene::new();
        let ids: Vec<SequenceId> = ["A", "B"]
            .iter()
            .map(|name| {
                let mut sequence = IndexedSequence::new(*name);
                sequence
                    .upsert(&Record::generic(*name, "NoteRecord"), "0")
                    .unwrap();
                scene.add_sequence(sequence)
            })
            .collect();
        let mut browser = BrowserNode::new("Browser");
        browser.set_master_sequence(Some(ids[0]), &mut scene);
        browser.add_synchronized_sequence(ids[1]);
        (browser, scene, ids)
    }

    #[test]
    fn test_attribute_keys() {
        let (mut browser, _scene, ids) = browser_with_tracks();
        browser.set_playback_rate_fps(25.0);
        browser.set_recording_sampling_mode(SamplingMode::LimitedToPlaybackFrameRate);

        let attributes = browser.write_attributes();
        assert_eq!(attributes[PLAYBACK_RATE_FPS], "25");
        assert_eq!(attributes[RECORDING_SAMPLING_MODE], "limitedToPlaybackFrameRate");
        assert_eq!(attributes[POSTFIXES], "0 1");
        assert_eq!(attributes["sequenceNodeRef1"], ids[1].to_string());
        assert_eq!(
            attributes["SynchronizationPropertiesRef0"],
            "playback true recording false overwriteProxyName false saveChanges false"
        );
        assert!(!attributes.contains_key("proxyNodeRef0"));
    }

    #[test]
    fn test_restore_browser() {
        let (mut browser, _scene, ids) = browser_with_tracks();
        browser.set_playback_looped(false);
        browser.set_record_master_only(true);
        browser
            .update_sync_props(ids[1], |props| props.recording = true)
            .unwrap();
        let proxy = ObjectId::new();
        browser.set_proxy_for_sequence(ids[1], Some(proxy)).unwrap();

        let mut restored = BrowserNode::new("Restored");
        restored.read_attributes(&browser.write_attributes());

        assert_eq!(restored.synchronized_sequences(true), ids);
        assert!(!restored.is_playback_looped());
        assert!(restored.record_master_only());
        assert!(restored.sync_props(ids[1]).unwrap().recording);
        assert_eq!(restored.proxy_for_sequence(ids[1]), Some(proxy));
        assert_eq!(restored.selected_item_number(), 0);
    }

    #[test]
    fn test_restored_recording_waits_for_first_snapshot() {
        let (browser, _scene, _ids) = browser_with_tracks();
        let mut attributes = browser.write_attributes();
        attributes.insert(RECORDING_ACTIVE.to_string(), "true".to_string());

        let mut restored = BrowserNode::new("Restored");
        restored.read_attributes(&attributes);
        assert!(restored.is_recording_active());
        assert!(restored.recording.is_anchor_pending());
        // stays put until the first snapshot supplies the clock
        assert_eq!(restored.recording_time_offset(), 0.0);

        attributes.insert(RECORDING_ACTIVE.to_string(), "false".to_string());
        restored.read_attributes(&attributes);
        assert!(!restored.is_recording_active());
        assert!(!restored.recording.is_anchor_pending());
    }

    #[test]
    fn test_obsolete_keys_are_migrated() {
        let sequence = SequenceId::new();
        let proxy = ObjectId::new();
        let mut attributes = AttributeMap::new();
        attributes.insert(POSTFIXES.to_string(), "0".to_string());
        attributes.insert("rootNodeRef0".to_string(), sequence.to_string());
        attributes.insert("dataNodeRef0".to_string(), proxy.to_string());

        let mut browser = BrowserNode::new("Browser");
        browser.read_attributes(&attributes);
        assert_eq!(browser.master_sequence(), Some(sequence));
        assert_eq!(browser.proxy_for_sequence(sequence), Some(proxy));
        assert_eq!(browser.write_attributes()["sequenceNodeRef0"], sequence.to_string());
        // restored postfixes are never handed out again
        assert_eq!(browser.add_synchronized_sequence(SequenceId::new()), "1");
    }

    #[test]
    fn test_malformed_values_are_skipped() {
        let mut attributes = AttributeMap::new();
        attributes.insert(PLAYBACK_RATE_FPS.to_string(), "fast".to_string());
        attributes.insert(PLAYBACK_LOOPED.to_string(), "maybe".to_string());
        attributes.insert(POSTFIXES.to_string(), "0".to_string());
        attributes.insert("sequenceNodeRef0".to_string(), "not-an-id".to_string());

        let mut browser = BrowserNode::new("Browser");
        browser.read_attributes(&attributes);
        assert_eq!(browser.playback_rate_fps(), 10.0);
        assert!(browser.is_playback_looped());
        assert!(browser.table().is_empty());
    }

    #[test]
    fn test_ron_round_trip() {
        let (browser, _scene, _ids) = browser_with_tracks();
        let attributes = browser.write_attributes();
        let ron_str = attributes_to_ron(&attributes).unwrap();
        let loaded = attributes_from_ron(&ron_str).unwrap();
        assert_eq!(loaded, attributes);
        assert!(attributes_from_ron("{ unclosed").is_err());
    }
}
