// SPDX-License-Identifier: MIT OR Apache-2.0
//! Synchronized browsing, playback and recording of indexed sequences.
//!
//! This crate drives the sequences of `ordoplay_sequences`:
//! - A master sequence plus synchronized sequences share one cursor
//! - Each track mirrors the item at the cursor into a live proxy record
//! - Playback advances the cursor on host ticks (looping, item skipping)
//! - Recording snapshots proxies back into their sequences
//!
//! ## Architecture
//!
//! [`BrowserNode`] holds per-browser state and refers to records and
//! sequences by id. [`SequenceBrowserLogic`] owns the scene and the browsers,
//! advances them on [`SequenceBrowserLogic::tick`] and routes registry and
//! browser notifications between them.

pub mod attributes;
pub mod browser;
pub mod logic;
pub mod playback;
pub mod proxy;
pub mod recording;
pub mod settings;
pub mod sync;

pub use attributes::{attributes_from_ron, attributes_to_ron, AttributeMap};
pub use browser::{BrowserEvent, BrowserId, BrowserNode};
pub use logic::{SceneEvent, SequenceBrowserLogic, MAX_QUEUED_EVENTS};
pub use playback::{PlaybackController, PlaybackState};
pub use proxy::{DisplayBinding, ProxyManager, RefreshOutcome};
pub use recording::{RecordingController, RecordingState, SamplingMode};
pub use settings::{BrowserSettings, SettingsError, SettingsResult, SETTINGS_FORMAT_VERSION};
pub use sync::{SynchronizationProperties, SynchronizationTable, Track};
