// SPDX-License-Identifier: MIT OR Apache-2.0
//! Default settings for new browsers.
//!
//! Stored as RON next to the host's other configuration files. Every field
//! has a default, so partial files load fine.

use crate::playback::PlaybackController;
use crate::recording::SamplingMode;
use crate::sync::SynchronizationProperties;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Current settings format version
pub const SETTINGS_FORMAT_VERSION: u32 = 1;

/// Errors raised while loading or saving settings
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Reading or writing the file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid RON for these settings
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// The settings could not be serialized
    #[error("Serialization error: {0}")]
    Serialize(#[from] ron::Error),

    /// The file was written by a newer version
    #[error("Settings version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version found in the file
        found: u32,
        /// Newest supported version
        supported: u32,
    },
}

/// Settings result type
pub type SettingsResult<T> = std::result::Result<T, SettingsError>;

/// Defaults applied to newly created browsers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Settings format version
    pub version: u32,
    /// Playback rate in items per second
    pub playback_rate_fps: f64,
    /// Wrap around at the ends
    pub playback_looped: bool,
    /// Jump over items when ticks arrive late
    pub playback_item_skipping: bool,
    /// Recording sampling gate
    pub recording_sampling_mode: SamplingMode,
    /// Only master proxy modifications trigger snapshots
    pub record_master_only: bool,
    /// Flags given to newly added tracks
    pub default_sync_props: SynchronizationProperties,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_FORMAT_VERSION,
            playback_rate_fps: PlaybackController::DEFAULT_RATE_FPS,
            playback_looped: true,
            playback_item_skipping: true,
            recording_sampling_mode: SamplingMode::All,
            record_master_only: false,
            default_sync_props: SynchronizationProperties::default(),
        }
    }
}

impl BrowserSettings {
    /// Parse settings from a RON string
    pub fn from_ron(content: &str) -> SettingsResult<Self> {
        let settings: BrowserSettings = ron::from_str(content)?;

        if settings.version > SETTINGS_FORMAT_VERSION {
            return Err(SettingsError::UnsupportedVersion {
                found: settings.version,
                supported: SETTINGS_FORMAT_VERSION,
            });
        }
        Ok(settings)
    }

    /// Serialize to a RON string
    pub fn to_ron(&self) -> SettingsResult<String> {
        let config = ron::ser::PrettyConfig::default().struct_names(true);
        Ok(ron::ser::to_string_pretty(self, config)?)
    }

    /// Load settings from a file
    pub fn load(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings = Self::from_ron(&content)?;
        tracing::debug!("Loaded browser settings from {}", path.display());
        Ok(settings)
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> SettingsResult<()> {
        std::fs::write(path, self.to_ron()?)?;
        Ok(())
    }
}
