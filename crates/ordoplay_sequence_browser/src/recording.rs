// SPDX-License-Identifier: MIT OR Apache-2.0
//! Recording state machine and sampling gate.

use serde::{Deserialize, Serialize};

/// Recording state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecordingState {
    /// Not recording
    #[default]
    Idle,
    /// Proxy changes are written into the recorded tracks
    Active,
}

/// Which proxy snapshots are kept while recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SamplingMode {
    /// Every snapshot
    #[default]
    All,
    /// At most one snapshot per playback frame period
    LimitedToPlaybackFrameRate,
}

impl SamplingMode {
    /// Persisted name
    pub fn name(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::LimitedToPlaybackFrameRate => "limitedToPlaybackFrameRate",
        }
    }

    /// Parse a persisted name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "all" => Some(Self::All),
            "limitedToPlaybackFrameRate" => Some(Self::LimitedToPlaybackFrameRate),
            _ => None,
        }
    }
}

/// Recording controller for a browser
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingController {
    /// Recording state
    pub state: RecordingState,
    /// Only modifications of the master proxy trigger a snapshot
    pub record_master_only: bool,
    /// Sampling gate
    pub sampling_mode: SamplingMode,
    time_offset: f64,
    last_save_time: f64,
    anchor_pending: bool,
}

impl RecordingController {
    /// Create an idle controller
    pub fn new() -> Self {
        Self {
            state: RecordingState::Idle,
            record_master_only: false,
            sampling_mode: SamplingMode::All,
            time_offset: 0.0,
            last_save_time: 0.0,
            anchor_pending: false,
        }
    }

    /// Start or stop recording; returns whether the state changed.
    ///
    /// Starting makes recorded timestamps continue after
    /// `last_master_value`, the last index value of the master in seconds.
    pub fn set_active(&mut self, active: bool, now: f64, last_master_value: f64) -> bool {
        let state = if active {
            RecordingState::Active
        } else {
            RecordingState::Idle
        };
        if self.state == state {
            return false;
        }
        if active {
            self.time_offset = now - last_master_value;
            self.last_save_time = now;
        }
        self.anchor_pending = false;
        self.state = state;
        true
    }

    /// Restore a persisted recording state.
    ///
    /// Wall-clock time is unknown at restore, so an active recording is
    /// anchored by its first snapshot: that snapshot lands one frame period
    /// after the master's last value and later ones follow wall-clock time
    /// from there.
    pub fn restore(&mut self, active: bool) {
        self.state = if active {
            RecordingState::Active
        } else {
            RecordingState::Idle
        };
        self.time_offset = 0.0;
        self.last_save_time = 0.0;
        self.anchor_pending = active;
    }

    /// Whether the timeline of a restored recording is still unanchored
    pub fn is_anchor_pending(&self) -> bool {
        self.anchor_pending
    }

    /// Is currently recording
    pub fn is_active(&self) -> bool {
        self.state == RecordingState::Active
    }

    /// Difference between wall-clock time and recorded index values
    pub fn time_offset(&self) -> f64 {
        self.time_offset
    }

    /// Time of the last continuous snapshot
    pub fn last_save_time(&self) -> f64 {
        self.last_save_time
    }

    /// Whether a proxy modification should trigger a snapshot
    pub fn accepts_modification(&self, proxy_is_master: bool) -> bool {
        !self.record_master_only || proxy_is_master
    }

    /// Index value for a snapshot taken at `now`, or `None` when the sampling
    /// gate drops it.
    ///
    /// While recording the value follows wall-clock time. Otherwise this is a
    /// manual snapshot placed one frame period after `last_master_value`.
    pub fn sample_time(&mut self, now: f64, rate_fps: f64, last_master_value: Option<f64>) -> Option<f64> {
        let effective_rate = if rate_fps != 0.0 { rate_fps } else { 1.0 };
        if self.is_active() && self.anchor_pending {
            let timestamp = last_master_value.unwrap_or(0.0) + 1.0 / effective_rate;
            self.time_offset = now - timestamp;
            self.last_save_time = now;
            self.anchor_pending = false;
            return Some(timestamp);
        }
        if self.is_active() {
            if self.sampling_mode == SamplingMode::LimitedToPlaybackFrameRate
                && rate_fps > 0.0
                && now - self.last_save_time < 1.0 / rate_fps
            {
                return None;
            }
            self.last_save_time = now;
            return Some(now - self.time_offset);
        }
        Some(last_master_value.unwrap_or(0.0) + 1.0 / effective_rate)
    }
}

impl Default for RecordingController {
    fn default() -> Self {
        Self::new()
    }
}
