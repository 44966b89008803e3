// SPDX-License-Identifier: MIT OR Apache-2.0
//! Playback state machine and cursor stepping.

use serde::{Deserialize, Serialize};

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackState {
    /// Stopped
    #[default]
    Stopped,
    /// Advancing on every tick
    Playing,
}

impl PlaybackState {
    /// Display name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Playing => "Playing",
        }
    }
}

/// Playback controller for a browser
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackController {
    /// Playback state
    pub state: PlaybackState,
    /// Items per second
    pub rate_fps: f64,
    /// Wrap around at either end instead of stopping
    pub looped: bool,
    /// Jump over items when ticks arrive late instead of stepping one by one
    pub item_skipping: bool,
}

impl PlaybackController {
    /// Default rate in items per second
    pub const DEFAULT_RATE_FPS: f64 = 10.0;

    /// Create a stopped controller with default settings
    pub fn new() -> Self {
        Self {
            state: PlaybackState::Stopped,
            rate_fps: Self::DEFAULT_RATE_FPS,
            looped: true,
            item_skipping: true,
        }
    }

    /// Start playback
    pub fn play(&mut self) {
        self.state = PlaybackState::Playing;
    }

    /// Stop playback
    pub fn stop(&mut self) {
        self.state = PlaybackState::Stopped;
    }

    /// Play or stop; returns whether the state changed
    pub fn set_active(&mut self, active: bool) -> bool {
        let state = if active {
            PlaybackState::Playing
        } else {
            PlaybackState::Stopped
        };
        if self.state == state {
            return false;
        }
        self.state = state;
        true
    }

    /// Is currently playing
    pub fn is_playing(&self) -> bool {
        self.state == PlaybackState::Playing
    }

    /// Number of items to advance after `elapsed` seconds.
    ///
    /// Zero means not enough time has passed; the caller should keep
    /// accumulating. Without item skipping any positive step becomes one.
    pub fn increment_for(&self, elapsed: f64) -> i32 {
        let increment = (elapsed * self.rate_fps).floor();
        if !increment.is_finite() || increment < 1.0 {
            return 0;
        }
        if !self.item_skipping {
            return 1;
        }
        increment.min(i32::MAX as f64) as i32
    }

    /// Move the cursor `increment` items from `current` in a master with
    /// `count` items.
    ///
    /// Wraps around when looped; otherwise stops playback and lands on the
    /// first item (past the end) or the last item (before the start). An
    /// unselected cursor goes to the first item. Returns -1 for an empty
    /// master.
    pub fn advance(&mut self, current: i32, increment: i32, count: usize) -> i32 {
        if count == 0 {
            return -1;
        }
        if current < 0 {
            return 0;
        }
        let count = i64::try_from(count).unwrap_or(i64::MAX);
        let mut next = i64::from(current) + i64::from(increment);
        if next >= count {
            if self.looped {
                next %= count;
            } else {
                self.stop();
                next = 0;
            }
        } else if next < 0 {
            if self.looped {
                next = next.rem_euclid(count);
            } else {
                self.stop();
                next = count - 1;
            }
        }
        i32::try_from(next).unwrap_or(i32::MAX)
    }
}

impl Default for PlaybackController {
    fn default() -> Self {
        Self::new()
    }
}
