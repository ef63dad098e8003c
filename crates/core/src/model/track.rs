use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of characters kept in a track name.
pub const MAX_TRACK_NAME_CHARS: usize = 80;

/// Unique identifier for a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub Uuid);

impl TrackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TrackId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A parallel channel with its own gain and pan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    /// Linear gain in `[0, 1]`.
    pub gain: f64,
    /// Stereo position in `[-1, 1]`.
    pub pan: f64,
}

impl Track {
    pub fn new(name: impl Into<String>, gain: f64) -> Self {
        let mut track = Self {
            id: TrackId::new(),
            name: String::new(),
            gain: 1.0,
            pan: 0.0,
        };
        track.set_name(name);
        track.set_gain(gain);
        track
    }

    pub fn set_gain(&mut self, gain: f64) {
        self.gain = gain.clamp(0.0, 1.0);
    }

    pub fn set_pan(&mut self, pan: f64) {
        self.pan = pan.clamp(-1.0, 1.0);
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into().chars().take(MAX_TRACK_NAME_CHARS).collect();
    }
}
