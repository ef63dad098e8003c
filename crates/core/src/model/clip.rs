use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AutomationCurve, CurveKind, TrackId};

/// Splits closer than this to either clip boundary are rejected.
pub const MIN_SPLIT_MARGIN_S: f64 = 0.05;

/// Unique identifier for a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClipId(pub Uuid);

impl ClipId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClipId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Reference to the audio asset a clip plays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    /// Location handed to the decoding service.
    pub url: String,
    /// Stable identifier from the asset's origin, if it has one.
    #[serde(default)]
    pub source_id: Option<String>,
}

impl AssetRef {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            source_id: None,
        }
    }

    /// Key used to share waveform data between clips of the same asset.
    pub fn key(&self) -> &str {
        self.source_id.as_deref().unwrap_or(&self.url)
    }
}

/// Maps a sub-range of the clip's timeline extent onto a source offset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWarpSegment {
    /// Start relative to the clip start.
    pub start_s: f64,
    pub duration_s: f64,
    pub source_offset_s: f64,
}

impl TimeWarpSegment {
    pub fn end_s(&self) -> f64 {
        self.start_s + self.duration_s
    }
}

/// A placed reference to a slice of an audio asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: ClipId,
    pub track_id: TrackId,
    pub name: String,
    pub start_s: f64,
    pub duration_s: f64,
    pub source_offset_s: f64,
    pub source_duration_s: f64,
    pub asset: Option<AssetRef>,
    /// Normalized peaks, shared read-only between snapshots and split halves.
    pub waveform_peaks: Option<Arc<[f32]>>,
    /// Ordered, non-overlapping. Empty means the whole clip plays contiguously.
    pub time_warp: Vec<TimeWarpSegment>,
    pub fade_in_s: f64,
    pub fade_out_s: f64,
    pub gain: AutomationCurve,
    pub pan: AutomationCurve,
    pub rate: AutomationCurve,
}

impl Clip {
    pub fn end_s(&self) -> f64 {
        self.start_s + self.duration_s
    }

    pub fn curve(&self, kind: CurveKind) -> &AutomationCurve {
        match kind {
            CurveKind::Gain => &self.gain,
            CurveKind::Pan => &self.pan,
            CurveKind::Rate => &self.rate,
        }
    }

    pub fn curve_mut(&mut self, kind: CurveKind) -> &mut AutomationCurve {
        match kind {
            CurveKind::Gain => &mut self.gain,
            CurveKind::Pan => &mut self.pan,
            CurveKind::Rate => &mut self.rate,
        }
    }

    pub fn set_fade_in(&mut self, seconds: f64) {
        self.fade_in_s = seconds.clamp(0.0, self.duration_s);
    }

    pub fn set_fade_out(&mut self, seconds: f64) {
        self.fade_out_s = seconds.clamp(0.0, self.duration_s);
    }

    /// Converts the clip back into the payload used to recreate it elsewhere.
    pub fn to_draft(&self) -> ClipDraft {
        ClipDraft {
            name: self.name.clone(),
            duration_s: self.duration_s,
            source_offset_s: self.source_offset_s,
            source_duration_s: self.source_duration_s,
            asset: self.asset.clone(),
            waveform_peaks: self.waveform_peaks.clone(),
            time_warp: Vec::new(),
        }
    }
}

/// Everything needed to create a clip, minus its placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipDraft {
    pub name: String,
    pub duration_s: f64,
    pub source_offset_s: f64,
    pub source_duration_s: f64,
    pub asset: Option<AssetRef>,
    pub waveform_peaks: Option<Arc<[f32]>>,
    pub time_warp: Vec<TimeWarpSegment>,
}

impl Default for ClipDraft {
    fn default() -> Self {
        Self {
            name: "Clip".to_string(),
            duration_s: 1.0,
            source_offset_s: 0.0,
            source_duration_s: 0.0,
            asset: None,
            waveform_peaks: None,
            time_warp: Vec::new(),
        }
    }
}

impl ClipDraft {
    pub fn for_asset(name: impl Into<String>, url: impl Into<String>, duration_s: f64) -> Self {
        Self {
            name: name.into(),
            duration_s,
            source_duration_s: duration_s,
            asset: Some(AssetRef::new(url)),
            ..Default::default()
        }
    }

    /// Materializes the draft with fresh identity, zero fades and flat curves.
    pub fn into_clip(self, track_id: TrackId, start_s: f64) -> Clip {
        let duration_s = if self.duration_s > 0.0 { self.duration_s } else { 1.0 };
        let source_duration_s = if self.source_duration_s > 0.0 {
            self.source_duration_s
        } else {
            duration_s
        };
        Clip {
            id: ClipId::new(),
            track_id,
            name: if self.name.is_empty() { "Clip".to_string() } else { self.name },
            start_s: start_s.max(0.0),
            duration_s,
            source_offset_s: self.source_offset_s.max(0.0),
            source_duration_s,
            asset: self.asset,
            waveform_peaks: self.waveform_peaks,
            time_warp: self.time_warp,
            fade_in_s: 0.0,
            fade_out_s: 0.0,
            gain: AutomationCurve::flat(CurveKind::Gain),
            pan: AutomationCurve::flat(CurveKind::Pan),
            rate: AutomationCurve::flat(CurveKind::Rate),
        }
    }
}
