//! Composition data model and the pure operations applied to a snapshot.
//!
//! A [`Composition`] is a plain value: cloning it produces an independent
//! deep copy (waveform peaks are immutable and shared). The history manager
//! owns the current snapshot; every operation here mutates one snapshot.

mod automation;
mod clip;
mod track;

use std::{collections::HashSet, sync::Arc};

use serde::{Deserialize, Serialize};

pub use automation::{AutomationCurve, AutomationPoint, CurveKind};
pub use clip::{AssetRef, Clip, ClipDraft, ClipId, TimeWarpSegment, MIN_SPLIT_MARGIN_S};
pub use track::{Track, TrackId, MAX_TRACK_NAME_CHARS};

use crate::{
    config::TimelineConfig,
    placement::{self, apply_overlap_transitions},
    Result, TimelineError,
};

/// Upper bound of the crossfade tolerance.
pub const MAX_TRANSITION_S: f64 = 5.0;

/// Global crossfade tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransitionPolicy {
    transition_s: f64,
}

impl TransitionPolicy {
    pub fn new(seconds: f64) -> Self {
        let transition_s = if seconds.is_finite() {
            seconds.clamp(0.0, MAX_TRANSITION_S)
        } else {
            0.0
        };
        Self { transition_s }
    }

    pub fn seconds(&self) -> f64 {
        self.transition_s
    }
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self::new(0.25)
    }
}

/// Selected clips. `primary` is the clip single-clip commands act on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub primary: Option<ClipId>,
    pub clip_ids: Vec<ClipId>,
}

impl Selection {
    pub fn single(id: ClipId) -> Self {
        Self {
            primary: Some(id),
            clip_ids: vec![id],
        }
    }

    pub fn many(ids: impl IntoIterator<Item = ClipId>) -> Self {
        let clip_ids: Vec<ClipId> = ids.into_iter().collect();
        Self {
            primary: clip_ids.first().copied(),
            clip_ids,
        }
    }

    pub fn clear(&mut self) {
        self.primary = None;
        self.clip_ids.clear();
    }

    /// Every selected id, falling back to the primary clip.
    pub fn ids(&self) -> Vec<ClipId> {
        if !self.clip_ids.is_empty() {
            self.clip_ids.clone()
        } else {
            self.primary.into_iter().collect()
        }
    }

    pub fn contains(&self, id: ClipId) -> bool {
        self.primary == Some(id) || self.clip_ids.contains(&id)
    }

    fn retain(&mut self, keep: impl Fn(ClipId) -> bool) {
        self.clip_ids.retain(|&id| keep(id));
        if self.primary.is_some_and(|id| !keep(id)) {
            self.primary = self.clip_ids.first().copied();
        }
    }
}

/// Scratch payload produced by copy/cut and consumed by paste.
#[derive(Debug, Clone, PartialEq)]
pub struct Clipboard {
    pub draft: ClipDraft,
}

/// The composition graph: tracks, clips, transition policy and selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Composition {
    pub tracks: Vec<Track>,
    pub clips: Vec<Clip>,
    pub transition: TransitionPolicy,
    pub selection: Selection,
    pub playhead_s: f64,
    track_name_prefix: String,
    track_gain: f64,
}

impl Default for Composition {
    fn default() -> Self {
        Self::new(&TimelineConfig::default())
    }
}

impl Composition {
    pub fn new(config: &TimelineConfig) -> Self {
        let mut state = Self {
            tracks: Vec::new(),
            clips: Vec::new(),
            transition: TransitionPolicy::new(config.transition_s),
            selection: Selection::default(),
            playhead_s: 0.0,
            track_name_prefix: config.track_name_prefix.clone(),
            track_gain: config.track_gain,
        };
        for _ in 0..config.initial_tracks {
            state.add_track();
        }
        state
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    pub fn track_index(&self, id: TrackId) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == id)
    }

    pub fn clip(&self, id: ClipId) -> Option<&Clip> {
        self.clips.iter().find(|c| c.id == id)
    }

    pub fn clip_mut(&mut self, id: ClipId) -> Option<&mut Clip> {
        self.clips.iter_mut().find(|c| c.id == id)
    }

    pub fn clips_on(&self, track_id: TrackId) -> impl Iterator<Item = &Clip> {
        self.clips.iter().filter(move |c| c.track_id == track_id)
    }

    /// Latest clip end, or zero for an empty composition.
    pub fn end_s(&self) -> f64 {
        self.clips.iter().map(Clip::end_s).fold(0.0, f64::max)
    }

    pub fn add_track(&mut self) -> TrackId {
        let name = format!("{} {}", self.track_name_prefix, self.tracks.len() + 1);
        let track = Track::new(name, self.track_gain);
        let id = track.id;
        self.tracks.push(track);
        id
    }

    /// Removes a track together with its clips.
    pub fn remove_track(&mut self, id: TrackId) -> bool {
        let Some(index) = self.track_index(id) else {
            return false;
        };
        self.tracks.remove(index);
        self.clips.retain(|c| c.track_id != id);
        self.prune_selection();
        true
    }

    pub fn set_track_gain(&mut self, id: TrackId, gain: f64) -> bool {
        self.track_mut(id).map(|t| t.set_gain(gain)).is_some()
    }

    pub fn set_track_pan(&mut self, id: TrackId, pan: f64) -> bool {
        self.track_mut(id).map(|t| t.set_pan(pan)).is_some()
    }

    pub fn set_track_name(&mut self, id: TrackId, name: &str) -> bool {
        self.track_mut(id).map(|t| t.set_name(name)).is_some()
    }

    /// Clamps the tolerance into `[0, 5]` and recomputes every track's fades.
    pub fn set_transition(&mut self, seconds: f64) {
        self.transition = TransitionPolicy::new(seconds);
        placement::reconcile_all(self);
    }

    /// Adds a clip without checking placement, selects it and recomputes the
    /// track's fades.
    pub fn add_clip(&mut self, draft: ClipDraft, track_id: TrackId, start_s: f64) -> ClipId {
        let clip = draft.into_clip(track_id, start_s);
        let id = clip.id;
        self.clips.push(clip);
        self.selection = Selection::single(id);
        apply_overlap_transitions(self, track_id);
        id
    }

    /// Places a dropped asset on `track_hint` or on the first track that
    /// accepts it. Returns `None` when no track fits.
    pub fn drop_clip(
        &mut self,
        draft: ClipDraft,
        track_hint: Option<TrackId>,
        start_s: f64,
    ) -> Option<ClipId> {
        let start_s = start_s.max(0.0);
        let duration_s = draft.duration_s;
        let track_id = track_hint
            .filter(|&id| self.track(id).is_some())
            .filter(|&id| placement::can_place(self, id, start_s, duration_s, None))
            .or_else(|| placement::find_track(self, start_s, duration_s, None))?;
        Some(self.add_clip(draft, track_id, start_s))
    }

    pub fn remove_clip(&mut self, id: ClipId) -> bool {
        let Some(index) = self.clips.iter().position(|c| c.id == id) else {
            return false;
        };
        let track_id = self.clips.remove(index).track_id;
        self.prune_selection();
        apply_overlap_transitions(self, track_id);
        true
    }

    /// Removes every selected clip and clears the selection.
    pub fn remove_selected(&mut self) -> usize {
        let ids = self.selection.ids();
        if ids.is_empty() {
            return 0;
        }
        let affected: HashSet<TrackId> = self
            .clips
            .iter()
            .filter(|c| ids.contains(&c.id))
            .map(|c| c.track_id)
            .collect();
        let before = self.clips.len();
        self.clips.retain(|c| !ids.contains(&c.id));
        self.selection.clear();
        for track_id in affected {
            apply_overlap_transitions(self, track_id);
        }
        before - self.clips.len()
    }

    /// Moves a clip if the resolver accepts the destination.
    pub fn move_clip(&mut self, id: ClipId, track_id: TrackId, start_s: f64) -> Result<()> {
        let start_s = start_s.max(0.0);
        let clip = self
            .clip(id)
            .ok_or_else(|| TimelineError::invalid(format!("unknown clip {id}")))?;
        if self.track(track_id).is_none() {
            return Err(TimelineError::invalid(format!("unknown track {track_id}")));
        }
        if !placement::can_place(self, track_id, start_s, clip.duration_s, Some(id)) {
            return Err(TimelineError::rejected(format!(
                "clip {id} does not fit on track {track_id} at {start_s:.3}s"
            )));
        }
        self.relocate(id, track_id, start_s);
        Ok(())
    }

    /// Moves a clip without consulting the resolver. Fades are still
    /// recomputed immediately for both affected tracks.
    pub fn force_move_clip(&mut self, id: ClipId, track_id: TrackId, start_s: f64) -> Result<()> {
        if self.clip(id).is_none() {
            return Err(TimelineError::invalid(format!("unknown clip {id}")));
        }
        if self.track(track_id).is_none() {
            return Err(TimelineError::invalid(format!("unknown track {track_id}")));
        }
        self.relocate(id, track_id, start_s.max(0.0));
        Ok(())
    }

    /// Shifts several clips by the same delta on their own tracks. Nothing
    /// moves unless every clip fits.
    pub fn move_clips(&mut self, ids: &[ClipId], delta_s: f64) -> Result<()> {
        let mut targets = Vec::with_capacity(ids.len());
        for &id in ids {
            let clip = self
                .clip(id)
                .ok_or_else(|| TimelineError::invalid(format!("unknown clip {id}")))?;
            targets.push((id, clip.track_id, (clip.start_s + delta_s).max(0.0)));
        }
        let mut scratch = self.clone();
        for &(id, track_id, start_s) in &targets {
            scratch.move_clip(id, track_id, start_s)?;
        }
        *self = scratch;
        Ok(())
    }

    fn relocate(&mut self, id: ClipId, track_id: TrackId, start_s: f64) {
        let Some(clip) = self.clip_mut(id) else {
            return;
        };
        let previous = clip.track_id;
        clip.track_id = track_id;
        clip.start_s = start_s;
        apply_overlap_transitions(self, previous);
        if previous != track_id {
            apply_overlap_transitions(self, track_id);
        }
    }

    /// Splits a clip at absolute time `at_s`, returning the right half's id.
    ///
    /// The split point must lie more than [`MIN_SPLIT_MARGIN_S`] inside both
    /// clip boundaries. The right half shares curves and peaks with the left
    /// half and reads its source `left duration` further in.
    pub fn split_clip(&mut self, id: ClipId, at_s: f64) -> Result<ClipId> {
        let clip = self
            .clip(id)
            .ok_or_else(|| TimelineError::invalid(format!("unknown clip {id}")))?;
        let rel = at_s - clip.start_s;
        if rel <= MIN_SPLIT_MARGIN_S || rel >= clip.duration_s - MIN_SPLIT_MARGIN_S {
            return Err(TimelineError::invalid(format!(
                "split at {at_s:.3}s is too close to the edges of clip {id}"
            )));
        }

        let left_duration = rel;
        let right_duration = clip.duration_s - rel;
        let mut right = clip.clone();
        right.id = ClipId::new();
        right.start_s = clip.start_s + left_duration;
        right.duration_s = right_duration;
        right.fade_in_s = clip.fade_in_s.min(right_duration);
        right.source_offset_s = clip.source_offset_s.max(0.0) + left_duration;
        let (left_warp, right_warp) = split_time_warp(&clip.time_warp, left_duration);
        right.time_warp = right_warp;
        let right_id = right.id;
        let track_id = clip.track_id;

        if let Some(left) = self.clip_mut(id) {
            left.duration_s = left_duration;
            left.fade_out_s = left.fade_out_s.min(left_duration);
            left.time_warp = left_warp;
        }
        self.clips.push(right);
        self.selection = Selection::single(right_id);
        apply_overlap_transitions(self, track_id);
        Ok(right_id)
    }

    /// Splits the primary selected clip.
    pub fn split_selected(&mut self, at_s: f64) -> Result<ClipId> {
        let id = self
            .selection
            .primary
            .ok_or_else(|| TimelineError::invalid("no clip selected"))?;
        self.split_clip(id, at_s)
    }

    pub fn set_fade_in(&mut self, id: ClipId, seconds: f64) -> bool {
        self.clip_mut(id).map(|c| c.set_fade_in(seconds)).is_some()
    }

    pub fn set_fade_out(&mut self, id: ClipId, seconds: f64) -> bool {
        self.clip_mut(id).map(|c| c.set_fade_out(seconds)).is_some()
    }

    pub fn copy_selected(&self) -> Option<Clipboard> {
        let id = self.selection.primary?;
        self.clip(id).map(|c| Clipboard { draft: c.to_draft() })
    }

    pub fn cut_selected(&mut self) -> Option<Clipboard> {
        let clipboard = self.copy_selected()?;
        self.remove_selected();
        Some(clipboard)
    }

    /// Pastes at `at_s` on the selected clip's track (else the first track),
    /// falling back to the first track that accepts it.
    pub fn paste(&mut self, clipboard: &Clipboard, at_s: f64) -> Option<ClipId> {
        let preferred = self
            .selection
            .primary
            .and_then(|id| self.clip(id))
            .map(|c| c.track_id)
            .or_else(|| self.tracks.first().map(|t| t.id))?;
        self.drop_clip(clipboard.draft.clone(), Some(preferred), at_s)
    }

    /// Fills peaks and source duration on every clip whose asset key matches.
    pub fn attach_waveform(
        &mut self,
        key: &str,
        peaks: Arc<[f32]>,
        source_duration_s: f64,
    ) -> usize {
        let mut updated = 0;
        for clip in &mut self.clips {
            if clip.asset.as_ref().map(AssetRef::key) != Some(key) {
                continue;
            }
            if clip.waveform_peaks.is_none() {
                clip.waveform_peaks = Some(peaks.clone());
            }
            if clip.source_duration_s <= 0.0 && source_duration_s > 0.0 {
                clip.source_duration_s = source_duration_s;
            }
            updated += 1;
        }
        updated
    }

    fn prune_selection(&mut self) {
        let live: HashSet<ClipId> = self.clips.iter().map(|c| c.id).collect();
        self.selection.retain(|id| live.contains(&id));
    }
}

/// Cuts a time-warp list at clip-relative `at_s`. A segment spanning the cut
/// is divided; right-hand segments are rebased onto the new clip start.
fn split_time_warp(
    segments: &[TimeWarpSegment],
    at_s: f64,
) -> (Vec<TimeWarpSegment>, Vec<TimeWarpSegment>) {
    let mut left = Vec::new();
    let mut right = Vec::new();
    for segment in segments {
        if segment.start_s < at_s {
            left.push(TimeWarpSegment {
                duration_s: segment.duration_s.min(at_s - segment.start_s),
                ..*segment
            });
        }
        if segment.end_s() > at_s {
            let skipped = (at_s - segment.start_s).max(0.0);
            right.push(TimeWarpSegment {
                start_s: (segment.start_s - at_s).max(0.0),
                duration_s: segment.duration_s - skipped,
                source_offset_s: segment.source_offset_s + skipped,
            });
        }
    }
    (left, right)
}
