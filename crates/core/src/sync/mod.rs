//! Aligns clips to externally detected motion events.
//!
//! Every strategy reads the composition, awaits the motion source and the
//! decoder, then applies its whole mutation through one
//! [`History::try_commit`]. A failure at any point leaves history untouched.

use std::{rc::Rc, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    analysis::{
        detect_transient_times, find_active_window, is_pulsating, median, Envelope, WindowLimits,
    },
    assets::{AssetCache, DecodedAudio},
    config::{MotionAnalysisParams, SyncConfig},
    history::History,
    model::{Clip, ClipDraft, ClipId, Composition, Selection, TimeWarpSegment, TrackId},
    placement::{apply_overlap_transitions, can_place, candidate_tracks, find_track_from},
    Result, TimelineError,
};

const MAX_WHOLE_CLIP_PAIRS: usize = 8;
const ANALYSIS_TRANSIENTS: usize = 24;

const PULSE_SEGMENT_S: f64 = 0.18;
const LOOSE_SEGMENT_S: f64 = 0.30;
const SEGMENT_MARGIN_S: f64 = 0.01;
const PULSE_FADE_FRACTION: f64 = 0.20;
const LOOSE_FADE_FRACTION: f64 = 0.12;
const MIN_SEGMENT_FADE_S: f64 = 0.01;
const MAX_SEGMENT_FADE_S: f64 = 0.08;
const FILL_ROUNDS: usize = 20;

const WINDOW_PEAK_FRACTION: f64 = 0.06;
const WINDOW_MEDIAN_FACTOR: f64 = 2.0;
const WINDOW_FLOOR: f64 = 1e-6;
const MIN_WINDOW_SPAN_S: f64 = 0.02;
const MIN_WARP_SEGMENT_S: f64 = 0.03;
const WARP_GAP_S: f64 = 0.001;
const MIN_WARPED_CLIP_S: f64 = 0.05;

/// One detected movement, relative to the requested window start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionEvent {
    pub t_s: f64,
}

/// What the motion source is asked to analyse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionRequest {
    pub asset_id: String,
    pub start_s: f64,
    pub duration_s: f64,
    pub max_events: usize,
    pub analysis: MotionAnalysisParams,
}

/// External motion detector, typically a remote video analysis service.
#[async_trait(?Send)]
pub trait MotionEventSource {
    /// Events in ascending time order.
    async fn detect(&self, request: &MotionRequest) -> Result<Vec<MotionEvent>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStrategy {
    WholeClip,
    Segmented,
    TimeAdjust,
}

/// What an alignment changed.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Shifted {
        clip_id: ClipId,
        track_id: TrackId,
        delta_s: f64,
        start_s: f64,
    },
    Segmented {
        clips: Vec<ClipId>,
        pulsating: bool,
    },
    TimeAdjusted {
        clip_id: ClipId,
        start_s: f64,
        duration_s: f64,
        segments: usize,
    },
}

/// Median of index-paired `motion - transient` differences over at most
/// eight pairs. `None` when either side is empty.
pub fn whole_clip_delta(transients: &[f64], motions: &[f64]) -> Option<f64> {
    let n = transients.len().min(motions.len()).min(MAX_WHOLE_CLIP_PAIRS);
    if n == 0 {
        return None;
    }
    let deltas: Vec<f64> = (0..n).map(|i| motions[i] - transients[i]).collect();
    Some(if n == 1 { deltas[0] } else { median(&deltas) })
}

/// Runs the alignment strategies against a motion source and the asset cache.
pub struct MotionSync {
    source: Rc<dyn MotionEventSource>,
    cache: AssetCache,
    config: SyncConfig,
}

impl std::fmt::Debug for MotionSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionSync")
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish()
    }
}

impl MotionSync {
    pub fn new(source: Rc<dyn MotionEventSource>, cache: AssetCache, config: SyncConfig) -> Self {
        Self { source, cache, config }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Aligns the primary selected clip.
    pub async fn sync_selected(
        &self,
        history: &mut History,
        video_id: &str,
        strategy: SyncStrategy,
    ) -> Result<SyncOutcome> {
        let clip_id = history
            .present()
            .selection
            .primary
            .ok_or_else(|| TimelineError::invalid("no clip selected"))?;
        self.sync(history, video_id, clip_id, strategy).await
    }

    pub async fn sync(
        &self,
        history: &mut History,
        video_id: &str,
        clip_id: ClipId,
        strategy: SyncStrategy,
    ) -> Result<SyncOutcome> {
        let result = match strategy {
            SyncStrategy::WholeClip => self.whole_clip(history, video_id, clip_id).await,
            SyncStrategy::Segmented => self.segmented(history, video_id, clip_id).await,
            SyncStrategy::TimeAdjust => self.time_adjust(history, video_id, clip_id).await,
        };
        if let Err(err) = &result {
            tracing::warn!(clip = %clip_id, ?strategy, error = %err, "motion sync failed");
        }
        result
    }

    /// Shifts the clip by the median transient-to-motion delta.
    pub async fn whole_clip(
        &self,
        history: &mut History,
        video_id: &str,
        clip_id: ClipId,
    ) -> Result<SyncOutcome> {
        let clip = selected_clip(history.present(), clip_id)?;
        let motions = self
            .motion_times(video_id, &clip, self.config.whole_clip_max_events)
            .await?;
        let audio = self.load(&clip).await?;
        let transients = detect_transient_times(&audio, self.config.whole_clip_max_events);
        let delta_s = whole_clip_delta(&transients, &motions).ok_or_else(|| {
            TimelineError::AlignmentInsufficientData(format!(
                "{} transients, {} motion events",
                transients.len(),
                motions.len()
            ))
        })?;
        let target_s = (clip.start_s + delta_s).max(0.0);

        let track_id = history.try_commit(|state| {
            let current = selected_clip(state, clip_id)?;
            let track_id = candidate_tracks(state, current.track_id)
                .into_iter()
                .find(|&t| can_place(state, t, target_s, current.duration_s, Some(clip_id)))
                .ok_or_else(|| {
                    TimelineError::rejected(format!(
                        "no track accepts clip {clip_id} at {target_s:.3}s"
                    ))
                })?;
            state.move_clip(clip_id, track_id, target_s)?;
            Ok(track_id)
        })?;
        tracing::info!(clip = %clip_id, delta_s, start_s = target_s, "clip shifted to motion");
        Ok(SyncOutcome::Shifted {
            clip_id,
            track_id,
            delta_s,
            start_s: target_s,
        })
    }

    /// Replaces the clip with one short clip per motion event.
    pub async fn segmented(
        &self,
        history: &mut History,
        video_id: &str,
        clip_id: ClipId,
    ) -> Result<SyncOutcome> {
        let clip = selected_clip(history.present(), clip_id)?;
        let motions = self
            .motion_times(video_id, &clip, self.config.segmented_max_events)
            .await?;
        let audio = self.load(&clip).await?;
        let transients = detect_transient_times(&audio, ANALYSIS_TRANSIENTS);
        let pulsating = is_pulsating(&transients);
        let offsets = paired_offsets(&transients, motions.len(), self.config.repeat_if_few);

        let clips = history.try_commit(|state| {
            let base = selected_clip(state, clip_id)?;
            let placed = place_segments(state, &base, &motions, &offsets, pulsating);
            if placed.is_empty() {
                return Err(TimelineError::rejected("no segment could be placed"));
            }
            let ids: Vec<ClipId> = placed.iter().map(|(id, _)| *id).collect();
            state.selection = Selection::many(ids.iter().copied());
            Ok(ids)
        })?;
        tracing::info!(clip = %clip_id, segments = clips.len(), pulsating, "clip split to motion");
        Ok(SyncOutcome::Segmented { clips, pulsating })
    }

    /// Warps the clip so each active window around a transient lands on its
    /// motion event. Falls back to [`MotionSync::whole_clip`] with fewer than
    /// two usable pairs.
    pub async fn time_adjust(
        &self,
        history: &mut History,
        video_id: &str,
        clip_id: ClipId,
    ) -> Result<SyncOutcome> {
        let clip = selected_clip(history.present(), clip_id)?;
        let motions = self
            .motion_times(video_id, &clip, self.config.segmented_max_events)
            .await?;
        let audio = self.load(&clip).await?;
        let transients = detect_transient_times(&audio, ANALYSIS_TRANSIENTS);
        if transients.len().min(motions.len()) < 2 {
            tracing::debug!(clip = %clip_id, "too few pairs, falling back to whole-clip shift");
            return self.whole_clip(history, video_id, clip_id).await;
        }

        let Some(warp) = plan_time_warp(&clip, &audio, &transients, &motions)? else {
            tracing::debug!(clip = %clip_id, "too few transients in clip range, falling back");
            return self.whole_clip(history, video_id, clip_id).await;
        };

        let segments = warp.segments.len();
        history.try_commit(|state| {
            let current = selected_clip(state, clip_id)?;
            let track_id = candidate_tracks(state, current.track_id)
                .into_iter()
                .find(|&t| can_place(state, t, warp.start_s, warp.duration_s, Some(clip_id)))
                .ok_or_else(|| {
                    TimelineError::rejected(format!(
                        "warped clip {clip_id} does not fit on any track"
                    ))
                })?;
            let old_track = current.track_id;
            if let Some(target) = state.clip_mut(clip_id) {
                target.track_id = track_id;
                target.start_s = warp.start_s;
                target.duration_s = warp.duration_s;
                target.source_duration_s = warp.source_duration_s;
                target.time_warp = warp.segments.clone();
                let (fade_in, fade_out) = (target.fade_in_s, target.fade_out_s);
                target.set_fade_in(fade_in);
                target.set_fade_out(fade_out);
            }
            apply_overlap_transitions(state, old_track);
            if track_id != old_track {
                apply_overlap_transitions(state, track_id);
            }
            Ok(())
        })?;
        tracing::info!(
            clip = %clip_id,
            start_s = warp.start_s,
            duration_s = warp.duration_s,
            segments,
            "clip time-adjusted to motion"
        );
        Ok(SyncOutcome::TimeAdjusted {
            clip_id,
            start_s: warp.start_s,
            duration_s: warp.duration_s,
            segments,
        })
    }

    async fn motion_times(
        &self,
        video_id: &str,
        clip: &Clip,
        max_events: usize,
    ) -> Result<Vec<f64>> {
        if video_id.is_empty() {
            return Err(TimelineError::invalid("no video loaded"));
        }
        let request = MotionRequest {
            asset_id: video_id.to_string(),
            start_s: clip.start_s,
            duration_s: clip.duration_s,
            max_events,
            analysis: self.config.analysis.sanitized(),
        };
        let events = self.source.detect(&request).await?;
        tracing::debug!(clip = %clip.id, events = events.len(), "motion events received");
        if events.is_empty() {
            return Err(TimelineError::AlignmentInsufficientData(
                "no motion events detected".to_string(),
            ));
        }
        Ok(events.into_iter().map(|e| e.t_s).collect())
    }

    async fn load(&self, clip: &Clip) -> Result<Arc<DecodedAudio>> {
        let url = clip.asset.as_ref().map_or("", |a| a.url.as_str());
        Ok(self.cache.get(url).await?)
    }
}

fn selected_clip(state: &Composition, clip_id: ClipId) -> Result<Clip> {
    state
        .clip(clip_id)
        .cloned()
        .ok_or_else(|| TimelineError::invalid(format!("unknown clip {clip_id}")))
}

/// Source offsets paired with each motion event. With `repeat_if_few`, a
/// short transient list is cycled so every event gets one.
fn paired_offsets(transients: &[f64], motion_count: usize, repeat_if_few: bool) -> Vec<f64> {
    if repeat_if_few && !transients.is_empty() && transients.len() < motion_count {
        (0..motion_count).map(|i| transients[i % transients.len()]).collect()
    } else {
        transients.to_vec()
    }
}

/// Removes `base` and places the short clips, then gives each a fade
/// proportional to its length. Returns the placed ids with their durations.
fn place_segments(
    state: &mut Composition,
    base: &Clip,
    motions: &[f64],
    offsets: &[f64],
    pulsating: bool,
) -> Vec<(ClipId, f64)> {
    let default_len = if pulsating { PULSE_SEGMENT_S } else { LOOSE_SEGMENT_S };
    let fade_fraction = if pulsating { PULSE_FADE_FRACTION } else { LOOSE_FADE_FRACTION };
    let area_start = base.start_s;
    let area_end = base.end_s();

    state.remove_clip(base.id);
    let mut placed = Vec::new();
    let mut place = |state: &mut Composition,
                     start_s: f64,
                     duration_s: f64,
                     source_offset_s: f64|
     -> bool {
        let Some(track_id) = find_track_from(state, base.track_id, start_s, duration_s, None) else {
            return false;
        };
        let draft = ClipDraft {
            name: base.name.clone(),
            duration_s,
            source_offset_s,
            source_duration_s: base.source_duration_s,
            asset: base.asset.clone(),
            waveform_peaks: base.waveform_peaks.clone(),
            time_warp: Vec::new(),
        };
        placed.push((state.add_clip(draft, track_id, start_s), duration_s));
        true
    };

    let mut covered_to = area_start;
    for (i, &motion) in motions.iter().enumerate() {
        let target = area_start + motion;
        let next = motions.get(i + 1).map_or(area_end, |m| area_start + m);
        let gap = (next - target - SEGMENT_MARGIN_S).max(SEGMENT_MARGIN_S);
        let len = default_len.min(gap);
        let offset = offsets.get(i).copied().unwrap_or(0.0).max(0.0);
        if place(state, target, len, offset) {
            covered_to = covered_to.max(target + len);
        }
    }

    let mut round = 0;
    while covered_to + SEGMENT_MARGIN_S < area_end && round < offsets.len() * FILL_ROUNDS {
        let start = covered_to + SEGMENT_MARGIN_S;
        let len = (area_end.min(start + default_len) - start).max(SEGMENT_MARGIN_S);
        let offset = offsets[round % offsets.len()].max(0.0);
        round += 1;
        if place(state, start, len, offset) {
            covered_to = start + len;
        }
    }

    for &(id, len) in &placed {
        let fade = (len * fade_fraction).clamp(MIN_SEGMENT_FADE_S, MAX_SEGMENT_FADE_S);
        if let Some(clip) = state.clip_mut(id) {
            let (fade_in, fade_out) = (clip.fade_in_s.max(fade), clip.fade_out_s.max(fade));
            clip.set_fade_in(fade_in);
            clip.set_fade_out(fade_out);
        }
    }
    placed
}

/// New placement of a time-adjusted clip.
#[derive(Debug, Clone, PartialEq)]
struct WarpPlan {
    start_s: f64,
    duration_s: f64,
    source_duration_s: f64,
    segments: Vec<TimeWarpSegment>,
}

/// Maps active windows around the clip's transients onto the motion times.
///
/// `Ok(None)` means fewer than two transients fall inside the clip's source
/// range and the caller should fall back to a plain shift.
fn plan_time_warp(
    clip: &Clip,
    audio: &DecodedAudio,
    transients: &[f64],
    motions: &[f64],
) -> Result<Option<WarpPlan>> {
    let start_off = clip.source_offset_s.max(0.0);
    let end_off = start_off + clip.duration_s.max(0.001);
    let local: Vec<f64> = transients
        .iter()
        .filter(|&&t| t >= start_off && t <= end_off)
        .map(|t| t - start_off)
        .collect();
    let pairs = local.len().min(motions.len());
    if pairs < 2 {
        return Ok(None);
    }

    let envelope = Envelope::compute(audio);
    let slice = envelope.slice(start_off, end_off);
    let local_max = slice.iter().copied().fold(0.0, f64::max);
    let threshold = (local_max * WINDOW_PEAK_FRACTION)
        .max(median(slice) * WINDOW_MEDIAN_FACTOR)
        .max(WINDOW_FLOOR);
    let limits = WindowLimits::default();

    // (timeline start, duration, source offset)
    let mut spans: Vec<(f64, f64, f64)> = Vec::with_capacity(pairs);
    for (&local_t, &motion) in local.iter().zip(motions) {
        let t_abs = start_off + local_t;
        let window = find_active_window(&envelope, t_abs, threshold, &limits);
        let seg_start = window.start_s.clamp(start_off, end_off);
        let seg_end = (seg_start + MIN_WINDOW_SPAN_S).max(end_off.min(window.end_s));
        let duration = seg_end - seg_start;
        if duration < MIN_WARP_SEGMENT_S {
            continue;
        }
        let out_start = clip.start_s + motion - (t_abs - seg_start).max(0.0);
        spans.push((out_start, duration, seg_start));
    }
    if spans.is_empty() {
        return Err(TimelineError::AlignmentInsufficientData(
            "no active window around the paired transients".to_string(),
        ));
    }

    spans.sort_by(|a, b| a.0.total_cmp(&b.0));
    let earliest = spans[0].0;
    let new_start = earliest.max(0.0);
    let shift = new_start - earliest;
    let mut last_end = f64::NEG_INFINITY;
    for span in &mut spans {
        span.0 += shift;
        if span.0 < last_end + WARP_GAP_S {
            span.0 = last_end + WARP_GAP_S;
        }
        last_end = span.0 + span.1;
    }

    let source_duration_s = if clip.source_duration_s > 0.0 {
        clip.source_duration_s
    } else {
        audio.duration_s()
    };
    let segments = spans
        .iter()
        .map(|&(start, duration_s, source_offset_s)| TimeWarpSegment {
            start_s: start - new_start,
            duration_s,
            source_offset_s,
        })
        .collect();
    Ok(Some(WarpPlan {
        start_s: new_start,
        duration_s: (last_end - new_start).max(MIN_WARPED_CLIP_S),
        source_duration_s,
        segments,
    }))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use futures::executor::block_on;

    use super::*;
    use crate::{
        assets::testing::{bursts, MemoryDecoder},
        config::HistoryConfig,
    };

    struct FixedMotion {
        times: Vec<f64>,
        requests: RefCell<Vec<MotionRequest>>,
    }

    impl FixedMotion {
        fn new(times: &[f64]) -> Rc<Self> {
            Rc::new(Self {
                times: times.to_vec(),
                requests: RefCell::new(Vec::new()),
            })
        }
    }

    #[async_trait(?Send)]
    impl MotionEventSource for FixedMotion {
        async fn detect(&self, request: &MotionRequest) -> Result<Vec<MotionEvent>> {
            self.requests.borrow_mut().push(request.clone());
            Ok(self.times.iter().map(|&t_s| MotionEvent { t_s }).collect())
        }
    }

    const SR: u32 = 8_000;
    const BURSTS: [f64; 2] = [0.2, 0.8];

    fn sync_with(motion: Rc<FixedMotion>) -> MotionSync {
        let decoder = Rc::new(MemoryDecoder::with("steps.wav", bursts(SR, 1.5, &BURSTS)));
        MotionSync::new(motion, AssetCache::new(decoder), SyncConfig::default())
    }

    fn history_with_clip(start_s: f64) -> (History, ClipId) {
        let mut state = Composition::default();
        let track = state.tracks[0].id;
        let id = state.add_clip(ClipDraft::for_asset("steps", "steps.wav", 1.5), track, start_s);
        (History::new(state, &HistoryConfig::default()), id)
    }

    #[test]
    fn whole_clip_delta_is_the_median_pair_difference() {
        let delta = whole_clip_delta(&[0.10, 0.40], &[0.30, 0.65]).unwrap();
        assert!((delta - 0.225).abs() < 1e-12);
        assert!((2.0 + delta - 2.225).abs() < 1e-12);
        assert_eq!(whole_clip_delta(&[0.5], &[0.2, 0.9]), Some(0.2 - 0.5));
        assert_eq!(whole_clip_delta(&[], &[0.3]), None);
    }

    #[test]
    fn repeat_if_few_cycles_offsets() {
        assert_eq!(paired_offsets(&[0.1, 0.2], 5, true), vec![0.1, 0.2, 0.1, 0.2, 0.1]);
        assert_eq!(paired_offsets(&[0.1, 0.2], 5, false), vec![0.1, 0.2]);
        assert!(paired_offsets(&[], 3, true).is_empty());
    }

    #[test]
    fn whole_clip_shift_is_one_undo_step() {
        let motion = FixedMotion::new(&[0.5, 1.1]);
        let sync = sync_with(motion.clone());
        let (mut history, id) = history_with_clip(2.0);

        let outcome =
            block_on(sync.sync(&mut history, "video-1", id, SyncStrategy::WholeClip)).unwrap();
        let transients = detect_transient_times(&bursts(SR, 1.5, &BURSTS), 12);
        let expected = whole_clip_delta(&transients, &[0.5, 1.1]).unwrap();
        let SyncOutcome::Shifted { delta_s, start_s, .. } = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert!((delta_s - expected).abs() < 1e-12);
        assert!((history.present().clip(id).unwrap().start_s - start_s).abs() < 1e-12);
        assert!((start_s - (2.0 + expected)).abs() < 1e-12);

        let request = &motion.requests.borrow()[0];
        assert_eq!(request.asset_id, "video-1");
        assert_eq!(request.start_s, 2.0);
        assert_eq!(request.max_events, 12);

        assert!(history.undo());
        assert_eq!(history.present().clip(id).unwrap().start_s, 2.0);
    }

    #[test]
    fn whole_clip_moves_to_another_track_when_blocked() {
        let sync = sync_with(FixedMotion::new(&[1.2]));
        let (mut history, id) = history_with_clip(0.0);
        let home = history.present().tracks[0].id;
        history.commit(|s| {
            s.add_clip(ClipDraft::for_asset("wall", "steps.wav", 3.0), home, 1.6);
        });
        let outcome = block_on(sync.whole_clip(&mut history, "v", id)).unwrap();
        let SyncOutcome::Shifted { track_id, .. } = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert_ne!(track_id, home);
        assert_eq!(history.present().clip(id).unwrap().track_id, track_id);
    }

    #[test]
    fn failures_leave_history_untouched() {
        let (mut history, id) = history_with_clip(0.0);

        let silent = sync_with(FixedMotion::new(&[]));
        assert!(matches!(
            block_on(silent.whole_clip(&mut history, "v", id)),
            Err(TimelineError::AlignmentInsufficientData(_))
        ));

        let sync = sync_with(FixedMotion::new(&[1.0]));
        assert!(matches!(
            block_on(sync.segmented(&mut history, "", id)),
            Err(TimelineError::InvalidMutation(_))
        ));
        assert_eq!(history.undo_depth(), 0);

        let mut empty = History::default();
        assert!(matches!(
            block_on(sync.sync_selected(&mut empty, "v", SyncStrategy::TimeAdjust)),
            Err(TimelineError::InvalidMutation(_))
        ));

        let mut state = Composition::default();
        let track = state.tracks[0].id;
        let orphan = state.add_clip(ClipDraft::for_asset("gone", "missing.wav", 1.0), track, 0.0);
        let mut history = History::new(state, &HistoryConfig::default());
        let err =
            block_on(sync.sync_selected(&mut history, "v", SyncStrategy::Segmented)).unwrap_err();
        assert!(matches!(err, TimelineError::AssetUnavailable { .. }));
        assert_eq!(history.undo_depth(), 0);
        assert!(history.present().clip(orphan).is_some());
    }

    #[test]
    fn whole_clip_rejection_when_no_track_fits() {
        let sync = sync_with(FixedMotion::new(&[1.2]));
        let (mut history, id) = history_with_clip(0.0);
        history.commit(|s| {
            let tracks: Vec<TrackId> = s.tracks.iter().map(|t| t.id).collect();
            for (i, track) in tracks.into_iter().enumerate() {
                if i > 0 {
                    s.add_clip(ClipDraft::for_asset("wall", "steps.wav", 4.0), track, 0.0);
                } else {
                    s.add_clip(ClipDraft::for_asset("wall", "steps.wav", 3.0), track, 1.6);
                }
            }
        });
        let before = history.present().clone();
        let depth = history.undo_depth();
        let err = block_on(sync.whole_clip(&mut history, "v", id)).unwrap_err();
        assert!(matches!(err, TimelineError::PlacementRejected(_)));
        assert_eq!(history.undo_depth(), depth);
        assert_eq!(history.present().clips, before.clips);
    }

    #[test]
    fn segmented_places_one_clip_per_motion_event_and_fills() {
        let sync = sync_with(FixedMotion::new(&[0.1, 0.5]));
        let (mut history, id) = history_with_clip(1.0);
        let outcome = block_on(sync.segmented(&mut history, "v", id)).unwrap();
        let SyncOutcome::Segmented { clips, pulsating } = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert!(!pulsating);
        assert!(history.present().clip(id).is_none());
        assert!(clips.len() > 2, "{clips:?}");

        let state = history.present();
        let first = state.clip(clips[0]).unwrap();
        assert!((first.start_s - 1.1).abs() < 1e-9);
        assert!((first.duration_s - 0.30).abs() < 1e-9);
        assert!((first.fade_in_s - 0.036).abs() < 1e-9);
        let second = state.clip(clips[1]).unwrap();
        assert!((second.start_s - 1.5).abs() < 1e-9);
        for id in &clips {
            let clip = state.clip(*id).unwrap();
            assert!(clip.start_s >= 1.0 && clip.end_s() <= 2.5 + 1e-9);
            assert!(clip.fade_in_s >= MIN_SEGMENT_FADE_S);
            assert_eq!(clip.asset.as_ref().unwrap().url, "steps.wav");
        }
        assert_eq!(state.selection.ids().len(), clips.len());

        assert!(history.undo());
        assert!(history.present().clip(id).is_some());
        assert_eq!(history.present().clips.len(), 1);
    }

    #[test]
    fn time_adjust_maps_windows_onto_motion() {
        let sync = sync_with(FixedMotion::new(&[0.4, 1.2]));
        let (mut history, id) = history_with_clip(1.0);
        let outcome = block_on(sync.time_adjust(&mut history, "v", id)).unwrap();
        let SyncOutcome::TimeAdjusted { segments, start_s, duration_s, .. } = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert_eq!(segments, 2);

        let clip = history.present().clip(id).unwrap();
        assert_eq!(clip.start_s, start_s);
        assert_eq!(clip.duration_s, duration_s);
        assert_eq!(clip.time_warp.len(), 2);
        assert!(clip.time_warp[0].start_s.abs() < 1e-9);
        let last = clip.time_warp[1];
        assert!(clip.time_warp[0].end_s() <= last.start_s);
        assert!((last.end_s() - duration_s).abs() < 1e-9);
        let transients = detect_transient_times(&bursts(SR, 1.5, &BURSTS), ANALYSIS_TRANSIENTS);
        for (segment, t) in clip.time_warp.iter().zip(transients) {
            assert!(segment.source_offset_s <= t - 0.025 + 1e-9);
        }
        assert!(history.undo());
        assert!(history.present().clip(id).unwrap().time_warp.is_empty());
    }

    #[test]
    fn time_adjust_falls_back_to_shift_with_one_event() {
        let sync = sync_with(FixedMotion::new(&[0.6]));
        let (mut history, id) = history_with_clip(1.0);
        let outcome = block_on(sync.time_adjust(&mut history, "v", id)).unwrap();
        assert!(matches!(outcome, SyncOutcome::Shifted { .. }));
        assert!(history.present().clip(id).unwrap().time_warp.is_empty());
    }
}
