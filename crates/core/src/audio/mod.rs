//! Per-segment routing shared by live playback and offline rendering.
//!
//! A clip is first planned into [`SegmentPlan`]s (one per time-warp segment,
//! or one for the whole clip). Each plan becomes a [`Voice`]: source, clip
//! gain and pan automation, track gain and pan, summed into the output.

use std::{f64::consts::FRAC_PI_2, sync::Arc};

use crate::{
    assets::DecodedAudio,
    automation::SegmentSchedules,
    model::{Clip, ClipId, Track, TrackId},
};

/// Shortest duration a scheduled segment is given.
pub const MIN_SEGMENT_S: f64 = 0.001;
/// Tolerance deciding whether a time-warp segment touches a clip edge.
pub const WARP_EDGE_EPSILON_S: f64 = 1e-3;
/// Fade applied to time-warp segment edges inside the clip.
pub const INTERIOR_FADE_S: f64 = 0.005;

const FRAME_EPSILON: f64 = 1e-6;

/// One contiguous source read scheduled on the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPlan {
    pub clip_id: ClipId,
    pub track_id: TrackId,
    /// Absolute timeline start.
    pub start_s: f64,
    /// Seconds of source audio played.
    pub duration_s: f64,
    pub source_offset_s: f64,
    pub fade_in_s: f64,
    pub fade_out_s: f64,
}

impl SegmentPlan {
    pub fn end_s(&self) -> f64 {
        self.start_s + self.duration_s
    }
}

/// Splits a clip into the segments that play, bounded by the clip and asset
/// lengths.
pub fn plan_clip(clip: &Clip, asset_duration_s: f64) -> Vec<SegmentPlan> {
    let make = |rel_start: f64,
                seg_duration: f64,
                source_offset: f64,
                fade_in: f64,
                fade_out: f64| {
        let source_offset_s = source_offset.max(0.0);
        let remaining_buffer = (asset_duration_s - source_offset_s).max(MIN_SEGMENT_S);
        SegmentPlan {
            clip_id: clip.id,
            track_id: clip.track_id,
            start_s: clip.start_s + rel_start,
            duration_s: seg_duration.min(remaining_buffer).max(MIN_SEGMENT_S),
            source_offset_s,
            fade_in_s: fade_in,
            fade_out_s: fade_out,
        }
    };

    if clip.time_warp.is_empty() {
        return vec![make(
            0.0,
            clip.duration_s.max(MIN_SEGMENT_S),
            clip.source_offset_s,
            clip.fade_in_s,
            clip.fade_out_s,
        )];
    }

    clip.time_warp
        .iter()
        .filter(|segment| segment.start_s.max(0.0) < clip.duration_s)
        .map(|segment| {
            let rel_start = segment.start_s.max(0.0);
            let seg_duration = segment
                .duration_s
                .min(clip.duration_s - rel_start)
                .max(MIN_SEGMENT_S);
            let is_first = rel_start <= WARP_EDGE_EPSILON_S;
            let is_last = rel_start + seg_duration >= clip.duration_s - WARP_EDGE_EPSILON_S;
            make(
                rel_start,
                seg_duration,
                segment.source_offset_s,
                if is_first { clip.fade_in_s } else { INTERIOR_FADE_S },
                if is_last { clip.fade_out_s } else { INTERIOR_FADE_S },
            )
        })
        .collect()
}

/// Equal-power stereo panner.
///
/// A mono input is spread across both sides; a stereo input keeps one side
/// and folds part of the other into it.
pub fn pan_frame(left: f64, right: Option<f64>, pan: f64) -> (f64, f64) {
    let pan = pan.clamp(-1.0, 1.0);
    match right {
        None => {
            let x = (pan + 1.0) * 0.5;
            (left * (x * FRAC_PI_2).cos(), left * (x * FRAC_PI_2).sin())
        }
        Some(right) if pan <= 0.0 => {
            let x = pan + 1.0;
            (
                left + right * (x * FRAC_PI_2).cos(),
                right * (x * FRAC_PI_2).sin(),
            )
        }
        Some(right) => {
            let x = pan;
            (
                left * (x * FRAC_PI_2).cos(),
                right + left * (x * FRAC_PI_2).sin(),
            )
        }
    }
}

/// First output frame at or after `time_s`.
pub fn frame_at(time_s: f64, sample_rate: u32) -> u64 {
    (time_s * sample_rate as f64 - FRAME_EPSILON).ceil().max(0.0) as u64
}

/// A scheduled segment rendering into a planar output buffer.
#[derive(Debug, Clone)]
pub struct Voice {
    asset: Arc<DecodedAudio>,
    clip_id: ClipId,
    schedules: SegmentSchedules,
    track_gain: f64,
    track_pan: f64,
    sample_rate: u32,
    start_frame: u64,
    /// Read position in source frames.
    position: f64,
    end_position: f64,
    finished: bool,
}

impl Voice {
    /// Builds a voice whose automation is anchored at `nominal_at` (where the
    /// segment would start if played from its beginning) and which becomes
    /// audible at `resume_at`. Times are in output-context seconds.
    pub fn new(
        asset: Arc<DecodedAudio>,
        plan: &SegmentPlan,
        clip: &Clip,
        track: &Track,
        nominal_at: f64,
        resume_at: f64,
        sample_rate: u32,
    ) -> Self {
        let schedules = SegmentSchedules::build(
            &clip.gain,
            &clip.pan,
            &clip.rate,
            nominal_at,
            plan.duration_s,
            plan.fade_in_s,
            plan.fade_out_s,
        );
        let resume_at = resume_at.max(nominal_at);
        let consumed_s = schedules.rate.integrate(nominal_at, resume_at);
        let asset_rate = asset.sample_rate as f64;
        Self {
            clip_id: clip.id,
            track_gain: track.gain.clamp(0.0, 1.0),
            track_pan: track.pan.clamp(-1.0, 1.0),
            sample_rate: sample_rate.max(1),
            start_frame: frame_at(resume_at, sample_rate.max(1)),
            position: (plan.source_offset_s + consumed_s) * asset_rate,
            end_position: (plan.source_offset_s + plan.duration_s) * asset_rate,
            finished: false,
            schedules,
            asset,
        }
    }

    pub fn clip_id(&self) -> ClipId {
        self.clip_id
    }

    pub fn start_frame(&self) -> u64 {
        self.start_frame
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Silences the voice. Safe on finished or not yet started voices.
    pub fn stop(&mut self) {
        self.finished = true;
    }

    /// Adds this voice's output for frames `[block_start, block_start + len)`.
    pub fn render_into(&mut self, out: &mut [Vec<f32>], block_start: u64) {
        let Some(frames) = out.first().map(Vec::len) else {
            return;
        };
        if self.finished || self.asset.length_samples() == 0 {
            self.finished = true;
            return;
        }
        let block_end = block_start + frames as u64;
        if self.start_frame >= block_end {
            return;
        }

        let out_rate = self.sample_rate as f64;
        let step = self.asset.sample_rate as f64 / out_rate;
        let len = self.asset.length_samples() as f64;
        let first = self.start_frame.max(block_start);
        for frame in first..block_end {
            if self.position >= self.end_position - FRAME_EPSILON || self.position >= len {
                self.finished = true;
                return;
            }
            let t = frame as f64 / out_rate;
            let (left, right) = self.read_source();
            let clip_gain = self.schedules.gain.value_at(t);
            let (l, r) = self.route(left * clip_gain, right.map(|r| r * clip_gain), t, out.len());
            let index = (frame - block_start) as usize;
            match &mut *out {
                [mono] => mono[index] += l as f32,
                [left_out, right_out, ..] => {
                    left_out[index] += l as f32;
                    right_out[index] += r as f32;
                }
                [] => {}
            }
            self.position += self.schedules.rate.value_at(t) * step;
        }
    }

    fn read_source(&self) -> (f64, Option<f64>) {
        let read = |channel: &[f32]| {
            let index = self.position.floor() as usize;
            let frac = self.position - index as f64;
            let a = channel.get(index).copied().unwrap_or(0.0) as f64;
            let b = channel.get(index + 1).copied().map_or(a, f64::from);
            a + (b - a) * frac
        };
        let left = self.asset.channel(0).map_or(0.0, read);
        let right = self.asset.channel(1).map(read);
        (left, right)
    }

    /// Clip pan, track gain, track pan. A mono output downmixes instead of
    /// panning.
    fn route(&self, left: f64, right: Option<f64>, t: f64, out_channels: usize) -> (f64, f64) {
        if out_channels == 1 {
            let mono = match right {
                Some(right) => 0.5 * (left + right),
                None => left,
            };
            let mono = mono * self.track_gain;
            return (mono, mono);
        }
        let (l, r) = pan_frame(left, right, self.schedules.pan.value_at(t));
        pan_frame(l * self.track_gain, Some(r * self.track_gain), self.track_pan)
    }
}

/// Planar buffer of `channels` × `frames` zeros.
pub fn silent_buffer(channels: u16, frames: usize) -> Vec<Vec<f32>> {
    vec![vec![0.0; frames]; usize::from(channels.max(1))]
}
