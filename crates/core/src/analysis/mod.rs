use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::assets::DecodedAudio;

const ENVELOPE_WINDOW_S: f64 = 0.01;
const MIN_WINDOW_SAMPLES: usize = 16;
const MIN_HOP_SAMPLES: usize = 8;
const SMOOTHING_RADIUS: usize = 6;
const MIN_PEAK_DISTANCE: usize = 3;
const PEAK_DISTANCE_FRACTION: f64 = 0.02;
const PULSE_MIN_SPREAD: f64 = 0.005;
const PULSE_SPREAD_FRACTION: f64 = 0.15;
const QUIET_FRAMES_TO_STOP: usize = 3;
const MIN_WINDOW_S: f64 = 0.02;

/// Smoothed rectified-mean envelope of channel 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub values: Vec<f64>,
    /// Seconds between consecutive envelope frames.
    pub hop_s: f64,
    /// Duration of the analysed audio.
    pub duration_s: f64,
}

impl Envelope {
    /// 10 ms windows at half-window hops, then a ±6 frame moving average with
    /// edge frames repeated.
    pub fn compute(audio: &DecodedAudio) -> Self {
        let sample_rate = audio.sample_rate.max(1);
        let data = audio.channel(0).unwrap_or(&[]);
        let win =
            ((sample_rate as f64 * ENVELOPE_WINDOW_S).floor() as usize).max(MIN_WINDOW_SAMPLES);
        let hop = (win / 2).max(MIN_HOP_SAMPLES);

        let mut raw = Vec::new();
        let mut start = 0;
        while start + win < data.len() {
            let sum: f64 = data[start..start + win].iter().map(|s| s.abs() as f64).sum();
            raw.push(sum / win as f64);
            start += hop;
        }

        let values = smooth(&raw, SMOOTHING_RADIUS);
        Self {
            values,
            hop_s: hop as f64 / sample_rate as f64,
            duration_s: audio.duration_s(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Frames covering source time `[from_s, to_s)`, at least one frame wide.
    pub fn slice(&self, from_s: f64, to_s: f64) -> &[f64] {
        if self.values.is_empty() || self.hop_s <= 0.0 {
            return &[];
        }
        let last = self.values.len() - 1;
        let e0 = ((from_s / self.hop_s).floor().max(0.0) as usize).min(last);
        let e1 = ((to_s / self.hop_s).ceil().max(0.0) as usize)
            .min(self.values.len())
            .max(e0 + 1);
        &self.values[e0..e1]
    }
}

fn smooth(raw: &[f64], radius: usize) -> Vec<f64> {
    if raw.is_empty() {
        return Vec::new();
    }
    let last = raw.len() as isize - 1;
    let width = (2 * radius + 1) as f64;
    (0..raw.len() as isize)
        .map(|i| {
            let sum: f64 = (-(radius as isize)..=radius as isize)
                .map(|j| raw[(i + j).clamp(0, last) as usize])
                .sum();
            sum / width
        })
        .collect()
}

/// Onset times in seconds, strongest first when capped, returned in time
/// order.
pub fn detect_transient_times(audio: &DecodedAudio, max_events: usize) -> Vec<f64> {
    let envelope = Envelope::compute(audio);
    let values = &envelope.values;
    if values.len() < 5 || max_events == 0 {
        return Vec::new();
    }

    let mut peaks: Vec<(usize, f64)> = (2..values.len() - 2)
        .filter(|&i| values[i] > values[i - 1] && values[i] > values[i + 1])
        .map(|i| (i, values[i]))
        .collect();
    peaks.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

    let min_distance =
        ((values.len() as f64 * PEAK_DISTANCE_FRACTION).floor() as usize).max(MIN_PEAK_DISTANCE);
    let mut picked: Vec<usize> = Vec::new();
    for (index, _) in peaks {
        if picked.iter().all(|&p| p.abs_diff(index) >= min_distance) {
            picked.push(index);
        }
        if picked.len() >= max_events {
            break;
        }
    }
    picked.sort_unstable();
    picked.into_iter().map(|i| i as f64 * envelope.hop_s).collect()
}

/// Whether transient gaps are regular: the gap variance stays below
/// `max(0.005, 15% of the mean gap)`. Needs at least three transients.
pub fn is_pulsating(transients: &[f64]) -> bool {
    if transients.len() < 3 {
        return false;
    }
    let gaps: Vec<f64> = transients.windows(2).map(|w| w[1] - w[0]).collect();
    let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
    let variance = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / gaps.len() as f64;
    variance < PULSE_MIN_SPREAD.max(mean * PULSE_SPREAD_FRACTION)
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

/// Bounds used when growing an active window around a transient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowLimits {
    pub max_left_s: f64,
    pub max_right_s: f64,
    pub min_pre_s: f64,
    pub min_post_s: f64,
    pub max_len_s: f64,
}

impl Default for WindowLimits {
    fn default() -> Self {
        Self {
            max_left_s: 0.45,
            max_right_s: 0.75,
            min_pre_s: 0.025,
            min_post_s: 0.09,
            max_len_s: 1.6,
        }
    }
}

/// Source-time span of audible activity around a transient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActiveWindow {
    pub start_s: f64,
    pub end_s: f64,
}

/// Expands outwards from `transient_s` while the envelope stays above
/// `threshold`, stopping after three consecutive quiet frames on each side.
pub fn find_active_window(
    envelope: &Envelope,
    transient_s: f64,
    threshold: f64,
    limits: &WindowLimits,
) -> ActiveWindow {
    let duration_s = envelope.duration_s;
    if envelope.is_empty() || envelope.hop_s <= 0.0 {
        let start_s = (transient_s - limits.min_pre_s).max(0.0);
        let end_s = (transient_s + limits.min_post_s).min(duration_s);
        return ActiveWindow {
            start_s,
            end_s: end_s.max(start_s + MIN_WINDOW_S),
        };
    }

    let hop = envelope.hop_s;
    let values = &envelope.values;
    let last = values.len() - 1;
    let origin = ((transient_s / hop).round().max(0.0) as usize).min(last);
    let left_steps = ((limits.max_left_s / hop).round() as usize).max(1);
    let right_steps = ((limits.max_right_s / hop).round() as usize).max(1);

    let mut left = origin;
    let mut quiet = 0;
    for _ in 0..left_steps {
        if left <= 1 {
            break;
        }
        left -= 1;
        quiet = if values[left] < threshold { quiet + 1 } else { 0 };
        if quiet >= QUIET_FRAMES_TO_STOP {
            break;
        }
    }

    let mut right = origin;
    quiet = 0;
    for _ in 0..right_steps {
        if right + 1 >= last {
            break;
        }
        right += 1;
        quiet = if values[right] < threshold { quiet + 1 } else { 0 };
        if quiet >= QUIET_FRAMES_TO_STOP {
            break;
        }
    }

    let left_s = left as f64 * hop;
    let right_s = (right as f64 * hop).min(duration_s);
    let start_s = left_s.min(transient_s - limits.min_pre_s).max(0.0);
    let mut end_s = right_s.max(transient_s + limits.min_post_s).min(duration_s);
    if end_s - start_s > limits.max_len_s {
        end_s = start_s + limits.max_len_s;
    }
    if end_s <= start_s + MIN_WINDOW_S {
        end_s = (start_s + MIN_WINDOW_S).min(duration_s);
    }
    ActiveWindow { start_s, end_s }
}
