//! Automation curve evaluation and absolute-time parameter schedules.
//!
//! Both the live scheduler and the offline renderer turn a clip's curves into
//! [`ParamSchedule`]s through [`schedule_curve`] and [`apply_fades`], so the
//! two paths observe identical values at identical absolute times.

use crate::model::{AutomationCurve, AutomationPoint, CurveKind};

/// Value a faded gain starts from or falls to.
pub const FADE_FLOOR: f64 = 0.0001;
/// Fades at or below this length are not scheduled.
pub const MIN_FADE_S: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq)]
enum EventKind {
    Set,
    LinearRamp,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ScheduleEvent {
    time: f64,
    value: f64,
    kind: EventKind,
}

/// Timeline of "set" and "linear ramp" events on one parameter.
///
/// Before the first event the parameter holds its default. After an event it
/// holds that event's value, unless the next event is a ramp, in which case it
/// moves linearly towards the ramp's value and reaches it at the ramp's time.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSchedule {
    default: f64,
    events: Vec<ScheduleEvent>,
}

impl ParamSchedule {
    pub fn new(default: f64) -> Self {
        Self {
            default,
            events: Vec::new(),
        }
    }

    /// Schedule holding one value forever.
    pub fn constant(value: f64) -> Self {
        Self::new(value)
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn set_value_at(&mut self, time: f64, value: f64) {
        self.insert(ScheduleEvent {
            time,
            value,
            kind: EventKind::Set,
        });
    }

    pub fn linear_ramp_to(&mut self, time: f64, value: f64) {
        self.insert(ScheduleEvent {
            time,
            value,
            kind: EventKind::LinearRamp,
        });
    }

    /// Drops every event at or after `time`.
    pub fn cancel_from(&mut self, time: f64) {
        self.events.retain(|e| e.time < time);
    }

    /// Events with equal times keep their insertion order.
    fn insert(&mut self, event: ScheduleEvent) {
        let index = self.events.partition_point(|e| e.time <= event.time);
        self.events.insert(index, event);
    }

    pub fn value_at(&self, time: f64) -> f64 {
        let next = self.events.partition_point(|e| e.time <= time);
        let Some(current) = next.checked_sub(1).map(|i| self.events[i]) else {
            return self.default;
        };
        match self.events.get(next) {
            Some(ramp) if ramp.kind == EventKind::LinearRamp && ramp.time > current.time => {
                let frac = (time - current.time) / (ramp.time - current.time);
                current.value + (ramp.value - current.value) * frac
            }
            _ => current.value,
        }
    }

    /// Integral of the parameter over `[from, to]`.
    ///
    /// The schedule is linear between event times, so a midpoint sample per
    /// piece is exact.
    pub fn integrate(&self, from: f64, to: f64) -> f64 {
        if to <= from {
            return 0.0;
        }
        let mut edges: Vec<f64> = Vec::with_capacity(self.events.len() + 2);
        edges.push(from);
        edges.extend(
            self.events
                .iter()
                .map(|e| e.time)
                .filter(|&t| t > from && t < to),
        );
        edges.push(to);
        edges.dedup();
        edges
            .windows(2)
            .map(|w| (w[1] - w[0]) * self.value_at(0.5 * (w[0] + w[1])))
            .sum()
    }
}

/// Evaluates a curve at normalized clip time `t_norm` without scheduling.
pub fn evaluate(curve: &AutomationCurve, t_norm: f64) -> f64 {
    let kind = curve.kind();
    let points = sorted_points(curve);
    let Some(first) = points.first() else {
        return kind.default_value();
    };
    if t_norm <= first.t {
        return kind.clamp(first.v);
    }
    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if t_norm <= b.t {
            if b.t <= a.t {
                return kind.clamp(b.v);
            }
            let frac = (t_norm - a.t) / (b.t - a.t);
            return kind.clamp(a.v + (b.v - a.v) * frac);
        }
    }
    points.last().map_or(kind.default_value(), |p| kind.clamp(p.v))
}

fn sorted_points(curve: &AutomationCurve) -> Vec<AutomationPoint> {
    let mut points = curve.points().to_vec();
    points.sort_by(|a, b| a.t.total_cmp(&b.t));
    points
}

/// Writes a curve into `schedule`, anchored at `start_at` and stretched over
/// `duration_s`. Events from `start_at` on are replaced.
pub fn schedule_curve(
    schedule: &mut ParamSchedule,
    curve: &AutomationCurve,
    start_at: f64,
    duration_s: f64,
) {
    let kind = curve.kind();
    let points = sorted_points(curve);
    schedule.cancel_from(start_at);
    let Some((first, rest)) = points.split_first() else {
        schedule.set_value_at(start_at, kind.default_value());
        return;
    };
    schedule.set_value_at(start_at + first.t * duration_s, kind.clamp(first.v));
    for point in rest {
        schedule.linear_ramp_to(start_at + point.t * duration_s, kind.clamp(point.v));
    }
}

/// Layers fade-in and fade-out envelopes onto a gain schedule.
///
/// Fades are absolute "set then ramp" events rather than multipliers. The
/// fade-out region replaces any automation scheduled inside it.
pub fn apply_fades(
    schedule: &mut ParamSchedule,
    start_at: f64,
    duration_s: f64,
    fade_in_s: f64,
    fade_out_s: f64,
) {
    let duration_s = duration_s.max(0.0);
    let fade_in = fade_in_s.clamp(0.0, duration_s);
    let fade_out = fade_out_s.clamp(0.0, duration_s);
    if fade_in > MIN_FADE_S {
        schedule.set_value_at(start_at, FADE_FLOOR);
        schedule.linear_ramp_to(start_at + fade_in, 1.0);
    }
    if fade_out > MIN_FADE_S {
        let fade_start = start_at + duration_s - fade_out;
        schedule.cancel_from(fade_start);
        schedule.set_value_at(fade_start, 1.0);
        schedule.linear_ramp_to(start_at + duration_s, FADE_FLOOR);
    }
}

/// Gain, pan and rate schedules for one scheduled segment of a clip.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSchedules {
    pub gain: ParamSchedule,
    pub pan: ParamSchedule,
    pub rate: ParamSchedule,
}

impl SegmentSchedules {
    pub fn build(
        gain: &AutomationCurve,
        pan: &AutomationCurve,
        rate: &AutomationCurve,
        start_at: f64,
        duration_s: f64,
        fade_in_s: f64,
        fade_out_s: f64,
    ) -> Self {
        let mut schedules = Self {
            gain: ParamSchedule::new(CurveKind::Gain.default_value()),
            pan: ParamSchedule::new(CurveKind::Pan.default_value()),
            rate: ParamSchedule::new(CurveKind::Rate.default_value()),
        };
        schedule_curve(&mut schedules.gain, gain, start_at, duration_s);
        schedule_curve(&mut schedules.pan, pan, start_at, duration_s);
        schedule_curve(&mut schedules.rate, rate, start_at, duration_s);
        apply_fades(&mut schedules.gain, start_at, duration_s, fade_in_s, fade_out_s);
        schedules
    }
}
