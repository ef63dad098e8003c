use serde::{Deserialize, Serialize};

/// Parameter driven by an automation curve. The kind owns the clamp range and
/// the flat default so callers never supply their own constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CurveKind {
    Gain,
    Pan,
    Rate,
}

impl CurveKind {
    /// Inclusive value domain.
    pub fn range(self) -> (f64, f64) {
        match self {
            CurveKind::Gain => (0.0, 1.5),
            CurveKind::Pan => (-1.0, 1.0),
            CurveKind::Rate => (0.5, 2.0),
        }
    }

    pub fn default_value(self) -> f64 {
        match self {
            CurveKind::Gain | CurveKind::Rate => 1.0,
            CurveKind::Pan => 0.0,
        }
    }

    pub fn clamp(self, value: f64) -> f64 {
        let (min, max) = self.range();
        value.clamp(min, max)
    }
}

/// Control point at normalized clip time `t` in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutomationPoint {
    pub t: f64,
    pub v: f64,
}

impl AutomationPoint {
    pub fn new(t: f64, v: f64) -> Self {
        Self { t, v }
    }
}

/// Ordered control points of one clip parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationCurve {
    kind: CurveKind,
    points: Vec<AutomationPoint>,
}

impl AutomationCurve {
    /// Two-point flat curve at the kind's default.
    pub fn flat(kind: CurveKind) -> Self {
        let v = kind.default_value();
        Self {
            kind,
            points: vec![AutomationPoint::new(0.0, v), AutomationPoint::new(1.0, v)],
        }
    }

    /// Builds a curve, clamping every point into its domain and sorting by
    /// time. An empty list falls back to [`AutomationCurve::flat`].
    pub fn from_points(kind: CurveKind, points: impl IntoIterator<Item = AutomationPoint>) -> Self {
        let mut points: Vec<AutomationPoint> = points
            .into_iter()
            .map(|p| AutomationPoint::new(p.t.clamp(0.0, 1.0), kind.clamp(p.v)))
            .collect();
        if points.is_empty() {
            return Self::flat(kind);
        }
        points.sort_by(|a, b| a.t.total_cmp(&b.t));
        Self { kind, points }
    }

    pub fn kind(&self) -> CurveKind {
        self.kind
    }

    pub fn points(&self) -> &[AutomationPoint] {
        &self.points
    }

    /// Inserts a point and returns its index after sorting.
    pub fn insert_point(&mut self, t: f64, v: f64) -> usize {
        let point = AutomationPoint::new(t.clamp(0.0, 1.0), self.kind.clamp(v));
        let index = self.points.partition_point(|p| p.t <= point.t);
        self.points.insert(index, point);
        index
    }

    /// Moves an existing point, returning its new index.
    pub fn move_point(&mut self, index: usize, t: f64, v: f64) -> Option<usize> {
        if index >= self.points.len() {
            return None;
        }
        self.points.remove(index);
        Some(self.insert_point(t, v))
    }

    /// Removes a point. The last remaining point is never removed.
    pub fn remove_point(&mut self, index: usize) -> bool {
        if self.points.len() <= 1 || index >= self.points.len() {
            return false;
        }
        self.points.remove(index);
        true
    }
}
