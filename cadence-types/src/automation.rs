use serde::{Deserialize, Serialize};

use crate::ids::{AutomationTargetId, InstrumentId};

/// The shape of interpolation applied between two adjacent breakpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurveType {
    Linear,
    Exponential,
    Logarithmic,
    EaseIn,
    EaseOut,
    EaseInOut,
    /// Held at the left breakpoint's value until the next breakpoint, then
    /// jumps. Applied as an exact set rather than a ramp (§4.5).
    Step,
}

impl Default for CurveType {
    fn default() -> Self {
        CurveType::Linear
    }
}

fn interpolate(from: f32, to: f32, t: f32, curve: CurveType) -> f32 {
    let t = t.clamp(0.0, 1.0);
    match curve {
        CurveType::Linear => from + (to - from) * t,
        CurveType::Exponential => {
            if from.abs() < 1e-6 || (from > 0.0) != (to > 0.0) {
                from + (to - from) * t
            } else {
                from * (to / from).powf(t)
            }
        }
        CurveType::Logarithmic => {
            let shaped = (1.0 + 9.0 * t).log10();
            from + (to - from) * shaped
        }
        CurveType::EaseIn => from + (to - from) * t * t,
        CurveType::EaseOut => from + (to - from) * (1.0 - (1.0 - t) * (1.0 - t)),
        CurveType::EaseInOut => from + (to - from) * (t * t * (3.0 - 2.0 * t)),
        CurveType::Step => from,
    }
}

/// One breakpoint in an automation lane. `value` is normalized 0.0..=1.0;
/// `AutomationLane::min_value`/`max_value` map it to the parameter's native
/// range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutomationPoint {
    pub tick: u32,
    pub value: f32,
    pub curve: CurveType,
}

impl AutomationPoint {
    pub fn new(tick: u32, value: f32) -> Self {
        Self {
            tick,
            value: value.clamp(0.0, 1.0),
            curve: CurveType::Linear,
        }
    }

    pub fn with_curve(mut self, curve: CurveType) -> Self {
        self.curve = curve;
        self
    }
}

/// Identifies what an automation lane drives: a specific parameter on a
/// specific instrument (or, with `instrument_id: None`, a global/bus-level
/// parameter the host resolves itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationTarget {
    pub instrument_id: Option<InstrumentId>,
    pub param_id: AutomationTargetId,
}

impl AutomationTarget {
    pub fn instrument(instrument_id: InstrumentId, param_id: AutomationTargetId) -> Self {
        Self {
            instrument_id: Some(instrument_id),
            param_id,
        }
    }

    pub fn global(param_id: AutomationTargetId) -> Self {
        Self {
            instrument_id: None,
            param_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationLane {
    pub target: AutomationTarget,
    pub points: Vec<AutomationPoint>,
    pub enabled: bool,
    pub min_value: f32,
    pub max_value: f32,
}

impl AutomationLane {
    pub fn new(target: AutomationTarget) -> Self {
        Self {
            target,
            points: Vec::new(),
            enabled: true,
            min_value: 0.0,
            max_value: 1.0,
        }
    }

    /// Inserts a point keeping `points` sorted by tick; replaces an existing
    /// point at the same tick rather than duplicating it.
    pub fn add_point(&mut self, point: AutomationPoint) {
        match self.points.binary_search_by_key(&point.tick, |p| p.tick) {
            Ok(idx) => self.points[idx] = point,
            Err(idx) => self.points.insert(idx, point),
        }
    }

    pub fn remove_point_at(&mut self, tick: u32) {
        self.points.retain(|p| p.tick != tick);
    }

    /// Evaluates the lane at `tick`, mapped into the parameter's native
    /// `min_value..=max_value` range. `None` if the lane has no points.
    pub fn value_at(&self, tick: u32) -> Option<f32> {
        if self.points.is_empty() {
            return None;
        }
        let normalized = self.normalized_value_at(tick);
        Some(self.min_value + (self.max_value - self.min_value) * normalized)
    }

    fn normalized_value_at(&self, tick: u32) -> f32 {
        if tick <= self.points[0].tick {
            return self.points[0].value;
        }
        let last = self.points.len() - 1;
        if tick >= self.points[last].tick {
            return self.points[last].value;
        }
        // partition_point finds the first point strictly after `tick`;
        // the bracket is (idx-1, idx).
        let idx = self.points.partition_point(|p| p.tick <= tick);
        let a = &self.points[idx - 1];
        let b = &self.points[idx];
        let span = (b.tick - a.tick) as f32;
        let t = if span > 0.0 {
            (tick - a.tick) as f32 / span
        } else {
            0.0
        };
        interpolate(a.value, b.value, t, a.curve)
    }
}
