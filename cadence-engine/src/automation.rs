//! Automation Scheduler (C5, §4.5): evaluates parameter automation curves
//! at a fixed high rate (100 Hz) while the transport plays, and schedules
//! a short smoothing ramp into each target's parameter so the value stays
//! continuous (no zipper noise) — except `step` breakpoints, which are
//! applied as an exact set.

use std::collections::{HashMap, HashSet};

use cadence_types::{AutomationLane, AutomationTarget, AutomationTargetId, CurveType};

/// Length of the smoothing ramp scheduled toward a freshly-evaluated
/// automation value (§4.5).
const SMOOTHING_RAMP_SECONDS: f64 = 0.010;

/// One parameter update the tick driver wants applied to the audio graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutomationUpdate {
    pub target: AutomationTarget,
    pub value: f32,
    pub at_seconds: f64,
    /// `None` for a `step` breakpoint (apply immediately); `Some(duration)`
    /// for every other curve (ramp over `duration` seconds).
    pub ramp_seconds: Option<f64>,
}

pub struct AutomationScheduler {
    lanes: HashMap<AutomationTargetId, AutomationLane>,
    /// Targets whose lane currently has no resolvable host-side parameter;
    /// skipped on tick until the target reappears (§4.5 tombstoning).
    tombstoned: HashSet<AutomationTargetId>,
}

impl AutomationScheduler {
    pub fn new() -> Self {
        Self {
            lanes: HashMap::new(),
            tombstoned: HashSet::new(),
        }
    }

    pub fn set_lane(&mut self, lane: AutomationLane) {
        self.tombstoned.remove(&lane.target.param_id);
        self.lanes.insert(lane.target.param_id, lane);
    }

    pub fn remove_lane(&mut self, param_id: AutomationTargetId) {
        self.lanes.remove(&param_id);
        self.tombstoned.remove(&param_id);
    }

    /// Marks a target as unresolvable; `tick` will silently skip it until
    /// [`Self::resolve_target`] is called (e.g. on instrument reload).
    pub fn tombstone(&mut self, param_id: AutomationTargetId) {
        if self.tombstoned.insert(param_id) {
            log::warn!(target: "automation", "tombstoning automation target {param_id}: parameter not found");
        }
    }

    pub fn resolve_target(&mut self, param_id: AutomationTargetId) {
        self.tombstoned.remove(&param_id);
    }

    pub fn is_tombstoned(&self, param_id: AutomationTargetId) -> bool {
        self.tombstoned.contains(&param_id)
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Evaluates every non-tombstoned, enabled lane at `now_tick`, returning
    /// the updates the caller should apply to the audio graph at
    /// `audio_now_seconds`.
    pub fn tick(&self, now_tick: u32, audio_now_seconds: f64) -> Vec<AutomationUpdate> {
        let mut updates = Vec::with_capacity(self.lanes.len());
        for lane in self.lanes.values() {
            if !lane.enabled || self.tombstoned.contains(&lane.target.param_id) {
                continue;
            }
            let Some(value) = lane.value_at(now_tick) else {
                continue;
            };
            let curve_at_point = curve_governing(lane, now_tick);
            let ramp_seconds = match curve_at_point {
                CurveType::Step => None,
                _ => Some(SMOOTHING_RAMP_SECONDS),
            };
            updates.push(AutomationUpdate {
                target: lane.target,
                value,
                at_seconds: audio_now_seconds,
                ramp_seconds,
            });
        }
        updates
    }
}

impl Default for AutomationScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// The curve governing interpolation leading up to `tick` is the curve
/// tagged on the breakpoint the segment starts from.
fn curve_governing(lane: &AutomationLane, tick: u32) -> CurveType {
    lane.points
        .iter()
        .rev()
        .find(|p| p.tick <= tick)
        .map(|p| p.curve)
        .unwrap_or(CurveType::Linear)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_types::{AutomationPoint, InstrumentId};

    fn target() -> AutomationTarget {
        AutomationTarget::instrument(InstrumentId::new(1), AutomationTargetId::new(1))
    }

    #[test]
    fn tick_produces_an_update_per_enabled_lane() {
        let mut scheduler = AutomationScheduler::new();
        let mut lane = AutomationLane::new(target());
        lane.add_point(AutomationPoint::new(0, 0.0));
        lane.add_point(AutomationPoint::new(100, 1.0));
        scheduler.set_lane(lane);

        let updates = scheduler.tick(50, 1.0);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].value, 0.5);
        assert_eq!(updates[0].ramp_seconds, Some(SMOOTHING_RAMP_SECONDS));
    }

    #[test]
    fn step_breakpoints_have_no_ramp() {
        let mut scheduler = AutomationScheduler::new();
        let mut lane = AutomationLane::new(target());
        lane.add_point(AutomationPoint::new(0, 0.0).with_curve(CurveType::Step));
        lane.add_point(AutomationPoint::new(100, 1.0));
        scheduler.set_lane(lane);

        let updates = scheduler.tick(50, 1.0);
        assert_eq!(updates[0].ramp_seconds, None);
    }

    #[test]
    fn disabled_lane_produces_no_update() {
        let mut scheduler = AutomationScheduler::new();
        let mut lane = AutomationLane::new(target());
        lane.enabled = false;
        lane.add_point(AutomationPoint::new(0, 0.5));
        scheduler.set_lane(lane);

        assert!(scheduler.tick(0, 0.0).is_empty());
    }

    #[test]
    fn tombstoned_target_is_skipped_until_resolved() {
        let mut scheduler = AutomationScheduler::new();
        let mut lane = AutomationLane::new(target());
        lane.add_point(AutomationPoint::new(0, 0.5));
        scheduler.set_lane(lane);

        scheduler.tombstone(AutomationTargetId::new(1));
        assert!(scheduler.tick(0, 0.0).is_empty());

        scheduler.resolve_target(AutomationTargetId::new(1));
        assert_eq!(scheduler.tick(0, 0.0).len(), 1);
    }

    #[test]
    fn remove_lane_clears_both_lane_and_tombstone() {
        let mut scheduler = AutomationScheduler::new();
        let mut lane = AutomationLane::new(target());
        lane.add_point(AutomationPoint::new(0, 0.5));
        scheduler.set_lane(lane);
        scheduler.remove_lane(AutomationTargetId::new(1));
        assert_eq!(scheduler.lane_count(), 0);
    }
}
