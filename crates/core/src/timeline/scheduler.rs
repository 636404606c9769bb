use std::{cmp::Ordering, collections::BTreeMap};

use serde::Serialize;
use tracing::{debug, info};

use super::{EffectCandidate, PriorityTier, Timeline, TimelineEvent, Track};
use crate::{
    config::SchedulerConfig, cue::CueClass, FixtureCatalog, FixtureGroup, FixtureKind,
    LightshowError, Result, TIME_EPSILON,
};

/// How a scheduling conflict was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// An existing lower-tier event was cut short.
    Truncated,
    /// An existing lower-tier event was removed.
    Preempted,
    /// The new event was shortened to fit before a higher-tier event.
    Shrunk,
    DroppedByHigherTier,
    DroppedEqualTier,
    DroppedDownbeatSpacing,
    DroppedTooShort,
}

impl ConflictKind {
    /// Whether the affected candidate ends up absent from the timeline.
    pub fn is_suppression(self) -> bool {
        !matches!(self, ConflictKind::Truncated | ConflictKind::Shrunk)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictRecord {
    /// Start of the affected event.
    pub time: f64,
    pub track: usize,
    pub fixture_group_id: String,
    pub origin: CueClass,
    pub tier: PriorityTier,
    pub kind: ConflictKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuppressionTally {
    pub fixture_group_id: String,
    pub cue: CueClass,
    pub count: usize,
}

/// Per-run summary of conflict resolution. Never fatal.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchedulingReport {
    pub total_candidates: usize,
    /// Candidates present in the timeline, intact or shortened.
    pub inserted: usize,
    /// Candidates absent from the timeline.
    pub suppressed: usize,
    pub truncated: usize,
    pub preempted: usize,
    pub dropped: usize,
    /// Suppressions counted by fixture group and cue kind.
    pub tallies: Vec<SuppressionTally>,
    pub conflicts: Vec<ConflictRecord>,
}

impl SchedulingReport {
    pub fn is_balanced(&self) -> bool {
        self.inserted + self.suppressed == self.total_candidates
    }

    pub fn suppressions_for(&self, fixture_group_id: &str, cue: CueClass) -> usize {
        self.tallies
            .iter()
            .find(|tally| tally.fixture_group_id == fixture_group_id && tally.cue == cue)
            .map(|tally| tally.count)
            .unwrap_or(0)
    }
}

/// Output of one scheduling pass.
#[derive(Debug, Clone)]
pub struct Schedule {
    pub timeline: Timeline,
    pub report: SchedulingReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Pending,
    Placed,
    Trimmed,
    Preempted,
    Dropped,
}

#[derive(Debug)]
struct Placement {
    candidate: usize,
    min_duration: f64,
    event: TimelineEvent,
}

/// Interval structure for one output track, keyed by start in microseconds.
#[derive(Debug, Default)]
struct Lane {
    events: BTreeMap<i64, Placement>,
    last_used: Option<u64>,
}

impl Lane {
    /// Keys of events overlapping `[start, end)`, in start order.
    fn overlapping(&self, start: f64, end: f64) -> Vec<i64> {
        let mut keys = Vec::new();
        for (key, placement) in self.events.range(..time_key(end)).rev() {
            // Only neighbouring ambient events overlap, so the first event
            // ending before `start` closes the search.
            if placement.event.end() <= start + TIME_EPSILON {
                break;
            }
            if placement.event.overlaps(start, end) {
                keys.push(*key);
            }
        }
        keys.reverse();
        keys
    }

    /// The latest event that ends at or before `start`.
    fn predecessor(&self, start: f64) -> Option<&TimelineEvent> {
        self.events
            .range(..=time_key(start))
            .rev()
            .map(|(_, placement)| &placement.event)
            .find(|event| event.end() <= start + TIME_EPSILON)
    }
}

fn time_key(seconds: f64) -> i64 {
    (seconds * 1_000_000.0).round() as i64
}

struct RunState {
    outcomes: Vec<Outcome>,
    conflicts: Vec<ConflictRecord>,
    clock: u64,
}

impl RunState {
    fn record(&mut self, event: &TimelineEvent, kind: ConflictKind) {
        debug!(
            time = event.start,
            track = event.track,
            group = %event.fixture_group_id,
            origin = %event.origin,
            ?kind,
            "scheduling conflict"
        );
        self.conflicts.push(ConflictRecord {
            time: event.start,
            track: event.track,
            fixture_group_id: event.fixture_group_id.clone(),
            origin: event.origin,
            tier: event.tier,
            kind,
        });
    }

    fn into_report(self, candidates: &[EffectCandidate]) -> SchedulingReport {
        let mut report = SchedulingReport {
            total_candidates: candidates.len(),
            ..Default::default()
        };
        let mut tallies: BTreeMap<(&str, CueClass), usize> = BTreeMap::new();

        for (candidate, outcome) in candidates.iter().zip(&self.outcomes) {
            match outcome {
                Outcome::Placed => report.inserted += 1,
                Outcome::Trimmed => {
                    report.inserted += 1;
                    report.truncated += 1;
                }
                Outcome::Preempted | Outcome::Dropped | Outcome::Pending => {
                    report.suppressed += 1;
                    if *outcome == Outcome::Preempted {
                        report.preempted += 1;
                    } else {
                        report.dropped += 1;
                    }
                    *tallies
                        .entry((candidate.fixture_group_id.as_str(), candidate.origin))
                        .or_default() += 1;
                }
            }
        }

        report.tallies = tallies
            .into_iter()
            .map(|((group, cue), count)| SuppressionTally {
                fixture_group_id: group.to_string(),
                cue,
                count,
            })
            .collect();
        report.conflicts = self.conflicts;
        report
    }
}

/// Places effect candidates onto per-fixture-group tracks.
///
/// Candidates are handled in one pass ordered by start time, then tier
/// (structural first). Overlaps resolve by tier: a higher tier truncates or
/// removes lower-tier events, a lower tier shrinks to the free gap or is
/// dropped, and within a tier the first arrival wins. The only permitted
/// overlap is the crossfade between two consecutive structural events on an
/// ambient track.
#[derive(Debug)]
pub struct Scheduler<'a> {
    catalog: &'a FixtureCatalog,
    config: &'a SchedulerConfig,
    ambient_kinds: &'a [FixtureKind],
}

impl<'a> Scheduler<'a> {
    /// `ambient_kinds` names the groups whose first lane is reserved for
    /// structural events.
    pub fn new(
        catalog: &'a FixtureCatalog,
        config: &'a SchedulerConfig,
        ambient_kinds: &'a [FixtureKind],
    ) -> Self {
        Self {
            catalog,
            config,
            ambient_kinds,
        }
    }

    pub fn schedule(&self, candidates: Vec<EffectCandidate>, duration: f64) -> Result<Schedule> {
        let layout = self.catalog.track_layout();
        let mut lanes: Vec<Lane> = layout.iter().map(|_| Lane::default()).collect();

        let mut targets = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let id = candidate.fixture_group_id.as_str();
            let target = self
                .catalog
                .group(id)
                .zip(self.catalog.first_track(id))
                .ok_or_else(|| {
                    LightshowError::msg(format!("candidate targets unknown fixture group `{id}`"))
                })?;
            targets.push(target);
        }

        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by(|&a, &b| {
            let (left, right) = (&candidates[a], &candidates[b]);
            left.start
                .total_cmp(&right.start)
                .then_with(|| right.tier.cmp(&left.tier))
                .then_with(|| targets[b].0.priority_weight.total_cmp(&targets[a].0.priority_weight))
                .then_with(|| left.origin.cmp(&right.origin))
                .then_with(|| a.cmp(&b))
        });

        let mut state = RunState {
            outcomes: vec![Outcome::Pending; candidates.len()],
            conflicts: Vec::new(),
            clock: 0,
        };
        for index in order {
            let (group, base) = targets[index];
            let track = self.route(&candidates[index], group, base, &mut lanes, &mut state.clock);
            self.insert(
                index,
                &candidates[index],
                group,
                track,
                base,
                &mut lanes[track],
                &mut state,
                duration,
            );
        }

        let tracks = layout
            .into_iter()
            .zip(lanes)
            .map(|(slot, lane)| Track {
                index: slot.index,
                fixture_group_id: slot.group_id,
                lane: slot.lane,
                kind: slot.kind,
                supports_movement: slot.supports_movement,
                events: lane
                    .events
                    .into_values()
                    .map(|placement| placement.event)
                    .collect(),
            })
            .collect();

        let report = state.into_report(&candidates);
        info!(
            candidates = report.total_candidates,
            inserted = report.inserted,
            suppressed = report.suppressed,
            truncated = report.truncated,
            "scheduling finished"
        );

        Ok(Schedule {
            timeline: Timeline::new(duration, tracks),
            report,
        })
    }

    fn is_ambient(&self, group: &FixtureGroup) -> bool {
        self.ambient_kinds.contains(&group.kind)
    }

    /// Structural events own lane 0; everything else goes to the least
    /// recently used lane, skipping the ambient lane when the group has more.
    fn route(
        &self,
        candidate: &EffectCandidate,
        group: &FixtureGroup,
        base: usize,
        lanes: &mut [Lane],
        clock: &mut u64,
    ) -> usize {
        let lane = if candidate.tier == PriorityTier::Structural {
            0
        } else if let Some(hint) = candidate
            .track_hint
            .filter(|hint| *hint < group.concurrency)
        {
            hint
        } else {
            let first = if self.is_ambient(group) && group.concurrency > 1 {
                1
            } else {
                0
            };
            (first..group.concurrency)
                .min_by_key(|lane| lanes[base + lane].last_used)
                .unwrap_or(first)
        };

        *clock += 1;
        lanes[base + lane].last_used = Some(*clock);
        base + lane
    }

    fn interrupts(&self, origin: CueClass, tier: PriorityTier, intensity: f64) -> bool {
        origin == CueClass::Transient
            && tier == PriorityTier::Dynamic
            && self
                .config
                .transient_interrupt
                .map(|threshold| intensity >= threshold - TIME_EPSILON)
                .unwrap_or(false)
    }

    /// Tier comparison, with strong transients outranking rhythmic events.
    fn compare(&self, incoming: &EffectCandidate, existing: &TimelineEvent) -> Ordering {
        let base = incoming.tier.cmp(&existing.tier);
        if base == Ordering::Less
            && existing.tier == PriorityTier::Rhythmic
            && self.interrupts(incoming.origin, incoming.tier, incoming.intensity)
        {
            return Ordering::Greater;
        }
        if base == Ordering::Greater
            && incoming.tier == PriorityTier::Rhythmic
            && self.interrupts(existing.origin, existing.tier, existing.intensity)
        {
            return Ordering::Less;
        }
        base
    }

    fn is_crossfade(&self, existing: &TimelineEvent, start: f64, end: f64) -> bool {
        existing.tier == PriorityTier::Structural
            && existing.start < start - TIME_EPSILON
            && existing.end() - start <= self.config.crossfade_window + TIME_EPSILON
            && existing.end() <= end + TIME_EPSILON
    }

    #[allow(clippy::too_many_arguments)]
    fn insert(
        &self,
        index: usize,
        candidate: &EffectCandidate,
        group: &FixtureGroup,
        track: usize,
        base: usize,
        lane: &mut Lane,
        state: &mut RunState,
        duration: f64,
    ) {
        let start = candidate.start;
        let clipped = candidate.end().min(duration);
        let mut end = clipped;
        let mut event = TimelineEvent {
            track,
            fixture_group_id: candidate.fixture_group_id.clone(),
            start,
            duration: candidate.duration,
            color: candidate.color,
            effect: candidate.effect,
            intensity: candidate.intensity,
            tier: candidate.tier,
            origin: candidate.origin,
            fade_in: 0.0,
            fade_out: 0.0,
        };
        let floor = group.min_event_duration.min(candidate.duration) - TIME_EPSILON;

        let reject = |state: &mut RunState, event: &TimelineEvent, kind| {
            state.outcomes[index] = Outcome::Dropped;
            state.record(event, kind);
        };

        if end - start < floor {
            reject(state, &event, ConflictKind::DroppedTooShort);
            return;
        }

        if candidate.origin == CueClass::Downbeat {
            if let Some(previous) = lane.predecessor(start) {
                if start - previous.end() < group.min_event_duration - TIME_EPSILON {
                    reject(state, &event, ConflictKind::DroppedDownbeatSpacing);
                    return;
                }
            }
        }

        let ambient_lane =
            candidate.tier == PriorityTier::Structural && self.is_ambient(group) && track == base;
        let mut partner = None;
        let mut preempt = Vec::new();

        for key in lane.overlapping(start, end) {
            let existing = &lane.events[&key].event;
            if existing.start >= end - TIME_EPSILON {
                break;
            }
            if ambient_lane && partner.is_none() && self.is_crossfade(existing, start, end) {
                partner = Some(key);
                continue;
            }
            match self.compare(candidate, existing) {
                Ordering::Greater => preempt.push(key),
                Ordering::Less if existing.start > start + TIME_EPSILON => {
                    end = end.min(existing.start);
                }
                Ordering::Less => {
                    reject(state, &event, ConflictKind::DroppedByHigherTier);
                    return;
                }
                Ordering::Equal => {
                    reject(state, &event, ConflictKind::DroppedEqualTier);
                    return;
                }
            }
        }

        if end - start < floor {
            reject(state, &event, ConflictKind::DroppedByHigherTier);
            return;
        }

        for key in preempt {
            let Some(mut placed) = lane.events.remove(&key) else {
                continue;
            };
            if !placed.event.overlaps(start, end) {
                lane.events.insert(key, placed);
                continue;
            }
            let fragment = start - placed.event.start;
            if fragment > TIME_EPSILON && fragment >= placed.min_duration - TIME_EPSILON {
                placed.event.duration = fragment;
                state.outcomes[placed.candidate] = Outcome::Trimmed;
                state.record(&placed.event, ConflictKind::Truncated);
                lane.events.insert(key, placed);
            } else {
                state.outcomes[placed.candidate] = Outcome::Preempted;
                state.record(&placed.event, ConflictKind::Preempted);
            }
        }

        if let Some(previous) = partner.and_then(|key| lane.events.get_mut(&key)) {
            let overlap = previous.event.end() - start;
            previous.event.fade_out = overlap;
            event.fade_in = overlap;
        }

        event.duration = end - start;
        if end < clipped - TIME_EPSILON {
            state.outcomes[index] = Outcome::Trimmed;
            state.record(&event, ConflictKind::Shrunk);
        } else {
            state.outcomes[index] = Outcome::Placed;
        }
        lane.events.insert(
            time_key(start),
            Placement {
                candidate: index,
                min_duration: group.min_event_duration,
                event,
            },
        );
    }
}
