use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{cue::CueClass, FixtureKind, TIME_EPSILON};

mod scheduler;

pub use scheduler::{
    ConflictKind, ConflictRecord, Schedule, Scheduler, SchedulingReport, SuppressionTally,
};

/// Colours the scene library provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Red,
    Orange,
    Yellow,
    Green,
    Blue,
    Azure,
    Purple,
    ColdWhite,
    WarmWhite,
}

impl Color {
    pub fn as_str(self) -> &'static str {
        match self {
            Color::Red => "red",
            Color::Orange => "orange",
            Color::Yellow => "yellow",
            Color::Green => "green",
            Color::Blue => "blue",
            Color::Azure => "azure",
            Color::Purple => "purple",
            Color::ColdWhite => "cold_white",
            Color::WarmWhite => "warm_white",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectType {
    Static,
    Fade,
    Pulse,
    Flash,
    Strobe,
}

impl EffectType {
    pub fn as_str(self) -> &'static str {
        match self {
            EffectType::Static => "static",
            EffectType::Fade => "fade",
            EffectType::Pulse => "pulse",
            EffectType::Flash => "flash",
            EffectType::Strobe => "strobe",
        }
    }
}

impl fmt::Display for EffectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conflict resolution class. Declared lowest first so that
/// `Structural > Harmonic > Rhythmic > Dynamic` under `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
    Dynamic,
    Rhythmic,
    Harmonic,
    Structural,
}

impl fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PriorityTier::Dynamic => "dynamic",
            PriorityTier::Rhythmic => "rhythmic",
            PriorityTier::Harmonic => "harmonic",
            PriorityTier::Structural => "structural",
        };
        f.write_str(name)
    }
}

/// A proposed lighting effect before conflict resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectCandidate {
    pub fixture_group_id: String,
    /// Preferred lane within the group; `None` lets the scheduler pick.
    pub track_hint: Option<usize>,
    pub color: Color,
    pub effect: EffectType,
    pub start: f64,
    pub duration: f64,
    pub intensity: f64,
    pub tier: PriorityTier,
    /// Cue kind the candidate was derived from.
    pub origin: CueClass,
}

impl EffectCandidate {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// A scheduled effect on one output track.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEvent {
    pub track: usize,
    pub fixture_group_id: String,
    pub start: f64,
    pub duration: f64,
    pub color: Color,
    pub effect: EffectType,
    pub intensity: f64,
    pub tier: PriorityTier,
    pub origin: CueClass,
    /// Seconds of ramp-in shared with a preceding ambient event.
    pub fade_in: f64,
    /// Seconds of ramp-out shared with a following ambient event.
    pub fade_out: f64,
}

impl TimelineEvent {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    pub fn overlaps(&self, start: f64, end: f64) -> bool {
        self.start < end - TIME_EPSILON && self.end() > start + TIME_EPSILON
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    pub index: usize,
    pub fixture_group_id: String,
    pub lane: usize,
    pub kind: FixtureKind,
    pub supports_movement: bool,
    pub events: Vec<TimelineEvent>,
}

/// Final per-track event sequences of one generation run.
///
/// Tracks are ordered by index and events within a track by start time.
/// Only consecutive ambient events may overlap, by at most the crossfade
/// window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Timeline {
    duration: f64,
    tracks: Vec<Track>,
}

impl Timeline {
    pub(crate) fn new(duration: f64, tracks: Vec<Track>) -> Self {
        Self { duration, tracks }
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn events(&self) -> impl Iterator<Item = &TimelineEvent> {
        self.tracks.iter().flat_map(|track| track.events.iter())
    }

    pub fn event_count(&self) -> usize {
        self.tracks.iter().map(|track| track.events.len()).sum()
    }

    /// Events of one fixture group across all of its lanes.
    pub fn group_events<'a>(&'a self, group_id: &'a str) -> impl Iterator<Item = &'a TimelineEvent> {
        self.tracks
            .iter()
            .filter(move |track| track.fixture_group_id == group_id)
            .flat_map(|track| track.events.iter())
    }
}
