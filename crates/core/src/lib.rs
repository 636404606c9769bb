//! Core library for the lightshow timeline generator.
//!
//! Turns a pre-computed musical analysis of one song into a lighting
//! timeline for a fixed installation. Each module owns one stage of the
//! pipeline: cue extraction, effect selection, scheduling and export to the
//! lighting controller's timeline format. [`generate`] runs the stages in
//! order; the stages are public for callers that need them separately.

pub mod analysis;
pub mod config;
pub mod cue;
pub mod engine;
pub mod error;
pub mod export;
pub mod fixtures;
pub mod scene;
pub mod selector;
pub mod timeline;

pub use analysis::{AnalysisRecord, Band, Beat, Section, SectionRole, TIME_EPSILON};
pub use config::GenerationConfig;
pub use cue::{Cue, CueClass, CueExtractor, CueKind};
pub use engine::{generate, Generation};
pub use error::{LightshowError, Result};
pub use export::{format_timestamp, parse_document, parse_timestamp, TimelineWriter};
pub use fixtures::{FixtureCatalog, FixtureGroup, FixtureKind};
pub use scene::SceneTable;
pub use selector::{EffectSelector, PaletteState};
pub use timeline::{
    Color, ConflictKind, EffectCandidate, EffectType, PriorityTier, Schedule, Scheduler,
    SchedulingReport, Timeline, TimelineEvent, Track,
};
