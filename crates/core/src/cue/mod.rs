use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    analysis::{AnalysisRecord, Band, Section},
    config::CueConfig,
    PriorityTier, TIME_EPSILON,
};

/// Fieldless cue kind, used for tie-breaking and report keys.
///
/// Declared in tie-break order: at identical timestamps cues sort
/// structural, harmonic, rhythmic (downbeat before beat), dynamic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CueClass {
    SectionBoundary,
    ChordChange,
    Downbeat,
    Beat,
    Transient,
    EnergyCross,
    BandPeak,
}

impl CueClass {
    pub fn tier(self) -> PriorityTier {
        match self {
            CueClass::SectionBoundary => PriorityTier::Structural,
            CueClass::ChordChange => PriorityTier::Harmonic,
            CueClass::Downbeat | CueClass::Beat => PriorityTier::Rhythmic,
            CueClass::Transient | CueClass::EnergyCross | CueClass::BandPeak => {
                PriorityTier::Dynamic
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CueClass::SectionBoundary => "section_boundary",
            CueClass::ChordChange => "chord_change",
            CueClass::Downbeat => "downbeat",
            CueClass::Beat => "beat",
            CueClass::Transient => "transient",
            CueClass::EnergyCross => "energy_cross",
            CueClass::BandPeak => "band_peak",
        }
    }
}

impl fmt::Display for CueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyDirection {
    Rising,
    Falling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyLevel {
    Low,
    Medium,
    High,
}

/// What triggered a cue, with the data each trigger carries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CueKind {
    Beat,
    Downbeat,
    Transient,
    ChordChange {
        distance: f64,
    },
    SectionBoundary {
        duration: f64,
        /// Length of the directly preceding section, when the two touch.
        previous_duration: Option<f64>,
    },
    EnergyCross {
        direction: EnergyDirection,
        level: EnergyLevel,
    },
    /// Local maximum of one frequency band's envelope.
    BandPeak {
        band: Band,
    },
}

impl CueKind {
    pub fn class(&self) -> CueClass {
        match self {
            CueKind::Beat => CueClass::Beat,
            CueKind::Downbeat => CueClass::Downbeat,
            CueKind::Transient => CueClass::Transient,
            CueKind::ChordChange { .. } => CueClass::ChordChange,
            CueKind::SectionBoundary { .. } => CueClass::SectionBoundary,
            CueKind::EnergyCross { .. } => CueClass::EnergyCross,
            CueKind::BandPeak { .. } => CueClass::BandPeak,
        }
    }
}

/// Mood bucket keyed by valence sign and arousal tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmotionQuadrant {
    EnergeticHappy,
    PeacefulHappy,
    AggressiveSad,
    Melancholic,
}

impl EmotionQuadrant {
    pub fn from_emotion(valence: f64, arousal: f64, arousal_split: f64) -> Self {
        match (valence >= 0.0, arousal >= arousal_split) {
            (true, true) => EmotionQuadrant::EnergeticHappy,
            (true, false) => EmotionQuadrant::PeacefulHappy,
            (false, true) => EmotionQuadrant::AggressiveSad,
            (false, false) => EmotionQuadrant::Melancholic,
        }
    }
}

/// Musical surroundings of a cue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CueContext {
    pub section: Option<String>,
    pub dominant_band: Option<Band>,
    pub quadrant: EmotionQuadrant,
    pub energy: f64,
}

/// A discrete, timestamped trigger derived from the analysis record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cue {
    #[serde(flatten)]
    pub kind: CueKind,
    pub time: f64,
    pub strength: f64,
    pub context: CueContext,
}

impl Cue {
    pub fn class(&self) -> CueClass {
        self.kind.class()
    }

    pub fn tier(&self) -> PriorityTier {
        self.class().tier()
    }
}

/// Turns an [`AnalysisRecord`] into one time-ordered cue sequence.
#[derive(Debug, Clone)]
pub struct CueExtractor<'a> {
    config: &'a CueConfig,
}

impl<'a> CueExtractor<'a> {
    pub fn new(config: &'a CueConfig) -> Self {
        Self { config }
    }

    /// Pure and deterministic: identical records yield identical cues.
    pub fn extract(&self, record: &AnalysisRecord) -> Vec<Cue> {
        let mut cues = Vec::new();

        for beat in &record.beats {
            cues.push(self.cue(record, CueKind::Beat, beat.time, beat.strength));
            if beat.is_downbeat {
                cues.push(self.cue(record, CueKind::Downbeat, beat.time, beat.strength));
            }
        }

        for transient in &record.transients {
            if transient.value > self.config.transient_floor {
                cues.push(self.cue(record, CueKind::Transient, transient.time, transient.value));
            }
        }

        for change in &record.chord_changes {
            if change.value > self.config.chord_change_floor {
                let kind = CueKind::ChordChange {
                    distance: change.value,
                };
                cues.push(self.cue(record, kind, change.time, change.value));
            }
        }

        let mut previous: Option<&Section> = None;
        for section in &record.sections {
            let kind = CueKind::SectionBoundary {
                duration: section.duration(),
                previous_duration: previous
                    .filter(|prev| prev.end >= section.start - TIME_EPSILON)
                    .map(Section::duration),
            };
            previous = Some(section);
            let mut cue = self.cue(record, kind, section.start, 1.0);
            cue.context.section = Some(section.label.clone());
            cues.push(cue);
        }

        self.energy_crossings(record, &mut cues);
        self.band_peaks(record, &mut cues);

        cues.sort_by(|a, b| {
            a.time
                .total_cmp(&b.time)
                .then_with(|| a.class().cmp(&b.class()))
        });
        cues
    }

    fn level(&self, energy: f64) -> EnergyLevel {
        if energy >= self.config.energy_high {
            EnergyLevel::High
        } else if energy < self.config.energy_low {
            EnergyLevel::Low
        } else {
            EnergyLevel::Medium
        }
    }

    /// One cue per change of energy level, at the first sample of the new level.
    fn energy_crossings(&self, record: &AnalysisRecord, cues: &mut Vec<Cue>) {
        let mut samples = record.energy_curve.iter();
        let Some(first) = samples.next() else {
            return;
        };

        let mut current = self.level(first.value);
        for sample in samples {
            let level = self.level(sample.value);
            if level == current {
                continue;
            }
            let direction = if level > current {
                EnergyDirection::Rising
            } else {
                EnergyDirection::Falling
            };
            let kind = CueKind::EnergyCross { direction, level };
            cues.push(self.cue(record, kind, sample.time, sample.value));
            current = level;
        }
    }

    /// A sample above the peak floor that is higher than the nearest
    /// different value before it and than the sample after it. A plateau
    /// yields its last sample.
    fn band_peaks(&self, record: &AnalysisRecord, cues: &mut Vec<Cue>) {
        for (band, samples) in &record.bands {
            for (i, sample) in samples.iter().enumerate() {
                if sample.value <= self.config.band_peak_floor {
                    continue;
                }
                let rising = samples[..i]
                    .iter()
                    .rev()
                    .find(|previous| previous.value != sample.value)
                    .map_or(true, |previous| sample.value > previous.value);
                let falling = samples
                    .get(i + 1)
                    .map_or(true, |next| next.value < sample.value);
                if rising && falling {
                    let kind = CueKind::BandPeak { band: *band };
                    cues.push(self.cue(record, kind, sample.time, sample.value));
                }
            }
        }
    }

    fn cue(&self, record: &AnalysisRecord, kind: CueKind, time: f64, strength: f64) -> Cue {
        let energy = record.energy_at(time);
        let (valence, arousal) = record.emotion_at(time).unwrap_or((0.0, energy));
        Cue {
            kind,
            time,
            strength: strength.clamp(0.0, 1.0),
            context: CueContext {
                section: record.section_at(time).map(|section| section.label.clone()),
                dominant_band: record.dominant_band_at(time),
                quadrant: EmotionQuadrant::from_emotion(valence, arousal, self.config.arousal_split),
                energy,
            },
        }
    }
}
