use std::{collections::BTreeMap, fmt, path::Path};

use serde::{Deserialize, Serialize};

use crate::{LightshowError, Result};

/// Tolerance used for every time comparison in the engine.
pub const TIME_EPSILON: f64 = 1e-6;

/// Frequency bands the feature extractor reports envelopes for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Band {
    SubBass,
    Bass,
    LowMid,
    Mid,
    HighMid,
    Presence,
    Brilliance,
}

impl Band {
    pub const ALL: [Band; 7] = [
        Band::SubBass,
        Band::Bass,
        Band::LowMid,
        Band::Mid,
        Band::HighMid,
        Band::Presence,
        Band::Brilliance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Band::SubBass => "sub-bass",
            Band::Bass => "bass",
            Band::LowMid => "low-mid",
            Band::Mid => "mid",
            Band::HighMid => "high-mid",
            Band::Presence => "presence",
            Band::Brilliance => "brilliance",
        }
    }

    /// Bands that drive percussive pulses rather than sharp flashes.
    pub fn is_low(self) -> bool {
        matches!(self, Band::SubBass | Band::Bass | Band::LowMid)
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(time, value)` point of a continuous or sparse feature curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: f64,
    pub value: f64,
}

impl Sample {
    pub fn new(time: f64, value: f64) -> Self {
        Self { time, value }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Beat {
    pub time: f64,
    #[serde(default)]
    pub is_downbeat: bool,
    #[serde(default = "full_strength")]
    pub strength: f64,
}

fn full_strength() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub start: f64,
    pub end: f64,
    pub label: String,
}

impl Section {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start - TIME_EPSILON && time < self.end - TIME_EPSILON
    }

    pub fn role(&self) -> SectionRole {
        SectionRole::from_label(&self.label)
    }
}

/// Song-structure role of a section, read from its free-form label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionRole {
    Intro,
    Verse,
    Chorus,
    Bridge,
    Outro,
    Other,
}

impl SectionRole {
    /// Case-insensitive; labels such as `Chorus 2` or `pre-chorus` match
    /// on the contained word.
    pub fn from_label(label: &str) -> Self {
        let label = label.to_ascii_lowercase();
        let has = |word: &str| label.contains(word);
        if has("intro") {
            SectionRole::Intro
        } else if has("outro") || has("ending") {
            SectionRole::Outro
        } else if has("chorus") || has("refrain") || has("drop") {
            SectionRole::Chorus
        } else if has("bridge") {
            SectionRole::Bridge
        } else if has("verse") {
            SectionRole::Verse
        } else {
            SectionRole::Other
        }
    }
}

/// Where an emotion estimate applies: from a point in time onwards, or to
/// every section carrying the given label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmotionAnchor {
    Time(f64),
    Section(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionPoint {
    pub at: EmotionAnchor,
    /// Negative to positive mood, -1..1.
    pub valence: f64,
    /// Calm to excited, 0..1.
    pub arousal: f64,
}

/// Complete, pre-computed musical feature record for one track.
///
/// Produced by the external feature extractor and never mutated by the
/// engine. Call [`AnalysisRecord::validate`] before deriving anything from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Audio file the record was computed from, referenced by the media track.
    #[serde(default)]
    pub audio_file: Option<String>,
    /// Track length in seconds.
    pub duration: f64,
    pub bpm: f64,
    pub beats: Vec<Beat>,
    pub energy_curve: Vec<Sample>,
    #[serde(default)]
    pub bands: BTreeMap<Band, Vec<Sample>>,
    #[serde(default)]
    pub transients: Vec<Sample>,
    /// Chord changes; `value` is the harmonic distance to the previous chord.
    #[serde(default)]
    pub chord_changes: Vec<Sample>,
    pub sections: Vec<Section>,
    #[serde(default)]
    pub emotion: Vec<EmotionPoint>,
}

impl AnalysisRecord {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Checks the structural invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(LightshowError::invalid_record(format!(
                "duration must be positive, got {}",
                self.duration
            )));
        }
        if !self.bpm.is_finite() || self.bpm <= 0.0 {
            return Err(LightshowError::invalid_record(format!(
                "bpm must be positive, got {}",
                self.bpm
            )));
        }

        require_non_empty("beats", self.beats.len())?;
        require_non_empty("energy_curve", self.energy_curve.len())?;
        require_non_empty("sections", self.sections.len())?;

        ensure_non_decreasing("beats", self.beats.iter().map(|beat| beat.time))?;
        ensure_unit_range("beats", self.beats.iter().map(|beat| beat.strength))?;
        check_samples("energy_curve", &self.energy_curve)?;
        check_samples("transients", &self.transients)?;
        check_samples("chord_changes", &self.chord_changes)?;
        for (band, samples) in &self.bands {
            check_samples(band.as_str(), samples)?;
        }

        for (index, section) in self.sections.iter().enumerate() {
            if !section.start.is_finite() || !section.end.is_finite() || section.start < 0.0 {
                return Err(LightshowError::invalid_record(format!(
                    "section {index} (`{}`) has non-finite or negative bounds",
                    section.label
                )));
            }
            if section.end <= section.start {
                return Err(LightshowError::invalid_record(format!(
                    "section {index} (`{}`) ends at {} before it starts at {}",
                    section.label, section.end, section.start
                )));
            }
        }
        for pair in self.sections.windows(2) {
            if pair[1].start < pair[0].end - TIME_EPSILON {
                return Err(LightshowError::invalid_record(format!(
                    "sections `{}` and `{}` overlap",
                    pair[0].label, pair[1].label
                )));
            }
        }

        let anchored_times = self.emotion.iter().filter_map(|point| match point.at {
            EmotionAnchor::Time(time) => Some(time),
            EmotionAnchor::Section(_) => None,
        });
        ensure_non_decreasing("emotion", anchored_times)?;
        for point in &self.emotion {
            if !(-1.0..=1.0).contains(&point.valence) || !(0.0..=1.0).contains(&point.arousal) {
                return Err(LightshowError::invalid_record(format!(
                    "emotion point {:?} is out of range",
                    point.at
                )));
            }
            if let EmotionAnchor::Section(label) = &point.at {
                if !self.sections.iter().any(|section| &section.label == label) {
                    return Err(LightshowError::invalid_record(format!(
                        "emotion references unknown section `{label}`"
                    )));
                }
            }
        }

        Ok(())
    }

    /// Seconds between two beats at the record's tempo.
    pub fn beat_interval(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Returns the section playing at `time`, if any.
    pub fn section_at(&self, time: f64) -> Option<&Section> {
        let index = self
            .sections
            .partition_point(|section| section.start <= time + TIME_EPSILON);
        index
            .checked_sub(1)
            .map(|index| &self.sections[index])
            .filter(|section| section.contains(time))
    }

    /// Energy at (or before) the requested time.
    pub fn energy_at(&self, time: f64) -> f64 {
        sample_at(&self.energy_curve, time).unwrap_or(0.0)
    }

    /// Band with the loudest envelope at `time`. Ties resolve to the lower band.
    pub fn dominant_band_at(&self, time: f64) -> Option<Band> {
        let mut best: Option<(Band, f64)> = None;
        for (band, samples) in &self.bands {
            if let Some(value) = sample_at(samples, time) {
                if best.map(|(_, current)| value > current).unwrap_or(true) {
                    best = Some((*band, value));
                }
            }
        }
        best.map(|(band, _)| band)
    }

    /// Resolves `(valence, arousal)` at `time`. Section-anchored entries win
    /// over time-anchored ones for the section they name.
    pub fn emotion_at(&self, time: f64) -> Option<(f64, f64)> {
        if let Some(section) = self.section_at(time) {
            let by_section = self.emotion.iter().find(
                |point| matches!(&point.at, EmotionAnchor::Section(label) if *label == section.label),
            );
            if let Some(point) = by_section {
                return Some((point.valence, point.arousal));
            }
        }

        let mut timed = self.emotion.iter().filter_map(|point| match point.at {
            EmotionAnchor::Time(at) => Some((at, point)),
            EmotionAnchor::Section(_) => None,
        });
        let first = timed.next()?;
        let mut current = first.1;
        for (at, point) in timed {
            if at > time + TIME_EPSILON {
                break;
            }
            current = point;
        }
        Some((current.valence, current.arousal))
    }
}

/// Step-hold lookup: the value of the last sample at or before `time`, or
/// the first sample when `time` precedes the curve.
pub(crate) fn sample_at(samples: &[Sample], time: f64) -> Option<f64> {
    let index = samples.partition_point(|sample| sample.time <= time + TIME_EPSILON);
    match index {
        0 => samples.first().map(|sample| sample.value),
        index => Some(samples[index - 1].value),
    }
}

fn require_non_empty(name: &str, len: usize) -> Result<()> {
    if len == 0 {
        Err(LightshowError::invalid_record(format!(
            "`{name}` must not be empty"
        )))
    } else {
        Ok(())
    }
}

fn ensure_non_decreasing(name: &str, times: impl Iterator<Item = f64>) -> Result<()> {
    let mut previous = f64::NEG_INFINITY;
    for (index, time) in times.enumerate() {
        if !time.is_finite() || time < 0.0 {
            return Err(LightshowError::invalid_record(format!(
                "`{name}` entry {index} has invalid time {time}"
            )));
        }
        if time < previous {
            return Err(LightshowError::invalid_record(format!(
                "`{name}` goes back in time at entry {index} ({time} < {previous})"
            )));
        }
        previous = time;
    }
    Ok(())
}

fn ensure_unit_range(name: &str, values: impl Iterator<Item = f64>) -> Result<()> {
    for (index, value) in values.enumerate() {
        if !(0.0..=1.0).contains(&value) {
            return Err(LightshowError::invalid_record(format!(
                "`{name}` entry {index} has value {value} outside 0..1"
            )));
        }
    }
    Ok(())
}

fn check_samples(name: &str, samples: &[Sample]) -> Result<()> {
    ensure_non_decreasing(name, samples.iter().map(|sample| sample.time))?;
    ensure_unit_range(name, samples.iter().map(|sample| sample.value))
}
