use std::{collections::BTreeMap, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    analysis::SectionRole, cue::EmotionQuadrant, Band, Color, EffectType, FixtureKind,
    LightshowError, Result,
};

/// Top-level configuration for one generation run.
///
/// Every field has a default, so a JSON file only needs to name the values it
/// overrides. The value is never mutated by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub cues: CueConfig,
    pub selector: SelectorConfig,
    pub palette: PaletteConfig,
    pub scheduler: SchedulerConfig,
    pub output: OutputConfig,
}

impl GenerationConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let cues = &self.cues;
        if !(0.0..=1.0).contains(&cues.energy_low)
            || !(0.0..=1.0).contains(&cues.energy_high)
            || cues.energy_low >= cues.energy_high
        {
            return Err(LightshowError::msg(format!(
                "energy thresholds must satisfy 0 <= low < high <= 1, got {} and {}",
                cues.energy_low, cues.energy_high
            )));
        }

        let selector = &self.selector;
        if !(selector.chord_duration > 0.0)
            || !(selector.dynamic_min_duration > 0.0)
            || selector.dynamic_max_duration < selector.dynamic_min_duration
        {
            return Err(LightshowError::msg(
                "selector durations must be positive and ordered",
            ));
        }
        if selector.burst_stagger < 0.0 {
            return Err(LightshowError::msg("burst stagger must not be negative"));
        }
        selector.sections.validate()?;
        if self.scheduler.crossfade_window < 0.0 {
            return Err(LightshowError::msg("crossfade window must not be negative"));
        }

        self.palette.validate()
    }
}

/// Sensitivity of the cue extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CueConfig {
    /// Only transients stronger than this produce a cue.
    pub transient_floor: f64,
    /// Only chord changes with a larger harmonic distance produce a cue.
    pub chord_change_floor: f64,
    /// Band envelope maxima must exceed this to produce a peak cue.
    pub band_peak_floor: f64,
    pub energy_high: f64,
    pub energy_low: f64,
    /// Arousal at or above this is the "high" half of the emotion quadrants.
    pub arousal_split: f64,
}

impl Default for CueConfig {
    fn default() -> Self {
        Self {
            transient_floor: 0.3,
            chord_change_floor: 0.15,
            band_peak_floor: 0.8,
            energy_high: 0.7,
            energy_low: 0.3,
            arousal_split: 0.5,
        }
    }
}

/// Fixture kinds each selection rule emits candidates for. An empty list
/// disables the rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleTargets {
    pub ambient: Vec<FixtureKind>,
    pub harmonic: Vec<FixtureKind>,
    pub percussive: Vec<FixtureKind>,
    pub downbeat_snap: Vec<FixtureKind>,
    pub dynamic: Vec<FixtureKind>,
    /// Kinds that answer peaks of each frequency band.
    pub bands: BTreeMap<Band, Vec<FixtureKind>>,
}

impl Default for RuleTargets {
    fn default() -> Self {
        Self {
            ambient: vec![FixtureKind::CeilingSpot, FixtureKind::LedAccent],
            harmonic: vec![FixtureKind::MovingHead],
            percussive: vec![FixtureKind::WallSpot, FixtureKind::LedStrip],
            downbeat_snap: vec![FixtureKind::MovingHead],
            dynamic: vec![FixtureKind::LedAccent, FixtureKind::Uv],
            bands: BTreeMap::from([
                (Band::SubBass, vec![FixtureKind::LedAccent]),
                (Band::Bass, vec![FixtureKind::LedStrip]),
                (Band::LowMid, vec![FixtureKind::WallSpot]),
                (Band::Presence, vec![FixtureKind::Uv]),
                (Band::Brilliance, vec![FixtureKind::MovingHead]),
            ]),
        }
    }
}

impl RuleTargets {
    /// `(rule name, kinds)` pairs in a fixed order; band rules are named
    /// after their band.
    pub fn rules(&self) -> Vec<(&'static str, &[FixtureKind])> {
        let mut rules = vec![
            ("ambient", self.ambient.as_slice()),
            ("harmonic", self.harmonic.as_slice()),
            ("percussive", self.percussive.as_slice()),
            ("downbeat_snap", self.downbeat_snap.as_slice()),
            ("dynamic", self.dynamic.as_slice()),
        ];
        rules.extend(
            self.bands
                .iter()
                .map(|(band, kinds)| (band.as_str(), kinds.as_slice())),
        );
        rules
    }

    pub fn for_band(&self, band: Band) -> &[FixtureKind] {
        self.bands.get(&band).map(Vec::as_slice).unwrap_or_default()
    }
}

/// How the ambient wash of one section role is played.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionTreatment {
    /// Effect for a section that starts without a crossfade lead-in.
    /// `None` keeps a static wash.
    pub effect: Option<EffectType>,
    /// Multiplies the energy-derived wash intensity.
    pub intensity_scale: f64,
    /// Opens the section with staggered strobes on strobe-capable
    /// percussive and dynamic groups.
    pub burst: bool,
}

impl Default for SectionTreatment {
    fn default() -> Self {
        Self {
            effect: None,
            intensity_scale: 1.0,
            burst: false,
        }
    }
}

impl SectionTreatment {
    fn scaled(scale: f64) -> Self {
        Self {
            intensity_scale: scale,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionTreatments {
    pub intro: SectionTreatment,
    pub verse: SectionTreatment,
    pub chorus: SectionTreatment,
    pub bridge: SectionTreatment,
    pub outro: SectionTreatment,
    pub other: SectionTreatment,
}

impl Default for SectionTreatments {
    fn default() -> Self {
        Self {
            intro: SectionTreatment {
                effect: Some(EffectType::Fade),
                ..SectionTreatment::scaled(0.6)
            },
            verse: SectionTreatment::scaled(0.8),
            chorus: SectionTreatment {
                burst: true,
                ..SectionTreatment::scaled(1.25)
            },
            bridge: SectionTreatment::scaled(0.8),
            outro: SectionTreatment {
                effect: Some(EffectType::Fade),
                ..SectionTreatment::scaled(0.5)
            },
            other: SectionTreatment::default(),
        }
    }
}

impl SectionTreatments {
    pub fn for_role(&self, role: SectionRole) -> &SectionTreatment {
        match role {
            SectionRole::Intro => &self.intro,
            SectionRole::Verse => &self.verse,
            SectionRole::Chorus => &self.chorus,
            SectionRole::Bridge => &self.bridge,
            SectionRole::Outro => &self.outro,
            SectionRole::Other => &self.other,
        }
    }

    fn validate(&self) -> Result<()> {
        let all = [
            &self.intro,
            &self.verse,
            &self.chorus,
            &self.bridge,
            &self.outro,
            &self.other,
        ];
        if all.iter().any(|treatment| !(treatment.intensity_scale >= 0.0)) {
            return Err(LightshowError::msg(
                "section intensity scales must not be negative",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub targets: RuleTargets,
    /// Length of a harmonic colour change, in seconds.
    pub chord_duration: f64,
    pub dynamic_min_duration: f64,
    pub dynamic_max_duration: f64,
    pub sections: SectionTreatments,
    /// Delay between consecutive groups of a section burst.
    pub burst_stagger: f64,
    /// Energy at or above this uses the explosive palette.
    pub explosive_energy: f64,
    /// Missing target kinds are fatal unless this is false.
    pub strict_kinds: bool,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            targets: RuleTargets::default(),
            chord_duration: 1.0,
            dynamic_min_duration: 0.1,
            dynamic_max_duration: 0.3,
            sections: SectionTreatments::default(),
            burst_stagger: 0.25,
            explosive_energy: 0.9,
            strict_kinds: true,
        }
    }
}

/// Colour tables for the effect selector, one named list per mood and
/// energy tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaletteConfig {
    pub energetic_happy: Vec<Color>,
    pub peaceful_happy: Vec<Color>,
    pub aggressive_sad: Vec<Color>,
    pub melancholic: Vec<Color>,
    pub explosive: Vec<Color>,
    pub high: Vec<Color>,
    pub medium: Vec<Color>,
    pub low: Vec<Color>,
    pub harmonic: Vec<Color>,
    pub flash: Vec<Color>,
    /// Used for groups that cannot render colour.
    pub monochrome: Color,
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self {
            energetic_happy: vec![Color::Red, Color::Orange, Color::Yellow],
            peaceful_happy: vec![Color::Yellow, Color::WarmWhite, Color::Green],
            aggressive_sad: vec![Color::Red, Color::Purple, Color::Blue],
            melancholic: vec![Color::Blue, Color::Azure, Color::ColdWhite],
            explosive: vec![Color::Red, Color::Orange],
            high: vec![Color::Yellow, Color::WarmWhite],
            medium: vec![Color::Green, Color::Azure],
            low: vec![Color::Blue, Color::Purple],
            harmonic: vec![Color::Purple, Color::Azure, Color::Green, Color::Orange],
            flash: vec![Color::ColdWhite, Color::WarmWhite],
            monochrome: Color::ColdWhite,
        }
    }
}

impl PaletteConfig {
    pub fn for_quadrant(&self, quadrant: EmotionQuadrant) -> &[Color] {
        match quadrant {
            EmotionQuadrant::EnergeticHappy => &self.energetic_happy,
            EmotionQuadrant::PeacefulHappy => &self.peaceful_happy,
            EmotionQuadrant::AggressiveSad => &self.aggressive_sad,
            EmotionQuadrant::Melancholic => &self.melancholic,
        }
    }

    fn validate(&self) -> Result<()> {
        let lists: [(&str, &[Color]); 10] = [
            ("energetic_happy", self.energetic_happy.as_slice()),
            ("peaceful_happy", self.peaceful_happy.as_slice()),
            ("aggressive_sad", self.aggressive_sad.as_slice()),
            ("melancholic", self.melancholic.as_slice()),
            ("explosive", self.explosive.as_slice()),
            ("high", self.high.as_slice()),
            ("medium", self.medium.as_slice()),
            ("low", self.low.as_slice()),
            ("harmonic", self.harmonic.as_slice()),
            ("flash", self.flash.as_slice()),
        ];
        match lists.iter().find(|(_, colors)| colors.is_empty()) {
            Some((name, _)) => Err(LightshowError::msg(format!(
                "palette list `{name}` must not be empty"
            ))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How long two consecutive ambient events may overlap.
    pub crossfade_window: f64,
    /// Transient flashes at or above this intensity cut through beat accents.
    /// `None` keeps strict tier ordering.
    pub transient_interrupt: Option<f64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            crossfade_window: 2.0,
            transient_interrupt: Some(0.8),
        }
    }
}

/// Settings for the timeline file writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format_version: String,
    /// Directory the lighting controller resolves media files against.
    pub media_dir: String,
    pub scene_extension: String,
    pub show_waveform: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format_version: "0.2".to_string(),
            media_dir: "Music".to_string(),
            scene_extension: "scex".to_string(),
            show_waveform: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = GenerationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cues.transient_floor, 0.3);
        assert_eq!(config.scheduler.crossfade_window, 2.0);
    }

    #[test]
    fn partial_json_overrides_only_named_fields() {
        let config = GenerationConfig::from_json_str(
            r#"{"scheduler": {"crossfade_window": 1.5}, "cues": {"energy_high": 0.8}}"#,
        )
        .unwrap();

        assert_eq!(config.scheduler.crossfade_window, 1.5);
        assert_eq!(config.scheduler.transient_interrupt, Some(0.8));
        assert_eq!(config.cues.energy_high, 0.8);
        assert_eq!(config.cues.energy_low, 0.3);
        assert_eq!(config.palette, PaletteConfig::default());
    }

    #[test]
    fn rejects_inverted_energy_thresholds() {
        let err =
            GenerationConfig::from_json_str(r#"{"cues": {"energy_high": 0.2, "energy_low": 0.4}}"#)
                .unwrap_err();
        assert!(format!("{err}").contains("energy thresholds"));
    }

    #[test]
    fn section_treatments_follow_roles() {
        let config = GenerationConfig::from_json_str(
            r#"{"selector": {"sections": {"outro": {"effect": "strobe"}}}}"#,
        )
        .unwrap();
        let sections = &config.selector.sections;

        assert!(sections.for_role(SectionRole::Chorus).burst);
        assert_eq!(
            sections.for_role(SectionRole::Intro).effect,
            Some(EffectType::Fade)
        );
        let outro = sections.for_role(SectionRole::Outro);
        assert_eq!(outro.effect, Some(EffectType::Strobe));
        assert_eq!(outro.intensity_scale, 1.0);
    }

    #[test]
    fn band_rules_are_named_after_their_band() {
        let targets = RuleTargets::default();
        let rules = targets.rules();

        assert!(rules.contains(&("low-mid", [FixtureKind::WallSpot].as_slice())));
        assert_eq!(targets.for_band(Band::Brilliance), &[FixtureKind::MovingHead]);
        assert!(targets.for_band(Band::Mid).is_empty());
    }

    #[test]
    fn rejects_empty_palette_list() {
        let err = GenerationConfig::from_json_str(r#"{"palette": {"harmonic": []}}"#).unwrap_err();
        assert!(format!("{err}").contains("harmonic"));
    }
}
