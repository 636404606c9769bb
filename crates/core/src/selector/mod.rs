use std::collections::BTreeMap;

use tracing::warn;

use crate::{
    analysis::{AnalysisRecord, Band, Beat, SectionRole},
    config::{CueConfig, GenerationConfig, PaletteConfig, SelectorConfig},
    cue::{Cue, CueClass, CueKind, EnergyDirection, EnergyLevel},
    Color, EffectCandidate, EffectType, FixtureCatalog, FixtureGroup, FixtureKind, LightshowError,
    PriorityTier, Result, TIME_EPSILON,
};

/// Rotating colour pointers, one per (fixture group, cue kind) pair.
///
/// Each emitted candidate advances its pair's pointer by one; the pointer
/// wraps modulo the length of whichever colour list it indexes.
#[derive(Debug, Default, Clone)]
pub struct PaletteState {
    pointers: BTreeMap<(String, CueClass), usize>,
}

impl PaletteState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, group_id: &str, cue: CueClass, colors: &[Color]) -> Option<Color> {
        let pointer = self
            .pointers
            .entry((group_id.to_string(), cue))
            .or_insert(0);
        let color = colors.get(*pointer % colors.len().max(1)).copied();
        *pointer += 1;
        color
    }

    pub fn position(&self, group_id: &str, cue: CueClass) -> usize {
        self.pointers
            .get(&(group_id.to_string(), cue))
            .copied()
            .unwrap_or(0)
    }
}

/// Maps cues to effect candidates on the fixture groups each rule targets.
#[derive(Debug)]
pub struct EffectSelector<'a> {
    config: &'a SelectorConfig,
    thresholds: &'a CueConfig,
    palette: &'a PaletteConfig,
    crossfade_window: f64,
    beat_interval: f64,
    beats: &'a [Beat],
    ambient: Vec<&'a FixtureGroup>,
    harmonic: Vec<&'a FixtureGroup>,
    percussive: Vec<&'a FixtureGroup>,
    downbeat_snap: Vec<&'a FixtureGroup>,
    dynamic: Vec<&'a FixtureGroup>,
    bands: BTreeMap<Band, Vec<&'a FixtureGroup>>,
}

impl<'a> EffectSelector<'a> {
    /// Resolves every rule against the catalog. With `strict_kinds`, a rule
    /// naming a kind the catalog lacks is a [`LightshowError::FixtureConfigMismatch`].
    pub fn new(
        config: &'a GenerationConfig,
        catalog: &'a FixtureCatalog,
        beat_interval: f64,
    ) -> Result<Self> {
        let selector = &config.selector;
        for (rule, kinds) in selector.targets.rules() {
            for kind in kinds {
                if catalog.contains_kind(*kind) {
                    continue;
                }
                if selector.strict_kinds {
                    return Err(LightshowError::FixtureConfigMismatch { rule, kind: *kind });
                }
                warn!(rule, %kind, "rule targets a fixture kind missing from the catalog");
            }
        }

        let resolve = |kinds: &[FixtureKind]| -> Vec<&'a FixtureGroup> {
            catalog
                .groups()
                .iter()
                .filter(|group| kinds.contains(&group.kind))
                .collect()
        };

        Ok(Self {
            config: selector,
            thresholds: &config.cues,
            palette: &config.palette,
            crossfade_window: config.scheduler.crossfade_window,
            beat_interval,
            beats: &[],
            ambient: resolve(selector.targets.ambient.as_slice()),
            harmonic: resolve(selector.targets.harmonic.as_slice()),
            percussive: resolve(selector.targets.percussive.as_slice()),
            downbeat_snap: resolve(selector.targets.downbeat_snap.as_slice()),
            dynamic: resolve(selector.targets.dynamic.as_slice()),
            bands: selector
                .targets
                .bands
                .iter()
                .map(|(band, kinds)| (*band, resolve(kinds.as_slice())))
                .collect(),
        })
    }

    /// Selector for one record: tempo fallback from its bpm, beat accents
    /// bounded by its actual beat grid.
    pub fn for_record(
        config: &'a GenerationConfig,
        catalog: &'a FixtureCatalog,
        record: &'a AnalysisRecord,
    ) -> Result<Self> {
        Ok(Self::new(config, catalog, record.beat_interval())?.with_beats(&record.beats))
    }

    /// Beat grid used to bound accent lengths. Must be sorted by time.
    pub fn with_beats(mut self, beats: &'a [Beat]) -> Self {
        self.beats = beats;
        self
    }

    /// Time from `time` to the next beat of the grid, or the tempo interval
    /// past the last beat.
    fn beat_gap(&self, time: f64) -> f64 {
        let next = self
            .beats
            .partition_point(|beat| beat.time <= time + TIME_EPSILON);
        self.beats
            .get(next)
            .map_or(self.beat_interval, |beat| beat.time - time)
    }

    pub fn select(&self, cue: &Cue, palette: &mut PaletteState) -> Vec<EffectCandidate> {
        match &cue.kind {
            CueKind::SectionBoundary {
                duration,
                previous_duration,
            } => self.structural(cue, *duration, *previous_duration, palette),
            CueKind::ChordChange { .. } => self.harmonic(cue, palette),
            CueKind::Beat => self.rhythmic(cue, false, palette),
            CueKind::Downbeat => self.rhythmic(cue, true, palette),
            CueKind::Transient => self.dynamic(
                cue,
                |_| EffectType::Flash,
                self.config.dynamic_min_duration,
                &self.palette.flash,
                palette,
            ),
            CueKind::EnergyCross { direction, level } => {
                let surge = *direction == EnergyDirection::Rising && *level == EnergyLevel::High;
                let colors = self.energy_colors(cue.context.energy);
                self.dynamic(
                    cue,
                    |group| {
                        if surge && group.supports_strobe {
                            EffectType::Strobe
                        } else {
                            EffectType::Flash
                        }
                    },
                    self.config.dynamic_max_duration,
                    colors,
                    palette,
                )
            }
            CueKind::BandPeak { band } => self.band_peak(cue, *band, palette),
        }
    }

    /// Whole-section washes, led in early by up to the crossfade window when
    /// the previous section ends where this one starts.
    fn structural(
        &self,
        cue: &Cue,
        duration: f64,
        previous_duration: Option<f64>,
        palette: &mut PaletteState,
    ) -> Vec<EffectCandidate> {
        let lead = previous_duration
            .map(|previous| self.crossfade_window.min(previous * 0.5))
            .unwrap_or(0.0)
            .min(cue.time)
            .max(0.0);
        let role = cue
            .context
            .section
            .as_deref()
            .map_or(SectionRole::Other, SectionRole::from_label);
        let treatment = self.config.sections.for_role(role);
        let colors = self.palette.for_quadrant(cue.context.quadrant);
        let effect = if lead > 0.0 {
            EffectType::Fade
        } else {
            treatment.effect.unwrap_or(EffectType::Static)
        };
        let intensity = ((0.3 + 0.7 * cue.context.energy) * treatment.intensity_scale).min(1.0);

        let mut candidates: Vec<EffectCandidate> = self
            .ambient
            .iter()
            .map(|group| EffectCandidate {
                fixture_group_id: group.id.clone(),
                track_hint: Some(0),
                color: self.pick(group, cue.class(), colors, palette),
                effect,
                start: cue.time - lead,
                duration: duration + lead,
                intensity,
                tier: PriorityTier::Structural,
                origin: cue.class(),
            })
            .collect();

        if treatment.burst {
            candidates.extend(self.burst(cue, duration, palette));
        }
        candidates
    }

    /// Staggered strobes opening a section, one per strobe-capable
    /// percussive or dynamic group, the first one stagger step after the
    /// boundary and none past the section end.
    fn burst(&self, cue: &Cue, duration: f64, palette: &mut PaletteState) -> Vec<EffectCandidate> {
        let mut groups: Vec<&FixtureGroup> = Vec::new();
        for &group in self.percussive.iter().chain(&self.dynamic) {
            if group.supports_strobe && !groups.iter().any(|seen| seen.id == group.id) {
                groups.push(group);
            }
        }

        groups
            .into_iter()
            .enumerate()
            .map(|(i, group)| ((i + 1) as f64 * self.config.burst_stagger, group))
            .take_while(|(offset, _)| *offset < duration - TIME_EPSILON)
            .map(|(offset, group)| EffectCandidate {
                fixture_group_id: group.id.clone(),
                track_hint: None,
                color: self.pick(group, cue.class(), &self.palette.flash, palette),
                effect: EffectType::Strobe,
                start: cue.time + offset,
                duration: group.clamp_duration(self.config.dynamic_max_duration),
                intensity: 1.0,
                tier: PriorityTier::Dynamic,
                origin: cue.class(),
            })
            .collect()
    }

    fn harmonic(&self, cue: &Cue, palette: &mut PaletteState) -> Vec<EffectCandidate> {
        self.harmonic
            .iter()
            .map(|group| EffectCandidate {
                fixture_group_id: group.id.clone(),
                track_hint: None,
                color: self.pick(group, cue.class(), &self.palette.harmonic, palette),
                effect: EffectType::Fade,
                start: cue.time,
                duration: group.clamp_duration(self.config.chord_duration),
                intensity: 0.5 + 0.5 * cue.strength,
                tier: PriorityTier::Harmonic,
                origin: cue.class(),
            })
            .collect()
    }

    fn rhythmic(&self, cue: &Cue, downbeat: bool, palette: &mut PaletteState) -> Vec<EffectCandidate> {
        let mut targets: Vec<&FixtureGroup> = self.percussive.clone();
        if downbeat {
            for &group in &self.downbeat_snap {
                if !targets.iter().any(|target| target.id == group.id) {
                    targets.push(group);
                }
            }
        }

        let intensity = if downbeat {
            0.8 + 0.2 * cue.strength
        } else {
            0.3 + 0.4 * cue.strength
        };
        let effect = match cue.context.dominant_band {
            Some(band) if !band.is_low() => EffectType::Flash,
            _ => EffectType::Pulse,
        };
        let colors = self.energy_colors(cue.context.energy);
        let gap = self.beat_gap(cue.time);

        targets
            .into_iter()
            .map(|group| EffectCandidate {
                fixture_group_id: group.id.clone(),
                track_hint: None,
                color: self.pick(group, cue.class(), colors, palette),
                effect,
                start: cue.time,
                duration: group.min_event_duration.min(gap),
                intensity,
                tier: PriorityTier::Rhythmic,
                origin: cue.class(),
            })
            .collect()
    }

    fn dynamic(
        &self,
        cue: &Cue,
        effect: impl Fn(&FixtureGroup) -> EffectType,
        duration: f64,
        colors: &[Color],
        palette: &mut PaletteState,
    ) -> Vec<EffectCandidate> {
        self.dynamic
            .iter()
            .map(|group| EffectCandidate {
                fixture_group_id: group.id.clone(),
                track_hint: None,
                color: self.pick(group, cue.class(), colors, palette),
                effect: effect(group),
                start: cue.time,
                duration: group.clamp_duration(duration),
                intensity: cue.strength,
                tier: PriorityTier::Dynamic,
                origin: cue.class(),
            })
            .collect()
    }

    /// Short hits on the groups bound to the band: pulses for low bands,
    /// flashes above. Colour follows the peak's own level.
    fn band_peak(&self, cue: &Cue, band: Band, palette: &mut PaletteState) -> Vec<EffectCandidate> {
        let Some(groups) = self.bands.get(&band) else {
            return Vec::new();
        };
        let effect = if band.is_low() {
            EffectType::Pulse
        } else {
            EffectType::Flash
        };
        let colors = self.energy_colors(cue.strength);

        groups
            .iter()
            .map(|group| EffectCandidate {
                fixture_group_id: group.id.clone(),
                track_hint: None,
                color: self.pick(group, cue.class(), colors, palette),
                effect,
                start: cue.time,
                duration: group.clamp_duration(self.config.dynamic_max_duration),
                intensity: cue.strength,
                tier: PriorityTier::Dynamic,
                origin: cue.class(),
            })
            .collect()
    }

    fn energy_colors(&self, energy: f64) -> &'a [Color] {
        if energy >= self.config.explosive_energy {
            &self.palette.explosive
        } else if energy >= self.thresholds.energy_high {
            &self.palette.high
        } else if energy >= self.thresholds.energy_low {
            &self.palette.medium
        } else {
            &self.palette.low
        }
    }

    fn pick(
        &self,
        group: &FixtureGroup,
        cue: CueClass,
        colors: &[Color],
        palette: &mut PaletteState,
    ) -> Color {
        if !group.supports_color {
            return self.palette.monochrome;
        }
        palette
            .next(&group.id, cue, colors)
            .unwrap_or(self.palette.monochrome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cue::{CueContext, EmotionQuadrant};

    fn catalog() -> FixtureCatalog {
        FixtureCatalog::new(vec![
            FixtureGroup::new("ceiling", FixtureKind::CeilingSpot).with_limits(1.0, 600.0),
            FixtureGroup::new("oven", FixtureKind::LedAccent).with_limits(0.1, 600.0),
            FixtureGroup::new("walls", FixtureKind::WallSpot).with_limits(0.15, 2.0),
            FixtureGroup::new("strip", FixtureKind::LedStrip)
                .with_limits(0.1, 2.0)
                .with_capabilities(true, false, true),
            FixtureGroup::new("heads", FixtureKind::MovingHead)
                .with_limits(0.3, 4.0)
                .with_capabilities(true, true, true),
            FixtureGroup::new("uv", FixtureKind::Uv)
                .with_limits(0.1, 1.0)
                .with_capabilities(false, false, true),
        ])
        .unwrap()
    }

    fn cue(kind: CueKind, time: f64, strength: f64) -> Cue {
        Cue {
            kind,
            time,
            strength,
            context: CueContext {
                section: Some("verse".to_string()),
                dominant_band: None,
                quadrant: EmotionQuadrant::EnergeticHappy,
                energy: 0.5,
            },
        }
    }

    #[test]
    fn section_boundary_washes_every_ambient_group() {
        let config = GenerationConfig::default();
        let catalog = catalog();
        let selector = EffectSelector::new(&config, &catalog, 0.5).unwrap();
        let mut palette = PaletteState::new();

        let boundary = CueKind::SectionBoundary {
            duration: 15.0,
            previous_duration: Some(5.0),
        };
        let candidates = selector.select(&cue(boundary, 5.0, 1.0), &mut palette);

        let groups: Vec<_> = candidates
            .iter()
            .map(|c| c.fixture_group_id.as_str())
            .collect();
        assert_eq!(groups, vec!["ceiling", "oven"]);
        assert!(candidates
            .iter()
            .all(|c| c.tier == PriorityTier::Structural && c.start == 3.0 && c.duration == 17.0));
        assert_eq!(candidates[0].color, Color::Red);
    }

    #[test]
    fn chord_changes_rotate_through_harmonic_palette() {
        let config = GenerationConfig::default();
        let catalog = catalog();
        let selector = EffectSelector::new(&config, &catalog, 0.5).unwrap();
        let mut palette = PaletteState::new();

        let colors: Vec<Color> = (0..5)
            .map(|i| {
                let chord = CueKind::ChordChange { distance: 0.5 };
                selector.select(&cue(chord, i as f64, 0.5), &mut palette)[0].color
            })
            .collect();

        assert_eq!(
            colors,
            vec![
                Color::Purple,
                Color::Azure,
                Color::Green,
                Color::Orange,
                Color::Purple
            ]
        );
        assert_eq!(palette.position("heads", CueClass::ChordChange), 5);
    }

    #[test]
    fn downbeats_are_brighter_and_snap_moving_heads() {
        let config = GenerationConfig::default();
        let catalog = catalog();
        let selector = EffectSelector::new(&config, &catalog, 0.5).unwrap();
        let mut palette = PaletteState::new();

        let beat = selector.select(&cue(CueKind::Beat, 1.0, 1.0), &mut palette);
        let downbeat = selector.select(&cue(CueKind::Downbeat, 2.0, 0.5), &mut palette);

        assert_eq!(beat.len(), 2);
        assert_eq!(downbeat.len(), 3);
        assert_eq!(downbeat[2].fixture_group_id, "heads");
        let loudest_beat = beat.iter().map(|c| c.intensity).fold(0.0, f64::max);
        assert!(downbeat.iter().all(|c| c.intensity > loudest_beat));
    }

    #[test]
    fn rhythmic_duration_falls_back_to_tempo_interval() {
        let config = GenerationConfig::default();
        let catalog = catalog();
        let selector = EffectSelector::new(&config, &catalog, 0.12).unwrap();
        let mut palette = PaletteState::new();

        let candidates = selector.select(&cue(CueKind::Beat, 1.0, 1.0), &mut palette);
        assert_eq!(candidates[0].duration, 0.12);
        assert_eq!(candidates[1].duration, 0.1);
    }

    #[test]
    fn rhythmic_duration_is_bounded_by_the_next_beat() {
        let config = GenerationConfig::default();
        let catalog = catalog();
        let beats: Vec<Beat> = [0.0, 0.12, 1.0]
            .into_iter()
            .map(|time| Beat {
                time,
                is_downbeat: false,
                strength: 1.0,
            })
            .collect();
        // A tempo of 60 bpm disagrees with the grid on purpose.
        let selector = EffectSelector::new(&config, &catalog, 1.0)
            .unwrap()
            .with_beats(&beats);
        let mut palette = PaletteState::new();

        let walls = |candidates: Vec<EffectCandidate>| {
            candidates
                .into_iter()
                .find(|c| c.fixture_group_id == "walls")
                .unwrap()
                .duration
        };
        let mut at = |time: f64| walls(selector.select(&cue(CueKind::Beat, time, 1.0), &mut palette));
        assert!((at(0.0) - 0.12).abs() < 1e-9);
        assert_eq!(at(0.12), 0.15);
        assert_eq!(at(1.0), 0.15);
    }

    #[test]
    fn section_labels_pick_their_treatment() {
        let config = GenerationConfig::default();
        let catalog = catalog();
        let selector = EffectSelector::new(&config, &catalog, 0.5).unwrap();
        let mut palette = PaletteState::new();

        let opening = CueKind::SectionBoundary {
            duration: 8.0,
            previous_duration: None,
        };
        let mut intro = cue(opening.clone(), 0.0, 1.0);
        intro.context.section = Some("Intro".to_string());
        let mut verse = cue(opening, 0.0, 1.0);
        verse.context.section = Some("verse".to_string());

        let intro = selector.select(&intro, &mut palette);
        let verse = selector.select(&verse, &mut palette);
        assert!(intro.iter().all(|c| c.effect == EffectType::Fade));
        assert!(verse.iter().all(|c| c.effect == EffectType::Static));
        assert!((intro[0].intensity - 0.65 * 0.6).abs() < 1e-9);
        assert!((verse[0].intensity - 0.65 * 0.8).abs() < 1e-9);
    }

    #[test]
    fn chorus_opens_with_staggered_strobes() {
        let config = GenerationConfig::default();
        let catalog = catalog();
        let selector = EffectSelector::new(&config, &catalog, 0.5).unwrap();
        let mut palette = PaletteState::new();

        let boundary = CueKind::SectionBoundary {
            duration: 8.0,
            previous_duration: Some(8.0),
        };
        let mut chorus = cue(boundary, 16.0, 1.0);
        chorus.context.section = Some("chorus".to_string());
        let candidates = selector.select(&chorus, &mut palette);

        let washes: Vec<_> = candidates
            .iter()
            .filter(|c| c.tier == PriorityTier::Structural)
            .collect();
        assert_eq!(washes.len(), 2);
        assert!(washes.iter().all(|c| c.start == 14.0 && c.duration == 10.0));

        let strobes: Vec<_> = candidates
            .iter()
            .filter(|c| c.effect == EffectType::Strobe)
            .map(|c| (c.fixture_group_id.as_str(), c.start, c.tier))
            .collect();
        assert_eq!(
            strobes,
            vec![
                ("strip", 16.25, PriorityTier::Dynamic),
                ("uv", 16.5, PriorityTier::Dynamic),
            ]
        );
    }

    #[test]
    fn band_peaks_hit_the_groups_bound_to_their_band() {
        let config = GenerationConfig::default();
        let catalog = catalog();
        let selector = EffectSelector::new(&config, &catalog, 0.5).unwrap();
        let mut palette = PaletteState::new();

        let mut peak = |band: Band, time: f64, strength: f64| {
            selector.select(&cue(CueKind::BandPeak { band }, time, strength), &mut palette)
        };
        let bass = peak(Band::Bass, 3.0, 0.85);
        let high = peak(Band::Brilliance, 4.0, 0.95);
        let mid = peak(Band::Mid, 5.0, 0.9);

        assert_eq!(bass.len(), 1);
        assert_eq!(bass[0].fixture_group_id, "strip");
        assert_eq!(bass[0].effect, EffectType::Pulse);
        assert_eq!(bass[0].color, Color::Yellow);
        assert_eq!(bass[0].tier, PriorityTier::Dynamic);
        assert_eq!(high[0].fixture_group_id, "heads");
        assert_eq!(high[0].effect, EffectType::Flash);
        assert_eq!(high[0].color, Color::Red);
        assert_eq!(high[0].duration, 0.3);
        assert!(mid.is_empty());
    }

    #[test]
    fn energy_surge_strobes_only_capable_groups() {
        let config = GenerationConfig::default();
        let catalog = catalog();
        let selector = EffectSelector::new(&config, &catalog, 0.5).unwrap();
        let mut palette = PaletteState::new();

        let surge = CueKind::EnergyCross {
            direction: EnergyDirection::Rising,
            level: EnergyLevel::High,
        };
        let mut surge = cue(surge, 4.0, 0.95);
        surge.context.energy = 0.95;
        let candidates = selector.select(&surge, &mut palette);

        let oven = candidates.iter().find(|c| c.fixture_group_id == "oven").unwrap();
        let uv = candidates.iter().find(|c| c.fixture_group_id == "uv").unwrap();
        assert_eq!(oven.effect, EffectType::Flash);
        assert_eq!(uv.effect, EffectType::Strobe);
        assert_eq!(uv.color, config.palette.monochrome);
        assert_eq!(oven.color, Color::Red);
    }

    #[test]
    fn missing_kind_is_fatal_when_strict() {
        let config = GenerationConfig::default();
        let catalog =
            FixtureCatalog::new(vec![FixtureGroup::new("heads", FixtureKind::MovingHead)]).unwrap();

        let err = EffectSelector::new(&config, &catalog, 0.5).unwrap_err();
        assert!(matches!(
            err,
            LightshowError::FixtureConfigMismatch {
                rule: "ambient",
                kind: FixtureKind::CeilingSpot
            }
        ));
    }

    #[test]
    fn missing_kind_is_skipped_when_lenient() {
        let mut config = GenerationConfig::default();
        config.selector.strict_kinds = false;
        let catalog =
            FixtureCatalog::new(vec![FixtureGroup::new("heads", FixtureKind::MovingHead)]).unwrap();
        let selector = EffectSelector::new(&config, &catalog, 0.5).unwrap();
        let mut palette = PaletteState::new();

        assert!(selector
            .select(&cue(CueKind::Beat, 0.0, 1.0), &mut palette)
            .is_empty());
        assert_eq!(
            selector
                .select(&cue(CueKind::Downbeat, 0.0, 1.0), &mut palette)
                .len(),
            1
        );
    }
}
