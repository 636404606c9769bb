use tracing::{debug, info};

use crate::{
    analysis::AnalysisRecord,
    config::GenerationConfig,
    cue::CueExtractor,
    export::TimelineWriter,
    scene::SceneTable,
    selector::{EffectSelector, PaletteState},
    FixtureCatalog, Result, SchedulingReport, Scheduler, Timeline,
};

/// Result of one generation run.
#[derive(Debug, Clone)]
pub struct Generation {
    pub timeline: Timeline,
    pub report: SchedulingReport,
    pub cue_count: usize,
}

impl Generation {
    /// Renders the timeline with the given scene table and output settings.
    pub fn render(
        &self,
        scenes: &SceneTable,
        config: &GenerationConfig,
        audio_file: Option<&str>,
    ) -> Result<String> {
        TimelineWriter::new(scenes, &config.output).render(&self.timeline, audio_file)
    }
}

/// Runs cue extraction, effect selection and scheduling for one record.
///
/// Inputs are validated first; any violation aborts before scheduling.
/// All run state (palette pointers, track intervals) lives and dies inside
/// this call, so independent runs can proceed in parallel.
pub fn generate(
    record: &AnalysisRecord,
    catalog: &FixtureCatalog,
    config: &GenerationConfig,
) -> Result<Generation> {
    record.validate()?;
    catalog.validate()?;
    config.validate()?;

    let cues = CueExtractor::new(&config.cues).extract(record);
    debug!(cues = cues.len(), "cues extracted");

    let selector = EffectSelector::for_record(config, catalog, record)?;
    let mut palette = PaletteState::new();
    let candidates: Vec<_> = cues
        .iter()
        .flat_map(|cue| selector.select(cue, &mut palette))
        .collect();
    debug!(candidates = candidates.len(), "effect candidates selected");

    let scheduler = Scheduler::new(catalog, &config.scheduler, &config.selector.targets.ambient);
    let schedule = scheduler.schedule(candidates, record.duration)?;

    info!(
        cues = cues.len(),
        events = schedule.timeline.event_count(),
        suppressed = schedule.report.suppressed,
        "timeline generated"
    );

    Ok(Generation {
        timeline: schedule.timeline,
        report: schedule.report,
        cue_count: cues.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::{Beat, Sample, Section},
        LightshowError,
    };

    fn record() -> AnalysisRecord {
        AnalysisRecord {
            audio_file: Some("song.mp3".to_string()),
            duration: 8.0,
            bpm: 120.0,
            beats: (0..16)
                .map(|i| Beat {
                    time: i as f64 * 0.5,
                    is_downbeat: i % 4 == 0,
                    strength: 1.0,
                })
                .collect(),
            energy_curve: vec![Sample::new(0.0, 0.2), Sample::new(4.0, 0.8)],
            bands: Default::default(),
            transients: vec![Sample::new(6.1, 0.9)],
            chord_changes: vec![Sample::new(2.0, 0.5)],
            sections: vec![
                Section {
                    start: 0.0,
                    end: 4.0,
                    label: "intro".to_string(),
                },
                Section {
                    start: 4.0,
                    end: 8.0,
                    label: "drop".to_string(),
                },
            ],
            emotion: Vec::new(),
        }
    }

    #[test]
    fn generates_balanced_schedule_for_sauna() {
        let generation = generate(
            &record(),
            &FixtureCatalog::sauna(),
            &GenerationConfig::default(),
        )
        .unwrap();

        assert!(generation.cue_count > 16);
        assert!(generation.timeline.event_count() > 0);
        assert!(generation.report.is_balanced());
        assert_eq!(generation.timeline.duration(), 8.0);
    }

    #[test]
    fn invalid_record_fails_before_scheduling() {
        let mut record = record();
        record.beats.clear();

        let err = generate(&record, &FixtureCatalog::sauna(), &GenerationConfig::default())
            .unwrap_err();
        assert!(matches!(err, LightshowError::InvalidAnalysisRecord(_)));
    }

    #[test]
    fn rendered_output_is_stable_across_runs() {
        let config = GenerationConfig::default();
        let scenes = SceneTable::sauna();
        let catalog = FixtureCatalog::sauna();

        let first = generate(&record(), &catalog, &config)
            .and_then(|generation| generation.render(&scenes, &config, Some("song.mp3")))
            .unwrap();
        let second = generate(&record(), &catalog, &config)
            .and_then(|generation| generation.render(&scenes, &config, Some("song.mp3")))
            .unwrap();
        assert_eq!(first, second);
    }
}
