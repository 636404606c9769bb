use std::{collections::BTreeMap, fmt::Write as _, path::Path};

use serde::Serialize;
use tracing::info;

use crate::{
    config::OutputConfig, scene::SceneTable, LightshowError, Result, Timeline, TimelineEvent,
};

/// Track index of the audio lane in the file. Light tracks start right after.
const AUDIO_TIMELINE: usize = 2;
const LIGHT_TIMELINE_OFFSET: usize = 3;
const SPEED_PERCENT: u32 = 100;
const SPEED_TYPE_PERCENTAGE: u32 = 2;

/// Formats seconds as `H:MM:SS.s`, rounded to the nearest tenth.
pub fn format_timestamp(seconds: f64) -> String {
    let tenths = (seconds.max(0.0) * 10.0).round() as u64;
    let hours = tenths / 36_000;
    let minutes = (tenths / 600) % 60;
    let secs = (tenths / 10) % 60;
    format!("{hours}:{minutes:02}:{secs:02}.{}", tenths % 10)
}

/// Inverse of [`format_timestamp`]. The fractional part is optional.
pub fn parse_timestamp(text: &str) -> Result<f64> {
    let invalid = || LightshowError::serialization(format!("malformed timestamp `{text}`"));

    let mut parts = text.trim().split(':');
    let (Some(hours), Some(minutes), Some(seconds), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };
    let hours: u64 = hours.parse().map_err(|_| invalid())?;
    let minutes: u64 = minutes.parse().map_err(|_| invalid())?;
    let seconds: f64 = seconds.parse().map_err(|_| invalid())?;
    if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return Err(invalid());
    }

    Ok((hours * 3600 + minutes * 60) as f64 + seconds)
}

/// Renders a [`Timeline`] into the lighting controller's `.tml` format.
#[derive(Debug)]
pub struct TimelineWriter<'a> {
    scenes: &'a SceneTable,
    output: &'a OutputConfig,
}

impl<'a> TimelineWriter<'a> {
    pub fn new(scenes: &'a SceneTable, output: &'a OutputConfig) -> Self {
        Self { scenes, output }
    }

    /// Produces the whole document. Fails without partial output when a
    /// scene has no table entry or an event duration rounds to zero.
    pub fn render(&self, timeline: &Timeline, audio_file: Option<&str>) -> Result<String> {
        let mut events = Vec::with_capacity(timeline.event_count());
        for track in timeline.tracks() {
            for event in &track.events {
                if (event.duration * 10.0).round() < 1.0 {
                    return Err(LightshowError::serialization(format!(
                        "event on track {} at {:.3}s lasts {:.3}s which rounds to zero",
                        track.index, event.start, event.duration
                    )));
                }
                let path = self.scenes.resolve(
                    &track.fixture_group_id,
                    track.kind,
                    event.color,
                    event.effect,
                    &self.output.scene_extension,
                )?;
                events.push((event, path, track.supports_movement));
            }
        }
        events.sort_by(|(left, ..), (right, ..)| {
            left.start
                .total_cmp(&right.start)
                .then_with(|| left.track.cmp(&right.track))
        });

        let mut out = String::new();
        self.write_document(&mut out, timeline, audio_file, &events)
            .map_err(|err| LightshowError::serialization(err.to_string()))?;
        Ok(out)
    }

    pub fn write_to_path(
        &self,
        timeline: &Timeline,
        audio_file: Option<&str>,
        path: impl AsRef<Path>,
    ) -> Result<()> {
        let path = path.as_ref();
        let document = self.render(timeline, audio_file)?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, document)?;
        info!(path = %path.display(), events = timeline.event_count(), "timeline written");
        Ok(())
    }

    fn write_document(
        &self,
        out: &mut String,
        timeline: &Timeline,
        audio_file: Option<&str>,
        events: &[(&TimelineEvent, String, bool)],
    ) -> std::fmt::Result {
        let light_tracks = timeline.tracks().len();
        writeln!(out, "[Params]")?;
        writeln!(out, "Version = {}", self.output.format_version)?;
        writeln!(out, "CommentTimeLine = 0")?;
        writeln!(out, "LightTimeLines = {light_tracks}")?;
        writeln!(out, "MediaTimeLines = 1")?;
        writeln!(out, "ShowWaveForm = {}", u8::from(self.output.show_waveform))?;
        writeln!(out, "MaxTime = {}", format_timestamp(timeline.duration()))?;
        writeln!(out, "Zoom = 0")?;
        writeln!(out, "TimeLine_1 = V I D E O   P I C T U R E   T I M E L I N E")?;
        writeln!(out, "TimeLine_{AUDIO_TIMELINE} = A U D I O   T I M E L I N E")?;
        for track in 0..light_tracks {
            writeln!(
                out,
                "TimeLine_{} = L I G H T   S C E N E   T I M E L I N E   #   {}",
                track + LIGHT_TIMELINE_OFFSET,
                track + 1
            )?;
        }

        if let Some(audio) = audio_file {
            let name = Path::new(audio)
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or(audio);
            writeln!(out, "[Event_0]")?;
            writeln!(out, "TimeLineIndex = {AUDIO_TIMELINE}")?;
            writeln!(out, "StartTime = {}", format_timestamp(0.0))?;
            writeln!(out, "Path = {}/{name}", self.output.media_dir)?;
            writeln!(out, "Length = {}", format_timestamp(timeline.duration()))?;
        }

        for (number, (event, path, movement)) in events.iter().enumerate() {
            writeln!(out, "[Event_{}]", number + 1)?;
            writeln!(out, "TimeLineIndex = {}", event.track + LIGHT_TIMELINE_OFFSET)?;
            writeln!(out, "StartTime = {}", format_timestamp(event.start))?;
            writeln!(out, "Path = {path}")?;
            writeln!(out, "Length = {}", format_timestamp(event.duration))?;
            if let Some(ms) = millis(event.fade_in) {
                writeln!(out, "FadeIn = {ms}")?;
            }
            if let Some(ms) = millis(event.fade_out) {
                writeln!(out, "FadeOut = {ms}")?;
            }
            if *movement {
                writeln!(out, "Speed = {SPEED_PERCENT}")?;
                writeln!(out, "SpeedType = {SPEED_TYPE_PERCENTAGE}")?;
            }
        }
        Ok(())
    }
}

fn millis(seconds: f64) -> Option<u64> {
    let ms = (seconds * 1000.0).round();
    (ms >= 1.0).then_some(ms as u64)
}

/// One `[Event_N]` block read back from a document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentEvent {
    pub timeline_index: usize,
    pub start: f64,
    pub path: String,
    pub length: Option<f64>,
    pub fade_in_ms: Option<u64>,
    pub fade_out_ms: Option<u64>,
}

impl DocumentEvent {
    /// Light track index, or `None` for media and video lanes.
    pub fn light_track(&self) -> Option<usize> {
        self.timeline_index.checked_sub(LIGHT_TIMELINE_OFFSET)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimelineDocument {
    pub params: BTreeMap<String, String>,
    pub events: Vec<DocumentEvent>,
}

impl TimelineDocument {
    pub fn light_events(&self) -> impl Iterator<Item = &DocumentEvent> {
        self.events
            .iter()
            .filter(|event| event.light_track().is_some())
    }
}

/// Parses a `.tml` document back into its header and event blocks.
pub fn parse_document(text: &str) -> Result<TimelineDocument> {
    let mut document = TimelineDocument::default();
    let mut section: Option<String> = None;
    let mut fields: BTreeMap<String, String> = BTreeMap::new();

    for (number, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            finish_section(&mut document, section.take(), std::mem::take(&mut fields))?;
            section = Some(name.to_string());
            continue;
        }
        let (key, value) = line.split_once('=').ok_or_else(|| {
            LightshowError::serialization(format!("line {}: expected `key = value`", number + 1))
        })?;
        if section.is_none() {
            return Err(LightshowError::serialization(format!(
                "line {}: field outside of a section",
                number + 1
            )));
        }
        fields.insert(key.trim().to_string(), value.trim().to_string());
    }
    finish_section(&mut document, section, fields)?;

    Ok(document)
}

fn finish_section(
    document: &mut TimelineDocument,
    section: Option<String>,
    mut fields: BTreeMap<String, String>,
) -> Result<()> {
    let Some(section) = section else {
        return Ok(());
    };
    if section == "Params" {
        document.params = fields;
        return Ok(());
    }
    if !section.starts_with("Event_") {
        return Err(LightshowError::serialization(format!(
            "unknown section `[{section}]`"
        )));
    }

    let mut take = |key: &str| {
        fields.remove(key).ok_or_else(|| {
            LightshowError::serialization(format!("[{section}] is missing `{key}`"))
        })
    };
    let timeline_index = take("TimeLineIndex")?
        .parse()
        .map_err(|_| LightshowError::serialization(format!("[{section}] has a bad TimeLineIndex")))?;
    let start = parse_timestamp(&take("StartTime")?)?;
    let path = take("Path")?;
    let length = take("Length").ok().map(|text| parse_timestamp(&text)).transpose()?;
    let fade_in_ms = take("FadeIn").ok().and_then(|text| text.parse().ok());
    let fade_out_ms = take("FadeOut").ok().and_then(|text| text.parse().ok());

    document.events.push(DocumentEvent {
        timeline_index,
        start,
        path,
        length,
        fade_in_ms,
        fade_out_ms,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cue::CueClass, Color, EffectType, FixtureKind, PriorityTier, Track,
    };

    fn event(track: usize, start: f64, duration: f64, color: Color, effect: EffectType) -> TimelineEvent {
        TimelineEvent {
            track,
            fixture_group_id: String::new(),
            start,
            duration,
            color,
            effect,
            intensity: 1.0,
            tier: PriorityTier::Structural,
            origin: CueClass::SectionBoundary,
            fade_in: 0.0,
            fade_out: 0.0,
        }
    }

    fn timeline(events: Vec<TimelineEvent>, heads: Vec<TimelineEvent>) -> Timeline {
        Timeline::new(
            20.0,
            vec![
                Track {
                    index: 0,
                    fixture_group_id: "Bodovky".to_string(),
                    lane: 0,
                    kind: FixtureKind::CeilingSpot,
                    supports_movement: false,
                    events,
                },
                Track {
                    index: 1,
                    fixture_group_id: "Moving_heads".to_string(),
                    lane: 0,
                    kind: FixtureKind::MovingHead,
                    supports_movement: true,
                    events: heads,
                },
            ],
        )
    }

    #[test]
    fn formats_tenths_and_carries_minutes() {
        assert_eq!(format_timestamp(0.0), "0:00:00.0");
        assert_eq!(format_timestamp(4.04), "0:00:04.0");
        assert_eq!(format_timestamp(59.96), "0:01:00.0");
        assert_eq!(format_timestamp(3725.25), "1:02:05.3");
    }

    #[test]
    fn parses_with_and_without_fraction() {
        assert!((parse_timestamp("1:02:05.3").unwrap() - 3725.3).abs() < 1e-9);
        assert_eq!(parse_timestamp("0:30:00").unwrap(), 1800.0);
        assert!(parse_timestamp("0:75:00.0").is_err());
        assert!(parse_timestamp("12.5").is_err());
    }

    #[test]
    fn renders_header_media_and_light_events() {
        let mut first = event(0, 0.0, 5.0, Color::Red, EffectType::Static);
        first.fade_out = 2.0;
        let mut second = event(0, 3.0, 17.0, Color::Blue, EffectType::Fade);
        second.fade_in = 2.0;
        let mut head = event(1, 1.0, 0.5, Color::Purple, EffectType::Pulse);
        head.tier = PriorityTier::Rhythmic;

        let scenes = SceneTable::sauna();
        let output = OutputConfig::default();
        let text = TimelineWriter::new(&scenes, &output)
            .render(&timeline(vec![first, second], vec![head]), Some("/tmp/song.mp3"))
            .unwrap();

        assert!(text.starts_with("[Params]\nVersion = 0.2\n"));
        assert!(text.contains("LightTimeLines = 2\n"));
        assert!(text.contains("MaxTime = 0:00:20.0\n"));
        assert!(text.contains("TimeLine_4 = L I G H T   S C E N E   T I M E L I N E   #   2\n"));
        assert!(text.contains("[Event_0]\nTimeLineIndex = 2\nStartTime = 0:00:00.0\nPath = Music/song.mp3\n"));
        assert!(text.contains(
            "[Event_2]\nTimeLineIndex = 4\nStartTime = 0:00:01.0\nPath = Moving_heads/MH_oven/MH_oven_purple.scex\nLength = 0:00:00.5\nSpeed = 100\nSpeedType = 2\n"
        ));
        assert!(text.contains("Path = Bodovky/Bodovky_all/Bodovka_blue.scex\nLength = 0:00:17.0\nFadeIn = 2000\n"));
        assert!(text.contains("FadeOut = 2000\n"));
        assert_eq!(text.matches("Speed = ").count(), 1);
    }

    #[test]
    fn zero_length_event_is_rejected() {
        let scenes = SceneTable::sauna();
        let output = OutputConfig::default();
        let tiny = event(0, 1.0, 0.04, Color::Red, EffectType::Flash);

        let err = TimelineWriter::new(&scenes, &output)
            .render(&timeline(vec![tiny], Vec::new()), None)
            .unwrap_err();
        assert!(matches!(err, LightshowError::Serialization(_)));
    }

    #[test]
    fn parses_rendered_document() {
        let scenes = SceneTable::sauna();
        let output = OutputConfig::default();
        let text = TimelineWriter::new(&scenes, &output)
            .render(
                &timeline(
                    vec![event(0, 0.0, 20.0, Color::Green, EffectType::Static)],
                    vec![event(1, 2.26, 0.3, Color::Azure, EffectType::Fade)],
                ),
                Some("song.mp3"),
            )
            .unwrap();

        let document = parse_document(&text).unwrap();
        assert_eq!(document.params.get("LightTimeLines").map(String::as_str), Some("2"));
        assert_eq!(document.events.len(), 3);

        let lights: Vec<_> = document.light_events().collect();
        assert_eq!(lights.len(), 2);
        assert_eq!(lights[1].light_track(), Some(1));
        assert!((lights[1].start - 2.3).abs() < 1e-9);
        assert_eq!(lights[1].length, Some(0.3));
        assert_eq!(lights[1].path, "Moving_heads/MH_oven/MH_oven_azure.scex");
    }

    #[test]
    fn writes_into_missing_directories() {
        let scenes = SceneTable::sauna();
        let output = OutputConfig::default();
        let writer = TimelineWriter::new(&scenes, &output);
        let timeline = timeline(
            vec![event(0, 0.0, 20.0, Color::Green, EffectType::Static)],
            Vec::new(),
        );
        let dir = std::env::temp_dir().join(format!("lightshow-export-{}", std::process::id()));
        let path = dir.join("shows").join("song.tml");

        writer.write_to_path(&timeline, Some("song.mp3"), &path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, writer.render(&timeline, Some("song.mp3")).unwrap());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn rejects_fields_outside_sections() {
        assert!(parse_document("Version = 0.2\n").is_err());
    }
}
