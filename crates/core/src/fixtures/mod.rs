use std::{collections::BTreeSet, fmt, path::Path};

use serde::{Deserialize, Serialize};

use crate::{LightshowError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FixtureKind {
    CeilingSpot,
    WallSpot,
    LedStrip,
    LedAccent,
    MovingHead,
    Uv,
    Other,
}

impl FixtureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FixtureKind::CeilingSpot => "ceilingSpot",
            FixtureKind::WallSpot => "wallSpot",
            FixtureKind::LedStrip => "ledStrip",
            FixtureKind::LedAccent => "ledAccent",
            FixtureKind::MovingHead => "movingHead",
            FixtureKind::Uv => "uv",
            FixtureKind::Other => "other",
        }
    }
}

impl fmt::Display for FixtureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of physical fixtures driven together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureGroup {
    pub id: String,
    pub kind: FixtureKind,
    #[serde(default = "enabled")]
    pub supports_color: bool,
    #[serde(default)]
    pub supports_movement: bool,
    #[serde(default)]
    pub supports_strobe: bool,
    pub min_event_duration: f64,
    pub max_event_duration: f64,
    /// Number of independent tracks the group owns.
    #[serde(default = "single_track")]
    pub concurrency: usize,
    #[serde(default = "unit_weight")]
    pub priority_weight: f64,
}

fn enabled() -> bool {
    true
}

fn single_track() -> usize {
    1
}

fn unit_weight() -> f64 {
    1.0
}

impl FixtureGroup {
    pub fn new(id: impl Into<String>, kind: FixtureKind) -> Self {
        Self {
            id: id.into(),
            kind,
            supports_color: true,
            supports_movement: false,
            supports_strobe: false,
            min_event_duration: 0.1,
            max_event_duration: 8.0,
            concurrency: 1,
            priority_weight: 1.0,
        }
    }

    pub fn with_limits(mut self, min_event_duration: f64, max_event_duration: f64) -> Self {
        self.min_event_duration = min_event_duration;
        self.max_event_duration = max_event_duration;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_capabilities(mut self, color: bool, movement: bool, strobe: bool) -> Self {
        self.supports_color = color;
        self.supports_movement = movement;
        self.supports_strobe = strobe;
        self
    }

    /// Clamps a requested duration into the group's event limits.
    pub fn clamp_duration(&self, duration: f64) -> f64 {
        duration.clamp(self.min_event_duration, self.max_event_duration)
    }
}

/// One output track and the fixture group lane it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackSlot {
    pub index: usize,
    pub group_id: String,
    pub lane: usize,
    pub kind: FixtureKind,
    pub supports_movement: bool,
}

/// Ordered, read-only inventory of fixture groups for one generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureCatalog {
    groups: Vec<FixtureGroup>,
}

impl FixtureCatalog {
    pub fn new(groups: Vec<FixtureGroup>) -> Result<Self> {
        let catalog = Self { groups };
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let catalog: Self = serde_json::from_str(json)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// The sauna installation: ceiling spots, wall spots, LED walls, the
    /// oven and bench accents, two moving heads and a UV bar.
    pub fn sauna() -> Self {
        Self {
            groups: vec![
                FixtureGroup::new("Bodovky", FixtureKind::CeilingSpot).with_limits(1.0, 600.0),
                FixtureGroup::new("SPOTS_walls", FixtureKind::WallSpot)
                    .with_limits(0.15, 2.0)
                    .with_concurrency(2),
                FixtureGroup::new("LED_walls", FixtureKind::LedStrip)
                    .with_limits(0.1, 4.0)
                    .with_concurrency(2)
                    .with_capabilities(true, false, true),
                FixtureGroup::new("LED_Oven", FixtureKind::LedAccent)
                    .with_limits(0.1, 600.0)
                    .with_concurrency(2),
                FixtureGroup::new("LED_lavice", FixtureKind::LedAccent)
                    .with_limits(1.0, 600.0)
                    .with_concurrency(2),
                FixtureGroup::new("Moving_heads", FixtureKind::MovingHead)
                    .with_limits(0.3, 4.0)
                    .with_concurrency(2)
                    .with_capabilities(true, true, true),
                FixtureGroup::new("UV", FixtureKind::Uv)
                    .with_limits(0.1, 2.0)
                    .with_capabilities(false, false, true),
            ],
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.groups.is_empty() {
            return Err(LightshowError::InvalidFixtureCatalog(
                "catalog has no fixture groups".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        for group in &self.groups {
            if !seen.insert(group.id.as_str()) {
                return Err(LightshowError::InvalidFixtureCatalog(format!(
                    "duplicate fixture group id `{}`",
                    group.id
                )));
            }
            if group.concurrency == 0 {
                return Err(LightshowError::InvalidFixtureCatalog(format!(
                    "group `{}` must own at least one track",
                    group.id
                )));
            }
            if !(group.min_event_duration > 0.0)
                || !(group.max_event_duration >= group.min_event_duration)
            {
                return Err(LightshowError::InvalidFixtureCatalog(format!(
                    "group `{}` has invalid event limits {}..{}",
                    group.id, group.min_event_duration, group.max_event_duration
                )));
            }
        }
        Ok(())
    }

    pub fn groups(&self) -> &[FixtureGroup] {
        &self.groups
    }

    pub fn group(&self, id: &str) -> Option<&FixtureGroup> {
        self.groups.iter().find(|group| group.id == id)
    }

    pub fn contains_kind(&self, kind: FixtureKind) -> bool {
        self.groups.iter().any(|group| group.kind == kind)
    }

    pub fn groups_of_kind(&self, kind: FixtureKind) -> impl Iterator<Item = &FixtureGroup> {
        self.groups.iter().filter(move |group| group.kind == kind)
    }

    /// Global track index of the group's first lane.
    pub fn first_track(&self, id: &str) -> Option<usize> {
        let mut offset = 0;
        for group in &self.groups {
            if group.id == id {
                return Some(offset);
            }
            offset += group.concurrency;
        }
        None
    }

    pub fn track_count(&self) -> usize {
        self.groups.iter().map(|group| group.concurrency).sum()
    }

    /// Assigns global track indices in catalog order, `concurrency`
    /// consecutive indices per group.
    pub fn track_layout(&self) -> Vec<TrackSlot> {
        let mut slots = Vec::with_capacity(self.track_count());
        for group in &self.groups {
            for lane in 0..group.concurrency {
                slots.push(TrackSlot {
                    index: slots.len(),
                    group_id: group.id.clone(),
                    lane,
                    kind: group.kind,
                    supports_movement: group.supports_movement,
                });
            }
        }
        slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sauna_inventory_is_valid() {
        let catalog = FixtureCatalog::sauna();
        assert!(catalog.validate().is_ok());
        assert!(catalog.contains_kind(FixtureKind::MovingHead));
        assert!(!catalog.contains_kind(FixtureKind::Other));
    }

    #[test]
    fn sauna_accents_keep_a_lane_beside_the_wash() {
        let catalog = FixtureCatalog::sauna();
        for group in catalog.groups_of_kind(FixtureKind::LedAccent) {
            assert_eq!(group.concurrency, 2, "{}", group.id);
        }
    }

    #[test]
    fn lays_out_tracks_in_catalog_order() {
        let catalog = FixtureCatalog::new(vec![
            FixtureGroup::new("ceiling", FixtureKind::CeilingSpot),
            FixtureGroup::new("walls", FixtureKind::WallSpot).with_concurrency(3),
            FixtureGroup::new("heads", FixtureKind::MovingHead),
        ])
        .unwrap();

        let layout = catalog.track_layout();
        assert_eq!(layout.len(), 5);
        assert_eq!(catalog.first_track("walls"), Some(1));
        assert_eq!(catalog.first_track("heads"), Some(4));
        assert_eq!(layout[3].group_id, "walls");
        assert_eq!(layout[3].lane, 2);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let err = FixtureCatalog::new(vec![
            FixtureGroup::new("walls", FixtureKind::WallSpot),
            FixtureGroup::new("walls", FixtureKind::LedStrip),
        ])
        .unwrap_err();

        assert!(format!("{err}").contains("duplicate"));
    }

    #[test]
    fn rejects_zero_concurrency() {
        let group = FixtureGroup::new("walls", FixtureKind::WallSpot).with_concurrency(0);
        assert!(FixtureCatalog::new(vec![group]).is_err());
    }

    #[test]
    fn parses_catalog_json() {
        let json = r#"{"groups": [
            {"id": "heads", "kind": "movingHead", "supports_movement": true,
             "min_event_duration": 0.2, "max_event_duration": 4.0, "concurrency": 2}
        ]}"#;

        let catalog = FixtureCatalog::from_json_str(json).unwrap();
        let heads = catalog.group("heads").unwrap();
        assert!(heads.supports_color);
        assert!(heads.supports_movement);
        assert_eq!(heads.concurrency, 2);
    }
}
