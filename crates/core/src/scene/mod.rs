use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Color, EffectType, FixtureKind, LightshowError, Result};

/// Location of one scene family in the controller's scene library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneTemplate {
    pub family: String,
    pub subgroup: String,
    pub name: String,
}

impl SceneTemplate {
    pub fn new(family: &str, subgroup: &str, name: &str) -> Self {
        Self {
            family: family.to_string(),
            subgroup: subgroup.to_string(),
            name: name.to_string(),
        }
    }

    /// `<family>/<subgroup>/<name>_<color>.<ext>`
    pub fn path(&self, color: Color, extension: &str) -> String {
        format!(
            "{}/{}/{}_{}.{}",
            self.family,
            self.subgroup,
            self.name,
            scene_color(color),
            extension
        )
    }
}

/// Colour names as they appear in scene file names.
pub fn scene_color(color: Color) -> &'static str {
    match color {
        Color::ColdWhite => "white - studená",
        Color::WarmWhite => "white - teplá",
        other => other.as_str(),
    }
}

/// Table-driven scene path resolution.
///
/// Lookup order is group id with the exact effect, group id for any effect,
/// kind with the exact effect, then kind for any effect. Entries are kept in
/// ordered maps so resolution never depends on insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneTable {
    by_group: BTreeMap<(String, Option<EffectType>), SceneTemplate>,
    by_kind: BTreeMap<(FixtureKind, Option<EffectType>), SceneTemplate>,
}

impl SceneTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kind(
        mut self,
        kind: FixtureKind,
        effect: Option<EffectType>,
        template: SceneTemplate,
    ) -> Self {
        self.by_kind.insert((kind, effect), template);
        self
    }

    pub fn with_group(
        mut self,
        group_id: &str,
        effect: Option<EffectType>,
        template: SceneTemplate,
    ) -> Self {
        self.by_group.insert((group_id.to_string(), effect), template);
        self
    }

    /// Scene library of the sauna installation.
    pub fn sauna() -> Self {
        Self::new()
            .with_kind(
                FixtureKind::CeilingSpot,
                None,
                SceneTemplate::new("Bodovky", "Bodovky_all", "Bodovka"),
            )
            .with_kind(
                FixtureKind::WallSpot,
                None,
                SceneTemplate::new("SPOTS_walls", "SPOTS_all", "SPOTS"),
            )
            .with_kind(
                FixtureKind::WallSpot,
                Some(EffectType::Strobe),
                SceneTemplate::new("SPOTS_walls", "SPOTS_all", "SPOTS_strobe"),
            )
            .with_kind(
                FixtureKind::WallSpot,
                Some(EffectType::Flash),
                SceneTemplate::new("SPOTS_walls", "SPOTS_flash", "SPOTS_flash"),
            )
            .with_kind(
                FixtureKind::WallSpot,
                Some(EffectType::Pulse),
                SceneTemplate::new("SPOTS_walls", "SPOTS_pulse", "SPOTS_pulse"),
            )
            .with_kind(
                FixtureKind::LedStrip,
                None,
                SceneTemplate::new("LED_walls", "Walls_all", "Walls"),
            )
            .with_kind(
                FixtureKind::LedStrip,
                Some(EffectType::Strobe),
                SceneTemplate::new(
                    "Special_efects",
                    "Walls_flashing_snake",
                    "Walls_flashing_snake",
                ),
            )
            .with_kind(
                FixtureKind::LedStrip,
                Some(EffectType::Flash),
                SceneTemplate::new("LED_walls", "Walls_flash", "Walls_flash"),
            )
            .with_kind(
                FixtureKind::LedStrip,
                Some(EffectType::Pulse),
                SceneTemplate::new("LED_walls", "Walls_pulse", "Walls_pulse"),
            )
            .with_kind(
                FixtureKind::LedStrip,
                Some(EffectType::Fade),
                SceneTemplate::new("LED_walls", "Walls_fade", "Walls_fade"),
            )
            .with_kind(
                FixtureKind::LedAccent,
                None,
                SceneTemplate::new("LED_Oven", "Oven_all", "Oven"),
            )
            .with_kind(
                FixtureKind::MovingHead,
                None,
                SceneTemplate::new("Moving_heads", "MH_oven", "MH_oven"),
            )
            .with_kind(
                FixtureKind::MovingHead,
                Some(EffectType::Strobe),
                SceneTemplate::new("Moving_heads", "MH_oven", "MH_strobe"),
            )
            .with_kind(FixtureKind::Uv, None, SceneTemplate::new("UV", "UV_all", "UV"))
            .with_group(
                "LED_lavice",
                None,
                SceneTemplate::new("LED_lavice", "LED_lavice_all", "LED_lavice"),
            )
    }

    pub fn template(
        &self,
        group_id: &str,
        kind: FixtureKind,
        effect: EffectType,
    ) -> Option<&SceneTemplate> {
        let group = group_id.to_string();
        self.by_group
            .get(&(group.clone(), Some(effect)))
            .or_else(|| self.by_group.get(&(group, None)))
            .or_else(|| self.by_kind.get(&(kind, Some(effect))))
            .or_else(|| self.by_kind.get(&(kind, None)))
    }

    /// Resolves the scene path for one event. A missing entry is a
    /// serialization error.
    pub fn resolve(
        &self,
        group_id: &str,
        kind: FixtureKind,
        color: Color,
        effect: EffectType,
        extension: &str,
    ) -> Result<String> {
        self.template(group_id, kind, effect)
            .map(|template| template.path(color, extension))
            .ok_or_else(|| {
                LightshowError::serialization(format!(
                    "no scene for group `{group_id}` ({kind}) with effect `{effect}`"
                ))
            })
    }
}
