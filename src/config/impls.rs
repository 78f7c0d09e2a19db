use super::structs::{OverlayMode, ViewLayers};
use crate::types::ViewEntry;

use serde::Deserialize;
use serde::de::{MapAccess, Visitor};
use std::{
    fmt::{self, Display},
    path::PathBuf,
    str::FromStr,
};

impl FromStr for OverlayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(OverlayMode::Auto),
            "kernel" => Ok(OverlayMode::Kernel),
            "emulated" => Ok(OverlayMode::Emulated),
            _ => Err(format!(
                "Invalid overlay mode: {}. Valid modes are: auto, kernel, emulated",
                s
            )),
        }
    }
}

impl Display for OverlayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlayMode::Auto => write!(f, "auto"),
            OverlayMode::Kernel => write!(f, "kernel"),
            OverlayMode::Emulated => write!(f, "emulated"),
        }
    }
}

/// Parses `MERGE=UPPER:LOWER` as given to `--view`.
pub fn parse_view_argument(s: &str) -> Result<ViewEntry, String> {
    let (merge_point, layers) = s
        .split_once('=')
        .ok_or_else(|| format!("Expected MERGE=UPPER:LOWER, got '{}'", s))?;
    let (upper, lower) = layers
        .split_once(':')
        .ok_or_else(|| format!("Expected MERGE=UPPER:LOWER, got '{}'", s))?;
    if merge_point.is_empty() || upper.is_empty() || lower.is_empty() {
        return Err(format!("Empty path in view '{}'", s));
    }
    Ok(ViewEntry {
        merge_point: PathBuf::from(merge_point),
        upper: PathBuf::from(upper),
        lower: PathBuf::from(lower),
    })
}

pub(crate) fn deserialize_level_filter<'de, D>(
    deserializer: D,
) -> Result<Option<log::LevelFilter>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: Option<String> = Option::deserialize(deserializer)?;
    s.map_or(Ok(None), |s| {
        log::LevelFilter::from_str(&s)
            .map(Some)
            .map_err(serde::de::Error::custom)
    })
}

struct ViewsVisitor;

impl<'de> Visitor<'de> for ViewsVisitor {
    type Value = Vec<ViewEntry>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "a table of merge points to {{ upper, lower }} tables")
    }

    // Entries are kept in the order they were written in.
    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut views: Vec<ViewEntry> = Vec::new();
        while let Some((merge_point, layers)) =
            map.next_entry::<PathBuf, ViewLayers>()?
        {
            if views.iter().any(|v| v.merge_point == merge_point) {
                return Err(serde::de::Error::custom(format!(
                    "merge point {} defined twice",
                    merge_point.display()
                )));
            }
            views.push(ViewEntry {
                merge_point,
                upper: layers.upper,
                lower: layers.lower,
            });
        }
        Ok(views)
    }
}

pub(crate) fn deserialize_views<'de, D>(
    deserializer: D,
) -> Result<Option<Vec<ViewEntry>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserializer.deserialize_map(ViewsVisitor).map(Some)
}
