//! Camera/zone monitor configuration.
//!
//! Parses the operator's filter specification into a normalized mapping
//! from camera name to a [`ZoneRule`]. Two syntaxes are accepted:
//!
//! | Form | Example |
//! |------|---------|
//! | Structured (JSON object / TOML table) | `{"front_door": ["yard", "driveway"], "back": ["all"]}` |
//! | Legacy (delimited) | `front_door:yard,driveway;back` |
//!
//! In both forms the zone name `all` (case-insensitive) means every zone.
//! In the legacy form a camera without a colon, or with an empty zone list,
//! also means every zone. An empty specification monitors every camera.
//!
//! Legacy parsing is lenient: a malformed entry is skipped and reported in
//! [`ParsedMonitor::skipped`]. Structured parsing is strict: any shape
//! error is returned, since it can only be an operator mistake.

use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, BTreeSet};

/// The zone literal meaning "every zone of this camera".
pub const ALL_ZONES_LITERAL: &str = "all";

/// Which zones of a monitored camera produce notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZoneRule {
    AllZones,
    /// Never empty.
    Zones(BTreeSet<String>),
}

impl ZoneRule {
    fn merge(self, other: ZoneRule) -> ZoneRule {
        match (self, other) {
            (ZoneRule::Zones(mut a), ZoneRule::Zones(b)) => {
                a.extend(b);
                ZoneRule::Zones(a)
            }
            _ => ZoneRule::AllZones,
        }
    }

    fn from_zone_names<I>(names: I) -> ZoneRule
    where
        I: IntoIterator<Item = String>,
    {
        let mut zones = BTreeSet::new();
        for name in names {
            if name.eq_ignore_ascii_case(ALL_ZONES_LITERAL) {
                return ZoneRule::AllZones;
            }
            zones.insert(name);
        }
        if zones.is_empty() {
            ZoneRule::AllZones
        } else {
            ZoneRule::Zones(zones)
        }
    }
}

/// Normalized camera → zone rule mapping.
///
/// An empty mapping matches every event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MonitorConfig {
    rules: BTreeMap<String, ZoneRule>,
}

/// The result of parsing a monitor specification.
#[derive(Debug, Clone)]
pub struct ParsedMonitor {
    pub config: MonitorConfig,
    /// Legacy entries that were ignored because they were malformed.
    pub skipped: Vec<String>,
}

impl MonitorConfig {
    /// A configuration that monitors every camera and zone.
    pub fn monitor_all() -> Self {
        Self::default()
    }

    /// Parse either syntax. Input whose first non-blank character is `{`
    /// is treated as structured JSON, anything else as legacy.
    pub fn parse(raw: &str) -> Result<ParsedMonitor> {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') {
            let config = Self::parse_structured(trimmed)?;
            Ok(ParsedMonitor {
                config,
                skipped: Vec::new(),
            })
        } else {
            Ok(Self::parse_legacy(trimmed))
        }
    }

    /// Parse a structured JSON object of camera name → list of zone names.
    pub fn parse_structured(json: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(json).context("Monitor config is not valid JSON")?;
        let object = match value {
            serde_json::Value::Object(map) => map,
            other => bail!(
                "Monitor config must be an object of camera → zone list, got {}",
                json_kind(&other)
            ),
        };

        let mut entries = Vec::with_capacity(object.len());
        for (camera, zones) in object {
            let zones = match zones {
                serde_json::Value::Array(items) => items
                    .into_iter()
                    .map(|item| match item {
                        serde_json::Value::String(s) => Ok(s),
                        other => bail!(
                            "Monitor config for camera '{}': zone names must be strings, got {}",
                            camera,
                            json_kind(&other)
                        ),
                    })
                    .collect::<Result<Vec<_>>>()?,
                other => bail!(
                    "Monitor config for camera '{}' must be a list of zones, got {}",
                    camera,
                    json_kind(&other)
                ),
            };
            entries.push((camera, zones));
        }

        Self::from_map(entries)
    }

    /// Build a configuration from structured camera → zones entries
    /// (already deserialized, e.g. from a TOML table).
    pub fn from_map<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let mut rules: BTreeMap<String, ZoneRule> = BTreeMap::new();
        for (camera, zones) in entries {
            let camera = camera.trim().to_string();
            if camera.is_empty() {
                bail!("Monitor config contains an empty camera name");
            }
            if zones.is_empty() {
                bail!(
                    "Monitor config for camera '{}' lists no zones (use [\"all\"] for every zone)",
                    camera
                );
            }
            let mut names = Vec::with_capacity(zones.len());
            for zone in zones {
                let zone = zone.trim().to_string();
                if zone.is_empty() {
                    bail!("Monitor config for camera '{}' contains an empty zone name", camera);
                }
                names.push(zone);
            }
            let rule = ZoneRule::from_zone_names(names);
            insert_rule(&mut rules, camera, rule);
        }
        Ok(Self { rules })
    }

    /// Parse the legacy `camera[:zone,zone];camera` syntax.
    pub fn parse_legacy(raw: &str) -> ParsedMonitor {
        let mut rules: BTreeMap<String, ZoneRule> = BTreeMap::new();
        let mut skipped = Vec::new();

        for entry in raw.split(';') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }

            let (camera, zones_str) = match entry.split_once(':') {
                Some((camera, zones)) => (camera.trim(), Some(zones)),
                None => (entry, None),
            };

            if camera.is_empty() || zones_str.is_some_and(|z| z.contains(':')) {
                skipped.push(entry.to_string());
                continue;
            }

            let rule = match zones_str {
                Some(zones) => ZoneRule::from_zone_names(
                    zones
                        .split(',')
                        .map(str::trim)
                        .filter(|z| !z.is_empty())
                        .map(str::to_string),
                ),
                None => ZoneRule::AllZones,
            };
            insert_rule(&mut rules, camera.to_string(), rule);
        }

        ParsedMonitor {
            config: Self { rules },
            skipped,
        }
    }

    /// `mapping is empty OR (camera in mapping AND (rule is ALL_ZONES OR rule ∩ zones ≠ ∅))`.
    ///
    /// A zone-restricted rule never matches an event without zones.
    pub fn matches(&self, camera: &str, zones: &[String]) -> bool {
        if self.rules.is_empty() {
            return true;
        }
        match self.rules.get(camera) {
            None => false,
            Some(ZoneRule::AllZones) => true,
            Some(ZoneRule::Zones(allowed)) => zones.iter().any(|z| allowed.contains(z)),
        }
    }

    pub fn is_match_all(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &BTreeMap<String, ZoneRule> {
        &self.rules
    }

    pub fn rule(&self, camera: &str) -> Option<&ZoneRule> {
        self.rules.get(camera)
    }

    /// Monitored camera names, sorted. Empty when every camera is monitored.
    pub fn cameras(&self) -> Vec<String> {
        self.rules.keys().cloned().collect()
    }

    /// One human-readable line per camera, e.g. `front_door: driveway, yard`.
    pub fn describe(&self) -> Vec<String> {
        if self.rules.is_empty() {
            return vec!["all cameras: all zones".to_string()];
        }
        self.rules
            .iter()
            .map(|(camera, rule)| match rule {
                ZoneRule::AllZones => format!("{}: all zones", camera),
                ZoneRule::Zones(zones) => format!(
                    "{}: {}",
                    camera,
                    zones.iter().cloned().collect::<Vec<_>>().join(", ")
                ),
            })
            .collect()
    }
}

fn insert_rule(rules: &mut BTreeMap<String, ZoneRule>, camera: String, rule: ZoneRule) {
    let merged = match rules.remove(&camera) {
        Some(existing) => existing.merge(rule),
        None => rule,
    };
    rules.insert(camera, merged);
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "a list",
        serde_json::Value::Object(_) => "an object",
    }
}
