//! Layout width resolution.
//!
//! Turns a [`WidthsSpec`] plus the configured containers and breakpoints into
//! [`TargetWidths`]: the CSS pixel width an image occupies at each viewport
//! min-width. The density expansion in [`crate::resolution`] works from here.

use crate::config::ConfigError;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Named width fractions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Full,
    Half,
    Third,
    Quarter,
    TwoThirds,
}

impl Preset {
    pub fn fraction(&self) -> f64 {
        match self {
            Preset::Full => 1.0,
            Preset::Half => 0.5,
            Preset::Third => 1.0 / 3.0,
            Preset::Quarter => 0.25,
            Preset::TwoThirds => 2.0 / 3.0,
        }
    }
}

impl FromStr for Preset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Preset::Full),
            "half" => Ok(Preset::Half),
            "third" => Ok(Preset::Third),
            "quarter" => Ok(Preset::Quarter),
            "two-thirds" => Ok(Preset::TwoThirds),
            _ => Err(ConfigError::InvalidWidths(format!("unknown preset `{}`", s))),
        }
    }
}

/// Fluent list of `(min-width, fraction)` pairs.
///
/// ```
/// use respimg::breakpoints::{Preset, WidthsBuilder};
/// let widths = WidthsBuilder::new()
///     .full(0)
///     .at(800, Preset::Half)
///     .at_fraction(1024, 0.25);
/// assert_eq!(widths.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WidthsBuilder {
    fractions: BTreeMap<u32, f64>,
}

impl WidthsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(self, min_width: u32, preset: Preset) -> Self {
        self.at_fraction(min_width, preset.fraction())
    }

    /// Later calls for the same `min_width` replace earlier ones.
    pub fn at_fraction(mut self, min_width: u32, fraction: f64) -> Self {
        self.fractions.insert(min_width, fraction);
        self
    }

    pub fn full(self, min_width: u32) -> Self { self.at(min_width, Preset::Full) }
    pub fn half(self, min_width: u32) -> Self { self.at(min_width, Preset::Half) }
    pub fn third(self, min_width: u32) -> Self { self.at(min_width, Preset::Third) }
    pub fn quarter(self, min_width: u32) -> Self { self.at(min_width, Preset::Quarter) }
    pub fn two_thirds(self, min_width: u32) -> Self { self.at(min_width, Preset::TwoThirds) }

    pub fn len(&self) -> usize {
        self.fractions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fractions.is_empty()
    }

    /// Resolves against concrete container widths.
    ///
    /// Each container takes the fraction of the largest min-width that does
    /// not exceed it, or the smallest defined fraction when none does. Keys of
    /// the result are the container widths themselves.
    pub fn resolve(&self, containers: &[u32], gutter: u32) -> Result<TargetWidths, ConfigError> {
        let (_, &smallest) = self
            .fractions
            .iter()
            .next()
            .ok_or_else(|| ConfigError::InvalidWidths("builder has no breakpoints".into()))?;

        let mut out = BTreeMap::new();
        for &container in containers {
            let mut fraction = smallest;
            // Ascending walk; the last qualifying entry wins.
            for (&min_width, &f) in &self.fractions {
                if container >= min_width {
                    fraction = f;
                }
            }
            let width = (container as f64 * fraction).floor() as i64 - gutter as i64;
            out.insert(container, width.max(1) as u32);
        }
        Ok(TargetWidths(out))
    }
}

/// What layout widths an image should be generated for.
#[derive(Debug, Clone, PartialEq)]
pub enum WidthsSpec {
    Preset(Preset),
    /// Fraction of the container, in `(0, 1]`.
    Fraction(f64),
    Builder(WidthsBuilder),
    /// Viewport min-width to image width, used verbatim.
    Explicit(BTreeMap<u32, u32>),
    /// Plain width list for static `srcset` rendering, keyed by position.
    List(Vec<u32>),
}

impl Default for WidthsSpec {
    fn default() -> Self {
        WidthsSpec::Preset(Preset::Full)
    }
}

impl FromStr for WidthsSpec {
    type Err = ConfigError;

    /// Accepts `half`, `0.4`, `400,800,1200` or `0:full,800:half,1024:0.25`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ConfigError::InvalidWidths("empty widths".into()));
        }
        if s.contains(':') {
            let mut builder = WidthsBuilder::new();
            for part in s.split(',') {
                let (min_width, fraction) = part
                    .split_once(':')
                    .ok_or_else(|| ConfigError::InvalidWidths(format!("bad builder entry `{}`", part)))?;
                let min_width = min_width
                    .trim()
                    .parse::<u32>()
                    .map_err(|e| ConfigError::InvalidWidths(format!("{}: {}", part, e)))?;
                builder = builder.at_fraction(min_width, parse_fraction(fraction.trim())?);
            }
            return Ok(WidthsSpec::Builder(builder));
        }
        if s.contains(',') {
            let widths = s
                .split(',')
                .map(|w| w.trim().parse::<u32>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| ConfigError::InvalidWidths(format!("{}: {}", s, e)))?;
            return Ok(WidthsSpec::List(widths));
        }
        if let Ok(preset) = s.parse::<Preset>() {
            return Ok(WidthsSpec::Preset(preset));
        }
        match s.parse::<f64>() {
            Ok(f) if f > 1.0 && f.fract() == 0.0 => Ok(WidthsSpec::List(vec![f as u32])),
            Ok(f) => Ok(WidthsSpec::Fraction(f)),
            Err(_) => Err(ConfigError::InvalidWidths(format!("unknown preset `{}`", s))),
        }
    }
}

impl TryFrom<String> for WidthsSpec {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl<'de> serde::Deserialize<'de> for WidthsSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn parse_fraction(raw: &str) -> Result<f64, ConfigError> {
    match raw.parse::<Preset>() {
        Ok(preset) => Ok(preset.fraction()),
        Err(_) => raw
            .parse::<f64>()
            .map_err(|_| ConfigError::InvalidWidths(format!("bad fraction `{}`", raw))),
    }
}

/// Viewport min-width (px) to image width (px). `0` is the catch-all entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetWidths(BTreeMap<u32, u32>);

impl TargetWidths {
    pub fn get(&self, viewport: u32) -> Option<u32> {
        self.0.get(&viewport).copied()
    }

    /// Largest viewport first, the order media queries are evaluated in.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.0.iter().rev().map(|(k, v)| (*k, *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<BTreeMap<u32, u32>> for TargetWidths {
    fn from(map: BTreeMap<u32, u32>) -> Self {
        TargetWidths(map)
    }
}

/// Maps a widths spec onto per-viewport target widths.
///
/// # Errors
/// `ConfigError` when no breakpoints or containers are configured, a
/// breakpoint lacks a container, a fraction is out of `(0, 1]`, or the gutter
/// consumes a whole target width.
pub fn resolve(
    spec: &WidthsSpec,
    containers: &BTreeMap<String, u32>,
    breakpoints: &BTreeMap<String, u32>,
    gutter: u32,
) -> Result<TargetWidths, ConfigError> {
    match spec {
        WidthsSpec::Preset(preset) => fraction_widths(preset.fraction(), containers, breakpoints, gutter),
        WidthsSpec::Fraction(f) => {
            if !(*f > 0.0 && *f <= 1.0) {
                return Err(ConfigError::InvalidWidths(format!("fraction {} is outside (0, 1]", f)));
            }
            fraction_widths(*f, containers, breakpoints, gutter)
        }
        WidthsSpec::Builder(builder) => {
            if breakpoints.is_empty() {
                return Err(ConfigError::NoBreakpoints);
            }
            let widths: Vec<u32> = containers.values().copied().collect();
            if widths.is_empty() {
                return Err(ConfigError::NoContainers);
            }
            builder.resolve(&widths, gutter)
        }
        WidthsSpec::Explicit(map) => {
            if map.is_empty() {
                return Err(ConfigError::InvalidWidths("explicit widths are empty".into()));
            }
            Ok(TargetWidths(map.clone()))
        }
        WidthsSpec::List(list) => {
            if list.is_empty() {
                return Err(ConfigError::InvalidWidths("width list is empty".into()));
            }
            Ok(TargetWidths(
                list.iter().enumerate().map(|(i, w)| (i as u32, *w)).collect(),
            ))
        }
    }
}

fn fraction_widths(
    fraction: f64,
    containers: &BTreeMap<String, u32>,
    breakpoints: &BTreeMap<String, u32>,
    gutter: u32,
) -> Result<TargetWidths, ConfigError> {
    if breakpoints.is_empty() {
        return Err(ConfigError::NoBreakpoints);
    }
    let smallest = containers.values().min().copied().ok_or(ConfigError::NoContainers)?;

    let mut out = BTreeMap::new();
    for (name, &viewport) in breakpoints {
        let container = containers
            .get(name)
            .copied()
            .ok_or_else(|| ConfigError::MissingContainer(name.clone()))?;
        out.insert(viewport, scaled(container, fraction, gutter)?);
    }
    out.insert(0, scaled(smallest, fraction, gutter)?);
    Ok(TargetWidths(out))
}

fn scaled(container: u32, fraction: f64, gutter: u32) -> Result<u32, ConfigError> {
    let width = (container as f64 * fraction).floor() as i64 - gutter as i64;
    if width <= 0 {
        return Err(ConfigError::InvalidWidths(format!(
            "gutter {} leaves no width in a {}px container",
            gutter, container
        )));
    }
    Ok(width as u32)
}
