//! Pixel-density expansion of layout widths.

use crate::breakpoints::TargetWidths;
use crate::config::{ConfigError, FALLBACK_WIDTH};
use std::collections::BTreeMap;
use std::fmt;

/// Most density steps above 1x a single image may expand into.
pub const MAX_DENSITY_STEPS: u32 = 64;

/// Upper bound applied to generated widths or heights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaxDimension {
    /// Bounded by the source image's own dimension.
    #[default]
    Source,
    Px(u32),
    Unbounded,
}

impl std::str::FromStr for MaxDimension {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(MaxDimension::Source),
            "none" => Ok(MaxDimension::Unbounded),
            px => px
                .parse::<u32>()
                .map(MaxDimension::Px)
                .map_err(|_| format!("Invalid max dimension: {}", s)),
        }
    }
}

impl<'de> serde::Deserialize<'de> for MaxDimension {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(serde::Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Px(u32),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Px(px) => Ok(MaxDimension::Px(px)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Device pixel ratio, e.g. `1`, `1.5`, `2`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Density(f64);

impl Density {
    pub fn value(&self) -> f64 {
        self.0
    }

    /// The `srcset` suffix: empty at 1x, `" 1.5x"` above it.
    pub fn srcset_suffix(&self) -> String {
        if self.0 > 1.0 { format!(" {}x", self) } else { String::new() }
    }
}

impl fmt::Display for Density {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.fract() == 0.0 {
            write!(f, "{}", self.0 as u64)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExpandOptions {
    pub max_resolution: f64,
    pub resolution_step: f64,
    pub max_width: MaxDimension,
    pub max_height: MaxDimension,
    pub allow_upscale: bool,
}

impl Default for ExpandOptions {
    fn default() -> Self {
        Self {
            max_resolution: 2.0,
            resolution_step: 0.5,
            max_width: MaxDimension::Source,
            max_height: MaxDimension::Source,
            allow_upscale: false,
        }
    }
}

/// Per-viewport density candidates. The `0` entry always exists and is never
/// empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionDictionary {
    entries: BTreeMap<u32, Vec<(Density, u32)>>,
}

impl ResolutionDictionary {
    /// Viewports largest first, densities ascending within each.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[(Density, u32)])> + '_ {
        self.entries.iter().rev().map(|(k, v)| (*k, v.as_slice()))
    }

    pub fn get(&self, viewport: u32) -> Option<&[(Density, u32)]> {
        self.entries.get(&viewport).map(Vec::as_slice)
    }

    /// Width for an exact density at a viewport, if one was emitted.
    pub fn width_at(&self, viewport: u32, density: f64) -> Option<u32> {
        self.get(viewport)?
            .iter()
            .find(|(d, _)| (d.value() - density).abs() < 1e-9)
            .map(|(_, w)| *w)
    }

    /// Every emitted width, deduplicated and ascending.
    pub fn unique_widths(&self) -> Vec<u32> {
        let mut widths: Vec<u32> = self.entries.values().flatten().map(|(_, w)| *w).collect();
        widths.sort_unstable();
        widths.dedup();
        widths
    }

    pub fn smallest_width(&self) -> u32 {
        self.unique_widths().first().copied().unwrap_or(FALLBACK_WIDTH)
    }
}

/// Expands each target width into density multiples that respect the source
/// dimensions and any configured caps.
pub fn expand(
    targets: &TargetWidths,
    source_width: u32,
    source_height: u32,
    opts: &ExpandOptions,
) -> ResolutionDictionary {
    let max_width = effective_max_width(source_width, opts);
    let max_height = match opts.max_height {
        MaxDimension::Source => Some(source_height),
        MaxDimension::Px(px) => Some(px),
        MaxDimension::Unbounded => None,
    };
    let densities = densities(opts.max_resolution, opts.resolution_step);

    let mut entries = BTreeMap::new();
    for (viewport, image_width) in targets.iter() {
        let mut row = Vec::new();
        for density in &densities {
            let width = (image_width as f64 * density.value()).floor() as u64;
            if width == 0 || max_width.is_some_and(|max| width > max as u64) {
                continue;
            }
            if let Some(cap) = max_height {
                if source_width > 0 {
                    let height = width * source_height as u64 / source_width as u64;
                    if height > cap as u64 {
                        continue;
                    }
                }
            }
            row.push((*density, width as u32));
        }
        entries.insert(viewport, row);
    }

    let fallback_missing = entries.get(&0).map_or(true, Vec::is_empty);
    if fallback_missing {
        let width = max_width.map_or(FALLBACK_WIDTH, |max| max.min(FALLBACK_WIDTH));
        entries.insert(0, vec![(Density(1.0), width)]);
    }

    ResolutionDictionary { entries }
}

fn effective_max_width(source_width: u32, opts: &ExpandOptions) -> Option<u32> {
    match (opts.max_width, opts.allow_upscale) {
        (MaxDimension::Source, _) => Some(source_width),
        (MaxDimension::Px(px), false) => Some(px.min(source_width)),
        (MaxDimension::Px(px), true) => Some(px),
        (MaxDimension::Unbounded, false) => Some(source_width),
        (MaxDimension::Unbounded, true) => None,
    }
}

fn densities(max_resolution: f64, step: f64) -> Vec<Density> {
    let mut out: Vec<Density> = Vec::new();
    if !(step > 0.0) {
        return vec![Density(1.0)];
    }
    for i in 0..=MAX_DENSITY_STEPS {
        let d = ((1.0 + i as f64 * step) * 10_000.0).round() / 10_000.0;
        if d > max_resolution + 1e-9 {
            break;
        }
        // Steps below the rounding precision collapse onto the same descriptor.
        if out.last().is_some_and(|last| last.0 == d) {
            continue;
        }
        out.push(Density(d));
    }
    out
}

/// Rejects density ranges that would need more than [`MAX_DENSITY_STEPS`]
/// steps above 1x.
pub fn check_density_range(max_resolution: f64, step: f64) -> Result<(), ConfigError> {
    if !(max_resolution >= 1.0) {
        return Err(ConfigError::InvalidMaxResolution(max_resolution));
    }
    if !(step > 0.0) {
        return Err(ConfigError::InvalidResolutionStep(step));
    }
    if (max_resolution - 1.0) / step > MAX_DENSITY_STEPS as f64 + 1e-9 {
        return Err(ConfigError::TooManyDensities { max_resolution, step });
    }
    Ok(())
}
