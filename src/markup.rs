//! HTML for planned images: `<picture>` with per-breakpoint sources, or a
//! static `<img>` with width descriptors.

use crate::config::{FetchPriority, Loading, OutputFormat};
use crate::render::RenderPlan;
use std::collections::BTreeMap;

/// Rendering settings that do not affect which variants exist.
#[derive(Debug, Clone, Copy)]
pub struct ImgSettings<'a> {
    pub alt: &'a str,
    pub loading: Loading,
    pub fetch_priority: FetchPriority,
    pub img_attr: &'a BTreeMap<String, String>,
    pub picture_attr: &'a BTreeMap<String, String>,
    pub pretty: bool,
}

/// Ordered attribute list; setting an existing key keeps its position.
#[derive(Debug, Default)]
struct Attrs(Vec<(String, String)>);

impl Attrs {
    fn from_map(map: &BTreeMap<String, String>) -> Self {
        Attrs(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value,
            None => self.0.push((key.to_string(), value)),
        }
    }

    fn render(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!(" {}=\"{}\"", k, escape(v)))
            .collect()
    }
}

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            c => out.push(c),
        }
    }
    out
}

/// `srcset` with density descriptors; 1x carries no suffix.
pub fn density_srcset(plan: &RenderPlan, viewport: u32) -> String {
    plan.dictionary
        .get(viewport)
        .unwrap_or_default()
        .iter()
        .map(|(density, width)| format!("{}{}", plan.url(*width), density.srcset_suffix()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `srcset` with width descriptors over every unique width.
pub fn width_srcset(plan: &RenderPlan) -> String {
    plan.dictionary
        .unique_widths()
        .into_iter()
        .map(|w| format!("{} {}w", plan.url(w), w))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `sizes`: one `(min-width)` condition per breakpoint, then the default.
pub fn sizes_attribute(plan: &RenderPlan) -> String {
    let mut sizes = Vec::new();
    for (viewport, row) in plan.dictionary.iter() {
        if viewport == 0 {
            continue;
        }
        if let Some((_, width)) = row.first() {
            sizes.push(format!("(min-width: {}px) {}px", viewport, width));
        }
    }
    if let Some((_, width)) = plan.dictionary.get(0).and_then(|row| row.first()) {
        sizes.push(format!("{}px", width));
    }
    sizes.join(", ")
}

pub fn render_picture(plan: &RenderPlan, settings: &ImgSettings<'_>) -> String {
    let nl = if settings.pretty { "\n" } else { "" };
    let mut out = format!("<picture{}>{}", Attrs::from_map(settings.picture_attr).render(), nl);

    for (viewport, _) in plan.dictionary.iter() {
        if viewport == 0 {
            continue;
        }
        let srcset = density_srcset(plan, viewport);
        if srcset.is_empty() {
            continue;
        }
        let mut attrs = Attrs::default();
        attrs.set("media", format!("(min-width: {}px)", viewport));
        attrs.set("srcset", srcset);
        if matches!(plan.output, OutputFormat::webp | OutputFormat::avif) {
            attrs.set("type", plan.output.content_type());
        }
        out.push_str(&format!("  <source{}>{}", attrs.render(), nl));
    }

    out.push_str(&render_img(plan, settings, false));
    out.push_str(&format!("</picture>{}", nl));
    out
}

pub fn render_static(plan: &RenderPlan, settings: &ImgSettings<'_>) -> String {
    render_img(plan, settings, true)
}

fn render_img(plan: &RenderPlan, settings: &ImgSettings<'_>, with_srcset: bool) -> String {
    let nl = if settings.pretty { "\n" } else { "" };
    let mut attrs = Attrs::from_map(settings.img_attr);
    attrs.set("src", plan.fallback_url());
    attrs.set("alt", settings.alt);
    attrs.set("width", plan.meta.width.to_string());
    attrs.set("height", plan.meta.height.to_string());
    match settings.loading {
        Loading::Auto => {}
        Loading::Lazy => attrs.set("loading", "lazy"),
        Loading::Eager => attrs.set("loading", "eager"),
    }
    match settings.fetch_priority {
        FetchPriority::Auto => {}
        FetchPriority::High => attrs.set("fetchpriority", "high"),
        FetchPriority::Low => attrs.set("fetchpriority", "low"),
    }
    if with_srcset {
        attrs.set("srcset", width_srcset(plan));
        attrs.set("sizes", sizes_attribute(plan));
    }
    format!("  <img{}>{}", attrs.render(), nl)
}

/// Stand-in shown when the source cannot be read.
pub fn placeholder_svg(reason: &str) -> String {
    format!(
        "<svg width=\"100%\" height=\"200\" xmlns=\"http://www.w3.org/2000/svg\">\
         <rect width=\"100%\" height=\"100%\" fill=\"#f8f9fa\"/>\
         <text x=\"50%\" y=\"50%\" text-anchor=\"middle\" fill=\"#6c757d\" font-family=\"sans-serif\">{}</text>\
         </svg>",
        escape(reason)
    )
}
