//! Placed static-prop instances
//!
//! Instances are built from level entity key/values and never mutated after
//! creation; the pipeline tracks which ones have been accounted for.

use std::collections::BTreeMap;

use glam::Vec3;

use crate::math::Angles;
use crate::paths::fix_slashes;

/// Entity key/values as authored in the level
pub type KeyValues = BTreeMap<String, String>;

/// Prop fades out between its fade distances
pub const FLAG_FADES: u32 = 0x1;
/// Prop is lit from a separate lighting origin entity
pub const FLAG_USE_LIGHTING_ORIGIN: u32 = 0x2;
pub const FLAG_NO_DRAW: u32 = 0x4;
pub const FLAG_IGNORE_NORMALS: u32 = 0x8;
pub const FLAG_NO_SHADOW: u32 = 0x10;
pub const FLAG_SCREEN_SPACE_FADE: u32 = 0x20;
pub const FLAG_NO_PER_VERTEX_LIGHTING: u32 = 0x40;
pub const FLAG_NO_SELF_SHADOWING: u32 = 0x80;
pub const FLAG_NO_PER_TEXEL_LIGHTING: u32 = 0x100;

/// Flags that affect render/material identity.
///
/// Fading and lighting-origin bits describe placement only and are ignored
/// when bucketing instances by signature.
pub const SIGNATURE_FLAG_MASK: u32 = !(FLAG_FADES | FLAG_USE_LIGHTING_ORIGIN);

/// Entity classnames that place a static prop
pub const STATIC_PROP_CLASSNAMES: &[&str] = &["prop_static", "static_prop"];

/// Whether `classname` places a static prop, ignoring case
pub fn is_static_prop_classname(classname: &str) -> bool {
    STATIC_PROP_CLASSNAMES
        .iter()
        .any(|c| c.eq_ignore_ascii_case(classname))
}

/// A single placed prop
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedInstance {
    /// Compiled model path (forward slashes)
    pub model: String,
    pub origin: Vec3,
    pub angles: Angles,
    /// Uniform scale
    pub scale: f32,
    pub solid: i32,
    pub skin: i32,
    pub flags: u32,
    pub fade_min_dist: f32,
    pub fade_max_dist: f32,
    pub forced_fade_scale: f32,
    pub lighting_origin: Option<String>,
    pub min_dx_level: u16,
    pub max_dx_level: u16,
    pub lightmap_resolution: [i32; 2],
}

impl PlacedInstance {
    /// Unit-scale instance with default render attributes
    pub fn new(model: impl AsRef<str>, origin: Vec3, angles: Angles) -> Self {
        Self {
            model: fix_slashes(model.as_ref()),
            origin,
            angles,
            scale: 1.0,
            solid: 6,
            skin: 0,
            flags: 0,
            fade_min_dist: 0.0,
            fade_max_dist: 0.0,
            forced_fade_scale: 1.0,
            lighting_origin: None,
            min_dx_level: 0,
            max_dx_level: 0,
            lightmap_resolution: [0, 0],
        }
    }

    /// Build an instance from a static prop entity.
    ///
    /// Returns `None` when the entity is not a static prop or has no model.
    pub fn from_keyvalues(kv: &KeyValues) -> Option<Self> {
        let classname = kv.get("classname").map(String::as_str).unwrap_or_default();
        if !is_static_prop_classname(classname) {
            return None;
        }

        let model = kv.get("model").filter(|m| !m.is_empty())?;

        let mut flags = 0u32;
        let bool_flags = [
            ("ignorenormals", FLAG_IGNORE_NORMALS),
            ("disableshadows", FLAG_NO_SHADOW),
            ("disablevertexlighting", FLAG_NO_PER_VERTEX_LIGHTING),
            ("disableselfshadowing", FLAG_NO_SELF_SHADOWING),
            ("screenspacefade", FLAG_SCREEN_SPACE_FADE),
        ];
        for (key, flag) in bool_flags {
            if int_for_key(kv, key) == 1 {
                flags |= flag;
            }
        }

        let lightmap_resolution = if int_for_key(kv, "generatelightmaps") == 0 {
            flags |= FLAG_NO_PER_TEXEL_LIGHTING;
            [0, 0]
        } else {
            [
                int_for_key(kv, "lightmapresolutionx"),
                int_for_key(kv, "lightmapresolutiony"),
            ]
        };

        let forced_fade_scale = match kv.get("fadescale") {
            Some(v) if !v.is_empty() => parse_float(v),
            _ => 1.0,
        };

        let fade_max_dist = float_for_key(kv, "fademaxdist");
        let fade_min_dist = if fade_max_dist > 0.0 {
            flags |= FLAG_FADES;
            let min = float_for_key(kv, "fademindist");
            if min < 0.0 {
                fade_max_dist
            } else {
                min
            }
        } else {
            0.0
        };

        let lighting_origin = kv
            .get("lightingorigin")
            .filter(|s| !s.is_empty())
            .cloned();
        if lighting_origin.is_some() {
            flags |= FLAG_USE_LIGHTING_ORIGIN;
        }

        let scale = match kv.get("modelscale") {
            Some(v) if !v.is_empty() => parse_float(v),
            _ => 1.0,
        };

        Some(Self {
            model: fix_slashes(model),
            origin: vector_for_key(kv, "origin"),
            angles: Angles::from_array(vector_for_key(kv, "angles").to_array()),
            scale,
            solid: int_for_key(kv, "solid"),
            skin: int_for_key(kv, "skin"),
            flags,
            fade_min_dist,
            fade_max_dist,
            forced_fade_scale,
            lighting_origin,
            min_dx_level: int_for_key(kv, "mindxlevel").clamp(0, u16::MAX as i32) as u16,
            max_dx_level: int_for_key(kv, "maxdxlevel").clamp(0, u16::MAX as i32) as u16,
            lightmap_resolution,
        })
    }

    /// Placement flags with fade and lighting-origin bits cleared
    pub fn signature_flags(&self) -> u32 {
        self.flags & SIGNATURE_FLAG_MASK
    }

    /// Whether the instance needs its own rescaled model
    pub fn needs_rescale(&self) -> bool {
        (self.scale - 1.0).abs() >= 0.0001
    }
}

/// Leading-integer parse: junk after the number is ignored, missing is 0
fn int_for_key(kv: &KeyValues, key: &str) -> i32 {
    kv.get(key).map(|v| parse_int(v)).unwrap_or(0)
}

fn float_for_key(kv: &KeyValues, key: &str) -> f32 {
    kv.get(key).map(|v| parse_float(v)).unwrap_or(0.0)
}

/// Three whitespace separated floats, missing components are 0
fn vector_for_key(kv: &KeyValues, key: &str) -> Vec3 {
    let mut out = [0.0f32; 3];
    if let Some(v) = kv.get(key) {
        for (slot, part) in out.iter_mut().zip(v.split_whitespace()) {
            *slot = parse_float(part);
        }
    }
    Vec3::from_array(out)
}

fn parse_int(s: &str) -> i32 {
    let s = s.trim();
    let end = s
        .char_indices()
        .take_while(|&(i, c)| c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+')))
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    s[..end].parse().unwrap_or(0)
}

fn parse_float(s: &str) -> f32 {
    let s = s.trim();
    if let Ok(v) = s.parse() {
        return v;
    }
    // fall back to the longest parseable prefix
    (1..s.len())
        .rev()
        .filter(|&end| s.is_char_boundary(end))
        .find_map(|end| s[..end].parse().ok())
        .unwrap_or(0.0)
}
