//! Grouping signatures
//!
//! Instances whose models share materials, contents and surface property, and
//! whose placement flags agree outside the fade and lighting-origin bits, can
//! be drawn as one model. The signature folds exactly those inputs.

use crc32fast::Hasher;
use hashbrown::HashMap;

use crate::error::CombineError;
use crate::instance::{PlacedInstance, SIGNATURE_FLAG_MASK};
use crate::library::{ModelAttributes, ModelLibrary};
use crate::paths::fix_slashes;

/// Width of the surface property field folded into the signature
const SURFACE_PROP_FIELD: usize = 32;

/// Material/content metadata shared by every instance of one signature
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildAttributes {
    pub surface_prop: String,
    pub contents: i32,
    pub cd_materials: Vec<String>,
}

impl From<&ModelAttributes> for BuildAttributes {
    fn from(attrs: &ModelAttributes) -> Self {
        Self {
            surface_prop: attrs.surface_prop.clone(),
            contents: attrs.contents,
            cd_materials: attrs.cd_materials.iter().map(|p| fix_slashes(p)).collect(),
        }
    }
}

/// Grouping key of a model placed with `placement_flags`
pub fn signature(attrs: &ModelAttributes, placement_flags: u32) -> u32 {
    let mut hasher = Hasher::new();

    for path in &attrs.cd_materials {
        hasher.update(fix_slashes(path).as_bytes());
    }
    for texture in &attrs.textures {
        hasher.update(texture.as_bytes());
    }

    hasher.update(&attrs.flags.to_le_bytes());
    hasher.update(&((placement_flags & SIGNATURE_FLAG_MASK) as i32).to_le_bytes());
    hasher.update(&attrs.contents.to_le_bytes());

    // fixed-width, zero padded, truncated like the lump's name field
    let mut surface = [0u8; SURFACE_PROP_FIELD];
    let bytes = attrs.surface_prop.as_bytes();
    let len = bytes.len().min(SURFACE_PROP_FIELD - 1);
    surface[..len].copy_from_slice(&bytes[..len]);
    hasher.update(&surface);

    hasher.finalize()
}

/// Signature of a placed instance
pub fn instance_signature(attrs: &ModelAttributes, instance: &PlacedInstance) -> u32 {
    signature(attrs, instance.signature_flags())
}

/// Instances sharing one signature
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureBucket {
    pub signature: u32,
    pub attributes: BuildAttributes,
    /// Instance indices, in instance order
    pub members: Vec<usize>,
}

/// Instances split into signature buckets
#[derive(Debug, Default)]
pub struct Bucketing {
    /// Buckets in first-seen order
    pub buckets: Vec<SignatureBucket>,
    /// Instances whose model attributes could not be read
    pub unavailable: Vec<(usize, CombineError)>,
}

/// Bucket every instance by signature
pub fn bucket_by_signature(instances: &[PlacedInstance], library: &dyn ModelLibrary) -> Bucketing {
    let mut bucketing = Bucketing::default();
    let mut by_signature: HashMap<u32, usize> = HashMap::new();

    for (index, instance) in instances.iter().enumerate() {
        let attrs = match library.attributes(&instance.model) {
            Ok(attrs) => attrs,
            Err(e) => {
                bucketing.unavailable.push((index, e));
                continue;
            }
        };
        let signature = instance_signature(&attrs, instance);
        let buckets = &mut bucketing.buckets;
        let slot = *by_signature.entry(signature).or_insert_with(|| {
            buckets.push(SignatureBucket {
                signature,
                attributes: BuildAttributes::from(&attrs),
                members: Vec::new(),
            });
            buckets.len() - 1
        });
        buckets[slot].members.push(index);
    }

    bucketing
}
