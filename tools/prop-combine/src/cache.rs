//! Persistent cache of compiled combine outputs
//!
//! Each record maps a build key to the model that was compiled for it, along
//! with the checksum each constituent model had at the time. Opening the cache
//! drops every record whose constituents changed or whose output vanished,
//! keeps only the newest record per key and rewrites the file compacted. New
//! records are appended as they are made.
//!
//! Record layout, with `SEP` = 0x1B:
//!
//! ```text
//! (<model> SEP 0x<checksum> SEP)* SEP 0x<key> SEP <output model>\n
//! ```

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher;
use hashbrown::{HashMap, HashSet};

use crate::cluster::GroupTransform;
use crate::error::CombineError;
use crate::instance::PlacedInstance;

/// Field separator, never valid inside a content path
pub const SEPARATOR: char = '\x1b';

/// Build scale folded into merge keys for unit-scale members
const UNIT_SCALE: f32 = 1.0;

/// Header checksum stored by the model compiler
///
/// Reads the first 12 bytes of a compiled model and returns the
/// little-endian u32 at offset 8.
pub fn model_checksum(path: &Path) -> Result<u32, CombineError> {
    let mut header = [0u8; 12];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut header))
        .map_err(|e| CombineError::io(path, e))?;
    Ok(u32::from_le_bytes([header[8], header[9], header[10], header[11]]))
}

/// Key for a single instance rebuilt at its own scale
pub fn rescale_key(instance: &PlacedInstance) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(instance.model.as_bytes());
    hasher.update(&instance.skin.to_le_bytes());
    hasher.update(&instance.scale.to_le_bytes());
    hasher.update(&instance.solid.to_le_bytes());
    hasher.finalize()
}

/// Key for a merged group, folding each member in group order
pub fn merge_key(instances: &[PlacedInstance], transform: &GroupTransform) -> u32 {
    let mut hasher = Hasher::new();
    for member in &transform.members {
        let instance = &instances[member.index];
        for step in member.origin_steps {
            hasher.update(&step.to_le_bytes());
        }
        for step in member.angle_steps {
            hasher.update(&step.to_le_bytes());
        }
        hasher.update(instance.model.as_bytes());
        hasher.update(&instance.skin.to_le_bytes());
        let scale = if instance.needs_rescale() {
            instance.scale
        } else {
            UNIT_SCALE
        };
        hasher.update(&scale.to_le_bytes());
        hasher.update(&instance.solid.to_le_bytes());
    }
    hasher.finalize()
}

/// One parsed cache line
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    /// Constituent model paths with their recorded checksums
    pub constituents: Vec<(String, u32)>,
    pub key: u32,
    pub output: String,
}

impl CacheRecord {
    pub fn parse(line: &str) -> Result<Self, CombineError> {
        let corrupt = |reason: &str| CombineError::CacheCorruption(format!("{}: {:?}", reason, line));
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split(SEPARATOR).collect();

        let mut constituents = Vec::new();
        let mut i = 0;
        while let Some(&path) = fields.get(i) {
            if path.is_empty() {
                break;
            }
            let checksum = fields.get(i + 1).ok_or_else(|| corrupt("constituent without checksum"))?;
            let checksum = parse_hex(checksum).ok_or_else(|| corrupt("bad constituent checksum"))?;
            constituents.push((path.to_string(), checksum));
            i += 2;
        }

        let tail = fields.get(i..).unwrap_or_default();
        let [_, key, output] = tail else {
            return Err(corrupt("missing key or output"));
        };
        if constituents.is_empty() {
            return Err(corrupt("no constituents"));
        }
        if output.is_empty() {
            return Err(corrupt("empty output path"));
        }
        let key = parse_hex(key).ok_or_else(|| corrupt("bad key"))?;

        Ok(Self {
            constituents,
            key,
            output: output.to_string(),
        })
    }

    pub fn to_line(&self) -> String {
        let mut line = String::new();
        for (path, checksum) in &self.constituents {
            line.push_str(&format!("{}{}0x{:x}{}", path, SEPARATOR, checksum, SEPARATOR));
        }
        line.push_str(&format!("{}0x{:x}{}{}\n", SEPARATOR, self.key, SEPARATOR, self.output));
        line
    }
}

fn parse_hex(field: &str) -> Option<u32> {
    let digits = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))?;
    u32::from_str_radix(digits, 16).ok()
}

/// Build cache for one run, owning the cache file handle
#[derive(Debug)]
pub struct BuildCache {
    content_root: PathBuf,
    path: PathBuf,
    entries: HashMap<u32, String>,
    file: File,
    dropped: usize,
}

impl BuildCache {
    /// Open `cache_file` (relative to `content_root`), revalidate every record
    /// and rewrite the file with only the survivors
    pub fn open(content_root: &Path, cache_file: &Path) -> Result<Self, CombineError> {
        let path = content_root.join(cache_file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CombineError::io(parent, e))?;
        }

        let text = match std::fs::read(&path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(CombineError::io(&path, e)),
        };

        let mut valid = Vec::new();
        let mut dropped = 0;
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            match CacheRecord::parse(line).and_then(|r| validate(content_root, r)) {
                Ok(record) => valid.push(record),
                Err(e) => {
                    tracing::debug!("Dropping cache record: {}", e);
                    dropped += 1;
                }
            }
        }

        // a later record for the same key supersedes the earlier ones
        let last: HashMap<u32, usize> = valid.iter().enumerate().map(|(i, r)| (r.key, i)).collect();
        let mut entries = HashMap::new();
        let mut kept = String::new();
        for (i, record) in valid.into_iter().enumerate() {
            if last.get(&record.key) != Some(&i) {
                tracing::debug!("Dropping superseded cache record {:#x}", record.key);
                dropped += 1;
                continue;
            }
            kept.push_str(&record.to_line());
            entries.insert(record.key, record.output);
        }

        rewrite(&path, &kept)?;
        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| CombineError::io(&path, e))?;

        tracing::info!(
            "Build cache {}: {} entries, {} dropped",
            path.display(),
            entries.len(),
            dropped
        );

        Ok(Self {
            content_root: content_root.to_path_buf(),
            path,
            entries,
            file,
            dropped,
        })
    }

    /// Output model previously compiled for `key`
    pub fn lookup(&self, key: u32) -> Option<&str> {
        self.entries.get(&key).map(String::as_str)
    }

    /// Record `output` as the result of `key` built from `models`.
    ///
    /// Duplicate constituents are recorded once, in first-seen order. The
    /// entry is always usable for the rest of this run; it is only persisted
    /// when every constituent checksum can be read.
    pub fn insert<'a>(
        &mut self,
        key: u32,
        models: impl IntoIterator<Item = &'a str>,
        output: &str,
    ) -> Result<(), CombineError> {
        self.entries.insert(key, output.to_string());

        let mut seen = HashSet::new();
        let mut constituents = Vec::new();
        for model in models {
            if !seen.insert(model) {
                continue;
            }
            match model_checksum(&self.content_root.join(model)) {
                Ok(checksum) => constituents.push((model.to_string(), checksum)),
                Err(e) => {
                    tracing::warn!("Not caching {}: {}", output, e);
                    return Ok(());
                }
            }
        }

        let record = CacheRecord {
            constituents,
            key,
            output: output.to_string(),
        };
        self.file
            .write_all(record.to_line().as_bytes())
            .and_then(|()| self.file.flush())
            .map_err(|e| CombineError::io(&self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records discarded when the cache was opened
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

fn validate(content_root: &Path, record: CacheRecord) -> Result<CacheRecord, CombineError> {
    for (model, recorded) in &record.constituents {
        let current = model_checksum(&content_root.join(model))
            .map_err(|e| CombineError::CacheCorruption(e.to_string()))?;
        if current != *recorded {
            return Err(CombineError::CacheCorruption(format!(
                "{} changed (0x{:x} != 0x{:x})",
                model, current, recorded
            )));
        }
    }
    if !content_root.join(&record.output).is_file() {
        return Err(CombineError::CacheCorruption(format!(
            "output {} is missing",
            record.output
        )));
    }
    Ok(record)
}

/// Replace the cache file through a sibling temp file
fn rewrite(path: &Path, contents: &str) -> Result<(), CombineError> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| CombineError::io(dir, e))?;
    tmp.write_all(contents.as_bytes())
        .map_err(|e| CombineError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| CombineError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Angles;
    use glam::Vec3;

    fn write_model(root: &Path, rel: &str, checksum: u32) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut bytes = b"IDST".to_vec();
        bytes.extend_from_slice(&48i32.to_le_bytes());
        bytes.extend_from_slice(&checksum.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_model_checksum_reads_header() {
        let dir = tempfile::tempdir().unwrap();
        write_model(dir.path(), "models/a.mdl", 0xDEADBEEF);
        assert_eq!(model_checksum(&dir.path().join("models/a.mdl")).unwrap(), 0xDEADBEEF);

        std::fs::write(dir.path().join("short.mdl"), b"IDST").unwrap();
        assert!(model_checksum(&dir.path().join("short.mdl")).is_err());
    }

    #[test]
    fn test_record_line_format() {
        let record = CacheRecord {
            constituents: vec![("models/a.mdl".into(), 0x1f), ("models/b.mdl".into(), 0xab)],
            key: 0xcafe,
            output: "models/maps/test/cafe.mdl".into(),
        };
        let line = record.to_line();
        assert_eq!(
            line,
            "models/a.mdl\x1b0x1f\x1bmodels/b.mdl\x1b0xab\x1b\x1b0xcafe\x1bmodels/maps/test/cafe.mdl\n"
        );
        assert_eq!(CacheRecord::parse(&line).unwrap(), record);
    }

    #[test]
    fn test_record_parse_rejects_malformed() {
        for line in [
            "",
            "models/a.mdl\x1b0x1f\x1b",
            "\x1b0xcafe\x1bout.mdl",
            "models/a.mdl\x1b31\x1b\x1b0xcafe\x1bout.mdl",
            "models/a.mdl\x1b0x1f\x1b\x1bcafe\x1bout.mdl",
            "models/a.mdl\x1b0x1f\x1b\x1b0xcafe\x1bout.mdl\x1bextra",
        ] {
            let err = CacheRecord::parse(line).unwrap_err();
            assert!(matches!(err, CombineError::CacheCorruption(_)), "{:?}", line);
        }
    }

    #[test]
    fn test_cache_round_trip_and_invalidation() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let cache_file = Path::new("modelsrc/vbspaddon_mdls.cache");
        write_model(root, "models/props/a.mdl", 7);
        write_model(root, "models/maps/test/beef.mdl", 1);

        {
            let mut cache = BuildCache::open(root, cache_file).unwrap();
            assert!(cache.is_empty());
            cache
                .insert(
                    0xbeef,
                    ["models/props/a.mdl", "models/props/a.mdl"],
                    "models/maps/test/beef.mdl",
                )
                .unwrap();
            assert_eq!(cache.lookup(0xbeef), Some("models/maps/test/beef.mdl"));
        }

        let text = std::fs::read_to_string(root.join(cache_file)).unwrap();
        assert_eq!(text.matches("models/props/a.mdl").count(), 1);

        let cache = BuildCache::open(root, cache_file).unwrap();
        assert_eq!(cache.lookup(0xbeef), Some("models/maps/test/beef.mdl"));
        drop(cache);

        // constituent recompiled with a new checksum
        write_model(root, "models/props/a.mdl", 8);
        let cache = BuildCache::open(root, cache_file).unwrap();
        assert_eq!(cache.lookup(0xbeef), None);
        assert_eq!(cache.dropped(), 1);
        drop(cache);

        // the stale record is gone from disk too
        let text = std::fs::read_to_string(root.join(cache_file)).unwrap();
        assert!(text.is_empty());
    }

    #[test]
    fn test_cache_drops_missing_output_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_model(root, "models/props/a.mdl", 7);
        write_model(root, "models/maps/test/1.mdl", 1);

        let good = CacheRecord {
            constituents: vec![("models/props/a.mdl".into(), 7)],
            key: 1,
            output: "models/maps/test/1.mdl".into(),
        };
        let missing = CacheRecord {
            key: 2,
            output: "models/maps/test/2.mdl".into(),
            ..good.clone()
        };
        let contents = format!("{}garbage line\n{}", good.to_line(), missing.to_line());
        std::fs::create_dir_all(root.join("modelsrc")).unwrap();
        std::fs::write(root.join("modelsrc/c.cache"), contents).unwrap();

        let cache = BuildCache::open(root, Path::new("modelsrc/c.cache")).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.dropped(), 2);
        assert!(cache.lookup(1).is_some());
        assert!(cache.lookup(2).is_none());
    }

    #[test]
    fn test_cache_keeps_newest_record_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_model(root, "models/props/a.mdl", 7);
        write_model(root, "models/maps/test/old.mdl", 1);
        write_model(root, "models/maps/test/new.mdl", 2);

        let older = CacheRecord {
            constituents: vec![("models/props/a.mdl".into(), 7)],
            key: 0x51,
            output: "models/maps/test/old.mdl".into(),
        };
        let newer = CacheRecord {
            output: "models/maps/test/new.mdl".into(),
            ..older.clone()
        };
        let contents = format!("{}{}", older.to_line(), newer.to_line());
        std::fs::create_dir_all(root.join("modelsrc")).unwrap();
        std::fs::write(root.join("modelsrc/c.cache"), contents).unwrap();

        let cache = BuildCache::open(root, Path::new("modelsrc/c.cache")).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.dropped(), 1);
        assert_eq!(cache.lookup(0x51), Some("models/maps/test/new.mdl"));
        drop(cache);

        let text = std::fs::read_to_string(root.join("modelsrc/c.cache")).unwrap();
        assert_eq!(text, newer.to_line());
    }

    #[test]
    fn test_keys_are_stable_and_discriminating() {
        let mut a = PlacedInstance::new("models/props/a.mdl", Vec3::ZERO, Angles::ZERO);
        a.scale = 2.0;
        let base = rescale_key(&a);
        assert_eq!(base, rescale_key(&a.clone()));

        let mut b = a.clone();
        b.skin = 1;
        assert_ne!(base, rescale_key(&b));
        let mut b = a.clone();
        b.scale = 2.5;
        assert_ne!(base, rescale_key(&b));
        // placement does not matter for a rescale
        let mut b = a.clone();
        b.origin = Vec3::splat(100.0);
        assert_eq!(base, rescale_key(&b));
    }

    #[test]
    fn test_merge_key_follows_layout() {
        let instances = vec![
            PlacedInstance::new("models/props/a.mdl", Vec3::ZERO, Angles::ZERO),
            PlacedInstance::new("models/props/a.mdl", Vec3::new(10.0, 0.0, 0.0), Angles::ZERO),
        ];
        let t = GroupTransform::compute(&instances, &[0, 1], 15.0, 100.0).unwrap();
        let key = merge_key(&instances, &t);

        // same layout elsewhere in the world
        let moved: Vec<_> = instances
            .iter()
            .map(|i| PlacedInstance {
                origin: i.origin + Vec3::new(500.0, 20.0, 0.0),
                ..i.clone()
            })
            .collect();
        let t2 = GroupTransform::compute(&moved, &[0, 1], 15.0, 100.0).unwrap();
        assert_eq!(key, merge_key(&moved, &t2));

        let reversed = GroupTransform::compute(&instances, &[1, 0], 15.0, 100.0).unwrap();
        assert_ne!(key, merge_key(&instances, &reversed));
    }
}
