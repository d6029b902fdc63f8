//! Model build-script (.qc) parsing
//!
//! Only the directives that matter for recombining a rigid static prop are
//! interpreted: `$scale`, `$modelname`, the geometry references (`$body`,
//! `$bodygroup`, `$model`) and `$collisionmodel`. Unknown compound blocks are
//! skipped by brace depth. Files declaring bones, joints, pose parameters or
//! weight lists are rejected because their geometry cannot be merged as a
//! static mesh.

use std::path::{Path, PathBuf};

use hashbrown::HashMap;
use walkdir::WalkDir;

use crate::error::CombineError;
use crate::paths::{fix_slashes, model_key, normalize_model_path};

/// Directives whose presence makes a build script unusable
const REJECTED_DIRECTIVES: &[&str] = &[
    "$collisionjoints",
    "$ikchain",
    "$weightlist",
    "$poseparameter",
    "$proceduralbones",
    "$jigglebone",
];

/// Parsed build script of a single model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    /// Normalized `models/...` path of the compiled model
    pub path: String,
    /// Reference mesh source, relative to the content root
    pub reference: String,
    /// Collision mesh source, relative to the content root
    pub collision: Option<String>,
    pub reference_scale: f32,
    pub collision_scale: f32,
}

/// Parse build-script text.
///
/// `location` is the directory (relative to the content root) that geometry
/// references are resolved against; `source` is only used for error messages.
pub fn parse_descriptor(
    text: &str,
    location: &str,
    source: &Path,
) -> Result<ModelDescriptor, CombineError> {
    let mut tokens = Tokenizer::new(text);
    let malformed = |reason: &str| CombineError::malformed(source, reason);
    let geometry_path = |token: &str| {
        if location.is_empty() {
            fix_slashes(token)
        } else {
            fix_slashes(&format!("{}/{}", location, token))
        }
    };

    let mut scale = 1.0f32;
    let mut model_name: Option<String> = None;
    let mut reference: Option<(String, f32)> = None;
    let mut collision: Option<(String, f32)> = None;

    while let Some(token) = tokens.next() {
        if token == "{" {
            skip_block(&mut tokens);
            continue;
        }

        let directive = token.to_ascii_lowercase();
        match directive.as_str() {
            "$scale" => {
                let value = tokens.next().ok_or_else(|| malformed("$scale without value"))?;
                // an unparsable value keeps the previous scale
                if let Ok(v) = value.parse() {
                    scale = v;
                }
            }
            "$modelname" => {
                let name = tokens
                    .next()
                    .ok_or_else(|| malformed("$modelname without value"))?;
                model_name = Some(name.to_string());
            }
            "$body" | "$bodygroup" | "$model" => {
                tokens
                    .next()
                    .ok_or_else(|| malformed("geometry directive without name"))?;
                let value = tokens
                    .next()
                    .ok_or_else(|| malformed("geometry directive without source"))?;

                if value != "{" {
                    if reference.is_some() {
                        return Err(malformed("more than one reference geometry"));
                    }
                    reference = Some((geometry_path(value), scale));
                    continue;
                }

                // brace block: first `studio` entry wins, later ones are ignored
                while let Some(inner) = tokens.next() {
                    if inner == "}" {
                        break;
                    }
                    if !inner.eq_ignore_ascii_case("studio") || reference.is_some() {
                        continue;
                    }
                    let file = tokens
                        .next()
                        .ok_or_else(|| malformed("studio entry without source"))?;
                    reference = Some((geometry_path(file), scale));
                }
            }
            "$collisionmodel" => {
                let value = tokens
                    .next()
                    .ok_or_else(|| malformed("$collisionmodel without source"))?;
                collision = Some((geometry_path(value), scale));
            }
            d if REJECTED_DIRECTIVES.contains(&d) => {
                return Err(malformed(&format!(
                    "{} is not supported for static geometry",
                    token
                )));
            }
            _ => {}
        }
    }

    let model_name = model_name.ok_or_else(|| malformed("missing $modelname"))?;
    let (reference, reference_scale) =
        reference.ok_or_else(|| malformed("missing reference geometry"))?;
    let (collision, collision_scale) = match collision {
        Some((path, s)) => (Some(path), s),
        None => (None, 1.0),
    };

    Ok(ModelDescriptor {
        path: normalize_model_path(&model_name),
        reference,
        collision,
        reference_scale,
        collision_scale,
    })
}

/// Consume tokens up to the brace closing an already opened block
fn skip_block(tokens: &mut Tokenizer<'_>) {
    let mut depth = 1usize;
    while let Some(token) = tokens.next() {
        match token {
            "{" => depth += 1,
            "}" => {
                depth -= 1;
                if depth == 0 {
                    return;
                }
            }
            _ => {}
        }
    }
}

/// Whitespace tokenizer with quoted strings, comments and standalone braces
struct Tokenizer<'a> {
    rest: &'a str,
}

impl<'a> Tokenizer<'a> {
    fn new(text: &'a str) -> Self {
        Self { rest: text }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            self.rest = self.rest.trim_start();
            if self.rest.starts_with("//") {
                self.rest = self.rest.find('\n').map_or("", |i| &self.rest[i + 1..]);
            } else if let Some(after) = self.rest.strip_prefix("/*") {
                self.rest = after.find("*/").map_or("", |i| &after[i + 2..]);
            } else {
                return;
            }
        }
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        self.skip_whitespace_and_comments();
        let text = self.rest;
        let first = text.chars().next()?;

        if first == '{' || first == '}' {
            self.rest = &text[1..];
            return Some(&text[..1]);
        }

        if first == '"' {
            let body = &text[1..];
            let end = body.find('"').unwrap_or(body.len());
            self.rest = body.get(end + 1..).unwrap_or("");
            return Some(&body[..end]);
        }

        let end = text
            .find(|c: char| c.is_whitespace() || c == '{' || c == '}' || c == '"')
            .unwrap_or(text.len());
        self.rest = &text[end..];
        Some(&text[..end])
    }
}

/// Descriptors keyed by normalized model path
#[derive(Debug, Default)]
pub struct DescriptorTable {
    descriptors: HashMap<String, ModelDescriptor>,
}

impl DescriptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recursively parse every `.qc` under `content_root/dir`
    ///
    /// Malformed files are logged and skipped; the table only ever holds
    /// successfully parsed descriptors.
    pub fn search(content_root: &Path, dir: &Path) -> Self {
        let mut table = Self::new();
        let search_root = content_root.join(dir);

        let walker = WalkDir::new(&search_root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry under {}: {}", search_root.display(), e);
                    continue;
                }
            };

            let path = entry.path();
            let is_qc = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("qc"))
                .unwrap_or(false);
            if !entry.file_type().is_file() || !is_qc {
                continue;
            }

            let rel = path.strip_prefix(content_root).unwrap_or(path);
            match load_descriptor(content_root, rel) {
                Ok(descriptor) => {
                    tracing::debug!("Found build script {} -> {}", rel.display(), descriptor.path);
                    table.insert(descriptor);
                }
                Err(e) => tracing::warn!("Invalid static prop build script: {}", e),
            }
        }

        table
    }

    pub fn insert(&mut self, descriptor: ModelDescriptor) {
        self.descriptors.insert(model_key(&descriptor.path), descriptor);
    }

    pub fn get(&self, model: &str) -> Option<&ModelDescriptor> {
        self.descriptors.get(&model_key(model))
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.descriptors.values()
    }
}

/// Read and parse one build script located at `rel` under the content root
pub fn load_descriptor(content_root: &Path, rel: &Path) -> Result<ModelDescriptor, CombineError> {
    let full: PathBuf = content_root.join(rel);
    let text = std::fs::read_to_string(&full).map_err(|e| CombineError::io(&full, e))?;
    let location = rel
        .parent()
        .map(|p| fix_slashes(&p.to_string_lossy()))
        .unwrap_or_default();
    parse_descriptor(&text, &location, rel)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<ModelDescriptor, CombineError> {
        parse_descriptor(text, "modelsrc/props", Path::new("test.qc"))
    }

    #[test]
    fn test_parse_minimal() {
        let qc = r#"
$modelname "props/crate01.mdl"
$body body "crate01_ref.smd"
"#;
        let d = parse(qc).unwrap();
        assert_eq!(d.path, "models/props/crate01.mdl");
        assert_eq!(d.reference, "modelsrc/props/crate01_ref.smd");
        assert_eq!(d.collision, None);
        assert_eq!(d.reference_scale, 1.0);
    }

    #[test]
    fn test_scale_applies_to_following_geometry() {
        let qc = r#"
$modelname "models\\props\\\\barrel.mdl"
$scale 2.5
$body body "barrel.smd"
$scale 0.5
$collisionmodel "barrel_phys.smd" {
    $concave
    $mass 40
}
"#;
        let d = parse(qc).unwrap();
        assert_eq!(d.path, "models/props/barrel.mdl");
        assert_eq!(d.reference_scale, 2.5);
        assert_eq!(d.collision.as_deref(), Some("modelsrc/props/barrel_phys.smd"));
        assert_eq!(d.collision_scale, 0.5);
    }

    #[test]
    fn test_bodygroup_block_first_studio_wins() {
        let qc = r#"
$modelname props/sign.mdl
$bodygroup sign
{
    studio "sign_a.smd"
    studio "sign_b.smd"
    blank
}
"#;
        let d = parse(qc).unwrap();
        assert_eq!(d.reference, "modelsrc/props/sign_a.smd");
    }

    #[test]
    fn test_compound_blocks_are_skipped() {
        let qc = r#"
$modelname props/lamp.mdl
$texturegroup skins { { "lamp" } { "lamp_off" } }
// $jigglebone in a comment is fine
$model lamp "lamp.smd" { eyeball righteye "bone" 0 0 0 "eye" 1 0 "iris" 0.6 }
"#;
        let d = parse(qc).unwrap();
        assert_eq!(d.reference, "modelsrc/props/lamp.smd");
    }

    #[test]
    fn test_rejected_directives_fail() {
        for directive in REJECTED_DIRECTIVES {
            let qc = format!(
                "$modelname props/tree.mdl\n$body body \"tree.smd\"\n{} \"branch\" {{ }}\n",
                directive
            );
            let err = parse(&qc).unwrap_err();
            assert!(
                matches!(err, CombineError::MalformedDescriptor { .. }),
                "{} should be rejected",
                directive
            );
        }
    }

    #[test]
    fn test_rejected_directive_is_case_insensitive() {
        let qc = "$modelname a.mdl\n$body body \"a.smd\"\n$JiggleBone \"tail\" { }\n";
        assert!(parse(qc).is_err());
    }

    #[test]
    fn test_missing_name_or_reference_fails() {
        assert!(parse("$body body \"a.smd\"").is_err());
        assert!(parse("$modelname a.mdl\n$collisionmodel \"a_phys.smd\"").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn test_duplicate_bare_reference_fails() {
        let qc = "$modelname a.mdl\n$body body \"a.smd\"\n$body other \"b.smd\"\n";
        assert!(parse(qc).is_err());
    }

    #[test]
    fn test_truncated_directive_fails() {
        assert!(parse("$modelname").is_err());
        assert!(parse("$modelname a.mdl\n$body body").is_err());
    }

    #[test]
    fn test_normalized_path_shape() {
        for name in ["a.mdl", "/a.mdl", "x\\\\y\\z.mdl", "models//q.mdl", "models\\r.mdl"] {
            let qc = format!("$modelname \"{}\"\n$body b \"r.smd\"\n", name);
            let d = parse(&qc).unwrap();
            assert!(d.path.starts_with("models/"), "{}", d.path);
            assert!(!d.path.contains('\\'));
            assert!(!d.path.contains("//"));
        }
    }

    #[test]
    fn test_tokenizer() {
        let tokens: Vec<_> =
            Tokenizer::new("$a \"b c\" {d} /* skip */ e // tail\nf").collect();
        assert_eq!(tokens, vec!["$a", "b c", "{", "d", "}", "e", "f"]);
    }

    #[test]
    fn test_search_table() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("modelsrc/props/.svn")).unwrap();
        std::fs::write(
            root.join("modelsrc/props/crate.QC"),
            "$modelname props/Crate.mdl\n$body body crate.smd\n",
        )
        .unwrap();
        std::fs::write(
            root.join("modelsrc/props/bad.qc"),
            "$modelname props/bad.mdl\n$body body bad.smd\n$ikchain x\n",
        )
        .unwrap();
        std::fs::write(
            root.join("modelsrc/props/.svn/hidden.qc"),
            "$modelname props/hidden.mdl\n$body body h.smd\n",
        )
        .unwrap();

        let table = DescriptorTable::search(root, Path::new("modelsrc"));
        assert_eq!(table.len(), 1);
        let d = table.get("MODELS\\props\\crate.mdl").unwrap();
        assert_eq!(d.reference, "modelsrc/props/crate.smd");
        assert!(table.get("models/props/bad.mdl").is_none());
        assert!(table.get("models/props/hidden.mdl").is_none());
    }
}
