//! Content path normalization
//!
//! Content paths are compared case-insensitively with forward slashes, the
//! way the game filesystem resolves them.

/// Replace backslashes with forward slashes and collapse repeated slashes
pub fn fix_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        let c = if c == '\\' { '/' } else { c };
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    out
}

/// Canonical `models/...` form of a model name
pub fn normalize_model_path(name: &str) -> String {
    let fixed = fix_slashes(name);
    let trimmed = fixed.trim_start_matches('/');
    let rooted = trimmed
        .get(..7)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("models/"));
    if rooted {
        trimmed.to_string()
    } else {
        fix_slashes(&format!("models/{}", trimmed))
    }
}

/// Table key for a model path
pub fn model_key(path: &str) -> String {
    normalize_model_path(path).to_ascii_lowercase()
}

/// File name without directory or extension
pub fn file_base(path: &str) -> &str {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.find('.') {
        Some(0) | None => name,
        Some(dot) => &name[..dot],
    }
}

/// Path with its final extension removed
pub fn strip_extension(path: &str) -> &str {
    let name_start = path.rfind(['/', '\\']).map(|i| i + 1).unwrap_or(0);
    match path[name_start..].rfind('.') {
        Some(0) | None => path,
        Some(dot) => &path[..name_start + dot],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_slashes() {
        assert_eq!(fix_slashes("models\\props//crate.mdl"), "models/props/crate.mdl");
        assert_eq!(fix_slashes("a\\\\b"), "a/b");
    }

    #[test]
    fn test_normalize_adds_models_root() {
        assert_eq!(normalize_model_path("props/crate.mdl"), "models/props/crate.mdl");
        assert_eq!(normalize_model_path("models/props/crate.mdl"), "models/props/crate.mdl");
        assert_eq!(normalize_model_path("/props\\\\crate.mdl"), "models/props/crate.mdl");
    }

    #[test]
    fn test_model_key_is_case_insensitive() {
        assert_eq!(model_key("Models\\Props/Crate.MDL"), model_key("models/props/crate.mdl"));
    }

    #[test]
    fn test_file_base_and_strip_extension() {
        assert_eq!(file_base("models/props/crate01.mdl"), "crate01");
        assert_eq!(file_base("maps\\map\\3f2a.dx90.vtx"), "3f2a");
        assert_eq!(strip_extension("models/props/crate01.mdl"), "models/props/crate01");
        assert_eq!(strip_extension("models.dir/crate"), "models.dir/crate");
    }
}
