//! Build script emission for combined models

use std::fmt::Write as _;
use std::path::Path;

use crate::error::CombineError;
use crate::signature::BuildAttributes;

/// Inputs of one generated build script
#[derive(Debug, Clone)]
pub struct QcScript<'a> {
    /// Output model, relative to `models/`
    pub model_name: &'a str,
    pub attributes: &'a BuildAttributes,
    /// Reference mesh file name, next to the script
    pub reference: &'a str,
    /// Idle sequence file name, next to the script
    pub animation: &'a str,
    /// Collision mesh file name, when the model has one
    pub collision: Option<&'a str>,
}

impl QcScript<'_> {
    pub fn render(&self) -> String {
        let attrs = self.attributes;
        let mut out = String::new();

        out.push_str("$staticprop\n");
        let _ = writeln!(out, "$modelname \"{}\"", self.model_name);
        let _ = writeln!(out, "$surfaceprop \"{}\"", attrs.surface_prop);
        let _ = writeln!(out, "$body body \"{}\"", self.reference);
        let _ = writeln!(out, "$contents {}", attrs.contents);
        let _ = writeln!(out, "$sequence idle {} act_idle 1", self.animation);

        out.push_str("$cdmaterials ");
        for path in attrs.cd_materials.iter().filter(|p| !p.is_empty()) {
            let _ = write!(out, "\"{}\" ", path);
        }
        out.push('\n');

        if let Some(collision) = self.collision {
            let _ = writeln!(out, "$collisionmodel \"{}\" {{", collision);
            out.push_str("$maxconvexpieces 2048\n");
            out.push_str("$automass\n");
            out.push_str("$concave\n}\n");
        }

        out
    }

    pub fn write(&self, path: &Path) -> Result<(), CombineError> {
        std::fs::write(path, self.render()).map_err(|e| CombineError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::parse_descriptor;

    fn attributes() -> BuildAttributes {
        BuildAttributes {
            surface_prop: "wood_crate".into(),
            contents: 1,
            cd_materials: vec!["models/props/".into(), "models/props_junk/".into()],
        }
    }

    #[test]
    fn test_render_without_collision() {
        let attrs = attributes();
        let script = QcScript {
            model_name: "maps/test/1f2e.mdl",
            attributes: &attrs,
            reference: "body.smd",
            animation: "idle.smd",
            collision: None,
        };
        assert_eq!(
            script.render(),
            "$staticprop\n\
             $modelname \"maps/test/1f2e.mdl\"\n\
             $surfaceprop \"wood_crate\"\n\
             $body body \"body.smd\"\n\
             $contents 1\n\
             $sequence idle idle.smd act_idle 1\n\
             $cdmaterials \"models/props/\" \"models/props_junk/\" \n"
        );
    }

    #[test]
    fn test_render_with_collision_parses_back() {
        let attrs = attributes();
        let script = QcScript {
            model_name: "maps/test/1f2e.mdl",
            attributes: &attrs,
            reference: "body.smd",
            animation: "idle.smd",
            collision: Some("phy.smd"),
        };
        let text = script.render();
        assert!(text.contains("$collisionmodel \"phy.smd\" {\n$maxconvexpieces 2048\n$automass\n$concave\n}\n"));

        // the emitted script is itself a valid static prop build script
        let descriptor = parse_descriptor(&text, "tmp", Path::new("combined.qc")).unwrap();
        assert_eq!(descriptor.path, "models/maps/test/1f2e.mdl");
        assert_eq!(descriptor.reference, "tmp/body.smd");
        assert_eq!(descriptor.collision.as_deref(), Some("tmp/phy.smd"));
    }
}
