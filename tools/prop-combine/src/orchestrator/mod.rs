//! Compiling combined geometry into new models
//!
//! Intermediate mesh sources and build scripts live in a scoped temporary
//! directory that is removed however the compile ends.

mod decompile;
mod qc;

pub use decompile::{Decompiler, COMPANION_EXTENSIONS};
pub use qc::QcScript;

use std::ffi::OsString;
use std::path::Path;

use crate::error::CombineError;
use crate::library::ToolRunner;
use crate::mesh::{write_idle_sequence, write_static_smd, MeshSource};
use crate::signature::BuildAttributes;

const REFERENCE_FILE: &str = "body.smd";
const COLLISION_FILE: &str = "phy.smd";
const IDLE_FILE: &str = "idle.smd";

/// Model compiler invocation settings
#[derive(Debug, Clone, Copy)]
pub struct Compiler<'a> {
    pub program: &'a Path,
    pub content_root: &'a Path,
    pub map_name: &'a str,
}

/// Combined geometry ready to be compiled
#[derive(Debug, Clone, Copy)]
pub struct CombinedModel<'a> {
    pub reference: &'a MeshSource,
    /// Skipped when empty
    pub collision: &'a MeshSource,
    pub attributes: &'a BuildAttributes,
    /// Build key, which also names the output
    pub key: u32,
}

impl Compiler<'_> {
    /// Model path the compiled output is registered under
    pub fn output_model(&self, key: u32) -> String {
        format!("models/{}", self.model_name(key))
    }

    fn model_name(&self, key: u32) -> String {
        format!("maps/{}/{:x}.mdl", self.map_name, key)
    }

    /// Write the intermediates, run the compiler and return the new model path.
    ///
    /// A non-zero compiler exit is a [`CombineError::CompileFailure`].
    pub fn materialize(
        &self,
        runner: &dyn ToolRunner,
        model: CombinedModel<'_>,
    ) -> Result<String, CombineError> {
        let output = self.output_model(model.key);
        let compile_failure = |reason: String| CombineError::CompileFailure {
            model: output.clone(),
            reason,
        };

        // the compiler runs from the scratch directory
        let content_root =
            std::path::absolute(self.content_root).map_err(|e| CombineError::io(self.content_root, e))?;

        let work = tempfile::Builder::new()
            .prefix("propcombine")
            .tempdir()
            .map_err(|e| CombineError::io(std::env::temp_dir(), e))?;

        write_static_smd(&work.path().join(REFERENCE_FILE), model.reference)?;
        let collision = if model.collision.is_empty() {
            None
        } else {
            write_static_smd(&work.path().join(COLLISION_FILE), model.collision)?;
            Some(COLLISION_FILE)
        };
        write_idle_sequence(&work.path().join(IDLE_FILE))?;

        let qc_path = work.path().join(format!("{:x}.qc", model.key));
        let model_name = self.model_name(model.key);
        QcScript {
            model_name: &model_name,
            attributes: model.attributes,
            reference: REFERENCE_FILE,
            animation: IDLE_FILE,
            collision,
        }
        .write(&qc_path)?;

        let args: Vec<OsString> = vec![
            "-game".into(),
            content_root.into_os_string(),
            qc_path.into_os_string(),
        ];
        tracing::info!(
            "Compiling {} ({} verts, {} faces)",
            output,
            model.reference.vertex_count(),
            model.reference.face_count()
        );
        let code = runner
            .run(self.program, &args, work.path())
            .map_err(|e| compile_failure(format!("failed to run {}: {}", self.program.display(), e)))?;
        if code != 0 {
            return Err(compile_failure(format!("exit code {}", code)));
        }

        Ok(output)
    }
}
