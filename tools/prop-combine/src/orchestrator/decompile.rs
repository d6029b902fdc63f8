//! Recovering build scripts for models that ship without sources

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::descriptor::{load_descriptor, ModelDescriptor};
use crate::error::CombineError;
use crate::library::ToolRunner;
use crate::paths::{file_base, normalize_model_path, strip_extension};

/// Files that make up one compiled model
pub const COMPANION_EXTENSIONS: &[&str] = &["mdl", "phy", "dx90.vtx", "dx80.vtx", "sw.vtx", "vvd"];

/// Decompiler invocation settings
#[derive(Debug, Clone, Copy)]
pub struct Decompiler<'a> {
    pub program: &'a Path,
    pub content_root: &'a Path,
    /// Persistent output directory, relative to the content root
    pub cache_dir: &'a Path,
}

impl Decompiler<'_> {
    /// Decompile `model` and parse the recovered build script.
    ///
    /// The compiled files are staged in a temporary directory so the
    /// decompiler never writes next to the shipped model. The recovered
    /// sources are kept under `cache_dir/<model stem>/` for later builds.
    pub fn decompile(
        &self,
        runner: &dyn ToolRunner,
        model: &str,
    ) -> Result<ModelDescriptor, CombineError> {
        let failure = |reason: String| CombineError::DecompileFailure {
            model: model.to_string(),
            reason,
        };

        // the decompiler runs from the content root, so hand it no relative paths
        let content_root = std::path::absolute(self.content_root)
            .map_err(|e| failure(format!("resolving {}: {}", self.content_root.display(), e)))?;

        let model = normalize_model_path(model);
        let base = file_base(&model);
        let stem = strip_extension(&model);

        let staging = tempfile::Builder::new()
            .prefix("propcombine-decomp")
            .tempdir()
            .map_err(|e| failure(format!("no staging directory: {}", e)))?;

        let mut staged = 0;
        for ext in COMPANION_EXTENSIONS {
            let src = content_root.join(format!("{}.{}", stem, ext));
            if !src.is_file() {
                continue;
            }
            let dst = staging.path().join(format!("{}.{}", base, ext));
            std::fs::copy(&src, &dst).map_err(|e| failure(format!("copying {}: {}", src.display(), e)))?;
            staged += 1;
        }

        let staged_model = staging.path().join(format!("{}.mdl", base));
        if !staged_model.is_file() {
            return Err(failure("compiled model not found".to_string()));
        }
        tracing::debug!("Staged {} files of {}", staged, model);

        let out_rel: PathBuf = self.cache_dir.join(stem);
        let out_dir = content_root.join(&out_rel);
        std::fs::create_dir_all(&out_dir)
            .map_err(|e| failure(format!("creating {}: {}", out_dir.display(), e)))?;

        let args: Vec<OsString> = vec![
            "decompile".into(),
            "-i".into(),
            staged_model.into_os_string(),
            "-o".into(),
            out_dir.clone().into_os_string(),
        ];
        tracing::info!("Decompiling {}", model);
        let code = runner
            .run(self.program, &args, &content_root)
            .map_err(|e| failure(format!("failed to run {}: {}", self.program.display(), e)))?;
        if code != 0 {
            return Err(failure(format!("decompiler exit code {}", code)));
        }

        let qc = out_rel.join(format!("{}.qc", base));
        let mut descriptor = load_descriptor(&content_root, &qc)
            .map_err(|e| failure(format!("unusable decompiled build script: {}", e)))?;

        // file the recovered sources under the model they were recovered for
        descriptor.path = model.clone();
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Writes a build script where a real decompiler would
    struct FakeDecompiler {
        exit_code: i32,
        qc: &'static str,
        calls: RefCell<Vec<Vec<OsString>>>,
    }

    impl ToolRunner for FakeDecompiler {
        fn run(&self, _program: &Path, args: &[OsString], cwd: &Path) -> std::io::Result<i32> {
            self.calls.borrow_mut().push(args.to_vec());
            assert!(cwd.join(&args[2]).is_file(), "staged model missing");
            let out = cwd.join(&args[4]);
            let base = file_base(&args[2].to_string_lossy()).to_string();
            std::fs::write(out.join(format!("{}.qc", base)), self.qc)?;
            Ok(self.exit_code)
        }
    }

    fn fake(exit_code: i32, qc: &'static str) -> FakeDecompiler {
        FakeDecompiler {
            exit_code,
            qc,
            calls: RefCell::new(Vec::new()),
        }
    }

    fn content_root() -> tempfile::TempDir {
        populate(tempfile::tempdir().unwrap())
    }

    fn populate(dir: tempfile::TempDir) -> tempfile::TempDir {
        std::fs::create_dir_all(dir.path().join("models/props")).unwrap();
        std::fs::write(dir.path().join("models/props/barrel.mdl"), b"IDST").unwrap();
        std::fs::write(dir.path().join("models/props/barrel.vvd"), b"IDSV").unwrap();
        dir
    }

    const BARREL_QC: &str = "$modelname \"props/Barrel.mdl\"\n$body body \"barrel_ref.smd\"\n";

    #[test]
    fn test_decompile_recovers_descriptor() {
        let root = content_root();
        let runner = fake(0, BARREL_QC);
        let decompiler = Decompiler {
            program: Path::new("crowbar"),
            content_root: root.path(),
            cache_dir: Path::new("decomp_cache"),
        };

        let descriptor = decompiler.decompile(&runner, "models\\props\\barrel.mdl").unwrap();
        assert_eq!(descriptor.path, "models/props/barrel.mdl");
        assert_eq!(descriptor.reference, "decomp_cache/models/props/barrel/barrel_ref.smd");

        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][0], "decompile");
        assert_eq!(calls[0][1], "-i");
        assert!(root.path().join("decomp_cache/models/props/barrel/barrel.qc").is_file());
    }

    #[test]
    fn test_decompile_with_relative_content_root() {
        let root = populate(tempfile::tempdir_in(".").unwrap());
        let relative = PathBuf::from(root.path().file_name().unwrap());
        let runner = fake(0, BARREL_QC);
        let decompiler = Decompiler {
            program: Path::new("crowbar"),
            content_root: &relative,
            cache_dir: Path::new("decomp_cache"),
        };

        let descriptor = decompiler.decompile(&runner, "models/props/barrel.mdl").unwrap();
        assert_eq!(descriptor.reference, "decomp_cache/models/props/barrel/barrel_ref.smd");
        assert!(Path::new(&runner.calls.borrow()[0][4]).is_absolute());
        assert!(root.path().join("decomp_cache/models/props/barrel/barrel.qc").is_file());
    }

    #[test]
    fn test_decompile_failure_exit_code() {
        let root = content_root();
        let decompiler = Decompiler {
            program: Path::new("crowbar"),
            content_root: root.path(),
            cache_dir: Path::new("decomp_cache"),
        };
        let err = decompiler
            .decompile(&fake(1, BARREL_QC), "models/props/barrel.mdl")
            .unwrap_err();
        assert!(matches!(err, CombineError::DecompileFailure { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_decompile_unusable_output() {
        let root = content_root();
        let decompiler = Decompiler {
            program: Path::new("crowbar"),
            content_root: root.path(),
            cache_dir: Path::new("decomp_cache"),
        };
        let err = decompiler
            .decompile(&fake(0, "$modelname \"x.mdl\"\n$jigglebone \"b\" {}\n"), "models/props/barrel.mdl")
            .unwrap_err();
        assert!(matches!(err, CombineError::DecompileFailure { .. }));
    }

    #[test]
    fn test_decompile_missing_model_runs_nothing() {
        let root = content_root();
        let runner = fake(0, BARREL_QC);
        let decompiler = Decompiler {
            program: Path::new("crowbar"),
            content_root: root.path(),
            cache_dir: Path::new("decomp_cache"),
        };
        assert!(decompiler.decompile(&runner, "models/props/missing.mdl").is_err());
        assert!(runner.calls.borrow().is_empty());
    }
}
