use crate::compiler::descriptor::{Implementation, OptimizerSpec};
use crate::compiler::{ExportableModel, ModelCompiler};
use crate::error::ExportError;
use crate::model::{ModelFormat, StoredModel};
use log::info;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const DRIVER_FILE: &str = "main.cpp";
pub const BUILD_DESCRIPTOR_FILE: &str = "CMakeLists.txt";

/// The fixed build scaffold copied next to every generated model.
#[derive(Debug, Clone, PartialEq)]
pub struct Scaffold {
    pub driver: PathBuf,
    pub build_descriptor: PathBuf,
}

impl Scaffold {
    /// Expects `main.cpp` and `CMakeLists.txt` inside `dir`.
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        Scaffold {
            driver: dir.join(DRIVER_FILE),
            build_descriptor: dir.join(BUILD_DESCRIPTOR_FILE),
        }
    }

    fn stage(&self, output_dir: &Path) -> Result<(), ExportError> {
        stage_file(&self.driver, &output_dir.join(DRIVER_FILE))?;
        stage_file(&self.build_descriptor, &output_dir.join(BUILD_DESCRIPTOR_FILE))
    }
}

fn stage_file(source: &Path, target: &Path) -> Result<(), ExportError> {
    fs::copy(source, target).map_err(|e| ExportError::Staging {
        path: source.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(())
}

/// Turns the stored reference model into a buildable native project.
pub struct Exporter {
    compiler: Arc<dyn ModelCompiler>,
    scaffold: Scaffold,
}

impl Exporter {
    pub fn new(compiler: Arc<dyn ModelCompiler>, scaffold: Scaffold) -> Self {
        Exporter { compiler, scaffold }
    }

    /// Generates code for one (implementation, optimizer) pair into
    /// `output_dir` and stages the scaffold next to it. Re-exporting into
    /// the same directory overwrites the previous files.
    pub fn export(
        &self,
        model: &StoredModel,
        output_dir: &Path,
        model_name: &str,
        implementation: &Implementation,
        optimizer: &OptimizerSpec,
        test_csv: &Path,
    ) -> Result<(), ExportError> {
        let exportable = ExportableModel::load(&model.path, model.format)?;
        fs::create_dir_all(output_dir)?;

        info!(
            "Exporting {} {} with {} to {}",
            model_name,
            implementation,
            optimizer,
            output_dir.display()
        );
        let request = exportable.compile_request(output_dir, implementation, optimizer);
        self.compiler.compile(&request)?;

        self.scaffold.stage(output_dir)?;
        if model.format == ModelFormat::Onnx {
            let file_name = test_csv.file_name().ok_or_else(|| ExportError::Staging {
                path: test_csv.to_path_buf(),
                message: "not a file".to_string(),
            })?;
            stage_file(test_csv, &output_dir.join(file_name))?;
        }

        Ok(())
    }
}
