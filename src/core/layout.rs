use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Output tree of one pipeline run, stored in every catalog so workers see
/// the same directories the driver created.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct Layout {
    pub(crate) outdir: PathBuf,
    pub(crate) log_dir: PathBuf,
    pub(crate) plink_dir: PathBuf,
    pub(crate) bolt_dir: PathBuf,
    pub(crate) tempdir: PathBuf,
    pub(crate) plink_tempdir: PathBuf,
    pub(crate) bolt_tempdir: PathBuf,
    pub(crate) bgen_tempdir: PathBuf,
    pub(crate) coreset_path: PathBuf,
}

impl Layout {
    pub(crate) fn new(outdir: impl AsRef<Path>) -> Self {
        let outdir = outdir.as_ref().to_path_buf();
        let tempdir = outdir.join("temp");
        let plink_dir = outdir.join("plink");

        Self {
            log_dir: outdir.join("logs"),
            coreset_path: plink_dir.join("coreset"),
            plink_dir,
            bolt_dir: outdir.join("bolt"),
            plink_tempdir: tempdir.join("temp-plink"),
            bolt_tempdir: tempdir.join("temp-bolt"),
            bgen_tempdir: tempdir.join("temp-bgen"),
            tempdir,
            outdir,
        }
    }

    /// Create every directory of the tree; existing ones are kept.
    pub(crate) fn create_all(&self) -> Result<()> {
        for dir in [
            &self.outdir,
            &self.log_dir,
            &self.plink_dir,
            &self.bolt_dir,
            &self.tempdir,
            &self.plink_tempdir,
            &self.bolt_tempdir,
            &self.bgen_tempdir,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating directory {}", dir.display()))?;
        }

        Ok(())
    }

    pub(crate) fn coreset_list(&self) -> PathBuf {
        self.plink_tempdir.join("basename.list")
    }

    pub(crate) fn merged_results(&self) -> PathBuf {
        self.bolt_dir.join("model_1.bolt.txt")
    }
}
