use std::{
    fs::{self, File, OpenOptions},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::aux::he::PipelineError;

use super::{
    layout::Layout,
    partition::{partition, Interval},
};

/// One array-job task: the interval handled by task `index` (1-based).
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct WorkUnit {
    pub index: usize,
    #[serde(flatten)]
    pub interval: Interval,
}

pub(crate) fn check_counts(chromosomes: usize, basenames: usize) -> Result<(), PipelineError> {
    if chromosomes != basenames {
        return Err(PipelineError::ChromosomeCountMismatch {
            chromosomes,
            basenames,
        });
    }

    Ok(())
}

/// Partition every chromosome in `chromosome_order` and number the
/// resulting intervals 1..=N across the whole genome.
///
/// The order is taken as given; chromosome names such as "1".."22" must not
/// be sorted as text.
pub fn build_catalog<P>(
    per_chromosome_positions: &FxHashMap<String, Vec<P>>,
    chromosome_order: &[String],
    basenames: &[String],
    chunk_size: usize,
) -> Result<Vec<WorkUnit>, PipelineError>
where
    P: AsRef<str>,
{
    check_counts(chromosome_order.len(), basenames.len())?;
    if chunk_size == 0 {
        return Err(PipelineError::invalid_input("chunk size must be positive"));
    }

    let mut units = Vec::new();
    for chr in chromosome_order {
        let positions = per_chromosome_positions.get(chr).ok_or_else(|| {
            PipelineError::invalid_input(format!("no positions supplied for chromosome {}", chr))
        })?;

        for interval in partition(chr, positions, chunk_size)? {
            units.push(WorkUnit {
                index: units.len() + 1,
                interval,
            });
        }
    }

    Ok(units)
}

/// Everything a worker needs to find its task, shared through a JSON file.
///
/// `chunk-list` is empty for the per-chromosome filtering stage, whose tasks
/// index into `gen-list` instead.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct Catalog {
    pub(crate) chr_list: Vec<String>,
    pub(crate) gen_list: Vec<String>,
    pub(crate) imp_list: Vec<String>,
    #[serde(default)]
    pub(crate) chunk_list: Vec<WorkUnit>,
    pub(crate) paths: Layout,
}

impl Catalog {
    pub(crate) fn new(
        chr_list: Vec<String>,
        gen_list: Vec<String>,
        imp_list: Vec<String>,
        paths: Layout,
    ) -> Result<Self, PipelineError> {
        check_counts(chr_list.len(), gen_list.len())?;
        check_counts(chr_list.len(), imp_list.len())?;

        Ok(Self {
            chr_list,
            gen_list,
            imp_list,
            chunk_list: Vec::new(),
            paths,
        })
    }

    pub(crate) fn with_units(mut self, units: Vec<WorkUnit>) -> Self {
        self.chunk_list = units;
        self
    }

    /// Genotype basename handled by filtering task `index`.
    pub(crate) fn gen_base(&self, index: usize) -> Result<&str, PipelineError> {
        lookup(&self.gen_list, index).map(|s| s.as_str())
    }

    pub(crate) fn work_unit(&self, index: usize) -> Result<&WorkUnit, PipelineError> {
        lookup(&self.chunk_list, index)
    }

    /// Imputed-data basename of `chromosome`.
    pub(crate) fn imp_base(&self, chromosome: &str) -> Result<&str, PipelineError> {
        self.chr_list
            .iter()
            .position(|c| c == chromosome)
            .and_then(|i| self.imp_list.get(i))
            .map(|s| s.as_str())
            .ok_or_else(|| {
                PipelineError::invalid_input(format!("chromosome {} not in catalog", chromosome))
            })
    }

    /// Write the catalog to a fresh, uniquely named file under `dir`.
    ///
    /// The file is never overwritten and is made read-only after writing:
    /// workers of a running stage index into it.
    pub(crate) fn persist(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let path = dir
            .as_ref()
            .join(format!("data_file_{}.json", uuid::Uuid::new_v4().simple()));

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("creating catalog {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        drop(writer);

        let mut perms = fs::metadata(&path)?.permissions();
        perms.set_readonly(true);
        fs::set_permissions(&path, perms)?;

        log::info!(
            "catalog with {} chromosome(s), {} chunk(s) written to {}",
            self.chr_list.len(),
            self.chunk_list.len(),
            path.display()
        );
        Ok(path)
    }

    pub(crate) fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(
            File::open(path).with_context(|| format!("opening catalog {}", path.display()))?,
        );
        let catalog: Self = serde_json::from_reader(reader)
            .with_context(|| format!("parsing catalog {}", path.display()))?;

        check_counts(catalog.chr_list.len(), catalog.gen_list.len())
            .and_then(|_| check_counts(catalog.chr_list.len(), catalog.imp_list.len()))
            .with_context(|| format!("inconsistent catalog {}", path.display()))?;

        Ok(catalog)
    }
}

fn lookup<T>(list: &[T], index: usize) -> Result<&T, PipelineError> {
    if index == 0 || index > list.len() {
        return Err(PipelineError::invalid_input(format!(
            "task index {} outside 1..={}",
            index,
            list.len()
        )));
    }

    Ok(&list[index - 1])
}
