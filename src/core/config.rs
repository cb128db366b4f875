use std::{fmt, fs::File, io::BufReader, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{de, Deserialize, Deserializer};

use crate::aux::he::PipelineError;

/// Pipeline settings read from the YAML configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct PipelineConfig {
    pub(crate) outdir: String,
    pub(crate) data_dir: String,
    pub(crate) sample_file: String,
    pub(crate) pheno_file: String,
    pub(crate) fam_file: String,
    pub(crate) gen_base: String,
    pub(crate) imp_base: String,
    pub(crate) chunksize: i64,
    #[serde(default)]
    pub(crate) chr_list: Option<String>,

    // core SNP filtering
    #[serde(deserialize_with = "number_or_string")]
    pub(crate) thr_maf: String,
    #[serde(deserialize_with = "number_or_string")]
    pub(crate) thr_geno: String,
    #[serde(deserialize_with = "number_or_string")]
    pub(crate) thr_hwe: String,

    // association model
    pub(crate) pheno_1: String,
    #[serde(default)]
    pub(crate) cov_1: String,
    pub(crate) ncpus: u32,
    pub(crate) ldscore_file: String,
    #[serde(deserialize_with = "number_or_string")]
    pub(crate) min_maf: String,
    #[serde(deserialize_with = "number_or_string")]
    pub(crate) min_info: String,
    #[serde(default)]
    pub(crate) remove_samples_list: Option<String>,

    #[serde(default)]
    pub(crate) queue: QueueSettings,
    #[serde(default)]
    pub(crate) resources: StageResources,
    #[serde(default)]
    pub(crate) poll_interval: PollIntervals,
    #[serde(default)]
    pub(crate) tools: ToolPaths,
    #[serde(default = "default_true")]
    pub(crate) done_markers: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub(crate) struct QueueSettings {
    pub(crate) submit: String,
    pub(crate) status: String,
    pub(crate) shell: String,
    /// decoration appended to job ids by the submit command.
    pub(crate) id_suffix: String,
    pub(crate) index_var: String,
    pub(crate) workdir_var: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            submit: "qsub".to_string(),
            status: "qstat".to_string(),
            shell: "/bin/bash".to_string(),
            id_suffix: ".pbs".to_string(),
            index_var: "PBS_ARRAY_INDEX".to_string(),
            workdir_var: "PBS_O_WORKDIR".to_string(),
        }
    }
}

/// Per-job resource request, rendered as `-l select=..` and `-l walltime=..`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct ResourceSpec {
    pub(crate) ncpus: u32,
    pub(crate) mem: String,
    pub(crate) walltime: String,
}

impl ResourceSpec {
    pub(crate) fn new(ncpus: u32, mem: &str, walltime: &str) -> Self {
        Self {
            ncpus,
            mem: mem.to_string(),
            walltime: walltime.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub(crate) struct StageResources {
    pub(crate) driver: ResourceSpec,
    pub(crate) plink: ResourceSpec,
    pub(crate) bolt: ResourceSpec,
}

impl Default for StageResources {
    fn default() -> Self {
        Self {
            driver: ResourceSpec::new(1, "16gb", "48:00:00"),
            plink: ResourceSpec::new(1, "16gb", "01:00:00"),
            bolt: ResourceSpec::new(1, "48gb", "12:00:00"),
        }
    }
}

/// Seconds between two queue-status polls, per stage.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub(crate) struct PollIntervals {
    pub(crate) plink: u64,
    pub(crate) bolt: u64,
}

impl Default for PollIntervals {
    fn default() -> Self {
        Self {
            plink: 60,
            bolt: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub(crate) struct ToolPaths {
    pub(crate) plink: String,
    pub(crate) bolt: String,
    pub(crate) bgenix: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            plink: "plink".to_string(),
            bolt: "bolt".to_string(),
            bgenix: "bgenix".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Accept a YAML number or string as tool argument text.
///
/// Strings pass through untouched. Numbers are re-rendered, so unquoted
/// `1e-6` becomes `0.000001` and `0.10` becomes `0.1`; quote a value to keep
/// its exact spelling.
fn number_or_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    struct Verbatim;

    impl<'de> de::Visitor<'de> for Verbatim {
        type Value = String;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a number or a string")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<String, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(Verbatim)
}

impl PipelineConfig {
    pub(crate) fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(
            File::open(path).with_context(|| format!("opening config {}", path.display()))?,
        );
        let cfg: Self = serde_yaml::from_reader(reader)
            .with_context(|| format!("parsing config {}", path.display()))?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub(crate) fn validate(&self) -> Result<(), PipelineError> {
        if self.chunksize <= 0 {
            return Err(PipelineError::invalid_input(format!(
                "chunksize must be positive, got {}",
                self.chunksize
            )));
        }
        if self.chromosomes().is_empty() {
            return Err(PipelineError::invalid_input("chr-list is empty"));
        }
        if self.poll_interval.plink == 0 || self.poll_interval.bolt == 0 {
            return Err(PipelineError::invalid_input("poll intervals must be positive"));
        }
        if self.ncpus == 0 {
            return Err(PipelineError::invalid_input("ncpus must be positive"));
        }

        Ok(())
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.chunksize as usize
    }

    /// Chromosomes in configured order, `1..=22` when no list is given.
    pub(crate) fn chromosomes(&self) -> Vec<String> {
        match &self.chr_list {
            Some(list) => list
                .split(',')
                .map(|c| c.split_whitespace().collect::<String>())
                .filter(|c| !c.is_empty())
                .collect(),
            None => (1..=22).map(|c| c.to_string()).collect(),
        }
    }

    pub(crate) fn gen_bases(&self, chromosomes: &[String]) -> Vec<String> {
        chromosomes
            .iter()
            .map(|c| format!("{}{}", self.gen_base, c))
            .collect()
    }

    pub(crate) fn imp_bases(&self, chromosomes: &[String]) -> Vec<String> {
        chromosomes
            .iter()
            .map(|c| format!("{}{}", self.imp_base, c))
            .collect()
    }

    pub(crate) fn plink_poll(&self) -> Duration {
        Duration::from_secs(self.poll_interval.plink)
    }

    pub(crate) fn bolt_poll(&self) -> Duration {
        Duration::from_secs(self.poll_interval.bolt)
    }
}
