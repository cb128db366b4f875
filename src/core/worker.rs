use std::{fs, path::Path};

use anyhow::{Context, Result};

use crate::aux::he::PipelineError;

use super::{
    catalog::{Catalog, WorkUnit},
    config::PipelineConfig,
    dispatch::{CommandSpec, ProcessRunner},
    outputs::{
        bgen_range_path, coreset_prefix, coresnps_path, expected_coresets, stats_path,
        write_done_marker,
    },
    variants::{bim_path, rewrite_variant_ids},
};

pub(crate) const FILTER_STAGE: &str = "run-plink";
pub(crate) const ASSOC_STAGE: &str = "run-bolt";

/// Run `cmd`; a failing tool is reported as a failure of task `index`.
fn run_tool<R: ProcessRunner>(runner: &R, stage: &str, index: usize, cmd: &CommandSpec) -> Result<()> {
    log::info!("running {}", cmd);

    let out = runner
        .run(cmd)
        .with_context(|| format!("starting {}", cmd.program))?;
    if !out.success() {
        log::error!("{} exited with {:?}", cmd.program, out.code);
        if !out.stderr.is_empty() {
            log::error!("{}", out.stderr.trim_end());
        }
        return Err(PipelineError::WorkerFailure {
            stage: stage.to_string(),
            missing: vec![index],
        })
        .with_context(|| format!("{} failed", cmd.program));
    }

    Ok(())
}

/// Categorical and quantitative covariate columns from `cat1,cat2;q1,q2`.
pub(crate) fn split_covariates(covariates: &str) -> (Vec<String>, Vec<String>) {
    let cols = |part: Option<&str>| {
        part.unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>()
    };
    let mut parts = covariates.split(';');

    (cols(parts.next()), cols(parts.next()))
}

/// Region argument for `bgenix -incl-range`; the chromosome is padded to
/// two digits as stored in the UK Biobank files.
pub(crate) fn bgen_range(unit: &WorkUnit) -> String {
    format!(
        "{:0>2}:{}-{}",
        unit.interval.chromosome, unit.interval.lower, unit.interval.upper
    )
}

pub(crate) fn plink_command(cfg: &PipelineConfig, input_prefix: &Path, out_prefix: &Path) -> CommandSpec {
    CommandSpec::new(&cfg.tools.plink)
        .arg("--bfile")
        .arg(input_prefix.to_string_lossy())
        .arg("--keep")
        .arg(&cfg.pheno_file)
        .arg("--maf")
        .arg(&cfg.thr_maf)
        .arg("--geno")
        .arg(&cfg.thr_geno)
        .arg("--hwe")
        .arg(&cfg.thr_hwe)
        .arg("--make-bed")
        .arg("--out")
        .arg(out_prefix.to_string_lossy())
        .passthrough()
}

pub(crate) fn bolt_command(cfg: &PipelineConfig, catalog: &Catalog, imp_base: &str, unit: &WorkUnit) -> CommandSpec {
    let layout = &catalog.paths;
    let pheno_col = cfg.pheno_1.split(',').next().unwrap_or("").trim();
    let (ccovar, qcovar) = split_covariates(&cfg.cov_1);

    let mut cmd = CommandSpec::new(&cfg.tools.bolt).passthrough().args([
        format!("--bfile={}", layout.coreset_path.display()),
        "--noBgenIDcheck".to_string(),
        format!(
            "--bgenFile={}",
            bgen_range_path(layout, imp_base, &unit.interval).display()
        ),
        format!("--sampleFile={}", cfg.sample_file),
        format!("--phenoFile={}", cfg.pheno_file),
        format!("--phenoCol={}", pheno_col),
        "--lmm".to_string(),
        "--covarMaxLevels=50".to_string(),
        "--h2gGuess=0.15".to_string(),
        format!("--numThreads={}", cfg.ncpus),
        format!("--LDscoresFile={}", cfg.ldscore_file),
        "--LDscoresMatchBp".to_string(),
        "--verboseStats".to_string(),
        format!("--bgenMinMAF={}", cfg.min_maf),
        format!("--bgenMinINFO={}", cfg.min_info),
        format!(
            "--statsFile={}",
            coresnps_path(layout, imp_base, &unit.interval).display()
        ),
        format!(
            "--statsFileBgenSnps={}",
            stats_path(layout, imp_base, &unit.interval).display()
        ),
    ]);

    if !ccovar.is_empty() || !qcovar.is_empty() {
        cmd = cmd.arg(format!("--covarFile={}", cfg.pheno_file));
    }
    cmd = cmd
        .args(ccovar.iter().map(|c| format!("--covarCol={}", c)))
        .args(qcovar.iter().map(|c| format!("--qCovarCol={}", c)));

    if let Some(remove) = cfg.remove_samples_list.as_deref().filter(|r| !r.is_empty()) {
        cmd = cmd.arg(format!("--remove={}", remove));
    }
    cmd
}

/// Filtering task `index`: prepare the inputs of one chromosome and keep
/// its core SNPs with plink.
pub(crate) fn run_filter_task<R: ProcessRunner>(
    cfg: &PipelineConfig,
    catalog: &Catalog,
    index: usize,
    runner: &R,
) -> Result<()> {
    let gen_base = catalog.gen_base(index)?;
    let layout = &catalog.paths;
    log::info!("task {}: filtering {}", index, gen_base);

    let work_dir = layout.tempdir.join(format!("temp-{}", gen_base));
    fs::create_dir_all(&work_dir)
        .with_context(|| format!("creating directory {}", work_dir.display()))?;
    let work_prefix = work_dir.join(gen_base);
    let in_work = |ext: &str| work_dir.join(format!("{}.{}", gen_base, ext));

    // per-chromosome copy of the inputs: renamed variant ids, linked bed,
    // shared fam
    let n = rewrite_variant_ids(bim_path(&cfg.data_dir, gen_base), in_work("bim"))?;
    log::debug!("{} variants in {}", n, gen_base);

    // the link target must not depend on the link's own directory
    let bed_src = Path::new(&cfg.data_dir)
        .join(format!("{}.bed", gen_base))
        .canonicalize()
        .with_context(|| format!("locating {}.bed in {}", gen_base, cfg.data_dir))?;
    link_or_copy(&bed_src, &in_work("bed"))?;
    fs::copy(&cfg.fam_file, in_work("fam"))
        .with_context(|| format!("copying {}", cfg.fam_file))?;

    let out_prefix = coreset_prefix(layout, gen_base);
    run_tool(
        runner,
        FILTER_STAGE,
        index,
        &plink_command(cfg, &work_prefix, &out_prefix),
    )?;

    let (_, bed) = expected_coresets(catalog).swap_remove(index - 1);
    write_done_marker(&bed)?;
    log::info!("task {}: core SNPs written to {}", index, out_prefix.display());
    Ok(())
}

/// Association task `index`: cut the unit's range out of the imputed data
/// and run the mixed model on it.
pub(crate) fn run_assoc_task<R: ProcessRunner>(
    cfg: &PipelineConfig,
    catalog: &Catalog,
    index: usize,
    runner: &R,
) -> Result<()> {
    let unit = catalog.work_unit(index)?;
    let imp_base = catalog.imp_base(&unit.interval.chromosome)?;
    let layout = &catalog.paths;
    log::info!(
        "task {}: chromosome {}, range {}",
        index,
        unit.interval.chromosome,
        unit.interval.range_label()
    );

    let bgen_file = Path::new(&cfg.data_dir).join(format!("{}.bgen", imp_base));
    let range_file = bgen_range_path(layout, imp_base, &unit.interval);

    let extract = CommandSpec::new(&cfg.tools.bgenix)
        .arg("-g")
        .arg(bgen_file.to_string_lossy())
        .arg("-incl-range")
        .arg(bgen_range(unit))
        .stdout_to(&range_file)
        .passthrough();
    run_tool(runner, ASSOC_STAGE, index, &extract)?;

    let index_cmd = CommandSpec::new(&cfg.tools.bgenix)
        .arg("-g")
        .arg(range_file.to_string_lossy())
        .arg("-index")
        .passthrough();
    run_tool(runner, ASSOC_STAGE, index, &index_cmd)?;

    run_tool(runner, ASSOC_STAGE, index, &bolt_command(cfg, catalog, imp_base, unit))?;

    write_done_marker(&stats_path(layout, imp_base, &unit.interval))?;
    log::info!("task {}: finished at {}", index, chrono::Local::now());
    Ok(())
}

fn link_or_copy(src: &Path, dst: &Path) -> Result<()> {
    if dst.symlink_metadata().is_ok() {
        fs::remove_file(dst)?;
    }

    #[cfg(unix)]
    std::os::unix::fs::symlink(src, dst)
        .with_context(|| format!("linking {} -> {}", dst.display(), src.display()))?;
    #[cfg(not(unix))]
    fs::copy(src, dst).with_context(|| format!("copying {}", src.display()))?;

    Ok(())
}
