use std::{
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::aux::he::PipelineError;

use super::{catalog::Catalog, layout::Layout, partition::Interval};

pub(crate) const STATS_SUFFIX: &str = "model_1.bolt";
pub(crate) const CORESNPS_SUFFIX: &str = "model_1.coresnps";
const MARKER_SUFFIX: &str = "done";

/// `<imp-base><chr>_<lower>-<upper>`, shared by every per-chunk file.
pub(crate) fn chunk_stem(imp_base: &str, interval: &Interval) -> String {
    format!("{}_{}", imp_base, interval.range_label())
}

pub(crate) fn stats_path(layout: &Layout, imp_base: &str, interval: &Interval) -> PathBuf {
    layout
        .bolt_tempdir
        .join(format!("{}.{}", chunk_stem(imp_base, interval), STATS_SUFFIX))
}

pub(crate) fn coresnps_path(layout: &Layout, imp_base: &str, interval: &Interval) -> PathBuf {
    layout
        .bolt_tempdir
        .join(format!("{}.{}", chunk_stem(imp_base, interval), CORESNPS_SUFFIX))
}

pub(crate) fn bgen_range_path(layout: &Layout, imp_base: &str, interval: &Interval) -> PathBuf {
    layout
        .bgen_tempdir
        .join(format!("{}.bgen", chunk_stem(imp_base, interval)))
}

/// plink `--out` prefix of the filtered core SNP set of one chromosome.
pub(crate) fn coreset_prefix(layout: &Layout, gen_base: &str) -> PathBuf {
    layout.plink_tempdir.join(format!("{}.coreset", gen_base))
}

/// `<output>.done`, written by a worker once its tool exited successfully.
pub(crate) fn done_marker(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(".");
    name.push(MARKER_SUFFIX);
    PathBuf::from(name)
}

pub(crate) fn write_done_marker(output: &Path) -> Result<()> {
    let marker = done_marker(output);
    fs::write(&marker, chrono::Local::now().to_rfc3339())
        .with_context(|| format!("writing {}", marker.display()))
}

/// Association results expected from each work unit, in catalog order.
pub(crate) fn expected_stats(catalog: &Catalog) -> Result<Vec<(usize, PathBuf)>, PipelineError> {
    catalog
        .chunk_list
        .iter()
        .map(|unit| {
            let imp_base = catalog.imp_base(&unit.interval.chromosome)?;
            Ok((unit.index, stats_path(&catalog.paths, imp_base, &unit.interval)))
        })
        .collect()
}

/// Filtered `.bed` files expected from the per-chromosome filtering tasks.
pub(crate) fn expected_coresets(catalog: &Catalog) -> Vec<(usize, PathBuf)> {
    catalog
        .gen_list
        .iter()
        .enumerate()
        .map(|(i, gen_base)| {
            let mut bed = coreset_prefix(&catalog.paths, gen_base).into_os_string();
            bed.push(".bed");
            (i + 1, PathBuf::from(bed))
        })
        .collect()
}

/// Remove outputs and done markers left in place by an earlier run, so only
/// the tasks of the coming job can satisfy [`validate_outputs`].
///
/// Returns the number of files removed.
pub(crate) fn clear_outputs(expected: &[(usize, PathBuf)]) -> Result<usize> {
    let mut removed = 0;

    for (_, path) in expected {
        for file in [path.clone(), done_marker(path)] {
            if file.symlink_metadata().is_ok() {
                fs::remove_file(&file)
                    .with_context(|| format!("removing stale {}", file.display()))?;
                removed += 1;
            }
        }
    }

    if removed > 0 {
        log::warn!("removed {} stale output file(s) of a previous run", removed);
    }
    Ok(removed)
}

/// Fail unless every expected output exists and is non-empty.
///
/// With `require_markers`, the worker's done marker must be there as well.
/// The error lists every missing task index, not just the first.
pub(crate) fn validate_outputs(
    stage: &str,
    expected: &[(usize, PathBuf)],
    require_markers: bool,
) -> Result<(), PipelineError> {
    let missing = expected
        .iter()
        .filter(|(_, path)| {
            let present = fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0);
            !present || (require_markers && !done_marker(path).is_file())
        })
        .map(|(index, path)| {
            log::error!("{}: no output from task {} ({})", stage, index, path.display());
            *index
        })
        .collect::<Vec<_>>();

    if !missing.is_empty() {
        return Err(PipelineError::WorkerFailure {
            stage: stage.to_string(),
            missing,
        });
    }

    log::info!("{}: all {} outputs present", stage, expected.len());
    Ok(())
}

/// Concatenate tab-separated tables sharing one header line.
///
/// Returns the number of data rows written.
pub(crate) fn concatenate_tables(inputs: &[PathBuf], output: &Path) -> Result<usize> {
    let mut out = BufWriter::new(
        File::create(output).with_context(|| format!("creating {}", output.display()))?,
    );
    let mut header: Option<String> = None;
    let mut rows = 0;

    for input in inputs {
        let reader = BufReader::new(
            File::open(input).with_context(|| format!("opening {}", input.display()))?,
        );
        let mut lines = reader.lines();

        if let Some(first) = lines.next() {
            let first = first?;
            match &header {
                None => {
                    writeln!(out, "{}", first)?;
                    header = Some(first);
                }
                Some(h) if *h == first => {}
                Some(_) => {
                    log::warn!("{}: header differs from the first table", input.display());
                    writeln!(out, "{}", first)?;
                    rows += 1;
                }
            }
        }

        for line in lines {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            writeln!(out, "{}", line)?;
            rows += 1;
        }
    }

    out.flush()?;
    log::info!(
        "merged {} rows from {} tables into {}",
        rows,
        inputs.len(),
        output.display()
    );
    Ok(rows)
}

#[cfg(test)]
mod test {
    use rustc_hash::FxHashMap;

    use super::*;
    use crate::core::catalog::build_catalog;

    const HEADER: &str = "SNP\tCHR\tBP\tGENPOS\tP_BOLT_LMM_INF";

    /// Catalog of 5 units over chromosomes 1 (3 chunks) and 2 (2 chunks).
    fn five_unit_catalog(root: &Path) -> Catalog {
        let mut per_chr = FxHashMap::default();
        per_chr.insert("1".to_string(), (1..=7).map(|i| (i * 100).to_string()).collect::<Vec<_>>());
        per_chr.insert("2".to_string(), (1..=4).map(|i| (i * 10).to_string()).collect::<Vec<_>>());
        let order = vec!["1".to_string(), "2".to_string()];
        let imp = vec!["imp_chr1".to_string(), "imp_chr2".to_string()];
        let units = build_catalog(&per_chr, &order, &imp, 3).unwrap();

        let layout = Layout::new(root);
        layout.create_all().unwrap();
        Catalog::new(order, vec!["gen_chr1".into(), "gen_chr2".into()], imp, layout)
            .unwrap()
            .with_units(units)
    }

    fn write_stats(path: &Path, row: &str) {
        fs::write(path, format!("{HEADER}\n{row}\n")).unwrap();
        write_done_marker(path).unwrap();
    }

    #[test]
    fn names_follow_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = five_unit_catalog(dir.path());
        let expected = expected_stats(&catalog).unwrap();

        assert_eq!(expected.len(), 5);
        assert_eq!(
            expected[0].1,
            catalog.paths.bolt_tempdir.join("imp_chr1_100-300.model_1.bolt")
        );
        assert_eq!(
            expected[4].1,
            catalog.paths.bolt_tempdir.join("imp_chr2_40-40.model_1.bolt")
        );
        assert_eq!(
            expected_coresets(&catalog)[1].1,
            catalog.paths.plink_tempdir.join("gen_chr2.coreset.bed")
        );
    }

    #[test]
    fn missing_fifth_output_reported() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = five_unit_catalog(dir.path());
        let expected = expected_stats(&catalog).unwrap();
        for (i, path) in &expected[..4] {
            write_stats(path, &format!("rs{i}\t1\t{i}\t0\t0.5"));
        }

        let err = validate_outputs("run-bolt", &expected, true).unwrap_err();
        assert_eq!(
            err,
            PipelineError::WorkerFailure {
                stage: "run-bolt".to_string(),
                missing: vec![5]
            }
        );
        assert!(!catalog.paths.merged_results().exists());
    }

    #[test]
    fn empty_or_unmarked_output_counts_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = five_unit_catalog(dir.path());
        let expected = expected_stats(&catalog).unwrap();
        for (i, path) in &expected {
            write_stats(path, &format!("rs{i}\t1\t{i}\t0\t0.5"));
        }
        fs::write(&expected[1].1, "").unwrap();
        fs::remove_file(done_marker(&expected[3].1)).unwrap();

        let err = validate_outputs("run-bolt", &expected, true).unwrap_err();
        assert!(matches!(err, PipelineError::WorkerFailure { ref missing, .. } if *missing == vec![2, 4]));

        // without markers only the empty file is missing
        let err = validate_outputs("run-bolt", &expected, false).unwrap_err();
        assert!(matches!(err, PipelineError::WorkerFailure { ref missing, .. } if *missing == vec![2]));
    }

    #[test]
    fn tables_merged_with_single_header() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = five_unit_catalog(dir.path());
        let expected = expected_stats(&catalog).unwrap();
        for (i, path) in &expected {
            write_stats(path, &format!("rs{i}\t1\t{i}\t0\t0.5"));
        }
        validate_outputs("run-bolt", &expected, true).unwrap();

        let inputs = expected.into_iter().map(|(_, p)| p).collect::<Vec<_>>();
        let out = catalog.paths.merged_results();
        assert_eq!(concatenate_tables(&inputs, &out).unwrap(), 5);

        let merged = fs::read_to_string(&out).unwrap();
        let lines = merged.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 6);
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1], "rs1\t1\t1\t0\t0.5");
        assert_eq!(lines[5], "rs5\t1\t5\t0\t0.5");
    }

    #[test]
    fn stale_outputs_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = five_unit_catalog(dir.path());
        let expected = expected_stats(&catalog).unwrap();
        for (i, path) in &expected[..2] {
            write_stats(path, &format!("rs{i}\t1\t{i}\t0\t0.5"));
        }

        assert_eq!(clear_outputs(&expected).unwrap(), 4);
        assert!(!expected[0].1.exists());
        assert!(!done_marker(&expected[1].1).exists());
        assert_eq!(clear_outputs(&expected).unwrap(), 0);
    }

    #[test]
    fn marker_name() {
        assert_eq!(
            done_marker(Path::new("/t/a_1-2.model_1.bolt")),
            PathBuf::from("/t/a_1-2.model_1.bolt.done")
        );
    }
}
