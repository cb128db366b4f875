use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use rustc_hash::FxHashMap;

use super::{
    catalog::{build_catalog, Catalog},
    config::{PipelineConfig, ResourceSpec},
    dispatch::{CommandSpec, JobDispatcher, ProcessRunner},
    layout::Layout,
    monitor::{CompletionMonitor, PollReport, Sleeper, StatusCommand},
    outputs::{
        clear_outputs, concatenate_tables, coreset_prefix, expected_coresets, expected_stats,
        validate_outputs,
    },
    variants::{bim_path, read_positions},
    worker::{ASSOC_STAGE, FILTER_STAGE},
};

/// Drives the three stages on the batch queue, one after the other.
///
/// Each stage writes its catalog, submits one array job sized to it and
/// blocks until the job has left the queue before anything else happens.
pub(crate) struct StagePipeline<'a, R, S> {
    m_cfg: &'a PipelineConfig,
    m_config_path: PathBuf,
    m_worker_exe: String,
    m_layout: Layout,
    m_runner: &'a R,
    m_sleeper: S,
}

impl<'a, R, S> StagePipeline<'a, R, S>
where
    R: ProcessRunner,
    S: Sleeper,
{
    pub(crate) fn new(
        cfg: &'a PipelineConfig,
        config_path: PathBuf,
        worker_exe: String,
        runner: &'a R,
        sleeper: S,
    ) -> Self {
        Self {
            m_layout: Layout::new(&cfg.outdir),
            m_cfg: cfg,
            m_config_path: config_path,
            m_worker_exe: worker_exe,
            m_runner: runner,
            m_sleeper: sleeper,
        }
    }

    pub(crate) fn layout(&self) -> &Layout {
        &self.m_layout
    }

    /// Worker command line; the only inputs a task gets are these two paths.
    fn payload(&self, subcommand: &str, catalog_path: &Path) -> CommandSpec {
        CommandSpec::new(&self.m_worker_exe)
            .arg(subcommand)
            .arg("--config-file")
            .arg(self.m_config_path.to_string_lossy())
            .arg("--data-file")
            .arg(catalog_path.to_string_lossy())
    }

    fn dispatch_and_wait(
        &mut self,
        stage: &str,
        catalog_path: &Path,
        array_size: usize,
        resources: &ResourceSpec,
        interval: Duration,
    ) -> Result<PollReport> {
        let subcommand = match stage {
            FILTER_STAGE => "plink",
            _ => "bolt",
        };
        let payload = self.payload(subcommand, catalog_path);

        let dispatcher = JobDispatcher::new(
            self.m_runner,
            self.m_cfg.queue.clone(),
            &self.m_layout.log_dir,
        );
        let job = dispatcher.submit(stage, &payload, Some(array_size), resources)?;

        let status = StatusCommand::new(self.m_runner, &self.m_cfg.queue.status);
        let mut monitor = CompletionMonitor::new(status, &mut self.m_sleeper, interval);
        Ok(monitor.wait(&job))
    }

    /// Stage 1: one plink task per chromosome, then merge the core SNP sets.
    pub(crate) fn filtering_stage(&mut self, chromosomes: &[String]) -> Result<Catalog> {
        let cfg = self.m_cfg;
        let catalog = Catalog::new(
            chromosomes.to_vec(),
            cfg.gen_bases(chromosomes),
            cfg.imp_bases(chromosomes),
            self.m_layout.clone(),
        )?;
        log::info!("gen base list: {:?}", catalog.gen_list);

        let expected = expected_coresets(&catalog);
        clear_outputs(&expected)?;
        let catalog_path = catalog.persist(&self.m_layout.tempdir)?;
        self.dispatch_and_wait(
            FILTER_STAGE,
            &catalog_path,
            catalog.gen_list.len(),
            &cfg.resources.plink,
            cfg.plink_poll(),
        )?;

        validate_outputs(FILTER_STAGE, &expected, cfg.done_markers)?;
        self.merge_coresets(&catalog)?;

        Ok(catalog)
    }

    fn merge_coresets(&self, catalog: &Catalog) -> Result<()> {
        let list = self.m_layout.coreset_list();
        let mut out = BufWriter::new(
            File::create(&list).with_context(|| format!("creating {}", list.display()))?,
        );
        for gen_base in &catalog.gen_list {
            writeln!(
                out,
                "{}",
                coreset_prefix(&self.m_layout, gen_base).display()
            )?;
        }
        out.flush()?;

        let cmd = CommandSpec::new(&self.m_cfg.tools.plink)
            .arg("--merge-list")
            .arg(list.to_string_lossy())
            .arg("--make-bed")
            .arg("--out")
            .arg(self.m_layout.coreset_path.to_string_lossy())
            .passthrough();
        log::info!("merging core SNP sets: {}", cmd);

        let out = self
            .m_runner
            .run(&cmd)
            .with_context(|| format!("starting {}", cmd.program))?;
        if !out.success() {
            bail!("merging core SNP sets failed with exit status {:?}", out.code);
        }

        Ok(())
    }

    /// Stage 2: partition every chromosome and run one bolt task per chunk.
    pub(crate) fn association_stage(&mut self, chromosomes: &[String]) -> Result<Catalog> {
        let cfg = self.m_cfg;
        let imp_list = cfg.imp_bases(chromosomes);

        let mut per_chr = FxHashMap::default();
        for (chr, imp_base) in chromosomes.iter().zip(&imp_list) {
            let positions = read_positions(bim_path(&cfg.data_dir, imp_base))?;
            per_chr.insert(chr.clone(), positions);
        }

        let units = build_catalog(&per_chr, chromosomes, &imp_list, cfg.chunk_size())?;
        log::info!(
            "{} chunk(s) of at most {} variants over {} chromosome(s)",
            units.len(),
            cfg.chunk_size(),
            chromosomes.len()
        );

        let catalog = Catalog::new(
            chromosomes.to_vec(),
            cfg.gen_bases(chromosomes),
            imp_list,
            self.m_layout.clone(),
        )?
        .with_units(units);

        clear_outputs(&expected_stats(&catalog)?)?;
        let merged = self.m_layout.merged_results();
        if merged.exists() {
            fs::remove_file(&merged)
                .with_context(|| format!("removing stale {}", merged.display()))?;
        }
        let catalog_path = catalog.persist(&self.m_layout.tempdir)?;
        self.dispatch_and_wait(
            ASSOC_STAGE,
            &catalog_path,
            catalog.chunk_list.len(),
            &cfg.resources.bolt,
            cfg.bolt_poll(),
        )?;

        Ok(catalog)
    }

    /// Stage 3: check every chunk delivered, then concatenate the results.
    pub(crate) fn merge_stage(&self, catalog: &Catalog) -> Result<PathBuf> {
        let expected = expected_stats(catalog)?;
        validate_outputs(ASSOC_STAGE, &expected, self.m_cfg.done_markers)?;

        let inputs = expected.into_iter().map(|(_, p)| p).collect::<Vec<_>>();
        let merged = self.m_layout.merged_results();
        concatenate_tables(&inputs, &merged)?;

        Ok(merged)
    }

    pub(crate) fn run(&mut self) -> Result<PathBuf> {
        let chromosomes = self.m_cfg.chromosomes();
        self.m_layout.create_all()?;

        self.filtering_stage(&chromosomes)?;
        let catalog = self.association_stage(&chromosomes)?;
        self.merge_stage(&catalog)
    }
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, fs, io};

    use super::*;
    use crate::{
        aux::he::PipelineError,
        core::{
            config::test::minimal,
            dispatch::{test::ok_output, ProcessOutput},
            outputs::write_done_marker,
        },
    };

    /// Plays the queue: every array job "runs" at submission by writing the
    /// outputs its tasks would produce, except for tasks listed in `fail`.
    struct FakeCluster {
        fail: Vec<usize>,
        next_id: RefCell<usize>,
        log: RefCell<Vec<String>>,
    }

    impl FakeCluster {
        fn new(fail: Vec<usize>) -> Self {
            Self {
                fail,
                next_id: RefCell::new(100),
                log: RefCell::default(),
            }
        }

        fn run_array(&self, payload: &str) {
            let mut words = payload.split_whitespace();
            let subcommand = words.nth(1).unwrap().to_string();
            let catalog = Catalog::load(payload.split_whitespace().last().unwrap()).unwrap();

            let expected = if subcommand == "plink" {
                expected_coresets(&catalog)
            } else {
                expected_stats(&catalog).unwrap()
            };
            for (index, path) in expected {
                if self.fail.contains(&index) {
                    continue;
                }
                fs::write(&path, format!("SNP\tP\nrs{index}\t0.5\n")).unwrap();
                write_done_marker(&path).unwrap();
            }
        }
    }

    impl ProcessRunner for FakeCluster {
        fn run(&self, cmd: &CommandSpec) -> io::Result<ProcessOutput> {
            self.log
                .borrow_mut()
                .push(format!("{} {}", cmd.program, cmd.args.join(" ")));

            match cmd.program.as_str() {
                "qsub" => {
                    self.run_array(cmd.stdin.as_deref().unwrap());
                    let mut id = self.next_id.borrow_mut();
                    *id += 1;
                    Ok(ok_output(&format!("{}[].pbs\n", *id)))
                }
                // finished jobs are gone from the listing
                "qstat" => Ok(ok_output("Job id  Name\n1[].pbs  other\n")),
                _ => Ok(ok_output("")),
            }
        }
    }

    struct NoSleep;

    impl Sleeper for NoSleep {
        fn sleep(&mut self, _: Duration) {}
    }

    fn setup(root: &Path) -> PipelineConfig {
        let data = root.join("data");
        fs::create_dir_all(&data).unwrap();
        let bim = |n: usize| {
            (1..=n)
                .map(|i| format!("1\trs{i}\t0\t{}\tA\tG\n", i * 1000))
                .collect::<String>()
        };
        fs::write(data.join("ukb_imp_chr1.bim"), bim(7)).unwrap();
        fs::write(data.join("ukb_imp_chr2.bim"), bim(4)).unwrap();

        let mut cfg = minimal();
        cfg.outdir = root.join("out").to_string_lossy().into_owned();
        cfg.data_dir = data.to_string_lossy().into_owned();
        cfg.chr_list = Some("1,2".to_string());
        cfg
    }

    #[test]
    fn three_stages_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = setup(dir.path());
        let cluster = FakeCluster::new(vec![]);
        let mut pipeline = StagePipeline::new(
            &cfg,
            PathBuf::from("/cfg/bolt.yaml"),
            "/opt/boltpipe".to_string(),
            &cluster,
            NoSleep,
        );

        let merged = pipeline.run().unwrap();

        let log = cluster.log.borrow();
        let programs = log
            .iter()
            .map(|l| l.split(' ').next().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(programs, vec!["qsub", "qstat", "plink", "qsub", "qstat"]);
        assert!(log[0].contains("-N run-plink -J 1-2"));
        assert!(log[2].starts_with("plink --merge-list"));
        assert!(log[3].contains("-N run-bolt -J 1-5"));

        let merged_text = fs::read_to_string(&merged).unwrap();
        assert_eq!(merged_text.lines().count(), 6);
        assert_eq!(
            fs::read_to_string(pipeline.layout().coreset_list())
                .unwrap()
                .lines()
                .count(),
            2
        );
    }

    #[test]
    fn missing_chunk_stops_merge() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = setup(dir.path());
        let cluster = FakeCluster::new(vec![5]);
        let mut pipeline = StagePipeline::new(
            &cfg,
            PathBuf::from("bolt.yaml"),
            "boltpipe".to_string(),
            &cluster,
            NoSleep,
        );

        let err = pipeline.run().unwrap_err();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::WorkerFailure {
                stage: ASSOC_STAGE.to_string(),
                missing: vec![5]
            })
        );
        assert!(!pipeline.layout().merged_results().exists());
    }

    #[test]
    fn rerun_does_not_reuse_previous_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = setup(dir.path());

        let first = FakeCluster::new(vec![]);
        StagePipeline::new(&cfg, PathBuf::from("bolt.yaml"), "boltpipe".to_string(), &first, NoSleep)
            .run()
            .unwrap();

        // same outdir, task 5 fails this time
        let second = FakeCluster::new(vec![5]);
        let err = StagePipeline::new(
            &cfg,
            PathBuf::from("bolt.yaml"),
            "boltpipe".to_string(),
            &second,
            NoSleep,
        )
        .run()
        .unwrap_err();

        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::WorkerFailure {
                stage: ASSOC_STAGE.to_string(),
                missing: vec![5]
            })
        );
        assert!(!Layout::new(&cfg.outdir).merged_results().exists());
    }

    #[test]
    fn payload_carries_only_config_and_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = setup(dir.path());
        let cluster = FakeCluster::new(vec![]);
        let pipeline = StagePipeline::new(
            &cfg,
            PathBuf::from("/cfg/bolt.yaml"),
            "/opt/boltpipe".to_string(),
            &cluster,
            NoSleep,
        );

        let payload = pipeline.payload("bolt", Path::new("/out/temp/data_file_ab.json"));
        assert_eq!(
            payload.to_shell_line(),
            "/opt/boltpipe bolt --config-file /cfg/bolt.yaml --data-file /out/temp/data_file_ab.json"
        );
    }
}
