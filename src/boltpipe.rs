use std::{
    env,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Instant,
};

use anyhow::{Context, Result};

use crate::{
    argparse::{Mode, RunConfig},
    aux::{context::ExecutionContext, pbar::get_hms},
    core::{
        catalog::Catalog,
        config::PipelineConfig,
        dispatch::{CommandSpec, JobDispatcher, SystemRunner},
        layout::Layout,
        monitor::ThreadSleeper,
        stages::StagePipeline,
        worker::{run_assoc_task, run_filter_task},
    },
    utils::{
        check_file_valid, command_line,
        logging::{attach_log_file, init_logger},
    },
};

pub const BOLTPIPE_VER: &str = env!("CARGO_PKG_VERSION");
pub(crate) static COMMAND: OnceLock<String> = OnceLock::new();

const DRIVER_JOB: &str = "bolt-lmm-pipeline";
const LOG_FILE: &str = "pipeline.log";

pub fn boltpipe(config: RunConfig) -> Result<()> {
    let handle = init_logger(config.debug_mode)?;

    log::debug!(">> Checking inputs...");
    prepare_run(&config)?;

    let timer = Instant::now();
    let cfg = PipelineConfig::from_path(&config.config_file)?;
    let ctx = ExecutionContext::from_env(&cfg.queue, config.debug_mode, config.debug_index);

    match config.mode {
        Mode::Init => init(&config, &cfg)?,
        Mode::Run => {
            let config_path = absolute(&config.config_file)?;
            ctx.enter_working_dir()
                .context("changing to the submission directory")?;
            let layout = Layout::new(&cfg.outdir);
            layout.create_all()?;
            attach_log_file(&handle, config.debug_mode, &layout.log_dir.join(LOG_FILE))?;
            banner().iter().for_each(|line| log::info!("{}", line));

            let runner = SystemRunner;
            let mut pipeline = StagePipeline::new(
                &cfg,
                config_path,
                current_exe()?,
                &runner,
                ThreadSleeper,
            );
            let merged = pipeline.run()?;
            log::info!("association results merged into {}", merged.display());
        }
        Mode::Plink | Mode::Bolt => {
            ctx.enter_working_dir()
                .context("changing to the submission directory")?;
            let index = ctx.task_index()?;
            let data_file = config
                .data_file
                .as_ref()
                .context("--data-file is required for array tasks")?;
            check_file_valid(data_file)?;
            let catalog = Catalog::load(data_file)?;
            log::debug!("task {} of {}", index, data_file.display());

            let runner = SystemRunner;
            if config.mode == Mode::Plink {
                run_filter_task(&cfg, &catalog, index, &runner)?;
            } else {
                run_assoc_task(&cfg, &catalog, index, &runner)?;
            }
        }
    }

    println!(
        "# boltpipe v{}, time used: {}\n",
        BOLTPIPE_VER,
        get_hms(timer.elapsed().as_secs_f64())
    );

    log::info!("done");
    Ok(())
}

/// Submit the driver itself as a single job, so the whole pipeline runs on
/// the cluster and the login session can end.
fn init(config: &RunConfig, cfg: &PipelineConfig) -> Result<()> {
    let layout = Layout::new(&cfg.outdir);
    layout.create_all()?;

    let mut payload = CommandSpec::new(current_exe()?)
        .arg("run")
        .arg("--config-file")
        .arg(absolute(&config.config_file)?.to_string_lossy());
    if config.debug_mode {
        payload = payload.arg("--debug-mode");
    }

    let runner = SystemRunner;
    let dispatcher = JobDispatcher::new(&runner, cfg.queue.clone(), &layout.log_dir);
    let job = dispatcher.submit(DRIVER_JOB, &payload, None, &cfg.resources.driver)?;

    println!("bolt-lmm pipeline initialised with job-id {}", job.identifier);
    Ok(())
}

/// Program, version, time and the invoking command line.
fn banner() -> Vec<String> {
    vec![
        format!("{} v{}", env!("CARGO_PKG_NAME"), BOLTPIPE_VER),
        format!("time: {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S")),
        format!("command: {}", COMMAND.get().map_or("", |c| c.as_str())),
    ]
}

fn prepare_run(config: &RunConfig) -> Result<()> {
    COMMAND.get_or_init(command_line);
    banner().iter().for_each(|line| log::info!("{}", line));

    check_file_valid(&config.config_file)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .with_context(|| format!("resolving {}", path.display()))
}

fn current_exe() -> Result<String> {
    Ok(env::current_exe()
        .context("locating the running executable")?
        .to_string_lossy()
        .into_owned())
}
