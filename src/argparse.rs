use std::path::PathBuf;

use clap::{arg, command, value_parser, ArgAction, ArgMatches, Command};

fn config_arg() -> clap::Arg {
    arg!(
        -c --"config-file" <config_file> "path to yaml configuration file"
    )
    .required(true)
    .value_parser(value_parser!(PathBuf))
}

fn data_file_arg() -> clap::Arg {
    arg!(
        -f --"data-file" <data_file> "path to json data file written by the driver"
    )
    .required(true)
    .value_parser(value_parser!(PathBuf))
}

fn build_command() -> Command {
    command!() // requires `cargo` feature
        .about("bolt-lmm association pipeline on a PBS batch queue")
        .subcommand_required(true)
        .arg(
            arg!(
                -d --"debug-mode" "run in debug mode if set"
            )
            .required(false)
            .global(true)
            .action(ArgAction::SetTrue),
        )
        .arg(
            arg!(
                --"debug-index" <debug_index> "array task index used in debug mode, default is 1"
            )
            .required(false)
            .global(true)
            .value_parser(value_parser!(u64).range(1..))
            .default_value("1"),
        )
        .subcommand(
            Command::new("init")
                .about("submit the pipeline driver to the queue")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("run")
                .about("run all stages, waiting on the queue between them")
                .arg(config_arg()),
        )
        .subcommand(
            Command::new("plink")
                .about("array task: filter the core SNPs of one chromosome")
                .arg(config_arg())
                .arg(data_file_arg()),
        )
        .subcommand(
            Command::new("bolt")
                .about("array task: run bolt-lmm on one chunk")
                .arg(config_arg())
                .arg(data_file_arg()),
        )
}

pub(crate) fn parse_args() -> ArgMatches {
    build_command().get_matches()
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mode {
    Init,
    Run,
    Plink,
    Bolt,
}

pub struct RunConfig {
    pub(crate) mode: Mode,
    pub(crate) config_file: PathBuf,
    pub(crate) data_file: Option<PathBuf>,
    pub(crate) debug_mode: bool,
    pub(crate) debug_index: usize,
}

impl RunConfig {
    fn from_args(mut args: ArgMatches) -> RunConfig {
        let (name, mut sub) = args
            .remove_subcommand()
            .unwrap_or_else(|| ("run".to_string(), ArgMatches::default()));

        let mode = match name.as_str() {
            "init" => Mode::Init,
            "plink" => Mode::Plink,
            "bolt" => Mode::Bolt,
            _ => Mode::Run,
        };

        Self {
            mode,
            config_file: sub.remove_one::<PathBuf>("config-file").unwrap_or_default(),
            data_file: match mode {
                Mode::Plink | Mode::Bolt => sub.remove_one::<PathBuf>("data-file"),
                _ => None,
            },
            debug_mode: sub.remove_one::<bool>("debug-mode").unwrap_or(false),
            debug_index: sub.remove_one::<u64>("debug-index").unwrap_or(1) as usize,
        }
    }
}

pub fn set_configs() -> RunConfig {
    RunConfig::from_args(parse_args())
}
