use std::path::Path;

use anyhow::{Context, Result};
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

const PATTERN: &str = "[{d(%Y-%m-%d %H:%M:%S)}] {T} {t} {l}>> {m}{n}";

fn level(debug_mode: bool) -> LevelFilter {
    if debug_mode {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

fn build_config(debug_mode: bool, log_file: Option<&Path>) -> Result<Config> {
    let stderr = ConsoleAppender::builder()
        .target(log4rs::append::console::Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();

    let mut builder =
        Config::builder().appender(Appender::builder().build("stderr", Box::new(stderr)));
    let mut root = Root::builder().appender("stderr");

    if let Some(path) = log_file {
        let file_appender = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(PATTERN)))
            .append(true)
            .build(path)
            .with_context(|| format!("opening log file {}", path.display()))?;

        builder = builder.appender(Appender::builder().build("file", Box::new(file_appender)));
        root = root.appender("file");
    }

    Ok(builder.build(root.build(level(debug_mode)))?)
}

pub(crate) fn init_logger(debug_mode: bool) -> Result<log4rs::Handle> {
    let config = build_config(debug_mode, None)?;

    Ok(log4rs::init_config(config)?)
}

/// Mirror the log into `log_file` once the output directory exists.
pub(crate) fn attach_log_file(
    handle: &log4rs::Handle,
    debug_mode: bool,
    log_file: &Path,
) -> Result<()> {
    handle.set_config(build_config(debug_mode, Some(log_file))?);
    log::debug!("logging to {}", log_file.display());

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn file_appender_added() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.log");

        let config = build_config(true, Some(&path)).unwrap();

        assert_eq!(config.appenders().len(), 2);
        assert_eq!(config.root().level(), LevelFilter::Debug);
        assert!(path.exists());
    }

    #[test]
    fn stderr_only_by_default() {
        let config = build_config(false, None).unwrap();

        assert_eq!(config.appenders().len(), 1);
        assert_eq!(config.root().level(), LevelFilter::Info);
    }
}
