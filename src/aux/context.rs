use std::{env, path::PathBuf};

use crate::{aux::he::PipelineError, core::config::QueueSettings};

/// Facts about the process taken from the queue-injected environment.
///
/// Built once at start-up; nothing else reads those variables.
#[derive(Clone, PartialEq, Eq, Debug)]
pub(crate) struct ExecutionContext {
    /// raw value of the array index variable, if it was set.
    pub(crate) task_index: Option<String>,
    /// directory the job was submitted from.
    pub(crate) working_dir: Option<PathBuf>,
    pub(crate) debug_mode: bool,
    pub(crate) debug_index: usize,
    index_var: String,
}

impl ExecutionContext {
    pub(crate) fn from_env(queue: &QueueSettings, debug_mode: bool, debug_index: usize) -> Self {
        Self::from_lookup(queue, debug_mode, debug_index, |k| env::var(k).ok())
    }

    pub(crate) fn from_lookup<F>(
        queue: &QueueSettings,
        debug_mode: bool,
        debug_index: usize,
        lookup: F,
    ) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            task_index: lookup(&queue.index_var),
            working_dir: lookup(&queue.workdir_var)
                .filter(|d| !d.is_empty())
                .map(PathBuf::from),
            debug_mode,
            debug_index,
            index_var: queue.index_var.clone(),
        }
    }

    /// 1-based array task index of this worker.
    ///
    /// Debug mode uses the fixed index from the command line. Otherwise the
    /// variable must be present and hold a positive integer.
    pub(crate) fn task_index(&self) -> Result<usize, PipelineError> {
        if self.debug_mode {
            return Ok(self.debug_index);
        }

        let raw = self.task_index.as_deref().ok_or_else(|| {
            PipelineError::MissingTaskIndex(format!(
                "{} is not set and debug mode is off",
                self.index_var
            ))
        })?;

        match raw.trim().parse::<usize>() {
            Ok(i) if i > 0 => Ok(i),
            _ => Err(PipelineError::MissingTaskIndex(format!(
                "{}={:?} is not a 1-based task index",
                self.index_var, raw
            ))),
        }
    }

    /// Change into the submission directory when the queue provided one.
    pub(crate) fn enter_working_dir(&self) -> std::io::Result<()> {
        if let Some(dir) = &self.working_dir {
            log::debug!("changing to working directory {}", dir.display());
            env::set_current_dir(dir)?;
        }

        Ok(())
    }
}
