use std::{io, thread, time::Duration};

use crate::aux::{
    he::PipelineError,
    pbar::{get_hms, prepare_spinner},
};

use super::dispatch::{CommandSpec, Job, ProcessOutput, ProcessRunner};

/// Source of the global queue listing.
pub(crate) trait QueueStatus {
    fn query(&mut self) -> io::Result<ProcessOutput>;
}

impl<Q: QueueStatus + ?Sized> QueueStatus for &mut Q {
    fn query(&mut self) -> io::Result<ProcessOutput> {
        (**self).query()
    }
}

/// Runs the queue's status command (`qstat`) without a job filter.
pub(crate) struct StatusCommand<'r, R> {
    m_runner: &'r R,
    m_command: CommandSpec,
}

impl<'r, R: ProcessRunner> StatusCommand<'r, R> {
    pub(crate) fn new(runner: &'r R, program: &str) -> Self {
        Self {
            m_runner: runner,
            m_command: CommandSpec::new(program),
        }
    }
}

impl<'r, R: ProcessRunner> QueueStatus for StatusCommand<'r, R> {
    fn query(&mut self) -> io::Result<ProcessOutput> {
        self.m_runner.run(&self.m_command)
    }
}

pub(crate) trait Sleeper {
    fn sleep(&mut self, dur: Duration);
}

impl<S: Sleeper + ?Sized> Sleeper for &mut S {
    fn sleep(&mut self, dur: Duration) {
        (**self).sleep(dur)
    }
}

pub(crate) struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, dur: Duration) {
        thread::sleep(dur)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum MonitorState {
    Submitted,
    Polling,
    /// the last query failed; says nothing about the job.
    PollError,
    Done,
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub(crate) struct PollReport {
    pub(crate) polls: usize,
    pub(crate) poll_errors: usize,
    pub(crate) waited: Duration,
}

/// Decide the next state from one status query.
///
/// A listing that still mentions the job keeps it running even when the
/// query exited non-zero. Absence only counts from a successful query.
pub(crate) fn classify(
    job_id: &str,
    result: &io::Result<ProcessOutput>,
) -> Result<MonitorState, PipelineError> {
    match result {
        Ok(out) if out.stdout.contains(job_id) => Ok(MonitorState::Polling),
        Ok(out) if out.success() => Ok(MonitorState::Done),
        Ok(out) => Err(PipelineError::PollError(format!(
            "status command exited with {:?}: {}",
            out.code,
            out.stderr.trim()
        ))),
        Err(e) => Err(PipelineError::PollError(e.to_string())),
    }
}

/// Blocks until a job has left the queue.
///
/// There is no timeout: a job stuck in the queue keeps the caller waiting
/// until the process is killed.
pub(crate) struct CompletionMonitor<Q, S> {
    m_status: Q,
    m_sleeper: S,
    m_interval: Duration,
    m_state: MonitorState,
}

impl<Q, S> CompletionMonitor<Q, S>
where
    Q: QueueStatus,
    S: Sleeper,
{
    pub(crate) fn new(status: Q, sleeper: S, interval: Duration) -> Self {
        Self {
            m_status: status,
            m_sleeper: sleeper,
            m_interval: interval,
            m_state: MonitorState::Submitted,
        }
    }

    pub(crate) fn state(&self) -> MonitorState {
        self.m_state
    }

    /// Run one query and move the state machine.
    pub(crate) fn poll(&mut self, job: &Job) -> MonitorState {
        let result = self.m_status.query();

        self.m_state = match classify(&job.identifier, &result) {
            Ok(MonitorState::Polling) => {
                log::debug!("task {} in queue", job.identifier);
                MonitorState::Polling
            }
            Ok(state) => state,
            Err(e) => {
                debug_assert!(e.is_transient());
                log::warn!("{} (job {}), polling again", e, job.identifier);
                MonitorState::PollError
            }
        };
        self.m_state
    }

    pub(crate) fn wait(&mut self, job: &Job) -> PollReport {
        let mut report = PollReport::default();
        let pb = prepare_spinner(format!(
            "waiting for {} (job {})",
            job.stage_name, job.identifier
        ));

        log::info!(
            "polling queue for job {} every {}",
            job.identifier,
            get_hms(self.m_interval.as_secs_f64())
        );

        loop {
            let state = self.poll(job);
            report.polls += 1;
            pb.inc(1);

            match state {
                MonitorState::Done => break,
                MonitorState::PollError => report.poll_errors += 1,
                MonitorState::Polling | MonitorState::Submitted => {}
            }

            self.m_sleeper.sleep(self.m_interval);
            report.waited += self.m_interval;
        }

        pb.finish_and_clear();
        log::info!(
            "task {} finished after {} poll(s), {} failed, waited {}",
            job.identifier,
            report.polls,
            report.poll_errors,
            get_hms(report.waited.as_secs_f64())
        );
        report
    }
}
