use std::{
    fmt,
    fs::File,
    io::{self, Write},
    path::PathBuf,
    process::{Command, Stdio},
};

use crate::aux::he::PipelineError;

use super::config::{QueueSettings, ResourceSpec};

/// An external program invocation: argument vector, no shell involved.
#[derive(Clone, PartialEq, Eq, Debug)]
pub(crate) struct CommandSpec {
    pub(crate) program: String,
    pub(crate) args: Vec<String>,
    /// text fed to the child's stdin.
    pub(crate) stdin: Option<String>,
    /// file receiving the child's stdout instead of capturing it.
    pub(crate) stdout_to: Option<PathBuf>,
    /// child writes straight to our stdout/stderr (the job's `.o`/`.e`
    /// files) instead of being captured.
    pub(crate) passthrough: bool,
}

impl CommandSpec {
    pub(crate) fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            stdout_to: None,
            passthrough: false,
        }
    }

    pub(crate) fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub(crate) fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub(crate) fn stdin(mut self, text: impl Into<String>) -> Self {
        self.stdin = Some(text.into());
        self
    }

    pub(crate) fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_to = Some(path.into());
        self
    }

    pub(crate) fn passthrough(mut self) -> Self {
        self.passthrough = true;
        self
    }

    /// Single-line rendering for a batch script. Every word is quoted.
    pub(crate) fn to_shell_line(&self) -> String {
        let mut line = std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|w| shell_quote(w))
            .collect::<Vec<_>>()
            .join(" ");

        if let Some(path) = &self.stdout_to {
            line.push_str(" > ");
            line.push_str(&shell_quote(&path.to_string_lossy()));
        }
        line
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_shell_line())
    }
}

fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,+@%".contains(c));

    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub(crate) struct ProcessOutput {
    /// `None` when the child was killed by a signal.
    pub(crate) code: Option<i32>,
    pub(crate) stdout: String,
    pub(crate) stderr: String,
}

impl ProcessOutput {
    pub(crate) fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Capability to run external programs; tests substitute a fake.
pub(crate) trait ProcessRunner {
    fn run(&self, cmd: &CommandSpec) -> io::Result<ProcessOutput>;
}

/// Runs commands as real child processes.
pub(crate) struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, cmd: &CommandSpec) -> io::Result<ProcessOutput> {
        log::debug!("exec: {}", cmd);

        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(if cmd.passthrough {
                Stdio::inherit()
            } else {
                Stdio::piped()
            });
        match &cmd.stdout_to {
            Some(path) => command.stdout(File::create(path)?),
            None if cmd.passthrough => command.stdout(Stdio::inherit()),
            None => command.stdout(Stdio::piped()),
        };

        let mut child = command.spawn()?;
        if let (Some(text), Some(mut pipe)) = (&cmd.stdin, child.stdin.take()) {
            pipe.write_all(text.as_bytes())?;
            pipe.write_all(b"\n")?;
        }
        let out = child.wait_with_output()?;

        Ok(ProcessOutput {
            code: out.status.code(),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    }
}

/// A submitted batch job.
#[derive(Clone, PartialEq, Eq, Debug)]
pub(crate) struct Job {
    pub(crate) identifier: String,
    pub(crate) stage_name: String,
}

/// Submits batch jobs to the queue. Does not wait for them.
pub(crate) struct JobDispatcher<'r, R> {
    m_runner: &'r R,
    m_queue: QueueSettings,
    m_log_dir: PathBuf,
}

impl<'r, R> JobDispatcher<'r, R>
where
    R: ProcessRunner,
{
    pub(crate) fn new(runner: &'r R, queue: QueueSettings, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            m_runner: runner,
            m_queue: queue,
            m_log_dir: log_dir.into(),
        }
    }

    /// Submission command for `payload`; `array_size` adds `-J 1-<N>`.
    pub(crate) fn submit_command(
        &self,
        job_name: &str,
        payload: &CommandSpec,
        array_size: Option<usize>,
        resources: &ResourceSpec,
    ) -> CommandSpec {
        let log_dir = self.m_log_dir.to_string_lossy().into_owned();
        let mut cmd = CommandSpec::new(&self.m_queue.submit).args([
            "-S",
            self.m_queue.shell.as_str(),
            "-o",
            log_dir.as_str(),
            "-e",
            log_dir.as_str(),
            "-V",
            "-N",
            job_name,
        ]);

        if let Some(n) = array_size {
            cmd = cmd.arg("-J").arg(format!("1-{}", n));
        }

        cmd.arg("-l")
            .arg(format!(
                "select=1:ncpus={}:mem={}",
                resources.ncpus, resources.mem
            ))
            .arg("-l")
            .arg(format!("walltime={}", resources.walltime))
            .stdin(payload.to_shell_line())
    }

    pub(crate) fn submit(
        &self,
        job_name: &str,
        payload: &CommandSpec,
        array_size: Option<usize>,
        resources: &ResourceSpec,
    ) -> Result<Job, PipelineError> {
        if array_size == Some(0) {
            return Err(PipelineError::invalid_input(format!(
                "job {} has no tasks to submit",
                job_name
            )));
        }

        let cmd = self.submit_command(job_name, payload, array_size, resources);
        log::info!("submitting {} (payload: {})", job_name, payload);
        log::debug!("submit command: {}", cmd);

        let out = self
            .m_runner
            .run(&cmd)
            .map_err(|e| PipelineError::submission(format!("running {}: {}", cmd.program, e)))?;

        if !out.success() {
            return Err(PipelineError::submission(format!(
                "{} exited with {:?}: {}",
                cmd.program,
                out.code,
                out.stderr.trim()
            )));
        }

        let identifier = parse_job_id(&out.stdout, &self.m_queue.id_suffix)?;
        log::info!("{} running as job-id {}", job_name, identifier);

        Ok(Job {
            identifier,
            stage_name: job_name.to_string(),
        })
    }
}

/// Extract the job id from the submission output, dropping the queue's
/// decoration (e.g. `4711[].pbs` -> `4711[]`).
pub(crate) fn parse_job_id(stdout: &str, suffix: &str) -> Result<String, PipelineError> {
    let text = stdout.trim();
    if text.is_empty() {
        return Err(PipelineError::submission("no job id in submit output"));
    }
    if text.lines().count() > 1 || text.split_whitespace().count() > 1 {
        return Err(PipelineError::submission(format!(
            "unexpected submit output: {:?}",
            text
        )));
    }

    let id = if suffix.is_empty() {
        text
    } else {
        text.strip_suffix(suffix).unwrap_or(text)
    };
    if id.is_empty() {
        return Err(PipelineError::submission(format!(
            "job id {:?} is empty after removing {:?}",
            text, suffix
        )));
    }

    Ok(id.to_string())
}

#[cfg(test)]
pub(crate) mod test {
    use std::{cell::RefCell, collections::VecDeque};

    use super::*;

    /// Replays canned outputs and records every command it was given.
    #[derive(Default)]
    pub(crate) struct FakeRunner {
        pub(crate) outputs: RefCell<VecDeque<io::Result<ProcessOutput>>>,
        pub(crate) calls: RefCell<Vec<CommandSpec>>,
    }

    impl FakeRunner {
        pub(crate) fn replying(outputs: Vec<ProcessOutput>) -> Self {
            Self {
                outputs: RefCell::new(outputs.into_iter().map(Ok).collect()),
                calls: RefCell::default(),
            }
        }
    }

    impl ProcessRunner for FakeRunner {
        fn run(&self, cmd: &CommandSpec) -> io::Result<ProcessOutput> {
            self.calls.borrow_mut().push(cmd.clone());
            self.outputs
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Ok(ok_output("")))
        }
    }

    pub(crate) fn ok_output(stdout: &str) -> ProcessOutput {
        ProcessOutput {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    fn payload() -> CommandSpec {
        CommandSpec::new("/opt/boltpipe")
            .args(["bolt", "--config-file", "my config.yaml"])
            .arg("--data-file")
            .arg("data_file_1.json")
    }

    #[test]
    fn array_submission() {
        let runner = FakeRunner::replying(vec![ok_output("4711[].pbs\n")]);
        let dispatcher = JobDispatcher::new(&runner, QueueSettings::default(), "/out/logs");
        let job = dispatcher
            .submit(
                "run-bolt",
                &payload(),
                Some(5),
                &ResourceSpec::new(1, "48gb", "12:00:00"),
            )
            .unwrap();

        assert_eq!(job.identifier, "4711[]");
        assert_eq!(job.stage_name, "run-bolt");

        let calls = runner.calls.borrow();
        assert_eq!(calls[0].program, "qsub");
        assert_eq!(
            calls[0].args,
            vec![
                "-S", "/bin/bash", "-o", "/out/logs", "-e", "/out/logs", "-V", "-N", "run-bolt",
                "-J", "1-5", "-l", "select=1:ncpus=1:mem=48gb", "-l", "walltime=12:00:00"
            ]
        );
        assert_eq!(
            calls[0].stdin.as_deref(),
            Some("/opt/boltpipe bolt --config-file 'my config.yaml' --data-file data_file_1.json")
        );
    }

    #[test]
    fn plain_job_has_no_array_flag() {
        let runner = FakeRunner::replying(vec![ok_output("99.pbs")]);
        let dispatcher = JobDispatcher::new(&runner, QueueSettings::default(), "logs");
        let job = dispatcher
            .submit("main", &payload(), None, &ResourceSpec::new(1, "16gb", "48:00:00"))
            .unwrap();

        assert_eq!(job.identifier, "99");
        assert!(!runner.calls.borrow()[0].args.contains(&"-J".to_string()));
    }

    #[test]
    fn failed_submission() {
        let runner = FakeRunner::replying(vec![ProcessOutput {
            code: Some(38),
            stdout: String::new(),
            stderr: "qsub: illegal -l value".to_string(),
        }]);
        let dispatcher = JobDispatcher::new(&runner, QueueSettings::default(), "logs");
        let err = dispatcher
            .submit("run-plink", &payload(), Some(2), &ResourceSpec::new(1, "1gb", "1:00:00"))
            .unwrap_err();

        assert!(matches!(err, PipelineError::SubmissionError(_)));
        assert!(err.to_string().contains("illegal -l value"));
    }

    #[test]
    fn empty_array_rejected_before_submitting() {
        let runner = FakeRunner::default();
        let dispatcher = JobDispatcher::new(&runner, QueueSettings::default(), "logs");
        let err = dispatcher
            .submit("run-bolt", &payload(), Some(0), &ResourceSpec::new(1, "1gb", "1:00:00"))
            .unwrap_err();

        assert!(matches!(err, PipelineError::InvalidInput(_)));
        assert!(runner.calls.borrow().is_empty());
    }

    #[test]
    fn job_id_parsing() {
        assert_eq!(parse_job_id("123.pbs\n", ".pbs").unwrap(), "123");
        assert_eq!(parse_job_id("  123[]  ", ".pbs").unwrap(), "123[]");
        assert_eq!(parse_job_id("123.cluster", "").unwrap(), "123.cluster");
        assert!(parse_job_id("", ".pbs").is_err());
        assert!(parse_job_id("\n  \n", ".pbs").is_err());
        assert!(parse_job_id(".pbs", ".pbs").is_err());
        assert!(parse_job_id("qsub: would exceed limit", ".pbs").is_err());
        assert!(parse_job_id("1.pbs\n2.pbs", ".pbs").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn passthrough_output_is_not_captured() {
        let echo = CommandSpec::new("sh").args(["-c", "echo hi; echo oops >&2"]);

        let captured = SystemRunner.run(&echo).unwrap();
        assert!(captured.success());
        assert_eq!(captured.stdout, "hi\n");
        assert_eq!(captured.stderr, "oops\n");

        let inherited = SystemRunner.run(&echo.passthrough()).unwrap();
        assert!(inherited.success());
        assert!(inherited.stdout.is_empty());
        assert!(inherited.stderr.is_empty());
    }

    #[test]
    fn queue_commands_are_captured() {
        let runner = FakeRunner::default();
        let dispatcher = JobDispatcher::new(&runner, QueueSettings::default(), "logs");
        let cmd = dispatcher.submit_command(
            "run-bolt",
            &payload(),
            Some(2),
            &ResourceSpec::new(1, "1gb", "1:00:00"),
        );

        assert!(!cmd.passthrough);
    }

    #[test]
    fn shell_line_quoting() {
        let cmd = CommandSpec::new("bgenix")
            .args(["-g", "a b.bgen", "-incl-range", "01:10-20", "it's"])
            .stdout_to("/tmp/x y.bgen");

        assert_eq!(
            cmd.to_shell_line(),
            r"bgenix -g 'a b.bgen' -incl-range 01:10-20 'it'\''s' > '/tmp/x y.bgen'"
        );
        assert_eq!(shell_quote(""), "''");
    }
}
