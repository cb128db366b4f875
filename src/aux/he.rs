use std::{error::Error, fmt};

/// Failure kinds of the orchestration layer.
///
/// Everything else (I/O, serde, spawn failures) travels as `anyhow::Error`
/// with context attached; callers that need to branch on one of these
/// recover it with `downcast_ref::<PipelineError>()`.
#[derive(Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// malformed partition or catalog parameters.
    InvalidInput(String),
    ChromosomeCountMismatch {
        chromosomes: usize,
        basenames: usize,
    },
    /// the queue did not hand back a usable job identifier.
    SubmissionError(String),
    /// queue-status query failed. Absorbed by the monitor, never fatal.
    PollError(String),
    /// 1-based indices of work units whose outputs are missing or empty.
    WorkerFailure {
        stage: String,
        missing: Vec<usize>,
    },
    MissingTaskIndex(String),
}

impl PipelineError {
    pub(crate) fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub(crate) fn submission(msg: impl Into<String>) -> Self {
        Self::SubmissionError(msg.into())
    }

    /// Whether the monitor may retry after this error.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(self, Self::PollError(_))
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            Self::ChromosomeCountMismatch {
                chromosomes,
                basenames,
            } => write!(
                f,
                "number of chromosomes {} and number of basenames {} do not match",
                chromosomes, basenames
            ),
            Self::SubmissionError(msg) => write!(f, "job submission failed: {}", msg),
            Self::PollError(msg) => write!(f, "queue status query failed: {}", msg),
            Self::WorkerFailure { stage, missing } => {
                let idx = missing
                    .iter()
                    .map(|i| i.to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(
                    f,
                    "stage '{}': {} work unit(s) without output: {}",
                    stage,
                    missing.len(),
                    idx
                )
            }
            Self::MissingTaskIndex(msg) => write!(f, "no array task index: {}", msg),
        }
    }
}

impl fmt::Debug for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InvalidInput(_) => "InvalidInput",
            Self::ChromosomeCountMismatch { .. } => "ChromosomeCountMismatch",
            Self::SubmissionError(_) => "SubmissionError",
            Self::PollError(_) => "PollError",
            Self::WorkerFailure { .. } => "WorkerFailure",
            Self::MissingTaskIndex(_) => "MissingTaskIndex",
        };
        write!(f, "{}: {}", name, self)
    }
}

impl Error for PipelineError {}
