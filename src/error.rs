use thiserror::Error;

#[derive(Debug, Error)]
pub enum SampleError {
    /// A counter or counter category cannot be opened on this host. The metric
    /// stays disabled for the lifetime of the sampler.
    #[error("counter `{counter}` unavailable: {reason}")]
    SourceUnavailable { counter: String, reason: String },

    /// The process exited or denied access between enumeration and read. The
    /// process is sampled without the counters that could not be read.
    #[error("process {pid} is no longer accessible")]
    TransientProcessAccess { pid: u32 },

    /// Process-derived fields could not be computed for this cycle.
    #[error("sample cycle failed: {0}")]
    CycleFailure(String),

    #[error("sampler must be created inside a tokio runtime")]
    NoRuntime,
}

impl SampleError {
    pub fn unavailable(counter: impl ToString, reason: impl Into<String>) -> Self {
        SampleError::SourceUnavailable {
            counter: counter.to_string(),
            reason: reason.into(),
        }
    }
}
