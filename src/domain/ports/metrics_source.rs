use crate::domain::errors::SamplingError;
use crate::domain::models::SystemSample;

/// Source of process and host resource readings.
///
/// `sample` may block on system calls; callers run it off the async executor.
/// Implementations may fail transiently and must not panic.
pub trait MetricsSource: Send + Sync {
    fn sample(&self) -> Result<SystemSample, SamplingError>;
}
