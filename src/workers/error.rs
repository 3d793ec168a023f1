use thiserror::Error;

/// Error returned by [`WorkerGroup::submit`](crate::WorkerGroup::submit).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// The lane for this key already holds `lane_capacity` pending jobs.
    #[error("lane {key} is full")]
    Full {
        /// Key of the saturated lane.
        key: String,
    },

    /// The launcher is draining; no new lanes or jobs are accepted.
    #[error("worker group closed")]
    Closed,
}

impl SubmitError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SubmitError::Full { .. } => "submit_full",
            SubmitError::Closed => "submit_closed",
        }
    }
}
