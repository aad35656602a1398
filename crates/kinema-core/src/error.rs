//! Error taxonomy shared by the engine and both transport front ends.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Engine error taxonomy.
///
/// Readiness and validation failures are ordinary values at every layer
/// boundary; only `LoadFailure` is fatal to the process.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The pipeline has not finished loading. Clients may retry later;
    /// the engine never retries internally.
    #[error("model is still loading ({elapsed_secs:.0}s elapsed)")]
    NotReady { elapsed_secs: f64 },

    /// The submitted image bytes could not be decoded.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// A generation parameter is out of range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The pipeline itself failed while executing a job. The worker
    /// survives and keeps serving subsequent jobs.
    #[error("inference failed: {0}")]
    Inference(String),

    /// The pipeline could not be loaded. Fatal to the instance;
    /// operators must restart the process.
    #[error("pipeline load failed: {0}")]
    LoadFailure(String),
}
