use thiserror::Error;

/// Domain failures of the import pipeline. Public operations convert these
/// into the uniform service envelope or a FAIL status transition; they never
/// cross the public boundary as unhandled errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("empty file")]
    EmptyFile,

    #[error("Unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("workflow not found")]
    WorkflowNotFound,

    #[error("Uploaded individuals missing essential header: {0}")]
    MissingEssentialHeader(String),

    #[error("Uploaded individuals contains invalid columns: {0:?}")]
    InvalidColumns(Vec<String>),

    #[error("more than one {role} in group {group_id}")]
    GroupInvariantViolated { role: &'static str, group_id: String },

    #[error("group {0} has a review task pending")]
    GroupTaskPending(String),

    #[error("{0} not found: {1}")]
    NotFound(&'static str, String),
}
