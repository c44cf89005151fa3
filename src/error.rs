use thiserror::Error;

/// Errors surfaced at stage boundaries. Recoverable conditions (routing
/// conflicts inside the schematizer, ambiguous merges in the topology
/// builder) are handled locally and never reach this enum.
#[derive(Error, Debug)]
pub enum LayoutError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("edge {edge} references missing {kind} '{id}'")]
    DanglingReference {
        edge: i64,
        kind: &'static str,
        id: String,
    },

    #[error("edge {edge} geometry endpoint is {dist:.3} map units away from node {node}")]
    GeometryMismatch { edge: i64, node: i64, dist: f64 },

    #[error("layout infeasible: {0}")]
    Infeasible(String),

    #[error("time budget of {budget_ms} ms exhausted in {stage}")]
    Timeout { stage: &'static str, budget_ms: u64 },

    #[error("internal invariant violated: {0}")]
    InvariantViolated(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LayoutError {
    /// Process exit code for the thin driver. 0 is success and never
    /// produced here.
    pub fn exit_code(&self) -> i32 {
        match self {
            LayoutError::MalformedInput(_)
            | LayoutError::DanglingReference { .. }
            | LayoutError::GeometryMismatch { .. }
            | LayoutError::Config(_)
            | LayoutError::Io(_) => 1,
            LayoutError::Infeasible(_) => 2,
            LayoutError::Timeout { .. } => 3,
            LayoutError::InvariantViolated(_) => 4,
        }
    }
}

pub type Result<T> = std::result::Result<T, LayoutError>;
