//! Structured error taxonomy (C10.3).
//!
//! One `thiserror`-derived enum per component, unified under [`EngineError`],
//! following the shape of `src/execution/limits.rs`'s `ResourceError`: a
//! single `#[derive(Debug, Clone, thiserror::Error)]` enum with one
//! `#[error("...")]` message per variant. Library code returns these; only
//! the CLI binary's `main` converts an `EngineError` to a process exit code.

use thiserror::Error;

/// Errors raised while lowering a `RelOp`/`RelExpr` tree (C4/C5). These are
/// always fatal per spec §7 — a plan error is a bug in the plan, not a
/// recoverable condition.
#[derive(Debug, Clone, Error)]
pub enum TranslateError {
    #[error("unresolved column '{0}' not present in the current flow")]
    UnresolvedColumn(String),

    #[error("unknown relational function '{0}'")]
    UnknownFunction(String),

    #[error("Assign('{0}') used outside of a Project's projection list")]
    AssignOutsideProject(String),

    #[error("query references column '{0}' that no prior operator introduced")]
    UnannotatedAggregate(String),

    #[error("query plan is incomplete and has no supported lowering: {0}")]
    UnimplementedQuery(String),

    #[error("HashAggr/HashJoin requires at least one key or aggregate, found none")]
    EmptyOperatorSpec,

    #[error("invalid projection item, expected Assign or ColId, found {0}")]
    InvalidProjection(String),

    #[error("invalid aggregate expression, expected sum(..)/count(), found '{0}'")]
    InvalidAggregate(String),
}

/// Errors raised while parsing or validating a blend-config string (C6).
#[derive(Debug, Clone, Error)]
pub enum BlendConfigError {
    #[error("unknown blend config option '{0}'")]
    UnknownOption(String),

    #[error("invalid value '{value}' for option '{key}'")]
    InvalidValue { key: String, value: String },

    #[error("prefetch must be in [0,4], got {0}")]
    PrefetchOutOfRange(i32),

    #[error("computation_type '{0}' is not one of scalar|avx512|vector(256|512|1024|2048)|\"\"")]
    InvalidComputationType(String),
}

/// Errors raised by the exploration driver (C7).
#[derive(Debug, Clone, Error)]
pub enum ExplorerError {
    #[error("more than one of --base, --pipeline, --full was given")]
    ConflictingModes,

    #[error("--sample is only valid together with --full")]
    SampleWithoutFull,

    #[error("unsupported --full level {0}, expected 0..=4")]
    InvalidLevel(u8),

    #[error("failed to acquire lock file at {0}: {1}")]
    LockFailed(String, String),
}

/// Top-level error type returned from this crate's public entry points.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    BlendConfig(#[from] BlendConfigError),

    #[error(transparent)]
    Explorer(#[from] ExplorerError),

    #[error(transparent)]
    Config(#[from] figment::Error),
}
