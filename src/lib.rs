//! Lowers relational-algebra query plans (`Scan`/`Select`/`Project`/
//! `HashAggr`/`HashJoin`) into a pipelined dataflow IR ("lolepops") and
//! explores the per-pipeline blend space of compute-kind/FSM-concurrency/
//! prefetch flavor configurations a code generator could compile each
//! pipeline under.
//!
//! ## Pipeline
//!
//! ```text
//! RelOp/RelExpr plan
//!     -> [translator]   lowering to Program (lole IR)
//!     -> [blend]        per-pipeline flavor configuration space
//!     -> [explorer]     sample/compile/run across a KernelBackend
//! ```
//!
//! ## Module map
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `relalg` | Relational-algebra plan types (`RelOp`/`RelExpr`). |
//! | `flow` | The translator's current-tuple-shape tracker. |
//! | `lole` | The low-level pipelined dataflow IR (`Program`/`Pipeline`/`Lolepop`). |
//! | `translator` | `RelOp` -> `Program` lowering. |
//! | `blend` | Blend-config enumeration and `BlendSpacePoint` resolution. |
//! | `backend` | The compiler/runtime seam (`KernelBackend`). |
//! | `explorer` | The sampling/compile/run exploration driver. |
//! | `demos` | Fixed TPC-H-shaped demo plans for the CLI and tests. |
//! | `config` | Layered `figment` configuration. |
//! | `logging` | `tracing` subscriber setup. |
//! | `error` | `thiserror`-derived error taxonomy. |
//! | `execution` | Cooperative query timeout/cancellation and resource limits. |

pub mod relalg;
pub mod flow;
pub mod lole;
pub mod error;
pub mod translator;
pub mod blend;
pub mod backend;
pub mod explorer;
pub mod logging;
pub mod demos;
pub mod config;
pub mod execution;

pub use relalg::{RelExpr, RelOp, HashAggrVariant, HashJoinVariant, PlannedQuery};
pub use lole::{ExprId, StmtId, LoleExpr, LoleStmt, Lolepop, Pipeline, Program};
pub use translator::translate;
pub use blend::{BlendConfig, BlendSpacePoint, GenBlendFlags};
pub use backend::{KernelBackend, CompiledKernel, RunOutcome, NullBackend, ScriptedBackend};
pub use explorer::{explore, ExploreMode, ExploreReport, Summary as ExploreSummary};
pub use error::EngineError;
pub use demos::by_name as demo_by_name;
pub use config::Config;
pub use execution::{QueryTimeout, TimeoutError, CancelHandle, ResourceLimits, ResourceError};
