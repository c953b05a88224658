//! Compiler/runtime contract (C9): the boundary between this crate and the
//! external columnar-DB kernel compiler/executor, which this crate never
//! implements (an explicit non-goal — query execution against real data is
//! out of scope). `KernelBackend` is the seam a real integration plugs into;
//! `NullBackend`/`ScriptedBackend` are the only backends this crate ships,
//! for tests and for dry-run exploration.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::blend::BlendSpacePoint;
use crate::execution::QueryTimeout;
use crate::lole::Program;

/// Read-only summary of a `Program`, handed to a backend instead of the full
/// IR when only shape (not content) is needed — e.g. to size a compile job.
#[derive(Debug, Clone)]
pub struct ProgramInfo {
    pub pipeline_count: usize,
    pub data_structure_count: usize,
    pub total_blend_points: usize,
}

impl ProgramInfo {
    pub fn of(program: &Program) -> Self {
        ProgramInfo {
            pipeline_count: program.pipelines.len(),
            data_structure_count: program.data_structures.len(),
            total_blend_points: program.blend_point_counts().iter().sum(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineInfo {
    pub lolepop_names: Vec<String>,
    pub interesting: bool,
    pub blend_point_count: usize,
}

#[derive(Debug, Clone)]
pub struct OperatorInfo {
    pub lolepop_name: String,
    pub statement_count: usize,
}

/// A compiled artifact handle. Backends are free to make this whatever they
/// need (a path to a shared object, a process handle, a no-op token); this
/// crate only ever threads it back into `run`.
pub trait CompiledKernel: Send {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure,
}

/// The seam a real kernel compiler/executor integration implements. Spec
/// §4.11: compile is expected to run in parallel across sampled points,
/// while run is serialized per §5's concurrency model.
pub trait KernelBackend: Send + Sync {
    fn compile(&self, program: &Program, point: &BlendSpacePoint) -> Result<Box<dyn CompiledKernel>, String>;
    fn run(&self, kernel: &dyn CompiledKernel, timeout: &QueryTimeout) -> Result<RunOutcome, String>;
}

/// A trivial always-succeeding backend: every compile produces an empty
/// token, every run reports success instantly. Used by demos and by tests
/// that only need exploration bookkeeping exercised, not real compilation.
#[derive(Debug, Default)]
pub struct NullBackend;

struct NullKernel;
impl CompiledKernel for NullKernel {}

impl KernelBackend for NullBackend {
    fn compile(&self, _program: &Program, _point: &BlendSpacePoint) -> Result<Box<dyn CompiledKernel>, String> {
        Ok(Box::new(NullKernel))
    }

    fn run(&self, _kernel: &dyn CompiledKernel, _timeout: &QueryTimeout) -> Result<RunOutcome, String> {
        Ok(RunOutcome::Success)
    }
}

/// A backend driven by a pre-recorded queue of outcomes, consumed in FIFO
/// order across `compile`+`run` pairs. Lets exploration-driver tests exercise
/// success/failure bookkeeping deterministically without a real compiler.
pub struct ScriptedBackend {
    outcomes: Mutex<VecDeque<RunOutcome>>,
}

impl ScriptedBackend {
    pub fn new(outcomes: Vec<RunOutcome>) -> Self {
        ScriptedBackend {
            outcomes: Mutex::new(outcomes.into()),
        }
    }
}

impl KernelBackend for ScriptedBackend {
    fn compile(&self, _program: &Program, _point: &BlendSpacePoint) -> Result<Box<dyn CompiledKernel>, String> {
        Ok(Box::new(NullKernel))
    }

    fn run(&self, _kernel: &dyn CompiledKernel, _timeout: &QueryTimeout) -> Result<RunOutcome, String> {
        let mut queue = self.outcomes.lock().expect("scripted backend mutex poisoned");
        Ok(queue.pop_front().unwrap_or(RunOutcome::Success))
    }
}
