//! Exploration driver (C7): walks a slice of the blend space for a lowered
//! `Program`, compiling candidate points in parallel and running them one at
//! a time against a [`KernelBackend`], tallying successes and failures.
//!
//! Compilation is the expensive, CPU-bound, side-effect-free half of a point
//! (spec §4.11) so it fans out across raw OS threads via `std::thread::scope`
//! — no `'static` bound needed since the scope outlives the borrowed
//! `Program`/backend. Running is serialized: two kernels hitting the same
//! external database concurrently is out of scope (a persistence/distributed
//! non-goal), so runs happen back on the calling thread once every point in
//! a batch has either compiled or failed.

pub mod progress;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::backend::{CompiledKernel, KernelBackend, RunOutcome};
use crate::blend::{self, BlendConfig, BlendSpacePoint, GenBlendFlags};
use crate::error::ExplorerError;
use crate::execution::QueryTimeout;
use crate::lole::Program;
use crate::relalg::PlannedQuery;

/// The five ways this crate knows how to slice the blend space, matching the
/// CLI's mutually-exclusive `--base`/`--pipeline`/`--full` flag group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExploreMode {
    /// Report the single base configuration without compiling anything.
    ListBase,
    /// Report where the blend injection points are, per pipeline, without
    /// compiling anything.
    DiscoverPoints,
    /// Compile and run exactly one point: every pipeline at the base config.
    OnlyBase,
    /// For each interesting pipeline, compile and run one point per essential
    /// computation kind with only that pipeline's flavor overridden.
    PerPipelineBase,
    /// Compile and run a slice of the full cross-product space, applying each
    /// sampled config uniformly (as the point's default flavor). `level`
    /// selects how much of the domain is in play (0 = base only, 4 = full);
    /// `sample` optionally caps how many of that domain's configs are tried.
    ExploreAll { level: u8, sample: Option<usize> },
}

impl ExploreMode {
    /// Levels 0/1 restrict the generator to the essential/binary-prefetch
    /// domain; 2/3 are unrestricted; 4 is unrestricted and additionally
    /// includes pipelines that would otherwise be ignored (spec §4.9).
    fn flags_for_level(level: u8) -> Result<GenBlendFlags, ExplorerError> {
        match level {
            0 | 1 => Ok(GenBlendFlags::BINARY_PREFETCH | GenBlendFlags::ONLY_ESSENTIAL_COMP | GenBlendFlags::ONLY_ESSENTIAL_FSM),
            2 | 3 => Ok(GenBlendFlags::empty()),
            4 => Ok(GenBlendFlags::empty()),
            other => Err(ExplorerError::InvalidLevel(other)),
        }
    }

    /// Level 4 is the only level that includes pipelines otherwise ignored
    /// for lacking a plan-annotated cost percentage (spec §4.9).
    fn includes_ignored_pipelines(level: u8) -> bool {
        level == 4
    }
}

/// The fixed "essential" computation kinds `PerPipelineBase` walks through,
/// reusing the domain `blend` already treats as representative.
fn essential_computation_kinds() -> Vec<Option<crate::blend::ComputationType>> {
    let configs = blend::enumerate(GenBlendFlags::ONLY_ESSENTIAL_COMP | GenBlendFlags::ONLY_ESSENTIAL_FSM | GenBlendFlags::BINARY_PREFETCH | GenBlendFlags::NO_CACHE);
    let mut seen = std::collections::HashSet::new();
    let mut kinds = Vec::new();
    for cfg in configs {
        if seen.insert(cfg.computation_type) {
            kinds.push(cfg.computation_type);
        }
    }
    kinds
}

/// The `k` expensive-pipeline ids a `PlannedQuery` carries the highest
/// annotated cost weight for, sorted descending by weight. Mirrors the
/// original's `get_most_expensive_pipeline_ids`: pipelines with no annotation
/// at all are never candidates, and `k == 0` returns every annotated id
/// unsorted.
fn most_expensive_pipeline_ids(plan: &PlannedQuery, k: usize) -> Vec<usize> {
    let mut ids: Vec<usize> = plan.expensive_pipelines.keys().copied().collect();
    if k > 0 {
        ids.sort_by_key(|id| std::cmp::Reverse(plan.expensive_pipelines[id]));
        ids.truncate(k);
    }
    ids
}

/// How many of the most expensive pipelines `PerPipelineBase` walks.
const PER_PIPELINE_BASE_TOP_K: usize = 2;

/// Expands an `ExploreMode` (plus a `Program`'s shape and its plan's
/// per-pipeline cost annotations) into the concrete list of
/// `BlendSpacePoint`s to compile and run. `seed` fixes the sampler's RNG so
/// that, per a fixed plan and level, the sequence of sampled points is
/// reproducible; `None` falls back to a process-level thread-local RNG.
fn points_for_mode(program: &Program, plan: &PlannedQuery, mode: ExploreMode, seed: Option<u64>, no_cache: bool) -> Result<Vec<BlendSpacePoint>, ExplorerError> {
    match mode {
        ExploreMode::ListBase | ExploreMode::DiscoverPoints => Ok(Vec::new()),
        ExploreMode::OnlyBase => Ok(vec![BlendSpacePoint::for_program(program)]),
        ExploreMode::PerPipelineBase => {
            let pipeline_ids = most_expensive_pipeline_ids(plan, PER_PIPELINE_BASE_TOP_K);
            let mut points = Vec::new();
            for pipeline_index in pipeline_ids {
                for comp in essential_computation_kinds() {
                    let mut point = BlendSpacePoint::for_program(program);
                    let cfg = BlendConfig::new(1, comp, 0).expect("essential kinds satisfy prefetch range");
                    point.pipelines[pipeline_index].flavor = Some(std::sync::Arc::new(cfg));
                    points.push(point);
                }
            }
            Ok(points)
        }
        ExploreMode::ExploreAll { level, sample } => {
            let mut flags = ExploreMode::flags_for_level(level)?;
            if no_cache {
                flags = flags | GenBlendFlags::NO_CACHE;
            }
            let mut configs = blend::enumerate(flags);
            if let Some(n) = sample {
                if n < configs.len() {
                    match seed {
                        Some(s) => {
                            let mut rng = StdRng::seed_from_u64(s);
                            configs = configs.partial_shuffle(&mut rng, n).0.to_vec();
                        }
                        None => {
                            let mut rng = rand::thread_rng();
                            configs = configs.partial_shuffle(&mut rng, n).0.to_vec();
                        }
                    }
                }
            }

            // Pipelines lacking a plan-annotated cost percentage are
            // "ignored" whenever any pipeline is annotated, except at level
            // 4 which includes every pipeline regardless.
            let only_interesting = !ExploreMode::includes_ignored_pipelines(level);
            let has_price = !plan.expensive_pipelines.is_empty();

            Ok(configs
                .into_iter()
                .map(|cfg| {
                    let mut point = BlendSpacePoint::for_program(program);
                    if only_interesting && has_price {
                        for (i, pipeline) in point.pipelines.iter_mut().enumerate() {
                            if !plan.expensive_pipelines.contains_key(&i) {
                                pipeline.ignore = true;
                            }
                        }
                    }
                    point.default_flavor = Some(std::sync::Arc::new(cfg));
                    point
                })
                .collect())
        }
    }
}

/// Outcome of compiling and running one sampled point.
#[derive(Debug, Clone)]
pub struct PointResult {
    pub point: BlendSpacePoint,
    pub outcome: Result<RunOutcome, String>,
}

/// Aggregate tallies across an entire exploration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExploreReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone)]
pub struct Summary {
    pub report: ExploreReport,
    pub results: Vec<PointResult>,
}

/// An advisory, single-machine file lock: a portable substitute for a real
/// `flock(2)` built only from `std::fs`, since nothing in the dependency
/// stack provides exclusive file locking. Held for the lifetime of an
/// exploration run so two `explorer` invocations against the same program
/// directory don't compile concurrently; released (best-effort) on drop.
pub struct FdLockGuard {
    path: PathBuf,
}

impl FdLockGuard {
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, ExplorerError> {
        let path = path.as_ref().to_path_buf();
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| ExplorerError::LockFailed(path.display().to_string(), e.to_string()))?;
        Ok(FdLockGuard { path })
    }
}

impl Drop for FdLockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Compiles and runs every point `mode` expands to against `backend`,
/// fanning compilation out across `thread_count` worker threads and running
/// each compiled kernel serially afterward.
pub fn explore<B: KernelBackend>(
    program: &Program,
    plan: &PlannedQuery,
    mode: ExploreMode,
    backend: &B,
    thread_count: usize,
    timeout: &QueryTimeout,
    seed: Option<u64>,
    no_cache: bool,
) -> Result<Summary, ExplorerError> {
    let points = points_for_mode(program, plan, mode, seed, no_cache)?;
    if points.is_empty() {
        return Ok(Summary {
            report: ExploreReport::default(),
            results: Vec::new(),
        });
    }

    let succeeded = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let thread_count = thread_count.max(1);

    let compiled: Vec<(usize, Result<Box<dyn CompiledKernel>, String>)> = std::thread::scope(|scope| {
        let chunk_size = points.len().div_ceil(thread_count);
        let mut handles = Vec::new();
        for (chunk_index, chunk) in points.chunks(chunk_size.max(1)).enumerate() {
            let base = chunk_index * chunk_size.max(1);
            handles.push(scope.spawn(move || {
                chunk
                    .iter()
                    .enumerate()
                    .map(|(i, point)| (base + i, backend.compile(program, point)))
                    .collect::<Vec<_>>()
            }));
        }
        handles.into_iter().flat_map(|h| h.join().expect("compile worker panicked")).collect()
    });

    let mut ordered = compiled;
    ordered.sort_by_key(|(index, _)| *index);

    let total = points.len();
    let mut meter = progress::ProgressMeter::new(total);
    let mut results = Vec::with_capacity(total);
    for (point, (_, compile_result)) in points.into_iter().zip(ordered.into_iter()) {
        let outcome = match compile_result {
            Ok(kernel) => backend.run(&*kernel, timeout),
            Err(e) => Err(e),
        };
        match &outcome {
            Ok(RunOutcome::Success) => {
                succeeded.fetch_add(1, Ordering::Relaxed);
            }
            Ok(RunOutcome::Failure) | Err(_) => {
                failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        results.push(PointResult { point, outcome });

        if let Some(estimate) = meter.tick(results.len()) {
            tracing::debug!(
                completed = estimate.completed,
                total = estimate.total,
                eta_secs = estimate.eta_remaining.map(|d| d.as_secs_f64()),
                "exploration progress"
            );
        }
    }

    let report = ExploreReport {
        attempted: results.len(),
        succeeded: succeeded.load(Ordering::Relaxed),
        failed: failed.load(Ordering::Relaxed),
    };

    Ok(Summary { report, results })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{NullBackend, ScriptedBackend};
    use crate::lole::{Lolepop, LoleExpr, LoleStmt, Pipeline};

    fn program_with_one_blend_point() -> Program {
        let mut program = Program::new();
        let c = program.alloc_expr(LoleExpr::Const("1".into()));
        let blended = program.alloc_stmt(LoleStmt::BlendStmt {
            body: vec![program.alloc_stmt(LoleStmt::Effect(c))],
            pred: None,
            blend_config: None,
        });
        program.pipelines.push(Pipeline {
            lolepops: vec![Lolepop {
                name: "lole_0_Test".into(),
                statements: vec![blended],
            }],
            interesting: true,
        });
        program
    }

    fn program_with_blend_points(count: usize) -> Program {
        let mut program = Program::new();
        for i in 0..count {
            let c = program.alloc_expr(LoleExpr::Const("1".into()));
            let blended = program.alloc_stmt(LoleStmt::BlendStmt {
                body: vec![program.alloc_stmt(LoleStmt::Effect(c))],
                pred: None,
                blend_config: None,
            });
            program.pipelines.push(Pipeline {
                lolepops: vec![Lolepop {
                    name: format!("lole_{i}_Test"),
                    statements: vec![blended],
                }],
                interesting: true,
            });
        }
        program
    }

    #[test]
    fn list_base_and_discover_points_compile_nothing() {
        let program = program_with_one_blend_point();
        let plan = PlannedQuery::default();
        let backend = NullBackend;
        let timeout = QueryTimeout::infinite();
        let summary = explore(
            &program, &plan, ExploreMode::ListBase, &backend, 4, &timeout,
            None,
            false,
        ).unwrap();
        assert_eq!(summary.report, ExploreReport::default());
        let summary = explore(
            &program, &plan, ExploreMode::DiscoverPoints, &backend, 4, &timeout,
            None,
            false,
        ).unwrap();
        assert_eq!(summary.report, ExploreReport::default());
    }

    #[test]
    fn only_base_compiles_and_runs_exactly_one_point() {
        let program = program_with_one_blend_point();
        let plan = PlannedQuery::default();
        let backend = NullBackend;
        let timeout = QueryTimeout::infinite();
        let summary = explore(
            &program, &plan, ExploreMode::OnlyBase, &backend, 4, &timeout,
            None,
            false,
        ).unwrap();
        assert_eq!(summary.report.attempted, 1);
        assert_eq!(summary.report.succeeded, 1);
        assert_eq!(summary.report.failed, 0);
    }

    #[test]
    fn explore_all_level_zero_restricts_to_the_essential_binary_prefetch_domain() {
        let program = program_with_one_blend_point();
        let plan = PlannedQuery::default();
        let backend = NullBackend;
        let timeout = QueryTimeout::infinite();
        let restricted = blend::enumerate(
            GenBlendFlags::BINARY_PREFETCH | GenBlendFlags::ONLY_ESSENTIAL_COMP | GenBlendFlags::ONLY_ESSENTIAL_FSM | GenBlendFlags::NO_CACHE,
        );
        let summary = explore(
            &program,
            &plan,
            ExploreMode::ExploreAll { level: 0, sample: None },
            &backend,
            2,
            &timeout,
            None,
            false,
        )
        .unwrap();
        assert_eq!(summary.report.attempted, restricted.len());
    }

    #[test]
    fn invalid_level_is_rejected() {
        let program = program_with_one_blend_point();
        let plan = PlannedQuery::default();
        let backend = NullBackend;
        let timeout = QueryTimeout::infinite();
        let err = explore(
            &program,
            &plan,
            ExploreMode::ExploreAll { level: 9, sample: None },
            &backend,
            1,
            &timeout,
            None,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, ExplorerError::InvalidLevel(9)));
    }

    #[test]
    fn failure_tallies_are_tracked_across_points() {
        let program = program_with_one_blend_point();
        let plan = PlannedQuery::default();
        let backend = ScriptedBackend::new(vec![RunOutcome::Failure]);
        let timeout = QueryTimeout::infinite();
        let summary = explore(
            &program, &plan, ExploreMode::OnlyBase, &backend, 1, &timeout,
            None,
            false,
        ).unwrap();
        assert_eq!(summary.report.succeeded, 0);
        assert_eq!(summary.report.failed, 1);
    }

    #[test]
    fn per_pipeline_base_produces_one_point_per_essential_kind_for_the_top_k_expensive_pipelines() {
        let program = program_with_blend_points(3);
        let plan = PlannedQuery::default().with_cost(0, 70).with_cost(2, 30).with_cost(1, 10);
        let backend = NullBackend;
        let timeout = QueryTimeout::infinite();
        let summary = explore(
            &program, &plan, ExploreMode::PerPipelineBase, &backend, 2, &timeout,
            None,
            false,
        ).unwrap();
        assert_eq!(summary.report.attempted, essential_computation_kinds().len() * PER_PIPELINE_BASE_TOP_K);
    }

    #[test]
    fn per_pipeline_base_ignores_pipelines_without_a_cost_annotation() {
        let program = program_with_blend_points(3);
        let plan = PlannedQuery::default().with_cost(0, 100);
        let ids = most_expensive_pipeline_ids(&plan, PER_PIPELINE_BASE_TOP_K);
        assert_eq!(ids, vec![0]);
    }

    #[test]
    fn explore_all_below_level_four_marks_unpriced_pipelines_as_ignored() {
        let program = program_with_blend_points(2);
        let plan = PlannedQuery::default().with_cost(0, 100);
        let points = points_for_mode(&program, &plan, ExploreMode::ExploreAll { level: 2, sample: Some(1) }, Some(1), true).unwrap();
        let point = &points[0];
        assert!(!point.pipelines[0].ignore);
        assert!(point.pipelines[1].ignore);
    }

    #[test]
    fn explore_all_level_four_never_ignores_pipelines() {
        let program = program_with_blend_points(2);
        let plan = PlannedQuery::default().with_cost(0, 100);
        let points = points_for_mode(&program, &plan, ExploreMode::ExploreAll { level: 4, sample: Some(1) }, Some(1), true).unwrap();
        let point = &points[0];
        assert!(point.pipelines.iter().all(|p| !p.ignore));
    }

    #[test]
    fn same_seed_samples_the_same_points() {
        let program = program_with_one_blend_point();
        let plan = PlannedQuery::default();
        let mode = ExploreMode::ExploreAll { level: 4, sample: Some(3) };
        let a = points_for_mode(&program, &plan, mode, Some(42), false).unwrap();
        let b = points_for_mode(&program, &plan, mode, Some(42), false).unwrap();
        let render = |points: &[BlendSpacePoint]| points.iter().map(|p| p.to_string()).collect::<Vec<_>>();
        assert_eq!(render(&a), render(&b));
    }

    #[test]
    fn lock_guard_rejects_a_second_acquisition_of_the_same_path() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("explorer_lock_test_{}", std::process::id()));
        let _ = fs::remove_file(&path);
        let guard = FdLockGuard::acquire(&path).unwrap();
        let err = FdLockGuard::acquire(&path).unwrap_err();
        assert!(matches!(err, ExplorerError::LockFailed(_, _)));
        drop(guard);
        assert!(!path.exists());
    }
}
