//! End-to-end exploration scenarios against a lowered demo plan: mode
//! resolution, sampler determinism, and success/failure bookkeeping across a
//! real (not synthetic) `Program`.

use lole_explorer::backend::{NullBackend, ScriptedBackend, RunOutcome};
use lole_explorer::execution::QueryTimeout;
use lole_explorer::explorer::{explore, ExploreMode};
use lole_explorer::relalg::PlannedQuery;
use lole_explorer::{demos, translator};

fn q6_plan_and_program() -> (PlannedQuery, lole_explorer::Program) {
    let plan = demos::by_name("q6").unwrap();
    let program = translator::translate(plan.root.as_ref().unwrap()).unwrap();
    (plan, program)
}

#[test]
fn only_base_against_a_real_plan_compiles_and_runs_one_point_per_pipeline_flavor() {
    let (plan, program) = q6_plan_and_program();
    let backend = NullBackend;
    let timeout = QueryTimeout::infinite();

    let summary = explore(&program, &plan, ExploreMode::OnlyBase, &backend, 2, &timeout, None, false).unwrap();

    assert_eq!(summary.report.attempted, 1);
    assert_eq!(summary.report.succeeded, 1);
    assert_eq!(summary.report.failed, 0);
}

#[test]
fn sampler_determinism_with_a_fixed_seed_reproduces_the_first_point() {
    let (plan, program) = q6_plan_and_program();
    let backend = NullBackend;
    let timeout = QueryTimeout::infinite();
    let mode = ExploreMode::ExploreAll { level: 3, sample: Some(4) };

    let a = explore(&program, &plan, mode, &backend, 2, &timeout, Some(42), false).unwrap();
    let b = explore(&program, &plan, mode, &backend, 2, &timeout, Some(42), false).unwrap();

    assert_eq!(a.results.len(), b.results.len());
    assert_eq!(a.results[0].point.to_string(), b.results[0].point.to_string());
}

#[test]
fn per_pipeline_base_attempts_one_point_per_essential_kind_for_the_single_priced_pipeline() {
    let (plan, program) = q6_plan_and_program();
    let backend = NullBackend;
    let timeout = QueryTimeout::infinite();

    let summary = explore(&program, &plan, ExploreMode::PerPipelineBase, &backend, 4, &timeout, None, false).unwrap();

    // q6's demo fixture annotates exactly one pipeline with a cost weight.
    assert_eq!(plan.expensive_pipelines.len(), 1);
    assert!(summary.report.attempted > 0);
    assert_eq!(summary.report.attempted % plan.expensive_pipelines.len(), 0);
}

#[test]
fn list_base_and_discover_points_never_touch_the_backend() {
    let (plan, program) = q6_plan_and_program();
    let backend = ScriptedBackend::new(vec![RunOutcome::Failure]);
    let timeout = QueryTimeout::infinite();

    let summary = explore(&program, &plan, ExploreMode::ListBase, &backend, 1, &timeout, None, false).unwrap();
    assert_eq!(summary.report.attempted, 0);

    let summary = explore(&program, &plan, ExploreMode::DiscoverPoints, &backend, 1, &timeout, None, false).unwrap();
    assert_eq!(summary.report.attempted, 0);
}

#[test]
fn invalid_level_propagates_as_an_explorer_error() {
    let (plan, program) = q6_plan_and_program();
    let backend = NullBackend;
    let timeout = QueryTimeout::infinite();

    let err = explore(&program, &plan, ExploreMode::ExploreAll { level: 7, sample: None }, &backend, 1, &timeout, None, false).unwrap_err();
    assert!(err.to_string().contains('7'));
}
