//! Relational-algebra IR (C1).
//!
//! An immutable tree of relational expressions (`RelExpr`) and operators
//! (`RelOp`). Plans are constructed bottom-up by demo fixtures or callers and
//! handed to the [`crate::translator`] as-is; this module performs no
//! optimization (that is an explicit non-goal).

use std::rc::Rc;

/// A relational scalar expression.
#[derive(Debug, Clone, PartialEq)]
pub enum RelExpr {
    /// A literal value, already rendered to its source-text form.
    Const(String),
    /// A reference to a column, qualified as `table.column` once scanned.
    ColId(String),
    /// Function application, e.g. comparison/arithmetic operators or
    /// aggregates (`sum`, `count`) when used inside `HashAggr.aggregates`.
    Fun(String, Vec<Rc<RelExpr>>),
    /// Introduces a fresh logical column name bound to an expression. Only
    /// legal as a direct element of `RelOp::Project.projections`.
    Assign(String, Rc<RelExpr>),
}

impl RelExpr {
    pub fn col(name: impl Into<String>) -> Rc<RelExpr> {
        Rc::new(RelExpr::ColId(name.into()))
    }

    pub fn constant(value: impl Into<String>) -> Rc<RelExpr> {
        Rc::new(RelExpr::Const(value.into()))
    }

    pub fn fun(name: impl Into<String>, args: Vec<Rc<RelExpr>>) -> Rc<RelExpr> {
        Rc::new(RelExpr::Fun(name.into(), args))
    }

    pub fn assign(name: impl Into<String>, expr: Rc<RelExpr>) -> Rc<RelExpr> {
        Rc::new(RelExpr::Assign(name.into(), expr))
    }

    /// Builds a left-deep tree of binary applications of `name`, e.g.
    /// `and(and(and(a,b),c),d)` for `["and", [a,b,c,d]]`. Mirrors the original
    /// `Fun::create_left_deep_tree` helper used for associative boolean
    /// conjunctions in TPC-H plan fixtures.
    pub fn left_deep_tree(name: impl Into<String>, args: Vec<Rc<RelExpr>>) -> Rc<RelExpr> {
        let name = name.into();
        let mut iter = args.into_iter();
        let first = iter.next().expect("left_deep_tree needs at least one argument");
        iter.fold(first, |acc, next| RelExpr::fun(name.clone(), vec![acc, next]))
    }

    pub fn from_column_names(names: &[&str]) -> Vec<Rc<RelExpr>> {
        names.iter().map(|n| RelExpr::col(*n)).collect()
    }

    /// Returns the set of qualified column names this expression reads,
    /// recursively. Used by plan validators and tests, not by the translator
    /// itself (the translator resolves columns against the live `Flow`).
    pub fn referenced_columns(&self, out: &mut Vec<String>) {
        match self {
            RelExpr::Const(_) => {}
            RelExpr::ColId(name) => out.push(name.clone()),
            RelExpr::Fun(_, args) => {
                for a in args {
                    a.referenced_columns(out);
                }
            }
            RelExpr::Assign(_, expr) => expr.referenced_columns(out),
        }
    }
}

/// Which aggregation-state-machine shape a `HashAggr` lowers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAggrVariant {
    /// Grouped aggregation: keys present, builds a hash table.
    Hash,
    /// Global aggregation: no keys, a single running accumulator row.
    Global,
}

/// Which probe-loop shape a `HashJoin` lowers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashJoinVariant {
    /// At most one match per probe row; the single-match optimization
    /// disables a lane as soon as it has emitted once.
    Join01,
    /// Any number of matches per probe row; every bucket-chain entry is
    /// visited regardless of prior emits.
    JoinN,
}

/// A relational operator. Binary-or-fewer tree; `Scan` is the only leaf.
#[derive(Debug, Clone)]
pub enum RelOp {
    Scan {
        table: String,
        columns: Vec<String>,
    },
    Select {
        child: Rc<RelOp>,
        predicate: Rc<RelExpr>,
    },
    Project {
        child: Rc<RelOp>,
        projections: Vec<Rc<RelExpr>>,
    },
    HashAggr {
        variant: HashAggrVariant,
        child: Rc<RelOp>,
        keys: Vec<Rc<RelExpr>>,
        aggregates: Vec<Rc<RelExpr>>,
    },
    HashJoin {
        variant: HashJoinVariant,
        /// Probe side.
        left: Rc<RelOp>,
        /// Build side.
        right: Rc<RelOp>,
        left_keys: Vec<Rc<RelExpr>>,
        left_payload: Vec<Rc<RelExpr>>,
        right_keys: Vec<Rc<RelExpr>>,
        right_payload: Vec<Rc<RelExpr>>,
    },
}

impl RelOp {
    pub fn scan(table: impl Into<String>, columns: Vec<&str>) -> Rc<RelOp> {
        Rc::new(RelOp::Scan {
            table: table.into(),
            columns: columns.into_iter().map(String::from).collect(),
        })
    }

    pub fn select(child: Rc<RelOp>, predicate: Rc<RelExpr>) -> Rc<RelOp> {
        Rc::new(RelOp::Select { child, predicate })
    }

    pub fn project(child: Rc<RelOp>, projections: Vec<Rc<RelExpr>>) -> Rc<RelOp> {
        Rc::new(RelOp::Project { child, projections })
    }

    pub fn hash_aggr(
        variant: HashAggrVariant,
        child: Rc<RelOp>,
        keys: Vec<Rc<RelExpr>>,
        aggregates: Vec<Rc<RelExpr>>,
    ) -> Rc<RelOp> {
        Rc::new(RelOp::HashAggr {
            variant,
            child,
            keys,
            aggregates,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn hash_join(
        variant: HashJoinVariant,
        left: Rc<RelOp>,
        right: Rc<RelOp>,
        left_keys: Vec<Rc<RelExpr>>,
        left_payload: Vec<Rc<RelExpr>>,
        right_keys: Vec<Rc<RelExpr>>,
        right_payload: Vec<Rc<RelExpr>>,
    ) -> Rc<RelOp> {
        Rc::new(RelOp::HashJoin {
            variant,
            left,
            right,
            left_keys,
            left_payload,
            right_keys,
            right_payload,
        })
    }
}

/// A named, planned query: the root operator plus per-pipeline cost weights
/// (percentages, keyed by the pipeline index the plan author *expects* the
/// lowering to produce). Used by C7's `PerPipelineBase`/`ExploreAll` modes to
/// rank or ignore pipelines (spec §4.9). Unannotated plans have no entries —
/// every pipeline is then treated as ignorable-when-ignoring-is-requested.
#[derive(Debug, Clone, Default)]
pub struct PlannedQuery {
    pub root: Option<Rc<RelOp>>,
    pub expensive_pipelines: std::collections::BTreeMap<usize, u32>,
}

impl PlannedQuery {
    pub fn new(root: Rc<RelOp>) -> Self {
        PlannedQuery {
            root: Some(root),
            expensive_pipelines: std::collections::BTreeMap::new(),
        }
    }

    pub fn with_cost(mut self, pipeline_id: usize, weight: u32) -> Self {
        self.expensive_pipelines.insert(pipeline_id, weight);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn left_deep_tree_nests_left() {
        let a = RelExpr::col("a");
        let b = RelExpr::col("b");
        let c = RelExpr::col("c");
        let tree = RelExpr::left_deep_tree("and", vec![a.clone(), b.clone(), c.clone()]);
        match &*tree {
            RelExpr::Fun(name, args) => {
                assert_eq!(name, "and");
                assert_eq!(args.len(), 2);
                assert_eq!(args[1], c);
                match &*args[0] {
                    RelExpr::Fun(inner_name, inner_args) => {
                        assert_eq!(inner_name, "and");
                        assert_eq!(inner_args[0], a);
                        assert_eq!(inner_args[1], b);
                    }
                    _ => panic!("expected nested Fun"),
                }
            }
            _ => panic!("expected Fun"),
        }
    }

    #[test]
    fn referenced_columns_collects_recursively() {
        let expr = RelExpr::fun(
            "+",
            vec![RelExpr::col("l_extendedprice"), RelExpr::col("l_discount")],
        );
        let mut cols = Vec::new();
        expr.referenced_columns(&mut cols);
        assert_eq!(cols, vec!["l_extendedprice".to_string(), "l_discount".to_string()]);
    }

    #[test]
    fn from_column_names_builds_colids() {
        let cols = RelExpr::from_column_names(&["a", "b"]);
        assert_eq!(cols.len(), 2);
        assert_eq!(*cols[0], RelExpr::ColId("a".to_string()));
    }

    #[test]
    fn planned_query_records_cost_weights() {
        let scan = RelOp::scan("lineitem", vec!["l_quantity"]);
        let plan = PlannedQuery::new(scan).with_cost(0, 100);
        assert_eq!(plan.expensive_pipelines.get(&0), Some(&100));
    }
}
