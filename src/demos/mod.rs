//! Demo plan fixtures: hand-built `PlannedQuery` trees resembling TPC-H
//! queries, used by the CLI's `--data` flag and by integration tests as
//! realistic (not synthetic) lowering/exploration inputs.
//!
//! Grounded directly on `original_source/bench_tpch_rel.cpp`'s
//! `tpch_rel_q1`/`tpch_rel_q6` benchmark fixtures, transcribed to this
//! crate's builder API (`RelOp::scan`/`select`/`project`/`hash_aggr`) rather
//! than the original's `make_shared<...>` construction.

use std::rc::Rc;

use crate::relalg::{HashAggrVariant, PlannedQuery, RelExpr, RelOp};

/// TPC-H Q1 shape: scan `lineitem`, filter on `l_shipdate`, derive three
/// chained discount/tax columns, group by `(l_returnflag, l_linestatus)` and
/// aggregate six columns (`count`, four `sum`s, one more `sum`).
pub fn tpch_q1() -> PlannedQuery {
    let scan = RelOp::scan(
        "lineitem",
        vec![
            "l_shipdate",
            "l_returnflag",
            "l_linestatus",
            "l_extendedprice",
            "l_quantity",
            "l_discount",
            "l_tax",
        ],
    );

    let select = RelOp::select(
        scan,
        RelExpr::fun(
            "<=",
            vec![RelExpr::col("lineitem.l_shipdate"), RelExpr::constant("1998-09-02")],
        ),
    );

    let one = RelExpr::constant("1.00");

    let project = RelOp::project(
        select,
        vec![
            RelExpr::assign(
                "_TRSDM_6",
                RelExpr::fun("-", vec![one.clone(), RelExpr::col("lineitem.l_discount")]),
            ),
            RelExpr::assign(
                "_TRSDM_7",
                RelExpr::fun("*", vec![RelExpr::col("_TRSDM_6"), RelExpr::col("lineitem.l_extendedprice")]),
            ),
            RelExpr::assign(
                "_TRSDM_8",
                RelExpr::fun(
                    "*",
                    vec![
                        RelExpr::fun(
                            "*",
                            vec![
                                RelExpr::fun("+", vec![one, RelExpr::col("lineitem.l_tax")]),
                                RelExpr::col("_TRSDM_6"),
                            ],
                        ),
                        RelExpr::col("lineitem.l_extendedprice"),
                    ],
                ),
            ),
            RelExpr::col("lineitem.l_quantity"),
            RelExpr::col("lineitem.l_discount"),
            RelExpr::col("lineitem.l_extendedprice"),
            RelExpr::col("lineitem.l_returnflag"),
            RelExpr::col("lineitem.l_linestatus"),
        ],
    );

    let aggr = RelOp::hash_aggr(
        HashAggrVariant::Hash,
        project,
        RelExpr::from_column_names(&["lineitem.l_returnflag", "lineitem.l_linestatus"]),
        vec![
            RelExpr::fun("count", vec![]),
            RelExpr::fun("sum", vec![RelExpr::col("lineitem.l_quantity")]),
            RelExpr::fun("sum", vec![RelExpr::col("lineitem.l_extendedprice")]),
            RelExpr::fun("sum", vec![RelExpr::col("_TRSDM_7")]),
            RelExpr::fun("sum", vec![RelExpr::col("_TRSDM_8")]),
            RelExpr::fun("sum", vec![RelExpr::col("lineitem.l_discount")]),
        ],
    );

    PlannedQuery::new(aggr).with_cost(0, 100)
}

/// TPC-H Q6 shape: scan `lineitem`, filter on a shipdate range plus quantity
/// and discount bounds, project a `revenue` column, and sum it with no
/// grouping keys (a global aggregation).
pub fn tpch_q6() -> PlannedQuery {
    let scan = RelOp::scan("lineitem", vec!["l_shipdate", "l_extendedprice", "l_quantity", "l_discount"]);

    let ge_shipdate = RelExpr::fun(">=", vec![RelExpr::col("lineitem.l_shipdate"), RelExpr::constant("1994-01-01")]);
    let lt_shipdate = RelExpr::fun("<", vec![RelExpr::col("lineitem.l_shipdate"), RelExpr::constant("1995-01-01")]);
    let lt_quantity = RelExpr::fun("<", vec![RelExpr::col("lineitem.l_quantity"), RelExpr::constant("24")]);
    let ge_discount = RelExpr::fun(">=", vec![RelExpr::col("lineitem.l_discount"), RelExpr::constant("0.05")]);
    let le_discount = RelExpr::fun("<=", vec![RelExpr::col("lineitem.l_discount"), RelExpr::constant("0.07")]);

    let filters: Vec<Rc<RelExpr>> = vec![lt_shipdate, ge_shipdate, lt_quantity, ge_discount, le_discount];
    let select = filters.into_iter().fold(scan, |child, predicate| RelOp::select(child, predicate));

    let project = RelOp::project(
        select,
        vec![RelExpr::assign(
            "revenue",
            RelExpr::fun("*", vec![RelExpr::col("lineitem.l_extendedprice"), RelExpr::col("lineitem.l_discount")]),
        )],
    );

    let aggr = RelOp::hash_aggr(
        HashAggrVariant::Global,
        project,
        Vec::new(),
        vec![RelExpr::fun("sum", vec![RelExpr::col("revenue")])],
    );

    PlannedQuery::new(aggr).with_cost(0, 100)
}

/// Resolves a demo name (as passed to the CLI's `--data` flag) to a fixture.
pub fn by_name(name: &str) -> Option<PlannedQuery> {
    match name {
        "q1" | "tpch_q1" => Some(tpch_q1()),
        "q6" | "tpch_q6" => Some(tpch_q6()),
        _ => None,
    }
}
