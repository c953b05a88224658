//! Operator translator (C5): walks a `RelOp` tree post-order and lowers each
//! node into the lolepops/pipelines/data-structures of a `Program`, threading
//! a `Flow` that tracks which qualified column name lives in which tuple
//! slot at the current point in the pipeline.
//!
//! This is the largest single component: `HashAggr` and `HashJoin` each
//! transcribe a small state machine (bucket lookup, chain walk, miss
//! handling) rather than a single expression, mirroring the structure of the
//! original `relalg_translator.cpp` one lolepop at a time.

use std::rc::Rc;

use crate::error::TranslateError;
use crate::flow::Flow;
use crate::lole::{
    AggrKind, Column, DataStructure, ExprId, Lolepop, LoleExpr, LoleStmt, Modifier, PredRef,
    Program, ProgramBuilder, StmtId, TableFlags, TableKind,
};
use crate::relalg::{HashAggrVariant, HashJoinVariant, RelExpr, RelOp};
use crate::translator::expr::ExprTranslator;

/// Lowers `root` into a complete `Program` with every blend injection point
/// emitted (every materialized value wrapped in a `BlendStmt` with
/// `blend_config: None`) — flavor assignment happens later, at execution
/// time, by substituting a concrete `BlendConfig` per point. Equivalent to
/// `translate_with_config(root, true)`.
pub fn translate(root: &Rc<RelOp>) -> Result<Program, TranslateError> {
    translate_with_config(root, true)
}

/// Lowers `root` into a complete `Program`. When `enable_blend` is false, the
/// lowering skips materializing blend injection points: values that would
/// otherwise be pre-assigned into a `bv_i` local inside a `BlendStmt` are
/// used inline instead, and the HashJoin materialize writes are wrapped in a
/// plain `WrapStatements` rather than a `BlendStmt` (spec §4.5, §4.7, §9).
pub fn translate_with_config(root: &Rc<RelOp>, enable_blend: bool) -> Result<Program, TranslateError> {
    let mut translator = OperatorTranslator::new(enable_blend);
    translator.visit(root)?;
    Ok(translator.builder.finish())
}

struct OperatorTranslator {
    builder: ProgramBuilder,
    expr: ExprTranslator,
    lole_pred: Option<ExprId>,
    enable_blend: bool,
}

impl OperatorTranslator {
    fn new(enable_blend: bool) -> Self {
        OperatorTranslator {
            builder: ProgramBuilder::new(),
            expr: ExprTranslator::new(),
            lole_pred: None,
            enable_blend,
        }
    }

    /// Wraps `body` the way `enable_blend` dictates: a real `BlendStmt`
    /// injection point when on, a plain `WrapStatements` grouping when off.
    fn wrap_blend(&mut self, body: Vec<StmtId>, pred: PredRef) -> StmtId {
        if self.enable_blend {
            self.alloc_stmt(LoleStmt::BlendStmt { body, pred, blend_config: None })
        } else {
            self.alloc_stmt(LoleStmt::WrapStatements { body, pred })
        }
    }

    fn program(&mut self) -> &mut Program {
        &mut self.builder.program
    }

    /// The single shared sentinel standing for "the predicate mask the
    /// current lolepop inherited from its upstream producer". Read as a
    /// value (to seed a fresh named local) and used as a `PredRef` tag
    /// interchangeably, per spec §3.2/§9.
    fn lole_pred(&mut self) -> ExprId {
        match self.lole_pred {
            Some(id) => id,
            None => {
                let id = self.program().alloc_expr(LoleExpr::LolePred);
                self.lole_pred = Some(id);
                id
            }
        }
    }

    fn alloc_stmt(&mut self, stmt: LoleStmt) -> StmtId {
        self.program().alloc_stmt(stmt)
    }

    fn reference(&mut self, name: impl Into<String>) -> ExprId {
        self.program().alloc_expr(LoleExpr::Ref(name.into()))
    }

    fn constant(&mut self, value: impl Into<String>) -> ExprId {
        self.program().alloc_expr(LoleExpr::Const(value.into()))
    }

    fn fun(&mut self, name: &str, args: Vec<ExprId>, pred: PredRef) -> ExprId {
        self.program().alloc_expr(LoleExpr::Fun(name.to_string(), args, pred))
    }

    fn assign(&mut self, name: impl Into<String>, expr: ExprId, pred: PredRef) -> StmtId {
        self.alloc_stmt(LoleStmt::Assign {
            name: name.into(),
            expr,
            pred,
        })
    }

    fn visit(&mut self, op: &Rc<RelOp>) -> Result<Flow, TranslateError> {
        match &**op {
            RelOp::Scan { table, columns } => self.visit_scan(table, columns),
            RelOp::Select { child, predicate } => self.visit_select(child, predicate),
            RelOp::Project { child, projections } => self.visit_project(child, projections),
            RelOp::HashAggr {
                variant,
                child,
                keys,
                aggregates,
            } => self.visit_hash_aggr(*variant, child, keys, aggregates),
            RelOp::HashJoin {
                variant,
                left,
                right,
                left_keys,
                left_payload,
                right_keys,
                right_payload,
            } => self.visit_hash_join(
                *variant,
                left,
                right,
                left_keys,
                left_payload,
                right_keys,
                right_payload,
            ),
        }
    }

    // ---- Scan (spec §4.4) ----

    fn visit_scan(&mut self, table: &str, columns: &[String]) -> Result<Flow, TranslateError> {
        self.expr.reset_cache();

        let pos_ref = self.reference("pos");
        let col_exprs: Vec<ExprId> = columns
            .iter()
            .map(|c| {
                let col_name = self.constant(format!("{table}.{c}"));
                self.fun("Scan", vec![col_name, pos_ref], None)
            })
            .collect();
        let tuple = self.program().alloc_expr(LoleExpr::TupleAppend(col_exprs));
        let emit = self.alloc_stmt(LoleStmt::Emit { tuple, pred: None });

        let pos_cond = self.reference("pos");
        let inner = self.alloc_stmt(LoleStmt::Loop {
            cond: pos_cond,
            body: vec![emit],
        });
        let refill = self.alloc_stmt(LoleStmt::MetaRefillInflow);
        let morsel_cond = self.reference("morsel");
        let outer = self.alloc_stmt(LoleStmt::Loop {
            cond: morsel_cond,
            body: vec![refill, inner],
        });

        self.program().declare(DataStructure::BaseTable {
            name: table.to_string(),
            columns: columns.to_vec(),
            source_table: table.to_string(),
        });

        let name = self.builder.lolepop_name("Scan", None);
        self.builder.push_lolepop(Lolepop {
            name,
            statements: vec![outer],
        });

        let mut flow = Flow::new();
        for c in columns {
            flow.push(format!("{table}.{c}"));
        }
        Ok(flow)
    }

    // ---- Select (spec §4.5) ----

    fn visit_select(&mut self, child: &Rc<RelOp>, predicate: &Rc<RelExpr>) -> Result<Flow, TranslateError> {
        let flow = self.visit(child)?;
        let lole_pred = self.lole_pred();

        let cond = self.expr.translate(predicate, &flow, Some(lole_pred), &mut self.builder.program)?;
        let sel = self.fun("seltrue", vec![cond], Some(lole_pred));

        let bv_pred = self.builder.unique_name("bv_pred");
        let assign = self.assign(bv_pred.clone(), sel, Some(lole_pred));
        let wrap = self.alloc_stmt(LoleStmt::WrapStatements {
            body: vec![assign],
            pred: Some(lole_pred),
        });

        let emit_pred = self.reference(bv_pred.clone());
        let mut tuple_elems = Vec::with_capacity(flow.len());
        let lole_arg = self.expr.lole_arg(&mut self.builder.program);
        for slot in 0..flow.len() {
            tuple_elems.push(self.program().alloc_expr(LoleExpr::TupleGet(lole_arg, slot)));
        }
        let tuple = self.program().alloc_expr(LoleExpr::TupleAppend(tuple_elems));
        let emit = self.alloc_stmt(LoleStmt::Emit {
            tuple,
            pred: Some(emit_pred),
        });
        let dead = self.alloc_stmt(LoleStmt::MetaVarDead(bv_pred));

        let name = self.builder.lolepop_name("Select", None);
        self.builder.push_lolepop(Lolepop {
            name,
            statements: vec![wrap, emit, dead],
        });

        Ok(flow)
    }

    // ---- Project (spec §4.5) ----

    fn visit_project(&mut self, child: &Rc<RelOp>, projections: &[Rc<RelExpr>]) -> Result<Flow, TranslateError> {
        let child_flow = self.visit(child)?;
        let lole_pred = self.lole_pred();

        let mut new_flow = Flow::new();
        let mut proj_exprs = Vec::with_capacity(projections.len());
        for proj in projections {
            match &**proj {
                RelExpr::Assign(name, inner) => {
                    let id = self.expr.translate(inner, &child_flow, Some(lole_pred), &mut self.builder.program)?;
                    new_flow.push(name.clone());
                    self.expr.register(name.clone(), id);
                    proj_exprs.push(id);
                }
                RelExpr::ColId(name) => {
                    let id = self.expr.translate(proj, &child_flow, Some(lole_pred), &mut self.builder.program)?;
                    new_flow.push(name.clone());
                    proj_exprs.push(id);
                }
                other => return Err(TranslateError::InvalidProjection(format!("{other:?}"))),
            }
        }

        let mut stmts = Vec::new();
        let mut bv_names = Vec::new();
        let emit_ref_ids: Vec<ExprId> = if self.enable_blend {
            let mut ids = Vec::with_capacity(proj_exprs.len());
            for id in proj_exprs {
                let bv = self.builder.unique_name("bv");
                let assign = self.assign(bv.clone(), id, Some(lole_pred));
                let blend = self.wrap_blend(vec![assign], Some(lole_pred));
                stmts.push(blend);
                ids.push(self.reference(bv.clone()));
                bv_names.push(bv);
            }
            ids
        } else {
            proj_exprs
        };
        let tuple = self.program().alloc_expr(LoleExpr::TupleAppend(emit_ref_ids));
        let emit = self.alloc_stmt(LoleStmt::Emit {
            tuple,
            pred: Some(lole_pred),
        });
        stmts.push(emit);
        for bv in bv_names {
            stmts.push(self.alloc_stmt(LoleStmt::MetaVarDead(bv)));
        }

        let name = self.builder.lolepop_name("Project", None);
        self.builder.push_lolepop(Lolepop { name, statements: stmts });

        self.expr.reset_cache();
        Ok(new_flow)
    }

    // ---- HashAggr (spec §4.6) ----

    fn visit_hash_aggr(
        &mut self,
        variant: HashAggrVariant,
        child: &Rc<RelOp>,
        keys: &[Rc<RelExpr>],
        aggregates: &[Rc<RelExpr>],
    ) -> Result<Flow, TranslateError> {
        if keys.is_empty() && aggregates.is_empty() {
            return Err(TranslateError::EmptyOperatorSpec);
        }
        let child_flow = self.visit(child)?;
        match variant {
            HashAggrVariant::Global => self.build_global_aggr(&child_flow, aggregates),
            HashAggrVariant::Hash => {
                let primary = self.build_grouped_aggr(&child_flow, keys, aggregates, true)?;
                let cols = primary.columns_in_order();
                let reagg_keys: Vec<Rc<RelExpr>> = cols[..keys.len()].iter().map(|n| RelExpr::col(n.clone())).collect();
                let reagg_aggrs: Vec<Rc<RelExpr>> = cols[keys.len()..keys.len() + aggregates.len()]
                    .iter()
                    .map(|n| RelExpr::fun("sum", vec![RelExpr::col(n.clone())]))
                    .collect();
                self.build_grouped_aggr(&primary, &reagg_keys, &reagg_aggrs, false)
            }
        }
    }

    fn aggregate_kind_and_value(
        &mut self,
        aggr: &RelExpr,
        flow: &Flow,
        pred: PredRef,
    ) -> Result<(bool, Option<ExprId>), TranslateError> {
        match aggr {
            RelExpr::Fun(name, args) => match name.as_str() {
                "sum" => {
                    if args.len() != 1 {
                        return Err(TranslateError::InvalidAggregate(format!("{aggr:?}")));
                    }
                    let id = self.expr.translate(&args[0], flow, pred, &mut self.builder.program)?;
                    Ok((true, Some(id)))
                }
                "count" => Ok((false, None)),
                other => Err(TranslateError::InvalidAggregate(other.to_string())),
            },
            other => Err(TranslateError::InvalidAggregate(format!("{other:?}"))),
        }
    }

    fn build_global_aggr(&mut self, child_flow: &Flow, aggregates: &[Rc<RelExpr>]) -> Result<Flow, TranslateError> {
        let lole_pred = self.lole_pred();
        let mut is_sum = Vec::with_capacity(aggregates.len());
        let mut values = Vec::with_capacity(aggregates.len());
        for a in aggregates {
            let (sum, value) = self.aggregate_kind_and_value(a, child_flow, Some(lole_pred))?;
            is_sum.push(sum);
            values.push(value);
        }

        let mut stmts = Vec::with_capacity(aggregates.len());
        for (i, (sum, value)) in is_sum.iter().zip(values).enumerate() {
            let kind = if *sum { AggrKind::GlobalSum } else { AggrKind::GlobalCount };
            stmts.push(self.alloc_stmt(LoleStmt::Aggr {
                kind,
                col: format!("aggr_{i}"),
                value,
                pred: Some(lole_pred),
            }));
        }

        let ds_name = self.builder.unique_name("aggr_tbl");
        let columns = aggr_columns(0, aggregates.len());
        self.close_build_flush_read(&ds_name, columns, &[], aggregates.len(), stmts, true)
    }

    /// Builds one grouped HashAggr: declares the hash table, emits the build
    /// lolepop (bucket lookup / chain walk / miss insertion), then the
    /// flush and read pipelines shared with the global case.
    fn build_grouped_aggr(
        &mut self,
        child_flow: &Flow,
        keys: &[Rc<RelExpr>],
        aggregates: &[Rc<RelExpr>],
        build_interesting: bool,
    ) -> Result<Flow, TranslateError> {
        let lole_pred = self.lole_pred();

        let key_exprs: Vec<ExprId> = keys
            .iter()
            .map(|k| self.expr.translate(k, child_flow, Some(lole_pred), &mut self.builder.program))
            .collect::<Result<_, _>>()?;
        let mut is_sum = Vec::with_capacity(aggregates.len());
        let mut values = Vec::with_capacity(aggregates.len());
        for a in aggregates {
            let (sum, value) = self.aggregate_kind_and_value(a, child_flow, Some(lole_pred))?;
            is_sum.push(sum);
            values.push(value);
        }

        let ds_name = self.builder.unique_name("aggr_tbl");
        let hash_col = format!("hash_{}", keys.len());

        let mut hash_acc = self.fun("hash", vec![key_exprs[0]], Some(lole_pred));
        for ke in &key_exprs[1..] {
            hash_acc = self.fun("rehash", vec![hash_acc, *ke], Some(lole_pred));
        }

        let miss = self.builder.unique_name("miss");
        let pred_value = self.program().alloc_expr(LoleExpr::LolePred);
        let init_miss = self.assign(miss.clone(), pred_value, None);

        let miss_ref = self.reference(miss.clone());
        let bucket = self.builder.unique_name("bucket");
        let ds_ref = self.reference(ds_name.clone());
        let lookup = self.fun("bucket_lookup", vec![ds_ref, hash_acc], Some(miss_ref));
        let s_bucket = self.assign(bucket.clone(), lookup, Some(miss_ref));

        let bucket_ref = self.reference(bucket.clone());
        let zero = self.constant("0");
        let is_empty = self.fun("eq", vec![bucket_ref, zero], Some(miss_ref));
        let empty = self.builder.unique_name("empty");
        let s_empty = self.assign(empty.clone(), is_empty, Some(miss_ref));

        let empty_ref = self.reference(empty.clone());
        let selfalse_empty = self.fun("selfalse", vec![empty_ref], Some(miss_ref));
        let hit = self.builder.unique_name("hit");
        let s_hit = self.assign(hit.clone(), selfalse_empty, Some(miss_ref));

        let empty_ref2 = self.reference(empty.clone());
        let seltrue_empty = self.fun("seltrue", vec![empty_ref2], Some(miss_ref));
        let s_miss_update = self.assign(miss.clone(), seltrue_empty, Some(miss_ref));

        // inner chain-walk loop
        let hit_ref = self.reference(hit.clone());
        let mut check_expr = None;
        for (i, ke) in key_exprs.iter().enumerate() {
            let key_col = self.reference(format!("{ds_name}.key_{i}"));
            let bucket_ref = self.reference(bucket.clone());
            let check = self.fun("check", vec![key_col, bucket_ref, *ke], Some(hit_ref));
            check_expr = Some(match check_expr {
                None => check,
                Some(prev) => self.fun("and", vec![prev, check], Some(hit_ref)),
            });
        }
        let check_expr = check_expr.expect("grouped aggregation requires at least one key");
        let equal = self.builder.unique_name("equal");
        let s_equal = self.assign(equal.clone(), check_expr, Some(hit_ref));

        let equal_ref = self.reference(equal.clone());
        let seltrue_equal = self.fun("seltrue", vec![equal_ref], Some(hit_ref));
        let found = self.builder.unique_name("found");
        let s_found = self.assign(found.clone(), seltrue_equal, Some(hit_ref));

        let found_ref = self.reference(found.clone());
        let mut aggr_stmts = Vec::with_capacity(aggregates.len());
        for (i, (sum, value)) in is_sum.iter().zip(values.iter()).enumerate() {
            let kind = if *sum { AggrKind::Sum } else { AggrKind::Count };
            aggr_stmts.push(self.alloc_stmt(LoleStmt::Aggr {
                kind,
                col: format!("aggr_{i}"),
                value: *value,
                pred: Some(found_ref),
            }));
        }

        let equal_ref2 = self.reference(equal.clone());
        let hit_ref2 = self.reference(hit.clone());
        let selfalse_equal = self.fun("selfalse", vec![equal_ref2], Some(hit_ref2));
        let s_hit_narrow = self.assign(hit.clone(), selfalse_equal, Some(hit_ref2));

        let hit_ref3 = self.reference(hit.clone());
        let bucket_ref3 = self.reference(bucket.clone());
        let ds_ref2 = self.reference(ds_name.clone());
        let next = self.fun("bucket_next", vec![ds_ref2, bucket_ref3], Some(hit_ref3));
        let s_bucket_adv = self.assign(bucket.clone(), next, Some(hit_ref3));

        let bucket_ref4 = self.reference(bucket.clone());
        let zero2 = self.constant("0");
        let eq2 = self.fun("eq", vec![bucket_ref4, zero2], Some(hit_ref3));
        let s_empty2 = self.assign(empty.clone(), eq2, Some(hit_ref3));

        let miss_ref2 = self.reference(miss.clone());
        let empty_ref3 = self.reference(empty.clone());
        let union = self.fun("selunion", vec![miss_ref2, empty_ref3], None);
        let s_miss_union = self.assign(miss.clone(), union, None);

        let empty_ref4 = self.reference(empty.clone());
        let hit_ref4 = self.reference(hit.clone());
        let selfalse2 = self.fun("selfalse", vec![empty_ref4], Some(hit_ref4));
        let s_hit_final = self.assign(hit.clone(), selfalse2, Some(hit_ref4));

        let mut inner_body = vec![s_equal, s_found];
        inner_body.extend(aggr_stmts);
        inner_body.push(s_hit_narrow);
        inner_body.push(s_bucket_adv);
        inner_body.push(s_empty2);
        inner_body.push(s_miss_union);
        inner_body.push(s_hit_final);
        let inner_cond = self.reference(hit.clone());
        let inner_loop = self.alloc_stmt(LoleStmt::Loop {
            cond: inner_cond,
            body: inner_body,
        });

        // outer miss-handling
        let miss_ref3 = self.reference(miss.clone());
        let ds_ref3 = self.reference(ds_name.clone());
        let insert = self.fun("bucket_insert", vec![ds_ref3, hash_acc], Some(miss_ref3));
        let new_pos = self.builder.unique_name("new_pos");
        let s_new_pos = self.assign(new_pos.clone(), insert, Some(miss_ref3));

        let new_pos_ref = self.reference(new_pos.clone());
        let zero3 = self.constant("0");
        let eq_np = self.fun("eq", vec![new_pos_ref, zero3], Some(miss_ref3));
        let selfalse_np = self.fun("selfalse", vec![eq_np], Some(miss_ref3));
        let can_scatter = self.builder.unique_name("can_scatter");
        let s_can_scatter = self.assign(can_scatter.clone(), selfalse_np, Some(miss_ref3));

        let can_scatter_ref = self.reference(can_scatter.clone());
        let new_pos_ref2 = self.reference(new_pos.clone());
        let mut scatter_stmts = Vec::with_capacity(keys.len() + 1);
        for (i, ke) in key_exprs.iter().enumerate() {
            scatter_stmts.push(self.alloc_stmt(LoleStmt::Scatter {
                col: format!("key_{i}"),
                pos: new_pos_ref2,
                value: *ke,
                pred: Some(can_scatter_ref),
            }));
        }
        scatter_stmts.push(self.alloc_stmt(LoleStmt::Scatter {
            col: hash_col.clone(),
            pos: new_pos_ref2,
            value: hash_acc,
            pred: Some(can_scatter_ref),
        }));

        let mut outer_body = vec![s_bucket, s_empty, s_hit, s_miss_update, inner_loop, s_new_pos, s_can_scatter];
        outer_body.extend(scatter_stmts);
        let outer_cond = self.reference(miss.clone());
        let outer_loop = self.alloc_stmt(LoleStmt::Loop {
            cond: outer_cond,
            body: outer_body,
        });

        let begin_exclusive = self.alloc_stmt(LoleStmt::MetaBeginFsmExclusive);
        let end_exclusive = self.alloc_stmt(LoleStmt::MetaEndFsmExclusive);
        let dead_miss = self.alloc_stmt(LoleStmt::MetaVarDead(miss));
        let dead_bucket = self.alloc_stmt(LoleStmt::MetaVarDead(bucket));
        let dead_empty = self.alloc_stmt(LoleStmt::MetaVarDead(empty));
        let dead_hit = self.alloc_stmt(LoleStmt::MetaVarDead(hit));

        let build_stmts = vec![
            init_miss,
            begin_exclusive,
            outer_loop,
            end_exclusive,
            dead_miss,
            dead_bucket,
            dead_empty,
            dead_hit,
        ];

        let columns = key_aggr_columns(keys.len(), aggregates.len());
        self.close_build_flush_read(&ds_name, columns, keys, aggregates.len(), build_stmts, build_interesting)
    }

    /// Shared tail common to both aggregation shapes: declares the data
    /// structure, pushes the build lolepop, closes the pipeline, emits the
    /// flush pipeline, and emits the read pipeline that produces the new
    /// output `Flow`.
    #[allow(clippy::too_many_arguments)]
    fn close_build_flush_read(
        &mut self,
        ds_name: &str,
        columns: Vec<Column>,
        keys: &[Rc<RelExpr>],
        aggregate_count: usize,
        build_stmts: Vec<StmtId>,
        build_interesting: bool,
    ) -> Result<Flow, TranslateError> {
        self.program().declare(DataStructure::Table {
            name: ds_name.to_string(),
            columns,
            kind: TableKind::HashTable,
            flags: TableFlags::THREAD_LOCAL | TableFlags::FLUSH_TO_MASTER,
        });

        let build_name = self.builder.lolepop_name("HashAggr", Some("build"));
        self.builder.push_lolepop(Lolepop {
            name: build_name,
            statements: build_stmts,
        });
        if !build_interesting {
            self.builder.mark_non_interesting();
        }
        self.builder.new_pipeline();

        let ds_ref = self.reference(ds_name.to_string());
        let flush = self.fun("bucket_flush", vec![ds_ref], None);
        let flush_effect = self.alloc_stmt(LoleStmt::Effect(flush));
        let done = self.alloc_stmt(LoleStmt::Done);
        let flush_name = self.builder.lolepop_name("HashAggr", Some("flush"));
        self.builder.push_lolepop(Lolepop {
            name: flush_name,
            statements: vec![flush_effect, done],
        });
        self.builder.mark_non_interesting();
        self.builder.new_pipeline();

        // read pipeline
        let pos_name = self.builder.unique_name("pos");
        let ds_ref2 = self.reference(ds_name.to_string());
        let pos_ref = self.reference(pos_name.clone());
        let count = self.fun("get_count", vec![ds_ref2, pos_ref], None);
        let zero = self.constant("0");
        let is_valid = self.fun("gt", vec![count, zero], None);
        let valid = self.builder.unique_name("valid");
        let s_valid = self.assign(valid.clone(), is_valid, None);

        let valid_ref = self.reference(valid.clone());
        let pos_ref2 = self.reference(pos_name.clone());
        let mut read_exprs = Vec::with_capacity(keys.len() + aggregate_count);
        for i in 0..keys.len() {
            let col = self.reference(format!("{ds_name}.key_{i}"));
            read_exprs.push(self.fun("gather", vec![col, pos_ref2], Some(valid_ref)));
        }
        for i in 0..aggregate_count {
            let col = self.reference(format!("{ds_name}.aggr_{i}"));
            let pos_ref3 = self.reference(pos_name.clone());
            read_exprs.push(self.fun("gather", vec![col, pos_ref3], Some(valid_ref)));
        }
        let tuple = self.program().alloc_expr(LoleExpr::TupleAppend(read_exprs));
        let emit = self.alloc_stmt(LoleStmt::Emit {
            tuple,
            pred: Some(valid_ref),
        });

        let pos_cond = self.reference(pos_name.clone());
        let inner_loop = self.alloc_stmt(LoleStmt::Loop {
            cond: pos_cond,
            body: vec![s_valid, emit],
        });
        let morsel_name = self.builder.unique_name("morsel");
        let morsel_cond = self.reference(morsel_name);
        let outer_loop = self.alloc_stmt(LoleStmt::Loop {
            cond: morsel_cond,
            body: vec![inner_loop],
        });

        let read_name = self.builder.lolepop_name("HashAggr", Some("read"));
        self.builder.push_lolepop(Lolepop {
            name: read_name,
            statements: vec![outer_loop],
        });

        let mut new_flow = Flow::new();
        for i in 0..keys.len() {
            new_flow.push(key_output_name(&keys[i], i));
        }
        for i in 0..aggregate_count {
            new_flow.push(format!("aggr_{i}"));
        }
        self.expr.reset_cache();
        Ok(new_flow)
    }

    // ---- HashJoin (spec §4.7) ----

    #[allow(clippy::too_many_arguments)]
    fn visit_hash_join(
        &mut self,
        variant: HashJoinVariant,
        left: &Rc<RelOp>,
        right: &Rc<RelOp>,
        left_keys: &[Rc<RelExpr>],
        _left_payload: &[Rc<RelExpr>],
        right_keys: &[Rc<RelExpr>],
        right_payload: &[Rc<RelExpr>],
    ) -> Result<Flow, TranslateError> {
        if right_keys.is_empty() {
            return Err(TranslateError::EmptyOperatorSpec);
        }

        // ---- materialize (build side) ----
        let right_flow = self.visit(right)?;
        let lole_pred = self.lole_pred();

        let right_key_exprs: Vec<ExprId> = right_keys
            .iter()
            .map(|k| self.expr.translate(k, &right_flow, Some(lole_pred), &mut self.builder.program))
            .collect::<Result<_, _>>()?;
        let right_payload_exprs: Vec<ExprId> = right_payload
            .iter()
            .map(|p| self.expr.translate(p, &right_flow, Some(lole_pred), &mut self.builder.program))
            .collect::<Result<_, _>>()?;

        let ds_name = self.builder.unique_name("join_tbl");
        let total = right_keys.len() + right_payload.len();
        let hash_col = format!("hash_{total}");

        let mut hash_acc = self.fun("hash", vec![right_key_exprs[0]], Some(lole_pred));
        for ke in &right_key_exprs[1..] {
            hash_acc = self.fun("rehash", vec![hash_acc, *ke], Some(lole_pred));
        }

        let pred_value = self.program().alloc_expr(LoleExpr::LolePred);
        let ds_ref = self.reference(ds_name.clone());
        let wpos_expr = self.fun("write_pos", vec![ds_ref, pred_value], Some(lole_pred));
        let wpos = self.builder.unique_name("wpos");
        let s_wpos = self.assign(wpos.clone(), wpos_expr, Some(lole_pred));

        let mut mat_stmts = vec![s_wpos];
        let wpos_ref = self.reference(wpos.clone());
        for (i, ke) in right_key_exprs.iter().enumerate() {
            mat_stmts.push(self.alloc_stmt(LoleStmt::Write {
                col: format!("col_{i}"),
                pos: wpos_ref,
                value: *ke,
                pred: Some(lole_pred),
            }));
        }
        for (j, pe) in right_payload_exprs.iter().enumerate() {
            let wpos_ref_j = self.reference(wpos.clone());
            mat_stmts.push(self.alloc_stmt(LoleStmt::Write {
                col: format!("col_{}", right_keys.len() + j),
                pos: wpos_ref_j,
                value: *pe,
                pred: Some(lole_pred),
            }));
        }
        let wpos_ref_hash = self.reference(wpos.clone());
        mat_stmts.push(self.alloc_stmt(LoleStmt::Write {
            col: hash_col.clone(),
            pos: wpos_ref_hash,
            value: hash_acc,
            pred: Some(lole_pred),
        }));

        let columns = join_columns(right_keys.len(), right_payload.len());
        self.program().declare(DataStructure::Table {
            name: ds_name.clone(),
            columns,
            kind: TableKind::HashTable,
            flags: TableFlags::THREAD_LOCAL | TableFlags::FLUSH_TO_MASTER,
        });

        let wrapped_mat = self.wrap_blend(mat_stmts, Some(lole_pred));
        let mat_name = self.builder.lolepop_name("HashJoin", Some("materialize"));
        self.builder.push_lolepop(Lolepop {
            name: mat_name,
            statements: vec![wrapped_mat],
        });
        self.builder.new_pipeline();

        // ---- build ----
        let ds_ref2 = self.reference(ds_name.clone());
        let build_effect = self.fun("bucket_build", vec![ds_ref2], None);
        let build_stmt = self.alloc_stmt(LoleStmt::Effect(build_effect));
        let done = self.alloc_stmt(LoleStmt::Done);
        let build_name = self.builder.lolepop_name("HashJoin", Some("build"));
        self.builder.push_lolepop(Lolepop {
            name: build_name,
            statements: vec![build_stmt, done],
        });
        self.builder.mark_non_interesting();
        self.builder.new_pipeline();

        // ---- probe ----
        self.expr.reset_cache();
        let left_flow = self.visit(left)?;
        let left_key_exprs: Vec<ExprId> = left_keys
            .iter()
            .map(|k| self.expr.translate(k, &left_flow, Some(lole_pred), &mut self.builder.program))
            .collect::<Result<_, _>>()?;

        let mut probe_hash = self.fun("hash", vec![left_key_exprs[0]], Some(lole_pred));
        for ke in &left_key_exprs[1..] {
            probe_hash = self.fun("rehash", vec![probe_hash, *ke], Some(lole_pred));
        }

        let ds_ref3 = self.reference(ds_name.clone());
        let lookup = self.fun("bucket_lookup", vec![ds_ref3, probe_hash], Some(lole_pred));
        let bucket = self.builder.unique_name("bucket");
        let s_bucket = self.assign(bucket.clone(), lookup, Some(lole_pred));

        let bucket_ref = self.reference(bucket.clone());
        let zero = self.constant("0");
        let eq0 = self.fun("eq", vec![zero, bucket_ref], Some(lole_pred));
        let selfalse0 = self.fun("selfalse", vec![eq0], Some(lole_pred));
        let active = self.builder.unique_name("active");
        let s_active = self.assign(active.clone(), selfalse0, Some(lole_pred));

        let active_ref = self.reference(active.clone());
        let mut check_expr = None;
        for (i, ke) in left_key_exprs.iter().enumerate() {
            let col = self.reference(format!("{ds_name}.col_{i}"));
            let bucket_ref_i = self.reference(bucket.clone());
            let check = self.fun("check", vec![col, bucket_ref_i, *ke], Some(active_ref));
            check_expr = Some(match check_expr {
                None => check,
                Some(prev) => self.fun("and", vec![prev, check], Some(active_ref)),
            });
        }
        let check_keys_expr = check_expr.expect("hash join requires at least one key");
        let check_keys = self.builder.unique_name("check_keys");
        let s_check_keys = self.assign(check_keys.clone(), check_keys_expr, Some(active_ref));

        // ---- chain-walk loop ----
        let active_ref2 = self.reference(active.clone());
        let check_keys_ref = self.reference(check_keys.clone());
        let match_name = self.builder.unique_name("match");
        let match_assign = self.assign(match_name.clone(), check_keys_ref, Some(active_ref2));
        let s_match = self.wrap_blend(vec![match_assign], Some(active_ref2));

        let match_ref = self.reference(match_name.clone());
        let active_ref3 = self.reference(active.clone());
        let seltrue_match = self.fun("seltrue", vec![match_ref], Some(active_ref3));
        let hit = self.builder.unique_name("hit");
        let s_hit = self.assign(hit.clone(), seltrue_match, Some(active_ref3));

        let hit_ref = self.reference(hit.clone());
        let mut recon_stmts = Vec::new();
        let mut out_refs = Vec::new();
        for name in left_flow.columns_in_order() {
            let id = self.expr.translate(&RelExpr::ColId(name.clone()), &left_flow, Some(hit_ref), &mut self.builder.program)?;
            out_refs.push(id);
        }
        // Right-key slots substitute the probe-side key expression directly
        // (already known on the probe side) rather than gathering.
        for i in 0..right_keys.len() {
            if self.enable_blend {
                let bv = self.builder.unique_name("bv");
                let assign = self.assign(bv.clone(), left_key_exprs[i], Some(hit_ref));
                recon_stmts.push(self.wrap_blend(vec![assign], Some(hit_ref)));
                out_refs.push(self.reference(bv));
            } else {
                out_refs.push(left_key_exprs[i]);
            }
        }
        for j in 0..right_payload.len() {
            let idx = right_keys.len() + j;
            let col = self.reference(format!("{ds_name}.col_{idx}"));
            let bucket_ref_j = self.reference(bucket.clone());
            let gather = self.fun("gather", vec![col, bucket_ref_j], Some(hit_ref));
            if self.enable_blend {
                let bv = self.builder.unique_name("bv");
                let assign = self.assign(bv.clone(), gather, Some(hit_ref));
                recon_stmts.push(self.wrap_blend(vec![assign], Some(hit_ref)));
                out_refs.push(self.reference(bv));
            } else {
                out_refs.push(gather);
            }
        }

        let hit_ref2 = self.reference(hit.clone());
        let tuple = self.program().alloc_expr(LoleExpr::TupleAppend(out_refs));
        let s_emit = self.alloc_stmt(LoleStmt::Emit {
            tuple,
            pred: Some(hit_ref2),
        });

        let mut loop_body = vec![s_match, s_hit];
        loop_body.extend(recon_stmts);
        loop_body.push(s_emit);

        let chain_pred_ref = match variant {
            HashJoinVariant::Join01 => {
                let match_ref2 = self.reference(match_name.clone());
                let active_ref4 = self.reference(active.clone());
                let narrowed = self.fun("selfalse", vec![match_ref2], Some(active_ref4));
                let s_narrow = self.assign(active.clone(), narrowed, Some(active_ref4));
                loop_body.push(s_narrow);
                self.reference(active.clone())
            }
            HashJoinVariant::JoinN => self.reference(active.clone()),
        };

        let ds_ref4 = self.reference(ds_name.clone());
        let bucket_ref5 = self.reference(bucket.clone());
        let next = self.fun("bucket_next", vec![ds_ref4, bucket_ref5], Some(chain_pred_ref));
        let chain_pred_ref2 = self.reference(active.clone());
        let s_bucket_adv = self.assign(bucket.clone(), next, Some(chain_pred_ref2));
        loop_body.push(s_bucket_adv);

        let bucket_ref6 = self.reference(bucket.clone());
        let zero2 = self.constant("0");
        let eq2 = self.fun("eq", vec![bucket_ref6, zero2], Some(chain_pred_ref2));
        let selfalse2 = self.fun("selfalse", vec![eq2], Some(chain_pred_ref2));
        let s_active_adv = self.assign(active.clone(), selfalse2, Some(chain_pred_ref2));
        loop_body.push(s_active_adv);

        let loop_cond = self.reference(active.clone());
        let outer_loop = self.alloc_stmt(LoleStmt::Loop {
            cond: loop_cond,
            body: loop_body,
        });

        let dead_active = self.alloc_stmt(LoleStmt::MetaVarDead(active));
        let dead_bucket = self.alloc_stmt(LoleStmt::MetaVarDead(bucket));

        let probe_stmts = vec![s_bucket, s_active, s_check_keys, outer_loop, dead_active, dead_bucket];
        let probe_name = self.builder.lolepop_name("HashJoin", Some("probe"));
        self.builder.push_lolepop(Lolepop {
            name: probe_name,
            statements: probe_stmts,
        });

        let mut new_flow = Flow::new();
        for name in left_flow.columns_in_order() {
            new_flow.push(name.clone());
        }
        for (i, k) in right_keys.iter().enumerate() {
            new_flow.push(derive_output_name(k, i, "rkey"));
        }
        for (j, p) in right_payload.iter().enumerate() {
            new_flow.push(derive_output_name(p, j, "rval"));
        }
        self.expr.reset_cache();
        Ok(new_flow)
    }
}

fn aggr_columns(key_count: usize, aggregate_count: usize) -> Vec<Column> {
    let mut cols = Vec::with_capacity(aggregate_count + 1);
    for i in 0..aggregate_count {
        cols.push(Column::new(format!("aggr_{i}"), Modifier::Value));
    }
    cols.push(Column::new(format!("hash_{key_count}"), Modifier::Hash));
    cols
}

fn key_aggr_columns(key_count: usize, aggregate_count: usize) -> Vec<Column> {
    let mut cols = Vec::with_capacity(key_count + aggregate_count + 1);
    for i in 0..key_count {
        cols.push(Column::new(format!("key_{i}"), Modifier::Key));
    }
    for i in 0..aggregate_count {
        cols.push(Column::new(format!("aggr_{i}"), Modifier::Value));
    }
    cols.push(Column::new(format!("hash_{key_count}"), Modifier::Hash));
    cols
}

fn join_columns(key_count: usize, payload_count: usize) -> Vec<Column> {
    let mut cols = Vec::with_capacity(key_count + payload_count + 1);
    for i in 0..key_count {
        cols.push(Column::new(format!("col_{i}"), Modifier::Key));
    }
    for j in 0..payload_count {
        cols.push(Column::new(format!("col_{}", key_count + j), Modifier::Value));
    }
    cols.push(Column::new(format!("hash_{}", key_count + payload_count), Modifier::Hash));
    cols
}

fn key_output_name(expr: &RelExpr, index: usize) -> String {
    derive_output_name(expr, index, "key")
}

fn derive_output_name(expr: &RelExpr, index: usize, prefix: &str) -> String {
    match expr {
        RelExpr::ColId(name) => name.clone(),
        _ => format!("{prefix}_{index}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lole::LoleStmt;
    use crate::relalg::{HashAggrVariant, HashJoinVariant, RelOp};

    fn lolepop_names(program: &Program, pipeline_idx: usize) -> Vec<String> {
        program.pipelines[pipeline_idx]
            .lolepops
            .iter()
            .map(|lp| lp.name.rsplit_once('_').map(|(_, s)| s.to_string()).unwrap_or(lp.name.clone()))
            .collect()
    }

    #[test]
    fn scan_select_project_global_aggr_first_pipeline_shape() {
        let scan = RelOp::scan("lineitem", vec!["l_extendedprice", "l_discount"]);
        let select = RelOp::select(
            scan,
            RelExpr::fun("<", vec![RelExpr::col("lineitem.l_discount"), RelExpr::constant("0.06")]),
        );
        let project = RelOp::project(
            select,
            vec![
                RelExpr::assign(
                    "revenue",
                    RelExpr::fun(
                        "*",
                        vec![RelExpr::col("lineitem.l_extendedprice"), RelExpr::col("lineitem.l_discount")],
                    ),
                ),
            ],
        );
        let plan = RelOp::hash_aggr(
            HashAggrVariant::Global,
            project,
            vec![],
            vec![RelExpr::fun("sum", vec![RelExpr::col("revenue")])],
        );

        let program = translate(&plan).unwrap();
        assert!(program.pipelines.len() >= 3);
        let names: Vec<&str> = lolepop_names(&program, 0).iter().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["Scan", "Select", "Project", "build"]);

        assert_eq!(program.data_structures.len(), 2);
        match &program.data_structures[1] {
            DataStructure::Table { columns, kind, flags, .. } => {
                assert_eq!(*kind, TableKind::HashTable);
                assert!(flags.contains(TableFlags::THREAD_LOCAL));
                assert!(flags.contains(TableFlags::FLUSH_TO_MASTER));
                assert_eq!(columns.len(), 2);
                assert_eq!(columns[0].name, "aggr_0");
                assert_eq!(columns[1].name, "hash_0");
            }
            other => panic!("expected Table, got {other:?}"),
        }
    }

    #[test]
    fn grouped_aggr_declares_key_aggr_hash_columns() {
        let scan = RelOp::scan("lineitem", vec!["l_returnflag", "l_quantity"]);
        let plan = RelOp::hash_aggr(
            HashAggrVariant::Hash,
            scan,
            vec![RelExpr::col("lineitem.l_returnflag")],
            vec![
                RelExpr::fun("sum", vec![RelExpr::col("lineitem.l_quantity")]),
                RelExpr::fun("count", vec![]),
            ],
        );
        let program = translate(&plan).unwrap();
        match &program.data_structures[1] {
            DataStructure::Table { columns, .. } => {
                assert_eq!(columns.len(), 4);
                assert_eq!(columns[0].name, "key_0");
                assert_eq!(columns[1].name, "aggr_0");
                assert_eq!(columns[2].name, "aggr_1");
                assert_eq!(columns[3].name, "hash_1");
            }
            other => panic!("expected Table, got {other:?}"),
        }
        // primary build + re-aggregation build => two Table data structures besides the base scan.
        assert_eq!(program.data_structures.len(), 3);
    }

    #[test]
    fn join01_narrows_active_before_advancing_bucket() {
        let left = RelOp::scan("orders", vec!["o_orderkey", "o_custkey"]);
        let right = RelOp::scan("customer", vec!["c_custkey", "c_name"]);
        let plan = RelOp::hash_join(
            HashJoinVariant::Join01,
            left,
            right,
            vec![RelExpr::col("orders.o_custkey")],
            vec![],
            vec![RelExpr::col("customer.c_custkey")],
            vec![RelExpr::col("customer.c_name")],
        );
        let program = translate(&plan).unwrap();
        let probe_pipeline = program.pipelines.last().unwrap();
        let probe_lolepop = probe_pipeline.lolepops.last().unwrap();
        let has_narrow_assign = probe_lolepop
            .statements
            .iter()
            .any(|&sid| matches!(program.stmt(sid), LoleStmt::Loop { .. }));
        assert!(has_narrow_assign);
    }

    #[test]
    fn empty_operator_spec_is_rejected() {
        let scan = RelOp::scan("t", vec!["a"]);
        let plan = RelOp::hash_aggr(HashAggrVariant::Hash, scan, vec![], vec![]);
        let err = translate(&plan).unwrap_err();
        assert!(matches!(err, TranslateError::EmptyOperatorSpec));
    }

    fn join_plan() -> Rc<RelOp> {
        let left = RelOp::scan("orders", vec!["o_orderkey", "o_custkey"]);
        let right = RelOp::scan("customer", vec!["c_custkey", "c_name"]);
        RelOp::hash_join(
            HashJoinVariant::Join01,
            left,
            right,
            vec![RelExpr::col("orders.o_custkey")],
            vec![],
            vec![RelExpr::col("customer.c_custkey")],
            vec![RelExpr::col("customer.c_name")],
        )
    }

    fn count_blend_points(program: &Program) -> usize {
        program
            .pipelines
            .iter()
            .flat_map(|p| &p.lolepops)
            .flat_map(|lp| &lp.statements)
            .filter(|&&sid| matches!(program.stmt(sid), LoleStmt::BlendStmt { .. }))
            .count()
    }

    #[test]
    fn enable_blend_on_wraps_materialize_and_reconstruction_in_blend_stmts() {
        let program = translate_with_config(&join_plan(), true).unwrap();
        assert!(count_blend_points(&program) > 0);
    }

    #[test]
    fn enable_blend_off_emits_no_blend_stmts_and_wraps_materialize_plainly() {
        let program = translate_with_config(&join_plan(), false).unwrap();
        assert_eq!(count_blend_points(&program), 0);

        let materialize = &program.pipelines[0].lolepops[0];
        assert_eq!(materialize.statements.len(), 1);
        assert!(matches!(program.stmt(materialize.statements[0]), LoleStmt::WrapStatements { .. }));
    }

    #[test]
    fn enable_blend_off_projects_expressions_inline_without_bv_locals() {
        let scan = RelOp::scan("lineitem", vec!["l_quantity"]);
        let project = RelOp::project(scan, vec![RelExpr::col("lineitem.l_quantity")]);
        let program = translate_with_config(&project, false).unwrap();
        let project_lolepop = &program.pipelines[0].lolepops[1];
        assert_eq!(project_lolepop.statements.len(), 1);
        assert!(matches!(program.stmt(project_lolepop.statements[0]), LoleStmt::Emit { .. }));
    }
}
