//! Expression translator (C4): lowers a `RelExpr` tree into `LoleExpr` nodes
//! against a given `Flow`, memoizing by logical column name so that repeated
//! `ColId` references — whether to a scanned column or to a name introduced
//! earlier by the same `Project`'s own projection list — share one node
//! instead of rebuilding a `TupleGet`/`Fun` chain per use.

use std::collections::HashMap;

use crate::error::TranslateError;
use crate::flow::Flow;
use crate::lole::{ExprId, LoleExpr, PredRef, Program};
use crate::relalg::RelExpr;

/// Maps a comparison/arithmetic surface spelling to the lowered `Fun` name
/// the runtime's kernel library expects. Anything not listed here (including
/// already-lowered names like `and`/`or`) passes through unchanged.
fn rewrite_fun_name(name: &str) -> &str {
    match name {
        "<=" => "le",
        "<" => "lt",
        ">=" => "ge",
        ">" => "gt",
        "=" => "eq",
        "!=" => "ne",
        "+" => "add",
        "-" => "sub",
        "*" => "mul",
        "/" => "div",
        other => other,
    }
}

#[derive(Debug, Default)]
pub struct ExprTranslator {
    cache: HashMap<String, ExprId>,
    lole_arg: Option<ExprId>,
}

impl ExprTranslator {
    pub fn new() -> Self {
        ExprTranslator::default()
    }

    /// Returns the single shared `LoleArg` sentinel, allocating it on first
    /// use (spec §9: nodes may be shared across sibling statements).
    pub fn lole_arg(&mut self, program: &mut Program) -> ExprId {
        match self.lole_arg {
            Some(id) => id,
            None => {
                let id = program.alloc_expr(LoleExpr::LoleArg);
                self.lole_arg = Some(id);
                id
            }
        }
    }

    /// Binds `name` directly to an already-lowered expression, so later
    /// `ColId(name)` lookups skip straight to it. Used by `Project` to make
    /// one projection's `Assign` alias visible to a later projection in the
    /// same list (e.g. a derived column referencing an earlier derived one).
    pub fn register(&mut self, name: impl Into<String>, id: ExprId) {
        self.cache.insert(name.into(), id);
    }

    /// Drops all memoized names. Called at operator boundaries that rebuild
    /// the `Flow` (`Project`, the output side of `HashAggr`/`HashJoin`), since
    /// a cached `TupleGet` refers to a slot index in the *old* flow.
    pub fn reset_cache(&mut self) {
        self.cache.clear();
    }

    pub fn translate(
        &mut self,
        expr: &RelExpr,
        flow: &Flow,
        pred: PredRef,
        program: &mut Program,
    ) -> Result<ExprId, TranslateError> {
        match expr {
            RelExpr::Const(value) => Ok(program.alloc_expr(LoleExpr::Const(value.clone()))),
            RelExpr::ColId(name) => {
                if let Some(&id) = self.cache.get(name) {
                    return Ok(id);
                }
                let slot = flow
                    .slot_of(name)
                    .ok_or_else(|| TranslateError::UnresolvedColumn(name.clone()))?;
                let arg = self.lole_arg(program);
                let id = program.alloc_expr(LoleExpr::TupleGet(arg, slot));
                self.cache.insert(name.clone(), id);
                Ok(id)
            }
            RelExpr::Fun(name, args) => {
                let mut lowered = Vec::with_capacity(args.len());
                for arg in args {
                    lowered.push(self.translate(arg, flow, pred, program)?);
                }
                let mapped = rewrite_fun_name(name).to_string();
                Ok(program.alloc_expr(LoleExpr::Fun(mapped, lowered, pred)))
            }
            RelExpr::Assign(name, _) => Err(TranslateError::AssignOutsideProject(name.clone())),
        }
    }
}
