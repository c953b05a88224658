//! The low-level pipelined dataflow IR ("lolepops") (C2).
//!
//! Nodes are allocated into per-`Program` arenas and referenced by index
//! rather than by pointer or `Arc`, per the arena design note in SPEC_FULL.md
//! §9: there are no back-edges, only DAG-shaped sharing (e.g. the same
//! `LolePred` reused across sibling statements), so plain indices into a
//! `Vec` are sufficient and avoid reference counting entirely.

use crate::blend::BlendConfig;
use std::sync::Arc;

/// Index of a `LoleExpr` within a `Program`'s expression arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(pub usize);

/// Index of a `LoleStmt` within a `Program`'s statement arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StmtId(pub usize);

/// A predicate reference: the active-tuple mask in scope at a statement or
/// expression. `None` means "always active" (spec §3.2).
pub type PredRef = Option<ExprId>;

#[derive(Debug, Clone, PartialEq)]
pub enum LoleExpr {
    Const(String),
    Ref(String),
    TupleGet(ExprId, usize),
    TupleAppend(Vec<ExprId>),
    Fun(String, Vec<ExprId>, PredRef),
    /// The implicit upstream tuple sentinel.
    LoleArg,
    /// The implicit upstream predicate-mask sentinel.
    LolePred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggrKind {
    Sum,
    Count,
    GlobalSum,
    GlobalCount,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoleStmt {
    Assign {
        name: String,
        expr: ExprId,
        pred: PredRef,
    },
    Emit {
        tuple: ExprId,
        pred: PredRef,
    },
    Loop {
        cond: ExprId,
        body: Vec<StmtId>,
    },
    Effect(ExprId),
    Write {
        col: String,
        pos: ExprId,
        value: ExprId,
        pred: PredRef,
    },
    Scatter {
        col: String,
        pos: ExprId,
        value: ExprId,
        pred: PredRef,
    },
    Aggr {
        kind: AggrKind,
        col: String,
        /// `None` for `Count`/`GlobalCount`, which have no value operand.
        value: Option<ExprId>,
        pred: PredRef,
    },
    MetaVarDead(String),
    MetaRefillInflow,
    MetaBeginFsmExclusive,
    MetaEndFsmExclusive,
    Done,
    WrapStatements {
        body: Vec<StmtId>,
        pred: PredRef,
    },
    BlendStmt {
        body: Vec<StmtId>,
        pred: PredRef,
        blend_config: Option<Arc<BlendConfig>>,
    },
}

/// A named ordered sequence of statements corresponding to one relational
/// operator's contribution to a pipeline.
#[derive(Debug, Clone)]
pub struct Lolepop {
    pub name: String,
    pub statements: Vec<StmtId>,
}

/// An ordered sequence of lolepops executed as a single dataflow unit.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub lolepops: Vec<Lolepop>,
    /// Whether this pipeline counts as a genuine unit of work for blend-space
    /// exploration (build/flush pipelines are marked non-interesting).
    pub interesting: bool,
}

impl Pipeline {
    fn new() -> Self {
        Pipeline {
            lolepops: Vec::new(),
            interesting: true,
        }
    }

    /// Total number of `BlendStmt` injection points across all lolepops —
    /// this is what `BlendSpacePoint::point_flavors` is sized against.
    pub fn count_blend_points(&self, program: &Program) -> usize {
        self.lolepops
            .iter()
            .flat_map(|lp| &lp.statements)
            .filter(|&&sid| matches!(program.stmt(sid), LoleStmt::BlendStmt { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Value,
    Key,
    Hash,
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub modifier: Modifier,
}

impl Column {
    pub fn new(name: impl Into<String>, modifier: Modifier) -> Self {
        Column {
            name: name.into(),
            modifier,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    HashTable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableFlags(u8);

impl TableFlags {
    pub const THREAD_LOCAL: TableFlags = TableFlags(1 << 0);
    pub const FLUSH_TO_MASTER: TableFlags = TableFlags(1 << 1);
    pub const READ_AFTER_WRITE: TableFlags = TableFlags(1 << 2);

    pub const fn empty() -> Self {
        TableFlags(0)
    }

    pub const fn contains(self, other: TableFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for TableFlags {
    type Output = TableFlags;
    fn bitor(self, rhs: TableFlags) -> TableFlags {
        TableFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone)]
pub enum DataStructure {
    BaseTable {
        name: String,
        columns: Vec<String>,
        source_table: String,
    },
    Table {
        name: String,
        columns: Vec<Column>,
        kind: TableKind,
        flags: TableFlags,
    },
}

impl DataStructure {
    pub fn name(&self) -> &str {
        match self {
            DataStructure::BaseTable { name, .. } => name,
            DataStructure::Table { name, .. } => name,
        }
    }
}

/// An ordered list of pipelines plus an ordered list of declared data
/// structures: the translator's sole output, and the boundary value handed
/// to the (external) code generator.
#[derive(Debug, Clone, Default)]
pub struct Program {
    exprs: Vec<LoleExpr>,
    stmts: Vec<LoleStmt>,
    pub data_structures: Vec<DataStructure>,
    pub pipelines: Vec<Pipeline>,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }

    pub fn alloc_expr(&mut self, expr: LoleExpr) -> ExprId {
        self.exprs.push(expr);
        ExprId(self.exprs.len() - 1)
    }

    pub fn alloc_stmt(&mut self, stmt: LoleStmt) -> StmtId {
        self.stmts.push(stmt);
        StmtId(self.stmts.len() - 1)
    }

    pub fn expr(&self, id: ExprId) -> &LoleExpr {
        &self.exprs[id.0]
    }

    pub fn stmt(&self, id: StmtId) -> &LoleStmt {
        &self.stmts[id.0]
    }

    pub fn declare(&mut self, ds: DataStructure) {
        self.data_structures.push(ds);
    }

    /// Number of blend points per *interesting* pipeline, in pipeline order —
    /// the shape `BlendSpacePoint` must match (spec §3.3, §4.5-4.9).
    pub fn blend_point_counts(&self) -> Vec<usize> {
        self.pipelines
            .iter()
            .map(|p| p.count_blend_points(self))
            .collect()
    }
}

/// Builder-side cursor over an in-progress `Program`: owns the statement
/// buffer for the pipeline currently being built. `new_pipeline()` finalizes
/// it and starts a fresh one (spec §4.3).
pub struct ProgramBuilder {
    pub program: Program,
    current: Pipeline,
    next_lolepop_id: usize,
    next_unique_name: usize,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        ProgramBuilder {
            program: Program::new(),
            current: Pipeline::new(),
            next_lolepop_id: 0,
            next_unique_name: 0,
        }
    }

    /// Allocates a fresh, globally-unique lolepop name `lole_<id>_<op>[_stage]`.
    pub fn lolepop_name(&mut self, op_name: &str, stage: Option<&str>) -> String {
        let id = self.next_lolepop_id;
        self.next_lolepop_id += 1;
        match stage {
            Some(stage) => format!("lole_{id}_{op_name}_{stage}"),
            None => format!("lole_{id}_{op_name}"),
        }
    }

    pub fn unique_name(&mut self, prefix: &str) -> String {
        let id = self.next_unique_name;
        self.next_unique_name += 1;
        format!("{prefix}_{id}")
    }

    pub fn push_lolepop(&mut self, lolepop: Lolepop) {
        self.current.lolepops.push(lolepop);
    }

    pub fn mark_non_interesting(&mut self) {
        self.current.interesting = false;
    }

    /// Finalizes the in-progress pipeline into `program.pipelines` and starts
    /// a fresh `interesting = true` one.
    pub fn new_pipeline(&mut self) {
        let finished = std::mem::replace(&mut self.current, Pipeline::new());
        if !finished.lolepops.is_empty() {
            self.program.pipelines.push(finished);
        }
    }

    pub fn finish(mut self) -> Program {
        self.new_pipeline();
        self.program
    }
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lolepop_names_are_unique_and_ordered() {
        let mut b = ProgramBuilder::new();
        let a = b.lolepop_name("Scan", None);
        let c = b.lolepop_name("Select", None);
        assert_eq!(a, "lole_0_Scan");
        assert_eq!(c, "lole_1_Select");
    }

    #[test]
    fn new_pipeline_skips_empty_pipelines() {
        let mut b = ProgramBuilder::new();
        b.new_pipeline();
        b.new_pipeline();
        let program = b.finish();
        assert!(program.pipelines.is_empty());
    }

    #[test]
    fn new_pipeline_finalizes_nonempty_pipeline() {
        let mut b = ProgramBuilder::new();
        let name = b.lolepop_name("Scan", None);
        b.push_lolepop(Lolepop {
            name,
            statements: Vec::new(),
        });
        b.new_pipeline();
        let program = b.finish();
        assert_eq!(program.pipelines.len(), 1);
    }

    #[test]
    fn blend_point_counting_only_counts_blend_stmts() {
        let mut program = Program::new();
        let e = program.alloc_expr(LoleExpr::Const("1".into()));
        let plain = program.alloc_stmt(LoleStmt::Effect(e));
        let blended = program.alloc_stmt(LoleStmt::BlendStmt {
            body: vec![],
            pred: None,
            blend_config: None,
        });
        let pipeline = Pipeline {
            lolepops: vec![Lolepop {
                name: "lole_0_Test".into(),
                statements: vec![plain, blended],
            }],
            interesting: true,
        };
        assert_eq!(pipeline.count_blend_points(&program), 1);
    }

    #[test]
    fn table_flags_combine() {
        let flags = TableFlags::THREAD_LOCAL | TableFlags::FLUSH_TO_MASTER;
        assert!(flags.contains(TableFlags::THREAD_LOCAL));
        assert!(flags.contains(TableFlags::FLUSH_TO_MASTER));
        assert!(!flags.contains(TableFlags::READ_AFTER_WRITE));
    }
}
