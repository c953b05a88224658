//! Translator (C4/C5): lowers a `RelOp`/`RelExpr` plan into a `lole::Program`.

pub mod expr;
pub mod operator;

pub use expr::ExprTranslator;
pub use operator::translate;
