//! Expression trees, their textual grammar, and the evaluator.
//!
//! An expression is a post-order node array plus an out-of-line string pool
//! holding its literal text. The kernel only ever uses the capability
//! surface re-exported here: referenced-range iteration, evaluation under a
//! resolver context, and printing back with the pool.

mod ast;
mod eval;
mod parser;

pub use ast::{Builtin, Expr, ExprDisplay, Node, StrSpan};
pub use eval::{evaluate, EvalContext};
pub use parser::{parse_expr, parse_label, ExprParseError, ParsedExpr};
