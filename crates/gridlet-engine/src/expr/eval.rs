use gridlet_model::{ErrorKind, Pos, Range, Value};

use super::ast::{Builtin, Expr, Node};

/// Resolution context an expression evaluates under.
///
/// `resolve` may recurse back into the evaluation engine (that is how
/// dependency chains compute on demand), so both methods take `&mut self`.
pub trait EvalContext {
    /// The value at `pos`, or `None` when no cell exists there.
    fn resolve(&mut self, pos: Pos) -> Option<Value>;

    /// The populated positions inside `range`. Order is not significant
    /// for any builtin.
    fn live_in(&mut self, range: Range) -> Vec<Pos>;
}

enum Operand {
    Scalar(Value),
    Range(Range),
}

fn num(op: Operand) -> Result<f64, ErrorKind> {
    match op {
        Operand::Scalar(Value::Number(n)) => Ok(n),
        Operand::Scalar(Value::Text(_)) | Operand::Range(_) => Err(ErrorKind::TypeMismatch),
        Operand::Scalar(Value::Error(e)) => Err(e),
    }
}

fn text(op: Operand) -> Result<String, ErrorKind> {
    match op {
        Operand::Scalar(Value::Text(s)) => Ok(s),
        Operand::Scalar(Value::Number(n)) => Ok(n.to_string()),
        Operand::Range(_) => Err(ErrorKind::TypeMismatch),
        Operand::Scalar(Value::Error(e)) => Err(e),
    }
}

fn finite(v: f64) -> Result<f64, ErrorKind> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(ErrorKind::Overflow)
    }
}

/// Evaluate a post-order expression under `ctx`.
///
/// Errors are the expression's value-to-be; the caller caches them on the
/// cell rather than propagating them further out.
pub fn evaluate(
    expr: &Expr,
    pool: &str,
    ctx: &mut dyn EvalContext,
) -> Result<Value, ErrorKind> {
    let mut stack: Vec<Operand> = Vec::new();
    let pop = |stack: &mut Vec<Operand>| -> Operand {
        stack.pop().expect("malformed post-order array")
    };

    for node in expr.nodes() {
        match node {
            Node::Number(n) => stack.push(Operand::Scalar(Value::Number(*n))),
            Node::Text(span) => stack.push(Operand::Scalar(Value::Text(
                span.resolve(pool).to_string(),
            ))),
            Node::CellRef(p) => match ctx.resolve(*p) {
                None => return Err(ErrorKind::NotEvaluable),
                Some(Value::Error(e)) => return Err(e),
                Some(v) => stack.push(Operand::Scalar(v)),
            },
            Node::RangeRef(r) => stack.push(Operand::Range(*r)),
            Node::Add | Node::Sub | Node::Mul | Node::Div | Node::Mod => {
                let b = num(pop(&mut stack))?;
                let a = num(pop(&mut stack))?;
                let v = match node {
                    Node::Add => a + b,
                    Node::Sub => a - b,
                    Node::Mul => a * b,
                    Node::Div | Node::Mod => {
                        if b == 0.0 {
                            return Err(ErrorKind::DivisionByZero);
                        }
                        if matches!(node, Node::Div) {
                            a / b
                        } else {
                            a % b
                        }
                    }
                    _ => unreachable!(),
                };
                stack.push(Operand::Scalar(Value::Number(finite(v)?)));
            }
            Node::Concat => {
                let b = text(pop(&mut stack))?;
                let mut a = text(pop(&mut stack))?;
                a.push_str(&b);
                stack.push(Operand::Scalar(Value::Text(a)));
            }
            Node::Neg => {
                let a = num(pop(&mut stack))?;
                stack.push(Operand::Scalar(Value::Number(-a)));
            }
            Node::Builtin { func, argc } => {
                let args = stack.split_off(stack.len() - *argc as usize);
                let v = fold_builtin(*func, args, ctx)?;
                stack.push(Operand::Scalar(Value::Number(v)));
            }
        }
    }

    match pop(&mut stack) {
        Operand::Scalar(v) => Ok(v),
        Operand::Range(_) => Err(ErrorKind::TypeMismatch),
    }
}

fn fold_builtin(
    func: Builtin,
    args: Vec<Operand>,
    ctx: &mut dyn EvalContext,
) -> Result<f64, ErrorKind> {
    let mut sum = 0.0f64;
    let mut product = 1.0f64;
    let mut count = 0u64;
    let mut least: Option<f64> = None;
    let mut greatest: Option<f64> = None;

    let mut feed = |n: f64| {
        sum += n;
        product *= n;
        count += 1;
        least = Some(least.map_or(n, |m| m.min(n)));
        greatest = Some(greatest.map_or(n, |m| m.max(n)));
    };

    for arg in args {
        match arg {
            Operand::Range(range) => {
                // Only cells that actually exist contribute; the live-cell
                // index makes this cheap even for huge ranges.
                for p in ctx.live_in(range) {
                    match ctx.resolve(p) {
                        None => continue,
                        Some(Value::Number(n)) => feed(n),
                        Some(Value::Text(_)) => return Err(ErrorKind::TypeMismatch),
                        Some(Value::Error(e)) => return Err(e),
                    }
                }
            }
            scalar => feed(num(scalar)?),
        }
    }

    let v = match func {
        Builtin::Sum => sum,
        Builtin::Prod => product,
        Builtin::Avg => {
            if count == 0 {
                return Err(ErrorKind::DivisionByZero);
            }
            sum / count as f64
        }
        Builtin::Min => least.ok_or(ErrorKind::NotEvaluable)?,
        Builtin::Max => greatest.ok_or(ErrorKind::NotEvaluable)?,
    };
    finite(v)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use super::super::parser::parse_expr;
    use super::*;

    #[derive(Default)]
    struct MapCtx {
        cells: BTreeMap<Pos, Value>,
    }

    impl MapCtx {
        fn with(cells: &[(&str, Value)]) -> Self {
            Self {
                cells: cells
                    .iter()
                    .map(|(addr, v)| (addr.parse().unwrap(), v.clone()))
                    .collect(),
            }
        }
    }

    impl EvalContext for MapCtx {
        fn resolve(&mut self, pos: Pos) -> Option<Value> {
            self.cells.get(&pos).cloned()
        }

        fn live_in(&mut self, range: Range) -> Vec<Pos> {
            self.cells
                .keys()
                .copied()
                .filter(|p| range.contains_pos(*p))
                .collect()
        }
    }

    fn eval(src: &str, ctx: &mut MapCtx) -> Result<Value, ErrorKind> {
        let parsed = parse_expr(src).unwrap();
        evaluate(&parsed.expr, &parsed.pool, ctx)
    }

    #[test]
    fn arithmetic_follows_precedence() {
        let mut ctx = MapCtx::default();
        assert_eq!(eval("1 + 2 * 3", &mut ctx), Ok(Value::Number(7.0)));
        assert_eq!(eval("(1 + 2) * 3", &mut ctx), Ok(Value::Number(9.0)));
        assert_eq!(eval("7 % 4", &mut ctx), Ok(Value::Number(3.0)));
        assert_eq!(eval("-2 * 3", &mut ctx), Ok(Value::Number(-6.0)));
    }

    #[test]
    fn division_by_zero_and_overflow() {
        let mut ctx = MapCtx::default();
        assert_eq!(eval("1 / 0", &mut ctx), Err(ErrorKind::DivisionByZero));
        assert_eq!(eval("1 % 0", &mut ctx), Err(ErrorKind::DivisionByZero));
        assert_eq!(
            eval("179769313486231570000000000000000000000 * 179769313486231570000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000",
                 &mut ctx),
            Err(ErrorKind::Overflow)
        );
    }

    #[test]
    fn text_in_arithmetic_is_a_type_mismatch() {
        let mut ctx = MapCtx::with(&[("A0", Value::Text("hi".to_string()))]);
        assert_eq!(eval("A0 + 1", &mut ctx), Err(ErrorKind::TypeMismatch));
    }

    #[test]
    fn concat_coerces_numbers() {
        let mut ctx = MapCtx::default();
        assert_eq!(
            eval(r#""total: " # 15"#, &mut ctx),
            Ok(Value::Text("total: 15".to_string()))
        );
    }

    #[test]
    fn missing_direct_reference_is_not_evaluable() {
        let mut ctx = MapCtx::default();
        assert_eq!(eval("A0 + 1", &mut ctx), Err(ErrorKind::NotEvaluable));
    }

    #[test]
    fn referenced_error_propagates() {
        let mut ctx = MapCtx::with(&[("A0", Value::Error(ErrorKind::CyclicalReference))]);
        assert_eq!(
            eval("A0 + 1", &mut ctx),
            Err(ErrorKind::CyclicalReference)
        );
    }

    #[test]
    fn range_builtins_skip_missing_cells() {
        let mut ctx = MapCtx::with(&[
            ("A0", Value::Number(1.0)),
            ("A1", Value::Number(2.0)),
            ("A4", Value::Number(5.0)),
        ]);
        assert_eq!(eval("@sum(A0:A4)", &mut ctx), Ok(Value::Number(8.0)));
        assert_eq!(eval("@avg(A0:A4)", &mut ctx), Ok(Value::Number(8.0 / 3.0)));
        assert_eq!(eval("@min(A0:A4)", &mut ctx), Ok(Value::Number(1.0)));
        assert_eq!(eval("@max(A0:A4, 99)", &mut ctx), Ok(Value::Number(99.0)));
        assert_eq!(eval("@prod(A0:A4)", &mut ctx), Ok(Value::Number(10.0)));
    }

    #[test]
    fn empty_aggregates() {
        let mut ctx = MapCtx::default();
        assert_eq!(eval("@sum(B0:B9)", &mut ctx), Ok(Value::Number(0.0)));
        assert_eq!(eval("@avg(B0:B9)", &mut ctx), Err(ErrorKind::DivisionByZero));
        assert_eq!(eval("@min(B0:B9)", &mut ctx), Err(ErrorKind::NotEvaluable));
    }
}
