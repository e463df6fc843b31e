use crate::ast::{Ast, BinOp};
use crate::error::JPathError;
use crate::functions::FunctionTable;
use crate::selection::{Outcome, Selection};
use crate::value::Value;
use log::{debug, trace};
use std::cmp::Ordering;

/// Walks `ast`, resolving `Root`/`Current` against `current`'s root and
/// `current` itself respectively, and dispatching function calls through
/// `functions`.
///
/// This is a tree-walking interpreter by design: the grammar's AST is
/// evaluated directly rather than lowered to any intermediate form.
pub fn evaluate(ast: &Ast, current: &Selection, functions: &FunctionTable) -> Result<Outcome, JPathError> {
    trace!("evaluate {:?}", ast);
    match ast {
        Ast::Root => Ok(Outcome::Selection(current.root_selection())),
        Ast::Current => Ok(Outcome::Selection(current.clone())),
        Ast::Chain(steps) => evaluate_chain(steps, current, functions),
        Ast::Union(l, r) => {
            let ls = to_selection(evaluate(l, current, functions)?, current);
            let rs = to_selection(evaluate(r, current, functions)?, current);
            Ok(Outcome::Selection(ls.union(&rs)))
        }
        Ast::Literal(v) => Ok(Outcome::Value(v.clone())),
        Ast::UnaryNeg(inner) => {
            let v = evaluate(inner, current, functions)?.into_value()?;
            match v {
                Value::Int(i) => Ok(Outcome::Value(Value::Int(-i))),
                Value::Float(f) => Ok(Outcome::Value(Value::Float(-f))),
                other => Err(JPathError::runtime(format!("cannot negate {:?}", other.kind()))),
            }
        }
        Ast::Binary(op, l, r) => evaluate_binary(*op, l, r, current, functions),
        Ast::Call(name, args) => evaluate_call(name, args, current, functions),
        Ast::Key { .. } | Ast::AllKeys { .. } | Ast::ArrayIndex(_) | Ast::ItemIndex(_) | Ast::Expand | Ast::Filter(_) => {
            // Only ever produced as elements of a Chain; a bare occurrence
            // means the parser built something the grammar cannot actually
            // emit at the top level.
            Err(JPathError::runtime(format!("{:?} cannot appear outside a path chain", ast)))
        }
    }
}

fn to_selection(outcome: Outcome, context: &Selection) -> Selection {
    match outcome {
        Outcome::Selection(s) => s,
        Outcome::Value(v) => context.with_items(vec![v]),
    }
}

fn evaluate_chain(steps: &[Ast], current: &Selection, functions: &FunctionTable) -> Result<Outcome, JPathError> {
    let mut sel = match &steps[0] {
        Ast::Root => current.root_selection(),
        Ast::Current => current.clone(),
        other => to_selection(evaluate(other, current, functions)?, current),
    };
    for step in &steps[1..] {
        sel = apply_step(step, sel, functions)?;
        debug!("chain step {:?} -> {} item(s)", step, sel.len());
    }
    Ok(Outcome::Selection(sel))
}

fn apply_step(step: &Ast, sel: Selection, functions: &FunctionTable) -> Result<Selection, JPathError> {
    match step {
        Ast::Key { deep, name } => Ok(sel.one(name, *deep)),
        Ast::AllKeys { deep } => Ok(sel.all(*deep)),
        Ast::ArrayIndex(spec) => Ok(sel.el(spec)),
        Ast::ItemIndex(spec) => Ok(sel.i(spec)),
        Ast::Expand => Ok(sel.exp()),
        Ast::Filter(pred) => {
            let pred = pred.clone();
            let functions = functions.clone();
            Ok(sel.filter(move |_idx, single, _root| {
                let outcome = evaluate(&pred, single, &functions)?;
                Ok(outcome.is_truthy())
            }))
        }
        other => Err(JPathError::runtime(format!("{:?} cannot follow a path step", other))),
    }
}

fn evaluate_binary(
    op: BinOp,
    l: &Ast,
    r: &Ast,
    current: &Selection,
    functions: &FunctionTable,
) -> Result<Outcome, JPathError> {
    let lo = evaluate(l, current, functions)?;
    match op {
        BinOp::And => {
            if !lo.is_truthy() {
                return Ok(Outcome::Value(Value::Bool(false)));
            }
            let ro = evaluate(r, current, functions)?;
            Ok(Outcome::Value(Value::Bool(ro.is_truthy())))
        }
        BinOp::Or => {
            if lo.is_truthy() {
                return Ok(Outcome::Value(Value::Bool(true)));
            }
            let ro = evaluate(r, current, functions)?;
            Ok(Outcome::Value(Value::Bool(ro.is_truthy())))
        }
        _ => {
            let ro = evaluate(r, current, functions)?;
            let lv = lo.into_value()?;
            let rv = ro.into_value()?;
            eval_scalar_binop(op, lv, rv)
        }
    }
}

fn eval_scalar_binop(op: BinOp, l: Value, r: Value) -> Result<Outcome, JPathError> {
    match op {
        BinOp::Eq => Ok(Outcome::Value(Value::Bool(l == r))),
        BinOp::Ne => Ok(Outcome::Value(Value::Bool(l != r))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = order(&l, &r)?;
            let result = match op {
                BinOp::Lt => ordering == Ordering::Less,
                BinOp::Le => ordering != Ordering::Greater,
                BinOp::Gt => ordering == Ordering::Greater,
                BinOp::Ge => ordering != Ordering::Less,
                _ => unreachable!(),
            };
            Ok(Outcome::Value(Value::Bool(result)))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => arithmetic(op, l, r),
        BinOp::And | BinOp::Or => unreachable!("short-circuited before reaching eval_scalar_binop"),
    }
}

fn order(l: &Value, r: &Value) -> Result<Ordering, JPathError> {
    match (l, r) {
        (a, b) if a.is_numeric() && b.is_numeric() => a
            .as_f64()
            .unwrap()
            .partial_cmp(&b.as_f64().unwrap())
            .ok_or_else(|| JPathError::runtime("cannot order NaN")),
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(JPathError::runtime(format!(
            "cannot order {:?} and {:?}",
            l.kind(),
            r.kind()
        ))),
    }
}

/// Arithmetic with §4.5's Int/Float promotion: an Int/Int operation stays
/// Int (division and modulo truncate toward zero, which is exactly what
/// Rust's `/`/`%` already do for signed integers), any Float operand
/// promotes the whole operation to Float.
fn arithmetic(op: BinOp, l: Value, r: Value) -> Result<Outcome, JPathError> {
    match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => {
            let (a, b) = (*a, *b);
            let result = match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div => {
                    if b == 0 {
                        return Err(JPathError::runtime("division by zero"));
                    }
                    Some(a / b)
                }
                BinOp::Mod => {
                    if b == 0 {
                        return Err(JPathError::runtime("division by zero"));
                    }
                    Some(a % b)
                }
                _ => unreachable!(),
            };
            result
                .map(|i| Outcome::Value(Value::Int(i)))
                .ok_or_else(|| JPathError::runtime("integer overflow"))
        }
        _ if l.is_numeric() && r.is_numeric() => {
            let a = l.as_f64().unwrap();
            let b = r.as_f64().unwrap();
            let result = match op {
                BinOp::Add => a + b,
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => {
                    if b == 0.0 {
                        return Err(JPathError::runtime("division by zero"));
                    }
                    a / b
                }
                BinOp::Mod => {
                    if b == 0.0 {
                        return Err(JPathError::runtime("division by zero"));
                    }
                    a % b
                }
                _ => unreachable!(),
            };
            Ok(Outcome::Value(Value::Float(result)))
        }
        _ => Err(JPathError::runtime(format!(
            "cannot apply arithmetic to {:?} and {:?}",
            l.kind(),
            r.kind()
        ))),
    }
}

fn evaluate_call(
    name: &str,
    args: &[Ast],
    current: &Selection,
    functions: &FunctionTable,
) -> Result<Outcome, JPathError> {
    let f = functions
        .get(name)
        .ok_or_else(|| JPathError::function(format!("unknown function '{}'", name)))?
        .clone();
    let receiver_ast = args
        .first()
        .ok_or_else(|| JPathError::function(format!("'{}' requires a receiver argument", name)))?;
    let receiver = to_selection(evaluate(receiver_ast, current, functions)?, current);

    let mut rest = Vec::with_capacity(args.len().saturating_sub(1));
    for arg in &args[1..] {
        rest.push(evaluate(arg, current, functions)?.into_value()?);
    }

    receiver.call_for_self(&f, &rest).map_err(JPathError::wrap_function_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse, StartRule};
    use crate::value::Object;
    use pretty_assertions::assert_eq;

    fn obj(pairs: Vec<(&str, Value)>) -> Value {
        let mut o = Object::new();
        for (k, v) in pairs {
            o.insert(k, v);
        }
        Value::Object(o)
    }

    fn run(query: &str, input: Value) -> Selection {
        let ast = parse(query, StartRule::JPath).unwrap();
        let root = Selection::new(vec![input]);
        let functions = FunctionTable::default();
        match evaluate(&ast, &root, &functions).unwrap() {
            Outcome::Selection(s) => s,
            Outcome::Value(v) => root.with_items(vec![v]),
        }
    }

    #[test]
    fn deep_key_descent_matches_author_scenario() {
        let books: Vec<Value> = ["Nigel Rees", "Evelyn Waugh"]
            .iter()
            .map(|a| obj(vec![("author", Value::String(a.to_string()))]))
            .collect();
        let input = obj(vec![("books", Value::Array(books))]);
        let result = run(r#"$.."author""#, input);
        assert_eq!(
            result.tuple(),
            vec![Value::String("Nigel Rees".into()), Value::String("Evelyn Waugh".into())]
        );
    }

    #[test]
    fn filter_keeps_matching_items_only() {
        let input = Value::Array(vec![
            obj(vec![("price", Value::Int(8))]),
            obj(vec![("price", Value::Int(15))]),
        ]);
        let result = run(r#"$[*][@."price" < 10]"#, input);
        assert_eq!(result.tuple(), vec![obj(vec![("price", Value::Int(8))])]);
    }

    #[test]
    fn integer_division_truncates_toward_zero() {
        let ast = parse("-7 / 2", StartRule::ExprStr).unwrap();
        let root = Selection::new(vec![Value::Null]);
        let functions = FunctionTable::default();
        let outcome = evaluate(&ast, &root, &functions).unwrap();
        assert_eq!(outcome.into_value().unwrap(), Value::Int(-3));
    }

    #[test]
    fn empty_selection_in_arithmetic_is_runtime_error() {
        let ast = parse(r#"$."missing" + 1"#, StartRule::ExprStr).unwrap();
        let root = Selection::new(vec![obj(vec![("present", Value::Int(1))])]);
        let functions = FunctionTable::default();
        let err = evaluate(&ast, &root, &functions).unwrap_err();
        assert!(matches!(err, JPathError::Runtime(_)));
    }

    #[test]
    fn function_call_dispatches_through_table() {
        let result = run(r#"$[startswith(@."name", "Al")]"#, Value::Array(vec![
            obj(vec![("name", Value::String("Alice".into()))]),
            obj(vec![("name", Value::String("Bob".into()))]),
        ]));
        assert_eq!(result.tuple(), vec![obj(vec![("name", Value::String("Alice".into()))])]);
    }
}
