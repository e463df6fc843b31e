use crate::ast::{Ast, BinOp, IndexSpec};
use crate::error::{JPathError, Position};
use crate::value::Value;
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser as DeriveParser;

#[derive(DeriveParser)]
#[grammar = "jpath.pest"]
pub struct JPathParser;

/// The three ways `parse()` can be entered, mirroring `jpath.pest`'s three
/// start rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRule {
    /// A full path query, e.g. `$.a.b[0]`.
    JPath,
    /// A standalone filter expression, as found inside `[...]`.
    ExprStr,
    /// A bare function call, e.g. `len(@)`.
    Call,
}

lazy_static::lazy_static! {
    static ref PRATT: PrattParser<Rule> = PrattParser::new()
        .op(Op::infix(Rule::union_op, Assoc::Left))
        .op(Op::infix(Rule::and_op, Assoc::Left) | Op::infix(Rule::or_op, Assoc::Left))
        .op(Op::infix(Rule::eq_op, Assoc::Left)
            | Op::infix(Rule::ne_op, Assoc::Left)
            | Op::infix(Rule::lt_op, Assoc::Left)
            | Op::infix(Rule::le_op, Assoc::Left)
            | Op::infix(Rule::gt_op, Assoc::Left)
            | Op::infix(Rule::ge_op, Assoc::Left))
        .op(Op::infix(Rule::add_op, Assoc::Left) | Op::infix(Rule::sub_op, Assoc::Left))
        .op(Op::infix(Rule::mul_op, Assoc::Left)
            | Op::infix(Rule::div_op, Assoc::Left)
            | Op::infix(Rule::mod_op, Assoc::Left));
}

/// Parses `input` under the given entry rule, returning the resulting AST.
///
/// Union (`|`) sits at the lowest precedence and is folded into
/// `Ast::Union` rather than `Ast::Binary`, since it combines Selections
/// rather than scalar Values.
pub fn parse(input: &str, start: StartRule) -> Result<Ast, JPathError> {
    let rule = match start {
        StartRule::JPath => Rule::jpath_entry,
        StartRule::ExprStr => Rule::exprstr_entry,
        StartRule::Call => Rule::call_entry,
    };
    let mut pairs = JPathParser::parse(rule, input)?;
    let top = pairs.next().expect("entry rule always produces one pair");
    let mut inner = top.into_inner();
    let first = inner.next().expect("entry rule wraps exactly one productive child");
    build_ast(first)
}

fn build_ast(pair: Pair<Rule>) -> Result<Ast, JPathError> {
    match pair.as_rule() {
        Rule::expr => build_expr(pair.into_inner()),
        Rule::func_call => build_call(pair),
        Rule::EOI => unreachable!("EOI carries no AST"),
        _ => build_primary(pair),
    }
}

fn build_expr(pairs: Pairs<Rule>) -> Result<Ast, JPathError> {
    PRATT
        .map_primary(build_atom)
        .map_infix(|lhs, op, rhs| {
            let lhs = lhs?;
            let rhs = rhs?;
            if op.as_rule() == Rule::union_op {
                return Ok(Ast::Union(Box::new(lhs), Box::new(rhs)));
            }
            let binop = match op.as_rule() {
                Rule::and_op => BinOp::And,
                Rule::or_op => BinOp::Or,
                Rule::eq_op => BinOp::Eq,
                Rule::ne_op => BinOp::Ne,
                Rule::lt_op => BinOp::Lt,
                Rule::le_op => BinOp::Le,
                Rule::gt_op => BinOp::Gt,
                Rule::ge_op => BinOp::Ge,
                Rule::add_op => BinOp::Add,
                Rule::sub_op => BinOp::Sub,
                Rule::mul_op => BinOp::Mul,
                Rule::div_op => BinOp::Div,
                Rule::mod_op => BinOp::Mod,
                other => unreachable!("infix rule not wired into the Pratt table: {:?}", other),
            };
            Ok(Ast::Binary(binop, Box::new(lhs), Box::new(rhs)))
        })
        .parse(pairs)
}

fn build_atom(pair: Pair<Rule>) -> Result<Ast, JPathError> {
    match pair.as_rule() {
        Rule::neg => {
            let inner = pair
                .into_inner()
                .last()
                .expect("neg always wraps a primary");
            Ok(Ast::UnaryNeg(Box::new(build_atom(inner)?)))
        }
        _ => build_primary(pair),
    }
}

fn build_primary(pair: Pair<Rule>) -> Result<Ast, JPathError> {
    match pair.as_rule() {
        Rule::func_call => build_call(pair),
        Rule::path_chain => build_path_chain(pair),
        Rule::float | Rule::int | Rule::bool_true | Rule::bool_false | Rule::null_lit | Rule::string => {
            Ok(Ast::Literal(build_literal(pair)?))
        }
        Rule::expr => build_expr(pair.into_inner()),
        other => panic!("unexpected primary rule {:?}", other),
    }
}

fn build_call(pair: Pair<Rule>) -> Result<Ast, JPathError> {
    let mut inner = pair.into_inner();
    let name = inner.next().expect("func_call always names a function").as_str().to_string();
    let mut args = Vec::new();
    if let Some(params) = inner.next() {
        for expr_pair in params.into_inner() {
            args.push(build_ast(expr_pair)?);
        }
    }
    Ok(Ast::Call(name, args))
}

fn build_path_chain(pair: Pair<Rule>) -> Result<Ast, JPathError> {
    let mut inner = pair.into_inner();
    let atom = inner.next().expect("path_chain always starts with root or current");
    let path_atom = atom.into_inner().next().expect("path_atom wraps root or current");
    let head = match path_atom.as_rule() {
        Rule::root => Ast::Root,
        Rule::current => Ast::Current,
        other => panic!("unexpected path_atom rule {:?}", other),
    };
    let mut steps = vec![head];
    for postfix in inner {
        steps.push(build_postfix(postfix)?);
    }
    if steps.len() == 1 {
        Ok(steps.remove(0))
    } else {
        Ok(Ast::Chain(steps))
    }
}

fn build_postfix(pair: Pair<Rule>) -> Result<Ast, JPathError> {
    match pair.as_rule() {
        Rule::key_shallow => {
            let name = unescape_string(pair.into_inner().next().unwrap().as_str())?;
            Ok(Ast::Key { deep: false, name })
        }
        Rule::key_deep => {
            let name = unescape_string(pair.into_inner().next().unwrap().as_str())?;
            Ok(Ast::Key { deep: true, name })
        }
        Rule::allkeys_shallow => Ok(Ast::AllKeys { deep: false }),
        Rule::allkeys_deep => Ok(Ast::AllKeys { deep: true }),
        Rule::el_bracket => {
            let body = pair.into_inner().next().expect("el_bracket always has a body");
            Ok(Ast::ArrayIndex(build_index_spec(body)?))
        }
        Rule::gen_bracket => {
            let body = pair.into_inner().next().expect("gen_bracket always has a body");
            build_gen_postfix(body)
        }
        other => panic!("unexpected postfix rule {:?}", other),
    }
}

fn build_gen_postfix(body: Pair<Rule>) -> Result<Ast, JPathError> {
    match body.as_rule() {
        Rule::expand => Ok(Ast::Expand),
        Rule::slice | Rule::indices | Rule::int => Ok(Ast::ItemIndex(build_index_spec(body)?)),
        Rule::expr => {
            let predicate = build_expr(body.into_inner())?;
            Ok(Ast::Filter(Box::new(predicate)))
        }
        other => panic!("unexpected gen_body rule {:?}", other),
    }
}

fn build_index_spec(pair: Pair<Rule>) -> Result<IndexSpec, JPathError> {
    match pair.as_rule() {
        Rule::int => Ok(IndexSpec::Int(parse_int(pair.as_str())?)),
        Rule::indices => {
            let mut list = Vec::new();
            for p in pair.into_inner() {
                list.push(parse_int(p.as_str())?);
            }
            Ok(IndexSpec::List(list))
        }
        Rule::slice => {
            let mut parts: Vec<Option<i64>> = vec![None, None, None];
            for (i, p) in pair.into_inner().enumerate() {
                parts[i] = Some(parse_int(p.as_str())?);
            }
            Ok(IndexSpec::Slice {
                start: parts[0],
                stop: parts[1],
                step: parts[2],
            })
        }
        other => panic!("unexpected index spec rule {:?}", other),
    }
}

fn parse_int(s: &str) -> Result<i64, JPathError> {
    s.parse()
        .map_err(|_| JPathError::syntax(Position::UNKNOWN, format!("invalid integer literal '{}'", s)))
}

fn build_literal(pair: Pair<Rule>) -> Result<Value, JPathError> {
    match pair.as_rule() {
        Rule::float => {
            let f: f64 = pair
                .as_str()
                .parse()
                .map_err(|_| JPathError::syntax(Position::UNKNOWN, format!("invalid float literal '{}'", pair.as_str())))?;
            Ok(Value::Float(f))
        }
        Rule::int => Ok(Value::Int(parse_int(pair.as_str())?)),
        Rule::bool_true => Ok(Value::Bool(true)),
        Rule::bool_false => Ok(Value::Bool(false)),
        Rule::null_lit => Ok(Value::Null),
        Rule::string => Ok(Value::String(unescape_string(pair.as_str())?)),
        other => panic!("unexpected literal rule {:?}", other),
    }
}

/// Unescapes a raw quoted token captured by the `string` grammar rule
/// (which deliberately includes the surrounding quotes and every escape
/// sequence verbatim, so the grammar stays a simple atomic rule).
fn unescape_string(raw: &str) -> Result<String, JPathError> {
    let body = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some('/') => out.push('/'),
            Some('b') => out.push('\u{0008}'),
            Some('f') => out.push('\u{000C}'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('u') => {
                let hex: String = (&mut chars).take(4).collect();
                let code = u32::from_str_radix(&hex, 16)
                    .map_err(|_| JPathError::syntax(Position::UNKNOWN, "invalid \\u escape"))?;
                out.push(char::from_u32(code).unwrap_or('\u{FFFD}'));
            }
            _ => return Err(JPathError::syntax(Position::UNKNOWN, "invalid escape sequence")),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_root_key_chain() {
        let ast = parse(r#"$."a"."b""#, StartRule::JPath).unwrap();
        let expected = Ast::Chain(vec![
            Ast::Root,
            Ast::Key {
                deep: false,
                name: "a".into(),
            },
            Ast::Key {
                deep: false,
                name: "b".into(),
            },
        ]);
        assert_eq!(ast, expected);
    }

    #[test]
    fn parses_deep_key_and_index() {
        let ast = parse(r#"$.."a".[1]"#, StartRule::JPath).unwrap();
        let expected = Ast::Chain(vec![
            Ast::Root,
            Ast::Key {
                deep: true,
                name: "a".into(),
            },
            Ast::ArrayIndex(IndexSpec::Int(1)),
        ]);
        assert_eq!(ast, expected);
    }

    #[test]
    fn parses_filter_expression() {
        let ast = parse(r#"$[@."price" < 10]"#, StartRule::JPath).unwrap();
        match ast {
            Ast::Chain(steps) => {
                assert_eq!(steps.len(), 2);
                assert_eq!(steps[0], Ast::Root);
                match &steps[1] {
                    Ast::Filter(inner) => match inner.as_ref() {
                        Ast::Binary(BinOp::Lt, ..) => {}
                        other => panic!("expected Binary(Lt, ..), got {:?}", other),
                    },
                    other => panic!("expected Filter, got {:?}", other),
                }
            }
            other => panic!("expected Chain, got {:?}", other),
        }
    }

    #[test]
    fn parses_function_call_args() {
        let ast = parse("startswith(@, \"a\")", StartRule::Call).unwrap();
        match ast {
            Ast::Call(name, args) => {
                assert_eq!(name, "startswith");
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected Call, got {:?}", other),
        }
    }

    #[test]
    fn syntax_error_reports_position() {
        let err = parse("$.", StartRule::JPath).unwrap_err();
        assert!(matches!(err, JPathError::Syntax(..)));
    }
}
