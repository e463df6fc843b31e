/*!
A query language for navigating dynamic, JSON-shaped data trees.

A JPath query such as `$.."author"[0]` is parsed into an `Ast`, then
tree-walked by an evaluator against a `Selection` — an ordered multiset of
`Value`s carrying a sticky reference to the query's root scope. Filter
expressions (`[@."price" < 10]`) are full arithmetic/boolean expressions in
their own right, evaluated per candidate item, and function calls
(`startswith(@, "a")`) dispatch through a `FunctionTable` that can be
extended with custom handlers.

The grammar lives in `jpath.pest` and is compiled by `pest`/`pest_derive`;
everything past tokenizing is a plain recursive interpreter, not a
compile-to-host-language-and-eval step.
*/

mod ast;
mod error;
mod evaluator;
mod functions;
mod parser;
mod selection;
mod value;

pub use ast::{Ast, BinOp, IndexSpec};
pub use error::{JPathError, Position};
pub use functions::FunctionTable;
pub use parser::StartRule;
pub use selection::{FunctionHandle, Outcome, Selection, SelectionConfig, SelectionConfigBuilder};
pub use value::{Object, Value, ValueKind};

use log::debug;

/// Configuration accepted by `query()`: the Selection type-iteration rules
/// and the function dispatch table to evaluate calls against.
#[derive(Clone)]
pub struct QueryOptions {
    config: SelectionConfig,
    functions: FunctionTable,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            config: SelectionConfig::default(),
            functions: FunctionTable::default(),
        }
    }
}

impl QueryOptions {
    pub fn builder() -> QueryOptionsBuilder {
        QueryOptionsBuilder::default()
    }
}

/// Builder for a `QueryOptions` that overrides the default Selection
/// config and/or function table.
#[derive(Default)]
pub struct QueryOptionsBuilder {
    config: Option<SelectionConfig>,
    functions: Option<FunctionTable>,
}

impl QueryOptionsBuilder {
    pub fn config(mut self, config: SelectionConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn functions(mut self, functions: FunctionTable) -> Self {
        self.functions = Some(functions);
        self
    }

    pub fn build(self) -> QueryOptions {
        QueryOptions {
            config: self.config.unwrap_or_default(),
            functions: self.functions.unwrap_or_default(),
        }
    }
}

/// Parses `expr` under the given entry rule without evaluating it.
pub fn parse(expr: &str, start: StartRule) -> Result<Ast, JPathError> {
    parser::parse(expr, start)
}

/// Evaluates a pre-parsed AST against `current`, dispatching any function
/// calls it contains through `functions`.
pub fn evaluate(ast: &Ast, current: &Selection, functions: &FunctionTable) -> Result<Outcome, JPathError> {
    evaluator::evaluate(ast, current, functions)
}

/// Parses and evaluates `expr` against `input`, returning the resulting
/// Selection. This is the entry point most callers want.
pub fn query(expr: &str, input: Value, opts: &QueryOptions) -> Result<Selection, JPathError> {
    debug!("query {:?}", expr);
    let ast = parse(expr, StartRule::JPath)?;
    let root = Selection::with_config(vec![input], opts.config.clone());
    match evaluate(&ast, &root, &opts.functions)? {
        Outcome::Selection(s) => Ok(s),
        Outcome::Value(v) => Ok(root.with_items(vec![v])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn obj(pairs: Vec<(&str, Value)>) -> Value {
        let mut o = Object::new();
        for (k, v) in pairs {
            o.insert(k, v);
        }
        Value::Object(o)
    }

    #[rstest]
    #[case(r#"$."a"."a""#, r#"{"a":{"a":1},"b":2}"#, vec![Value::Int(1)])]
    #[case(r#"$.*"#, r#"{"a":{"a":1},"b":2}"#, vec![obj(vec![("a", Value::Int(1))]), Value::Int(2)])]
    #[case(r#"$.."a""#, r#"{"a":[1,2,3],"b":{"a":1}}"#, vec![Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]), Value::Int(1)])]
    #[case(r#"$.."a".[1]"#, r#"{"a":[1,2,3],"b":{"a":1}}"#, vec![Value::Int(2)])]
    #[case(r#"$.."a".[100]"#, r#"{"a":[1,2,3],"b":{"a":1}}"#, vec![])]
    #[case(r#"$.."a".[1:]"#, r#"{"a":[1,2,3],"b":{"a":1}}"#, vec![Value::Int(2), Value::Int(3)])]
    #[case(r#"$.."a".[3,-1,2,1,0]"#, r#"{"a":[1,2,3],"b":{"a":1}}"#, vec![Value::Int(3), Value::Int(3), Value::Int(2), Value::Int(1)])]
    fn scenarios_from_the_query_language_notes(#[case] expr: &str, #[case] input: &str, #[case] expected: Vec<Value>) {
        let input: serde_json::Value = serde_json::from_str(input).unwrap();
        let result = query(expr, Value::from(input), &QueryOptions::default()).unwrap();
        assert_eq!(result.tuple(), expected);
    }

    #[test]
    fn expand_then_pick_does_not_split_atomic_values() {
        let input: serde_json::Value =
            serde_json::from_str(r#"{"a":[1,2,3],"b":"abc","c":{"d":false}}"#).unwrap();
        let result = query("$.*[*]", Value::from(input), &QueryOptions::default()).unwrap();
        assert_eq!(
            result.tuple(),
            vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3),
                Value::String("abc".into()),
                obj(vec![("d", Value::Bool(false))]),
            ]
        );
    }

    #[test]
    fn filter_expression_compares_scalars() {
        let input: serde_json::Value =
            serde_json::from_str(r#"[{"price":8},{"price":15}]"#).unwrap();
        let result = query(r#"$[*][@."price" < 10]"#, Value::from(input), &QueryOptions::default()).unwrap();
        assert_eq!(result.tuple(), vec![obj(vec![("price", Value::Int(8))])]);
    }

    #[test]
    fn function_call_error_surfaces_as_function_variant() {
        let input: serde_json::Value = serde_json::from_str(r#"{"n": 1}"#).unwrap();
        let ast = parse(r#"startswith($."n", "1")"#, StartRule::Call).unwrap();
        let root = Selection::new(vec![Value::from(input)]);
        let functions = FunctionTable::default();
        let err = evaluate(&ast, &root, &functions).unwrap_err();
        assert!(matches!(err, JPathError::Function(_)));
    }

    #[test]
    fn syntax_error_reports_line_and_position() {
        let err = parse("$.\"a\"[", StartRule::JPath).unwrap_err();
        match err {
            JPathError::Syntax(pos, _) => {
                assert_eq!(pos.line, Some(1));
            }
            other => panic!("expected Syntax error, got {:?}", other),
        }
    }

    #[test]
    fn root_stays_sticky_across_union_branches() {
        let input: serde_json::Value = serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap();
        let ast = parse(r#"$."a" | $."b""#, StartRule::JPath).unwrap();
        let root = Selection::new(vec![Value::from(input)]);
        let functions = FunctionTable::default();
        match evaluate(&ast, &root, &functions).unwrap() {
            Outcome::Selection(s) => assert_eq!(s.tuple(), vec![Value::Int(1), Value::Int(2)]),
            other => panic!("expected Selection, got {:?}", other),
        }
    }

    #[test]
    fn custom_config_makes_strings_index_iterable() {
        let config = SelectionConfigBuilder::new()
            .iters_by_idx(vec![ValueKind::Array, ValueKind::String])
            .excluded_by_idx(vec![])
            .build();
        let opts = QueryOptions::builder().config(config).build();
        let result = query(r#"$."a".[0:2]"#, obj(vec![("a", Value::String("abc".into()))]), &opts).unwrap();
        assert_eq!(result.tuple(), vec![Value::String("a".into()), Value::String("b".into())]);
    }
}
