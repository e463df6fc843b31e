use crate::error::JPathError;
use crate::selection::{resolve_slice, FunctionHandle, Outcome, Selection};
use crate::value::{Value, ValueKind};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

lazy_static::lazy_static! {
    static ref WHITESPACE_RUN: Regex = Regex::new(r"\s+").expect("static regex is valid");
}

/// The dispatch table a query evaluates function calls against.
///
/// Cloning is cheap: the underlying handles are `Arc`-shared, so a
/// `FunctionTable` can be threaded through nested evaluations (e.g. a
/// filter predicate's own function calls) without re-registering builtins.
#[derive(Clone)]
pub struct FunctionTable {
    handlers: HashMap<String, FunctionHandle>,
}

impl FunctionTable {
    pub fn new() -> Self {
        FunctionTable {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, handle: FunctionHandle) {
        self.handlers.insert(name.into(), handle);
    }

    pub fn get(&self, name: &str) -> Option<&FunctionHandle> {
        self.handlers.get(name)
    }
}

impl Default for FunctionTable {
    fn default() -> Self {
        let mut table = FunctionTable::new();
        register_builtins(&mut table);
        table
    }
}

fn handle<F>(f: F) -> FunctionHandle
where
    F: Fn(&Selection, &[Value]) -> Result<Outcome, JPathError> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn scalar(v: Value) -> Result<Outcome, JPathError> {
    Ok(Outcome::Value(v))
}

fn require_string<'a>(v: &'a Value, fn_name: &str) -> Result<&'a str, JPathError> {
    v.as_str()
        .ok_or_else(|| JPathError::function(format!("{}() requires a string", fn_name)))
}

fn register_builtins(table: &mut FunctionTable) {
    // ---- scalar coercion --------------------------------------------------

    table.register(
        "toint",
        handle(|sel, _| {
            let v = sel.first_of()?;
            match v {
                Value::Int(i) => scalar(Value::Int(*i)),
                Value::Float(f) => scalar(Value::Int(f.trunc() as i64)),
                Value::Bool(b) => scalar(Value::Int(*b as i64)),
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| JPathError::function(format!("cannot convert '{}' to int", s)))
                    .and_then(scalar),
                other => Err(JPathError::function(format!(
                    "cannot convert {:?} to int",
                    other.kind()
                ))),
            }
        }),
    );

    table.register(
        "toflt",
        handle(|sel, _| {
            let v = sel.first_of()?;
            match v {
                Value::Int(i) => scalar(Value::Float(*i as f64)),
                Value::Float(f) => scalar(Value::Float(*f)),
                Value::Bool(b) => scalar(Value::Float(if *b { 1.0 } else { 0.0 })),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Value::Float)
                    .map_err(|_| JPathError::function(format!("cannot convert '{}' to float", s)))
                    .and_then(scalar),
                other => Err(JPathError::function(format!(
                    "cannot convert {:?} to float",
                    other.kind()
                ))),
            }
        }),
    );

    table.register(
        "tostr",
        handle(|sel, _| scalar(Value::String(sel.first_of()?.to_string()))),
    );

    // ---- type predicates ----------------------------------------------------

    macro_rules! kind_predicate {
        ($name:literal, $kind:expr) => {
            table.register(
                $name,
                handle(|sel, _| scalar(Value::Bool(sel.first_of()?.kind() == $kind))),
            );
        };
    }
    kind_predicate!("isint", ValueKind::Int);
    kind_predicate!("isflt", ValueKind::Float);
    kind_predicate!("isbool", ValueKind::Bool);
    kind_predicate!("isstr", ValueKind::String);
    kind_predicate!("isnull", ValueKind::Null);
    kind_predicate!("isarr", ValueKind::Array);
    kind_predicate!("isobj", ValueKind::Object);
    table.register(
        "isnum",
        handle(|sel, _| scalar(Value::Bool(sel.first_of()?.is_numeric()))),
    );

    // ---- sequence / string --------------------------------------------------

    table.register(
        "len",
        handle(|sel, _| {
            let v = sel.first_of()?;
            let n = match v {
                Value::String(s) => s.chars().count(),
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                other => {
                    return Err(JPathError::function(format!(
                        "len() requires a string, array, or object, got {:?}",
                        other.kind()
                    )))
                }
            };
            scalar(Value::Int(n as i64))
        }),
    );

    table.register(
        "get",
        handle(|sel, args| {
            let v = sel.first_of()?;
            let key = args
                .first()
                .ok_or_else(|| JPathError::function("get() requires an index or key argument"))?;
            match (v, key) {
                (Value::Array(a), Value::Int(i)) => {
                    let idx = normalize(*i, a.len() as i64)
                        .ok_or_else(|| JPathError::function("get() index out of range"))?;
                    scalar(a[idx].clone())
                }
                (Value::String(s), Value::Int(i)) => {
                    let chars: Vec<char> = s.chars().collect();
                    let idx = normalize(*i, chars.len() as i64)
                        .ok_or_else(|| JPathError::function("get() index out of range"))?;
                    scalar(Value::String(chars[idx].to_string()))
                }
                (Value::Object(o), Value::String(k)) => o
                    .get(k)
                    .cloned()
                    .map(scalar)
                    .unwrap_or_else(|| Err(JPathError::function(format!("get() key '{}' not found", k)))),
                _ => Err(JPathError::function("get() arguments do not match the receiver's type")),
            }
        }),
    );

    table.register(
        "slice",
        handle(|sel, args| {
            let as_opt_int = |v: Option<&Value>| -> Result<Option<i64>, JPathError> {
                match v {
                    None | Some(Value::Null) => Ok(None),
                    Some(Value::Int(i)) => Ok(Some(*i)),
                    Some(other) => Err(JPathError::function(format!(
                        "slice() bounds must be integers, got {:?}",
                        other.kind()
                    ))),
                }
            };
            let start = as_opt_int(args.first())?;
            let stop = as_opt_int(args.get(1))?;
            let step = as_opt_int(args.get(2))?;
            let v = sel.first_of()?;
            match v {
                Value::Array(a) => {
                    let idxs = resolve_slice(a.len() as i64, start, stop, step);
                    scalar(Value::Array(idxs.into_iter().map(|i| a[i].clone()).collect()))
                }
                Value::String(s) => {
                    let chars: Vec<char> = s.chars().collect();
                    let idxs = resolve_slice(chars.len() as i64, start, stop, step);
                    scalar(Value::String(idxs.into_iter().map(|i| chars[i]).collect()))
                }
                other => Err(JPathError::function(format!(
                    "slice() requires an array or string, got {:?}",
                    other.kind()
                ))),
            }
        }),
    );

    table.register(
        "replace",
        handle(|sel, args| {
            let s = require_string(sel.first_of()?, "replace")?;
            let from = args
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| JPathError::function("replace() requires (from, to) string arguments"))?;
            let to = args
                .get(1)
                .and_then(Value::as_str)
                .ok_or_else(|| JPathError::function("replace() requires (from, to) string arguments"))?;
            scalar(Value::String(s.replace(from, to)))
        }),
    );

    macro_rules! string_char_predicate {
        ($name:literal, $pred:expr) => {
            table.register($name, handle(|sel, _| {
                let s = require_string(sel.first_of()?, $name)?;
                scalar(Value::Bool(!s.is_empty() && s.chars().all($pred)))
            }));
        };
    }
    string_char_predicate!("isdigit", |c: char| c.is_ascii_digit());
    string_char_predicate!("isalpha", |c: char| c.is_alphabetic());
    string_char_predicate!("isalnum", |c: char| c.is_alphanumeric());
    string_char_predicate!("isspace", |c: char| c.is_whitespace());

    table.register(
        "islower",
        handle(|sel, _| {
            let s = require_string(sel.first_of()?, "islower")?;
            let has_cased = s.chars().any(|c| c.is_alphabetic());
            scalar(Value::Bool(has_cased && s.chars().all(|c| !c.is_uppercase())))
        }),
    );
    table.register(
        "isupper",
        handle(|sel, _| {
            let s = require_string(sel.first_of()?, "isupper")?;
            let has_cased = s.chars().any(|c| c.is_alphabetic());
            scalar(Value::Bool(has_cased && s.chars().all(|c| !c.is_lowercase())))
        }),
    );
    table.register(
        "istitle",
        handle(|sel, _| {
            let s = require_string(sel.first_of()?, "istitle")?;
            scalar(Value::Bool(!s.is_empty() && s == title_case(s)))
        }),
    );

    table.register(
        "lower",
        handle(|sel, _| scalar(Value::String(require_string(sel.first_of()?, "lower")?.to_lowercase()))),
    );
    table.register(
        "upper",
        handle(|sel, _| scalar(Value::String(require_string(sel.first_of()?, "upper")?.to_uppercase()))),
    );
    table.register(
        "capitalize",
        handle(|sel, _| {
            let s = require_string(sel.first_of()?, "capitalize")?;
            let mut chars = s.chars();
            let capitalized = match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                None => String::new(),
            };
            scalar(Value::String(capitalized))
        }),
    );
    table.register(
        "title",
        handle(|sel, _| scalar(Value::String(title_case(require_string(sel.first_of()?, "title")?)))),
    );
    table.register(
        "ltrim",
        handle(|sel, _| scalar(Value::String(require_string(sel.first_of()?, "ltrim")?.trim_start().to_string()))),
    );
    table.register(
        "rtrim",
        handle(|sel, _| scalar(Value::String(require_string(sel.first_of()?, "rtrim")?.trim_end().to_string()))),
    );
    table.register(
        "trim",
        handle(|sel, _| scalar(Value::String(require_string(sel.first_of()?, "trim")?.trim().to_string()))),
    );

    table.register(
        "startswith",
        handle(|sel, args| {
            let s = require_string(sel.first_of()?, "startswith")?;
            let prefix = args
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| JPathError::function("startswith() requires a string argument"))?;
            scalar(Value::Bool(s.starts_with(prefix)))
        }),
    );
    table.register(
        "endswith",
        handle(|sel, args| {
            let s = require_string(sel.first_of()?, "endswith")?;
            let suffix = args
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| JPathError::function("endswith() requires a string argument"))?;
            scalar(Value::Bool(s.ends_with(suffix)))
        }),
    );
    table.register(
        "instr",
        handle(|sel, args| {
            let s = require_string(sel.first_of()?, "instr")?;
            let needle = args
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| JPathError::function("instr() requires a string argument"))?;
            let pos = s
                .find(needle)
                .map(|byte_idx| s[..byte_idx].chars().count() as i64)
                .unwrap_or(-1);
            scalar(Value::Int(pos))
        }),
    );
    table.register(
        "normalize",
        handle(|sel, _| {
            let s = require_string(sel.first_of()?, "normalize")?;
            scalar(Value::String(WHITESPACE_RUN.replace_all(s.trim(), " ").into_owned()))
        }),
    );

    // ---- selection-level ----------------------------------------------------

    table.register("count", handle(|sel, _| scalar(Value::Int(sel.len() as i64))));
    table.register(
        "all",
        handle(|sel, _| scalar(Value::Bool(sel.items().iter().all(Value::is_truthy)))),
    );
    table.register(
        "any",
        handle(|sel, _| scalar(Value::Bool(sel.items().iter().any(Value::is_truthy)))),
    );
    table.register("has", handle(|sel, _| scalar(Value::Bool(!sel.is_empty()))));
    table.register("no", handle(|sel, _| scalar(Value::Bool(sel.is_empty()))));
    table.register(
        "inval",
        handle(|sel, args| {
            let needle = args
                .first()
                .ok_or_else(|| JPathError::function("inval() requires a value argument"))?;
            scalar(Value::Bool(contains(sel.first_of()?, needle)))
        }),
    );
    table.register(
        "initems",
        handle(|sel, args| {
            let needle = args
                .first()
                .ok_or_else(|| JPathError::function("initems() requires a value argument"))?;
            scalar(Value::Bool(sel.items().iter().any(|v| v == needle)))
        }),
    );
    table.register(
        "concat",
        handle(|sel, args| Ok(Outcome::Selection(sel.union(&Selection::new(args.to_vec()))))),
    );
}

fn normalize(i: i64, len: i64) -> Option<usize> {
    let idx = if i < 0 { i + len } else { i };
    if idx >= 0 && idx < len {
        Some(idx as usize)
    } else {
        None
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(a) => a.iter().any(|v| v == needle),
        Value::Object(o) => needle.as_str().map_or(false, |k| o.contains_key(k)),
        Value::String(s) => needle.as_str().map_or(false, |n| s.contains(n)),
        _ => false,
    }
}

/// Word-boundary title casing: first letter of each alphabetic run is
/// upper-cased, the rest lower-cased, matching Python's `str.title()` for
/// the common ASCII case this crate's string functions target.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}
