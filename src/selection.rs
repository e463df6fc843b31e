use crate::ast::IndexSpec;
use crate::error::JPathError;
use crate::value::{Value, ValueKind};
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

/// What evaluating an `Ast` node yields: either a scalar `Value` (a
/// literal, an arithmetic result, a function's scalar return) or a
/// `Selection` (a path navigation result). §4.5/§4.6 of the query model.
#[derive(Debug, Clone)]
pub enum Outcome {
    Value(Value),
    Selection(Selection),
}

impl Outcome {
    /// Coerces to a single scalar `Value`, per the same coercion rule
    /// arithmetic/comparison operands use: a bare `Value` passes through,
    /// a `Selection` contributes its first item (erroring if empty).
    pub fn into_value(self) -> Result<Value, JPathError> {
        match self {
            Outcome::Value(v) => Ok(v),
            Outcome::Selection(s) => s.first_of().cloned(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Outcome::Value(v) => v.is_truthy(),
            Outcome::Selection(s) => s.is_truthy(),
        }
    }
}

/// A registered function's implementation: receives the call's first
/// argument as the "self" Selection (the receiver navigated so far) and
/// every remaining argument pre-coerced to a scalar `Value`.
pub type FunctionHandle =
    Arc<dyn Fn(&Selection, &[Value]) -> Result<Outcome, JPathError> + Send + Sync>;

/// The five metadata knobs of §3: which variant tags are treated as
/// key-iterable (object-style `.key` descent) vs index-iterable
/// (`[i]`/slice descent), and which are explicitly excluded from each.
///
/// Default-constructs to "key-descent operates on Objects only;
/// index-descent operates on Arrays only; Strings are atomic."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionConfig {
    pub iters_by_key: HashSet<ValueKind>,
    pub excluded_by_key: HashSet<ValueKind>,
    pub iters_by_idx: HashSet<ValueKind>,
    pub excluded_by_idx: HashSet<ValueKind>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        SelectionConfig {
            iters_by_key: [ValueKind::Object].into_iter().collect(),
            excluded_by_key: HashSet::new(),
            iters_by_idx: [ValueKind::Array, ValueKind::Object, ValueKind::String]
                .into_iter()
                .collect(),
            excluded_by_idx: [ValueKind::Object, ValueKind::String].into_iter().collect(),
        }
    }
}

/// Builder for a non-default `SelectionConfig`, per §6's "expose a builder
/// for custom type sets."
#[derive(Debug, Clone, Default)]
pub struct SelectionConfigBuilder {
    config: SelectionConfig,
}

impl SelectionConfigBuilder {
    pub fn new() -> Self {
        SelectionConfigBuilder {
            config: SelectionConfig::default(),
        }
    }

    pub fn iters_by_key(mut self, kinds: impl IntoIterator<Item = ValueKind>) -> Self {
        self.config.iters_by_key = kinds.into_iter().collect();
        self
    }

    pub fn excluded_by_key(mut self, kinds: impl IntoIterator<Item = ValueKind>) -> Self {
        self.config.excluded_by_key = kinds.into_iter().collect();
        self
    }

    pub fn iters_by_idx(mut self, kinds: impl IntoIterator<Item = ValueKind>) -> Self {
        self.config.iters_by_idx = kinds.into_iter().collect();
        self
    }

    pub fn excluded_by_idx(mut self, kinds: impl IntoIterator<Item = ValueKind>) -> Self {
        self.config.excluded_by_idx = kinds.into_iter().collect();
        self
    }

    pub fn build(self) -> SelectionConfig {
        self.config
    }
}

/// An ordered multiset of values produced by navigating a JPath query,
/// carrying a reference to the query's root scope and the type-iteration
/// configuration every operator consults.
///
/// `root` is an `Rc` so that root stickiness (§8 property 3) can be checked
/// by pointer identity (`Rc::ptr_eq`) rather than by deep value comparison.
#[derive(Debug, Clone)]
pub struct Selection {
    items: Vec<Value>,
    root: Rc<Vec<Value>>,
    config: Rc<SelectionConfig>,
}

impl Selection {
    /// Builds a fresh, self-rooted Selection with the default config —
    /// the entry point `query(...)` uses to wrap the input document.
    pub fn new(items: Vec<Value>) -> Self {
        Selection::with_config(items, SelectionConfig::default())
    }

    pub fn with_config(items: Vec<Value>, config: SelectionConfig) -> Self {
        let root = Rc::new(items.clone());
        Selection {
            items,
            root,
            config: Rc::new(config),
        }
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// A Selection truthy iff non-empty, per §4.5.
    pub fn is_truthy(&self) -> bool {
        !self.is_empty()
    }

    /// First item's value, used everywhere an operand must be coerced from
    /// a Selection to a scalar (§4.5, §4.6). A runtime error on empty
    /// selections, per the Open Question resolved in SPEC_FULL §4.5.
    pub fn first_of(&self) -> Result<&Value, JPathError> {
        self.items
            .first()
            .ok_or_else(|| JPathError::runtime("empty selection in arithmetic"))
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    /// The notation used by §8's scenarios: `(a, b, c)`.
    pub fn tuple(&self) -> Vec<Value> {
        self.items.clone()
    }

    /// Builds a new Selection carrying `items` but sharing this Selection's
    /// root and config — the public door onto `derive`, used by the
    /// evaluator to wrap a bare scalar `Value` as a singleton Selection
    /// without losing root stickiness.
    pub fn with_items(&self, items: Vec<Value>) -> Selection {
        self.derive(items)
    }

    /// Reseats `root` to a fresh copy of `self` — the one sanctioned way to
    /// rewrite the sticky root pointer (§3 Lifecycle).
    pub fn setroot(self) -> Selection {
        let root = Rc::new(self.items.clone());
        Selection {
            items: self.items,
            root,
            config: self.config,
        }
    }

    /// A Selection view of this query's root scope, sharing the same `Rc`
    /// identity as every other root view derived within the query (§8
    /// property 3).
    pub fn root_selection(&self) -> Selection {
        Selection {
            items: (*self.root).clone(),
            root: self.root.clone(),
            config: self.config.clone(),
        }
    }

    /// True iff `self` and `other` were derived from the same root scope.
    pub fn shares_root_with(&self, other: &Selection) -> bool {
        Rc::ptr_eq(&self.root, &other.root)
    }

    fn derive(&self, items: Vec<Value>) -> Selection {
        Selection {
            items,
            root: self.root.clone(),
            config: self.config.clone(),
        }
    }

    fn is_key_iterable(&self, v: &Value) -> bool {
        let kind = v.kind();
        self.config.iters_by_key.contains(&kind) && !self.config.excluded_by_key.contains(&kind)
    }

    fn is_idx_iterable(&self, v: &Value) -> bool {
        let kind = v.kind();
        self.config.iters_by_idx.contains(&kind) && !self.config.excluded_by_idx.contains(&kind)
    }

    /// The elements a Value offers up to `el`/`i`/`exp`, under the current
    /// index-iterable configuration (Array elements, Object values in
    /// insertion order, or a String's Unicode scalar values).
    fn indexable_elements(&self, v: &Value) -> Option<Vec<Value>> {
        if !self.is_idx_iterable(v) {
            return None;
        }
        match v {
            Value::Array(arr) => Some(arr.clone()),
            Value::Object(obj) => Some(obj.values().cloned().collect()),
            Value::String(s) => Some(s.chars().map(|c| Value::String(c.to_string())).collect()),
            _ => None,
        }
    }

    /// Unconditionally tunnels through nested Arrays (§4.2: "If v is
    /// instead index-iterable (Array), recurse into each element in
    /// order" — this is independent of the `deep` flag, unlike descent into
    /// an Object's own nested values) until reaching either a key-iterable
    /// Object or a non-container leaf, appending each such stopping point
    /// to `out` in depth-first order.
    fn tunnel_arrays(&self, v: &Value, out: &mut Vec<Value>) {
        if !self.is_key_iterable(v) {
            if let Value::Array(arr) = v {
                if self.is_idx_iterable(v) {
                    for elem in arr {
                        self.tunnel_arrays(elem, out);
                    }
                    return;
                }
            }
        }
        out.push(v.clone());
    }

    /// `one(key, deep)` — §4.2. A level-order (breadth-first) traversal:
    /// each level's key-iterable items are checked for `key` before any of
    /// them is descended into, which is what makes a nested match at depth
    /// N sort after a sibling match at depth N-1 rather than before it.
    pub fn one(&self, key: &str, deep: bool) -> Selection {
        let mut results = Vec::new();
        let mut level = Vec::new();
        for v in &self.items {
            self.tunnel_arrays(v, &mut level);
        }
        loop {
            let mut next_level = Vec::new();
            for v in &level {
                if let Value::Object(obj) = v {
                    if self.is_key_iterable(v) {
                        if let Some(found) = obj.get(key) {
                            results.push(found.clone());
                        }
                        if deep {
                            for child in obj.values() {
                                self.tunnel_arrays(child, &mut next_level);
                            }
                        }
                    }
                }
            }
            if !deep || next_level.is_empty() {
                break;
            }
            level = next_level;
        }
        self.derive(results)
    }

    /// `all(deep)` — §4.2. Same level-order shape as `one`, but gathers
    /// every value of every key-iterable item rather than filtering by key.
    pub fn all(&self, deep: bool) -> Selection {
        let mut results = Vec::new();
        let mut level = Vec::new();
        for v in &self.items {
            self.tunnel_arrays(v, &mut level);
        }
        loop {
            let mut next_level = Vec::new();
            for v in &level {
                if let Value::Object(obj) = v {
                    if self.is_key_iterable(v) {
                        for child in obj.values() {
                            results.push(child.clone());
                            next_level.push(child.clone());
                        }
                    }
                }
            }
            if !deep || next_level.is_empty() {
                break;
            }
            let mut tunneled = Vec::new();
            for v in &next_level {
                self.tunnel_arrays(v, &mut tunneled);
            }
            level = tunneled;
        }
        self.derive(results)
    }

    /// `el(indices)` — §4.2. Drills into each item's own elements.
    pub fn el(&self, spec: &IndexSpec) -> Selection {
        let mut out = Vec::new();
        for v in &self.items {
            if let Some(elements) = self.indexable_elements(v) {
                pick_indices(&elements, spec, &mut out);
            }
        }
        self.derive(out)
    }

    /// `i(indices)` — §4.2. Drills into the Selection's own flat item list.
    pub fn i(&self, spec: &IndexSpec) -> Selection {
        let mut out = Vec::new();
        pick_indices(&self.items, spec, &mut out);
        self.derive(out)
    }

    /// `exp()` — §4.2. Flattens one level.
    pub fn exp(&self) -> Selection {
        let mut out = Vec::new();
        for v in &self.items {
            match self.indexable_elements(v) {
                Some(elements) => out.extend(elements),
                None => out.push(v.clone()),
            }
        }
        self.derive(out)
    }

    /// `filter(pred)` — §4.2. Predicate errors are swallowed: an item is
    /// kept only if the predicate both succeeds and returns true.
    pub fn filter<F>(&self, mut pred: F) -> Selection
    where
        F: FnMut(usize, &Selection, &Selection) -> Result<bool, JPathError>,
    {
        let root = self.root_selection();
        let mut out = Vec::new();
        for (idx, v) in self.items.iter().enumerate() {
            let single = self.derive(vec![v.clone()]);
            if pred(idx, &single, &root).unwrap_or(false) {
                out.push(v.clone());
            }
        }
        self.derive(out)
    }

    /// Concatenation of item sequences; metadata inherited from `self`
    /// (the left operand), per §4.2's `union (+)`.
    pub fn union(&self, other: &Selection) -> Selection {
        let mut items = self.items.clone();
        items.extend(other.items.iter().cloned());
        self.derive(items)
    }

    /// Invokes a function once with `self` as the whole receiver Selection.
    pub fn call_for_self(&self, handle: &FunctionHandle, args: &[Value]) -> Result<Outcome, JPathError> {
        handle(self, args)
    }

    /// Invokes a function once per item, each wrapped in its own singleton
    /// Selection; a per-item error drops that item rather than aborting
    /// the whole call, matching `filter`'s error-swallowing contract.
    pub fn call_for_each(&self, handle: &FunctionHandle, args: &[Value]) -> Selection {
        let mut out = Vec::new();
        for v in &self.items {
            let single = self.derive(vec![v.clone()]);
            if let Ok(outcome) = handle(&single, args) {
                match outcome {
                    Outcome::Value(val) => out.push(val),
                    Outcome::Selection(sel) => out.extend(sel.items),
                }
            }
        }
        self.derive(out)
    }
}

/// Resolves an `IndexSpec` against a container of length `container.len()`,
/// silently dropping out-of-range integer picks (§4.2 "index safety").
fn pick_indices(container: &[Value], spec: &IndexSpec, out: &mut Vec<Value>) {
    let len = container.len() as i64;
    match spec {
        IndexSpec::Int(i) => {
            if let Some(idx) = normalize_index(*i, len) {
                out.push(container[idx].clone());
            }
        }
        IndexSpec::List(list) => {
            for i in list {
                if let Some(idx) = normalize_index(*i, len) {
                    out.push(container[idx].clone());
                }
            }
        }
        IndexSpec::Slice { start, stop, step } => {
            for idx in resolve_slice(len, *start, *stop, *step) {
                out.push(container[idx].clone());
            }
        }
    }
}

fn normalize_index(i: i64, len: i64) -> Option<usize> {
    let idx = if i < 0 { i + len } else { i };
    if idx >= 0 && idx < len {
        Some(idx as usize)
    } else {
        None
    }
}

/// Python-style slice resolution: negative `start`/`stop` count from the
/// end, `step` may be negative to walk backwards, and an out-of-range
/// `start`/`stop` clamps rather than errors.
pub(crate) fn resolve_slice(len: i64, start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> Vec<usize> {
    let step = step.unwrap_or(1);
    if step == 0 || len == 0 {
        return Vec::new();
    }

    let clamp_forward = |v: i64| -> i64 {
        let v = if v < 0 { v + len } else { v };
        v.max(0).min(len)
    };
    let clamp_backward = |v: i64| -> i64 {
        let v = if v < 0 { v + len } else { v };
        v.max(-1).min(len - 1)
    };

    let (start_idx, stop_idx) = if step > 0 {
        (
            start.map(clamp_forward).unwrap_or(0),
            stop.map(clamp_forward).unwrap_or(len),
        )
    } else {
        (
            start.map(clamp_backward).unwrap_or(len - 1),
            stop.map(clamp_backward).unwrap_or(-1),
        )
    };

    let mut out = Vec::new();
    let mut i = start_idx;
    if step > 0 {
        while i < stop_idx {
            out.push(i as usize);
            i += step;
        }
    } else {
        while i > stop_idx {
            out.push(i as usize);
            i += step;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Object;
    use pretty_assertions::assert_eq;

    fn obj(pairs: Vec<(&str, Value)>) -> Value {
        let mut o = Object::new();
        for (k, v) in pairs {
            o.insert(k, v);
        }
        Value::Object(o)
    }

    #[test]
    fn root_stickiness_across_derivation() {
        let root_val = obj(vec![("a", Value::Int(1))]);
        let sel = Selection::new(vec![root_val]);
        let derived = sel.one("a", false);
        assert!(derived.shares_root_with(&sel));
        assert!(derived.root_selection().shares_root_with(&sel));
    }

    #[test]
    fn setroot_rebinds_identity() {
        let sel = Selection::new(vec![Value::Int(1), Value::Int(2)]);
        let narrowed = sel.i(&IndexSpec::Int(0));
        assert!(narrowed.shares_root_with(&sel));
        let reseated = narrowed.clone().setroot();
        assert!(!reseated.shares_root_with(&sel));
    }

    #[test]
    fn one_deep_descent_matches_books_scenario() {
        let books: Vec<Value> = ["Nigel Rees", "Evelyn Waugh", "Herman Melville", "J. R. R. Tolkien"]
            .iter()
            .map(|a| obj(vec![("author", Value::String(a.to_string()))]))
            .collect();
        let root = obj(vec![("books", Value::Array(books))]);
        let sel = Selection::new(vec![root]);
        let result = sel.one("author", true);
        assert_eq!(
            result.tuple(),
            vec![
                Value::String("Nigel Rees".into()),
                Value::String("Evelyn Waugh".into()),
                Value::String("Herman Melville".into()),
                Value::String("J. R. R. Tolkien".into()),
            ]
        );
    }

    #[test]
    fn one_shallow_vs_deep() {
        let root = obj(vec![("a", obj(vec![("a", Value::Int(1))])), ("b", Value::Int(2))]);
        let sel = Selection::new(vec![root]);
        assert_eq!(sel.one("a", false).tuple(), vec![obj(vec![("a", Value::Int(1))])]);
        assert_eq!(
            sel.one("a", true).tuple(),
            vec![obj(vec![("a", Value::Int(1))]), Value::Int(1)]
        );
    }

    #[test]
    fn all_shallow_vs_deep_level_order() {
        let root = obj(vec![("a", obj(vec![("a", Value::Int(1))])), ("b", Value::Int(2))]);
        let sel = Selection::new(vec![root]);
        assert_eq!(
            sel.all(false).tuple(),
            vec![obj(vec![("a", Value::Int(1))]), Value::Int(2)]
        );
        assert_eq!(
            sel.all(true).tuple(),
            vec![obj(vec![("a", Value::Int(1))]), Value::Int(2), Value::Int(1)]
        );
    }

    #[test]
    fn el_slice_and_list_and_out_of_range() {
        let sel = Selection::new(vec![Value::Array(vec![
            Value::Int(1),
            Value::Int(2),
            Value::Int(3),
        ])]);
        assert_eq!(
            sel.el(&IndexSpec::Int(1)).tuple(),
            vec![Value::Int(2)]
        );
        assert_eq!(
            sel.el(&IndexSpec::Slice {
                start: Some(1),
                stop: None,
                step: None
            })
            .tuple(),
            vec![Value::Int(2), Value::Int(3)]
        );
        assert_eq!(
            sel.el(&IndexSpec::List(vec![3, -1, 2, 1, 0])).tuple(),
            vec![Value::Int(3), Value::Int(3), Value::Int(2), Value::Int(1)]
        );
        assert_eq!(sel.el(&IndexSpec::Int(100)).tuple(), Vec::<Value>::new());
    }

    #[test]
    fn exp_does_not_split_strings_or_objects() {
        let sel = Selection::new(vec![
            Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
            obj(vec![("d", Value::Bool(false))]),
            Value::String("abc".into()),
        ]);
        assert_eq!(
            sel.exp().tuple(),
            vec![
                Value::Int(1),
                Value::Int(2),
                Value::Int(3),
                obj(vec![("d", Value::Bool(false))]),
                Value::String("abc".into()),
            ]
        );
    }

    #[test]
    fn union_concatenates_in_order() {
        let a = Selection::new(vec![Value::Int(1)]);
        let b = Selection::new(vec![Value::Int(2)]);
        assert_eq!(a.union(&b).tuple(), vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(b.union(&a).tuple(), vec![Value::Int(2), Value::Int(1)]);
    }
}
