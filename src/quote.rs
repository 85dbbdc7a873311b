//! Shell quoting and the typed command-template interpolation grammar.
//!
//! A [`Template`] is built from alternating literal fragments and typed
//! values via the [`cmd!`] macro. Lowering a template to a shell string
//! quotes every interpolated value with POSIX-safe quoting (via
//! `shell-escape`) unless the value opts out with [`Raw`]. Deferred
//! (awaitable) values are supported via [`Template::value_async`]/
//! [`Template::try_value_async`] rather than through [`Interpolate`] itself,
//! since awaiting requires an `async fn` and `Interpolate::interpolate` is
//! called from plain (non-async) builder chains.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::error::{ExecError, ExecResult};

/// A fragment produced by interpolating one value into a template.
#[derive(Debug, Clone)]
pub enum Fragment {
    /// Quoted per the target shell's quoting rules.
    Quoted(String),
    /// Inserted verbatim, no quoting applied.
    Raw(String),
    /// A sequence of independently-rendered fragments, one per element of a
    /// `Vec`/slice value: each element keeps its own quoting and becomes
    /// exactly one argv token when lowered, joined by single spaces when
    /// rendered as a shell string (spec rule 4). An empty sequence
    /// contributes nothing, not even whitespace.
    Sequence(Vec<Fragment>),
}

impl Fragment {
    fn render(&self) -> Cow<'_, str> {
        match self {
            Self::Quoted(s) => shell_escape::escape(Cow::Borrowed(s.as_str())),
            Self::Raw(s) => Cow::Borrowed(s.as_str()),
            Self::Sequence(parts) => Cow::Owned(
                parts
                    .iter()
                    .map(|p| p.render().into_owned())
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
        }
    }
}

/// Wrapper that opts a value out of quoting when interpolated into a
/// template (spec rule: explicit raw-fragment escape hatch).
#[derive(Debug, Clone)]
pub struct Raw(pub String);

/// Wrapper that forces canonical-JSON rendering of a serializable value
/// (maps/sequences render as compact, key-sorted JSON rather than
/// `Debug`-style output).
#[derive(Debug, Clone)]
pub struct Json<T>(pub T);

/// Implemented by every type that can appear as an interpolated value in a
/// [`Template`].
pub trait Interpolate {
    /// Produce the fragment this value lowers to.
    fn interpolate(&self) -> Fragment;
}

impl Interpolate for str {
    fn interpolate(&self) -> Fragment {
        Fragment::Quoted(self.to_string())
    }
}

impl Interpolate for String {
    fn interpolate(&self) -> Fragment {
        Fragment::Quoted(self.clone())
    }
}

impl Interpolate for Raw {
    fn interpolate(&self) -> Fragment {
        Fragment::Raw(self.0.clone())
    }
}

macro_rules! impl_interpolate_display {
    ($($t:ty),*) => {
        $(
            impl Interpolate for $t {
                fn interpolate(&self) -> Fragment {
                    Fragment::Quoted(self.to_string())
                }
            }
        )*
    };
}

impl_interpolate_display!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, bool);

impl<T: Interpolate> Interpolate for Option<T> {
    fn interpolate(&self) -> Fragment {
        match self {
            Some(v) => v.interpolate(),
            None => Fragment::Quoted(String::new()),
        }
    }
}

impl<T: Interpolate> Interpolate for Vec<T> {
    fn interpolate(&self) -> Fragment {
        Fragment::Sequence(self.iter().map(Interpolate::interpolate).collect())
    }
}

/// A boxed, owned future yielding a value to interpolate once resolved.
/// Used by [`Template::value_async`]/[`Template::try_value_async`] to await
/// a deferred input before it takes its place in the template.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The resolved output of a deferred (awaitable) interpolated value: every
/// shape an ordinary [`Interpolate`] value can take, available once the
/// producing future has completed.
#[derive(Debug, Clone)]
pub enum Interpolated {
    /// A quoted string value.
    String(String),
    /// A quoted numeric value.
    Number(f64),
    /// A quoted boolean value.
    Bool(bool),
    /// Renders as an empty quoted value, same as `Option::None`.
    Null,
    /// An ordered sequence, each element independently quoted and emitted
    /// as its own argv token.
    Sequence(Vec<Interpolated>),
    /// Structured data, rendered as canonical (key-sorted) JSON.
    Json(Value),
}

impl Interpolate for Interpolated {
    fn interpolate(&self) -> Fragment {
        match self {
            Self::String(s) => Fragment::Quoted(s.clone()),
            Self::Number(n) => Fragment::Quoted(n.to_string()),
            Self::Bool(b) => Fragment::Quoted(b.to_string()),
            Self::Null => Fragment::Quoted(String::new()),
            Self::Sequence(items) => {
                Fragment::Sequence(items.iter().map(Interpolate::interpolate).collect())
            }
            Self::Json(v) => Fragment::Quoted(canonical_json(v).unwrap_or_else(|_| "null".to_string())),
        }
    }
}

impl<T: serde::Serialize> Interpolate for Json<T> {
    fn interpolate(&self) -> Fragment {
        match canonical_json(&self.0) {
            Ok(s) => Fragment::Quoted(s),
            Err(_) => Fragment::Quoted("null".to_string()),
        }
    }
}

/// Serialize `value` to canonical JSON: object keys sorted, no insertion
/// order leakage, and never the `[object Object]`-style degenerate output
/// that naive string coercion of a map would produce.
pub fn canonical_json<T: serde::Serialize>(value: &T) -> ExecResult<String> {
    let v = serde_json::to_value(value).map_err(|e| ExecError::serialization(e.to_string()))?;
    let canonical = canonicalize(&v);
    serde_json::to_string(&canonical).map_err(|e| ExecError::serialization(e.to_string()))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// A rendered command template: literal fragments interleaved with
/// interpolated values, ready to lower to either a shell string or an argv
/// vector.
#[derive(Debug, Clone, Default)]
pub struct Template {
    parts: Vec<TemplatePart>,
}

#[derive(Debug, Clone)]
enum TemplatePart {
    Literal(String),
    Value(Fragment),
}

impl Template {
    /// Start an empty template.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a literal fragment (already-trusted text, e.g. the static
    /// parts of a `cmd!` invocation).
    #[must_use]
    pub fn literal(mut self, text: impl Into<String>) -> Self {
        self.parts.push(TemplatePart::Literal(text.into()));
        self
    }

    /// Append an interpolated value.
    #[must_use]
    pub fn value(mut self, value: impl Interpolate) -> Self {
        self.parts.push(TemplatePart::Value(value.interpolate()));
        self
    }

    /// Append a deferred value: await `fut` and interpolate what it
    /// resolves to, preserving its position in the template relative to
    /// fragments appended before and after this call.
    pub async fn value_async<F>(mut self, fut: F) -> Self
    where
        F: Future<Output = Interpolated> + Send,
    {
        let resolved = fut.await;
        self.parts.push(TemplatePart::Value(resolved.interpolate()));
        self
    }

    /// Like [`Template::value_async`], but for a deferred value that can
    /// itself fail to produce a value (propagated as-is, not wrapped,
    /// since the caller already controls the error kind).
    pub async fn try_value_async<F>(mut self, fut: F) -> ExecResult<Self>
    where
        F: Future<Output = ExecResult<Interpolated>> + Send,
    {
        let resolved = fut.await?;
        self.parts.push(TemplatePart::Value(resolved.interpolate()));
        Ok(self)
    }

    /// Render the template as a single shell-quoted string, suitable for
    /// passing to `sh -c` / `cmd /c`.
    pub fn to_shell_string(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                TemplatePart::Literal(s) => out.push_str(s),
                TemplatePart::Value(f) => out.push_str(&f.render()),
            }
        }
        out
    }

    /// Split the rendered template into argv on ASCII whitespace, honoring
    /// quoting boundaries produced by [`Fragment::Quoted`] (each quoted
    /// value becomes exactly one argv element regardless of embedded
    /// whitespace; literal and raw fragments split normally) and by
    /// [`Fragment::Sequence`] (each element becomes its own argv element,
    /// never merged with its neighbours even if it contains whitespace).
    pub fn to_argv(&self) -> Vec<String> {
        let mut argv = Vec::new();
        let mut current = String::new();
        for part in &self.parts {
            match part {
                TemplatePart::Literal(s) => {
                    for (i, word) in s.split_whitespace().enumerate() {
                        if i > 0 {
                            flush(&mut argv, &mut current);
                        }
                        current.push_str(word);
                    }
                    if s.ends_with(char::is_whitespace) {
                        flush(&mut argv, &mut current);
                    }
                }
                TemplatePart::Value(fragment) => {
                    push_fragment_argv(fragment, &mut argv, &mut current);
                }
            }
        }
        flush(&mut argv, &mut current);
        argv
    }
}

fn flush(argv: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        argv.push(std::mem::take(current));
    }
}

/// Push one rendered [`Fragment`] into the in-progress argv, flushing
/// around [`Fragment::Sequence`] boundaries so every element becomes its
/// own argv token even when it contains whitespace.
fn push_fragment_argv(fragment: &Fragment, argv: &mut Vec<String>, current: &mut String) {
    match fragment {
        Fragment::Quoted(s) => {
            current.push_str(s);
            flush(argv, current);
        }
        Fragment::Raw(s) => {
            for (i, word) in s.split_whitespace().enumerate() {
                if i > 0 {
                    flush(argv, current);
                }
                current.push_str(word);
            }
        }
        Fragment::Sequence(parts) => {
            flush(argv, current);
            for part in parts {
                push_fragment_argv(part, argv, current);
                flush(argv, current);
            }
        }
    }
}

/// Build a [`Template`] from alternating literal and interpolated-value
/// tokens, e.g. `cmd!("echo ", name, " > ", path)`: the first (and every
/// other odd-positioned) token is trusted literal text, the tokens between
/// them are interpolated and quoted per [`Interpolate`].
#[macro_export]
macro_rules! cmd {
    ($first:expr $(, $rest:expr)* $(,)?) => {{
        let t = $crate::quote::Template::new().literal($first);
        $crate::cmd!(@value t; $($rest),*)
    }};
    () => {{
        $crate::quote::Template::new()
    }};
    (@value $t:ident; ) => { $t };
    (@value $t:ident; $val:expr $(, $rest:expr)*) => {{
        let t = $t.value($val);
        $crate::cmd!(@literal t; $($rest),*)
    }};
    (@literal $t:ident; ) => { $t };
    (@literal $t:ident; $lit:expr $(, $rest:expr)*) => {{
        let t = $t.literal($lit);
        $crate::cmd!(@value t; $($rest),*)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_strings_with_spaces() {
        let t = Template::new()
            .literal("echo ")
            .value("hello world".to_string());
        assert!(t.to_shell_string().contains("'hello world'"));
    }

    #[test]
    fn raw_fragment_bypasses_quoting() {
        let t = Template::new()
            .literal("ls ")
            .value(Raw("*.txt".to_string()));
        assert_eq!(t.to_shell_string(), "ls *.txt");
    }

    #[test]
    fn numbers_and_bools_render_unquoted_content() {
        let t = Template::new().literal("limit=").value(42u32);
        assert_eq!(t.to_shell_string(), "limit=42");
    }

    #[test]
    fn canonical_json_sorts_keys() {
        let mut map = BTreeMap::new();
        map.insert("b", 2);
        map.insert("a", 1);
        let rendered = canonical_json(&map).unwrap();
        assert_eq!(rendered, r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn json_wrapper_never_renders_object_object() {
        let t = Template::new()
            .literal("--data=")
            .value(Json(serde_json::json!({"b": 1, "a": 2})));
        let rendered = t.to_shell_string();
        assert!(!rendered.contains("object Object"));
        assert!(rendered.contains(r#""a":2"#));
    }

    #[test]
    fn cmd_macro_alternates_literal_and_value_positions() {
        let t = cmd!("echo ", "it's ok", " done");
        assert_eq!(t.to_shell_string(), "echo 'it'\\''s ok' done");
    }

    #[test]
    fn cmd_macro_quotes_interpolated_numbers_unquoted() {
        let t = cmd!("limit=", 42u32);
        assert_eq!(t.to_shell_string(), "limit=42");
    }

    #[test]
    fn to_argv_keeps_quoted_values_as_single_elements() {
        let t = Template::new()
            .literal("cp ")
            .value("my file.txt".to_string())
            .literal(" dest");
        let argv = t.to_argv();
        assert!(argv.iter().any(|a| a.contains("my file.txt")));
    }

    #[test]
    fn vec_interpolates_each_element_as_its_own_argv_token() {
        let t = Template::new().literal("cp ").value(vec![
            "my file.txt".to_string(),
            "other file.txt".to_string(),
        ]);
        let argv = t.to_argv();
        assert_eq!(
            argv,
            vec![
                "cp".to_string(),
                "my file.txt".to_string(),
                "other file.txt".to_string()
            ]
        );
    }

    #[test]
    fn vec_renders_space_joined_in_shell_string_but_stays_one_token_each() {
        let t = Template::new()
            .value(vec!["a".to_string(), "b c".to_string()]);
        assert_eq!(t.to_shell_string(), "a 'b c'");
    }

    #[tokio::test]
    async fn value_async_awaits_before_interpolating() {
        let t = Template::new()
            .literal("echo ")
            .value_async(async { Interpolated::String("hello world".to_string()) })
            .await;
        assert!(t.to_shell_string().contains("'hello world'"));
    }

    #[tokio::test]
    async fn try_value_async_propagates_the_future_error() {
        let result = Template::new()
            .try_value_async(async {
                Err::<Interpolated, _>(ExecError::serialization("bad input"))
            })
            .await;
        assert!(matches!(result, Err(ExecError::Serialization { .. })));
    }

    #[tokio::test]
    async fn try_value_async_interpolates_a_sequence() {
        let t = Template::new()
            .literal("tag ")
            .try_value_async(async {
                Ok(Interpolated::Sequence(vec![
                    Interpolated::String("v1".to_string()),
                    Interpolated::String("v2 beta".to_string()),
                ]))
            })
            .await
            .unwrap();
        assert_eq!(t.to_argv(), vec!["tag", "v1", "v2 beta"]);
    }
}
