//! Template syntax tree. Built once by the parser, never mutated.

use std::fmt;

use serde_json::Value;

/// A dotted path into the rendering context. Numeric segments index arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariablePath(pub Vec<String>);

impl VariablePath {
    /// Resolves the path, returning `None` if any segment is absent.
    #[must_use]
    pub fn resolve<'a>(&self, context: &'a Value) -> Option<&'a Value> {
        self.0.iter().try_fold(context, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }
}

impl fmt::Display for VariablePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

/// A value-producing expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    VariablePath(VariablePath),
    /// `input | name(args…)`. The filter name was checked against the
    /// filter table when the template was compiled.
    FilterCall {
        input: Box<Expr>,
        name: String,
        args: Vec<Value>,
    },
}

impl Expr {
    /// The path this expression ultimately reads, if any.
    #[must_use]
    pub fn source_path(&self) -> Option<&VariablePath> {
        match self {
            Self::Literal(_) => None,
            Self::VariablePath(path) => Some(path),
            Self::FilterCall { input, .. } => input.source_path(),
        }
    }
}

/// Boolean expression of an `if`/`elif` tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Truthy(Expr),
    Eq(Expr, Expr),
    Ne(Expr, Expr),
    Not(Box<Condition>),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
}

/// `{% if %}…{% elif %}…{% else %}…{% endif %}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Conditional {
    pub branches: Vec<(Condition, Vec<Node>)>,
    pub otherwise: Vec<Node>,
}

/// One piece of a template.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Text emitted as-is.
    Literal(String),
    /// `{{ expr }}`.
    Placeholder(Expr),
    Conditional(Conditional),
}
