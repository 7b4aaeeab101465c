//! Compiled templates and rendering.

use serde_json::Value;

use formledger_core::error::LedgerError;

use crate::ast::{Condition, Expr, Node};
use crate::filters::{FILTERS, to_text};
use crate::parser::parse;

/// A parsed, validated template. Compile once, render many times.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    nodes: Vec<Node>,
}

impl Template {
    /// Compiles `source`.
    ///
    /// # Errors
    ///
    /// `Configuration` on a syntax error, an unknown filter or a filter
    /// called with the wrong number of arguments.
    pub fn compile(source: &str) -> Result<Self, LedgerError> {
        Ok(Self {
            source: source.to_owned(),
            nodes: parse(source)?,
        })
    }

    /// The text the template was compiled from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Renders against `context`. A template made of a single placeholder
    /// yields that expression's value with its JSON type intact; anything
    /// else yields a string.
    ///
    /// # Errors
    ///
    /// `UndefinedVariable` when a path is absent and nothing supplies a
    /// default; `Configuration` when a filter rejects its input.
    pub fn render(&self, context: &Value) -> Result<Value, LedgerError> {
        if let [Node::Placeholder(expr)] = self.nodes.as_slice() {
            return defined(expr, eval(expr, context)?);
        }
        self.render_to_string(context).map(Value::String)
    }

    /// Renders against `context`, always producing text.
    ///
    /// # Errors
    ///
    /// As [`Template::render`].
    pub fn render_to_string(&self, context: &Value) -> Result<String, LedgerError> {
        let mut out = String::new();
        render_nodes(&self.nodes, context, &mut out)?;
        Ok(out)
    }
}

fn render_nodes(nodes: &[Node], context: &Value, out: &mut String) -> Result<(), LedgerError> {
    for node in nodes {
        match node {
            Node::Literal(text) => out.push_str(text),
            Node::Placeholder(expr) => {
                let value = defined(expr, eval(expr, context)?)?;
                out.push_str(&to_text(&value));
            }
            Node::Conditional(conditional) => {
                let mut chosen = &conditional.otherwise;
                for (condition, body) in &conditional.branches {
                    if test(condition, context)? {
                        chosen = body;
                        break;
                    }
                }
                render_nodes(chosen, context, out)?;
            }
        }
    }
    Ok(())
}

fn undefined(expr: &Expr) -> LedgerError {
    LedgerError::UndefinedVariable(
        expr.source_path()
            .map_or_else(|| "<expression>".to_owned(), ToString::to_string),
    )
}

fn defined(expr: &Expr, value: Option<Value>) -> Result<Value, LedgerError> {
    value.ok_or_else(|| undefined(expr))
}

/// Evaluates an expression. `None` means the value is undefined, which is
/// distinct from JSON `null`.
fn eval(expr: &Expr, context: &Value) -> Result<Option<Value>, LedgerError> {
    match expr {
        Expr::Literal(value) => Ok(Some(value.clone())),
        Expr::VariablePath(path) => Ok(path.resolve(context).cloned()),
        Expr::FilterCall { input, name, args } => {
            let spec = FILTERS
                .get(name.as_str())
                .ok_or_else(|| LedgerError::Configuration(format!("unknown filter '{name}'")))?;
            let value = eval(input, context)?;
            if value.is_none() && !spec.accepts_undefined {
                return Err(undefined(input));
            }
            (spec.apply)(value.as_ref(), args)
                .map(Some)
                .map_err(|reason| LedgerError::Configuration(format!("filter '{name}': {reason}")))
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn same(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

/// Undefined operands compare as `null` and test as false.
fn test(condition: &Condition, context: &Value) -> Result<bool, LedgerError> {
    let value = |expr: &Expr| -> Result<Value, LedgerError> {
        Ok(eval(expr, context)?.unwrap_or(Value::Null))
    };
    Ok(match condition {
        Condition::Truthy(expr) => truthy(&value(expr)?),
        Condition::Eq(left, right) => same(&value(left)?, &value(right)?),
        Condition::Ne(left, right) => !same(&value(left)?, &value(right)?),
        Condition::Not(inner) => !test(inner, context)?,
        Condition::And(left, right) => test(left, context)? && test(right, context)?,
        Condition::Or(left, right) => test(left, context)? || test(right, context)?,
    })
}
