//! Template parser.
//!
//! ```text
//! template  := (text | "{{" expr "}}" | if-block)*
//! if-block  := "{%" "if" cond "%}" template
//!              ("{%" "elif" cond "%}" template)*
//!              ("{%" "else" "%}" template)?
//!              "{%" "endif" "%}"
//! expr      := operand ("|" name ("(" json-values ")")?)*
//! operand   := path | json-literal
//! cond      := and ("or" and)*
//! and       := not ("and" not)*
//! not       := "not" not | "(" cond ")" | expr (("==" | "!=") expr)?
//! ```

use serde_json::Value;

use formledger_core::error::LedgerError;

use crate::ast::{Condition, Conditional, Expr, Node, VariablePath};
use crate::filters::FILTERS;

fn syntax(reason: impl std::fmt::Display) -> LedgerError {
    LedgerError::Configuration(format!("template syntax error: {reason}"))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Segment<'a> {
    Text(&'a str),
    Placeholder(&'a str),
    Tag(&'a str),
}

fn segments(source: &str) -> Result<Vec<Segment<'_>>, LedgerError> {
    let mut out = Vec::new();
    let mut rest = source;
    loop {
        let next = [("{{", "}}"), ("{%", "%}")]
            .into_iter()
            .filter_map(|(open, close)| rest.find(open).map(|at| (at, open, close)))
            .min_by_key(|(at, _, _)| *at);
        let Some((at, open, close)) = next else {
            if !rest.is_empty() {
                out.push(Segment::Text(rest));
            }
            return Ok(out);
        };
        if at > 0 {
            out.push(Segment::Text(&rest[..at]));
        }
        let body_start = at + open.len();
        let body_len = rest[body_start..]
            .find(close)
            .ok_or_else(|| syntax(format!("'{open}' is never closed")))?;
        let body = rest[body_start..body_start + body_len].trim();
        out.push(if open == "{{" {
            Segment::Placeholder(body)
        } else {
            Segment::Tag(body)
        });
        rest = &rest[body_start + body_len + close.len()..];
    }
}

enum Tag {
    If(Condition),
    Elif(Condition),
    Else,
    Endif,
}

fn parse_tag(body: &str) -> Result<Tag, LedgerError> {
    let mut cursor = Cursor::new(body);
    let tag = if cursor.keyword("if") {
        Tag::If(cursor.condition()?)
    } else if cursor.keyword("elif") {
        Tag::Elif(cursor.condition()?)
    } else if cursor.keyword("else") {
        Tag::Else
    } else if cursor.keyword("endif") {
        Tag::Endif
    } else {
        return Err(syntax(format!("unknown tag '{{% {body} %}}'")));
    };
    cursor.finish()?;
    Ok(tag)
}

/// Parses template source into nodes, validating every filter name and
/// argument count.
///
/// # Errors
///
/// `Configuration` on malformed syntax, unknown filters or bad arity.
pub fn parse(source: &str) -> Result<Vec<Node>, LedgerError> {
    let segments = segments(source)?;
    let mut pos = 0;
    let (nodes, end) = block(&segments, &mut pos)?;
    match end {
        None => Ok(nodes),
        Some(_) => Err(syntax("'elif', 'else' or 'endif' without 'if'")),
    }
}

/// Parses nodes until a closing tag (returned) or the end of input.
fn block(segments: &[Segment<'_>], pos: &mut usize) -> Result<(Vec<Node>, Option<Tag>), LedgerError> {
    let mut nodes = Vec::new();
    while let Some(segment) = segments.get(*pos) {
        *pos += 1;
        match *segment {
            Segment::Text(text) => nodes.push(Node::Literal(text.to_owned())),
            Segment::Placeholder(body) => {
                let mut cursor = Cursor::new(body);
                let expr = cursor.expr()?;
                cursor.finish()?;
                nodes.push(Node::Placeholder(expr));
            }
            Segment::Tag(body) => match parse_tag(body)? {
                Tag::If(condition) => nodes.push(Node::Conditional(conditional(
                    condition, segments, pos,
                )?)),
                closing => return Ok((nodes, Some(closing))),
            },
        }
    }
    Ok((nodes, None))
}

fn conditional(
    first: Condition,
    segments: &[Segment<'_>],
    pos: &mut usize,
) -> Result<Conditional, LedgerError> {
    let mut branches = Vec::new();
    let mut condition = first;
    loop {
        let (body, end) = block(segments, pos)?;
        branches.push((condition, body));
        match end {
            Some(Tag::Elif(next)) => condition = next,
            Some(Tag::Else) => {
                let (otherwise, end) = block(segments, pos)?;
                return match end {
                    Some(Tag::Endif) => Ok(Conditional {
                        branches,
                        otherwise,
                    }),
                    _ => Err(syntax("'else' must be followed by 'endif'")),
                };
            }
            Some(Tag::Endif) => {
                return Ok(Conditional {
                    branches,
                    otherwise: Vec::new(),
                });
            }
            Some(Tag::If(_)) | None => return Err(syntax("'if' is never closed")),
        }
    }
}

struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl<'a> Cursor<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.rest().chars().next()
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    /// Consumes `word` only when it is not the prefix of a longer name.
    fn keyword(&mut self, word: &str) -> bool {
        self.skip_ws();
        let rest = self.rest();
        let whole = rest.starts_with(word)
            && !rest[word.len()..].starts_with(is_ident_char);
        if whole {
            self.pos += word.len();
        }
        whole
    }

    fn finish(&mut self) -> Result<(), LedgerError> {
        self.skip_ws();
        if self.rest().is_empty() {
            Ok(())
        } else {
            Err(syntax(format!("unexpected '{}' in '{}'", self.rest(), self.src)))
        }
    }

    fn ident(&mut self) -> Option<&'a str> {
        self.skip_ws();
        let rest = self.rest();
        let len = rest.find(|c: char| !is_ident_char(c)).unwrap_or(rest.len());
        if len == 0 {
            return None;
        }
        self.pos += len;
        Some(&rest[..len])
    }

    /// Length of the balanced run starting at the cursor that ends just
    /// before the `close` matching an already consumed opener.
    fn balanced_until(&self, close: char) -> Result<usize, LedgerError> {
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        for (i, c) in self.rest().char_indices() {
            if in_string {
                match c {
                    _ if escaped => escaped = false,
                    '\\' => escaped = true,
                    '"' => in_string = false,
                    _ => {}
                }
                continue;
            }
            match c {
                '"' => in_string = true,
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' if depth > 0 => depth -= 1,
                _ if c == close => return Ok(i),
                _ => {}
            }
        }
        Err(syntax(format!("unbalanced '{close}' in '{}'", self.src)))
    }

    /// Byte length of the quoted string starting at the cursor, quotes
    /// included.
    fn string_len(&self) -> Result<usize, LedgerError> {
        let mut escaped = false;
        for (i, c) in self.rest().char_indices().skip(1) {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => return Ok(i + 1),
                _ => {}
            }
        }
        Err(syntax(format!("unterminated string in '{}'", self.src)))
    }

    fn expr(&mut self) -> Result<Expr, LedgerError> {
        let mut expr = self.operand()?;
        while self.eat("|") {
            let name = self
                .ident()
                .ok_or_else(|| syntax(format!("expected a filter name in '{}'", self.src)))?;
            let args = if self.eat("(") {
                let len = self.balanced_until(')')?;
                let inner = &self.rest()[..len];
                self.pos += len + 1;
                serde_json::from_str::<Vec<Value>>(&format!("[{inner}]"))
                    .map_err(|e| syntax(format!("invalid arguments to '{name}': {e}")))?
            } else {
                Vec::new()
            };

            let spec = FILTERS
                .get(name)
                .ok_or_else(|| LedgerError::Configuration(format!("unknown filter '{name}'")))?;
            if args.len() < spec.min_args || args.len() > spec.max_args {
                return Err(LedgerError::Configuration(format!(
                    "filter '{name}' takes {}..={} arguments, got {}",
                    spec.min_args,
                    spec.max_args,
                    args.len()
                )));
            }
            expr = Expr::FilterCall {
                input: Box::new(expr),
                name: name.to_owned(),
                args,
            };
        }
        Ok(expr)
    }

    fn operand(&mut self) -> Result<Expr, LedgerError> {
        match self.peek() {
            Some('"') => {
                let start = self.pos;
                let len = self.string_len()?;
                self.pos += len;
                let literal = &self.src[start..self.pos];
                serde_json::from_str(literal)
                    .map(Expr::Literal)
                    .map_err(|e| syntax(format!("invalid string {literal}: {e}")))
            }
            Some(c) if c == '-' || c.is_ascii_digit() => {
                let rest = self.rest();
                let len = rest
                    .find(|c: char| !(c.is_ascii_digit() || "+-.eE".contains(c)))
                    .unwrap_or(rest.len());
                self.pos += len;
                serde_json::from_str(&rest[..len])
                    .map(Expr::Literal)
                    .map_err(|e| syntax(format!("invalid number '{}': {e}", &rest[..len])))
            }
            Some(c) if is_ident_char(c) => {
                for (word, value) in [("true", Value::Bool(true)), ("false", Value::Bool(false)), ("null", Value::Null)] {
                    if self.keyword(word) {
                        return Ok(Expr::Literal(value));
                    }
                }
                self.path()
            }
            _ => Err(syntax(format!("expected a value in '{}'", self.src))),
        }
    }

    fn path(&mut self) -> Result<Expr, LedgerError> {
        let mut segments = Vec::new();
        loop {
            let segment = self
                .ident()
                .ok_or_else(|| syntax(format!("incomplete path in '{}'", self.src)))?;
            segments.push(segment.to_owned());
            // Path dots are never preceded by whitespace.
            if self.rest().starts_with('.') {
                self.pos += 1;
            } else {
                break;
            }
        }
        if matches!(segments[0].as_str(), "and" | "or" | "not") {
            return Err(syntax(format!("expected a value in '{}'", self.src)));
        }
        Ok(Expr::VariablePath(VariablePath(segments)))
    }

    fn condition(&mut self) -> Result<Condition, LedgerError> {
        let mut left = self.conjunction()?;
        while self.keyword("or") {
            let right = self.conjunction()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn conjunction(&mut self) -> Result<Condition, LedgerError> {
        let mut left = self.negation()?;
        while self.keyword("and") {
            let right = self.negation()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn negation(&mut self) -> Result<Condition, LedgerError> {
        if self.keyword("not") {
            return Ok(Condition::Not(Box::new(self.negation()?)));
        }
        if self.eat("(") {
            let inner = self.condition()?;
            if !self.eat(")") {
                return Err(syntax(format!("missing ')' in '{}'", self.src)));
            }
            return Ok(inner);
        }
        let left = self.expr()?;
        if self.eat("==") {
            Ok(Condition::Eq(left, self.expr()?))
        } else if self.eat("!=") {
            Ok(Condition::Ne(left, self.expr()?))
        } else {
            Ok(Condition::Truthy(left))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn path(s: &str) -> Expr {
        Expr::VariablePath(VariablePath(s.split('.').map(str::to_owned).collect()))
    }

    #[test]
    fn test_parse_text_and_placeholders() {
        let nodes = parse("Dear {{ data.name | title }},").unwrap();

        assert_eq!(
            nodes,
            vec![
                Node::Literal("Dear ".into()),
                Node::Placeholder(Expr::FilterCall {
                    input: Box::new(path("data.name")),
                    name: "title".into(),
                    args: vec![],
                }),
                Node::Literal(",".into()),
            ]
        );
    }

    #[test]
    fn test_parse_filter_arguments_as_json() {
        let nodes = parse(r#"{{ data.kind | lookup({"c": "Corp, Inc."}, "Other") | default("-") }}"#)
            .unwrap();

        let Node::Placeholder(Expr::FilterCall { input, name, args }) = &nodes[0] else {
            panic!("unexpected {nodes:?}");
        };
        assert_eq!(name, "default");
        assert_eq!(args, &vec![json!("-")]);
        let Expr::FilterCall { args, .. } = input.as_ref() else {
            panic!("unexpected {input:?}");
        };
        assert_eq!(args, &vec![json!({"c": "Corp, Inc."}), json!("Other")]);
    }

    #[test]
    fn test_parse_conditionals_with_precedence() {
        let nodes = parse(
            r#"{% if not data.a or data.b == "x" and (data.c != 1) %}A{% elif data.d %}D{% else %}E{% endif %}"#,
        )
        .unwrap();

        let Node::Conditional(conditional) = &nodes[0] else {
            panic!("unexpected {nodes:?}");
        };
        assert_eq!(conditional.branches.len(), 2);
        assert_eq!(conditional.otherwise, vec![Node::Literal("E".into())]);
        assert_eq!(
            conditional.branches[0].0,
            Condition::Or(
                Box::new(Condition::Not(Box::new(Condition::Truthy(path("data.a"))))),
                Box::new(Condition::And(
                    Box::new(Condition::Eq(path("data.b"), Expr::Literal(json!("x")))),
                    Box::new(Condition::Ne(path("data.c"), Expr::Literal(json!(1)))),
                )),
            )
        );
    }

    #[test]
    fn test_literal_operands() {
        let nodes = parse(r#"{{ "a \"quoted\" b" }}{{ -1.5 }}{{ true }}{{ null }}"#).unwrap();

        assert_eq!(
            nodes,
            vec![
                Node::Placeholder(Expr::Literal(json!("a \"quoted\" b"))),
                Node::Placeholder(Expr::Literal(json!(-1.5))),
                Node::Placeholder(Expr::Literal(json!(true))),
                Node::Placeholder(Expr::Literal(Value::Null)),
            ]
        );
    }

    #[test]
    fn test_unknown_filter_and_bad_arity_fail_at_compile_time() {
        let unknown = parse("{{ data.name | shout }}");
        let arity = parse("{{ data.name | truncate }}");

        assert!(matches!(unknown, Err(LedgerError::Configuration(m)) if m.contains("shout")));
        assert!(matches!(arity, Err(LedgerError::Configuration(m)) if m.contains("truncate")));
    }

    #[test]
    fn test_malformed_templates_are_rejected() {
        for source in [
            "{{ data.name",
            "{% if data.a %}never closed",
            "{% endif %}",
            "{% if data.a %}x{% else %}y{% elif data.b %}z{% endif %}",
            "{% unless data.a %}{% endif %}",
            "{{ data.name extra }}",
            "{{ data. }}",
        ] {
            assert!(
                matches!(parse(source), Err(LedgerError::Configuration(_))),
                "accepted {source}"
            );
        }
    }
}
