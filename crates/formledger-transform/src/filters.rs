//! Process-wide filter table.
//!
//! Filters are pure functions of their input and arguments. The table is
//! built on first use and read-only afterwards.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::LazyLock;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate};
use serde_json::Value;

/// Result of a filter: the output value, or why the input or arguments
/// were unusable.
pub(crate) type FilterResult = Result<Value, String>;

/// A named filter and its calling convention.
pub(crate) struct FilterSpec {
    pub min_args: usize,
    pub max_args: usize,
    /// Whether the filter may run on an undefined input (`None`).
    pub accepts_undefined: bool,
    pub apply: Apply,
}

type Apply = fn(Option<&Value>, &[Value]) -> FilterResult;

const fn defined(min_args: usize, max_args: usize, apply: Apply) -> FilterSpec {
    FilterSpec {
        min_args,
        max_args,
        accepts_undefined: false,
        apply,
    }
}

pub(crate) static FILTERS: LazyLock<HashMap<&'static str, FilterSpec>> = LazyLock::new(|| {
    HashMap::from([
        (
            "default",
            FilterSpec {
                min_args: 1,
                max_args: 1,
                accepts_undefined: true,
                apply: default,
            },
        ),
        ("upper", defined(0, 0, upper)),
        ("lower", defined(0, 0, lower)),
        ("trim", defined(0, 0, trim)),
        ("title", defined(0, 0, title)),
        ("truncate", defined(1, 2, truncate)),
        ("join", defined(0, 1, join)),
        ("length", defined(0, 0, length)),
        ("string", defined(0, 0, string)),
        ("json", defined(0, 0, json)),
        ("lookup", defined(1, 2, lookup)),
        ("date", defined(0, 1, date)),
        ("format_tin", defined(0, 0, format_tin)),
    ])
});

/// Text form of a value as it appears in rendered output: strings
/// unquoted, `null` empty, everything else as JSON.
pub(crate) fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn input(value: Option<&Value>) -> &Value {
    value.unwrap_or(&Value::Null)
}

fn text_arg<'a>(args: &'a [Value], index: usize, fallback: &'a str) -> Result<&'a str, String> {
    match args.get(index) {
        None => Ok(fallback),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(format!("argument {} must be a string, got {other}", index + 1)),
    }
}

fn default(value: Option<&Value>, args: &[Value]) -> FilterResult {
    match value {
        None | Some(Value::Null) => Ok(args[0].clone()),
        Some(v) => Ok(v.clone()),
    }
}

fn upper(value: Option<&Value>, _args: &[Value]) -> FilterResult {
    Ok(Value::String(to_text(input(value)).to_uppercase()))
}

fn lower(value: Option<&Value>, _args: &[Value]) -> FilterResult {
    Ok(Value::String(to_text(input(value)).to_lowercase()))
}

fn trim(value: Option<&Value>, _args: &[Value]) -> FilterResult {
    Ok(Value::String(to_text(input(value)).trim().to_owned()))
}

fn title(value: Option<&Value>, _args: &[Value]) -> FilterResult {
    let text = to_text(input(value));
    let mut out = String::with_capacity(text.len());
    let mut at_word_start = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
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
    Ok(Value::String(out))
}

fn truncate(value: Option<&Value>, args: &[Value]) -> FilterResult {
    let limit = args[0]
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| format!("length must be a non-negative integer, got {}", args[0]))?;
    let end = text_arg(args, 1, "...")?;
    let text = to_text(input(value));
    if text.chars().count() <= limit {
        return Ok(Value::String(text));
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str(end);
    Ok(Value::String(out))
}

fn join(value: Option<&Value>, args: &[Value]) -> FilterResult {
    let separator = text_arg(args, 0, "")?;
    match input(value) {
        Value::Array(items) => Ok(Value::String(
            items.iter().map(to_text).collect::<Vec<_>>().join(separator),
        )),
        other => Err(format!("expected an array, got {other}")),
    }
}

fn length(value: Option<&Value>, _args: &[Value]) -> FilterResult {
    let n = match input(value) {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => return Err(format!("{other} has no length")),
    };
    Ok(Value::from(n))
}

fn string(value: Option<&Value>, _args: &[Value]) -> FilterResult {
    Ok(Value::String(to_text(input(value))))
}

fn json(value: Option<&Value>, _args: &[Value]) -> FilterResult {
    Ok(Value::String(input(value).to_string()))
}

fn lookup(value: Option<&Value>, args: &[Value]) -> FilterResult {
    let Value::Object(table) = &args[0] else {
        return Err(format!("lookup table must be an object, got {}", args[0]));
    };
    let key = to_text(input(value));
    match (table.get(&key), args.get(1)) {
        (Some(found), _) => Ok(found.clone()),
        (None, Some(fallback)) => Ok(fallback.clone()),
        (None, None) => Err(format!("no entry for '{key}'")),
    }
}

fn date(value: Option<&Value>, args: &[Value]) -> FilterResult {
    let format = text_arg(args, 0, "%Y-%m-%d")?;
    let items: Vec<Item<'_>> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(format!("invalid date format '{format}'"));
    }

    let text = to_text(input(value));
    let mut out = String::new();
    let written = if let Ok(at) = DateTime::parse_from_rfc3339(&text) {
        write!(out, "{}", at.format_with_items(items.iter()))
    } else if let Ok(day) = NaiveDate::parse_from_str(&text, "%Y-%m-%d") {
        write!(out, "{}", day.format_with_items(items.iter()))
    } else {
        return Err(format!("'{text}' is not a date"));
    };
    written.map_err(|_| format!("'{text}' cannot be formatted with '{format}'"))?;
    Ok(Value::String(out))
}

fn format_tin(value: Option<&Value>, _args: &[Value]) -> FilterResult {
    let chars: Vec<char> = to_text(input(value)).chars().collect();
    let groups: Vec<String> = chars.chunks(3).map(|c| c.iter().collect()).collect();
    Ok(Value::String(groups.join("-")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn apply(name: &str, value: Option<&Value>, args: &[Value]) -> FilterResult {
        (FILTERS[name].apply)(value, args)
    }

    #[test]
    fn test_default_covers_undefined_and_null_only() {
        let fallback = [json!("n/a")];

        assert_eq!(apply("default", None, &fallback), Ok(json!("n/a")));
        assert_eq!(apply("default", Some(&Value::Null), &fallback), Ok(json!("n/a")));
        assert_eq!(apply("default", Some(&json!("")), &fallback), Ok(json!("")));
        assert!(FILTERS["default"].accepts_undefined);
        assert!(!FILTERS["upper"].accepts_undefined);
    }

    #[test]
    fn test_text_filters() {
        let name = json!("  ada LOVELACE  ");

        assert_eq!(apply("trim", Some(&name), &[]), Ok(json!("ada LOVELACE")));
        assert_eq!(apply("upper", Some(&json!("ada")), &[]), Ok(json!("ADA")));
        assert_eq!(apply("lower", Some(&json!("ADA")), &[]), Ok(json!("ada")));
        assert_eq!(
            apply("title", Some(&json!("ada LOVELACE-byron")), &[]),
            Ok(json!("Ada Lovelace-Byron"))
        );
        assert_eq!(
            apply("truncate", Some(&json!("analytical")), &[json!(4)]),
            Ok(json!("anal..."))
        );
        assert_eq!(
            apply("truncate", Some(&json!("engine")), &[json!(10), json!("…")]),
            Ok(json!("engine"))
        );
    }

    #[test]
    fn test_collection_filters() {
        let tags = json!(["math", "poetry", 3]);

        assert_eq!(apply("join", Some(&tags), &[json!(", ")]), Ok(json!("math, poetry, 3")));
        assert_eq!(apply("length", Some(&tags), &[]), Ok(json!(3)));
        assert!(apply("join", Some(&json!("x")), &[]).is_err());
        assert!(apply("length", Some(&json!(5)), &[]).is_err());
    }

    #[test]
    fn test_lookup_maps_codes() {
        let table = json!({"c": "Corporation", "p": "Partnership"});

        assert_eq!(apply("lookup", Some(&json!("c")), &[table.clone()]), Ok(json!("Corporation")));
        assert_eq!(
            apply("lookup", Some(&json!("x")), &[table.clone(), json!("Other")]),
            Ok(json!("Other"))
        );
        assert!(apply("lookup", Some(&json!("x")), &[table]).is_err());
    }

    #[test]
    fn test_date_formats_timestamps_and_dates() {
        assert_eq!(
            apply("date", Some(&json!("2026-01-15T10:30:00Z")), &[json!("%d/%m/%Y")]),
            Ok(json!("15/01/2026"))
        );
        assert_eq!(apply("date", Some(&json!("2026-01-15")), &[]), Ok(json!("2026-01-15")));
        assert!(apply("date", Some(&json!("yesterday")), &[]).is_err());
        assert!(apply("date", Some(&json!("2026-01-15")), &[json!("%Q")]).is_err());
    }

    #[test]
    fn test_format_tin_groups_in_threes() {
        assert_eq!(apply("format_tin", Some(&json!("123456789")), &[]), Ok(json!("123-456-789")));
        assert_eq!(apply("format_tin", Some(&json!(12_345)), &[]), Ok(json!("123-45")));
    }

    #[test]
    fn test_string_and_json_filters() {
        assert_eq!(apply("string", Some(&json!(42)), &[]), Ok(json!("42")));
        assert_eq!(apply("json", Some(&json!({"a": 1})), &[]), Ok(json!("{\"a\":1}")));
    }
}
