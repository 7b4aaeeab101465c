//! Typed schema model.
//!
//! Definitions are JSON documents in the Avro style: a type name
//! (`"string"`), a union (`["null", "long"]`) or an object with a `type`
//! key (`record`, `enum`, `array`, `map`). A definition is parsed twice: into
//! a [`Shape`] that validation walks and reports paths against, and into an
//! `apache_avro` schema that does the binary encoding. Parsing rejects
//! anything either side cannot handle, so a registered definition is always
//! usable.

use std::collections::HashSet;
use std::fmt::{self, Write as _};

use apache_avro::Schema as AvroSchema;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

use formledger_core::error::LedgerError;

use crate::codec;

/// Scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    String,
}

impl Primitive {
    /// Parses a primitive type name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "null" => Some(Self::Null),
            "boolean" => Some(Self::Boolean),
            "int" => Some(Self::Int),
            "long" => Some(Self::Long),
            "float" => Some(Self::Float),
            "double" => Some(Self::Double),
            "string" => Some(Self::String),
            _ => None,
        }
    }

    /// The type name used in definitions.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean => "boolean",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::String => "string",
        }
    }
}

/// One field of a record.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub doc: Option<String>,
    pub shape: Shape,
    /// Normalized default, already validated against `shape`.
    pub default: Option<Value>,
}

/// A named record type.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordShape {
    pub name: String,
    pub namespace: Option<String>,
    pub doc: Option<String>,
    pub fields: Vec<Field>,
}

/// A named enumeration of string symbols.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumShape {
    pub name: String,
    pub doc: Option<String>,
    pub symbols: Vec<String>,
}

/// Structure of a definition, as validation sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Primitive(Primitive),
    Record(RecordShape),
    Enum(EnumShape),
    Array(Box<Shape>),
    Map(Box<Shape>),
    Union(Vec<Shape>),
}

impl Shape {
    /// Returns `true` if `null` is an acceptable value.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        match self {
            Self::Primitive(Primitive::Null) => true,
            Self::Union(branches) => branches.iter().any(Self::is_nullable),
            _ => false,
        }
    }

    /// Whether every value of this shape takes at least one byte.
    fn has_width(&self) -> bool {
        match self {
            Self::Primitive(Primitive::Null) => false,
            Self::Record(record) => record.fields.iter().any(|f| f.shape.has_width()),
            _ => true,
        }
    }

    /// Short human label used in validation messages.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Primitive(p) => p.name().to_owned(),
            Self::Record(r) => r.name.clone(),
            Self::Enum(e) => format!("enum {}", e.name),
            Self::Array(_) => "array".to_owned(),
            Self::Map(_) => "map".to_owned(),
            Self::Union(branches) => {
                let labels: Vec<String> = branches.iter().map(Self::label).collect();
                format!("one of [{}]", labels.join(", "))
            }
        }
    }

    fn collect_defaults(&self, path: &str, out: &mut Vec<Value>) {
        match self {
            Self::Record(record) => {
                for field in &record.fields {
                    let field_path = child_path(path, &field.name);
                    if let Some(default) = &field.default {
                        out.push(json!({"path": field_path, "default": default}));
                    }
                    field.shape.collect_defaults(&field_path, out);
                }
            }
            Self::Array(inner) | Self::Map(inner) => inner.collect_defaults(path, out),
            Self::Union(branches) => {
                for (i, branch) in branches.iter().enumerate() {
                    branch.collect_defaults(&format!("{path}[{i}]"), out);
                }
            }
            Self::Primitive(_) | Self::Enum(_) => {}
        }
    }

    fn render(&self) -> Value {
        match self {
            Self::Primitive(p) => Value::String(p.name().to_owned()),
            Self::Record(record) => {
                let fields: Vec<Value> = record
                    .fields
                    .iter()
                    .map(|field| {
                        let mut out = Map::new();
                        out.insert("name".into(), Value::String(field.name.clone()));
                        out.insert("type".into(), field.shape.render());
                        if let Some(default) = &field.default {
                            out.insert("default".into(), default.clone());
                        }
                        insert_doc(&mut out, field.doc.as_ref());
                        Value::Object(out)
                    })
                    .collect();
                let mut out = Map::new();
                out.insert("type".into(), json!("record"));
                out.insert("name".into(), Value::String(record.name.clone()));
                if let Some(namespace) = &record.namespace {
                    out.insert("namespace".into(), Value::String(namespace.clone()));
                }
                out.insert("fields".into(), Value::Array(fields));
                insert_doc(&mut out, record.doc.as_ref());
                Value::Object(out)
            }
            Self::Enum(e) => {
                let mut out = Map::new();
                out.insert("type".into(), json!("enum"));
                out.insert("name".into(), Value::String(e.name.clone()));
                out.insert("symbols".into(), json!(e.symbols));
                insert_doc(&mut out, e.doc.as_ref());
                Value::Object(out)
            }
            Self::Array(items) => json!({"type": "array", "items": items.render()}),
            Self::Map(values) => json!({"type": "map", "values": values.render()}),
            Self::Union(branches) => Value::Array(branches.iter().map(Self::render).collect()),
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// A parsed structural schema.
#[derive(Debug, Clone)]
pub struct Schema {
    shape: Shape,
    avro: AvroSchema,
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape
    }
}

impl Schema {
    /// Parses a definition document.
    ///
    /// # Errors
    ///
    /// Returns `LedgerError::Configuration` naming the offending location if
    /// the definition is malformed.
    pub fn parse(definition: &Value) -> Result<Self, LedgerError> {
        let shape = parse_shape(definition, "")?;
        let avro = AvroSchema::parse(&shape.render()).map_err(|e| invalid("", e))?;
        Ok(Self { shape, avro })
    }

    #[must_use]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub(crate) fn avro(&self) -> &AvroSchema {
        &self.avro
    }

    /// The definition document, including documentation attributes.
    #[must_use]
    pub fn to_value(&self) -> Value {
        self.shape.render()
    }

    /// Avro Parsing Canonical Form: names fully qualified, documentation and
    /// defaults stripped.
    #[must_use]
    pub fn canonical_form(&self) -> String {
        self.avro.canonical_form()
    }

    /// Hex SHA-256 identifying the structure. Two definitions that differ
    /// only in documentation share a fingerprint. Field defaults are hashed
    /// alongside the canonical form since they decide how missing fields
    /// resolve.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut defaults = Vec::new();
        self.shape.collect_defaults("", &mut defaults);
        let digest = if defaults.is_empty() {
            self.avro.fingerprint::<Sha256>().bytes
        } else {
            Sha256::new()
                .chain_update(self.canonical_form())
                .chain_update(Value::Array(defaults).to_string())
                .finalize()
                .to_vec()
        };
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        hex
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.shape.fmt(f)
    }
}

fn insert_doc(out: &mut Map<String, Value>, doc: Option<&String>) {
    if let Some(doc) = doc {
        out.insert("doc".into(), Value::String(doc.clone()));
    }
}

/// JSON kind of a value, for messages.
pub(crate) fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Appends `segment` to a dotted path.
pub(crate) fn child_path(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_owned()
    } else {
        format!("{path}.{segment}")
    }
}

fn invalid(path: &str, reason: impl fmt::Display) -> LedgerError {
    let at = if path.is_empty() { "<root>" } else { path };
    LedgerError::Configuration(format!("invalid schema at {at}: {reason}"))
}

fn parse_shape(value: &Value, path: &str) -> Result<Shape, LedgerError> {
    match value {
        Value::String(name) => Primitive::from_name(name)
            .map(Shape::Primitive)
            .ok_or_else(|| invalid(path, format!("unknown type '{name}'"))),
        Value::Array(branches) => parse_union(branches, path),
        Value::Object(obj) => parse_complex(obj, path),
        other => Err(invalid(
            path,
            format!("expected a type name, union or object, found {}", kind_of(other)),
        )),
    }
}

fn parse_union(branches: &[Value], path: &str) -> Result<Shape, LedgerError> {
    if branches.is_empty() {
        return Err(invalid(path, "union has no branches"));
    }
    let mut seen = HashSet::new();
    let mut parsed = Vec::with_capacity(branches.len());
    for (i, branch) in branches.iter().enumerate() {
        let branch_path = format!("{path}[{i}]");
        let shape = parse_shape(branch, &branch_path)?;
        if matches!(shape, Shape::Union(_)) {
            return Err(invalid(&branch_path, "unions may not contain unions"));
        }
        if !seen.insert(shape.label()) {
            return Err(invalid(&branch_path, format!("duplicate branch {}", shape.label())));
        }
        parsed.push(shape);
    }
    Ok(Shape::Union(parsed))
}

fn required_str<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    path: &str,
) -> Result<&'a str, LedgerError> {
    match obj.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(_) => Err(invalid(path, format!("'{key}' must be a non-empty string"))),
        None => Err(invalid(path, format!("missing '{key}'"))),
    }
}

fn optional_str(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn parse_complex(obj: &Map<String, Value>, path: &str) -> Result<Shape, LedgerError> {
    let type_name = required_str(obj, "type", path)?;
    match type_name {
        "record" => parse_record(obj, path).map(Shape::Record),
        "enum" => parse_enum(obj, path).map(Shape::Enum),
        "array" => {
            let items = obj.get("items").ok_or_else(|| invalid(path, "missing 'items'"))?;
            let items = parse_shape(items, &child_path(path, "items"))?;
            // Otherwise a block count alone could claim any number of items.
            if !items.has_width() {
                return Err(invalid(path, "array items must carry data"));
            }
            Ok(Shape::Array(Box::new(items)))
        }
        "map" => {
            let values = obj
                .get("values")
                .ok_or_else(|| invalid(path, "missing 'values'"))?;
            Ok(Shape::Map(Box::new(parse_shape(
                values,
                &child_path(path, "values"),
            )?)))
        }
        other => Primitive::from_name(other)
            .map(Shape::Primitive)
            .ok_or_else(|| invalid(path, format!("unknown type '{other}'"))),
    }
}

fn parse_record(obj: &Map<String, Value>, path: &str) -> Result<RecordShape, LedgerError> {
    let name = required_str(obj, "name", path)?.to_owned();
    let Some(Value::Array(raw_fields)) = obj.get("fields") else {
        return Err(invalid(path, "record needs a 'fields' array"));
    };

    let mut names = HashSet::new();
    let mut fields = Vec::with_capacity(raw_fields.len());
    for (i, raw) in raw_fields.iter().enumerate() {
        let Value::Object(raw) = raw else {
            return Err(invalid(&format!("{path}.fields[{i}]"), "field must be an object"));
        };
        let field_name = required_str(raw, "name", &format!("{path}.fields[{i}]"))?.to_owned();
        let field_path = child_path(path, &field_name);
        if !names.insert(field_name.clone()) {
            return Err(invalid(&field_path, "duplicate field"));
        }
        let field_type = raw
            .get("type")
            .ok_or_else(|| invalid(&field_path, "missing 'type'"))?;
        let shape = parse_shape(field_type, &field_path)?;

        // An explicit null default says nothing a nullable type doesn't already.
        let default = match raw.get("default") {
            None => None,
            Some(Value::Null) if shape.is_nullable() => None,
            Some(value) => Some(codec::normalize_default(&shape, value).map_err(|reason| {
                invalid(&field_path, format!("default does not match type: {reason}"))
            })?),
        };

        fields.push(Field {
            name: field_name,
            doc: optional_str(raw, "doc"),
            shape,
            default,
        });
    }

    Ok(RecordShape {
        name,
        namespace: optional_str(obj, "namespace"),
        doc: optional_str(obj, "doc"),
        fields,
    })
}

fn parse_enum(obj: &Map<String, Value>, path: &str) -> Result<EnumShape, LedgerError> {
    let name = required_str(obj, "name", path)?.to_owned();
    let Some(Value::Array(raw)) = obj.get("symbols") else {
        return Err(invalid(path, "enum needs a 'symbols' array"));
    };
    if raw.is_empty() {
        return Err(invalid(path, "enum has no symbols"));
    }
    let mut seen = HashSet::new();
    let mut symbols = Vec::with_capacity(raw.len());
    for symbol in raw {
        let Some(symbol) = symbol.as_str() else {
            return Err(invalid(path, "enum symbols must be strings"));
        };
        if !seen.insert(symbol) {
            return Err(invalid(path, format!("duplicate symbol '{symbol}'")));
        }
        symbols.push(symbol.to_owned());
    }
    Ok(EnumShape {
        name,
        doc: optional_str(obj, "doc"),
        symbols,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nda_definition() -> Value {
        json!({
            "type": "record",
            "name": "Nda",
            "namespace": "forms",
            "doc": "Mutual NDA",
            "fields": [
                {"name": "full_name", "type": "string", "doc": "Legal name"},
                {"name": "age", "type": ["null", "int"], "default": null},
                {"name": "tier", "type": {"type": "enum", "name": "Tier", "symbols": ["gold", "silver"]}},
                {"name": "tags", "type": {"type": "array", "items": "string"}, "default": []}
            ]
        })
    }

    #[test]
    fn test_parse_builds_typed_record() {
        let schema = Schema::parse(&nda_definition()).unwrap();

        let Shape::Record(record) = schema.shape() else {
            panic!("expected record, got {schema:?}");
        };
        assert_eq!(record.name, "Nda");
        assert_eq!(record.fields.len(), 4);
        assert!(record.fields[1].shape.is_nullable());
        assert_eq!(record.fields[1].default, None);
        assert_eq!(record.fields[3].default, Some(json!([])));
    }

    #[test]
    fn test_fingerprint_ignores_documentation() {
        let mut undocumented = nda_definition();
        undocumented["doc"] = json!("Something else entirely");
        undocumented["fields"][0]
            .as_object_mut()
            .unwrap()
            .remove("doc");

        let a = Schema::parse(&nda_definition()).unwrap();
        let b = Schema::parse(&undocumented).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.to_value(), b.to_value());
    }

    #[test]
    fn test_fingerprint_changes_with_structure() {
        let mut extended = nda_definition();
        extended["fields"]
            .as_array_mut()
            .unwrap()
            .push(json!({"name": "email", "type": ["null", "string"]}));

        let a = Schema::parse(&nda_definition()).unwrap();
        let b = Schema::parse(&extended).unwrap();

        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_with_defaults() {
        let mut retiered = nda_definition();
        retiered["fields"][3]["default"] = json!(["legacy"]);

        let a = Schema::parse(&nda_definition()).unwrap();
        let b = Schema::parse(&retiered).unwrap();

        assert_eq!(a.canonical_form(), b.canonical_form());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_fingerprint_without_defaults_is_the_avro_fingerprint() {
        let schema = Schema::parse(&json!({"type": "record", "name": "Point", "fields": [
            {"name": "x", "type": "long"}, {"name": "y", "type": "long"}
        ]}))
        .unwrap();

        let expected: String = Sha256::digest(schema.canonical_form().as_bytes())
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();

        assert_eq!(schema.fingerprint(), expected);
        assert_eq!(
            schema.canonical_form(),
            r#"{"name":"Point","type":"record","fields":[{"name":"x","type":"long"},{"name":"y","type":"long"}]}"#
        );
    }

    #[test]
    fn test_array_items_must_carry_data() {
        let cases = [
            json!({"type": "array", "items": "null"}),
            json!({"type": "array", "items": {"type": "record", "name": "Empty", "fields": []}}),
        ];

        for case in cases {
            let err = Schema::parse(&case).unwrap_err();
            assert!(err.to_string().contains("must carry data"), "{err}");
        }
    }

    #[test]
    fn test_parse_rejects_malformed_definitions() {
        let cases = [
            json!("decimal"),
            json!([]),
            json!(["null", "null"]),
            json!({"type": "record", "name": "R"}),
            json!({"type": "record", "name": "R", "fields": [
                {"name": "a", "type": "int"}, {"name": "a", "type": "int"}
            ]}),
            json!({"type": "record", "name": "R", "fields": [
                {"name": "a", "type": "int", "default": "seven"}
            ]}),
            json!({"type": "enum", "name": "E", "symbols": []}),
            json!({"type": "array"}),
        ];

        for case in cases {
            let result = Schema::parse(&case);
            assert!(
                matches!(result, Err(LedgerError::Configuration(_))),
                "accepted {case}"
            );
        }
    }

    #[test]
    fn test_error_names_the_offending_field() {
        let definition = json!({"type": "record", "name": "R", "fields": [
            {"name": "address", "type": {"type": "record", "name": "A", "fields": [
                {"name": "city", "type": "text"}
            ]}}
        ]});

        let err = Schema::parse(&definition).unwrap_err();

        assert!(err.to_string().contains("address.city"), "{err}");
    }
}
