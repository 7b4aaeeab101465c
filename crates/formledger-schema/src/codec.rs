//! Serializer: validates data against a schema and encodes it.
//!
//! Validation and normalization walk the schema's [`Shape`] so every
//! offending field is reported with its path. The binary encoding is Avro's,
//! produced and read by `apache_avro`, so an external reader holding the
//! definition can decode stored payloads with any Avro library.
//!
//! Numbers have one normalized form: a floating-point value with no
//! fractional part (below 2^53) is written as a JSON integer, whether it
//! arrived as `1200` or `1200.0`. Decoding restores the same form, so a
//! normalized payload survives the round trip unchanged.

use std::collections::HashMap;
use std::sync::Once;

use apache_avro::types::Value as AvroValue;
use serde_json::{Number, Value};

use formledger_core::error::{FieldViolation, LedgerError};
use formledger_core::event::PayloadEncoding;

use crate::model::{Primitive, Schema, Shape, child_path, kind_of};

/// Upper bound on any single length or item count read from a payload.
const MAX_DECODE_ALLOCATION: usize = 1024 * 1024;

/// Largest magnitude below which every integral `f64` is an exact `i64`.
const EXACT_INTEGER_LIMIT: f64 = 9_007_199_254_740_992.0;

static DECODE_LIMIT: Once = Once::new();

/// Validates, encodes and decodes payloads against one schema version.
#[derive(Debug, Clone, Copy)]
pub struct Serializer {
    strict: bool,
}

impl Default for Serializer {
    fn default() -> Self {
        Self { strict: true }
    }
}

impl Serializer {
    /// Creates a serializer. In strict mode undeclared fields are violations;
    /// otherwise they are dropped.
    #[must_use]
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    /// Checks `data` against `schema` and returns its normalized form:
    /// defaults filled in, missing nullable fields set to `null`, numbers
    /// coerced to the declared kind.
    ///
    /// # Errors
    ///
    /// `SchemaValidation` listing every offending field.
    pub fn validate(&self, schema: &Schema, data: &Value) -> Result<Value, LedgerError> {
        let mut violations = Vec::new();
        let normalized = conform(schema.shape(), data, self.strict, "", &mut violations);
        match normalized {
            Some(value) if violations.is_empty() => Ok(value),
            _ => {
                if violations.is_empty() {
                    violations.push(FieldViolation::new("", "value does not match schema"));
                }
                Err(LedgerError::SchemaValidation(violations))
            }
        }
    }

    /// Validates and encodes `data`.
    ///
    /// # Errors
    ///
    /// `SchemaValidation` if `data` does not conform.
    pub fn serialize(
        &self,
        schema: &Schema,
        data: &Value,
        encoding: PayloadEncoding,
    ) -> Result<Vec<u8>, LedgerError> {
        let normalized = self.validate(schema, data)?;
        match encoding {
            PayloadEncoding::Binary => {
                let datum = to_avro(schema.shape(), &normalized)?;
                apache_avro::to_avro_datum(schema.avro(), datum)
                    .map_err(|e| LedgerError::Infrastructure(format!("avro encoding failed: {e}")))
            }
            PayloadEncoding::Json => serde_json::to_vec(&normalized)
                .map_err(|e| LedgerError::Infrastructure(format!("json encoding failed: {e}"))),
        }
    }

    /// Decodes bytes produced by [`Serializer::serialize`] with the same
    /// schema. The result equals the normalized input.
    ///
    /// # Errors
    ///
    /// `MalformedPayload` if the bytes are truncated, have trailing data or
    /// do not match the schema.
    pub fn deserialize(
        &self,
        schema: &Schema,
        bytes: &[u8],
        encoding: PayloadEncoding,
    ) -> Result<Value, LedgerError> {
        match encoding {
            PayloadEncoding::Binary => {
                DECODE_LIMIT.call_once(|| {
                    apache_avro::max_allocation_bytes(MAX_DECODE_ALLOCATION);
                });
                let mut rest = bytes;
                let datum = apache_avro::from_avro_datum(schema.avro(), &mut rest, None)
                    .map_err(|e| malformed(format!("undecodable payload: {e}")))?;
                if !rest.is_empty() {
                    return Err(malformed(format!(
                        "{} trailing bytes after payload",
                        rest.len()
                    )));
                }
                from_avro(datum)
            }
            PayloadEncoding::Json => {
                let raw: Value = serde_json::from_slice(bytes)
                    .map_err(|e| malformed(format!("invalid json: {e}")))?;
                self.validate(schema, &raw).map_err(|e| malformed(e.to_string()))
            }
        }
    }
}

/// Validates a field default, returning its normalized form.
pub(crate) fn normalize_default(shape: &Shape, value: &Value) -> Result<Value, String> {
    let mut violations = Vec::new();
    match conform(shape, value, true, "", &mut violations) {
        Some(normalized) if violations.is_empty() => Ok(normalized),
        _ => Err(violations
            .iter()
            .map(|v| v.reason.clone())
            .collect::<Vec<_>>()
            .join("; ")),
    }
}

fn mismatch(
    shape: &Shape,
    value: &Value,
    path: &str,
    out: &mut Vec<FieldViolation>,
) -> Option<Value> {
    out.push(FieldViolation::new(
        path,
        format!("expected {}, found {}", shape.label(), kind_of(value)),
    ));
    None
}

/// Validates `value`, pushing a violation per offending location, and
/// returns the normalized value when there were none.
fn conform(
    shape: &Shape,
    value: &Value,
    strict: bool,
    path: &str,
    out: &mut Vec<FieldViolation>,
) -> Option<Value> {
    match (shape, value) {
        (Shape::Primitive(primitive), _) => match conform_primitive(*primitive, value) {
            Ok(normalized) => Some(normalized),
            Err(reason) => {
                out.push(FieldViolation::new(path, reason));
                None
            }
        },
        (Shape::Enum(e), Value::String(symbol)) => {
            if e.symbols.contains(symbol) {
                Some(value.clone())
            } else {
                out.push(FieldViolation::new(
                    path,
                    format!("'{symbol}' is not one of [{}]", e.symbols.join(", ")),
                ));
                None
            }
        }
        (Shape::Array(items), Value::Array(values)) => {
            let before = out.len();
            let normalized: Vec<Value> = values
                .iter()
                .enumerate()
                .filter_map(|(i, v)| conform(items, v, strict, &format!("{path}[{i}]"), out))
                .collect();
            (out.len() == before).then_some(Value::Array(normalized))
        }
        (Shape::Map(values), Value::Object(entries)) => {
            let before = out.len();
            let normalized: serde_json::Map<String, Value> = entries
                .iter()
                .filter_map(|(k, v)| {
                    conform(values, v, strict, &child_path(path, k), out).map(|v| (k.clone(), v))
                })
                .collect();
            (out.len() == before).then_some(Value::Object(normalized))
        }
        (Shape::Record(record), Value::Object(entries)) => {
            let before = out.len();
            let mut normalized = serde_json::Map::new();
            for field in &record.fields {
                let field_path = child_path(path, &field.name);
                let resolved = match entries.get(&field.name) {
                    Some(v) => conform(&field.shape, v, strict, &field_path, out),
                    None => match &field.default {
                        Some(default) => Some(default.clone()),
                        None if field.shape.is_nullable() => Some(Value::Null),
                        None => {
                            out.push(FieldViolation::new(field_path, "missing required field"));
                            None
                        }
                    },
                };
                if let Some(v) = resolved {
                    normalized.insert(field.name.clone(), v);
                }
            }
            if strict {
                for key in entries.keys() {
                    if !record.fields.iter().any(|f| &f.name == key) {
                        out.push(FieldViolation::new(child_path(path, key), "undeclared field"));
                    }
                }
            }
            (out.len() == before).then_some(Value::Object(normalized))
        }
        (Shape::Union(branches), _) => {
            if value.is_null() && shape.is_nullable() {
                return Some(Value::Null);
            }
            // With a single non-null branch, report that branch's own
            // violations so nested paths survive.
            let non_null: Vec<&Shape> = branches
                .iter()
                .filter(|b| !matches!(b, Shape::Primitive(Primitive::Null)))
                .collect();
            if let [only] = non_null.as_slice() {
                return conform(only, value, strict, path, out);
            }
            union_branch(branches, value, strict)
                .map(|(_, normalized)| normalized)
                .or_else(|| mismatch(shape, value, path, out))
        }
        _ => mismatch(shape, value, path, out),
    }
}

fn accepted(shape: &Shape, value: &Value, strict: bool) -> Option<Value> {
    let mut scratch = Vec::new();
    conform(shape, value, strict, "", &mut scratch).filter(|_| scratch.is_empty())
}

/// Whether `shape` is the natural home for `value`: integers belong to
/// `int`/`long`, fractional numbers to `float`/`double`.
fn exact_kind(shape: &Shape, value: &Value) -> bool {
    match (shape, value) {
        (Shape::Primitive(Primitive::Int | Primitive::Long), Value::Number(n)) => !n.is_f64(),
        (Shape::Primitive(Primitive::Float | Primitive::Double), Value::Number(n)) => n.is_f64(),
        _ => true,
    }
}

/// Picks the branch that encodes `value`, preferring an exact numeric kind
/// over the first branch that merely accepts it.
fn union_branch(branches: &[Shape], value: &Value, strict: bool) -> Option<(usize, Value)> {
    let exact = branches.iter().enumerate().filter(|(_, b)| exact_kind(b, value));
    let loose = branches.iter().enumerate().filter(|(_, b)| !exact_kind(b, value));
    exact
        .chain(loose)
        .find_map(|(i, branch)| accepted(branch, value, strict).map(|v| (i, v)))
}

/// JSON form of a floating-point value; see the module docs.
#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn float_json(f: f64) -> Option<Value> {
    if f.fract() == 0.0 && f.abs() < EXACT_INTEGER_LIMIT {
        return Some(Value::from(f as i64));
    }
    Number::from_f64(f).map(Value::Number)
}

#[allow(clippy::cast_possible_truncation, clippy::float_cmp)]
fn conform_primitive(primitive: Primitive, value: &Value) -> Result<Value, String> {
    let expected = || format!("expected {}, found {}", primitive.name(), kind_of(value));
    match (primitive, value) {
        (Primitive::Null, Value::Null) => Ok(Value::Null),
        (Primitive::Boolean, Value::Bool(_)) | (Primitive::String, Value::String(_)) => {
            Ok(value.clone())
        }
        (Primitive::Long, Value::Number(n)) => n.as_i64().map(Value::from).ok_or_else(expected),
        (Primitive::Int, Value::Number(n)) => match n.as_i64() {
            Some(i) if i32::try_from(i).is_ok() => Ok(Value::from(i)),
            Some(i) => Err(format!("{i} is out of range for int")),
            None => Err(expected()),
        },
        (Primitive::Double, Value::Number(n)) => {
            n.as_f64().and_then(float_json).ok_or_else(expected)
        }
        (Primitive::Float, Value::Number(n)) => {
            let wide = n.as_f64().ok_or_else(expected)?;
            if f64::from(wide as f32) == wide {
                float_json(wide).ok_or_else(expected)
            } else {
                Err(format!("{wide} is not exactly representable as float"))
            }
        }
        _ => Err(expected()),
    }
}

fn unencodable(shape: &Shape, value: &Value) -> LedgerError {
    LedgerError::SchemaValidation(vec![FieldViolation::new(
        "",
        format!("cannot encode {} as {}", kind_of(value), shape.label()),
    )])
}

fn index_u32(index: usize, shape: &Shape, value: &Value) -> Result<u32, LedgerError> {
    u32::try_from(index).map_err(|_| unencodable(shape, value))
}

/// Converts a normalized value into the Avro datum for `shape`.
#[allow(clippy::cast_possible_truncation)]
fn to_avro(shape: &Shape, value: &Value) -> Result<AvroValue, LedgerError> {
    let datum = match (shape, value) {
        (Shape::Primitive(Primitive::Null), Value::Null) => AvroValue::Null,
        (Shape::Primitive(Primitive::Boolean), Value::Bool(b)) => AvroValue::Boolean(*b),
        (Shape::Primitive(Primitive::Int), Value::Number(n)) => AvroValue::Int(
            n.as_i64()
                .and_then(|i| i32::try_from(i).ok())
                .ok_or_else(|| unencodable(shape, value))?,
        ),
        (Shape::Primitive(Primitive::Long), Value::Number(n)) => {
            AvroValue::Long(n.as_i64().ok_or_else(|| unencodable(shape, value))?)
        }
        (Shape::Primitive(Primitive::Float), Value::Number(n)) => {
            AvroValue::Float(n.as_f64().ok_or_else(|| unencodable(shape, value))? as f32)
        }
        (Shape::Primitive(Primitive::Double), Value::Number(n)) => {
            AvroValue::Double(n.as_f64().ok_or_else(|| unencodable(shape, value))?)
        }
        (Shape::Primitive(Primitive::String), Value::String(s)) => AvroValue::String(s.clone()),
        (Shape::Enum(e), Value::String(symbol)) => {
            let index = e
                .symbols
                .iter()
                .position(|s| s == symbol)
                .ok_or_else(|| unencodable(shape, value))?;
            AvroValue::Enum(index_u32(index, shape, value)?, symbol.clone())
        }
        (Shape::Array(items), Value::Array(values)) => AvroValue::Array(
            values
                .iter()
                .map(|v| to_avro(items, v))
                .collect::<Result<_, _>>()?,
        ),
        (Shape::Map(values), Value::Object(entries)) => AvroValue::Map(
            entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), to_avro(values, v)?)))
                .collect::<Result<HashMap<_, _>, LedgerError>>()?,
        ),
        (Shape::Record(record), Value::Object(entries)) => AvroValue::Record(
            record
                .fields
                .iter()
                .map(|field| {
                    let v = entries.get(&field.name).unwrap_or(&Value::Null);
                    Ok((field.name.clone(), to_avro(&field.shape, v)?))
                })
                .collect::<Result<_, LedgerError>>()?,
        ),
        (Shape::Union(branches), _) => {
            let (index, _) =
                union_branch(branches, value, true).ok_or_else(|| unencodable(shape, value))?;
            AvroValue::Union(
                index_u32(index, shape, value)?,
                Box::new(to_avro(&branches[index], value)?),
            )
        }
        _ => return Err(unencodable(shape, value)),
    };
    Ok(datum)
}

fn malformed(reason: impl Into<String>) -> LedgerError {
    LedgerError::MalformedPayload(reason.into())
}

fn from_avro(datum: AvroValue) -> Result<Value, LedgerError> {
    let float = |f: f64| float_json(f).ok_or_else(|| malformed("non-finite floating point value"));
    let value = match datum {
        AvroValue::Null => Value::Null,
        AvroValue::Boolean(b) => Value::Bool(b),
        AvroValue::Int(i) => Value::from(i),
        AvroValue::Long(i) => Value::from(i),
        AvroValue::Float(f) => float(f64::from(f))?,
        AvroValue::Double(f) => float(f)?,
        AvroValue::String(s) | AvroValue::Enum(_, s) => Value::String(s),
        AvroValue::Union(_, inner) => from_avro(*inner)?,
        AvroValue::Array(items) => Value::Array(
            items
                .into_iter()
                .map(from_avro)
                .collect::<Result<_, _>>()?,
        ),
        AvroValue::Map(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| Ok((k, from_avro(v)?)))
                .collect::<Result<_, LedgerError>>()?,
        ),
        AvroValue::Record(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| Ok((k, from_avro(v)?)))
                .collect::<Result<_, LedgerError>>()?,
        ),
        other => return Err(malformed(format!("unsupported avro value {other:?}"))),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn schema(definition: &Value) -> Schema {
        Schema::parse(definition).unwrap()
    }

    fn application() -> Schema {
        schema(&json!({
            "type": "record",
            "name": "Application",
            "fields": [
                {"name": "full_name", "type": "string"},
                {"name": "age", "type": "int"},
                {"name": "income", "type": "double"},
                {"name": "ratio", "type": "float"},
                {"name": "employed", "type": "boolean"},
                {"name": "tier", "type": {"type": "enum", "name": "Tier", "symbols": ["gold", "silver"]}},
                {"name": "tags", "type": {"type": "array", "items": "string"}},
                {"name": "scores", "type": {"type": "map", "values": "long"}},
                {"name": "nickname", "type": ["null", "string"]},
                {"name": "address", "type": ["null", {
                    "type": "record", "name": "Address",
                    "fields": [{"name": "city", "type": "string"}, {"name": "zip", "type": "string"}]
                }]},
                {"name": "country", "type": "string", "default": "US"}
            ]
        }))
    }

    fn applicant() -> Value {
        json!({
            "full_name": "Ada Lovelace",
            "age": 36,
            "income": 1250.75,
            "ratio": 0.5,
            "employed": true,
            "tier": "gold",
            "tags": ["math", "engines"],
            "scores": {"logic": 9, "poetry": -3},
            "nickname": null,
            "address": {"city": "London", "zip": "W1"},
            "country": "UK"
        })
    }

    #[test]
    fn test_binary_round_trip_is_exact() {
        let serializer = Serializer::default();
        let schema = application();

        let bytes = serializer
            .serialize(&schema, &applicant(), PayloadEncoding::Binary)
            .unwrap();
        let decoded = serializer
            .deserialize(&schema, &bytes, PayloadEncoding::Binary)
            .unwrap();

        assert_eq!(decoded, applicant());
    }

    #[test]
    fn test_json_round_trip_is_exact() {
        let serializer = Serializer::default();
        let schema = application();

        let bytes = serializer
            .serialize(&schema, &applicant(), PayloadEncoding::Json)
            .unwrap();
        let decoded = serializer
            .deserialize(&schema, &bytes, PayloadEncoding::Json)
            .unwrap();

        assert_eq!(decoded, applicant());
    }

    #[test]
    fn test_binary_layout_matches_avro() {
        let schema = schema(&json!({
            "type": "record", "name": "Test",
            "fields": [
                {"name": "a", "type": "long"},
                {"name": "b", "type": "string"},
                {"name": "c", "type": ["null", "string"]}
            ]
        }));

        let bytes = Serializer::default()
            .serialize(
                &schema,
                &json!({"a": 27, "b": "foo", "c": "x"}),
                PayloadEncoding::Binary,
            )
            .unwrap();

        assert_eq!(bytes, vec![0x36, 0x06, b'f', b'o', b'o', 0x02, 0x02, b'x']);
    }

    #[test]
    fn test_union_encodes_integers_in_the_long_branch() {
        let schema = schema(&json!({
            "type": "record", "name": "Reading",
            "fields": [{"name": "units", "type": ["double", "long"]}]
        }));

        let bytes = Serializer::default()
            .serialize(&schema, &json!({"units": 7}), PayloadEncoding::Binary)
            .unwrap();

        assert_eq!(bytes, vec![0x02, 0x0E]);
    }

    #[test]
    fn test_oversized_block_count_is_malformed() {
        let schema = schema(&json!({
            "type": "record", "name": "Counts",
            "fields": [{"name": "values", "type": {"type": "array", "items": "long"}}]
        }));
        // Block count of 2^40 with no items behind it.
        let bytes = [0x80, 0x80, 0x80, 0x80, 0x80, 0x40];

        let result = Serializer::default().deserialize(&schema, &bytes, PayloadEncoding::Binary);

        assert!(matches!(result, Err(LedgerError::MalformedPayload(_))));
    }

    #[test]
    fn test_missing_fields_take_defaults_and_null() {
        let mut data = applicant();
        let obj = data.as_object_mut().unwrap();
        obj.remove("country");
        obj.remove("nickname");
        obj.remove("address");

        let normalized = Serializer::default().validate(&application(), &data).unwrap();

        assert_eq!(normalized["country"], json!("US"));
        assert_eq!(normalized["nickname"], Value::Null);
        assert_eq!(normalized["address"], Value::Null);
    }

    #[test]
    fn test_validation_collects_every_violation_with_paths() {
        let data = json!({
            "full_name": 42,
            "age": 36,
            "income": "lots",
            "ratio": 0.1,
            "employed": true,
            "tier": "bronze",
            "tags": ["ok", 7],
            "scores": {},
            "address": {"city": "London"},
            "favourite_colour": "green"
        });

        let err = Serializer::default()
            .validate(&application(), &data)
            .unwrap_err();

        let LedgerError::SchemaValidation(violations) = err else {
            panic!("expected SchemaValidation, got {err:?}");
        };
        let paths: Vec<&str> = violations.iter().map(|v| v.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "full_name",
                "income",
                "ratio",
                "tier",
                "tags[1]",
                "address.zip",
                "favourite_colour"
            ]
        );
    }

    #[test]
    fn test_lenient_mode_drops_undeclared_fields() {
        let mut data = applicant();
        data["favourite_colour"] = json!("green");

        let normalized = Serializer::new(false).validate(&application(), &data).unwrap();

        assert_eq!(normalized, applicant());
    }

    #[test]
    fn test_whole_numbers_in_floating_point_fields_round_trip_exactly() {
        // Arrange
        let schema = schema(&json!({
            "type": "record", "name": "Income",
            "fields": [
                {"name": "income", "type": "double"},
                {"name": "ratio", "type": "float"},
                {"name": "units", "type": ["double", "long"]}
            ]
        }));
        let serializer = Serializer::default();
        let cases = [
            json!({"income": 1200, "ratio": 2, "units": 7}),
            json!({"income": 1200.5, "ratio": 0.25, "units": 7.5}),
        ];

        for data in cases {
            for encoding in [PayloadEncoding::Binary, PayloadEncoding::Json] {
                // Act
                let bytes = serializer.serialize(&schema, &data, encoding).unwrap();
                let decoded = serializer.deserialize(&schema, &bytes, encoding).unwrap();

                // Assert
                assert_eq!(decoded, data, "{encoding:?}");
            }
        }
    }

    #[test]
    fn test_integral_floats_normalize_to_integers() {
        let schema = schema(&json!({
            "type": "record", "name": "Income",
            "fields": [{"name": "income", "type": "double"}]
        }));

        let normalized = Serializer::default()
            .validate(&schema, &json!({"income": 1200.0}))
            .unwrap();

        assert_eq!(normalized, json!({"income": 1200}));
    }

    #[test]
    fn test_truncated_and_trailing_bytes_are_malformed() {
        let serializer = Serializer::default();
        let schema = application();
        let bytes = serializer
            .serialize(&schema, &applicant(), PayloadEncoding::Binary)
            .unwrap();

        let truncated =
            serializer.deserialize(&schema, &bytes[..bytes.len() - 2], PayloadEncoding::Binary);
        let mut padded = bytes.clone();
        padded.push(0);
        let trailing = serializer.deserialize(&schema, &padded, PayloadEncoding::Binary);

        assert!(matches!(truncated, Err(LedgerError::MalformedPayload(_))));
        assert!(matches!(trailing, Err(LedgerError::MalformedPayload(_))));
    }

    #[test]
    fn test_json_payload_that_no_longer_conforms_is_malformed() {
        let result = Serializer::default().deserialize(
            &application(),
            br#"{"full_name": "Ada"}"#,
            PayloadEncoding::Json,
        );

        assert!(matches!(result, Err(LedgerError::MalformedPayload(_))));
    }
}
