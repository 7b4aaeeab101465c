//! Field mappings: declarative JSON documents whose string leaves are
//! templates.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use formledger_core::error::LedgerError;
use formledger_core::schema::SchemaRef;
use formledger_schema::{Schema, SchemaRegistry, Serializer};

use crate::template::Template;

/// A mapping as configured: which aggregate it applies to, what it renders
/// and, optionally, the schema version its output must satisfy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub name: String,
    pub aggregate_type: String,
    #[serde(default)]
    pub target_schema: Option<SchemaRef>,
    pub template: Value,
}

/// A JSON template tree with every templated string leaf compiled.
#[derive(Debug, Clone, PartialEq)]
pub enum MappingTemplate {
    Static(Value),
    Template(Template),
    Array(Vec<MappingTemplate>),
    Object(Vec<(String, MappingTemplate)>),
}

fn is_templated(text: &str) -> bool {
    text.contains("{{") || text.contains("{%")
}

impl MappingTemplate {
    /// Compiles every string leaf that contains template syntax.
    ///
    /// # Errors
    ///
    /// `Configuration` naming the first leaf that fails to compile.
    pub fn compile(document: &Value) -> Result<Self, LedgerError> {
        Self::compile_at(document, "")
    }

    fn compile_at(document: &Value, at: &str) -> Result<Self, LedgerError> {
        Ok(match document {
            Value::String(text) if is_templated(text) => {
                Self::Template(Template::compile(text).map_err(|e| match e {
                    LedgerError::Configuration(m) if !at.is_empty() => {
                        LedgerError::Configuration(format!("{at}: {m}"))
                    }
                    other => other,
                })?)
            }
            Value::Array(items) => Self::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| Self::compile_at(item, &format!("{at}[{i}]")))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(key, item)| {
                        let path = if at.is_empty() {
                            key.clone()
                        } else {
                            format!("{at}.{key}")
                        };
                        Ok((key.clone(), Self::compile_at(item, &path)?))
                    })
                    .collect::<Result<_, LedgerError>>()?,
            ),
            other => Self::Static(other.clone()),
        })
    }

    /// Renders the tree against `context`.
    ///
    /// # Errors
    ///
    /// The first error any leaf raises.
    pub fn render(&self, context: &Value) -> Result<Value, LedgerError> {
        Ok(match self {
            Self::Static(value) => value.clone(),
            Self::Template(template) => template.render(context)?,
            Self::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| item.render(context))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Object(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (key, item) in entries {
                    map.insert(key.clone(), item.render(context)?);
                }
                Value::Object(map)
            }
        })
    }
}

/// A mapping ready to render.
#[derive(Debug)]
pub struct CompiledMapping {
    name: String,
    aggregate_type: String,
    target: Option<(SchemaRef, Arc<Schema>)>,
    template: MappingTemplate,
}

impl CompiledMapping {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    #[must_use]
    pub fn target_schema(&self) -> Option<&SchemaRef> {
        self.target.as_ref().map(|(schema_ref, _)| schema_ref)
    }

    /// Renders the mapping and, when it has a target schema, validates the
    /// output against it.
    ///
    /// # Errors
    ///
    /// Rendering errors, or `SchemaValidation` if the output does not fit
    /// the target schema.
    pub fn render(&self, context: &Value) -> Result<Value, LedgerError> {
        let output = self.template.render(context)?;
        match &self.target {
            Some((_, schema)) => Serializer::default().validate(schema, &output),
            None => Ok(output),
        }
    }
}

/// Every configured mapping, compiled and keyed by aggregate type.
#[derive(Debug, Default)]
pub struct MappingCatalog {
    by_aggregate: HashMap<String, Arc<CompiledMapping>>,
}

impl MappingCatalog {
    /// Compiles `mappings` and resolves their target schemas.
    ///
    /// # Errors
    ///
    /// `Configuration` on a template error or when two mappings claim the
    /// same aggregate type; `SchemaNotFound` for an unknown target schema.
    #[tracing::instrument(skip_all, fields(mappings = mappings.len()))]
    pub async fn build(
        mappings: Vec<FieldMapping>,
        registry: &SchemaRegistry,
    ) -> Result<Self, LedgerError> {
        let mut by_aggregate = HashMap::with_capacity(mappings.len());
        for mapping in mappings {
            if by_aggregate.contains_key(&mapping.aggregate_type) {
                return Err(LedgerError::Configuration(format!(
                    "more than one mapping for aggregate type '{}'",
                    mapping.aggregate_type
                )));
            }
            let template = MappingTemplate::compile(&mapping.template).map_err(|e| match e {
                LedgerError::Configuration(m) => {
                    LedgerError::Configuration(format!("mapping '{}': {m}", mapping.name))
                }
                other => other,
            })?;
            let target = match mapping.target_schema {
                Some(schema_ref) => {
                    let schema = registry.resolve(&schema_ref).await?;
                    Some((schema_ref, schema))
                }
                None => None,
            };
            tracing::debug!(mapping = %mapping.name, aggregate_type = %mapping.aggregate_type, "mapping compiled");
            by_aggregate.insert(
                mapping.aggregate_type.clone(),
                Arc::new(CompiledMapping {
                    name: mapping.name,
                    aggregate_type: mapping.aggregate_type,
                    target,
                    template,
                }),
            );
        }
        Ok(Self { by_aggregate })
    }

    /// The mapping for `aggregate_type`, if one is configured.
    #[must_use]
    pub fn for_aggregate(&self, aggregate_type: &str) -> Option<Arc<CompiledMapping>> {
        self.by_aggregate.get(aggregate_type).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_aggregate.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_aggregate.is_empty()
    }
}
