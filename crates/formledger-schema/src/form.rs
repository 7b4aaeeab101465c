//! Form definitions and the record schemas generated from them.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use formledger_core::error::LedgerError;

use crate::model::Schema;

/// Answer type of a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    #[default]
    Text,
    Number,
    Decimal,
    Boolean,
    Choice,
    MultiChoice,
}

/// One question of a form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    /// Field name in the submission payload.
    pub key: String,
    /// Text shown to the respondent; kept as the field's `doc`.
    pub label: String,
    #[serde(default)]
    pub kind: QuestionKind,
    #[serde(default = "required_by_default")]
    pub required: bool,
    /// Allowed answers for `choice` and `multi_choice`.
    #[serde(default)]
    pub options: Vec<String>,
}

fn required_by_default() -> bool {
    true
}

/// A form as authored by the form-definition collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormDefinition {
    /// Aggregate type submissions of this form are tagged with.
    pub aggregate_type: String,
    /// Schema name.
    pub name: String,
    /// Schema namespace.
    pub namespace: String,
    #[serde(default)]
    pub description: Option<String>,
    pub questions: Vec<Question>,
}

impl FormDefinition {
    /// Builds the record definition for this form. Optional questions become
    /// `["null", T]` unions.
    ///
    /// # Errors
    ///
    /// `Configuration` if the form has no questions, a question is
    /// malformed, or the result is not a valid schema.
    pub fn to_definition(&self) -> Result<Value, LedgerError> {
        if self.questions.is_empty() {
            return Err(LedgerError::Configuration(format!(
                "form {} has no questions",
                self.name
            )));
        }

        let fields = self
            .questions
            .iter()
            .map(|q| self.field(q))
            .collect::<Result<Vec<_>, _>>()?;

        let mut definition = json!({
            "type": "record",
            "name": self.name,
            "namespace": self.namespace,
            "fields": fields,
        });
        if let Some(description) = &self.description {
            definition["doc"] = Value::String(description.clone());
        }

        // Parse once so a bad form fails here rather than at registration.
        Schema::parse(&definition)?;
        Ok(definition)
    }

    /// Parsed schema for this form.
    ///
    /// # Errors
    ///
    /// As [`FormDefinition::to_definition`].
    pub fn to_schema(&self) -> Result<Schema, LedgerError> {
        Schema::parse(&self.to_definition()?)
    }

    fn field(&self, question: &Question) -> Result<Value, LedgerError> {
        let invalid = |reason: &str| {
            LedgerError::Configuration(format!(
                "form {} question '{}': {reason}",
                self.name, question.key
            ))
        };
        if question.key.trim().is_empty() {
            return Err(invalid("key must not be empty"));
        }

        let choice = || {
            json!({
                "type": "enum",
                "name": format!("{}_{}", self.name, question.key),
                "symbols": question.options,
            })
        };
        let is_choice = matches!(question.kind, QuestionKind::Choice | QuestionKind::MultiChoice);
        if is_choice && question.options.is_empty() {
            return Err(invalid("choice questions need options"));
        }
        if !is_choice && !question.options.is_empty() {
            return Err(invalid("options only apply to choice questions"));
        }

        let value_type = match question.kind {
            QuestionKind::Text => json!("string"),
            QuestionKind::Number => json!("long"),
            QuestionKind::Decimal => json!("double"),
            QuestionKind::Boolean => json!("boolean"),
            QuestionKind::Choice => choice(),
            QuestionKind::MultiChoice => json!({"type": "array", "items": choice()}),
        };

        let field_type = if question.required {
            value_type
        } else {
            json!(["null", value_type])
        };
        Ok(json!({"name": question.key, "type": field_type, "doc": question.label}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Serializer;

    fn questionnaire() -> FormDefinition {
        form_from(json!({
            "aggregate_type": "w9",
            "name": "W9",
            "namespace": "forms.tax",
            "description": "Request for taxpayer identification",
            "questions": [
                {"key": "legal_name", "label": "Legal name"},
                {"key": "tin", "label": "Taxpayer identification number"},
                {"key": "employees", "label": "Employees", "kind": "number", "required": false},
                {"key": "entity", "label": "Entity type", "kind": "choice",
                 "options": ["individual", "corporation", "partnership"]},
                {"key": "exempt", "label": "Exempt payee", "kind": "boolean", "required": false}
            ]
        }))
    }

    fn form_from(value: Value) -> FormDefinition {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_definition_maps_question_kinds() {
        let definition = questionnaire().to_definition().unwrap();

        let fields = definition["fields"].as_array().unwrap();
        assert_eq!(fields[0]["type"], json!("string"));
        assert_eq!(fields[0]["doc"], json!("Legal name"));
        assert_eq!(fields[2]["type"], json!(["null", "long"]));
        assert_eq!(fields[3]["type"]["type"], json!("enum"));
        assert_eq!(fields[3]["type"]["name"], json!("W9_entity"));
        assert_eq!(definition["doc"], json!("Request for taxpayer identification"));
    }

    #[test]
    fn test_optional_questions_may_be_omitted() {
        let schema = questionnaire().to_schema().unwrap();

        let normalized = Serializer::default()
            .validate(
                &schema,
                &json!({"legal_name": "Acme", "tin": "123456789", "entity": "corporation"}),
            )
            .unwrap();

        assert_eq!(normalized["employees"], Value::Null);
        assert_eq!(normalized["exempt"], Value::Null);
    }

    #[test]
    fn test_malformed_forms_are_configuration_errors() {
        let mut no_options = questionnaire();
        no_options.questions[3].options.clear();
        let mut stray_options = questionnaire();
        stray_options.questions[0].options = vec!["a".into()];
        let mut duplicate = questionnaire();
        duplicate.questions[1].key = "legal_name".into();
        let mut empty = questionnaire();
        empty.questions.clear();

        for form in [no_options, stray_options, duplicate, empty] {
            assert!(matches!(
                form.to_definition(),
                Err(LedgerError::Configuration(_))
            ));
        }
    }
}
