//! Template variable extraction, classification, and validation.
//!
//! Template bodies carry `{{key}}` placeholders. A non-numeric key is a
//! NAMED variable (supplied parameters must carry a matching
//! `parameter_name`); a purely numeric key is POSITIONAL (parameters are
//! order-dependent and must not carry a name). Validation failures are
//! never hard errors: they produce a corrective payload with the required
//! variable list and a worked example the caller can copy.

use serde::{Deserialize, Serialize};
use serde_json::json;

use courant_provider::{ComponentKind, Template, TemplateParameterValue};

/// One `{{key}}` placeholder found in a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateVariable {
    pub key: String,
    pub named: bool,
    pub component: ComponentKind,
}

/// A template parameter as supplied by the caller.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TemplateParameterInput {
    #[serde(default)]
    pub parameter_name: Option<String>,
    pub value: String,
}

/// The corrective payload returned instead of a hard validation error.
#[derive(Debug, Clone, Serialize)]
pub struct CorrectiveError {
    pub message: String,
    pub required_variables: Vec<TemplateVariable>,
    pub example: serde_json::Value,
}

/// Extract every `{{key}}` placeholder per structural component, in order
/// of appearance. A key repeated within a component counts once.
pub fn extract_variables(template: &Template) -> Vec<TemplateVariable> {
    let mut variables: Vec<TemplateVariable> = Vec::new();
    for component in &template.components {
        let Some(ref text) = component.text else {
            continue;
        };
        for key in placeholder_keys(text) {
            if variables
                .iter()
                .any(|v| v.key == key && v.component == component.kind)
            {
                continue;
            }
            let named = !key.chars().all(|c| c.is_ascii_digit());
            variables.push(TemplateVariable {
                key,
                named,
                component: component.kind,
            });
        }
    }
    variables
}

fn placeholder_keys(text: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("{{") {
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            break;
        };
        let key = after[..close].trim();
        if !key.is_empty() {
            keys.push(key.to_string());
        }
        rest = &after[close + 2..];
    }
    keys
}

/// Build the worked example payload for a variable list.
fn example_parameters(variables: &[TemplateVariable]) -> serde_json::Value {
    let params: Vec<serde_json::Value> = variables
        .iter()
        .map(|v| {
            if v.named {
                json!({ "parameter_name": v.key, "value": format!("<{}>", v.key) })
            } else {
                json!({ "value": format!("<value {}>", v.key) })
            }
        })
        .collect();
    json!({ "parameters": params })
}

fn corrective(message: impl Into<String>, variables: &[TemplateVariable]) -> CorrectiveError {
    CorrectiveError {
        message: message.into(),
        required_variables: variables.to_vec(),
        example: example_parameters(variables),
    }
}

/// Validate supplied parameters against a template's variables.
///
/// On success returns the resolved values in provider wire order (named
/// values keep their names; positional values are ordered by their numeric
/// key) plus a preview of the body text with every placeholder substituted.
pub fn validate_parameters(
    template: &Template,
    supplied: &[TemplateParameterInput],
) -> Result<(Vec<TemplateParameterValue>, String), Box<CorrectiveError>> {
    let variables = extract_variables(template);

    if variables.is_empty() {
        if supplied.is_empty() {
            return Ok((Vec::new(), body_text(template).to_string()));
        }
        return Err(Box::new(corrective(
            format!(
                "template '{}' takes no variables but {} were supplied",
                template.name,
                supplied.len()
            ),
            &variables,
        )));
    }

    if supplied.is_empty() {
        return Err(Box::new(corrective(
            format!(
                "template '{}' requires {} variable(s); none were supplied",
                template.name,
                variables.len()
            ),
            &variables,
        )));
    }

    let named_vars: Vec<&TemplateVariable> = variables.iter().filter(|v| v.named).collect();
    let mut positional_vars: Vec<&TemplateVariable> =
        variables.iter().filter(|v| !v.named).collect();
    positional_vars.sort_by_key(|v| v.key.parse::<u64>().unwrap_or(u64::MAX));

    let named_inputs: Vec<&TemplateParameterInput> = supplied
        .iter()
        .filter(|p| p.parameter_name.is_some())
        .collect();
    let positional_inputs: Vec<&TemplateParameterInput> = supplied
        .iter()
        .filter(|p| p.parameter_name.is_none())
        .collect();

    // Named variables must arrive with their names attached; an unnamed
    // surplus means the caller forgot `parameter_name`.
    if !named_vars.is_empty() && positional_inputs.len() > positional_vars.len() {
        return Err(Box::new(corrective(
            format!(
                "template '{}' has named variables; each parameter for them must \
                 include a parameter_name matching the placeholder key",
                template.name
            ),
            &variables,
        )));
    }

    for input in &named_inputs {
        let name = input.parameter_name.as_deref().unwrap_or_default();
        if !named_vars.iter().any(|v| v.key == name) {
            return Err(Box::new(corrective(
                format!("template '{}' has no variable named '{name}'", template.name),
                &variables,
            )));
        }
    }

    let mut resolved: Vec<(String, String)> = Vec::new();

    for var in &named_vars {
        let Some(input) = named_inputs
            .iter()
            .find(|p| p.parameter_name.as_deref() == Some(var.key.as_str()))
        else {
            return Err(Box::new(corrective(
                format!(
                    "template '{}' is missing a value for named variable '{}'",
                    template.name, var.key
                ),
                &variables,
            )));
        };
        resolved.push((var.key.clone(), input.value.clone()));
    }

    if positional_inputs.len() < positional_vars.len() {
        return Err(Box::new(corrective(
            format!(
                "template '{}' requires {} positional value(s) in order; got {}",
                template.name,
                positional_vars.len(),
                positional_inputs.len()
            ),
            &variables,
        )));
    }
    if named_vars.is_empty() && positional_inputs.len() > positional_vars.len() {
        return Err(Box::new(corrective(
            format!(
                "template '{}' takes {} positional value(s); got {}",
                template.name,
                positional_vars.len(),
                positional_inputs.len()
            ),
            &variables,
        )));
    }

    for (var, input) in positional_vars.iter().zip(positional_inputs.iter()) {
        resolved.push((var.key.clone(), input.value.clone()));
    }

    let preview = substitute(body_text(template), &resolved);

    let wire: Vec<TemplateParameterValue> = resolved
        .iter()
        .map(|(key, value)| {
            let named = named_vars.iter().any(|v| &v.key == key);
            TemplateParameterValue {
                parameter_name: named.then(|| key.clone()),
                text: value.clone(),
            }
        })
        .collect();

    Ok((wire, preview))
}

fn body_text(template: &Template) -> &str {
    template
        .components
        .iter()
        .find(|c| c.kind == ComponentKind::Body)
        .and_then(|c| c.text.as_deref())
        .unwrap_or_default()
}

/// Substitute resolved values back into the body text: the preview of what
/// the provider will actually deliver.
fn substitute(body: &str, resolved: &[(String, String)]) -> String {
    let mut out = body.to_string();
    for (key, value) in resolved {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}
