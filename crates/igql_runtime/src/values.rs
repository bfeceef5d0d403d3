//! Variable and argument coercion.
//!
//! Runs before any field resolver: a bad variable value is a request
//! error and produces an errors-only response. Argument resolution
//! substitutes variables into literal argument trees and applies
//! declared defaults. Deep input validation is an upstream concern; the
//! checks here are the ones execution itself depends on.

use crate::executor::RequestError;
use crate::resolver::ResolverArgs;
use crate::schema::{Schema, TypeDef};
use igql_document::{
    FieldSelection, InputValue, OperationDefinition, TypeAnnotation,
};
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::schema::FieldDef;

/// Coerced variable values for one execution.
pub type VariableValues = FxHashMap<String, Value>;

/// Coerces raw JSON variable values against an operation's definitions.
pub fn coerce_variable_values(
    schema: &Schema,
    operation: &OperationDefinition,
    raw: &serde_json::Map<String, Value>,
) -> Result<VariableValues, RequestError> {
    let mut coerced = VariableValues::default();

    for def in &operation.variable_definitions {
        match raw.get(&def.name) {
            Some(value) => {
                if value.is_null() && def.ty.is_non_null() {
                    return Err(RequestError::InvalidVariable(
                        def.name.clone(),
                        "null provided for non-null type".to_string(),
                    ));
                }
                check_input_kind(schema, &def.ty, value)
                    .map_err(|e| RequestError::InvalidVariable(def.name.clone(), e))?;
                coerced.insert(def.name.clone(), value.clone());
            }
            None => {
                if let Some(default) = &def.default_value {
                    // Defaults are const values; a variable here would have
                    // been rejected upstream.
                    if let Some(value) = default.to_json() {
                        coerced.insert(def.name.clone(), value);
                    }
                } else if def.ty.is_non_null() {
                    return Err(RequestError::MissingVariable(
                        def.name.clone(),
                        render_annotation(&def.ty),
                    ));
                }
            }
        }
    }

    Ok(coerced)
}

fn render_annotation(ty: &TypeAnnotation) -> String {
    match ty {
        TypeAnnotation::Named(name) => name.clone(),
        TypeAnnotation::List(inner) => format!("[{}]", render_annotation(inner)),
        TypeAnnotation::NonNull(inner) => format!("{}!", render_annotation(inner)),
    }
}

/// Shallow kind check for a provided variable value.
fn check_input_kind(schema: &Schema, ty: &TypeAnnotation, value: &Value) -> Result<(), String> {
    match ty {
        TypeAnnotation::NonNull(inner) => {
            if value.is_null() {
                return Err("null provided for non-null type".to_string());
            }
            check_input_kind(schema, inner, value)
        }
        _ if value.is_null() => Ok(()),
        TypeAnnotation::List(inner) => match value {
            // A single value coerces to a one-element list.
            Value::Array(items) => items
                .iter()
                .try_for_each(|item| check_input_kind(schema, inner, item)),
            other => check_input_kind(schema, inner, other),
        },
        TypeAnnotation::Named(name) => match schema.get_type(name) {
            Some(TypeDef::Scalar(_)) => check_scalar_kind(name, value),
            Some(TypeDef::Enum(e)) => match value {
                Value::String(s) if e.has_value(s) => Ok(()),
                other => Err(format!("invalid value for enum {name}: {other}")),
            },
            Some(TypeDef::InputObject(input)) => match value {
                Value::Object(map) => {
                    for (field_name, field_def) in &input.fields {
                        let provided = map.get(field_name);
                        if provided.map_or(true, Value::is_null)
                            && field_def.ty.is_non_null()
                            && field_def.default_value.is_none()
                        {
                            return Err(format!(
                                "missing required input field '{field_name}' on {name}"
                            ));
                        }
                    }
                    Ok(())
                }
                other => Err(format!("expected an input object for {name}, got {other}")),
            },
            _ => Ok(()),
        },
    }
}

fn check_scalar_kind(name: &str, value: &Value) -> Result<(), String> {
    let ok = match name {
        "Int" => matches!(value, Value::Number(n) if n.is_i64() || n.is_u64()),
        "Float" => value.is_number(),
        "String" => value.is_string(),
        "Boolean" => value.is_boolean(),
        "ID" => value.is_string() || matches!(value, Value::Number(n) if n.is_i64() || n.is_u64()),
        // Custom scalars accept any input here.
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(format!("invalid value for scalar {name}: {value}"))
    }
}

/// Substitutes variables into an input value tree.
///
/// `Ok(None)` means the value is absent (an unset variable), which is
/// distinct from an explicit null.
pub fn resolve_input_value(
    input: &InputValue,
    variables: &VariableValues,
) -> Result<Option<Value>, String> {
    match input {
        InputValue::Variable(name) => Ok(variables.get(name).cloned()),
        InputValue::Int(i) => Ok(Some(Value::from(*i))),
        InputValue::Float(f) => Ok(serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .or(Some(Value::Null))),
        InputValue::String(s) | InputValue::Enum(s) => Ok(Some(Value::String(s.clone()))),
        InputValue::Boolean(b) => Ok(Some(Value::Bool(*b))),
        InputValue::Null => Ok(Some(Value::Null)),
        InputValue::List(items) => {
            let mut resolved = Vec::with_capacity(items.len());
            for item in items {
                // An unset variable inside a list becomes null.
                resolved.push(resolve_input_value(item, variables)?.unwrap_or(Value::Null));
            }
            Ok(Some(Value::Array(resolved)))
        }
        InputValue::Object(fields) => {
            let mut map = serde_json::Map::new();
            for (key, value) in fields {
                if let Some(resolved) = resolve_input_value(value, variables)? {
                    map.insert(key.clone(), resolved);
                }
            }
            Ok(Some(Value::Object(map)))
        }
    }
}

/// Resolves a field's argument values against its definition.
pub fn resolve_arguments(
    field_def: &FieldDef,
    field: &FieldSelection,
    variables: &VariableValues,
) -> Result<ResolverArgs, String> {
    let mut args = ResolverArgs::new();

    for (arg_name, arg_def) in &field_def.arguments {
        let provided = field
            .arguments
            .iter()
            .find(|(name, _)| name == arg_name)
            .map(|(_, value)| value);

        let resolved = match provided {
            Some(input) => resolve_input_value(input, variables)?,
            None => None,
        };

        match resolved {
            Some(value) => {
                if value.is_null() && arg_def.ty.is_non_null() {
                    return Err(format!(
                        "Argument '{arg_name}' of non-null type '{}' must not be null",
                        arg_def.ty
                    ));
                }
                args.set(arg_name.clone(), value);
            }
            None => {
                if let Some(default) = &arg_def.default_value {
                    if let Some(value) = default.to_json() {
                        args.set(arg_name.clone(), value);
                    }
                } else if arg_def.ty.is_non_null() {
                    return Err(format!(
                        "Argument '{arg_name}' of required type '{}' was not provided",
                        arg_def.ty
                    ));
                }
            }
        }
    }

    Ok(args)
}

/// Evaluates a directive's boolean `if` argument.
pub fn bool_if_argument(
    directive: &igql_document::Directive,
    variables: &VariableValues,
    default: bool,
) -> bool {
    match directive.argument("if") {
        Some(input) => match resolve_input_value(input, variables) {
            Ok(Some(Value::Bool(b))) => b,
            _ => default,
        },
        None => default,
    }
}
