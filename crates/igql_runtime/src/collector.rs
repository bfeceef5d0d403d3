//! Field collection.
//!
//! Walks a selection set against a concrete runtime type: inlines the
//! fragments whose type conditions apply, evaluates `@skip`/`@include`,
//! merges selections sharing a response key into [`FieldGroup`]s, and
//! partitions out the groups an active `@defer` removes from the
//! immediate result. Merged-field compatibility is an upstream
//! validation guarantee.

use crate::schema::Schema;
use crate::values::{bool_if_argument, resolve_input_value, VariableValues};
use igql_document::{Directive, FieldSelection, FragmentDefinition, Selection};
use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use std::sync::Arc;

/// Same-response-key field selections merged from fragments.
#[derive(Debug, Clone, Default)]
pub struct FieldGroup {
    pub fields: Vec<Arc<FieldSelection>>,
}

impl FieldGroup {
    /// The representative selection (first occurrence in document order).
    pub fn first(&self) -> &FieldSelection {
        &self.fields[0]
    }

    /// The sub-selection sets of every merged occurrence.
    pub fn selection_sets(&self) -> impl Iterator<Item = &[Selection]> {
        self.fields.iter().map(|f| f.selection_set.as_slice())
    }
}

/// A group of fields diverted out of the immediate result by `@defer`.
#[derive(Debug, Clone)]
pub struct DeferredGroup {
    pub label: Option<String>,
    pub fields: IndexMap<String, FieldGroup>,
}

/// An active `@stream` directive on a list field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDirective {
    pub label: Option<String>,
    pub initial_count: usize,
}

/// The outcome of collecting one selection set.
#[derive(Debug, Clone, Default)]
pub struct CollectedFields {
    /// Fields executed as part of the enclosing result, in declaration
    /// order after fragment merge.
    pub immediate: IndexMap<String, FieldGroup>,
    /// Field groups under an active `@defer`.
    pub deferred: Vec<DeferredGroup>,
}

/// Collects and merges the fields of one or more selection sets against
/// a runtime type.
///
/// Multiple selection sets arise when completing an object reached
/// through several merged field occurrences.
pub fn collect_fields<'a, I>(
    schema: &Schema,
    fragments: &FxHashMap<String, FragmentDefinition>,
    runtime_type: &str,
    selection_sets: I,
    variables: &VariableValues,
) -> CollectedFields
where
    I: IntoIterator<Item = &'a [Selection]>,
{
    let mut collected = CollectedFields::default();
    let mut visited = FxHashSet::default();
    for selection_set in selection_sets {
        visit_selections(
            schema,
            fragments,
            runtime_type,
            selection_set,
            variables,
            &mut visited,
            &mut collected,
        );
    }
    collected
}

fn visit_selections(
    schema: &Schema,
    fragments: &FxHashMap<String, FragmentDefinition>,
    runtime_type: &str,
    selection_set: &[Selection],
    variables: &VariableValues,
    visited: &mut FxHashSet<String>,
    out: &mut CollectedFields,
) {
    for selection in selection_set {
        match selection {
            Selection::Field(field) => {
                if !should_include(&field.directives, variables) {
                    continue;
                }
                out.immediate
                    .entry(field.response_key().to_string())
                    .or_default()
                    .fields
                    .push(Arc::new(field.clone()));
            }
            Selection::FragmentSpread(spread) => {
                if !should_include(&spread.directives, variables) {
                    continue;
                }
                if !visited.insert(spread.name.clone()) {
                    continue;
                }
                let Some(fragment) = fragments.get(&spread.name) else {
                    continue;
                };
                if !does_fragment_apply(schema, Some(&fragment.type_condition), runtime_type) {
                    continue;
                }
                match defer_label(&spread.directives, variables) {
                    Some(label) => collect_deferred(
                        schema,
                        fragments,
                        runtime_type,
                        &fragment.selection_set,
                        variables,
                        visited,
                        label,
                        out,
                    ),
                    None => visit_selections(
                        schema,
                        fragments,
                        runtime_type,
                        &fragment.selection_set,
                        variables,
                        visited,
                        out,
                    ),
                }
            }
            Selection::InlineFragment(inline) => {
                if !should_include(&inline.directives, variables) {
                    continue;
                }
                if !does_fragment_apply(schema, inline.type_condition.as_deref(), runtime_type) {
                    continue;
                }
                match defer_label(&inline.directives, variables) {
                    Some(label) => collect_deferred(
                        schema,
                        fragments,
                        runtime_type,
                        &inline.selection_set,
                        variables,
                        visited,
                        label,
                        out,
                    ),
                    None => visit_selections(
                        schema,
                        fragments,
                        runtime_type,
                        &inline.selection_set,
                        variables,
                        visited,
                        out,
                    ),
                }
            }
        }
    }
}

/// Collects a deferred fragment's fields into their own group.
///
/// Defers nested directly inside the deferred fragment become further
/// groups of their own.
#[allow(clippy::too_many_arguments)]
fn collect_deferred(
    schema: &Schema,
    fragments: &FxHashMap<String, FragmentDefinition>,
    runtime_type: &str,
    selection_set: &[Selection],
    variables: &VariableValues,
    visited: &mut FxHashSet<String>,
    label: Option<String>,
    out: &mut CollectedFields,
) {
    let mut inner = CollectedFields::default();
    visit_selections(
        schema,
        fragments,
        runtime_type,
        selection_set,
        variables,
        visited,
        &mut inner,
    );
    out.deferred.push(DeferredGroup {
        label,
        fields: inner.immediate,
    });
    out.deferred.extend(inner.deferred);
}

/// Evaluates `@skip`/`@include` against coerced variables.
pub fn should_include(directives: &[Directive], variables: &VariableValues) -> bool {
    for directive in directives {
        match directive.name.as_str() {
            "skip" if bool_if_argument(directive, variables, false) => return false,
            "include" if !bool_if_argument(directive, variables, true) => return false,
            _ => {}
        }
    }
    true
}

fn does_fragment_apply(schema: &Schema, condition: Option<&str>, runtime_type: &str) -> bool {
    match condition {
        None => true,
        Some(condition) if condition == runtime_type => true,
        Some(condition) => match schema.get_type(condition) {
            Some(ty) if ty.is_abstract() => schema.is_possible_type(condition, runtime_type),
            _ => false,
        },
    }
}

/// Returns `Some(label)` when an active `@defer` is present.
fn defer_label(directives: &[Directive], variables: &VariableValues) -> Option<Option<String>> {
    let directive = directives.iter().find(|d| d.name == "defer")?;
    if bool_if_argument(directive, variables, true) {
        Some(string_argument(directive, "label", variables))
    } else {
        None
    }
}

/// Reads an active `@stream` off a list field's merged group.
pub fn stream_directive(group: &FieldGroup, variables: &VariableValues) -> Option<StreamDirective> {
    let directive = group
        .first()
        .directives
        .iter()
        .find(|d| d.name == "stream")?;
    if !bool_if_argument(directive, variables, true) {
        return None;
    }
    let initial_count = directive
        .argument("initialCount")
        .and_then(|input| resolve_input_value(input, variables).ok().flatten())
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;
    Some(StreamDirective {
        label: string_argument(directive, "label", variables),
        initial_count,
    })
}

fn string_argument(
    directive: &Directive,
    name: &str,
    variables: &VariableValues,
) -> Option<String> {
    directive
        .argument(name)
        .and_then(|input| resolve_input_value(input, variables).ok().flatten())
        .and_then(|v| match v {
            Value::String(s) => Some(s),
            _ => None,
        })
}

/// Folds deferred groups back into the immediate set.
///
/// Plain (non-incremental) execution treats `@defer` as inert.
pub fn merge_deferred(
    immediate: &mut IndexMap<String, FieldGroup>,
    deferred: Vec<DeferredGroup>,
) {
    for group in deferred {
        for (key, fields) in group.fields {
            immediate
                .entry(key)
                .or_default()
                .fields
                .extend(fields.fields);
        }
    }
}
