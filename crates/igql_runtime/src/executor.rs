//! Query execution for igql.
//!
//! The completion engine is type-directed: a field's declared type
//! decides how its resolved value becomes a response value, lists and
//! objects recurse, and non-null violations bubble to the nearest
//! nullable ancestor. Errors are recorded positionally and never abort
//! the whole invocation.

use crate::collector::{
    collect_fields, merge_deferred, stream_directive, CollectedFields, FieldGroup,
};
use crate::incremental::IncrementalState;
use crate::path::{Path, PathSegment};
use crate::resolver::{ResolverInfo, ResolverMap};
use crate::schema::{Schema, TypeDef, TypeRef};
use crate::values::{coerce_variable_values, resolve_arguments, VariableValues};
use futures::future::{join_all, BoxFuture};
use igql_document::{Document, FragmentDefinition, OperationDefinition, OperationKind};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Channel capacity for incremental delivery payloads.
    pub payload_buffer: usize,
    /// Channel capacity for subscription responses.
    pub event_buffer: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            payload_buffer: 16,
            event_buffer: 16,
        }
    }
}

/// The query executor.
pub struct Executor {
    config: ExecutorConfig,
    resolvers: Arc<ResolverMap>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .finish()
    }
}

impl Executor {
    /// Creates a new executor.
    pub fn new() -> Self {
        Self {
            config: ExecutorConfig::default(),
            resolvers: Arc::new(ResolverMap::new()),
        }
    }

    /// Creates an executor with resolvers.
    pub fn with_resolvers(resolvers: ResolverMap) -> Self {
        Self {
            config: ExecutorConfig::default(),
            resolvers: Arc::new(resolvers),
        }
    }

    /// Creates an executor with config and resolvers.
    pub fn new_with(config: ExecutorConfig, resolvers: ResolverMap) -> Self {
        Self {
            config,
            resolvers: Arc::new(resolvers),
        }
    }

    /// Gets a reference to the resolvers.
    pub fn resolvers(&self) -> &ResolverMap {
        &self.resolvers
    }

    pub(crate) fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Executes an operation to a single result.
    ///
    /// `@defer`/`@stream` directives are inert here; use
    /// [`Executor::execute_incremental`] for incremental delivery.
    pub async fn execute(
        &self,
        schema: &Schema,
        document: &Document,
        operation_name: Option<&str>,
        root_value: Value,
        ctx: &Context,
        variables: &serde_json::Map<String, Value>,
    ) -> Response {
        let (operation, root_type, coerced) =
            match prepare_request(schema, document, operation_name, variables) {
                Ok(prepared) => prepared,
                Err(e) => return Response::request_error(e),
            };

        tracing::debug!(
            operation = operation.name.as_deref().unwrap_or("<anonymous>"),
            kind = ?operation.kind,
            "executing operation"
        );

        let exec_ctx = self.build_context(schema, document, coerced, ctx.clone(), None);
        let data = execute_operation(&exec_ctx, operation, &root_type, root_value).await;
        let errors = exec_ctx.take_errors().await;

        Response {
            data: Some(data),
            errors: if errors.is_empty() {
                None
            } else {
                Some(errors)
            },
            extensions: None,
        }
    }

    pub(crate) fn build_context(
        &self,
        schema: &Schema,
        document: &Document,
        variables: VariableValues,
        ctx: Context,
        incremental: Option<IncrementalState>,
    ) -> ExecutionContext {
        let fragments: FxHashMap<String, FragmentDefinition> = document
            .fragments
            .iter()
            .map(|f| (f.name.clone(), f.clone()))
            .collect();
        ExecutionContext {
            schema: Arc::new(schema.clone()),
            fragments: Arc::new(fragments),
            variables: Arc::new(variables),
            ctx,
            resolvers: Arc::clone(&self.resolvers),
            errors: Arc::new(RwLock::new(Vec::new())),
            incremental,
        }
    }
}

/// Selects the operation, its root type, and the coerced variables.
pub(crate) fn prepare_request<'a>(
    schema: &Schema,
    document: &'a Document,
    operation_name: Option<&str>,
    variables: &serde_json::Map<String, Value>,
) -> Result<(&'a OperationDefinition, String, VariableValues), RequestError> {
    let operation = select_operation(document, operation_name)?;
    let root_type = schema
        .root_type(operation.kind)
        .ok_or(RequestError::UnsupportedOperation(kind_name(operation.kind)))?
        .to_string();
    let coerced = coerce_variable_values(schema, operation, variables)?;
    Ok((operation, root_type, coerced))
}

pub(crate) fn select_operation<'a>(
    document: &'a Document,
    operation_name: Option<&str>,
) -> Result<&'a OperationDefinition, RequestError> {
    if document.operations.is_empty() {
        return Err(RequestError::NoOperation);
    }
    document
        .operation(operation_name)
        .ok_or_else(|| match operation_name {
            Some(name) => RequestError::UnknownOperation(name.to_string()),
            None => RequestError::AmbiguousOperation,
        })
}

fn kind_name(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::Query => "query",
        OperationKind::Mutation => "mutation",
        OperationKind::Subscription => "subscription",
    }
}

/// Executes an operation's root selection set, returning the `data`
/// value (`null` when root bubbling nulled it).
pub(crate) async fn execute_operation(
    ctx: &ExecutionContext,
    operation: &OperationDefinition,
    root_type: &str,
    root_value: Value,
) -> Value {
    let mut collected = collect_fields(
        &ctx.schema,
        &ctx.fragments,
        root_type,
        [operation.selection_set.as_slice()],
        &ctx.variables,
    );
    handle_deferred(ctx, root_type, &root_value, None, &mut collected).await;

    // Mutation root fields run serially; everything else joins eagerly
    // launched siblings.
    let serial = operation.kind == OperationKind::Mutation;
    match execute_groups(ctx, root_type, &root_value, &collected.immediate, None, serial).await {
        Ok(map) => Value::Object(map),
        Err(Bubble) => {
            // Root nullification swallows every pending record beneath it.
            ctx.note_nulled(Vec::new()).await;
            Value::Null
        }
    }
}

/// Registers deferred groups with the incremental publisher, or folds
/// them back into the immediate set when running non-incrementally.
async fn handle_deferred(
    ctx: &ExecutionContext,
    type_name: &str,
    source: &Value,
    path: Option<&Arc<Path>>,
    collected: &mut CollectedFields,
) {
    if collected.deferred.is_empty() {
        return;
    }
    match &ctx.incremental {
        Some(incremental) => {
            for group in collected.deferred.drain(..) {
                incremental
                    .register_defer(type_name, source, path, group)
                    .await;
            }
        }
        None => merge_deferred(
            &mut collected.immediate,
            std::mem::take(&mut collected.deferred),
        ),
    }
}

/// Marker for a non-null violation travelling up the completion tree.
///
/// The originating error is already recorded when this is raised; a
/// nullable position absorbs it into a `null`.
pub(crate) struct Bubble;

/// Executes a set of merged field groups against one source object.
pub(crate) async fn execute_groups(
    ctx: &ExecutionContext,
    type_name: &str,
    source: &Value,
    groups: &IndexMap<String, FieldGroup>,
    parent_path: Option<&Arc<Path>>,
    serial: bool,
) -> Result<serde_json::Map<String, Value>, Bubble> {
    let mut map = serde_json::Map::new();
    let mut failed = false;

    if serial {
        for (key, group) in groups {
            let completed = execute_field(ctx, type_name, source, key, group, parent_path).await;
            match completed {
                Ok(value) => {
                    map.insert(key.clone(), value);
                }
                Err(Bubble) => failed = true,
            }
        }
    } else {
        // Launch every sibling resolver before awaiting any of them.
        let futures: Vec<_> = groups
            .iter()
            .map(|(key, group)| execute_field(ctx, type_name, source, key, group, parent_path))
            .collect();
        let results = join_all(futures).await;
        for ((key, _), completed) in groups.iter().zip(results) {
            match completed {
                Ok(value) => {
                    map.insert(key.clone(), value);
                }
                Err(Bubble) => failed = true,
            }
        }
    }

    if failed {
        Err(Bubble)
    } else {
        Ok(map)
    }
}

/// Resolves and completes one field group.
async fn execute_field(
    ctx: &ExecutionContext,
    parent_type: &str,
    source: &Value,
    response_key: &str,
    group: &FieldGroup,
    parent_path: Option<&Arc<Path>>,
) -> Result<Value, Bubble> {
    let path = match parent_path {
        Some(parent) => parent.child_key(response_key),
        None => Path::root(response_key),
    };
    let field = group.first();

    if field.name == "__typename" {
        return Ok(Value::String(parent_type.to_string()));
    }

    let Some(field_def) = ctx.schema.field_def(parent_type, &field.name) else {
        // Upstream validation should make this unreachable.
        tracing::warn!(
            field = %field.name,
            parent = %parent_type,
            "executing a field the schema does not define"
        );
        ctx.record_error(
            FieldError::new(format!(
                "Unknown field '{}' on type '{parent_type}'",
                field.name
            ))
            .with_path(path.to_segments()),
        )
        .await;
        return Ok(Value::Null);
    };

    let args = match resolve_arguments(field_def, field, &ctx.variables) {
        Ok(args) => args,
        Err(message) => {
            ctx.record_error(FieldError::new(message).with_path(path.to_segments()))
                .await;
            return fail_position(ctx, &field_def.ty, &path).await;
        }
    };

    let info = ResolverInfo::new(&field.name, parent_type)
        .with_return_type(field_def.ty.to_string())
        .with_path(path.to_segments());

    let resolved = match ctx.resolvers.get(parent_type, &field.name) {
        Some(resolver) => resolver.resolve(source, &args, &ctx.ctx, &info).await,
        None => Ok(source.get(&field.name).cloned().unwrap_or(Value::Null)),
    };

    match resolved {
        Ok(value) => complete_value(ctx, &field_def.ty, group, path, value).await,
        Err(e) => {
            tracing::debug!(
                field = %field.name,
                parent = %parent_type,
                error = %e,
                "field resolver failed"
            );
            ctx.record_error(FieldError::new(e.to_string()).with_path(path.to_segments()))
                .await;
            fail_position(ctx, &field_def.ty, &path).await
        }
    }
}

/// Converts an already-recorded failure at `path` into the position's
/// outcome: bubble through non-null, absorb to null otherwise.
async fn fail_position(
    ctx: &ExecutionContext,
    ty: &TypeRef,
    path: &Arc<Path>,
) -> Result<Value, Bubble> {
    if ty.is_non_null() {
        Err(Bubble)
    } else {
        ctx.note_nulled(path.to_segments()).await;
        Ok(Value::Null)
    }
}

/// Completes a resolved value at a position of the given type.
///
/// `Err(Bubble)` escapes only through a non-null position; the one
/// mandatory rethrow of the engine lives in the `NonNull` arm.
pub(crate) fn complete_value<'a>(
    ctx: &'a ExecutionContext,
    ty: &'a TypeRef,
    group: &'a FieldGroup,
    path: Arc<Path>,
    value: Value,
) -> BoxFuture<'a, Result<Value, Bubble>> {
    Box::pin(async move {
        match ty {
            TypeRef::NonNull(inner) => {
                let completed =
                    complete_inner(ctx, inner, group, path.clone(), value, true).await?;
                if completed.is_null() {
                    ctx.record_error(
                        FieldError::new(format!(
                            "Cannot return null for non-nullable field '{}'",
                            group.first().name
                        ))
                        .with_path(path.to_segments()),
                    )
                    .await;
                    Err(Bubble)
                } else {
                    Ok(completed)
                }
            }
            _ => match complete_inner(ctx, ty, group, path.clone(), value, false).await {
                Ok(completed) => Ok(completed),
                Err(Bubble) => {
                    ctx.note_nulled(path.to_segments()).await;
                    Ok(Value::Null)
                }
            },
        }
    })
}

/// Completes the unwrapped (nullability-stripped) part of a type.
async fn complete_inner(
    ctx: &ExecutionContext,
    ty: &TypeRef,
    group: &FieldGroup,
    path: Arc<Path>,
    value: Value,
    enclosing_non_null: bool,
) -> Result<Value, Bubble> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    match ty {
        // Nested non-null wrappers are invalid upstream; recurse anyway.
        TypeRef::NonNull(_) => complete_value(ctx, ty, group, path, value).await,
        TypeRef::List(inner) => {
            complete_list(ctx, inner, group, path, value, enclosing_non_null).await
        }
        TypeRef::Named(name) => match ctx.schema.get_type(name) {
            Some(TypeDef::Scalar(scalar)) => match scalar.serialize_value(&value) {
                Ok(serialized) => Ok(serialized),
                Err(message) => {
                    ctx.record_error(FieldError::new(message).with_path(path.to_segments()))
                        .await;
                    Err(Bubble)
                }
            },
            Some(TypeDef::Enum(e)) => match &value {
                Value::String(s) if e.has_value(s) => Ok(value),
                other => {
                    ctx.record_error(
                        FieldError::new(format!("Enum '{name}' cannot represent value: {other}"))
                            .with_path(path.to_segments()),
                    )
                    .await;
                    Err(Bubble)
                }
            },
            Some(TypeDef::Object(_)) => complete_object(ctx, name, group, path, value).await,
            Some(TypeDef::Interface(iface)) => {
                let resolve_type = iface.resolve_type.clone();
                complete_abstract(ctx, name, resolve_type, group, path, value).await
            }
            Some(TypeDef::Union(union)) => {
                let resolve_type = union.resolve_type.clone();
                complete_abstract(ctx, name, resolve_type, group, path, value).await
            }
            _ => {
                ctx.record_error(
                    FieldError::new(format!("Cannot complete value of unknown type '{name}'"))
                        .with_path(path.to_segments()),
                )
                .await;
                Err(Bubble)
            }
        },
    }
}

/// Completes a list value, splitting off a stream tail when an active
/// `@stream` applies and the execution is incremental.
async fn complete_list(
    ctx: &ExecutionContext,
    inner: &TypeRef,
    group: &FieldGroup,
    path: Arc<Path>,
    value: Value,
    enclosing_non_null: bool,
) -> Result<Value, Bubble> {
    let Value::Array(mut items) = value else {
        ctx.record_error(
            FieldError::new(format!(
                "Expected a list for field '{}'",
                group.first().name
            ))
            .with_path(path.to_segments()),
        )
        .await;
        return Err(Bubble);
    };

    let stream = match &ctx.incremental {
        Some(_) => stream_directive(group, &ctx.variables),
        None => None,
    };
    let tail = match &stream {
        Some(directive) if directive.initial_count < items.len() => {
            Some(items.split_off(directive.initial_count))
        }
        _ => None,
    };

    // Item completions are independent: launch all, join in index order.
    let futures: Vec<_> = items
        .into_iter()
        .enumerate()
        .map(|(i, item)| complete_value(ctx, inner, group, path.child_index(i), item))
        .collect();
    let results = join_all(futures).await;

    let mut completed = Vec::with_capacity(results.len());
    for (i, result) in results.into_iter().enumerate() {
        match result {
            Ok(value) => completed.push(value),
            // An item-level non-null violation nulls only that slot,
            // unless the list itself sits under a non-null wrapper.
            Err(Bubble) => {
                if enclosing_non_null {
                    return Err(Bubble);
                }
                ctx.note_nulled(path.child_index(i).to_segments()).await;
                completed.push(Value::Null);
            }
        }
    }

    if let (Some(directive), Some(tail), Some(incremental)) = (stream, tail, &ctx.incremental) {
        incremental
            .register_stream(
                directive.label,
                &path,
                inner.clone(),
                group.clone(),
                tail,
                completed.len(),
            )
            .await;
    }

    Ok(Value::Array(completed))
}

/// Completes a composite value against a concrete object type.
async fn complete_object(
    ctx: &ExecutionContext,
    object_name: &str,
    group: &FieldGroup,
    path: Arc<Path>,
    value: Value,
) -> Result<Value, Bubble> {
    if !value.is_object() {
        ctx.record_error(
            FieldError::new(format!(
                "Expected an object value for type '{object_name}'"
            ))
            .with_path(path.to_segments()),
        )
        .await;
        return Err(Bubble);
    }
    let mut collected = collect_fields(
        &ctx.schema,
        &ctx.fragments,
        object_name,
        group.selection_sets(),
        &ctx.variables,
    );
    handle_deferred(ctx, object_name, &value, Some(&path), &mut collected).await;
    execute_groups(
        ctx,
        object_name,
        &value,
        &collected.immediate,
        Some(&path),
        false,
    )
    .await
    .map(Value::Object)
}

/// Resolves an abstract type's runtime type, then completes as object.
async fn complete_abstract(
    ctx: &ExecutionContext,
    abstract_name: &str,
    resolve_type: Option<crate::schema::ResolveTypeFn>,
    group: &FieldGroup,
    path: Arc<Path>,
    value: Value,
) -> Result<Value, Bubble> {
    let resolved = match resolve_type {
        Some(resolve) => resolve(&value, &ctx.ctx),
        None => default_resolve_type(ctx, abstract_name, &value),
    };

    let Some(type_name) = resolved else {
        ctx.record_error(
            FieldError::new(format!(
                "Abstract type '{abstract_name}' must resolve to an object type at runtime"
            ))
            .with_path(path.to_segments()),
        )
        .await;
        return Err(Bubble);
    };

    if !ctx.schema.is_possible_type(abstract_name, &type_name) {
        ctx.record_error(
            FieldError::new(format!(
                "Runtime type '{type_name}' is not a possible type for '{abstract_name}'"
            ))
            .with_path(path.to_segments()),
        )
        .await;
        return Err(Bubble);
    }

    complete_object(ctx, &type_name, group, path, value).await
}

/// Default runtime-type resolution: an explicit `__typename` key on the
/// value, else each possible type's membership predicate in schema
/// declaration order, first match wins.
fn default_resolve_type(
    ctx: &ExecutionContext,
    abstract_name: &str,
    value: &Value,
) -> Option<String> {
    if let Some(Value::String(name)) = value.get("__typename") {
        return Some(name.clone());
    }
    ctx.schema
        .possible_types(abstract_name)
        .into_iter()
        .find(|obj| {
            obj.is_type_of
                .as_ref()
                .map(|predicate| predicate(value))
                .unwrap_or(false)
        })
        .map(|obj| obj.name.clone())
}

/// Per-invocation execution state.
#[derive(Clone)]
pub(crate) struct ExecutionContext {
    pub(crate) schema: Arc<Schema>,
    pub(crate) fragments: Arc<FxHashMap<String, FragmentDefinition>>,
    pub(crate) variables: Arc<VariableValues>,
    pub(crate) ctx: Context,
    pub(crate) resolvers: Arc<ResolverMap>,
    pub(crate) errors: Arc<RwLock<Vec<FieldError>>>,
    pub(crate) incremental: Option<IncrementalState>,
}

impl ExecutionContext {
    pub(crate) async fn record_error(&self, error: FieldError) {
        self.errors.write().await.push(error);
    }

    pub(crate) async fn take_errors(&self) -> Vec<FieldError> {
        std::mem::take(&mut *self.errors.write().await)
    }

    /// A clone with its own error list; used per incremental record and
    /// per subscription event so errors stay local to their payload.
    pub(crate) fn with_fresh_errors(&self) -> Self {
        let mut cloned = self.clone();
        cloned.errors = Arc::new(RwLock::new(Vec::new()));
        cloned
    }

    /// Remembers a position nulled by bubbling so pending incremental
    /// records beneath it can be aborted. An empty segment list marks
    /// the response root.
    pub(crate) async fn note_nulled(&self, segments: Vec<PathSegment>) {
        if let Some(incremental) = &self.incremental {
            incremental.note_nulled(segments).await;
        }
    }
}

/// Request-scoped context passed to every resolver.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Request-scoped data.
    pub data: HashMap<String, Value>,
}

impl Context {
    /// Creates a new context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a value in the context.
    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.data.insert(key.into(), v);
        }
    }

    /// Gets a value from the context.
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// An error that prevents execution from starting.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RequestError {
    #[error("Must provide an operation")]
    NoOperation,

    #[error("Must provide operation name if the document contains multiple operations")]
    AmbiguousOperation,

    #[error("Unknown operation named '{0}'")]
    UnknownOperation(String),

    #[error("Schema is not configured to execute {0} operations")]
    UnsupportedOperation(&'static str),

    #[error("Variable '${0}' of required type '{1}' was not provided")]
    MissingVariable(String, String),

    #[error("Variable '${0}' got invalid value: {1}")]
    InvalidVariable(String, String),
}

/// An execution result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// The data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// The errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
    /// Response extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<HashMap<String, Value>>,
}

impl Response {
    /// Creates a successful response with data.
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: None,
            extensions: None,
        }
    }

    /// Creates an error response.
    pub fn error(error: FieldError) -> Self {
        Self {
            data: None,
            errors: Some(vec![error]),
            extensions: None,
        }
    }

    /// Creates an errors-only response from a request error.
    pub fn request_error(error: RequestError) -> Self {
        Self::error(FieldError::new(error.to_string()))
    }

    /// Returns true if the response has errors.
    pub fn has_errors(&self) -> bool {
        self.errors.as_ref().is_some_and(|e| !e.is_empty())
    }

    /// Returns true if the response has data.
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }
}

/// A field error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldError {
    /// The error message.
    pub message: String,
    /// The path to the field that failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,
    /// Error extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<HashMap<String, Value>>,
}

impl FieldError {
    /// Creates a new field error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }

    /// Adds a path to the error.
    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = Some(path);
        self
    }

    /// Adds an extension.
    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    /// Sets the error code extension.
    pub fn with_code(self, code: impl Into<String>) -> Self {
        self.with_extension("code", Value::String(code.into()))
    }
}
