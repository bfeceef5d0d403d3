//! Subscription execution.
//!
//! A subscription resolves its single root field once to obtain a
//! source event stream, then maps every raw event through a full
//! execution with the event as the root value. Each event yields one
//! [`Response`]; an event that fails during execution produces an
//! error-carrying response without ending the subscription.

use crate::collector::{collect_fields, merge_deferred};
use crate::executor::{
    execute_operation, select_operation, Context, Executor, RequestError, Response,
};
use crate::path::Path;
use crate::resolver::ResolverInfo;
use crate::schema::Schema;
use crate::values::{coerce_variable_values, resolve_arguments};
use igql_document::{Document, OperationKind};
use serde_json::Value;
use tokio::sync::mpsc;

/// An error that prevents a subscription from starting.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubscribeError {
    #[error("Operation is not a subscription")]
    NotSubscription,

    #[error("Schema is not configured to execute subscription operations")]
    NoSubscriptionType,

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("Subscriptions must select exactly one root field, found {0}")]
    MultipleRootFields(usize),

    #[error("Cannot subscribe to unknown field '{0}'")]
    UnknownField(String),

    #[error("No subscription resolver registered for '{0}'")]
    MissingResolver(String),

    #[error("{0}")]
    Arguments(String),

    #[error("Failed to create source event stream: {0}")]
    SourceStream(String),
}

/// A live subscription: one [`Response`] per source event.
///
/// Dropping the stream closes the per-event channel; the mapping task
/// then stops and drops the source receiver, which a well-behaved
/// source observes as cancellation.
pub struct SubscriptionStream {
    responses: mpsc::Receiver<Response>,
}

impl std::fmt::Debug for SubscriptionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionStream").finish()
    }
}

impl SubscriptionStream {
    /// Receives the next event's response, `None` when the source ends.
    pub async fn recv(&mut self) -> Option<Response> {
        self.responses.recv().await
    }

    /// Ends the subscription without dropping the stream handle.
    pub fn close(&mut self) {
        self.responses.close();
    }
}

impl Executor {
    /// Starts a subscription.
    ///
    /// Resolves the single root field's source event stream, then spawns
    /// a task executing the operation once per event with the event as
    /// the root value.
    pub async fn subscribe(
        &self,
        schema: &Schema,
        document: &Document,
        operation_name: Option<&str>,
        root_value: Value,
        ctx: &Context,
        variables: &serde_json::Map<String, Value>,
    ) -> Result<SubscriptionStream, SubscribeError> {
        let operation = select_operation(document, operation_name).map_err(SubscribeError::Request)?;
        if operation.kind != OperationKind::Subscription {
            return Err(SubscribeError::NotSubscription);
        }
        let root_type = schema
            .root_type(OperationKind::Subscription)
            .ok_or(SubscribeError::NoSubscriptionType)?
            .to_string();
        let coerced = coerce_variable_values(schema, operation, variables)?;

        let exec_ctx = self.build_context(schema, document, coerced, ctx.clone(), None);

        let mut collected = collect_fields(
            &exec_ctx.schema,
            &exec_ctx.fragments,
            &root_type,
            [operation.selection_set.as_slice()],
            &exec_ctx.variables,
        );
        merge_deferred(
            &mut collected.immediate,
            std::mem::take(&mut collected.deferred),
        );
        if collected.immediate.len() != 1 {
            return Err(SubscribeError::MultipleRootFields(collected.immediate.len()));
        }
        let (response_key, group) = collected.immediate.first().ok_or_else(|| {
            SubscribeError::MultipleRootFields(0)
        })?;
        let field = group.first();

        let field_def = exec_ctx
            .schema
            .field_def(&root_type, &field.name)
            .ok_or_else(|| SubscribeError::UnknownField(field.name.clone()))?;
        let args = resolve_arguments(field_def, field, &exec_ctx.variables)
            .map_err(SubscribeError::Arguments)?;
        let info = ResolverInfo::new(&field.name, &root_type)
            .with_return_type(field_def.ty.to_string())
            .with_path(Path::root(response_key).to_segments());

        let resolver = exec_ctx
            .resolvers
            .get_subscription(&root_type, &field.name)
            .ok_or_else(|| {
                SubscribeError::MissingResolver(format!("{root_type}.{}", field.name))
            })?;
        let mut source = resolver
            .subscribe(&root_value, &args, &exec_ctx.ctx, &info)
            .await
            .map_err(|e| SubscribeError::SourceStream(e.to_string()))?;

        tracing::debug!(field = %field.name, "subscription started");

        let (tx, rx) = mpsc::channel(self.config().event_buffer);
        let operation = operation.clone();
        tokio::spawn(async move {
            while let Some(event) = source.recv().await {
                // A fresh error list per event keeps errors local to
                // their response.
                let event_ctx = exec_ctx.with_fresh_errors();
                let data = execute_operation(&event_ctx, &operation, &root_type, event).await;
                let errors = event_ctx.take_errors().await;
                let response = Response {
                    data: Some(data),
                    errors: if errors.is_empty() {
                        None
                    } else {
                        Some(errors)
                    },
                    extensions: None,
                };
                // Consumer dropped the stream: stop, which drops the
                // source receiver and signals cancellation upstream.
                if tx.send(response).await.is_err() {
                    tracing::debug!("subscription cancelled by consumer");
                    break;
                }
            }
        });

        Ok(SubscriptionStream { responses: rx })
    }
}
