//! Incremental delivery for `@defer` and `@stream`.
//!
//! An incremental execution produces an initial payload covering the
//! immediate selection set, then a sequence of subsequent payloads: one
//! per deferred fragment, one per streamed list item. The publisher
//! drains pending records sequentially from a queue, so defer chunks
//! arrive in completion order and stream items in strict index order.
//! Dropping the payload receiver cancels outstanding work.

use crate::collector::{DeferredGroup, FieldGroup};
use crate::executor::{
    complete_value, execute_groups, execute_operation, prepare_request, Bubble, Context,
    ExecutionContext, Executor, FieldError, Response,
};
use crate::path::{segments_of, starts_with, Path, PathSegment};
use crate::schema::{Schema, TypeRef};
use igql_document::Document;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// The first payload of an incremental execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
    /// Records announced but not yet delivered.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub pending: Vec<PendingNotice>,
    pub has_next: bool,
}

/// A patch payload delivered after the initial one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubsequentPayload {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub incremental: Vec<IncrementalChunk>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub pending: Vec<PendingNotice>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub completed: Vec<CompletedNotice>,
    pub has_next: bool,
}

/// One unit of deferred data: a fragment's object or a stream slice.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalChunk {
    /// Deferred fragment data, keyed into the response at `path`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Streamed list items; `path` ends with the first item's index.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<Value>>,
    pub path: Vec<PathSegment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

/// Announces a deferred fragment or stream before its data arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingNotice {
    pub path: Vec<PathSegment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Marks a pending record as delivered, aborted, or failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedNotice {
    pub path: Vec<PathSegment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Present when the record failed before producing data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,
}

/// An in-flight incremental execution: the initial payload plus the
/// stream of patches. Dropping it cancels the remaining work.
pub struct IncrementalResponse {
    pub initial: InitialPayload,
    payloads: mpsc::Receiver<SubsequentPayload>,
}

impl std::fmt::Debug for IncrementalResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalResponse")
            .field("initial", &self.initial)
            .finish()
    }
}

impl IncrementalResponse {
    /// Receives the next patch payload, `None` after the last one.
    pub async fn next(&mut self) -> Option<SubsequentPayload> {
        self.payloads.recv().await
    }

    /// Stops delivery; the publisher task winds down on its next send.
    pub fn close(&mut self) {
        self.payloads.close();
    }
}

/// Work the completion engine diverted for later delivery.
pub(crate) enum PendingRecord {
    Defer {
        label: Option<String>,
        path: Option<Arc<Path>>,
        type_name: String,
        parent_value: Value,
        fields: IndexMap<String, FieldGroup>,
    },
    Stream {
        label: Option<String>,
        path: Arc<Path>,
        item_type: TypeRef,
        group: FieldGroup,
        items: Vec<Value>,
        start_index: usize,
    },
}

impl PendingRecord {
    fn label(&self) -> Option<&String> {
        match self {
            Self::Defer { label, .. } | Self::Stream { label, .. } => label.as_ref(),
        }
    }

    fn segments(&self) -> Vec<PathSegment> {
        match self {
            Self::Defer { path, .. } => segments_of(path.as_ref()),
            Self::Stream { path, .. } => path.to_segments(),
        }
    }
}

/// Shared state wiring the completion engine to the publisher.
#[derive(Clone)]
pub(crate) struct IncrementalState {
    queue: mpsc::UnboundedSender<PendingRecord>,
    outstanding: Arc<AtomicUsize>,
    nulled: Arc<RwLock<Vec<Vec<PathSegment>>>>,
    announced: Arc<RwLock<Vec<PendingNotice>>>,
}

impl IncrementalState {
    fn new(queue: mpsc::UnboundedSender<PendingRecord>) -> Self {
        Self {
            queue,
            outstanding: Arc::new(AtomicUsize::new(0)),
            nulled: Arc::new(RwLock::new(Vec::new())),
            announced: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub(crate) async fn register_defer(
        &self,
        type_name: &str,
        source: &Value,
        path: Option<&Arc<Path>>,
        group: DeferredGroup,
    ) {
        tracing::debug!(label = ?group.label, "registering deferred fragment");
        self.enqueue(PendingRecord::Defer {
            label: group.label,
            path: path.map(Arc::clone),
            type_name: type_name.to_string(),
            parent_value: source.clone(),
            fields: group.fields,
        })
        .await;
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn register_stream(
        &self,
        label: Option<String>,
        path: &Arc<Path>,
        item_type: TypeRef,
        group: FieldGroup,
        items: Vec<Value>,
        start_index: usize,
    ) {
        tracing::debug!(?label, remaining = items.len(), "registering stream tail");
        self.enqueue(PendingRecord::Stream {
            label,
            path: Arc::clone(path),
            item_type,
            group,
            items,
            start_index,
        })
        .await;
    }

    async fn enqueue(&self, record: PendingRecord) {
        self.announced.write().await.push(PendingNotice {
            path: record.segments(),
            label: record.label().cloned(),
        });
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        // A closed queue means delivery was cancelled; the count was
        // already bumped so the publisher math stays consistent.
        let _ = self.queue.send(record);
    }

    pub(crate) async fn note_nulled(&self, path: Vec<PathSegment>) {
        self.nulled.write().await.push(path);
    }

    async fn take_announced(&self) -> Vec<PendingNotice> {
        std::mem::take(&mut *self.announced.write().await)
    }

    async fn is_aborted(&self, segments: &[PathSegment]) -> bool {
        self.nulled
            .read()
            .await
            .iter()
            .any(|prefix| starts_with(segments, prefix))
    }

    /// Decrements the outstanding count, returning how many remain.
    fn finish_one(&self) -> usize {
        self.outstanding.fetch_sub(1, Ordering::SeqCst) - 1
    }
}

impl Executor {
    /// Executes an operation with incremental delivery.
    ///
    /// `@defer` and `@stream` divert work into the returned payload
    /// stream instead of blocking the initial result. A request error
    /// yields an errors-only initial payload with an empty stream.
    pub async fn execute_incremental(
        &self,
        schema: &Schema,
        document: &Document,
        operation_name: Option<&str>,
        root_value: Value,
        ctx: &Context,
        variables: &serde_json::Map<String, Value>,
    ) -> IncrementalResponse {
        let (operation, root_type, coerced) =
            match prepare_request(schema, document, operation_name, variables) {
                Ok(prepared) => prepared,
                Err(e) => {
                    let response = Response::request_error(e);
                    let (_, payloads) = mpsc::channel(1);
                    return IncrementalResponse {
                        initial: InitialPayload {
                            data: None,
                            errors: response.errors,
                            pending: Vec::new(),
                            has_next: false,
                        },
                        payloads,
                    };
                }
            };

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let state = IncrementalState::new(queue_tx);
        let exec_ctx = self.build_context(
            schema,
            document,
            coerced,
            ctx.clone(),
            Some(state.clone()),
        );

        let data = execute_operation(&exec_ctx, operation, &root_type, root_value).await;
        let errors = exec_ctx.take_errors().await;
        let pending = state.take_announced().await;
        let has_next = state.outstanding.load(Ordering::SeqCst) > 0;

        let (payload_tx, payload_rx) = mpsc::channel(self.config().payload_buffer);
        if has_next {
            tokio::spawn(publish_payloads(exec_ctx, state, queue_rx, payload_tx));
        }

        IncrementalResponse {
            initial: InitialPayload {
                data: Some(data),
                errors: if errors.is_empty() {
                    None
                } else {
                    Some(errors)
                },
                pending,
                has_next,
            },
            payloads: payload_rx,
        }
    }
}

/// Drains pending records one at a time and ships their payloads.
async fn publish_payloads(
    ctx: ExecutionContext,
    state: IncrementalState,
    mut queue: mpsc::UnboundedReceiver<PendingRecord>,
    payloads: mpsc::Sender<SubsequentPayload>,
) {
    while state.outstanding.load(Ordering::SeqCst) > 0 {
        let Some(record) = queue.recv().await else {
            break;
        };
        let delivered = match record {
            PendingRecord::Defer {
                label,
                path,
                type_name,
                parent_value,
                fields,
            } => {
                publish_defer(
                    &ctx,
                    &state,
                    &payloads,
                    label,
                    path,
                    &type_name,
                    &parent_value,
                    &fields,
                )
                .await
            }
            PendingRecord::Stream {
                label,
                path,
                item_type,
                group,
                items,
                start_index,
            } => {
                publish_stream(
                    &ctx,
                    &state,
                    &payloads,
                    label,
                    &path,
                    &item_type,
                    &group,
                    items,
                    start_index,
                )
                .await
            }
        };
        // Receiver dropped: the consumer cancelled delivery.
        if !delivered {
            tracing::debug!("incremental delivery cancelled by consumer");
            break;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn publish_defer(
    ctx: &ExecutionContext,
    state: &IncrementalState,
    payloads: &mpsc::Sender<SubsequentPayload>,
    label: Option<String>,
    path: Option<Arc<Path>>,
    type_name: &str,
    parent_value: &Value,
    fields: &IndexMap<String, FieldGroup>,
) -> bool {
    let segments = segments_of(path.as_ref());
    if state.is_aborted(&segments).await {
        // A bubbled null swallowed this fragment's position.
        let remaining = state.finish_one();
        return payloads
            .send(SubsequentPayload {
                incremental: Vec::new(),
                pending: Vec::new(),
                completed: vec![CompletedNotice {
                    path: segments,
                    label,
                    errors: None,
                }],
                has_next: remaining > 0,
            })
            .await
            .is_ok();
    }

    let child = ctx.with_fresh_errors();
    let result = execute_groups(
        &child,
        type_name,
        parent_value,
        fields,
        path.as_ref(),
        false,
    )
    .await;
    let errors = child.take_errors().await;
    let errors = if errors.is_empty() { None } else { Some(errors) };
    let pending = state.take_announced().await;
    let remaining = state.finish_one();

    let payload = match result {
        Ok(map) => SubsequentPayload {
            incremental: vec![IncrementalChunk {
                data: Some(Value::Object(map)),
                items: None,
                path: segments.clone(),
                label: label.clone(),
                errors,
            }],
            pending,
            completed: vec![CompletedNotice {
                path: segments,
                label,
                errors: None,
            }],
            has_next: remaining > 0,
        },
        // The fragment's own non-null bubbling consumed it entirely.
        Err(Bubble) => SubsequentPayload {
            incremental: Vec::new(),
            pending,
            completed: vec![CompletedNotice {
                path: segments,
                label,
                errors,
            }],
            has_next: remaining > 0,
        },
    };
    payloads.send(payload).await.is_ok()
}

#[allow(clippy::too_many_arguments)]
async fn publish_stream(
    ctx: &ExecutionContext,
    state: &IncrementalState,
    payloads: &mpsc::Sender<SubsequentPayload>,
    label: Option<String>,
    path: &Arc<Path>,
    item_type: &TypeRef,
    group: &FieldGroup,
    items: Vec<Value>,
    start_index: usize,
) -> bool {
    let list_segments = path.to_segments();
    if state.is_aborted(&list_segments).await {
        let remaining = state.finish_one();
        return payloads
            .send(SubsequentPayload {
                incremental: Vec::new(),
                pending: Vec::new(),
                completed: vec![CompletedNotice {
                    path: list_segments,
                    label,
                    errors: None,
                }],
                has_next: remaining > 0,
            })
            .await
            .is_ok();
    }

    let total = items.len();
    for (offset, item) in items.into_iter().enumerate() {
        let index = start_index + offset;
        let item_path = path.child_index(index);
        let child = ctx.with_fresh_errors();
        let completed = complete_value(&child, item_type, group, item_path.clone(), item).await;
        let errors = child.take_errors().await;
        let errors = if errors.is_empty() { None } else { Some(errors) };
        let pending = state.take_announced().await;
        let last = offset + 1 == total;

        match completed {
            Ok(value) => {
                let remaining = if last { state.finish_one() } else { 0 };
                let payload = SubsequentPayload {
                    incremental: vec![IncrementalChunk {
                        data: None,
                        items: Some(vec![value]),
                        path: item_path.to_segments(),
                        label: label.clone(),
                        errors,
                    }],
                    pending,
                    completed: if last {
                        vec![CompletedNotice {
                            path: list_segments.clone(),
                            label: label.clone(),
                            errors: None,
                        }]
                    } else {
                        Vec::new()
                    },
                    has_next: !last || remaining > 0,
                };
                if payloads.send(payload).await.is_err() {
                    return false;
                }
            }
            // A non-null item violation ends the stream.
            Err(Bubble) => {
                let remaining = state.finish_one();
                let payload = SubsequentPayload {
                    incremental: Vec::new(),
                    pending,
                    completed: vec![CompletedNotice {
                        path: list_segments,
                        label,
                        errors,
                    }],
                    has_next: remaining > 0,
                };
                return payloads.send(payload).await.is_ok();
            }
        }
    }
    true
}
