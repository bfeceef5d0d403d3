//! Integration tests for incremental delivery with @defer and @stream.

use igql_document::{
    Directive, Document, FieldSelection, FragmentDefinition, FragmentSpread, InlineFragment,
    InputValue, OperationDefinition, OperationKind, Selection,
};
use igql_runtime::{
    Context, Executor, FieldDef, ObjectDef, PathSegment, ResolverMap, SchemaBuilder, Schema,
    TypeRef,
};
use indexmap::IndexMap;
use serde_json::{json, Value};

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("igql_runtime=debug")
        .try_init()
        .ok();
}

fn field(name: &str) -> Selection {
    Selection::Field(FieldSelection::leaf(name))
}

fn object_field(name: &str, children: Vec<Selection>) -> Selection {
    Selection::Field(FieldSelection {
        selection_set: children,
        ..FieldSelection::leaf(name)
    })
}

fn query(selection_set: Vec<Selection>) -> Document {
    Document {
        operations: vec![OperationDefinition {
            kind: OperationKind::Query,
            name: None,
            variable_definitions: Vec::new(),
            directives: Vec::new(),
            selection_set,
        }],
        fragments: Vec::new(),
    }
}

fn test_schema() -> Schema {
    let mut user_fields = IndexMap::new();
    user_fields.insert(
        "name".to_string(),
        FieldDef::new("name", TypeRef::named("String")),
    );
    user_fields.insert(
        "secret".to_string(),
        FieldDef::new("secret", TypeRef::non_null(TypeRef::named("String"))),
    );
    user_fields.insert(
        "bio".to_string(),
        FieldDef::new("bio", TypeRef::named("String")),
    );

    let mut query_fields = IndexMap::new();
    query_fields.insert(
        "fast".to_string(),
        FieldDef::new("fast", TypeRef::named("Int")),
    );
    query_fields.insert(
        "slow".to_string(),
        FieldDef::new("slow", TypeRef::named("String")),
    );
    query_fields.insert(
        "user".to_string(),
        FieldDef::new("user", TypeRef::named("User")),
    );
    query_fields.insert(
        "feed".to_string(),
        FieldDef::new("feed", TypeRef::list(TypeRef::named("String"))),
    );
    query_fields.insert(
        "must".to_string(),
        FieldDef::new("must", TypeRef::non_null(TypeRef::named("String"))),
    );

    SchemaBuilder::new()
        .query_type("Query")
        .add_object(ObjectDef::new("Query", query_fields))
        .add_object(ObjectDef::new("User", user_fields))
        .build()
}

fn test_resolvers() -> ResolverMap {
    let mut resolvers = ResolverMap::new();
    resolvers.register_fn("Query", "fast", |_, _, _, _| Ok(json!(1)));
    resolvers.register_fn("Query", "slow", |_, _, _, _| Ok(json!("later")));
    resolvers.register_fn("Query", "user", |_, _, _, _| {
        Ok(json!({"name": "Alice", "bio": "hi"}))
    });
    resolvers.register_fn("Query", "feed", |_, _, _, _| {
        Ok(json!(["a", "b", "c", "d", "e"]))
    });
    resolvers.register_fn("User", "secret", |_, _, _, _| {
        Err(igql_runtime::ResolverError::Custom("denied".to_string()))
    });
    resolvers.register_fn("Query", "must", |_, _, _, _| {
        Err(igql_runtime::ResolverError::Custom("boom".to_string()))
    });
    resolvers
}

fn deferred_fragment(label: &str, selections: Vec<Selection>) -> Selection {
    Selection::InlineFragment(InlineFragment {
        type_condition: None,
        directives: vec![Directive::new("defer")
            .with_argument("label", InputValue::String(label.to_string()))],
        selection_set: selections,
    })
}

#[tokio::test]
async fn defer_splits_initial_and_patch() {
    init_tracing();
    let executor = Executor::with_resolvers(test_resolvers());
    let document = query(vec![
        field("fast"),
        deferred_fragment("slowPart", vec![field("slow")]),
    ]);

    let mut response = executor
        .execute_incremental(
            &test_schema(),
            &document,
            None,
            Value::Null,
            &Context::new(),
            &serde_json::Map::new(),
        )
        .await;

    // Initial payload holds only the immediate field.
    assert_eq!(response.initial.data, Some(json!({"fast": 1})));
    assert!(response.initial.errors.is_none());
    assert!(response.initial.has_next);
    assert_eq!(response.initial.pending.len(), 1);
    assert_eq!(
        response.initial.pending[0].label.as_deref(),
        Some("slowPart")
    );

    // Exactly one patch, carrying the deferred data at the root path.
    let patch = response.next().await.unwrap();
    assert_eq!(patch.incremental.len(), 1);
    assert_eq!(
        patch.incremental[0].data,
        Some(json!({"slow": "later"}))
    );
    assert!(patch.incremental[0].path.is_empty());
    assert_eq!(patch.incremental[0].label.as_deref(), Some("slowPart"));
    assert_eq!(patch.completed.len(), 1);
    assert!(!patch.has_next);

    assert!(response.next().await.is_none());
}

#[tokio::test]
async fn defer_via_fragment_spread() {
    let executor = Executor::with_resolvers(test_resolvers());
    let document = Document {
        operations: vec![OperationDefinition {
            kind: OperationKind::Query,
            name: None,
            variable_definitions: Vec::new(),
            directives: Vec::new(),
            selection_set: vec![
                field("fast"),
                Selection::FragmentSpread(FragmentSpread {
                    name: "SlowPart".to_string(),
                    directives: vec![Directive::new("defer")],
                }),
            ],
        }],
        fragments: vec![FragmentDefinition {
            name: "SlowPart".to_string(),
            type_condition: "Query".to_string(),
            directives: Vec::new(),
            selection_set: vec![field("slow")],
        }],
    };

    let mut response = executor
        .execute_incremental(
            &test_schema(),
            &document,
            None,
            Value::Null,
            &Context::new(),
            &serde_json::Map::new(),
        )
        .await;

    assert_eq!(response.initial.data, Some(json!({"fast": 1})));
    let patch = response.next().await.unwrap();
    assert_eq!(patch.incremental[0].data, Some(json!({"slow": "later"})));
    assert!(!patch.has_next);
}

#[tokio::test]
async fn stream_delivers_tail_in_index_order() {
    let executor = Executor::with_resolvers(test_resolvers());
    let mut feed = FieldSelection::leaf("feed");
    feed.directives.push(
        Directive::new("stream")
            .with_argument("initialCount", InputValue::Int(2))
            .with_argument("label", InputValue::String("feed".to_string())),
    );
    let document = query(vec![Selection::Field(feed)]);

    let mut response = executor
        .execute_incremental(
            &test_schema(),
            &document,
            None,
            Value::Null,
            &Context::new(),
            &serde_json::Map::new(),
        )
        .await;

    // Initial payload carries only the first initialCount items.
    assert_eq!(response.initial.data, Some(json!({"feed": ["a", "b"]})));
    assert!(response.initial.has_next);

    let expected = [("c", 2usize), ("d", 3), ("e", 4)];
    for (i, (item, index)) in expected.iter().enumerate() {
        let patch = response.next().await.unwrap();
        assert_eq!(patch.incremental.len(), 1);
        assert_eq!(patch.incremental[0].items, Some(vec![json!(item)]));
        assert_eq!(
            patch.incremental[0].path,
            vec![PathSegment::from("feed"), PathSegment::from(*index)]
        );
        let last = i == expected.len() - 1;
        assert_eq!(patch.has_next, !last);
        assert_eq!(!patch.completed.is_empty(), last);
    }
    assert!(response.next().await.is_none());
}

#[tokio::test]
async fn stream_with_large_initial_count_is_inert() {
    let executor = Executor::with_resolvers(test_resolvers());
    let mut feed = FieldSelection::leaf("feed");
    feed.directives.push(
        Directive::new("stream").with_argument("initialCount", InputValue::Int(10)),
    );
    let document = query(vec![Selection::Field(feed)]);

    let mut response = executor
        .execute_incremental(
            &test_schema(),
            &document,
            None,
            Value::Null,
            &Context::new(),
            &serde_json::Map::new(),
        )
        .await;

    assert_eq!(
        response.initial.data,
        Some(json!({"feed": ["a", "b", "c", "d", "e"]}))
    );
    assert!(!response.initial.has_next);
    assert!(response.next().await.is_none());
}

#[tokio::test]
async fn no_directives_closes_immediately() {
    let executor = Executor::with_resolvers(test_resolvers());
    let document = query(vec![field("fast")]);

    let mut response = executor
        .execute_incremental(
            &test_schema(),
            &document,
            None,
            Value::Null,
            &Context::new(),
            &serde_json::Map::new(),
        )
        .await;

    assert_eq!(response.initial.data, Some(json!({"fast": 1})));
    assert!(!response.initial.has_next);
    assert!(response.initial.pending.is_empty());
    assert!(response.next().await.is_none());
}

#[tokio::test]
async fn defer_under_nulled_position_is_aborted() {
    let executor = Executor::with_resolvers(test_resolvers());
    // secret (String!) fails, so user bubbles to null; the deferred
    // fragment registered beneath user must be aborted.
    let document = query(vec![object_field(
        "user",
        vec![
            field("name"),
            field("secret"),
            deferred_fragment("bioPart", vec![field("bio")]),
        ],
    )]);

    let mut response = executor
        .execute_incremental(
            &test_schema(),
            &document,
            None,
            Value::Null,
            &Context::new(),
            &serde_json::Map::new(),
        )
        .await;

    assert_eq!(response.initial.data, Some(json!({"user": null})));
    assert_eq!(response.initial.errors.as_ref().unwrap().len(), 1);
    assert!(response.initial.has_next);

    let patch = response.next().await.unwrap();
    assert!(patch.incremental.is_empty());
    assert_eq!(patch.completed.len(), 1);
    assert_eq!(patch.completed[0].path, vec![PathSegment::from("user")]);
    assert_eq!(patch.completed[0].label.as_deref(), Some("bioPart"));
    assert!(!patch.has_next);
    assert!(response.next().await.is_none());
}

#[tokio::test]
async fn defer_under_nulled_root_is_aborted() {
    let executor = Executor::with_resolvers(test_resolvers());
    // must (String!) fails at the root, so data itself becomes null;
    // the root-level deferred fragment is swallowed by that null and
    // must never be delivered as a data chunk.
    let document = query(vec![
        field("must"),
        deferred_fragment("slowPart", vec![field("slow")]),
    ]);

    let mut response = executor
        .execute_incremental(
            &test_schema(),
            &document,
            None,
            Value::Null,
            &Context::new(),
            &serde_json::Map::new(),
        )
        .await;

    assert_eq!(response.initial.data, Some(Value::Null));
    assert_eq!(response.initial.errors.as_ref().unwrap().len(), 1);
    assert!(response.initial.has_next);

    let patch = response.next().await.unwrap();
    assert!(patch.incremental.is_empty());
    assert_eq!(patch.completed.len(), 1);
    assert!(patch.completed[0].path.is_empty());
    assert_eq!(patch.completed[0].label.as_deref(), Some("slowPart"));
    assert!(!patch.has_next);
    assert!(response.next().await.is_none());
}

#[tokio::test]
async fn error_inside_deferred_chunk_stays_in_chunk() {
    let mut resolvers = test_resolvers();
    resolvers.register_fn("Query", "slow", |_, _, _, _| {
        Err(igql_runtime::ResolverError::Custom("too slow".to_string()))
    });
    let executor = Executor::with_resolvers(resolvers);
    let document = query(vec![
        field("fast"),
        deferred_fragment("slowPart", vec![field("slow")]),
    ]);

    let mut response = executor
        .execute_incremental(
            &test_schema(),
            &document,
            None,
            Value::Null,
            &Context::new(),
            &serde_json::Map::new(),
        )
        .await;

    // Initial payload is clean; the failure belongs to the chunk.
    assert!(response.initial.errors.is_none());
    let patch = response.next().await.unwrap();
    assert_eq!(patch.incremental[0].data, Some(json!({"slow": null})));
    let errors = patch.incremental[0].errors.as_ref().unwrap();
    assert_eq!(errors[0].message, "too slow");
    assert!(!patch.has_next);
}

#[tokio::test]
async fn two_defers_both_deliver() {
    let executor = Executor::with_resolvers(test_resolvers());
    let document = query(vec![
        field("fast"),
        deferred_fragment("one", vec![field("slow")]),
        deferred_fragment("two", vec![object_field("user", vec![field("name")])]),
    ]);

    let mut response = executor
        .execute_incremental(
            &test_schema(),
            &document,
            None,
            Value::Null,
            &Context::new(),
            &serde_json::Map::new(),
        )
        .await;

    assert_eq!(response.initial.pending.len(), 2);
    let first = response.next().await.unwrap();
    assert!(first.has_next);
    let second = response.next().await.unwrap();
    assert!(!second.has_next);

    let mut labels: Vec<_> = [&first, &second]
        .iter()
        .flat_map(|p| p.incremental.iter())
        .filter_map(|c| c.label.clone())
        .collect();
    labels.sort();
    assert_eq!(labels, vec!["one", "two"]);
    assert!(response.next().await.is_none());
}

#[tokio::test]
async fn plain_execute_treats_defer_as_inert() {
    let executor = Executor::with_resolvers(test_resolvers());
    let document = query(vec![
        field("fast"),
        deferred_fragment("slowPart", vec![field("slow")]),
    ]);

    let response = executor
        .execute(
            &test_schema(),
            &document,
            None,
            Value::Null,
            &Context::new(),
            &serde_json::Map::new(),
        )
        .await;

    assert!(!response.has_errors());
    assert_eq!(
        response.data.unwrap(),
        json!({"fast": 1, "slow": "later"})
    );
}

#[tokio::test]
async fn request_error_yields_empty_stream() {
    let executor = Executor::with_resolvers(test_resolvers());
    let document = query(vec![field("fast")]);

    let mut response = executor
        .execute_incremental(
            &test_schema(),
            &document,
            Some("Nope"),
            Value::Null,
            &Context::new(),
            &serde_json::Map::new(),
        )
        .await;

    assert!(response.initial.data.is_none());
    assert!(response.initial.errors.is_some());
    assert!(!response.initial.has_next);
    assert!(response.next().await.is_none());
}

#[tokio::test]
async fn dropping_response_cancels_delivery() {
    let executor = Executor::with_resolvers(test_resolvers());
    let mut feed = FieldSelection::leaf("feed");
    feed.directives
        .push(Directive::new("stream").with_argument("initialCount", InputValue::Int(0)));
    let document = query(vec![Selection::Field(feed)]);

    let mut response = executor
        .execute_incremental(
            &test_schema(),
            &document,
            None,
            Value::Null,
            &Context::new(),
            &serde_json::Map::new(),
        )
        .await;

    assert!(response.initial.has_next);
    let first = response.next().await.unwrap();
    assert_eq!(first.incremental[0].items, Some(vec![json!("a")]));
    // Closing the stream ends delivery; already-buffered payloads may
    // still drain, but the publisher stops on its next send.
    response.close();
    let mut drained = 0;
    while response.next().await.is_some() {
        drained += 1;
    }
    assert!(drained <= 4);
}
