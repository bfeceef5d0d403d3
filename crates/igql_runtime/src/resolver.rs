//! Resolver surface for igql.
//!
//! Field resolvers produce the raw values the completion engine turns
//! into response values; subscription resolvers produce the source
//! event stream that drives a subscription.

use crate::executor::Context;
use crate::path::PathSegment;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Coerced arguments passed to a resolver.
#[derive(Debug, Clone, Default)]
pub struct ResolverArgs {
    args: FxHashMap<String, Value>,
}

impl ResolverArgs {
    /// Creates empty resolver args.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates resolver args from (name, value) pairs.
    pub fn from_pairs(pairs: Vec<(String, Value)>) -> Self {
        Self {
            args: pairs.into_iter().collect(),
        }
    }

    /// Gets an argument by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// Gets an argument as a specific type.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.args
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Gets a required argument, returning an error if not found.
    pub fn require<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T, ResolverError> {
        self.args
            .get(name)
            .ok_or_else(|| ResolverError::MissingArgument(name.to_string()))
            .and_then(|v| {
                serde_json::from_value(v.clone()).map_err(|e| {
                    ResolverError::ArgumentParse(name.to_string(), e.to_string())
                })
            })
    }

    /// Sets an argument.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.args.insert(name.into(), value);
    }

    /// Returns true if no arguments are present.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }
}

/// Info about the field being resolved.
#[derive(Debug, Clone)]
pub struct ResolverInfo {
    /// The field name being resolved.
    pub field_name: String,

    /// The parent type name.
    pub parent_type: String,

    /// The declared return type, rendered (e.g. `[Post!]!`).
    pub return_type: String,

    /// Path to this field in the response.
    pub path: Vec<PathSegment>,
}

impl ResolverInfo {
    /// Creates new resolver info.
    pub fn new(field_name: impl Into<String>, parent_type: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            parent_type: parent_type.into(),
            return_type: String::new(),
            path: Vec::new(),
        }
    }

    /// Sets the return type.
    pub fn with_return_type(mut self, ty: impl Into<String>) -> Self {
        self.return_type = ty.into();
        self
    }

    /// Sets the path.
    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = path;
        self
    }
}

/// Result type for resolvers.
pub type ResolverResult = Result<Value, ResolverError>;

/// Future type for async resolvers.
pub type ResolverFuture<'a> = Pin<Box<dyn Future<Output = ResolverResult> + Send + 'a>>;

/// Error from a resolver.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolverError {
    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    #[error("Failed to parse argument '{0}': {1}")]
    ArgumentParse(String, String),

    #[error("{0}")]
    Custom(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Trait for field resolvers.
pub trait Resolver: Send + Sync {
    /// Resolves a field value.
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a>;
}

/// A boxed resolver.
pub type BoxedResolver = Box<dyn Resolver>;

/// A wrapper for sync resolver functions.
pub struct FnResolver {
    func: Arc<dyn Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult + Send + Sync>,
}

impl FnResolver {
    /// Creates a new function resolver.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult
            + Send
            + Sync
            + 'static,
    {
        Self { func: Arc::new(f) }
    }
}

impl Resolver for FnResolver {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        let result = (self.func)(parent, args, ctx, info);
        Box::pin(async move { result })
    }
}

/// A wrapper for async resolver functions.
pub struct AsyncFnResolver {
    func: Arc<
        dyn Fn(Value, ResolverArgs, Context, ResolverInfo) -> ResolverFuture<'static>
            + Send
            + Sync,
    >,
}

impl AsyncFnResolver {
    /// Creates a new async function resolver.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolverResult> + Send + 'static,
    {
        Self {
            func: Arc::new(move |parent, args, ctx, info| Box::pin(f(parent, args, ctx, info))),
        }
    }
}

impl Resolver for AsyncFnResolver {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        let parent = parent.clone();
        let args = args.clone();
        let ctx = ctx.clone();
        let info = info.clone();
        let func = Arc::clone(&self.func);
        Box::pin(async move { func(parent, args, ctx, info).await })
    }
}

/// Default resolver applied when no resolver is registered for a field.
///
/// Two-step lookup: a same-named key on the parent mapping, else the
/// snake_case spelling of that key, else null.
pub struct DefaultResolver;

impl Resolver for DefaultResolver {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        _args: &'a ResolverArgs,
        _ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        let field_name = &info.field_name;
        let result = match parent {
            Value::Object(map) => {
                if let Some(value) = map.get(field_name) {
                    Ok(value.clone())
                } else {
                    let snake_case = to_snake_case(field_name);
                    Ok(map.get(&snake_case).cloned().unwrap_or(Value::Null))
                }
            }
            Value::Null => Ok(Value::Null),
            _ => Err(ResolverError::FieldNotFound(field_name.clone())),
        };
        Box::pin(async move { result })
    }
}

/// Converts camelCase to snake_case.
fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(c.to_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}

/// A source event stream produced by a subscription resolver.
///
/// Push-based and externally paced; the engine only pulls from it.
pub type SourceEventStream = mpsc::Receiver<Value>;

/// Future type for subscription resolvers.
pub type SubscribeFuture<'a> =
    Pin<Box<dyn Future<Output = Result<SourceEventStream, ResolverError>> + Send + 'a>>;

/// Trait for subscription root-field resolvers.
///
/// Invoked once per subscription to build the source event stream; the
/// per-event field value is produced by the ordinary field resolver (or
/// the default resolver against the raw event).
pub trait SubscriptionResolver: Send + Sync {
    fn subscribe<'a>(
        &'a self,
        root: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> SubscribeFuture<'a>;
}

/// A wrapper for subscription resolver functions.
pub struct FnSubscriptionResolver {
    func: Arc<
        dyn Fn(Value, ResolverArgs, Context, ResolverInfo) -> SubscribeFuture<'static>
            + Send
            + Sync,
    >,
}

impl FnSubscriptionResolver {
    /// Creates a new subscription resolver from an async function.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SourceEventStream, ResolverError>> + Send + 'static,
    {
        Self {
            func: Arc::new(move |root, args, ctx, info| Box::pin(f(root, args, ctx, info))),
        }
    }
}

impl SubscriptionResolver for FnSubscriptionResolver {
    fn subscribe<'a>(
        &'a self,
        root: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> SubscribeFuture<'a> {
        let root = root.clone();
        let args = args.clone();
        let ctx = ctx.clone();
        let info = info.clone();
        let func = Arc::clone(&self.func);
        Box::pin(async move { func(root, args, ctx, info).await })
    }
}

/// Storage for resolvers organized by type and field.
#[derive(Default)]
pub struct ResolverMap {
    /// Field resolvers indexed by "TypeName.fieldName".
    resolvers: FxHashMap<String, BoxedResolver>,

    /// Subscription resolvers indexed the same way.
    subscriptions: FxHashMap<String, Box<dyn SubscriptionResolver>>,

    /// Default resolver for unregistered fields.
    default_resolver: Option<BoxedResolver>,
}

impl ResolverMap {
    /// Creates a new resolver map with the default resolver installed.
    pub fn new() -> Self {
        Self {
            resolvers: FxHashMap::default(),
            subscriptions: FxHashMap::default(),
            default_resolver: Some(Box::new(DefaultResolver)),
        }
    }

    /// Registers a resolver for a specific type and field.
    pub fn register<R: Resolver + 'static>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        resolver: R,
    ) {
        let key = format!("{}.{}", type_name.into(), field_name.into());
        self.resolvers.insert(key, Box::new(resolver));
    }

    /// Registers a sync function as a resolver.
    pub fn register_fn<F>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        f: F,
    ) where
        F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult
            + Send
            + Sync
            + 'static,
    {
        self.register(type_name, field_name, FnResolver::new(f));
    }

    /// Registers an async function as a resolver.
    pub fn register_async<F, Fut>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        f: F,
    ) where
        F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolverResult> + Send + 'static,
    {
        self.register(type_name, field_name, AsyncFnResolver::new(f));
    }

    /// Registers a subscription resolver for a root field.
    pub fn register_subscription<F, Fut>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        f: F,
    ) where
        F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SourceEventStream, ResolverError>> + Send + 'static,
    {
        let key = format!("{}.{}", type_name.into(), field_name.into());
        self.subscriptions
            .insert(key, Box::new(FnSubscriptionResolver::new(f)));
    }

    /// Gets a field resolver, falling back to the default resolver.
    pub fn get(&self, type_name: &str, field_name: &str) -> Option<&dyn Resolver> {
        let key = format!("{type_name}.{field_name}");
        self.resolvers
            .get(&key)
            .map(|r| r.as_ref())
            .or(self.default_resolver.as_ref().map(|r| r.as_ref()))
    }

    /// Gets a subscription resolver. No default exists for these.
    pub fn get_subscription(
        &self,
        type_name: &str,
        field_name: &str,
    ) -> Option<&dyn SubscriptionResolver> {
        let key = format!("{type_name}.{field_name}");
        self.subscriptions.get(&key).map(|r| r.as_ref())
    }

    /// Sets the default resolver.
    pub fn set_default<R: Resolver + 'static>(&mut self, resolver: R) {
        self.default_resolver = Some(Box::new(resolver));
    }
}

impl Debug for ResolverMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverMap")
            .field("resolver_count", &self.resolvers.len())
            .field("subscription_count", &self.subscriptions.len())
            .field("has_default", &self.default_resolver.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver_args() {
        let mut args = ResolverArgs::new();
        args.set("id", serde_json::json!(123));
        args.set("name", serde_json::json!("test"));

        assert_eq!(args.get_as::<i64>("id"), Some(123));
        assert_eq!(args.get_as::<String>("name"), Some("test".to_string()));
        assert_eq!(args.get_as::<i64>("missing"), None);
        assert!(args.require::<i64>("missing").is_err());
    }

    #[test]
    fn test_to_snake_case() {
        assert_eq!(to_snake_case("firstName"), "first_name");
        assert_eq!(to_snake_case("id"), "id");
    }

    #[tokio::test]
    async fn test_default_resolver() {
        let resolver = DefaultResolver;
        let parent = serde_json::json!({"name": "Alice", "created_at": "now"});
        let args = ResolverArgs::new();
        let ctx = Context::new();

        let info = ResolverInfo::new("name", "User");
        let result = resolver.resolve(&parent, &args, &ctx, &info).await;
        assert_eq!(result.unwrap(), serde_json::json!("Alice"));

        // Falls through to the snake_case spelling.
        let info = ResolverInfo::new("createdAt", "User");
        let result = resolver.resolve(&parent, &args, &ctx, &info).await;
        assert_eq!(result.unwrap(), serde_json::json!("now"));

        let info = ResolverInfo::new("missing", "User");
        let result = resolver.resolve(&parent, &args, &ctx, &info).await;
        assert_eq!(result.unwrap(), serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_async_fn_resolver() {
        let resolver = AsyncFnResolver::new(|_parent, args, _ctx, _info| async move {
            let id: i64 = args.require("id")?;
            Ok(serde_json::json!({ "id": id }))
        });

        let parent = serde_json::json!({});
        let mut args = ResolverArgs::new();
        args.set("id", serde_json::json!(7));
        let ctx = Context::new();
        let info = ResolverInfo::new("user", "Query");

        let result = resolver.resolve(&parent, &args, &ctx, &info).await;
        assert_eq!(result.unwrap(), serde_json::json!({"id": 7}));
    }

    #[tokio::test]
    async fn test_resolver_map_default_fallback() {
        let map = ResolverMap::new();

        let resolver = map.get("User", "name").unwrap();
        let parent = serde_json::json!({"name": "Bob"});
        let args = ResolverArgs::new();
        let ctx = Context::new();
        let info = ResolverInfo::new("name", "User");

        let result = resolver.resolve(&parent, &args, &ctx, &info).await;
        assert_eq!(result.unwrap(), serde_json::json!("Bob"));
    }

    #[tokio::test]
    async fn test_subscription_registry() {
        let mut map = ResolverMap::new();
        map.register_subscription("Subscription", "ticks", |_root, _args, _ctx, _info| async {
            let (tx, rx) = mpsc::channel(4);
            tx.send(serde_json::json!(1)).await.ok();
            drop(tx);
            Ok(rx)
        });

        assert!(map.get_subscription("Subscription", "ticks").is_some());
        assert!(map.get_subscription("Subscription", "other").is_none());

        let resolver = map.get_subscription("Subscription", "ticks").unwrap();
        let root = Value::Null;
        let args = ResolverArgs::new();
        let ctx = Context::new();
        let info = ResolverInfo::new("ticks", "Subscription");
        let mut stream = resolver.subscribe(&root, &args, &ctx, &info).await.unwrap();
        assert_eq!(stream.recv().await, Some(serde_json::json!(1)));
        assert_eq!(stream.recv().await, None);
    }
}
