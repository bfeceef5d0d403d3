//! Runtime for igql.
//!
//! This crate provides the GraphQL execution runtime:
//! - `schema`: Schema definition and building
//! - `resolver`: Field and subscription resolvers
//! - `values`: Variable and argument coercion
//! - `collector`: Field collection and fragment merging
//! - `executor`: Query execution and value completion
//! - `incremental`: @defer/@stream incremental delivery
//! - `subscription`: Subscription execution
//! - `path`: Response paths

pub mod collector;
pub mod executor;
pub mod incremental;
pub mod path;
pub mod resolver;
pub mod schema;
pub mod subscription;
pub mod values;

pub use collector::{CollectedFields, DeferredGroup, FieldGroup, StreamDirective};
pub use executor::{
    Context, Executor, ExecutorConfig, FieldError, RequestError, Response,
};
pub use incremental::{
    CompletedNotice, IncrementalChunk, IncrementalResponse, InitialPayload, PendingNotice,
    SubsequentPayload,
};
pub use path::{Path, PathSegment};
pub use resolver::{
    AsyncFnResolver, DefaultResolver, FnResolver, Resolver, ResolverArgs, ResolverError,
    ResolverInfo, ResolverMap, SourceEventStream, SubscriptionResolver,
};
pub use schema::{
    ArgumentDef, EnumDef, FieldDef, InputObjectDef, InterfaceDef, ObjectDef, ScalarDef, Schema,
    SchemaBuilder, TypeDef, TypeRef, UnionDef,
};
pub use subscription::{SubscribeError, SubscriptionStream};
pub use values::{coerce_variable_values, VariableValues};
