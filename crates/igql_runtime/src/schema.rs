//! Schema model for igql.
//!
//! The engine assumes the schema was built and validated upstream; this
//! module is the runtime's view of it: type tables, field metadata, and
//! the two capabilities execution needs beyond plain data — per-scalar
//! serialization and per-abstract-type runtime type resolution.

use igql_document::{InputValue, OperationKind};
use indexmap::IndexMap;
use serde_json::Value;
use std::sync::Arc;

use crate::executor::Context;

/// Leaf serialization capability carried by a scalar type.
pub type ScalarSerializeFn = Arc<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

/// Runtime type resolution capability carried by an abstract type.
pub type ResolveTypeFn = Arc<dyn Fn(&Value, &Context) -> Option<String> + Send + Sync>;

/// Type-membership predicate carried by an object type.
pub type IsTypeOfFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// A validated type schema.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub query_type: Option<String>,
    pub mutation_type: Option<String>,
    pub subscription_type: Option<String>,
    pub types: IndexMap<String, TypeDef>,
}

impl Schema {
    /// Creates a new empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a type by name.
    pub fn get_type(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    /// Gets an object type by name.
    pub fn get_object(&self, name: &str) -> Option<&ObjectDef> {
        match self.types.get(name) {
            Some(TypeDef::Object(obj)) => Some(obj),
            _ => None,
        }
    }

    /// The root type name for an operation kind.
    pub fn root_type(&self, kind: OperationKind) -> Option<&str> {
        match kind {
            OperationKind::Query => self.query_type.as_deref(),
            OperationKind::Mutation => self.mutation_type.as_deref(),
            OperationKind::Subscription => self.subscription_type.as_deref(),
        }
    }

    /// Looks up a field definition on an object or interface type.
    pub fn field_def(&self, type_name: &str, field_name: &str) -> Option<&FieldDef> {
        match self.types.get(type_name)? {
            TypeDef::Object(obj) => obj.fields.get(field_name),
            TypeDef::Interface(iface) => iface.fields.get(field_name),
            _ => None,
        }
    }

    /// The concrete member types of an abstract type, in declaration order.
    pub fn possible_types(&self, abstract_name: &str) -> Vec<&ObjectDef> {
        match self.types.get(abstract_name) {
            Some(TypeDef::Union(union)) => union
                .members
                .iter()
                .filter_map(|m| self.get_object(m))
                .collect(),
            Some(TypeDef::Interface(_)) => self
                .types
                .values()
                .filter_map(|t| match t {
                    TypeDef::Object(obj)
                        if obj.implements.iter().any(|i| i == abstract_name) =>
                    {
                        Some(obj)
                    }
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Returns true if `concrete` is a member of the abstract type.
    pub fn is_possible_type(&self, abstract_name: &str, concrete: &str) -> bool {
        self.possible_types(abstract_name)
            .iter()
            .any(|obj| obj.name == concrete)
    }
}

/// A type definition.
#[derive(Debug, Clone)]
pub enum TypeDef {
    Scalar(ScalarDef),
    Object(ObjectDef),
    Interface(InterfaceDef),
    Union(UnionDef),
    Enum(EnumDef),
    InputObject(InputObjectDef),
}

impl TypeDef {
    /// The type's name.
    pub fn name(&self) -> &str {
        match self {
            Self::Scalar(s) => &s.name,
            Self::Object(o) => &o.name,
            Self::Interface(i) => &i.name,
            Self::Union(u) => &u.name,
            Self::Enum(e) => &e.name,
            Self::InputObject(i) => &i.name,
        }
    }

    /// Returns true for interface and union types.
    pub fn is_abstract(&self) -> bool {
        matches!(self, Self::Interface(_) | Self::Union(_))
    }

    /// Returns true for scalar and enum types.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Self::Scalar(_) | Self::Enum(_))
    }
}

/// Scalar type definition.
#[derive(Clone)]
pub struct ScalarDef {
    pub name: String,
    pub description: Option<String>,
    pub serialize: Option<ScalarSerializeFn>,
}

impl ScalarDef {
    /// Serializes a resolved value through this scalar.
    ///
    /// With no custom serializer the built-in scalars check the JSON
    /// kind; unknown scalars pass values through untouched.
    pub fn serialize_value(&self, value: &Value) -> Result<Value, String> {
        if let Some(serialize) = &self.serialize {
            return serialize(value);
        }
        match self.name.as_str() {
            "Int" => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
                other => Err(format!("Int cannot represent value: {other}")),
            },
            "Float" => match value {
                Value::Number(_) => Ok(value.clone()),
                other => Err(format!("Float cannot represent value: {other}")),
            },
            "String" => match value {
                Value::String(_) => Ok(value.clone()),
                other => Err(format!("String cannot represent value: {other}")),
            },
            "Boolean" => match value {
                Value::Bool(_) => Ok(value.clone()),
                other => Err(format!("Boolean cannot represent value: {other}")),
            },
            "ID" => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) if n.is_i64() || n.is_u64() => {
                    Ok(Value::String(n.to_string()))
                }
                other => Err(format!("ID cannot represent value: {other}")),
            },
            _ => Ok(value.clone()),
        }
    }
}

impl std::fmt::Debug for ScalarDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalarDef")
            .field("name", &self.name)
            .field("has_serialize", &self.serialize.is_some())
            .finish()
    }
}

/// Object type definition.
#[derive(Clone)]
pub struct ObjectDef {
    pub name: String,
    pub description: Option<String>,
    pub fields: IndexMap<String, FieldDef>,
    pub implements: Vec<String>,
    pub is_type_of: Option<IsTypeOfFn>,
}

impl ObjectDef {
    /// Creates an object type with the given fields.
    pub fn new(name: impl Into<String>, fields: IndexMap<String, FieldDef>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields,
            implements: Vec::new(),
            is_type_of: None,
        }
    }

    /// Declares an implemented interface.
    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.implements.push(interface.into());
        self
    }

    /// Sets the type-membership predicate.
    pub fn is_type_of<F>(mut self, f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.is_type_of = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for ObjectDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectDef")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("implements", &self.implements)
            .field("has_is_type_of", &self.is_type_of.is_some())
            .finish()
    }
}

/// Interface type definition.
#[derive(Clone)]
pub struct InterfaceDef {
    pub name: String,
    pub description: Option<String>,
    pub fields: IndexMap<String, FieldDef>,
    pub implements: Vec<String>,
    pub resolve_type: Option<ResolveTypeFn>,
}

impl std::fmt::Debug for InterfaceDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterfaceDef")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("has_resolve_type", &self.resolve_type.is_some())
            .finish()
    }
}

/// Union type definition.
#[derive(Clone)]
pub struct UnionDef {
    pub name: String,
    pub description: Option<String>,
    pub members: Vec<String>,
    pub resolve_type: Option<ResolveTypeFn>,
}

impl std::fmt::Debug for UnionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnionDef")
            .field("name", &self.name)
            .field("members", &self.members)
            .field("has_resolve_type", &self.resolve_type.is_some())
            .finish()
    }
}

/// Enum type definition.
#[derive(Debug, Clone)]
pub struct EnumDef {
    pub name: String,
    pub description: Option<String>,
    pub values: Vec<EnumValueDef>,
}

impl EnumDef {
    /// Returns true if the enum declares this value.
    pub fn has_value(&self, name: &str) -> bool {
        self.values.iter().any(|v| v.name == name)
    }
}

/// Enum value definition.
#[derive(Debug, Clone)]
pub struct EnumValueDef {
    pub name: String,
    pub description: Option<String>,
    pub deprecated: bool,
}

/// Input object type definition.
#[derive(Debug, Clone)]
pub struct InputObjectDef {
    pub name: String,
    pub description: Option<String>,
    pub fields: IndexMap<String, ArgumentDef>,
}

/// Field definition.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
    pub arguments: IndexMap<String, ArgumentDef>,
    pub deprecated: bool,
}

impl FieldDef {
    /// Creates a field definition with no arguments.
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            description: None,
            ty,
            arguments: IndexMap::new(),
            deprecated: false,
        }
    }

    /// Adds an argument definition.
    pub fn argument(mut self, arg: ArgumentDef) -> Self {
        self.arguments.insert(arg.name.clone(), arg);
        self
    }
}

/// Argument (or input field) definition.
#[derive(Debug, Clone)]
pub struct ArgumentDef {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
    pub default_value: Option<InputValue>,
}

impl ArgumentDef {
    /// Creates an argument definition.
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            description: None,
            ty,
            default_value: None,
        }
    }

    /// Sets the default value.
    pub fn default_value(mut self, value: InputValue) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// Type reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn list(inner: TypeRef) -> Self {
        Self::List(Box::new(inner))
    }

    pub fn non_null(inner: TypeRef) -> Self {
        Self::NonNull(Box::new(inner))
    }

    /// Returns true for `NonNull` references.
    pub fn is_non_null(&self) -> bool {
        matches!(self, Self::NonNull(_))
    }

    /// Strips any `NonNull` wrapper.
    pub fn nullable(&self) -> &TypeRef {
        match self {
            Self::NonNull(inner) => inner,
            other => other,
        }
    }

    /// The innermost named type.
    pub fn named_type(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::List(inner) | Self::NonNull(inner) => inner.named_type(),
        }
    }
}

impl std::fmt::Display for TypeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{name}"),
            Self::List(inner) => write!(f, "[{inner}]"),
            Self::NonNull(inner) => write!(f, "{inner}!"),
        }
    }
}

/// Schema builder.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    /// Creates a new schema builder with the built-in scalars installed.
    pub fn new() -> Self {
        let mut builder = Self::default();
        for name in ["Int", "Float", "String", "Boolean", "ID"] {
            builder.schema.types.insert(
                name.to_string(),
                TypeDef::Scalar(ScalarDef {
                    name: name.to_string(),
                    description: Some(format!("Built-in {name} scalar")),
                    serialize: None,
                }),
            );
        }
        builder
    }

    /// Sets the query root type.
    pub fn query_type(mut self, name: impl Into<String>) -> Self {
        self.schema.query_type = Some(name.into());
        self
    }

    /// Sets the mutation root type.
    pub fn mutation_type(mut self, name: impl Into<String>) -> Self {
        self.schema.mutation_type = Some(name.into());
        self
    }

    /// Sets the subscription root type.
    pub fn subscription_type(mut self, name: impl Into<String>) -> Self {
        self.schema.subscription_type = Some(name.into());
        self
    }

    /// Adds a type.
    pub fn add_type(mut self, type_def: TypeDef) -> Self {
        self.schema
            .types
            .insert(type_def.name().to_string(), type_def);
        self
    }

    /// Adds an object type.
    pub fn add_object(self, object: ObjectDef) -> Self {
        self.add_type(TypeDef::Object(object))
    }

    /// Builds the schema.
    pub fn build(self) -> Schema {
        self.schema
    }
}
