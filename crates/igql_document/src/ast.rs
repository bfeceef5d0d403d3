//! AST nodes for validated operation documents.

use rustc_hash::FxHashMap;

/// A validated executable document: operations plus their fragments.
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub operations: Vec<OperationDefinition>,
    pub fragments: Vec<FragmentDefinition>,
}

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the fragment-name lookup table used during field collection.
    pub fn fragment_map(&self) -> FxHashMap<&str, &FragmentDefinition> {
        self.fragments
            .iter()
            .map(|f| (f.name.as_str(), f))
            .collect()
    }

    /// Selects the operation to execute.
    ///
    /// With no name, the document must contain exactly one operation.
    pub fn operation(&self, name: Option<&str>) -> Option<&OperationDefinition> {
        match name {
            Some(name) => self
                .operations
                .iter()
                .find(|op| op.name.as_deref() == Some(name)),
            None => {
                if self.operations.len() == 1 {
                    self.operations.first()
                } else {
                    None
                }
            }
        }
    }
}

/// An operation definition.
#[derive(Debug, Clone)]
pub struct OperationDefinition {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub variable_definitions: Vec<VariableDefinition>,
    pub directives: Vec<Directive>,
    pub selection_set: SelectionSet,
}

/// The kind of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// A variable definition on an operation.
#[derive(Debug, Clone)]
pub struct VariableDefinition {
    pub name: String,
    pub ty: TypeAnnotation,
    pub default_value: Option<InputValue>,
}

/// A type annotation in variable-definition position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeAnnotation {
    Named(String),
    List(Box<TypeAnnotation>),
    NonNull(Box<TypeAnnotation>),
}

impl TypeAnnotation {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn list(inner: TypeAnnotation) -> Self {
        Self::List(Box::new(inner))
    }

    pub fn non_null(inner: TypeAnnotation) -> Self {
        Self::NonNull(Box::new(inner))
    }

    /// Returns true for `NonNull` annotations.
    pub fn is_non_null(&self) -> bool {
        matches!(self, Self::NonNull(_))
    }
}

/// An ordered set of selections.
pub type SelectionSet = Vec<Selection>;

/// A single selection.
#[derive(Debug, Clone)]
pub enum Selection {
    Field(FieldSelection),
    FragmentSpread(FragmentSpread),
    InlineFragment(InlineFragment),
}

/// A field selection.
#[derive(Debug, Clone)]
pub struct FieldSelection {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<(String, InputValue)>,
    pub directives: Vec<Directive>,
    pub selection_set: SelectionSet,
}

impl FieldSelection {
    /// Creates a leaf field selection with no alias or arguments.
    pub fn leaf(name: impl Into<String>) -> Self {
        Self {
            alias: None,
            name: name.into(),
            arguments: Vec::new(),
            directives: Vec::new(),
            selection_set: Vec::new(),
        }
    }

    /// The key this field contributes to the response object.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// A named fragment spread.
#[derive(Debug, Clone)]
pub struct FragmentSpread {
    pub name: String,
    pub directives: Vec<Directive>,
}

/// An inline fragment.
#[derive(Debug, Clone)]
pub struct InlineFragment {
    pub type_condition: Option<String>,
    pub directives: Vec<Directive>,
    pub selection_set: SelectionSet,
}

/// A named fragment definition.
#[derive(Debug, Clone)]
pub struct FragmentDefinition {
    pub name: String,
    pub type_condition: String,
    pub directives: Vec<Directive>,
    pub selection_set: SelectionSet,
}

/// A directive applied to a selection or operation.
#[derive(Debug, Clone)]
pub struct Directive {
    pub name: String,
    pub arguments: Vec<(String, InputValue)>,
}

impl Directive {
    /// Creates a directive with no arguments.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
        }
    }

    /// Adds an argument.
    pub fn with_argument(mut self, name: impl Into<String>, value: InputValue) -> Self {
        self.arguments.push((name.into(), value));
        self
    }

    /// Gets an argument value by name.
    pub fn argument(&self, name: &str) -> Option<&InputValue> {
        self.arguments
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// An input value literal, possibly containing variable references.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Variable(String),
    Int(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
    Enum(String),
    List(Vec<InputValue>),
    Object(Vec<(String, InputValue)>),
}

impl InputValue {
    /// Converts a literal (variable-free) value to JSON.
    ///
    /// Returns `None` if the tree still contains a variable reference.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        match self {
            Self::Variable(_) => None,
            Self::Int(i) => Some(serde_json::Value::from(*i)),
            Self::Float(f) => serde_json::Number::from_f64(*f).map(serde_json::Value::Number),
            Self::String(s) | Self::Enum(s) => Some(serde_json::Value::String(s.clone())),
            Self::Boolean(b) => Some(serde_json::Value::Bool(*b)),
            Self::Null => Some(serde_json::Value::Null),
            Self::List(items) => items
                .iter()
                .map(InputValue::to_json)
                .collect::<Option<Vec<_>>>()
                .map(serde_json::Value::Array),
            Self::Object(fields) => fields
                .iter()
                .map(|(k, v)| v.to_json().map(|v| (k.clone(), v)))
                .collect::<Option<serde_json::Map<_, _>>>()
                .map(serde_json::Value::Object),
        }
    }
}
