//! Operation document AST for igql.
//!
//! The execution engine consumes documents that have already been parsed
//! and validated upstream; this crate is the shape of that input. It
//! carries operations, fragments, selections, directives and value
//! literals, and nothing about source text or validation.

pub mod ast;

pub use ast::{
    Directive, Document, FieldSelection, FragmentDefinition, FragmentSpread, InlineFragment,
    InputValue, OperationDefinition, OperationKind, Selection, SelectionSet, TypeAnnotation,
    VariableDefinition,
};
