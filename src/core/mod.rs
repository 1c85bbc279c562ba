//! Core symbol model
//!
//! This module contains the identifier arena and the type expressions that
//! every other part of the compiler shares.

pub mod symbols;
pub mod types;

pub use symbols::{
    Expr, FileKey, IdKind, IdState, IdentId, Identifier, Origin, Provenance, SymbolTable, Value,
    Visibility,
};
pub use types::{Prim, TypeClass, TypeDef, TypeExpr};
