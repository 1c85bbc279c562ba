//! Type expressions and type definitions
//!
//! Types are a closed set of variants over the identifier arena: a type name
//! is always an [`IdentId`] pointing at the identifier that introduced it, so
//! two types are the same exactly when their identifiers resolve to the same
//! slot.

use crate::core::symbols::IdentId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Built-in types with no introducing identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Prim {
    Num,
    Char,
    Bool,
}

impl Prim {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "num" => Some(Prim::Num),
            "char" => Some(Prim::Char),
            "bool" => Some(Prim::Bool),
            _ => None,
        }
    }
}

impl fmt::Display for Prim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prim::Num => write!(f, "num"),
            Prim::Char => write!(f, "char"),
            Prim::Bool => write!(f, "bool"),
        }
    }
}

/// A type expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeExpr {
    Prim(Prim),
    /// Type variable, numbered from 1 (`*`, `**`, ...)
    Var(u32),
    /// Application of a named type to arguments
    Con { id: IdentId, args: Vec<TypeExpr> },
    Arrow(Box<TypeExpr>, Box<TypeExpr>),
    List(Box<TypeExpr>),
    Tuple(Vec<TypeExpr>),
}

impl TypeExpr {
    pub fn con(id: IdentId) -> Self {
        TypeExpr::Con { id, args: Vec::new() }
    }

    pub fn arrow(from: TypeExpr, to: TypeExpr) -> Self {
        TypeExpr::Arrow(Box::new(from), Box::new(to))
    }

    pub fn string() -> Self {
        TypeExpr::List(Box::new(TypeExpr::Prim(Prim::Char)))
    }

    /// Every type name mentioned, outermost first, without synonym expansion
    pub fn type_refs(&self, out: &mut Vec<IdentId>) {
        match self {
            TypeExpr::Prim(_) | TypeExpr::Var(_) => {}
            TypeExpr::Con { id, args } => {
                out.push(*id);
                for arg in args {
                    arg.type_refs(out);
                }
            }
            TypeExpr::Arrow(from, to) => {
                from.type_refs(out);
                to.type_refs(out);
            }
            TypeExpr::List(elem) => elem.type_refs(out),
            TypeExpr::Tuple(items) => {
                for item in items {
                    item.type_refs(out);
                }
            }
        }
    }

    /// Result type after stripping `arity` arrows
    pub fn result_after(&self, arity: usize) -> &TypeExpr {
        let mut ty = self;
        for _ in 0..arity {
            match ty {
                TypeExpr::Arrow(_, to) => ty = to,
                _ => break,
            }
        }
        ty
    }
}

/// How a type name is defined
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeClass {
    /// Data type with its constructors, in declaration order
    Algebraic { constructors: Vec<IdentId> },
    Abstract,
    /// Another name for an existing type; denotes rather than introduces
    Synonym(TypeExpr),
    /// Named in a signature but not yet given a definition
    Placeholder,
    /// `%free` type parameter awaiting a binding from the includer
    Free,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    pub arity: usize,
    pub class: TypeClass,
}

impl TypeDef {
    pub fn new(arity: usize, class: TypeClass) -> Self {
        Self { arity, class }
    }

    pub fn is_synonym(&self) -> bool {
        matches!(self.class, TypeClass::Synonym(_))
    }

    pub fn describe(&self) -> &'static str {
        match self.class {
            TypeClass::Algebraic { .. } => "algebraic type",
            TypeClass::Abstract => "abstract type",
            TypeClass::Synonym(_) => "synonym type",
            TypeClass::Placeholder => "placeholder type",
            TypeClass::Free => "free type",
        }
    }
}
