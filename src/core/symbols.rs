//! Identifier store
//!
//! Identifiers live in an append-only arena and are referenced by
//! [`IdentId`]. The visible scope maps names to the identifier currently
//! answering to that name; private identifiers stay in the arena but are not
//! reachable by name.

use crate::core::types::{TypeClass, TypeDef, TypeExpr};
use crate::errors::SourceLocation;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;

/// Index of an identifier in the arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentId(u32);

impl IdentId {
    pub fn from_raw(raw: u32) -> Self {
        IdentId(raw)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where a definition was written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub here: SourceLocation,
    /// Name at the definition site, when the identifier is known locally by an alias
    pub aka: Option<String>,
}

impl Provenance {
    pub fn new(file: impl Into<PathBuf>, line: usize) -> Self {
        Self { here: SourceLocation::new(file, line), aka: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

/// Identity of a file's content: inode, device and modification time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileKey {
    pub ino: u64,
    pub dev: u64,
    pub mtime: i64,
}

/// The definition slot an identifier was reconstructed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Origin {
    pub file: FileKey,
    pub slot: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Num(i64),
    Str(String),
    Ref(IdentId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Undef,
    /// `%free` value parameter not yet bound
    Free,
    Defined(Expr),
    /// Constructor of an algebraic type
    Constructor { tag: u32, arity: usize },
    /// Redirected to the canonical copy of a shared definition
    Shared(IdentId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdKind {
    Undef,
    /// Failed type check
    Wrong,
    Value(TypeExpr),
    Type(TypeDef),
}

/// Coarse state of an identifier as seen by diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdState {
    Undefined,
    Specified,
    Defined,
    TypeError,
    Free,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub name: String,
    pub value: Value,
    pub kind: IdKind,
    pub who: Option<Provenance>,
    pub visibility: Visibility,
    pub origin: Option<Origin>,
}

impl Identifier {
    fn undefined(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: Value::Undef,
            kind: IdKind::Undef,
            who: None,
            visibility: Visibility::Public,
            origin: None,
        }
    }

    pub fn state(&self) -> IdState {
        match (&self.kind, &self.value) {
            (IdKind::Wrong, _) => IdState::TypeError,
            (IdKind::Type(def), _) if def.class == TypeClass::Free => IdState::Free,
            (IdKind::Type(def), _) if def.class == TypeClass::Placeholder => IdState::Specified,
            (IdKind::Type(_), _) => IdState::Defined,
            (_, Value::Free) => IdState::Free,
            (IdKind::Undef, Value::Undef) => IdState::Undefined,
            (IdKind::Value(_), Value::Undef) => IdState::Specified,
            _ => IdState::Defined,
        }
    }

    pub fn is_undefined(&self) -> bool {
        self.state() == IdState::Undefined
    }

    pub fn is_type(&self) -> bool {
        matches!(self.kind, IdKind::Type(_))
    }

    pub fn type_def(&self) -> Option<&TypeDef> {
        match &self.kind {
            IdKind::Type(def) => Some(def),
            _ => None,
        }
    }

    pub fn is_synonym(&self) -> bool {
        self.type_def().map_or(false, TypeDef::is_synonym)
    }

    pub fn is_constructor(&self) -> bool {
        matches!(self.value, Value::Constructor { .. })
    }

    pub fn is_free(&self) -> bool {
        self.state() == IdState::Free
    }

    /// Names that can be exported individually: everything but constructors
    pub fn is_variable(&self) -> bool {
        !self.is_constructor()
    }

    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    /// Name at the definition site
    pub fn original_name(&self) -> &str {
        self.who
            .as_ref()
            .and_then(|who| who.aka.as_deref())
            .unwrap_or(&self.name)
    }
}

/// Arena of identifiers plus the visible scope
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolTable {
    idents: Vec<Identifier>,
    scope: HashMap<String, IdentId>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.idents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idents.is_empty()
    }

    /// Fresh undefined identifier, not reachable by name
    pub fn alloc(&mut self, name: &str) -> IdentId {
        let id = IdentId(self.idents.len() as u32);
        self.idents.push(Identifier::undefined(name));
        id
    }

    /// Identifier currently answering to `name`, created undefined if absent
    pub fn intern(&mut self, name: &str) -> IdentId {
        if let Some(&id) = self.scope.get(name) {
            return id;
        }
        let id = self.alloc(name);
        self.scope.insert(name.to_string(), id);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<IdentId> {
        self.scope.get(name).copied()
    }

    pub fn get(&self, id: IdentId) -> &Identifier {
        &self.idents[id.index()]
    }

    pub fn get_mut(&mut self, id: IdentId) -> &mut Identifier {
        &mut self.idents[id.index()]
    }

    pub fn name(&self, id: IdentId) -> &str {
        &self.idents[id.index()].name
    }

    /// Make `id` answer to its name, displacing whatever did before
    pub fn bind(&mut self, id: IdentId) {
        let ident = &mut self.idents[id.index()];
        ident.visibility = Visibility::Public;
        self.scope.insert(ident.name.clone(), id);
    }

    /// Remove `id` from the scope; its slot is untouched
    pub fn unbind(&mut self, id: IdentId) {
        let ident = &mut self.idents[id.index()];
        ident.visibility = Visibility::Private;
        if self.scope.get(&ident.name) == Some(&id) {
            self.scope.remove(&ident.name);
        }
    }

    pub fn is_visible(&self, id: IdentId) -> bool {
        self.scope.get(self.name(id)) == Some(&id)
    }

    /// Follow shared-definition redirections to the canonical identifier
    pub fn resolve(&self, mut id: IdentId) -> IdentId {
        let mut hops = 0;
        while let Value::Shared(next) = self.get(id).value {
            if next == id || hops > self.idents.len() {
                break;
            }
            id = next;
            hops += 1;
        }
        id
    }

    /// Point `from` at `to`, unless that would close a cycle
    pub fn redirect(&mut self, from: IdentId, to: IdentId) {
        if self.resolve(to) != from {
            self.get_mut(from).value = Value::Shared(to);
        }
    }

    /// Reset to undefined: no value, no type, no provenance
    pub fn unset(&mut self, id: IdentId) {
        let ident = &mut self.idents[id.index()];
        ident.value = Value::Undef;
        ident.kind = IdKind::Undef;
        ident.who = None;
        ident.origin = None;
        ident.visibility = Visibility::Public;
    }

    /// Non-synonym types a type expression depends on, expanding synonyms
    pub fn type_deps(&self, ty: &TypeExpr) -> Vec<IdentId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        self.collect_type_deps(ty, &mut out, &mut seen);
        out
    }

    fn collect_type_deps(&self, ty: &TypeExpr, out: &mut Vec<IdentId>, seen: &mut HashSet<IdentId>) {
        let mut refs = Vec::new();
        ty.type_refs(&mut refs);
        for id in refs {
            let id = self.resolve(id);
            if !seen.insert(id) {
                continue;
            }
            match self.get(id).type_def() {
                Some(TypeDef { class: TypeClass::Synonym(body), .. }) => {
                    self.collect_type_deps(body, out, seen);
                }
                _ => out.push(id),
            }
        }
    }

    /// Types mentioned by an identifier's own definition
    pub fn ident_type_deps(&self, id: IdentId) -> Vec<IdentId> {
        match &self.get(id).kind {
            IdKind::Value(ty) => self.type_deps(ty),
            IdKind::Type(TypeDef { class: TypeClass::Synonym(body), .. }) => self.type_deps(body),
            _ => Vec::new(),
        }
    }

    /// Names in scope that currently denote something
    pub fn defined_names(&self) -> BTreeSet<String> {
        self.scope
            .iter()
            .filter(|(_, id)| !self.get(**id).is_undefined())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn display_type(&self, ty: &TypeExpr) -> String {
        TypeDisplay { symbols: self, ty }.to_string()
    }
}

struct TypeDisplay<'a> {
    symbols: &'a SymbolTable,
    ty: &'a TypeExpr,
}

impl TypeDisplay<'_> {
    fn nested<'b>(&'b self, ty: &'b TypeExpr) -> TypeDisplay<'b> {
        TypeDisplay { symbols: self.symbols, ty }
    }
}

impl fmt::Display for TypeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            TypeExpr::Prim(prim) => write!(f, "{}", prim),
            TypeExpr::Var(n) => write!(f, "{}", "*".repeat(*n as usize)),
            TypeExpr::Con { id, args } => {
                write!(f, "{}", self.symbols.name(*id))?;
                for arg in args {
                    match arg {
                        TypeExpr::Con { args: inner, .. } if !inner.is_empty() => {
                            write!(f, " ({})", self.nested(arg))?
                        }
                        TypeExpr::Arrow(..) => write!(f, " ({})", self.nested(arg))?,
                        _ => write!(f, " {}", self.nested(arg))?,
                    }
                }
                Ok(())
            }
            TypeExpr::Arrow(from, to) => match from.as_ref() {
                TypeExpr::Arrow(..) => write!(f, "({})->{}", self.nested(from), self.nested(to)),
                _ => write!(f, "{}->{}", self.nested(from), self.nested(to)),
            },
            TypeExpr::List(elem) => write!(f, "[{}]", self.nested(elem)),
            TypeExpr::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", self.nested(item))?;
                }
                write!(f, ")")
            }
        }
    }
}
