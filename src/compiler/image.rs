//! Dump payload: a self-contained picture of a compiled script
//!
//! Identifiers are written as positions (`file`, `def`) inside the image so
//! that a dump can be installed into any symbol table. Anything the image
//! does not define itself is written by name and looked up on load.

use crate::compiler::bind::{lower_expr, lower_type};
use crate::compiler::exports::ExportView;
use crate::compiler::script::{FileIdentity, ScriptRecord, Timestamp};
use crate::compiler::session::Session;
use crate::core::symbols::{Expr, IdKind, IdentId, Origin, Provenance, SymbolTable, Value};
use crate::core::types::{Prim, TypeClass, TypeDef, TypeExpr};
use crate::errors::{IncludeFailure, SourceLocation};
use crate::frontend::syntax::{Binding, IncludeDirective};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefImage {
    Local { file: u32, def: u32 },
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeImage {
    Prim(Prim),
    Var(u32),
    Con { target: RefImage, args: Vec<TypeImage> },
    Arrow(Box<TypeImage>, Box<TypeImage>),
    List(Box<TypeImage>),
    Tuple(Vec<TypeImage>),
}

impl TypeImage {
    fn refs<'a>(&'a self, out: &mut Vec<&'a RefImage>) {
        match self {
            TypeImage::Prim(_) | TypeImage::Var(_) => {}
            TypeImage::Con { target, args } => {
                out.push(target);
                args.iter().for_each(|arg| arg.refs(out));
            }
            TypeImage::Arrow(from, to) => {
                from.refs(out);
                to.refs(out);
            }
            TypeImage::List(elem) => elem.refs(out),
            TypeImage::Tuple(items) => items.iter().for_each(|item| item.refs(out)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassImage {
    Algebraic(Vec<RefImage>),
    Abstract,
    Synonym(TypeImage),
    Placeholder,
    Free,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KindImage {
    Undef,
    Wrong,
    Value(TypeImage),
    Type { arity: usize, class: ClassImage },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueImage {
    Undef,
    Free,
    Num(i64),
    Str(String),
    Ref(RefImage),
    Constructor { tag: u32, arity: usize },
    Shared(RefImage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhoImage {
    pub file: PathBuf,
    pub line: usize,
    pub aka: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefImage {
    pub name: String,
    pub public: bool,
    pub who: Option<WhoImage>,
    pub kind: KindImage,
    pub value: ValueImage,
}

impl DefImage {
    fn is_type(&self) -> bool {
        matches!(self.kind, KindImage::Type { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileImage {
    pub path: PathBuf,
    pub mtime: Timestamp,
    pub ino: u64,
    pub dev: u64,
    pub shared: bool,
    pub defs: Vec<DefImage>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptImage {
    /// The script's own record first, then inserted and included files
    pub files: Vec<FileImage>,
    /// Identifiers with undefined names or type errors
    pub errors: Vec<RefImage>,
    /// Unbound `%free` parameters
    pub free: Vec<RefImage>,
    /// Exports mention types that are not exported
    pub type_orphans: bool,
    /// Written for a script that failed to parse; records sources only
    pub syntax_error: bool,
}

/// What installing an image produced
#[derive(Debug, Default)]
pub struct Installed {
    pub records: Vec<ScriptRecord>,
    pub errors: Vec<IdentId>,
    pub free: Vec<IdentId>,
    /// Every identifier the install defined, in image order
    pub created: Vec<IdentId>,
    /// Public in the image, in image order
    pub public: Vec<IdentId>,
    /// Own definitions the image keeps private
    pub internals: Vec<IdentId>,
    pub type_orphans: bool,
}

struct Capture<'a> {
    symbols: &'a SymbolTable,
    index: HashMap<IdentId, RefImage>,
}

impl Capture<'_> {
    fn reference(&self, id: IdentId) -> RefImage {
        if let Some(local) = self.index.get(&id) {
            return local.clone();
        }
        let canonical = self.symbols.resolve(id);
        self.index
            .get(&canonical)
            .cloned()
            .unwrap_or_else(|| RefImage::Named(self.symbols.name(id).to_string()))
    }

    fn ty(&self, ty: &TypeExpr) -> TypeImage {
        match ty {
            TypeExpr::Prim(prim) => TypeImage::Prim(*prim),
            TypeExpr::Var(n) => TypeImage::Var(*n),
            TypeExpr::Con { id, args } => TypeImage::Con {
                target: self.reference(*id),
                args: args.iter().map(|arg| self.ty(arg)).collect(),
            },
            TypeExpr::Arrow(from, to) => TypeImage::Arrow(Box::new(self.ty(from)), Box::new(self.ty(to))),
            TypeExpr::List(elem) => TypeImage::List(Box::new(self.ty(elem))),
            TypeExpr::Tuple(items) => TypeImage::Tuple(items.iter().map(|item| self.ty(item)).collect()),
        }
    }

    fn kind(&self, kind: &IdKind) -> KindImage {
        match kind {
            IdKind::Undef => KindImage::Undef,
            IdKind::Wrong => KindImage::Wrong,
            IdKind::Value(ty) => KindImage::Value(self.ty(ty)),
            IdKind::Type(def) => KindImage::Type {
                arity: def.arity,
                class: match &def.class {
                    TypeClass::Algebraic { constructors } => {
                        ClassImage::Algebraic(constructors.iter().map(|c| self.reference(*c)).collect())
                    }
                    TypeClass::Abstract => ClassImage::Abstract,
                    TypeClass::Synonym(body) => ClassImage::Synonym(self.ty(body)),
                    TypeClass::Placeholder => ClassImage::Placeholder,
                    TypeClass::Free => ClassImage::Free,
                },
            },
        }
    }

    fn value(&self, value: &Value) -> ValueImage {
        match value {
            Value::Undef => ValueImage::Undef,
            Value::Free => ValueImage::Free,
            Value::Defined(Expr::Num(n)) => ValueImage::Num(*n),
            Value::Defined(Expr::Str(s)) => ValueImage::Str(s.clone()),
            Value::Defined(Expr::Ref(id)) => ValueImage::Ref(self.reference(*id)),
            Value::Constructor { tag, arity } => ValueImage::Constructor { tag: *tag, arity: *arity },
            Value::Shared(id) => ValueImage::Shared(self.reference(*id)),
        }
    }
}

impl ScriptImage {
    /// Picture of the session's resident script, with visibility taken from `view`
    pub fn capture(session: &Session, view: &ExportView) -> Self {
        let symbols = &session.symbols;
        let mut index = HashMap::new();
        for (f, record) in session.files.iter().enumerate() {
            for (d, id) in record.defs.iter().enumerate() {
                index
                    .entry(*id)
                    .or_insert(RefImage::Local { file: f as u32, def: d as u32 });
            }
        }
        let capture = Capture { symbols, index };

        let files = session
            .files
            .iter()
            .map(|record| FileImage {
                path: record.path.clone(),
                mtime: record.mtime,
                ino: record.identity.ino,
                dev: record.identity.dev,
                shared: record.shared,
                defs: record
                    .defs
                    .iter()
                    .map(|&id| {
                        let ident = symbols.get(id);
                        DefImage {
                            name: ident.name.clone(),
                            public: view.is_public(id),
                            who: ident.who.as_ref().map(|who| WhoImage {
                                file: who.here.file.clone(),
                                line: who.here.line,
                                aka: who.aka.clone(),
                            }),
                            kind: capture.kind(&ident.kind),
                            value: capture.value(&ident.value),
                        }
                    })
                    .collect(),
            })
            .collect();

        ScriptImage {
            files,
            errors: session.errors.iter().map(|id| capture.reference(*id)).collect(),
            free: session.free_ids.iter().map(|id| capture.reference(*id)).collect(),
            type_orphans: session.may_orphan_types,
            syntax_error: false,
        }
    }

    /// Image recording only the sources of a script that failed to parse
    pub fn error_dump(records: &[ScriptRecord]) -> Self {
        ScriptImage {
            files: records
                .iter()
                .map(|record| FileImage {
                    path: record.path.clone(),
                    mtime: record.mtime,
                    ino: record.identity.ino,
                    dev: record.identity.dev,
                    shared: record.shared,
                    defs: Vec::new(),
                })
                .collect(),
            syntax_error: true,
            ..Default::default()
        }
    }

    /// Every local reference points at a definition of the image
    pub fn is_well_formed(&self) -> bool {
        let mut refs: Vec<&RefImage> = self.errors.iter().chain(self.free.iter()).collect();
        for def in self.files.iter().flat_map(|f| f.defs.iter()) {
            match &def.kind {
                KindImage::Value(ty) => ty.refs(&mut refs),
                KindImage::Type { class: ClassImage::Algebraic(constructors), .. } => refs.extend(constructors),
                KindImage::Type { class: ClassImage::Synonym(body), .. } => body.refs(&mut refs),
                _ => {}
            }
            if let ValueImage::Ref(target) | ValueImage::Shared(target) = &def.value {
                refs.push(target);
            }
        }
        refs.iter().all(|r| match r {
            RefImage::Local { .. } => self.def(r).is_some(),
            RefImage::Named(_) => true,
        })
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Source records without definitions, as stored
    pub fn sources(&self) -> Vec<ScriptRecord> {
        self.files.iter().map(FileImage::record).collect()
    }

    fn def(&self, at: &RefImage) -> Option<&DefImage> {
        match at {
            RefImage::Local { file, def } => self.files.get(*file as usize)?.defs.get(*def as usize),
            RefImage::Named(_) => None,
        }
    }

    fn find_public(&self, name: &str) -> Option<&DefImage> {
        self.files
            .iter()
            .flat_map(|f| f.defs.iter())
            .find(|def| def.public && def.name == name)
    }

    /// Check an include directive's bindings against the image
    fn check_bindings(&self, directive: &IncludeDirective) -> Result<(), IncludeFailure> {
        let mut missing = Vec::new();
        for (_, old) in directive.aliases() {
            if self.find_public(old).is_none() {
                missing.push(old.to_string());
            }
        }
        let mut suppressed_types = Vec::new();
        for name in directive.suppressed() {
            match self.find_public(name) {
                None => missing.push(name.to_string()),
                Some(def) if def.is_type() => suppressed_types.push(name.to_string()),
                Some(_) => {}
            }
        }
        if !missing.is_empty() {
            return Err(IncludeFailure::AliasNotFound { names: missing });
        }
        if !suppressed_types.is_empty() {
            return Err(IncludeFailure::SuppressedType { names: suppressed_types });
        }

        let free: Vec<&DefImage> = self.free.iter().filter_map(|r| self.def(r)).collect();
        let mut not_free = Vec::new();
        for binding in directive.parameters() {
            let (name, arity) = match binding {
                Binding::Value { name, .. } => (name, None),
                Binding::Type { name, arity, .. } => (name, Some(*arity)),
                _ => continue,
            };
            let Some(param) = free.iter().find(|def| &def.name == name) else {
                not_free.push(name.clone());
                continue;
            };
            match (&param.kind, arity) {
                (KindImage::Type { .. }, None) => {
                    return Err(IncludeFailure::WrongKind { name: name.clone(), expected_type: true });
                }
                (KindImage::Type { arity: expected, .. }, Some(found)) if *expected != found => {
                    return Err(IncludeFailure::WrongArity {
                        name: name.clone(),
                        expected: *expected,
                        found,
                    });
                }
                (KindImage::Type { .. }, Some(_)) => {}
                (_, Some(_)) => {
                    return Err(IncludeFailure::WrongKind { name: name.clone(), expected_type: false });
                }
                (_, None) => {}
            }
        }
        if !not_free.is_empty() {
            return Err(IncludeFailure::NotFree { names: not_free });
        }

        let unbound: Vec<String> = free
            .iter()
            .filter(|def| {
                !directive.parameters().any(|b| match b {
                    Binding::Value { name, .. } | Binding::Type { name, .. } => name == &def.name,
                    _ => false,
                })
            })
            .map(|def| def.name.clone())
            .collect();
        if !unbound.is_empty() {
            return Err(IncludeFailure::MissingBindings { names: unbound });
        }
        Ok(())
    }

    /// Install the image into `symbols`
    ///
    /// With a directive, the image is a dependency: its bindings are
    /// checked and applied, and its free parameters must all be bound. A
    /// public definition may fill an undefined name already in scope or
    /// stand beside an identical copy from the same file; any other public
    /// name already in scope is a clash and nothing is installed.
    pub fn install(
        &self,
        symbols: &mut SymbolTable,
        directive: Option<&IncludeDirective>,
    ) -> Result<Installed, IncludeFailure> {
        if let Some(directive) = directive {
            self.check_bindings(directive)?;
        }

        let renames: HashMap<&str, &str> = directive
            .map(|d| d.aliases().map(|(new, old)| (old, new)).collect())
            .unwrap_or_default();
        let suppressed: HashSet<&str> = directive
            .map(|d| d.suppressed().collect())
            .unwrap_or_default();

        // Bindings are read in the includer's scope, before anything new is visible
        let mut bound_values: HashMap<String, Expr> = HashMap::new();
        let mut bound_types: HashMap<String, TypeDef> = HashMap::new();
        for binding in directive.into_iter().flat_map(|d| d.parameters()) {
            match binding {
                Binding::Value { name, expr } => {
                    bound_values.insert(name.clone(), lower_expr(symbols, expr));
                }
                Binding::Type { name, arity, body } => {
                    let body = lower_type(symbols, body);
                    bound_types.insert(name.clone(), TypeDef::new(*arity, TypeClass::Synonym(body)));
                }
                _ => {}
            }
        }
        let free_slots: HashSet<(u32, u32)> = self
            .free
            .iter()
            .filter_map(|r| match r {
                RefImage::Local { file, def } => Some((*file, *def)),
                RefImage::Named(_) => None,
            })
            .collect();

        enum Slot {
            Reuse(IdentId),
            Bind,
            Hidden,
        }

        let records: Vec<ScriptRecord> = self.files.iter().map(FileImage::record).collect();
        let mut plan: Vec<Vec<(Slot, String, Option<String>)>> = Vec::with_capacity(self.files.len());
        let mut claimed: HashSet<String> = HashSet::new();
        let mut clashes = Vec::new();
        let mut alias_clashes = Vec::new();

        for (f, file) in self.files.iter().enumerate() {
            let mut slots = Vec::with_capacity(file.defs.len());
            for (d, def) in file.defs.iter().enumerate() {
                let (name, aka) = match renames.get(def.name.as_str()) {
                    Some(new) if def.public => (new.to_string(), Some(def.name.clone())),
                    _ => (def.name.clone(), None),
                };
                let public = def.public && !suppressed.contains(def.name.as_str());
                if !public {
                    slots.push((Slot::Hidden, name, aka));
                    continue;
                }

                let origin = origin_of(&records[f], d);
                let slot = match symbols.lookup(&name) {
                    None if claimed.contains(&name) => None,
                    None => Some(Slot::Bind),
                    Some(id) if symbols.get(id).is_undefined() && !claimed.contains(&name) => {
                        Some(Slot::Reuse(id))
                    }
                    Some(id) if origin.is_some() && symbols.get(id).origin == origin => Some(Slot::Hidden),
                    Some(_) => None,
                };
                match slot {
                    Some(slot) => {
                        claimed.insert(name.clone());
                        slots.push((slot, name, aka));
                    }
                    None if aka.is_some() => alias_clashes.push(name),
                    None => clashes.push(name),
                }
            }
            plan.push(slots);
        }

        if !alias_clashes.is_empty() {
            return Err(IncludeFailure::AliasClash { names: alias_clashes });
        }
        if !clashes.is_empty() {
            clashes.sort();
            clashes.dedup();
            return Err(IncludeFailure::NameClash { names: clashes });
        }

        let own_files = 1 + self.files.iter().skip(1).take_while(|f| !f.shared).count();
        let mut installed = Installed { type_orphans: self.type_orphans, ..Default::default() };
        let mut ids: Vec<Vec<IdentId>> = Vec::with_capacity(plan.len());
        for (f, slots) in plan.into_iter().enumerate() {
            let mut file_ids = Vec::with_capacity(slots.len());
            for (d, (slot, name, aka)) in slots.into_iter().enumerate() {
                let id = match slot {
                    Slot::Reuse(id) => id,
                    Slot::Bind => {
                        let id = symbols.alloc(&name);
                        symbols.bind(id);
                        id
                    }
                    Slot::Hidden => {
                        let id = symbols.alloc(&name);
                        symbols.unbind(id);
                        id
                    }
                };
                let def = &self.files[f].defs[d];
                let ident = symbols.get_mut(id);
                ident.origin = origin_of(&records[f], d);
                ident.who = def.who.as_ref().map(|who| Provenance {
                    here: SourceLocation::new(who.file.clone(), who.line),
                    aka: aka.or_else(|| who.aka.clone()),
                });
                if def.public && !suppressed.contains(def.name.as_str()) {
                    installed.public.push(id);
                } else if f < own_files {
                    installed.internals.push(id);
                }
                installed.created.push(id);
                file_ids.push(id);
            }
            ids.push(file_ids);
        }

        let mut install = Install { symbols, ids: &ids };
        for (f, file) in self.files.iter().enumerate() {
            for (d, def) in file.defs.iter().enumerate() {
                let id = ids[f][d];
                let kind = install.kind(&def.kind);
                let value = install.value(&def.value);
                let ident = install.symbols.get_mut(id);
                ident.kind = kind;
                ident.value = value;

                if free_slots.contains(&(f as u32, d as u32)) {
                    if let Some(expr) = bound_values.remove(&def.name) {
                        ident.value = Value::Defined(expr);
                    } else if let Some(typedef) = bound_types.remove(&def.name) {
                        ident.kind = IdKind::Type(typedef);
                    }
                }
            }
        }
        for (mut record, defs) in records.into_iter().zip(ids.iter()) {
            record.defs = defs.clone();
            installed.records.push(record);
        }
        installed.errors = self.errors.iter().map(|r| install.reference(r)).collect();
        if directive.is_none() {
            installed.free = self.free.iter().map(|r| install.reference(r)).collect();
        }
        Ok(installed)
    }
}

impl FileImage {
    /// Record for this file as it was when the dump was written
    fn record(&self) -> ScriptRecord {
        ScriptRecord {
            path: self.path.clone(),
            identity: FileIdentity { ino: self.ino, dev: self.dev },
            mtime: self.mtime,
            shared: self.shared,
            defs: Vec::new(),
        }
    }
}

/// Definition slot in a shared file, used to recognise copies of one definition
fn origin_of(record: &ScriptRecord, slot: usize) -> Option<Origin> {
    record.shared.then(|| Origin { file: record.key(), slot: slot as u32 })
}

struct Install<'a> {
    symbols: &'a mut SymbolTable,
    ids: &'a [Vec<IdentId>],
}

impl Install<'_> {
    /// Images are checked with [`ScriptImage::is_well_formed`] before they
    /// are installed, so a local reference always lands
    fn reference(&mut self, at: &RefImage) -> IdentId {
        match at {
            RefImage::Local { file, def } => match self.ids.get(*file as usize).and_then(|defs| defs.get(*def as usize)) {
                Some(id) => *id,
                None => self.symbols.alloc("?"),
            },
            RefImage::Named(name) => self.symbols.intern(name),
        }
    }

    fn ty(&mut self, ty: &TypeImage) -> TypeExpr {
        match ty {
            TypeImage::Prim(prim) => TypeExpr::Prim(*prim),
            TypeImage::Var(n) => TypeExpr::Var(*n),
            TypeImage::Con { target, args } => TypeExpr::Con {
                id: self.reference(target),
                args: args.iter().map(|arg| self.ty(arg)).collect(),
            },
            TypeImage::Arrow(from, to) => TypeExpr::arrow(self.ty(from), self.ty(to)),
            TypeImage::List(elem) => TypeExpr::List(Box::new(self.ty(elem))),
            TypeImage::Tuple(items) => TypeExpr::Tuple(items.iter().map(|item| self.ty(item)).collect()),
        }
    }

    fn kind(&mut self, kind: &KindImage) -> IdKind {
        match kind {
            KindImage::Undef => IdKind::Undef,
            KindImage::Wrong => IdKind::Wrong,
            KindImage::Value(ty) => IdKind::Value(self.ty(ty)),
            KindImage::Type { arity, class } => {
                let class = match class {
                    ClassImage::Algebraic(constructors) => TypeClass::Algebraic {
                        constructors: constructors.iter().map(|c| self.reference(c)).collect(),
                    },
                    ClassImage::Abstract => TypeClass::Abstract,
                    ClassImage::Synonym(body) => TypeClass::Synonym(self.ty(body)),
                    ClassImage::Placeholder => TypeClass::Placeholder,
                    ClassImage::Free => TypeClass::Free,
                };
                IdKind::Type(TypeDef::new(*arity, class))
            }
        }
    }

    fn value(&mut self, value: &ValueImage) -> Value {
        match value {
            ValueImage::Undef => Value::Undef,
            ValueImage::Free => Value::Free,
            ValueImage::Num(n) => Value::Defined(Expr::Num(*n)),
            ValueImage::Str(s) => Value::Defined(Expr::Str(s.clone())),
            ValueImage::Ref(target) => Value::Defined(Expr::Ref(self.reference(target))),
            ValueImage::Constructor { tag, arity } => Value::Constructor { tag: *tag, arity: *arity },
            ValueImage::Shared(target) => Value::Shared(self.reference(target)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::testing::{bind_source, session};
    use crate::frontend::parser::DeclParser;
    use crate::frontend::syntax::Frontend;
    use std::path::Path;

    fn image(source: &str) -> ScriptImage {
        let mut session = session();
        bind_source(&mut session, "/w/lib.m", source);
        session.compute_exports();
        let view = session.exported_view();
        ScriptImage::capture(&session, &view)
    }

    fn directive(bindings: &str) -> IncludeDirective {
        let text = format!("%include \"lib\" {{{}}}\n", bindings);
        let mut parsed = DeclParser::default().parse(Path::new("/w/main.m"), &text).unwrap();
        parsed.includes.remove(0)
    }

    const LIB: &str = "%export size shape\ntype shape = Circle num\nsize :: num\nsize = helper\nhelper = 3\n";

    #[test]
    fn test_install_keeps_structure_and_privacy() {
        let image = image(LIB);
        assert!(image.is_well_formed());

        let mut symbols = SymbolTable::new();
        let installed = image.install(&mut symbols, None).unwrap();

        let size = symbols.lookup("size").unwrap();
        assert_eq!(symbols.lookup("helper"), None);
        let Value::Defined(Expr::Ref(helper)) = symbols.get(size).value else {
            panic!("size should refer to helper");
        };
        assert_eq!(symbols.get(helper).value, Value::Defined(Expr::Num(3)));
        assert!(installed.internals.contains(&helper));

        let shape = symbols.lookup("shape").unwrap();
        let circle = symbols.lookup("Circle").unwrap();
        assert_eq!(
            symbols.get(shape).type_def().map(|def| &def.class),
            Some(&TypeClass::Algebraic { constructors: vec![circle] })
        );
        assert_eq!(installed.records.len(), 1);
        assert_eq!(installed.records[0].defs.len(), 4);
    }

    #[test]
    fn test_alias_renames_and_remembers() {
        let image = image(LIB);
        let mut symbols = SymbolTable::new();
        image.install(&mut symbols, Some(&directive("radius/size"))).unwrap();

        assert_eq!(symbols.lookup("size"), None);
        let radius = symbols.lookup("radius").unwrap();
        assert_eq!(symbols.get(radius).original_name(), "size");
    }

    #[test]
    fn test_binding_failures() {
        let image = image(LIB);
        let mut symbols = SymbolTable::new();

        assert_eq!(
            image.install(&mut symbols, Some(&directive("r/nothing"))).unwrap_err(),
            IncludeFailure::AliasNotFound { names: vec!["nothing".into()] }
        );
        assert_eq!(
            image.install(&mut symbols, Some(&directive("-shape"))).unwrap_err(),
            IncludeFailure::SuppressedType { names: vec!["shape".into()] }
        );
        assert_eq!(
            image.install(&mut symbols, Some(&directive("n = 1"))).unwrap_err(),
            IncludeFailure::NotFree { names: vec!["n".into()] }
        );
        assert!(symbols.lookup("size").is_none());
    }

    #[test]
    fn test_name_clash_installs_nothing() {
        let image = image(LIB);
        let mut symbols = SymbolTable::new();
        let mine = symbols.intern("size");
        symbols.get_mut(mine).value = Value::Defined(Expr::Num(1));
        let before = symbols.len();

        assert_eq!(
            image.install(&mut symbols, None).unwrap_err(),
            IncludeFailure::NameClash { names: vec!["size".into()] }
        );
        assert_eq!(symbols.len(), before);

        // an alias moves the clash out of the way
        image.install(&mut symbols, Some(&directive("theirs/size"))).unwrap();
        assert!(symbols.lookup("theirs").is_some());
    }

    #[test]
    fn test_undefined_name_in_scope_is_filled() {
        let image = image(LIB);
        let mut symbols = SymbolTable::new();
        let forward = symbols.intern("size");
        image.install(&mut symbols, None).unwrap();
        assert_eq!(symbols.lookup("size"), Some(forward));
        assert!(!symbols.get(forward).is_undefined());
    }

    #[test]
    fn test_second_copy_of_same_file_stands_aside() {
        let image = image(LIB);
        let mut symbols = SymbolTable::new();
        image.install(&mut symbols, None).unwrap();
        let first = symbols.lookup("size").unwrap();

        let second = image.install(&mut symbols, None).unwrap();
        assert_eq!(symbols.lookup("size"), Some(first));
        let copy = second.records[0].defs[2];
        assert_eq!(symbols.name(copy), "size");
        assert_eq!(symbols.get(copy).origin, symbols.get(first).origin);
        assert!(!symbols.is_visible(copy));
    }

    #[test]
    fn test_parameters_are_bound() {
        let image = image("%free {\n  n :: num;\n  elem :: type\n}\ntotal :: elem\ntotal = n\n");
        let mut symbols = SymbolTable::new();

        assert_eq!(
            image.install(&mut symbols, Some(&directive("n = 4"))).unwrap_err(),
            IncludeFailure::MissingBindings { names: vec!["elem".into()] }
        );
        assert_eq!(
            image.install(&mut symbols, Some(&directive("n == num; elem == num"))).unwrap_err(),
            IncludeFailure::WrongKind { name: "n".into(), expected_type: false }
        );
        assert_eq!(
            image.install(&mut symbols, Some(&directive("n = 4; elem * == [*]"))).unwrap_err(),
            IncludeFailure::WrongArity { name: "elem".into(), expected: 0, found: 1 }
        );

        let installed = image.install(&mut symbols, Some(&directive("n = 4; elem == num"))).unwrap();
        assert!(installed.free.is_empty());
        let n = installed.records[0].defs.iter().copied().find(|id| symbols.name(*id) == "n").unwrap();
        assert_eq!(symbols.get(n).value, Value::Defined(Expr::Num(4)));
        let elem = installed.records[0].defs.iter().copied().find(|id| symbols.name(*id) == "elem").unwrap();
        assert!(symbols.get(elem).is_synonym());
    }

    #[test]
    fn test_error_dump_keeps_sources_only() {
        let record = ScriptRecord::new("/w/broken.m", 7, true);
        let image = ScriptImage::error_dump(&[record]);
        assert!(image.syntax_error);
        assert_eq!(image.sources()[0].mtime, 7);
        assert!(image.files[0].defs.is_empty());
    }
}
