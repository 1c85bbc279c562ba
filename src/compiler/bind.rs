//! Installing a parsed script into the symbol table, and the reference
//! checker that runs over the result

use crate::compiler::script::ScriptRecord;
use crate::compiler::session::{Checker, Session};
use crate::core::symbols::{Expr, IdKind, IdentId, Provenance, SymbolTable, Value};
use crate::core::types::{Prim, TypeClass, TypeDef, TypeExpr};
use crate::errors::{Diagnostic, DiagnosticKind};
use crate::frontend::syntax::{
    DefBody, ExportItem, ExprSyntax, FreeKind, IncludeDirective, ParsedScript, TypeSyntax,
};
use std::path::{Path, PathBuf};

pub(crate) fn lower_type(symbols: &mut SymbolTable, ty: &TypeSyntax) -> TypeExpr {
    match ty {
        TypeSyntax::Name(name, args) if args.is_empty() => match Prim::from_name(name) {
            Some(prim) => TypeExpr::Prim(prim),
            None => TypeExpr::con(symbols.intern(name)),
        },
        TypeSyntax::Name(name, args) => TypeExpr::Con {
            id: symbols.intern(name),
            args: args.iter().map(|arg| lower_type(symbols, arg)).collect(),
        },
        TypeSyntax::Var(n) => TypeExpr::Var(*n),
        TypeSyntax::Arrow(from, to) => {
            TypeExpr::arrow(lower_type(symbols, from), lower_type(symbols, to))
        }
        TypeSyntax::List(elem) => TypeExpr::List(Box::new(lower_type(symbols, elem))),
        TypeSyntax::Tuple(items) => {
            TypeExpr::Tuple(items.iter().map(|item| lower_type(symbols, item)).collect())
        }
    }
}

pub(crate) fn lower_expr(symbols: &mut SymbolTable, expr: &ExprSyntax) -> Expr {
    match expr {
        ExprSyntax::Num(n) => Expr::Num(*n),
        ExprSyntax::Str(s) => Expr::Str(s.clone()),
        ExprSyntax::Name(name) => Expr::Ref(symbols.intern(name)),
    }
}

fn syntax(message: String, file: &Path, line: usize) -> Diagnostic {
    Diagnostic::new(DiagnosticKind::Syntax { message })
        .at(crate::errors::SourceLocation::new(file, line))
}

impl Session {
    /// Install the script's own declarations and return its include
    /// directives. `files` must already hold the script's own record.
    pub(crate) fn bind_script(
        &mut self,
        path: &Path,
        parsed: ParsedScript,
    ) -> Result<Vec<IncludeDirective>, Diagnostic> {
        let mut paths: Vec<PathBuf> = vec![path.to_path_buf()];
        for inserted in &parsed.inserted {
            self.files.push(ScriptRecord::current(inserted, false));
            paths.push(inserted.clone());
        }

        for def in &parsed.definitions {
            let file = &paths[def.file];
            let who = Provenance::new(file, def.line);
            let clash = || {
                syntax(format!("nameclash, \"{}\" already defined", def.name), file, def.line)
            };

            let id = self.symbols.intern(&def.name);
            match &def.body {
                DefBody::Spec(ty) => {
                    if self.symbols.get(id).kind != IdKind::Undef {
                        return Err(syntax(format!("repeated specification for \"{}\"", def.name), file, def.line));
                    }
                    let ty = lower_type(&mut self.symbols, ty);
                    self.symbols.get_mut(id).kind = IdKind::Value(ty);
                }
                DefBody::Value(expr) => {
                    let ident = self.symbols.get(id);
                    if ident.value != Value::Undef || ident.is_type() {
                        return Err(clash());
                    }
                    let expr = lower_expr(&mut self.symbols, expr);
                    self.symbols.get_mut(id).value = Value::Defined(expr);
                }
                DefBody::Algebraic { arity, constructors } => {
                    if !self.symbols.get(id).is_undefined() {
                        return Err(clash());
                    }
                    let result = TypeExpr::Con {
                        id,
                        args: (1..=*arity as u32).map(TypeExpr::Var).collect(),
                    };
                    let mut ids = Vec::with_capacity(constructors.len());
                    for (tag, (name, fields)) in constructors.iter().enumerate() {
                        let con = self.symbols.intern(name);
                        if !self.symbols.get(con).is_undefined() {
                            return Err(syntax(format!("nameclash, \"{}\" already defined", name), file, def.line));
                        }
                        let mut ty = result.clone();
                        for field in fields.iter().rev() {
                            ty = TypeExpr::arrow(lower_type(&mut self.symbols, field), ty);
                        }
                        let ident = self.symbols.get_mut(con);
                        ident.kind = IdKind::Value(ty);
                        ident.value = Value::Constructor { tag: tag as u32, arity: fields.len() };
                        ident.who = Some(who.clone());
                        ids.push(con);
                    }
                    self.symbols.get_mut(id).kind =
                        IdKind::Type(TypeDef::new(*arity, TypeClass::Algebraic { constructors: ids.clone() }));
                    self.new_types.push(id);
                    self.files[def.file].push_def(id);
                    for con in ids {
                        self.files[def.file].push_def(con);
                    }
                }
                DefBody::Abstract { arity } => {
                    if !self.symbols.get(id).is_undefined() {
                        return Err(clash());
                    }
                    self.symbols.get_mut(id).kind = IdKind::Type(TypeDef::new(*arity, TypeClass::Abstract));
                    self.new_types.push(id);
                }
                DefBody::Synonym { arity, body } => {
                    if !self.symbols.get(id).is_undefined() {
                        return Err(clash());
                    }
                    let body = lower_type(&mut self.symbols, body);
                    self.symbols.get_mut(id).kind =
                        IdKind::Type(TypeDef::new(*arity, TypeClass::Synonym(body)));
                    self.new_types.push(id);
                }
            }

            let ident = self.symbols.get_mut(id);
            if ident.who.is_none() {
                ident.who = Some(who);
            }
            self.files[def.file].push_def(id);
        }

        for param in &parsed.free {
            let id = self.symbols.intern(&param.name);
            if !self.symbols.get(id).is_undefined() {
                return Err(syntax(format!("nameclash, \"{}\" already defined", param.name), path, param.line));
            }
            let kind = match &param.kind {
                FreeKind::Value(ty) => IdKind::Value(lower_type(&mut self.symbols, ty)),
                FreeKind::Type { arity } => IdKind::Type(TypeDef::new(*arity, TypeClass::Free)),
            };
            let ident = self.symbols.get_mut(id);
            ident.kind = kind;
            if !ident.is_type() {
                ident.value = Value::Free;
            }
            ident.who = Some(Provenance::new(path, param.line));
            self.free_ids.push(id);
            self.files[0].push_def(id);
        }

        if let Some(spec) = parsed.exports {
            for item in &spec.items {
                match item {
                    ExportItem::Own => {
                        let own: Vec<IdentId> = self.files[0]
                            .defs
                            .iter()
                            .copied()
                            .filter(|id| {
                                let ident = self.symbols.get(*id);
                                ident.is_variable() && !self.free_ids.contains(id)
                            })
                            .collect();
                        self.pending_exports.extend(own);
                    }
                    ExportItem::File(target) => {
                        let matches = parsed.includes.iter().filter(|inc| &inc.target == target).count();
                        if matches != 1 {
                            return Err(Diagnostic::new(DiagnosticKind::IllegalExportFile {
                                path: target.clone(),
                                ambiguous: matches > 1,
                            })
                            .at(spec.location.clone()));
                        }
                    }
                    ExportItem::Name(_) => {}
                }
            }
            self.export_spec = Some(spec);
        }

        Ok(parsed.includes)
    }

    /// Definitions written in the script itself or textually inserted into it
    pub(crate) fn own_defs(&self) -> Vec<IdentId> {
        let inserted = self.files.iter().skip(1).take_while(|f| !f.shared).count();
        self.files
            .iter()
            .take(1 + inserted)
            .flat_map(|f| f.defs.iter().copied())
            .collect()
    }
}

/// Reference checker: finds names that are used but never defined, and
/// definitions whose literal disagrees with their specification
#[derive(Debug, Clone, Copy, Default)]
pub struct NameChecker;

impl NameChecker {
    fn infer(symbols: &SymbolTable, expr: &Expr) -> Option<TypeExpr> {
        match expr {
            Expr::Num(_) => Some(TypeExpr::Prim(Prim::Num)),
            Expr::Str(_) => Some(TypeExpr::string()),
            Expr::Ref(target) => match &symbols.get(symbols.resolve(*target)).kind {
                IdKind::Value(ty) => Some(ty.clone()),
                _ => None,
            },
        }
    }
}

/// Replace synonyms by their definitions, substituting arguments
fn expand(symbols: &SymbolTable, ty: &TypeExpr, fuel: usize) -> TypeExpr {
    if fuel == 0 {
        return ty.clone();
    }
    match ty {
        TypeExpr::Con { id, args } => {
            let id = symbols.resolve(*id);
            let args: Vec<TypeExpr> = args.iter().map(|a| expand(symbols, a, fuel - 1)).collect();
            match symbols.get(id).type_def() {
                Some(TypeDef { class: TypeClass::Synonym(body), .. }) => {
                    expand(symbols, &substitute(body, &args), fuel - 1)
                }
                _ => TypeExpr::Con { id, args },
            }
        }
        TypeExpr::Arrow(from, to) => {
            TypeExpr::arrow(expand(symbols, from, fuel - 1), expand(symbols, to, fuel - 1))
        }
        TypeExpr::List(elem) => TypeExpr::List(Box::new(expand(symbols, elem, fuel - 1))),
        TypeExpr::Tuple(items) => {
            TypeExpr::Tuple(items.iter().map(|i| expand(symbols, i, fuel - 1)).collect())
        }
        other => other.clone(),
    }
}

fn substitute(body: &TypeExpr, args: &[TypeExpr]) -> TypeExpr {
    match body {
        TypeExpr::Var(n) => (*n as usize)
            .checked_sub(1)
            .and_then(|i| args.get(i))
            .cloned()
            .unwrap_or(TypeExpr::Var(*n)),
        TypeExpr::Con { id, args: inner } => TypeExpr::Con {
            id: *id,
            args: inner.iter().map(|a| substitute(a, args)).collect(),
        },
        TypeExpr::Arrow(from, to) => TypeExpr::arrow(substitute(from, args), substitute(to, args)),
        TypeExpr::List(elem) => TypeExpr::List(Box::new(substitute(elem, args))),
        TypeExpr::Tuple(items) => TypeExpr::Tuple(items.iter().map(|i| substitute(i, args)).collect()),
        TypeExpr::Prim(_) => body.clone(),
    }
}

/// Structural match where a type variable on either side matches anything
fn agrees(a: &TypeExpr, b: &TypeExpr) -> bool {
    match (a, b) {
        (TypeExpr::Var(_), _) | (_, TypeExpr::Var(_)) => true,
        (TypeExpr::Prim(x), TypeExpr::Prim(y)) => x == y,
        (TypeExpr::Con { id: x, args: xs }, TypeExpr::Con { id: y, args: ys }) => {
            x == y && xs.len() == ys.len() && xs.iter().zip(ys).all(|(p, q)| agrees(p, q))
        }
        (TypeExpr::Arrow(f1, t1), TypeExpr::Arrow(f2, t2)) => agrees(f1, f2) && agrees(t1, t2),
        (TypeExpr::List(x), TypeExpr::List(y)) => agrees(x, y),
        (TypeExpr::Tuple(xs), TypeExpr::Tuple(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(p, q)| agrees(p, q))
        }
        _ => false,
    }
}

const EXPANSION_FUEL: usize = 64;

impl Checker for NameChecker {
    fn check(&self, symbols: &mut SymbolTable, own_defs: &[IdentId]) -> Vec<IdentId> {
        // give unspecified definitions the type of their right hand side
        for _ in 0..=own_defs.len() {
            let mut changed = false;
            for &id in own_defs {
                let ident = symbols.get(id);
                let inferred = match (&ident.kind, &ident.value) {
                    (IdKind::Undef, Value::Defined(expr)) => Self::infer(symbols, expr),
                    _ => None,
                };
                if let Some(ty) = inferred {
                    symbols.get_mut(id).kind = IdKind::Value(ty);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let mut bad = Vec::new();
        for &id in own_defs {
            let ident = symbols.get(id);
            if let Value::Defined(Expr::Ref(target)) = ident.value {
                let target = symbols.resolve(target);
                if symbols.get(target).is_undefined() {
                    bad.push(target);
                }
            }

            let mut refs = Vec::new();
            match &ident.kind {
                IdKind::Value(ty) => ty.type_refs(&mut refs),
                IdKind::Type(TypeDef { class: TypeClass::Synonym(body), .. }) => body.type_refs(&mut refs),
                _ => {}
            }
            for tref in refs {
                let tref = symbols.resolve(tref);
                if symbols.get(tref).is_undefined() {
                    bad.push(tref);
                }
            }

            let mismatch = match (&ident.kind, &ident.value) {
                (IdKind::Value(spec), Value::Defined(expr)) => {
                    Self::infer(symbols, expr).map_or(false, |actual| {
                        !agrees(
                            &expand(symbols, spec, EXPANSION_FUEL),
                            &expand(symbols, &actual, EXPANSION_FUEL),
                        )
                    })
                }
                _ => false,
            };
            if mismatch {
                symbols.get_mut(id).kind = IdKind::Wrong;
                bad.push(id);
            }
        }

        bad.sort();
        bad.dedup();
        bad
    }
}
