//! `%include` resolution
//!
//! Dependencies are first brought up to date by a forked child, which
//! compiles whatever is stale and writes fresh dumps. The parent then loads
//! each dependency's dump itself, applying the directive's bindings, and
//! merges the results: a file reached along two paths is kept once, and
//! its definitions are unified with the earlier copy.

use crate::compiler::image::{Installed, ScriptImage};
use crate::compiler::script::ScriptRecord;
use crate::compiler::session::{ScriptState, Session};
use crate::core::symbols::{IdentId, Value};
use crate::core::types::TypeClass;
use crate::errors::{Diagnostic, DiagnosticKind, Halt, IncludeFailure, TypeClashEntry, TypeOrphanEntry};
use crate::frontend::syntax::{ExportItem, IncludeDirective};
use crate::infrastructure::dump::DumpError;
use crate::infrastructure::isolation::{run_isolated, ChildStatus, ExitKind};
use crate::infrastructure::metrics::{Counter, Phase};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of resolving a script's includes
#[derive(Debug, Default)]
pub struct Resolution {
    /// Dependency records in load order, the script's own record excluded
    pub records: Vec<ScriptRecord>,
    /// Some directive failed or a type clash was found
    pub failed: bool,
    /// Visible names depend on types with no visible name
    pub orphaned: bool,
}

impl Session {
    /// Resolve `includes` (in declaration order) into loaded dependencies
    pub fn resolve_includes(&mut self, includes: Vec<IncludeDirective>) -> Result<Resolution, Halt> {
        self.scratch.clear();
        if includes.is_empty() {
            return Ok(Resolution::default());
        }

        let script = self.current_script.clone().unwrap_or_default();
        let limit = self.env.config.compile.max_include_depth;
        if self.depth >= limit {
            self.report(Diagnostic::new(DiagnosticKind::IncludeTooDeep { depth: limit }));
            return Err(Halt::CircularInclude { depth: self.depth });
        }

        let interrupts = self.env.interrupts.clone();
        let metrics = self.env.metrics.clone();
        let _timer = metrics.time(Phase::Resolve);
        let window = interrupts.defer();

        self.bring_up_to_date(&script, &includes)?;

        let mut resolution = Resolution::default();
        let mut wildcards: Vec<(PathBuf, Vec<IdentId>)> = Vec::new();
        let mut orphan_prone: Vec<(PathBuf, Range<usize>)> = Vec::new();
        for directive in &includes {
            match self.load_dependency(directive) {
                Ok(installed) => {
                    if let Some(own) = installed.records.first() {
                        wildcards.push((directive.target.clone(), own.defs.clone()));
                    }
                    let start = resolution.records.len();
                    let type_orphans = installed.type_orphans;
                    self.merge(installed, &mut resolution.records);
                    if type_orphans {
                        orphan_prone.push((directive.target.clone(), start..resolution.records.len()));
                    }
                }
                Err(failure) => {
                    if let IncludeFailure::NameClash { names } = &failure {
                        self.scratch.name_clashes.extend(names.iter().cloned());
                    }
                    self.report(
                        Diagnostic::new(DiagnosticKind::Include { failure })
                            .at(directive.location.clone()),
                    );
                    resolution.failed = true;
                    // keep the file so that fixing it triggers a recompile
                    resolution.records.push(ScriptRecord::current(&directive.target, true));
                }
            }
        }

        for (via, range) in orphan_prone {
            self.find_orphans(&via, &resolution.records[range]);
        }

        if !self.scratch.type_clashes.is_empty() {
            let entries = self.scratch.type_clashes.clone();
            self.report(Diagnostic::new(DiagnosticKind::TypeClash { entries }));
            resolution.failed = true;
        }
        if !self.scratch.type_orphans.is_empty() {
            let entries = self.scratch.type_orphans.clone();
            self.report(Diagnostic::new(DiagnosticKind::TypeOrphan { entries }));
            resolution.orphaned = true;
        }
        self.expand_wildcards(&wildcards);

        drop(window);
        interrupts.check()?;
        debug!(
            records = resolution.records.len(),
            unified = self.scratch.unified.len(),
            "includes resolved"
        );
        Ok(resolution)
    }

    /// Run one child that considers every dependency in turn, so that each
    /// has a current dump before the parent reads it. A failing dependency
    /// does not stop the others being brought up to date.
    fn bring_up_to_date(&mut self, script: &Path, includes: &[IncludeDirective]) -> Result<(), Halt> {
        let env = self.env.clone();
        let depth = self.depth + 1;
        let targets: Vec<PathBuf> = includes.iter().map(|d| d.target.clone()).collect();
        self.metrics().increment(Counter::ChildProcesses);

        let status = run_isolated(move || {
            let mut child = Session::child(env, depth);
            let mut outcome = ExitKind::Ok;
            for target in &targets {
                match child.consider(target) {
                    Ok(state) if state.is_failure() => outcome = ExitKind::Errors,
                    Ok(ScriptState::Unloaded) => outcome = ExitKind::Errors,
                    Ok(_) => {}
                    Err(_) => return ExitKind::Catastrophic,
                }
            }
            outcome
        });

        match status {
            Ok(ChildStatus::Exited(ExitKind::Ok)) => Ok(()),
            Ok(ChildStatus::Exited(ExitKind::Errors)) => {
                debug!(script = %script.display(), "some dependency has errors");
                Ok(())
            }
            Ok(ChildStatus::Exited(kind)) => {
                warn!(script = %script.display(), code = kind.code(), "dependency compilation failed");
                Err(Halt::abandoned(script))
            }
            Ok(ChildStatus::Faulted(fault)) if fault.is_interrupt() => Err(Halt::Cancelled),
            Ok(ChildStatus::Faulted(fault)) => {
                self.report(Diagnostic::new(DiagnosticKind::Fault { message: fault.to_string() }));
                Err(Halt::abandoned(script))
            }
            Err(err) => {
                self.report(Diagnostic::new(DiagnosticKind::Io { message: format!("cannot fork: {}", err) }));
                Err(Halt::abandoned(script))
            }
        }
    }

    /// Read a dependency's dump and install it under the directive's bindings
    fn load_dependency(&mut self, directive: &IncludeDirective) -> Result<Installed, IncludeFailure> {
        let target = &directive.target;
        let Some(artifact) = self.env.dump_path(target) else {
            return Err(IncludeFailure::CannotLoad { path: target.clone() });
        };

        let image = match self.env.codec.read::<ScriptImage>(&artifact, target) {
            Ok(image) if image.is_well_formed() => image,
            Ok(_) => return Err(IncludeFailure::BadDump { artifact }),
            Err(DumpError::Io(err)) => {
                debug!(artifact = %artifact.display(), "cannot read dump: {}", err);
                return Err(IncludeFailure::CannotLoad { path: target.clone() });
            }
            Err(_) => return Err(IncludeFailure::BadDump { artifact }),
        };
        if let Some(stale) = image.sources().into_iter().find(|record| !record.is_current()) {
            debug!(artifact = %artifact.display(), stale = %stale.path.display(), "dump is out of date");
            return Err(IncludeFailure::CannotLoad { path: target.clone() });
        }
        if image.syntax_error {
            return Err(IncludeFailure::SyntaxError { path: target.clone() });
        }
        if image.has_errors() {
            return Err(IncludeFailure::HasErrors { path: target.clone() });
        }

        let installed = image.install(&mut self.symbols, Some(directive))?;
        self.scratch.loaded.extend(installed.created.iter().copied());
        info!(target = %target.display(), defs = installed.created.len(), "dependency loaded");
        Ok(installed)
    }

    /// Append a dependency's records, sharing files already present
    fn merge(&mut self, installed: Installed, merged: &mut Vec<ScriptRecord>) {
        for record in installed.records {
            if record.shared && self.share(&record, merged) {
                debug!(path = %record.path.display(), "shared file already loaded");
                continue;
            }
            merged.push(record);
        }
    }

    /// Unify `later` with every earlier copy of the same file; true when
    /// nothing in it remains distinct, so it need not be kept
    fn share(&mut self, later: &ScriptRecord, merged: &[ScriptRecord]) -> bool {
        let mut matched = false;
        for earlier in merged.iter().filter(|z| z.shared && z.same_content(later)) {
            matched = true;
            for (&p, &q) in later.defs.iter().zip(earlier.defs.iter()) {
                if p == q || self.symbols.get(p).origin != self.symbols.get(q).origin {
                    continue;
                }
                self.unify(p, q, &earlier.path);
            }
        }

        matched
            && later.defs.iter().all(|&p| {
                matches!(self.symbols.get(p).value, Value::Shared(_))
                    && !self.symbols.is_visible(p)
            })
    }

    /// Unify a later copy `p` of a definition with its earlier copy `q`
    fn unify(&mut self, p: IdentId, q: IdentId, file: &Path) {
        let symbols = &self.symbols;
        let later = symbols.get(p);
        let (from, to) = if !later.is_type() || later.is_synonym() {
            (p, q)
        } else {
            let canonical = symbols.resolve(q);
            let shown = if symbols.is_visible(q) {
                Some(q)
            } else if symbols.is_visible(canonical) {
                Some(canonical)
            } else {
                None
            };
            match shown {
                Some(shown) if symbols.name(shown) == symbols.name(p) => (p, shown),
                Some(shown) if symbols.is_visible(p) => {
                    let canonical_name = symbols.name(shown).to_string();
                    let duplicate = symbols.name(p).to_string();
                    self.record_type_clash(file, canonical_name, duplicate);
                    return;
                }
                Some(shown) => (p, shown),
                None if symbols.is_visible(p) => (q, p),
                None => (p, q),
            }
        };
        self.symbols.redirect(from, to);
        self.scratch.unified.push((from, to));
    }

    fn record_type_clash(&mut self, file: &Path, canonical: String, duplicate: String) {
        let clashes = &mut self.scratch.type_clashes;
        match clashes.iter_mut().find(|e| e.file == file && e.canonical == canonical) {
            Some(entry) => {
                if !entry.duplicates.contains(&duplicate) {
                    entry.duplicates.push(duplicate);
                }
            }
            None => clashes.push(TypeClashEntry {
                file: file.to_path_buf(),
                canonical,
                duplicates: vec![duplicate],
            }),
        }
    }

    /// Visible names from `records` whose types have no visible name
    fn find_orphans(&mut self, via: &Path, records: &[ScriptRecord]) {
        for &id in records.iter().flat_map(|r| r.defs.iter()) {
            if !self.symbols.is_visible(id) {
                continue;
            }
            for ty in self.symbols.ident_type_deps(id) {
                let ident = self.symbols.get(ty);
                let named = self
                    .symbols
                    .lookup(&ident.name)
                    .map_or(false, |shown| self.symbols.resolve(shown) == ty);
                let free = ident.type_def().map_or(false, |def| def.class == TypeClass::Free);
                if named || free {
                    continue;
                }

                let type_name = ident.original_name().to_string();
                let defined_in = ident.who.as_ref().map(|who| who.here.file.clone());
                let needer = self.symbols.name(id).to_string();
                let orphans = &mut self.scratch.type_orphans;
                match orphans.iter_mut().find(|e| e.type_name == type_name && e.defined_in == defined_in) {
                    Some(entry) => {
                        if !entry.needed_by.contains(&needer) {
                            entry.needed_by.push(needer);
                        }
                    }
                    None => orphans.push(TypeOrphanEntry {
                        type_name,
                        defined_in,
                        via: via.to_path_buf(),
                        needed_by: vec![needer],
                    }),
                }
                if !self.errors.contains(&id) {
                    self.errors.push(id);
                }
            }
        }
    }

    /// `%export "file"`: every visible variable the file defines
    fn expand_wildcards(&mut self, loaded: &[(PathBuf, Vec<IdentId>)]) {
        let Some(spec) = &self.export_spec else {
            return;
        };
        let files: Vec<&PathBuf> = spec
            .items
            .iter()
            .filter_map(|item| match item {
                ExportItem::File(path) => Some(path),
                _ => None,
            })
            .collect();

        let mut expanded = Vec::new();
        for (target, defs) in loaded {
            if !files.contains(&target) {
                continue;
            }
            for &id in defs {
                let shown = if self.symbols.is_visible(id) { id } else { self.symbols.resolve(id) };
                let ident = self.symbols.get(shown);
                if self.symbols.is_visible(shown) && ident.is_variable() && !expanded.contains(&shown) {
                    expanded.push(shown);
                }
            }
        }
        self.pending_exports.extend(expanded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::testing::session;
    use crate::core::symbols::{FileKey, IdKind, Origin};
    use crate::core::types::TypeDef;

    fn record(path: &str, defs: Vec<IdentId>) -> ScriptRecord {
        let mut record = ScriptRecord::new(path, 5, true);
        record.defs = defs;
        record
    }

    fn shared_type(session: &mut Session, name: &str, slot: u32, visible: bool) -> IdentId {
        let id = session.symbols.alloc(name);
        if visible {
            session.symbols.bind(id);
        } else {
            session.symbols.unbind(id);
        }
        let ident = session.symbols.get_mut(id);
        ident.kind = IdKind::Type(TypeDef::new(0, TypeClass::Abstract));
        ident.origin = Some(Origin { file: FileKey { ino: 0, dev: 0, mtime: 5 }, slot });
        id
    }

    #[test]
    fn test_stale_dependency_dump_is_refused() {
        let dir = tempfile::TempDir::new().unwrap();
        let lib = dir.path().join("lib.m");
        std::fs::write(&lib, "one = 1\n").unwrap();
        assert_eq!(session().load(&lib), ScriptState::Loaded);

        std::fs::write(&lib, "one = 1\nthree = 3\n").unwrap();
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        std::fs::File::options().write(true).open(&lib).unwrap().set_modified(later).unwrap();

        let mut session = session();
        let directive = IncludeDirective::new(&lib, crate::errors::SourceLocation::new("/w/main.m", 1));
        let failure = session.load_dependency(&directive).unwrap_err();
        assert_eq!(failure, IncludeFailure::CannotLoad { path: lib });
        assert!(session.symbols.lookup("one").is_none());
    }

    #[test]
    fn test_same_name_copy_is_dropped() {
        let mut session = session();
        let first = shared_type(&mut session, "tree", 0, true);
        let copy = shared_type(&mut session, "tree", 0, false);
        let merged = vec![record("/w/d.m", vec![first])];

        assert!(session.share(&record("/w/d.m", vec![copy]), &merged));
        assert_eq!(session.symbols.resolve(copy), first);
        assert_eq!(session.scratch.unified, vec![(copy, first)]);
        assert!(session.scratch.type_clashes.is_empty());
    }

    #[test]
    fn test_renamed_type_clashes() {
        let mut session = session();
        let first = shared_type(&mut session, "tree", 0, true);
        let copy = shared_type(&mut session, "bush", 0, true);
        let merged = vec![record("/w/d.m", vec![first])];

        assert!(!session.share(&record("/w/d.m", vec![copy]), &merged));
        assert_eq!(
            session.scratch.type_clashes,
            vec![TypeClashEntry {
                file: PathBuf::from("/w/d.m"),
                canonical: "tree".into(),
                duplicates: vec!["bush".into()],
            }]
        );
    }

    #[test]
    fn test_private_earlier_copy_defers_to_visible_later_one() {
        let mut session = session();
        let hidden = shared_type(&mut session, "tree", 0, false);
        let shown = shared_type(&mut session, "tree", 0, true);
        let merged = vec![record("/w/d.m", vec![hidden])];

        assert!(!session.share(&record("/w/d.m", vec![shown]), &merged));
        assert_eq!(session.symbols.resolve(hidden), shown);
    }

    #[test]
    fn test_synonyms_never_clash() {
        let mut session = session();
        let first = shared_type(&mut session, "forest", 0, true);
        let copy = shared_type(&mut session, "woods", 0, true);
        for id in [first, copy] {
            session.symbols.get_mut(id).kind =
                IdKind::Type(TypeDef::new(0, TypeClass::Synonym(crate::core::types::TypeExpr::string())));
        }
        let merged = vec![record("/w/d.m", vec![first])];

        session.share(&record("/w/d.m", vec![copy]), &merged);
        assert!(session.scratch.type_clashes.is_empty());
        assert_eq!(session.symbols.get(copy).value, Value::Shared(first));
    }

    #[test]
    fn test_different_content_is_not_shared() {
        let mut session = session();
        let first = shared_type(&mut session, "tree", 0, true);
        let copy = shared_type(&mut session, "tree", 0, false);
        let merged = vec![record("/w/d.m", vec![first])];
        let mut newer = record("/w/d.m", vec![copy]);
        newer.mtime = 6;

        assert!(!session.share(&newer, &merged));
        assert!(session.scratch.unified.is_empty());
    }

    #[test]
    fn test_too_deep_is_circular() {
        let mut session = session();
        session.depth = session.config().compile.max_include_depth;
        let directive = IncludeDirective::new("/w/b.m", crate::errors::SourceLocation::new("/w/a.m", 1));
        assert_eq!(
            session.resolve_includes(vec![directive]).unwrap_err(),
            Halt::CircularInclude { depth: session.depth }
        );
        assert!(matches!(
            session.reporter.diagnostics()[0].kind,
            DiagnosticKind::IncludeTooDeep { .. }
        ));
    }
}
