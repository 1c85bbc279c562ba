//! Export lists and the visibility they imply

use crate::compiler::script::sorted_defs;
use crate::compiler::session::Session;
use crate::core::symbols::IdentId;
use crate::core::types::TypeClass;
use crate::errors::{Diagnostic, DiagnosticKind};
use crate::frontend::syntax::ExportItem;
use std::collections::HashSet;
use tracing::debug;

/// Which resident definitions a dump of the script would make public
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportView {
    public: HashSet<IdentId>,
}

impl ExportView {
    pub fn is_public(&self, id: IdentId) -> bool {
        self.public.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.public.len()
    }

    pub fn is_empty(&self) -> bool {
        self.public.is_empty()
    }
}

impl Session {
    /// Export list in display order
    ///
    /// Without an export directive this is every definition of the script
    /// itself except its `%free` parameters.
    pub fn exported(&self) -> Vec<IdentId> {
        match &self.exports {
            Some(list) => list.clone(),
            None => {
                let own: Vec<IdentId> = self
                    .own_defs()
                    .into_iter()
                    .filter(|id| !self.free_ids.contains(id))
                    .collect();
                sorted_defs(&self.symbols, &own)
            }
        }
    }

    /// Visibility of every resident definition as a dump would record it.
    /// Touches nothing.
    pub fn exported_view(&self) -> ExportView {
        ExportView { public: self.exported().into_iter().collect() }
    }

    /// Take everything the script does not export out of scope
    ///
    /// Only identifiers this call actually hides are remembered, so
    /// [`Session::restore`] undoes exactly this and nothing else.
    pub fn hide_non_exported(&mut self) {
        let view = self.exported_view();
        let resident: Vec<IdentId> = self.files.iter().flat_map(|f| f.defs.iter().copied()).collect();
        for id in resident {
            if !view.is_public(id) && self.symbols.is_visible(id) && !self.internals.contains(&id) {
                self.symbols.unbind(id);
                self.internals.push(id);
            }
        }
        debug!(hidden = self.internals.len(), "privatised non-exported names");
    }

    /// Bring back whatever `hide_non_exported` hid
    pub fn restore(&mut self) {
        for id in std::mem::take(&mut self.internals) {
            self.symbols.bind(id);
        }
    }

    /// Close the export directive over names, embargoes and constructors
    pub(crate) fn compute_exports(&mut self) {
        let Some(spec) = self.export_spec.clone() else {
            self.exports = None;
            return;
        };

        let mut list = self.pending_exports.clone();
        let mut undefined = Vec::new();
        for item in &spec.items {
            if let ExportItem::Name(name) = item {
                match self.symbols.lookup(name) {
                    Some(id) if !self.symbols.get(id).is_undefined() => list.push(id),
                    _ => undefined.push(name.clone()),
                }
            }
        }

        let mut redundant = Vec::new();
        for name in &spec.embargoes {
            let before = list.len();
            list.retain(|id| self.symbols.name(*id) != name);
            if list.len() == before {
                redundant.push(name.clone());
            }
        }

        let mut list = sorted_defs(&self.symbols, &list);
        let mut constructors = Vec::new();
        for &id in &list {
            let canonical = self.symbols.resolve(id);
            if let Some(TypeClass::Algebraic { constructors: cons }) =
                self.symbols.get(canonical).type_def().map(|def| &def.class)
            {
                constructors.extend(cons.iter().copied());
            }
        }
        for con in constructors {
            if !list.contains(&con) {
                list.push(con);
            }
        }

        if !undefined.is_empty() {
            for name in &undefined {
                let id = self.symbols.intern(name);
                if !self.errors.contains(&id) {
                    self.errors.push(id);
                }
            }
            self.report(
                Diagnostic::new(DiagnosticKind::ExportUndefined { names: undefined })
                    .at(spec.location.clone()),
            );
        }
        if !redundant.is_empty() {
            self.report(
                Diagnostic::warning(DiagnosticKind::ExportRedundant { names: redundant })
                    .at(spec.location.clone()),
            );
        }
        if list.is_empty() {
            self.report(Diagnostic::warning(DiagnosticKind::ExportEmpty).at(spec.location.clone()));
        }
        self.exports = Some(list);
    }

    /// Types the exports mention but do not export themselves
    pub(crate) fn bereaved_types(&self) -> Vec<IdentId> {
        let view = self.exported_view();
        let mut bereaved = Vec::new();
        for id in self.exported() {
            for ty in self.symbols.ident_type_deps(id) {
                let free = self
                    .symbols
                    .get(ty)
                    .type_def()
                    .map_or(false, |def| def.class == TypeClass::Free);
                if !free && !view.is_public(ty) && !bereaved.contains(&ty) {
                    bereaved.push(ty);
                }
            }
        }
        bereaved
    }

    /// Record whether dumps of this script can orphan types, warning when
    /// the script hides a type it introduced itself
    pub(crate) fn note_bereaved(&mut self) {
        let bereaved = self.bereaved_types();
        self.may_orphan_types = !bereaved.is_empty();

        let own: Vec<String> = bereaved
            .iter()
            .filter(|id| self.new_types.contains(id))
            .map(|id| self.symbols.name(*id).to_string())
            .collect();
        if !own.is_empty() {
            let mut warning = Diagnostic::warning(DiagnosticKind::ExportIncomplete { names: own });
            if let Some(spec) = &self.export_spec {
                warning = warning.at(spec.location.clone());
            }
            self.report(warning);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::testing::{bind_source, session};
    use crate::errors::Severity;

    #[test]
    fn test_no_directive_exports_own_definitions() {
        let mut session = session();
        bind_source(&mut session, "/w/a.m", "a = 1\nb = a\n%free {\n  n :: num\n}\n");

        let names: Vec<&str> = session.exported().iter().map(|id| session.symbols.name(*id)).collect();
        assert_eq!(names, vec!["a", "b"]);
        let n = session.symbols.lookup("n").unwrap();
        assert!(!session.exported_view().is_public(n));
    }

    #[test]
    fn test_closure_adds_constructors_and_applies_embargoes() {
        let mut session = session();
        bind_source(
            &mut session,
            "/w/a.m",
            "%export + -helper\ntype shape = Circle num | Square num\nhelper = 1\narea = 2\n",
        );
        session.compute_exports();

        let names: Vec<&str> = session
            .exports()
            .unwrap()
            .iter()
            .map(|id| session.symbols.name(*id))
            .collect();
        assert_eq!(names, vec!["area", "shape", "Circle", "Square"]);
        assert!(session.reporter.diagnostics().is_empty());
    }

    #[test]
    fn test_undefined_and_redundant_entries() {
        let mut session = session();
        bind_source(&mut session, "/w/a.m", "%export a ghost -nobody\na = 1\n");
        session.compute_exports();

        let ghost = session.symbols.lookup("ghost").unwrap();
        assert!(session.errors.contains(&ghost));
        let kinds: Vec<_> = session.reporter.diagnostics().iter().map(|d| (&d.kind, d.severity)).collect();
        assert!(kinds.contains(&(
            &DiagnosticKind::ExportUndefined { names: vec!["ghost".into()] },
            Severity::Error
        )));
        assert!(kinds.contains(&(
            &DiagnosticKind::ExportRedundant { names: vec!["nobody".into()] },
            Severity::Warning
        )));
    }

    #[test]
    fn test_empty_export_list_warns() {
        let mut session = session();
        bind_source(&mut session, "/w/a.m", "%export -a\na = 1\n");
        session.compute_exports();
        assert_eq!(session.exports(), Some(&[][..]));
        assert!(session
            .reporter
            .diagnostics()
            .iter()
            .any(|d| d.kind == DiagnosticKind::ExportEmpty && !d.is_error()));
    }

    #[test]
    fn test_hide_and_restore_are_exact() {
        let mut session = session();
        bind_source(&mut session, "/w/a.m", "%export pub\npub = 1\nsecret = 2\n");
        session.compute_exports();
        let secret = session.symbols.lookup("secret").unwrap();
        let before = session.symbols.clone();

        // nothing hidden yet
        session.restore();
        assert_eq!(session.symbols, before);

        session.hide_non_exported();
        assert_eq!(session.symbols.lookup("secret"), None);
        assert!(session.symbols.lookup("pub").is_some());
        // display name and location survive privatisation
        assert_eq!(session.symbols.get(secret).name, "secret");
        assert!(session.symbols.get(secret).who.is_some());

        session.restore();
        session.restore();
        assert_eq!(session.symbols, before);
    }

    #[test]
    fn test_incomplete_export_list() {
        let mut session = session();
        bind_source(
            &mut session,
            "/w/a.m",
            "%export origin\ntype point = Pt num num\norigin :: point\norigin = zero\nzero :: point\n",
        );
        session.compute_exports();
        session.note_bereaved();

        assert!(session.may_orphan_types);
        assert!(session.reporter.diagnostics().iter().any(|d| d.kind
            == DiagnosticKind::ExportIncomplete { names: vec!["point".into()] }));
    }
}
