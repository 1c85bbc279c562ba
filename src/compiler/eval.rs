//! Evaluating and describing definitions
//!
//! Evaluation always happens in a forked child, so whatever it does to the
//! symbol table, and however it dies, the session is untouched.

use crate::compiler::session::Session;
use crate::core::symbols::{Expr, IdKind, IdState, IdentId, Value};
use crate::errors::{find_similar_names, Diagnostic, DiagnosticKind};
use crate::infrastructure::isolation::{isolate_and_run, Fault};
use std::collections::HashSet;
use std::io::{self, Write};
use tracing::debug;

impl Session {
    /// Identifier currently answering to `name`, or a not-in-scope
    /// diagnostic with near misses
    pub fn find_defined(&self, name: &str) -> Result<IdentId, Diagnostic> {
        match self.symbols.lookup(name) {
            Some(id) if !self.symbols.get(id).is_undefined() => Ok(id),
            _ => {
                let names = self.symbols.defined_names();
                let hints = find_similar_names(name, names.iter().map(String::as_str), 2)
                    .into_iter()
                    .take(3)
                    .map(|n| format!("did you mean '{}'?", n))
                    .collect();
                Err(Diagnostic::new(DiagnosticKind::NotInScope { name: name.to_string() })
                    .with_suggestions(hints))
            }
        }
    }

    /// Print the value of `name` from an isolated child
    ///
    /// Returns the fault that killed the child, if any. The caller decides
    /// how to show it.
    pub fn evaluate(&mut self, name: &str) -> Result<Option<Fault>, Diagnostic> {
        let id = self.find_defined(name)?;
        let fault = self
            .isolated(|session| {
                let text = session.render(id);
                let mut out = io::stdout().lock();
                let _ = writeln!(out, "{}", text);
                let _ = out.flush();
            })
            .map_err(|e| Diagnostic::new(DiagnosticKind::Io { message: e.to_string() }))?;
        debug!(name, ?fault, "evaluation finished");
        Ok(fault)
    }

    /// Run `work` against this session in a forked child
    pub fn isolated<F>(&mut self, work: F) -> io::Result<Option<Fault>>
    where
        F: FnOnce(&mut Session),
    {
        let interrupts = self.env.interrupts.clone();
        isolate_and_run(&interrupts, || work(self))
    }

    /// Printed form of an identifier's value
    pub fn render(&self, id: IdentId) -> String {
        let mut seen = HashSet::new();
        let mut id = self.symbols.resolve(id);
        loop {
            if !seen.insert(id) {
                return "BLACK HOLE".to_string();
            }
            let ident = self.symbols.get(id);
            if ident.is_type() {
                return format!("<{} {}>", ident.type_def().map_or("type", |def| def.describe()), ident.name);
            }
            match &ident.value {
                Value::Undef | Value::Free => return format!("UNDEFINED NAME - {}", ident.name),
                Value::Constructor { arity: 0, .. } => return ident.name.clone(),
                Value::Constructor { arity, .. } => return format!("<constructor {}/{}>", ident.name, arity),
                Value::Defined(Expr::Num(n)) => return n.to_string(),
                Value::Defined(Expr::Str(s)) => return format!("\"{}\"", s.escape_default()),
                Value::Defined(Expr::Ref(next)) => id = self.symbols.resolve(*next),
                Value::Shared(next) => id = self.symbols.resolve(*next),
            }
        }
    }

    /// Type, state and provenance of `name`
    pub fn describe(&self, name: &str) -> Result<String, Diagnostic> {
        let id = match self.symbols.lookup(name) {
            Some(id) => id,
            None => return self.find_defined(name).map(|_| String::new()),
        };
        let canonical = self.symbols.resolve(id);
        let ident = self.symbols.get(canonical);

        let mut text = match &ident.kind {
            IdKind::Type(def) => format!("{} {} (arity {})", def.describe(), name, def.arity),
            IdKind::Value(ty) => format!("{} :: {}", name, self.symbols.display_type(ty)),
            IdKind::Wrong => format!("{} :: <type error>", name),
            IdKind::Undef => name.to_string(),
        };
        let state = match self.symbols.get(id).state() {
            IdState::Undefined => "undefined",
            IdState::Specified => "specified but not defined",
            IdState::Defined => "defined",
            IdState::TypeError => "type error",
            IdState::Free => "%free parameter",
        };
        text.push_str(&format!("\n;; {}", state));

        if let Some(who) = &ident.who {
            text.push_str(&format!(", {}", who.here));
            if let Some(aka) = &who.aka {
                text.push_str(&format!(" (as {})", aka));
            }
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::testing::{bind_source, session};

    const SOURCE: &str = "type shape = Circle num | Dot\nsize :: num\nsize = 42\nalias = size\n\
                          greeting = \"hi\\n\"\nloop = again\nagain = loop\nmissing = nowhere\n";

    #[test]
    fn test_render_values() {
        let mut session = session();
        bind_source(&mut session, "/w/a.m", SOURCE);
        let render = |name: &str| session.render(session.symbols.lookup(name).unwrap());

        assert_eq!(render("size"), "42");
        assert_eq!(render("alias"), "42");
        assert_eq!(render("greeting"), "\"hi\\n\"");
        assert_eq!(render("Dot"), "Dot");
        assert_eq!(render("Circle"), "<constructor Circle/1>");
        assert_eq!(render("loop"), "BLACK HOLE");
        assert_eq!(render("missing"), "UNDEFINED NAME - nowhere");
        assert_eq!(render("shape"), "<algebraic type shape>");
    }

    #[test]
    fn test_not_in_scope_suggests() {
        let mut session = session();
        bind_source(&mut session, "/w/a.m", SOURCE);

        let err = session.evaluate("sise").unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::NotInScope { name: "sise".into() });
        assert_eq!(err.suggestions, vec!["did you mean 'size'?".to_string()]);
        // referenced but never defined
        assert!(session.find_defined("nowhere").is_err());
    }

    #[test]
    fn test_describe_reports_type_and_provenance() {
        let mut session = session();
        bind_source(&mut session, "/w/a.m", SOURCE);

        let text = session.describe("size").unwrap();
        assert_eq!(text, "size :: num\n;; defined, line 2 of \"/w/a.m\"");
        let text = session.describe("shape").unwrap();
        assert!(text.starts_with("algebraic type shape (arity 0)"));
        assert!(session.describe("nothing_at_all").is_err());
    }

    #[test]
    fn test_evaluation_leaves_session_untouched() {
        let mut session = session();
        bind_source(&mut session, "/w/a.m", SOURCE);
        let before = session.symbols.clone();
        let size = session.symbols.lookup("size").unwrap();

        let fault = session
            .isolated(|child| {
                child.symbols.unset(size);
                // SAFETY: deliberately kill the child, past std's SIGSEGV handler
                unsafe {
                    libc::signal(libc::SIGSEGV, libc::SIG_DFL);
                    libc::raise(libc::SIGSEGV);
                }
            })
            .unwrap();
        assert_eq!(fault.map(|f| f.signal), Some(libc::SIGSEGV));
        assert_eq!(session.symbols, before);

        assert_eq!(session.evaluate("size").unwrap(), None);
        assert_eq!(session.symbols, before);
    }
}
