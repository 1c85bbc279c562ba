//! Compiler session: everything one compiler process knows
//!
//! All state that a compilation reads or writes lives in a [`Session`]. A
//! child process spawned by the include resolver builds a fresh session from
//! the same [`Environment`], so nothing it does leaks back.

use crate::compiler::bind::NameChecker;
use crate::compiler::script::{dump_path, ScriptRecord};
use crate::core::symbols::{IdentId, SymbolTable};
use crate::errors::{Diagnostic, DiagnosticKind, Halt, Reporter, TypeClashEntry, TypeOrphanEntry};
use crate::frontend::config::Config;
use crate::frontend::parser::DeclParser;
use crate::frontend::syntax::{ExportSpec, Frontend};
use crate::infrastructure::dump::{remove_if_exists, DumpCodec};
use crate::infrastructure::interrupt::Interrupts;
use crate::infrastructure::metrics::SessionMetrics;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Type checker contract
pub trait Checker {
    /// Check the script's own definitions; returns the identifiers that are
    /// undefined or failed to type check
    fn check(&self, symbols: &mut SymbolTable, own_defs: &[IdentId]) -> Vec<IdentId>;
}

/// Where a script stands with respect to its dump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptState {
    /// Nothing loaded (the file does not exist yet)
    Unloaded,
    /// Already resident and unchanged; nothing was done
    CachedValid,
    /// The dump is missing or older than the source
    CachedStale,
    Loading,
    Loaded,
    /// Loaded, but with syntax, undefined-name or type errors
    Error,
}

impl ScriptState {
    pub fn is_failure(self) -> bool {
        matches!(self, ScriptState::Error)
    }
}

/// Collaborators shared by a session and every child it spawns
#[derive(Clone)]
pub struct Environment {
    pub config: Arc<Config>,
    pub frontend: Arc<dyn Frontend>,
    pub checker: Arc<dyn Checker>,
    pub interrupts: Interrupts,
    pub metrics: Arc<SessionMetrics>,
    pub codec: DumpCodec,
    /// Print diagnostics as they are reported
    pub echo: bool,
}

impl Environment {
    pub fn new(config: Config) -> Self {
        let frontend = DeclParser::new(config.compile.source_extension.clone());
        Self {
            config: Arc::new(config),
            frontend: Arc::new(frontend),
            checker: Arc::new(NameChecker),
            interrupts: Interrupts::new(),
            metrics: Arc::new(SessionMetrics::new()),
            codec: DumpCodec::default(),
            echo: false,
        }
    }

    pub fn with_frontend(mut self, frontend: Arc<dyn Frontend>) -> Self {
        self.frontend = frontend;
        self
    }

    pub fn with_checker(mut self, checker: Arc<dyn Checker>) -> Self {
        self.checker = checker;
        self
    }

    pub fn with_interrupts(mut self, interrupts: Interrupts) -> Self {
        self.interrupts = interrupts;
        self
    }

    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn dump_path(&self, source: &Path) -> Option<PathBuf> {
        dump_path(
            source,
            &self.config.compile.source_extension,
            &self.config.compile.dump_extension,
        )
    }
}

/// Scripts that failed in a batch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchStatus {
    failed: Vec<PathBuf>,
}

impl BatchStatus {
    pub fn fail(&mut self, script: &Path) {
        if !self.failed.iter().any(|p| p == script) {
            self.failed.push(script.to_path_buf());
        }
    }

    pub fn failed(&self) -> &[PathBuf] {
        &self.failed
    }

    pub fn exit_code(&self) -> i32 {
        if self.failed.is_empty() {
            0
        } else {
            1
        }
    }
}

/// Working lists of one include resolution pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverScratch {
    /// Every identifier created while loading dependency dumps
    pub loaded: Vec<IdentId>,
    /// Later copies redirected to an earlier canonical copy
    pub unified: Vec<(IdentId, IdentId)>,
    pub type_clashes: Vec<TypeClashEntry>,
    pub type_orphans: Vec<TypeOrphanEntry>,
    pub name_clashes: Vec<String>,
}

impl ResolverScratch {
    pub fn clear(&mut self) {
        self.loaded.clear();
        self.unified.clear();
        self.type_clashes.clear();
        self.type_orphans.clear();
        self.name_clashes.clear();
    }
}

pub struct Session {
    pub(crate) env: Environment,
    pub(crate) symbols: SymbolTable,
    pub(crate) reporter: Reporter,
    /// Loaded files, the current script first
    pub(crate) files: Vec<ScriptRecord>,
    /// Files of the last failed or interrupted load, for change detection
    pub(crate) old_files: Vec<ScriptRecord>,
    pub(crate) current_script: Option<PathBuf>,
    /// Identifiers with undefined names or type errors
    pub(crate) errors: Vec<IdentId>,
    pub(crate) free_ids: Vec<IdentId>,
    /// Types introduced by the script itself
    pub(crate) new_types: Vec<IdentId>,
    /// Identifiers hidden by `hide_non_exported`, waiting for `restore`
    pub(crate) internals: Vec<IdentId>,
    pub(crate) export_spec: Option<ExportSpec>,
    /// Contributions to the export list from `+` and `"file"` items
    pub(crate) pending_exports: Vec<IdentId>,
    /// Closure of the export directive; `None` when the script has none
    pub(crate) exports: Option<Vec<IdentId>>,
    /// Exports reference types they do not export
    pub(crate) may_orphan_types: bool,
    pub(crate) scratch: ResolverScratch,
    pub(crate) batch: BatchStatus,
    /// Running as a child or driven by a batch command
    pub(crate) batch_mode: bool,
    pub(crate) depth: usize,
    /// Temporary dump being written, unlinked on interrupt
    pub(crate) staging: Option<PathBuf>,
    pub(crate) verbose: bool,
}

impl Session {
    pub fn new(env: Environment) -> Self {
        let verbose = env.config.compile.verbosity;
        let reporter = Reporter::new(env.echo);
        Self {
            env,
            symbols: SymbolTable::new(),
            reporter,
            files: Vec::new(),
            old_files: Vec::new(),
            current_script: None,
            errors: Vec::new(),
            free_ids: Vec::new(),
            new_types: Vec::new(),
            internals: Vec::new(),
            export_spec: None,
            pending_exports: Vec::new(),
            exports: None,
            may_orphan_types: false,
            scratch: ResolverScratch::default(),
            batch: BatchStatus::default(),
            batch_mode: false,
            depth: 0,
            staging: None,
            verbose,
        }
    }

    /// Fresh session for an isolated child resolving includes at `depth`
    pub fn child(env: Environment, depth: usize) -> Self {
        let mut session = Self::new(env);
        session.depth = depth;
        session.batch_mode = true;
        session
    }

    pub fn with_batch_mode(mut self, batch_mode: bool) -> Self {
        self.batch_mode = batch_mode;
        self
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn config(&self) -> &Config {
        &self.env.config
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn reporter_mut(&mut self) -> &mut Reporter {
        &mut self.reporter
    }

    pub fn files(&self) -> &[ScriptRecord] {
        &self.files
    }

    pub fn old_files(&self) -> &[ScriptRecord] {
        &self.old_files
    }

    pub fn current_script(&self) -> Option<&Path> {
        self.current_script.as_deref()
    }

    pub fn errors(&self) -> &[IdentId] {
        &self.errors
    }

    pub fn free_ids(&self) -> &[IdentId] {
        &self.free_ids
    }

    pub fn exports(&self) -> Option<&[IdentId]> {
        self.exports.as_deref()
    }

    pub fn scratch(&self) -> &ResolverScratch {
        &self.scratch
    }

    pub fn batch(&self) -> &BatchStatus {
        &self.batch
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn metrics(&self) -> &SessionMetrics {
        &self.env.metrics
    }

    pub fn interrupts(&self) -> &Interrupts {
        &self.env.interrupts
    }

    pub(crate) fn report(&mut self, diagnostic: Diagnostic) {
        self.reporter.report(diagnostic);
    }

    /// Progress line, shown when verbose or in batch mode
    pub(crate) fn progress(&self, message: impl std::fmt::Display) {
        if self.verbose || self.batch_mode {
            self.reporter.note(message);
        }
    }

    /// Sources the session depends on: the loaded files, or those of the
    /// last failed load
    pub fn sources(&self) -> &[ScriptRecord] {
        if self.files.is_empty() {
            &self.old_files
        } else {
            &self.files
        }
    }

    /// Discard the compiled form of the current script
    ///
    /// Every identifier the load touched goes back to undefined and every
    /// working list is emptied once.
    pub fn unload(&mut self) {
        let touched: Vec<IdentId> = self
            .new_types
            .drain(..)
            .chain(self.free_ids.drain(..))
            .chain(self.internals.drain(..))
            .chain(self.files.iter().flat_map(|f| f.defs.iter().copied()))
            .chain(self.scratch.loaded.drain(..))
            .collect();
        for id in touched {
            self.symbols.unset(id);
        }

        self.files.clear();
        self.errors.clear();
        self.export_spec = None;
        self.pending_exports.clear();
        self.exports = None;
        self.may_orphan_types = false;
        self.scratch.clear();
    }

    /// Unload, keeping the files of the abandoned load for change detection
    pub(crate) fn unload_to_old_files(&mut self) {
        let files = self.files.clone();
        self.unload();
        if !files.is_empty() {
            self.old_files = files;
        }
    }

    /// Return to a consistent state after an interrupted compilation
    pub fn recover(&mut self, halt: &Halt) {
        if let Some(partial) = self.staging.take() {
            if let Err(e) = remove_if_exists(&partial) {
                warn!(path = %partial.display(), "cannot remove partial dump: {}", e);
            }
        }
        self.unload_to_old_files();
        // nothing is resident, so the next load compiles afresh
        if let Some(script) = self.current_script.take() {
            if self.batch_mode {
                self.batch.fail(&script);
            }
        }
        self.env.interrupts.rearm();

        debug!(?halt, "recovered from interrupted compilation");
        if *halt == Halt::Cancelled {
            self.report(Diagnostic::new(DiagnosticKind::CompilationInterrupted));
        }
    }
}
