//! Deciding between a dump and a recompile, and the compile pipeline itself

use crate::compiler::image::ScriptImage;
use crate::compiler::script::{absolute, has_extension, modified_time, ScriptRecord};
use crate::compiler::session::{ScriptState, Session};
use crate::core::symbols::{IdState, IdentId};
use crate::errors::{find_similar_names, Diagnostic, DiagnosticKind, Halt, IncludeFailure, SourceLocation};
use crate::frontend::syntax::SyntaxError;
use crate::infrastructure::dump::{remove_if_exists, DumpError};
use crate::infrastructure::metrics::{Counter, Phase};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};

impl Session {
    /// Load `path` for use, recovering from any interruption
    pub fn load(&mut self, path: &Path) -> ScriptState {
        match self.consider(path) {
            Ok(state) => state,
            Err(halt) => {
                self.recover(&halt);
                ScriptState::Error
            }
        }
    }

    /// Bring `path` up to date, from its dump while that is still valid
    ///
    /// Does nothing when the script is already resident and none of its
    /// sources changed.
    pub fn consider(&mut self, path: &Path) -> Result<ScriptState, Halt> {
        let path = absolute(path);
        let interrupts = self.env.interrupts.clone();
        let _loading = interrupts.enter_loading();

        let Some(artifact) = self.env.dump_path(&path) else {
            return self.compile(&path);
        };

        let resident = self.current_script.as_deref() == Some(path.as_path()) && !self.sources().is_empty();
        if resident && !self.sources_changed() {
            self.metrics().increment(Counter::CacheSkips);
            debug!(path = %path.display(), "already resident");
            return Ok(ScriptState::CachedValid);
        }

        let source_time = modified_time(&path);
        let dump_time = modified_time(&artifact);
        if source_time == 0 && dump_time != 0 {
            info!(artifact = %artifact.display(), "removing dump of vanished source");
            if let Err(err) = remove_if_exists(&artifact) {
                warn!(artifact = %artifact.display(), "cannot remove dump: {}", err);
            }
        }
        if source_time == 0 || dump_time == 0 || dump_time < source_time {
            debug!(path = %path.display(), state = ?ScriptState::CachedStale, "dump not usable");
            return self.compile(&path);
        }

        match self.reload(&path, &artifact)? {
            Some(state) => Ok(state),
            None => self.compile(&path),
        }
    }

    /// Install the dump at `artifact`; `None` means compile from source instead
    fn reload(&mut self, path: &Path, artifact: &Path) -> Result<Option<ScriptState>, Halt> {
        let interrupts = self.env.interrupts.clone();
        let metrics = self.env.metrics.clone();
        let window = interrupts.defer();
        let timer = metrics.time(Phase::LoadDump);

        let decoded = self
            .env
            .codec
            .read::<ScriptImage>(artifact, path)
            .and_then(|image| if image.is_well_formed() { Ok(image) } else { Err(DumpError::Decode(4)) });
        let image = match decoded {
            Ok(image) => image,
            Err(DumpError::Io(err)) => {
                debug!(artifact = %artifact.display(), "cannot read dump: {}", err);
                return Ok(None);
            }
            Err(err) => {
                if let Err(io_err) = remove_if_exists(artifact) {
                    warn!(artifact = %artifact.display(), "cannot remove dump: {}", io_err);
                }
                self.report(Diagnostic::warning(DiagnosticKind::CacheCorrupt {
                    artifact: artifact.to_path_buf(),
                    reason: err.to_string(),
                }));
                return Ok(None);
            }
        };

        if let Some(changed) = image.sources().iter().find(|record| !record.is_current()) {
            debug!(path = %path.display(), changed = %changed.path.display(), "source newer than dump");
            return Ok(None);
        }

        self.unload();
        self.old_files.clear();
        self.current_script = Some(path.to_path_buf());

        if image.syntax_error {
            self.old_files = image.sources();
            self.report(Diagnostic::new(DiagnosticKind::ContainsSyntaxError { path: path.to_path_buf() }));
            self.batch.fail(path);
            metrics.increment(Counter::DumpHits);
            return Ok(Some(ScriptState::Error));
        }

        let installed = match image.install(&mut self.symbols, None) {
            Ok(installed) => installed,
            Err(IncludeFailure::NameClash { names } | IncludeFailure::AliasClash { names }) => {
                if self.depth == 0 {
                    self.report(Diagnostic::new(DiagnosticKind::DumpNameClash {
                        path: path.to_path_buf(),
                        names,
                    }));
                }
                self.unload();
                return Ok(None);
            }
            Err(failure) => {
                warn!(artifact = %artifact.display(), "unexpected install failure: {}", failure);
                return Ok(None);
            }
        };

        self.files = installed.records;
        self.errors = installed.errors;
        self.free_ids = installed.free;
        self.internals = installed.internals;
        self.exports = Some(installed.public);
        self.may_orphan_types = installed.type_orphans;
        drop(timer);
        drop(window);
        interrupts.check()?;

        if !self.batch_mode {
            self.restore();
        }
        metrics.increment(Counter::DumpHits);
        info!(path = %path.display(), defs = self.files.iter().map(|f| f.defs.len()).sum::<usize>(), "loaded from dump");

        if self.errors.is_empty() {
            Ok(Some(ScriptState::Loaded))
        } else {
            self.report_errors();
            self.batch.fail(path);
            Ok(Some(ScriptState::Error))
        }
    }

    /// Compile `path` from source, replacing whatever is resident
    pub fn compile(&mut self, path: &Path) -> Result<ScriptState, Halt> {
        let path = absolute(path);
        let interrupts = self.env.interrupts.clone();
        let metrics = self.env.metrics.clone();
        let _loading = interrupts.enter_loading();

        metrics.increment(Counter::Recompiles);
        self.unload();
        self.old_files.clear();
        self.current_script = Some(path.clone());

        let source = match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.report(Diagnostic::info(DiagnosticKind::NewFile { path: path.clone() }));
                return Ok(ScriptState::Unloaded);
            }
            Err(err) => {
                debug!(path = %path.display(), "cannot read source: {}", err);
                self.report(Diagnostic::new(DiagnosticKind::CannotOpen { path: path.clone() }));
                self.batch.fail(&path);
                return Ok(ScriptState::Error);
            }
        };

        self.progress(format!("compiling {}", path.display()));
        self.files.push(ScriptRecord::current(&path, true));

        let parsed = {
            let _timer = metrics.time(Phase::Parse);
            metrics.increment(Counter::Parses);
            self.env.frontend.parse(&path, &source)
        };
        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(SyntaxError::NumberOutOfRange { line }) => {
                self.report(Diagnostic::new(DiagnosticKind::NumberOutOfRange).at(SourceLocation::new(&path, line)));
                self.unload_to_old_files();
                self.batch.fail(&path);
                return Ok(ScriptState::Error);
            }
            Err(err) => {
                self.report(
                    Diagnostic::new(DiagnosticKind::Syntax { message: err.to_string() })
                        .at(SourceLocation::new(&path, err.line())),
                );
                return self.syntax_failure(&path);
            }
        };
        interrupts.check()?;

        let includes = match self.bind_script(&path, parsed) {
            Ok(includes) => includes,
            Err(diagnostic) => {
                self.report(diagnostic);
                return self.syntax_failure(&path);
            }
        };
        interrupts.check()?;

        let resolution = match self.resolve_includes(includes) {
            Ok(resolution) => resolution,
            Err(Halt::Abandoned { .. } | Halt::CircularInclude { .. }) if self.depth == 0 => {
                self.report(Diagnostic::new(DiagnosticKind::Abandoned { script: path.clone() }));
                self.unload_to_old_files();
                self.batch.fail(&path);
                return Ok(ScriptState::Error);
            }
            Err(halt) => return Err(halt),
        };
        self.files.extend(resolution.records);
        if resolution.failed {
            return self.syntax_failure(&path);
        }
        interrupts.check()?;

        if !resolution.orphaned {
            let own = self.own_defs();
            let _timer = metrics.time(Phase::Check);
            let checker = self.env.checker.clone();
            for id in checker.check(&mut self.symbols, &own) {
                if !self.errors.contains(&id) {
                    self.errors.push(id);
                }
            }
        }
        interrupts.check()?;

        if self.errors.is_empty() {
            self.compute_exports();
        }
        self.note_bereaved();
        if !self.errors.is_empty() {
            self.report_errors();
            self.batch.fail(&path);
        }
        interrupts.check()?;

        if has_extension(&path, &self.env.config.compile.source_extension) {
            self.persist(&path)?;
        }
        if self.batch_mode {
            self.hide_non_exported();
        }

        let state = if self.errors.is_empty() { ScriptState::Loaded } else { ScriptState::Error };
        info!(path = %path.display(), ?state, files = self.files.len(), "compiled");
        Ok(state)
    }

    /// Give up on a script that did not parse or bind, leaving an error dump
    /// so that it is not recompiled until one of its sources changes
    fn syntax_failure(&mut self, path: &Path) -> Result<ScriptState, Halt> {
        let records = self.files.clone();
        self.unload();
        self.write_image(path, &ScriptImage::error_dump(&records))?;
        self.old_files = records;
        self.batch.fail(path);
        Ok(ScriptState::Error)
    }

    /// Write the resident script's export view to its dump
    pub fn persist(&mut self, path: &Path) -> Result<(), Halt> {
        let view = self.exported_view();
        let image = ScriptImage::capture(self, &view);
        self.write_image(path, &image)
    }

    fn write_image(&mut self, path: &Path, image: &ScriptImage) -> Result<(), Halt> {
        let Some(artifact) = self.env.dump_path(path) else {
            return Ok(());
        };
        let metrics = self.env.metrics.clone();
        let _timer = metrics.time(Phase::Persist);

        let codec = self.env.codec;
        if let Err(err) = codec.write(&artifact, path, image, &mut self.staging) {
            if let Some(partial) = self.staging.take() {
                if let Err(io_err) = remove_if_exists(&partial) {
                    warn!(path = %partial.display(), "cannot remove partial dump: {}", io_err);
                }
            }
            warn!(artifact = %artifact.display(), "cannot write dump: {}", err);
            self.report(Diagnostic::warning(DiagnosticKind::CannotWriteDump { artifact }));
            self.batch.fail(path);
            return Ok(());
        }
        metrics.increment(Counter::DumpWrites);
        self.env.interrupts.check()
    }

    /// Whether any file the resident script came from changed on disk
    pub fn sources_changed(&self) -> bool {
        self.sources().iter().any(|record| !record.is_current())
    }

    /// Delete dumps whose sources have disappeared
    pub fn remove_vanished_dumps(&self) {
        for record in self.sources() {
            if modified_time(&record.path) != 0 {
                continue;
            }
            if let Some(artifact) = self.env.dump_path(&record.path) {
                match remove_if_exists(&artifact) {
                    Ok(()) => debug!(artifact = %artifact.display(), "removed dump of vanished source"),
                    Err(err) => warn!(artifact = %artifact.display(), "cannot remove dump: {}", err),
                }
            }
        }
    }

    /// Report the undefined names and type errors in `errors`
    fn report_errors(&mut self) {
        let mut undefined: Vec<IdentId> = Vec::new();
        let mut wrong = Vec::new();
        for &id in &self.errors {
            match self.symbols.get(id).state() {
                IdState::Undefined => undefined.push(id),
                IdState::TypeError => wrong.push(self.symbols.name(id).to_string()),
                _ => {}
            }
        }

        if !undefined.is_empty() {
            let defined = self.symbols.defined_names();
            let mut names = Vec::new();
            let mut hints = Vec::new();
            for id in undefined {
                let name = self.symbols.name(id).to_string();
                for similar in find_similar_names(&name, defined.iter().map(String::as_str), 1) {
                    hints.push(format!("did you mean \"{}\" for \"{}\"?", similar, name));
                }
                names.push(name);
            }
            names.sort();
            self.report(Diagnostic::new(DiagnosticKind::UndefinedNames { names }).with_suggestions(hints));
        }
        if !wrong.is_empty() {
            wrong.sort();
            self.report(Diagnostic::new(DiagnosticKind::TypeErrors { names: wrong }));
        }
    }
}
