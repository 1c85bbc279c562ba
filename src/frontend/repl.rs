//! Interactive loop
//!
//! ```text
//! /f [file]   switch to file, or recompile the current script
//! /files      list the current script's sources
//! /hush       stop reporting progress   (/nohush resumes)
//! /recheck    reload whenever a source changes   (/norecheck stops)
//! /q          quit
//! ?name       type and provenance of name
//! !command    run a shell command
//! name        evaluate name
//! ```

use crate::compiler::script::absolute;
use crate::compiler::{ScriptState, Session};
use crate::infrastructure::isolation::isolate_and_run;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Whether the loop keeps going after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Repl {
    session: Session,
    script: Option<PathBuf>,
    prompt: String,
    rechecking: bool,
    listing: bool,
}

impl Repl {
    pub fn new(session: Session) -> Self {
        let config = session.config();
        let prompt = config.repl.prompt.clone();
        let rechecking = config.compile.rechecking;
        let listing = config.compile.listing;
        Self { session, script: None, prompt, rechecking, listing }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn script(&self) -> Option<&Path> {
        self.script.as_deref()
    }

    pub fn is_rechecking(&self) -> bool {
        self.rechecking
    }

    /// Read commands until `/q`, end of input or SIGTERM
    pub fn run(&mut self, input: &mut dyn BufRead, out: &mut dyn Write) -> io::Result<()> {
        let mut line = String::new();
        loop {
            if self.session.interrupts().terminate_requested() {
                info!("terminating on request");
                break;
            }
            self.recheck(out)?;

            write!(out, "{}", self.prompt)?;
            out.flush()?;
            line.clear();
            if self.read_command(input, &mut line)? == 0 {
                break;
            }
            if self.execute(line.trim(), out)? == Flow::Quit {
                break;
            }
        }
        writeln!(out)?;
        out.flush()
    }

    /// Read one line into `line`. A read cut short by a signal is retried
    /// unless termination was requested, which reads as end of input.
    fn read_command(&self, input: &mut dyn BufRead, line: &mut String) -> io::Result<usize> {
        let mut bytes = Vec::new();
        loop {
            let (used, done) = match input.fill_buf() {
                Ok(buf) => match buf.iter().position(|&b| b == b'\n') {
                    Some(end) => {
                        bytes.extend_from_slice(&buf[..=end]);
                        (end + 1, true)
                    }
                    None => {
                        bytes.extend_from_slice(buf);
                        (buf.len(), buf.is_empty())
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    if self.session.interrupts().terminate_requested() {
                        return Ok(0);
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };
            input.consume(used);
            if done {
                break;
            }
        }
        line.push_str(&String::from_utf8_lossy(&bytes));
        Ok(bytes.len())
    }

    /// Reload the current script if one of its sources changed
    fn recheck(&mut self, out: &mut dyn Write) -> io::Result<()> {
        let Some(script) = self.script.clone() else {
            return Ok(());
        };
        if self.rechecking && self.session.sources_changed() {
            debug!(script = %script.display(), "sources changed, reloading");
            self.session.remove_vanished_dumps();
            self.load(&script, false, out)?;
        }
        Ok(())
    }

    /// Run one command line
    pub fn execute(&mut self, line: &str, out: &mut dyn Write) -> io::Result<Flow> {
        if line.is_empty() {
            return Ok(Flow::Continue);
        }
        if let Some(command) = line.strip_prefix('!') {
            self.shell(command.trim(), out)?;
            return Ok(Flow::Continue);
        }
        if let Some(name) = line.strip_prefix('?') {
            match self.session.describe(name.trim()) {
                Ok(text) => writeln!(out, "{}", text)?,
                Err(diagnostic) => writeln!(out, "{}", diagnostic)?,
            }
            return Ok(Flow::Continue);
        }
        if let Some(command) = line.strip_prefix('/') {
            let mut words = command.split_whitespace();
            match (words.next(), words.next()) {
                (Some("q"), None) => return Ok(Flow::Quit),
                (Some("f"), Some(file)) => self.switch_to(Path::new(file), out)?,
                (Some("f"), None) => match self.script.clone() {
                    Some(script) => self.load(&script, true, out)?,
                    None => writeln!(out, "no current script")?,
                },
                (Some("files"), None) => {
                    for record in self.session.sources() {
                        let mark = if record.is_current() { "" } else { " (changed)" };
                        writeln!(out, "{}{}", record.path.display(), mark)?;
                    }
                }
                (Some("hush"), None) => self.session.set_verbose(false),
                (Some("nohush"), None) => self.session.set_verbose(true),
                (Some("recheck"), None) => self.rechecking = true,
                (Some("norecheck"), None) => self.rechecking = false,
                _ => writeln!(out, "unknown command - /{}", command)?,
            }
            return Ok(Flow::Continue);
        }

        match self.session.evaluate(line) {
            Ok(Some(fault)) => writeln!(out, "{}", fault)?,
            Ok(None) => {}
            Err(diagnostic) => writeln!(out, "{}", diagnostic)?,
        }
        Ok(Flow::Continue)
    }

    /// Make `file` the current script and load it
    pub fn switch_to(&mut self, file: &Path, out: &mut dyn Write) -> io::Result<()> {
        let mut path = absolute(file);
        if path.extension().is_none() {
            path.set_extension(&self.session.config().compile.source_extension);
        }
        self.script = Some(path.clone());
        self.load(&path, false, out)
    }

    fn load(&mut self, path: &Path, force: bool, out: &mut dyn Write) -> io::Result<()> {
        let state = if force {
            match self.session.compile(path) {
                Ok(state) => state,
                Err(halt) => {
                    self.session.recover(&halt);
                    ScriptState::Error
                }
            }
        } else {
            self.session.load(path)
        };
        debug!(path = %path.display(), ?state, "loaded");

        if self.listing && matches!(state, ScriptState::Loaded | ScriptState::CachedValid) {
            let names: Vec<&str> = self
                .session
                .exported()
                .iter()
                .map(|id| self.session.symbols().name(*id))
                .collect();
            writeln!(out, "{}", names.join(" "))?;
        }
        Ok(())
    }

    /// Run a shell command in a child, deaf to interrupts meanwhile
    fn shell(&mut self, command: &str, out: &mut dyn Write) -> io::Result<()> {
        out.flush()?;
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
        let fault = isolate_and_run(self.session.interrupts(), || {
            let mut child = Command::new(&shell);
            if !command.is_empty() {
                child.arg("-c").arg(command);
            }
            if let Err(e) = child.status() {
                eprintln!("cannot run {}: {}", shell, e);
            }
        })?;
        if let Some(fault) = fault {
            writeln!(out, "{}", fault)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Environment;
    use crate::frontend::config::Config;
    use std::fs;
    use std::io::Read;
    use tempfile::TempDir;

    fn repl() -> Repl {
        let mut config = Config::default();
        config.compile.verbosity = false;
        Repl::new(Session::new(Environment::new(config)))
    }

    fn run(repl: &mut Repl, line: &str) -> (Flow, String) {
        let mut out = Vec::new();
        let flow = repl.execute(line, &mut out).unwrap();
        (flow, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_commands_toggle_settings() {
        let mut repl = repl();
        assert!(!repl.session().is_verbose());
        run(&mut repl, "/nohush");
        assert!(repl.session().is_verbose());
        run(&mut repl, "/hush");
        assert!(!repl.session().is_verbose());
        run(&mut repl, "/recheck");
        assert!(repl.is_rechecking());
        run(&mut repl, "/norecheck");
        assert!(!repl.is_rechecking());

        assert_eq!(run(&mut repl, "/q").0, Flow::Quit);
        assert_eq!(run(&mut repl, "/zap").1, "unknown command - /zap\n");
        assert_eq!(run(&mut repl, "/f").1, "no current script\n");
    }

    #[test]
    fn test_switch_describe_and_files() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("main.m");
        fs::write(&script, "size :: num\nsize = 3\n").unwrap();

        let mut repl = repl();
        // extension is supplied
        run(&mut repl, &format!("/f {}", dir.path().join("main").display()));
        assert_eq!(repl.script(), Some(script.as_path()));
        assert!(dir.path().join("main.x").exists());

        let (_, text) = run(&mut repl, "?size");
        assert!(text.starts_with("size :: num\n;; defined"));
        let (_, text) = run(&mut repl, "?nothing");
        assert!(text.starts_with("identifier \"nothing\" not in scope"));
        let (_, text) = run(&mut repl, "/files");
        assert_eq!(text, format!("{}\n", script.display()));
    }

    #[test]
    fn test_recheck_reloads_changed_script() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("main.m");
        fs::write(&script, "size = 3\n").unwrap();

        let mut repl = repl();
        run(&mut repl, &format!("/f {}", script.display()));
        run(&mut repl, "/recheck");
        assert!(repl.session().symbols().lookup("later").is_none());

        fs::write(&script, "size = 3\nlater = size\n").unwrap();
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        fs::File::options().write(true).open(&script).unwrap().set_modified(later).unwrap();

        let mut input = io::Cursor::new(b"/q\n".to_vec());
        let mut out = Vec::new();
        repl.run(&mut input, &mut out).unwrap();
        assert!(repl.session().symbols().lookup("later").is_some());
    }

    /// Input whose first read is cut short by SIGTERM
    struct TerminatedInput {
        interrupts: crate::infrastructure::interrupt::Interrupts,
        rest: io::Cursor<Vec<u8>>,
    }

    impl io::Read for TerminatedInput {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.rest.read(buf)
        }
    }

    impl BufRead for TerminatedInput {
        fn fill_buf(&mut self) -> io::Result<&[u8]> {
            if !self.interrupts.terminate_requested() {
                self.interrupts.request_terminate();
                return Err(io::Error::from(io::ErrorKind::Interrupted));
            }
            self.rest.fill_buf()
        }

        fn consume(&mut self, amount: usize) {
            self.rest.consume(amount)
        }
    }

    #[test]
    fn test_terminate_ends_loop_with_flush() {
        let mut repl = repl();
        let mut input = TerminatedInput {
            interrupts: repl.session().interrupts().clone(),
            rest: io::Cursor::new(b"/nohush\n".to_vec()),
        };
        let mut out = Vec::new();
        repl.run(&mut input, &mut out).unwrap();
        // the pending line was never executed
        assert!(!repl.session().is_verbose());
        assert_eq!(String::from_utf8(out).unwrap(), "scriptc> \n");
    }

    #[test]
    fn test_partial_last_line_is_read() {
        let mut repl = repl();
        let mut input = io::Cursor::new(b"/nohush".to_vec());
        let mut out = Vec::new();
        repl.run(&mut input, &mut out).unwrap();
        assert!(repl.session().is_verbose());
    }

    #[test]
    fn test_run_stops_at_end_of_input() {
        let mut repl = repl();
        let mut input = io::Cursor::new(b"\n/hush\n".to_vec());
        let mut out = Vec::new();
        repl.run(&mut input, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("scriptc> ").count(), 3);
    }
}
