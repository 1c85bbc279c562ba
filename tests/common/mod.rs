//! Shared fixtures for the integration tests
#![allow(dead_code)]

use scriptc::compiler::{Environment, Session};
use scriptc::frontend::{Config, DeclParser, Frontend, ParsedScript, SyntaxError};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Parser that appends every path it parses to a log file, so that parses
/// done by forked children are counted too
pub struct CountingFrontend {
    inner: DeclParser,
    log: PathBuf,
}

impl Frontend for CountingFrontend {
    fn parse(&self, path: &Path, source: &str) -> Result<ParsedScript, SyntaxError> {
        if let Ok(mut log) = OpenOptions::new().create(true).append(true).open(&self.log) {
            let _ = writeln!(log, "{}", path.display());
        }
        self.inner.parse(path, source)
    }
}

pub struct Workspace {
    pub dir: TempDir,
    log: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("parses.log");
        Self { dir, log }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, source: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, source).unwrap();
        path
    }

    /// Push the modification time of `name` forward so it is strictly newer
    /// than anything written before
    pub fn touch(&self, name: &str, seconds: u64) {
        let later = SystemTime::now() + Duration::from_secs(seconds);
        File::options().write(true).open(self.path(name)).unwrap().set_modified(later).unwrap();
    }

    pub fn environment(&self) -> Environment {
        let mut config = Config::default();
        config.compile.verbosity = false;
        let frontend = CountingFrontend { inner: DeclParser::default(), log: self.log.clone() };
        Environment::new(config).with_frontend(Arc::new(frontend))
    }

    pub fn session(&self) -> Session {
        Session::new(self.environment())
    }

    /// File names parsed so far, in order
    pub fn parses(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(|line| Path::new(line).file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    pub fn parse_count(&self, name: &str) -> usize {
        self.parses().iter().filter(|p| *p == name).count()
    }
}
