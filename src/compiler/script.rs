//! Script records: which files are loaded and what they define

use crate::core::symbols::{FileKey, IdentId, SymbolTable};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};

/// Modification time in whole seconds; 0 means "no such file"
pub type Timestamp = i64;

pub fn modified_time(path: &Path) -> Timestamp {
    fs::metadata(path).map(|meta| meta.mtime()).unwrap_or(0)
}

/// Inode and device of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FileIdentity {
    pub ino: u64,
    pub dev: u64,
}

impl FileIdentity {
    /// Identity of the file now at `path`; all zeros when there is none
    pub fn of(path: &Path) -> Self {
        fs::metadata(path)
            .map(|meta| FileIdentity { ino: meta.ino(), dev: meta.dev() })
            .unwrap_or_default()
    }
}

/// One loaded source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptRecord {
    pub path: PathBuf,
    pub identity: FileIdentity,
    pub mtime: Timestamp,
    /// Reached through `%include` rather than `%insert`; only these are shared
    pub shared: bool,
    /// Definitions in insertion order
    pub defs: Vec<IdentId>,
}

impl ScriptRecord {
    pub fn new(path: impl Into<PathBuf>, mtime: Timestamp, shared: bool) -> Self {
        let path = path.into();
        Self {
            identity: FileIdentity::of(&path),
            path,
            mtime,
            shared,
            defs: Vec::new(),
        }
    }

    /// Record for a file as it is on disk right now
    pub fn current(path: impl Into<PathBuf>, shared: bool) -> Self {
        let path = path.into();
        let mtime = modified_time(&path);
        Self::new(path, mtime, shared)
    }

    pub fn key(&self) -> FileKey {
        FileKey { ino: self.identity.ino, dev: self.identity.dev, mtime: self.mtime }
    }

    /// Same inode, device and timestamp
    pub fn same_content(&self, other: &ScriptRecord) -> bool {
        self.key() == other.key()
    }

    /// Re-read the inode and device from disk
    pub fn refresh_identity(&mut self) {
        self.identity = FileIdentity::of(&self.path);
    }

    pub fn push_def(&mut self, id: IdentId) {
        if !self.defs.contains(&id) {
            self.defs.push(id);
        }
    }

    /// Whether the file on disk is still the recorded one: same inode,
    /// device and timestamp
    pub fn is_current(&self) -> bool {
        match fs::metadata(&self.path) {
            Ok(meta) => meta.mtime() == self.mtime && FileIdentity { ino: meta.ino(), dev: meta.dev() } == self.identity,
            Err(_) => self.mtime == 0,
        }
    }
}

/// Definitions sorted by name with duplicate names dropped
pub fn sorted_defs(symbols: &SymbolTable, defs: &[IdentId]) -> Vec<IdentId> {
    let mut sorted = defs.to_vec();
    sorted.sort_by(|a, b| symbols.name(*a).cmp(symbols.name(*b)).then(a.cmp(b)));
    sorted.dedup_by(|a, b| symbols.name(*a) == symbols.name(*b));
    sorted
}

/// Lexically absolute form of `path`, relative to the working directory
pub fn absolute(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().map_or(false, |ext| ext == extension)
}

/// Where the dump of `source` lives, if scripts of its kind have dumps
pub fn dump_path(source: &Path, source_extension: &str, dump_extension: &str) -> Option<PathBuf> {
    has_extension(source, source_extension).then(|| source.with_extension(dump_extension))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_has_zero_time() {
        let dir = TempDir::new().unwrap();
        assert_eq!(modified_time(&dir.path().join("absent.m")), 0);
        assert_eq!(FileIdentity::of(&dir.path().join("absent.m")), FileIdentity::default());
    }

    #[test]
    fn test_same_content_needs_all_three() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.m");
        fs::write(&path, "a = 1\n").unwrap();

        let first = ScriptRecord::current(&path, true);
        let mut second = ScriptRecord::current(&path, true);
        assert!(first.same_content(&second));
        assert!(first.is_current());

        second.mtime += 1;
        assert!(!first.same_content(&second));

        let other = dir.path().join("b.m");
        fs::write(&other, "b = 1\n").unwrap();
        let mut third = ScriptRecord::current(&other, true);
        third.mtime = first.mtime;
        assert!(!first.same_content(&third));
    }

    #[test]
    fn test_replaced_file_is_not_current() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.m");
        fs::write(&path, "a = 1\n").unwrap();
        let record = ScriptRecord::current(&path, true);

        let other = dir.path().join("b.m");
        fs::write(&other, "a = 1\nextra = 2\n").unwrap();
        let stamp = fs::metadata(&path).unwrap().modified().unwrap();
        fs::File::options().write(true).open(&other).unwrap().set_modified(stamp).unwrap();
        fs::rename(&other, &path).unwrap();

        assert_eq!(modified_time(&path), record.mtime);
        assert!(!record.is_current());
    }

    #[test]
    fn test_dump_path() {
        assert_eq!(
            dump_path(Path::new("/w/a.m"), "m", "x"),
            Some(PathBuf::from("/w/a.x"))
        );
        assert_eq!(dump_path(Path::new("/w/notes.txt"), "m", "x"), None);
    }

    #[test]
    fn test_absolute_normalises() {
        assert_eq!(absolute(Path::new("/w/./lib/../a.m")), PathBuf::from("/w/a.m"));
        assert!(absolute(Path::new("a.m")).is_absolute());
    }

    #[test]
    fn test_sorted_defs_dedups_names() {
        let mut symbols = SymbolTable::new();
        let b = symbols.alloc("b");
        let a = symbols.alloc("a");
        let a2 = symbols.alloc("a");
        assert_eq!(sorted_defs(&symbols, &[b, a2, a]), vec![a, b]);
    }

    #[test]
    fn test_push_def_ignores_repeats() {
        let mut symbols = SymbolTable::new();
        let a = symbols.alloc("a");
        let mut record = ScriptRecord::new("/w/a.m", 0, true);
        record.push_def(a);
        record.push_def(a);
        assert_eq!(record.defs, vec![a]);
    }
}
