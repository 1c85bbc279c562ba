use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: usize,
}

impl SourceLocation {
    pub fn new(file: impl Into<PathBuf>, line: usize) -> Self {
        Self { file: file.into(), line }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {} of \"{}\"", self.line, self.file.display())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A shared type introduced under two different names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeClashEntry {
    pub file: PathBuf,
    pub canonical: String,
    pub duplicates: Vec<String>,
}

/// A type with no visible name that visible identifiers depend on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeOrphanEntry {
    pub type_name: String,
    pub defined_in: Option<PathBuf>,
    pub via: PathBuf,
    pub needed_by: Vec<String>,
}

/// Why an include directive could not be honoured
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncludeFailure {
    CannotLoad { path: PathBuf },
    BadDump { artifact: PathBuf },
    AliasNotFound { names: Vec<String> },
    SuppressedType { names: Vec<String> },
    AliasClash { names: Vec<String> },
    NameClash { names: Vec<String> },
    WrongKind { name: String, expected_type: bool },
    WrongArity { name: String, expected: usize, found: usize },
    NotFree { names: Vec<String> },
    MissingBindings { names: Vec<String> },
    SyntaxError { path: PathBuf },
    HasErrors { path: PathBuf },
}

impl fmt::Display for IncludeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CannotLoad { path } => write!(f, "\"{}\" cannot be loaded", path.display()),
            Self::BadDump { artifact } => {
                write!(f, "bad data in \"{}\" - compile that file first", artifact.display())
            }
            Self::AliasNotFound { names } => {
                write!(f, "alias fails (name{} not found in file): {}", plural(names), names.join(","))
            }
            Self::SuppressedType { names } => {
                write!(f, "illegal alias (cannot suppress typename{}): -{}", plural(names), names.join(" -"))
            }
            Self::AliasClash { names } => {
                write!(f, "aliasing causes nameclash{}: {}", plural_es(names), names.join(","))
            }
            Self::NameClash { names } => {
                write!(f, "%include causes nameclash{}: {}", plural_es(names), names.join(","))
            }
            Self::WrongKind { name, expected_type: true } => {
                write!(f, "parameter \"{}\" should be bound with == (type)", name)
            }
            Self::WrongKind { name, expected_type: false } => {
                write!(f, "parameter \"{}\" should be bound with = (value)", name)
            }
            Self::WrongArity { name, expected, found } => {
                write!(f, "type parameter \"{}\" has arity {}, binding has arity {}", name, expected, found)
            }
            Self::NotFree { names } => {
                write!(f, "binding for parameter{} not %free in file: {}", plural(names), names.join(","))
            }
            Self::MissingBindings { names } => {
                write!(f, "missing parameter binding{}: {}", plural(names), names.join(","))
            }
            Self::SyntaxError { path } => write!(f, "\"{}\" contains syntax error", path.display()),
            Self::HasErrors { path } => {
                write!(f, "\"{}\" contains undefined names or type errors", path.display())
            }
        }
    }
}

fn plural(names: &[String]) -> &'static str {
    if names.len() > 1 {
        "s"
    } else {
        ""
    }
}

fn plural_es(names: &[String]) -> &'static str {
    if names.len() > 1 {
        "es"
    } else {
        ""
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    Syntax { message: String },
    NumberOutOfRange,
    UndefinedNames { names: Vec<String> },
    TypeErrors { names: Vec<String> },
    NewFile { path: PathBuf },
    CannotOpen { path: PathBuf },
    CacheCorrupt { artifact: PathBuf, reason: String },
    CannotWriteDump { artifact: PathBuf },
    DumpNameClash { path: PathBuf, names: Vec<String> },
    ContainsSyntaxError { path: PathBuf },
    ContainsErrors { path: PathBuf },
    Include { failure: IncludeFailure },
    TypeClash { entries: Vec<TypeClashEntry> },
    TypeOrphan { entries: Vec<TypeOrphanEntry> },
    IllegalExportFile { path: PathBuf, ambiguous: bool },
    ExportUndefined { names: Vec<String> },
    ExportRedundant { names: Vec<String> },
    ExportEmpty,
    ExportIncomplete { names: Vec<String> },
    Abandoned { script: PathBuf },
    IncludeTooDeep { depth: usize },
    CompilationInterrupted,
    Fault { message: String },
    NotInScope { name: String },
    Io { message: String },
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax { message } => write!(f, "syntax error - {}", message),
            Self::NumberOutOfRange => write!(f, "syntax error - number out of range"),
            Self::UndefinedNames { names } => write!(f, "undefined name{}: {}", plural(names), names.join(",")),
            Self::TypeErrors { names } => write!(f, "type error{} in definition of {}", plural(names), names.join(",")),
            Self::NewFile { path } => write!(f, "new file \"{}\"", path.display()),
            Self::CannotOpen { path } => write!(f, "cannot open \"{}\"", path.display()),
            Self::CacheCorrupt { artifact, reason } => {
                write!(f, "warning: \"{}\" contains incorrect data (file removed)\n({})", artifact.display(), reason)
            }
            Self::CannotWriteDump { artifact } => {
                write!(f, "WARNING: CANNOT WRITE TO \"{}\"", artifact.display())
            }
            Self::DumpNameClash { path, names } => {
                write!(f, "cannot load \"{}\" due to name clashes: {}", path.display(), names.join(","))
            }
            Self::ContainsSyntaxError { path } => write!(f, "\"{}\" contains syntax error", path.display()),
            Self::ContainsErrors { path } => {
                write!(f, "\"{}\" contains undefined names or type errors", path.display())
            }
            Self::Include { failure } => write!(f, "unsuccessful %include directive\n{}", failure),
            Self::TypeClash { entries } => {
                write!(f, "TYPECLASH - the following type{} multiply named:", if entries.len() > 1 { "s are" } else { " is" })?;
                for entry in entries {
                    write!(
                        f,
                        "\n'{}' of file \"{}\", as: {}",
                        entry.canonical,
                        entry.file.display(),
                        entry.duplicates.join(",")
                    )?;
                }
                Ok(())
            }
            Self::TypeOrphan { entries } => {
                write!(f, "MISSING TYPENAME{}", if entries.len() > 1 { "S" } else { "" })?;
                for entry in entries {
                    write!(f, "\n'{}'", entry.type_name)?;
                    if let Some(file) = &entry.defined_in {
                        write!(f, " of file \"{}\"", file.display())?;
                    }
                    write!(
                        f,
                        ", needed by: {} (via \"{}\")",
                        entry.needed_by.join(","),
                        entry.via.display()
                    )?;
                }
                Ok(())
            }
            Self::IllegalExportFile { path, ambiguous } => write!(
                f,
                "illegal fileid \"{}\" in export list ({})",
                path.display(),
                if *ambiguous { "ambiguous" } else { "not %included in script" }
            ),
            Self::ExportUndefined { names } => {
                write!(f, "undefined name{} in export list: {}", plural(names), names.join(","))
            }
            Self::ExportRedundant { names } => {
                write!(f, "warning, export list has redundant embargo{}: {}", plural(names), names.join(","))
            }
            Self::ExportEmpty => write!(f, "warning, export list has void contents"),
            Self::ExportIncomplete { names } => write!(
                f,
                "warning, export list is incomplete - missing typename{}: {}",
                plural(names),
                names.join(",")
            ),
            Self::Abandoned { script } => write!(f, "compilation of \"{}\" abandoned", script.display()),
            Self::IncludeTooDeep { depth } => write!(f, "error occurs {} deep in %include files", depth),
            Self::CompilationInterrupted => write!(f, "<<compilation interrupted>>"),
            Self::Fault { message } => write!(f, "{}", message),
            Self::NotInScope { name } => write!(f, "identifier \"{}\" not in scope", name),
            Self::Io { message } => write!(f, "{}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub location: Option<SourceLocation>,
    pub suggestions: Vec<String>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            location: None,
            suggestions: Vec::new(),
        }
    }

    pub fn warning(kind: DiagnosticKind) -> Self {
        Self::new(kind).with_severity(Severity::Warning)
    }

    pub fn info(kind: DiagnosticKind) -> Self {
        Self::new(kind).with_severity(Severity::Info)
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.location) {
            (DiagnosticKind::Include { failure }, Some(location)) => {
                write!(f, "unsuccessful %include directive ({})\n{}", location, failure)?
            }
            (kind, Some(location)) => write!(f, "{} ({})", kind, location)?,
            (kind, None) => write!(f, "{}", kind)?,
        }
        for suggestion in &self.suggestions {
            write!(f, "\n  hint: {}", suggestion)?;
        }
        Ok(())
    }
}

/// Collects the diagnostics of a session, echoing them as they arrive
pub struct Reporter {
    diagnostics: Vec<Diagnostic>,
    echo: bool,
    max_diagnostics: usize,
}

impl Reporter {
    pub fn new(echo: bool) -> Self {
        Self {
            diagnostics: Vec::new(),
            echo,
            max_diagnostics: 1000,
        }
    }

    /// Reporter that keeps everything and prints nothing
    pub fn quiet() -> Self {
        Self::new(false)
    }

    pub fn report(&mut self, diagnostic: Diagnostic) {
        if self.echo {
            println!("{}", diagnostic);
        }
        if self.diagnostics.len() >= self.max_diagnostics {
            self.diagnostics.remove(0);
        }
        self.diagnostics.push(diagnostic);
    }

    /// Progress line such as "compiling x.m"; printed, never stored
    pub fn note(&self, message: impl fmt::Display) {
        if self.echo {
            println!("{}", message);
        }
    }

    pub fn echo(&self) -> bool {
        self.echo
    }

    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    /// Diagnostics matching a predicate on their kind
    pub fn matching<'a>(
        &'a self,
        pred: impl Fn(&DiagnosticKind) -> bool + 'a,
    ) -> impl Iterator<Item = &'a Diagnostic> + 'a {
        self.diagnostics.iter().filter(move |d| pred(&d.kind))
    }

    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    pub fn clear(&mut self) {
        self.diagnostics.clear();
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::quiet()
    }
}

/// Reason a compilation stopped before completing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Halt {
    /// The user interrupted; the caller must run recovery
    Cancelled,
    /// A nested compilation failed catastrophically
    Abandoned { script: PathBuf },
    /// Include nesting went past the configured limit
    CircularInclude { depth: usize },
}

impl Halt {
    pub fn abandoned(script: &Path) -> Self {
        Halt::Abandoned { script: script.to_path_buf() }
    }
}

impl fmt::Display for Halt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Halt::Cancelled => write!(f, "compilation interrupted"),
            Halt::Abandoned { script } => write!(f, "compilation of \"{}\" abandoned", script.display()),
            Halt::CircularInclude { depth } => write!(f, "%include nesting exceeds {} levels", depth),
        }
    }
}

impl std::error::Error for Halt {}

/// Compute Levenshtein distance for "did you mean" suggestions
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let a_len = a_chars.len();
    let b_len = b_chars.len();

    if a_len == 0 { return b_len; }
    if b_len == 0 { return a_len; }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut row = vec![0; b_len + 1];
    for i in 1..=a_len {
        row[0] = i;
        for j in 1..=b_len {
            let cost = if a_chars[i - 1] == b_chars[j - 1] { 0 } else { 1 };
            row[j] = (prev[j] + 1).min(row[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut row);
    }

    prev[b_len]
}

/// Find similar names for "did you mean" suggestions
pub fn find_similar_names<'a>(
    target: &str,
    candidates: impl IntoIterator<Item = &'a str>,
    max_distance: usize,
) -> Vec<String> {
    let mut results: Vec<(&str, usize)> = candidates
        .into_iter()
        .map(|c| (c, levenshtein_distance(target, c)))
        .filter(|(_, dist)| *dist <= max_distance && *dist > 0)
        .collect();

    results.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(b.0)));
    results.into_iter().map(|(name, _)| name.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_include_diagnostic_names_location() {
        let diag = Diagnostic::new(DiagnosticKind::Include {
            failure: IncludeFailure::MissingBindings { names: vec!["n".into()] },
        })
        .at(SourceLocation::new("/w/a.m", 3));

        assert_eq!(
            diag.to_string(),
            "unsuccessful %include directive (line 3 of \"/w/a.m\")\nmissing parameter binding: n"
        );
    }

    #[test]
    fn test_type_clash_display() {
        let kind = DiagnosticKind::TypeClash {
            entries: vec![TypeClashEntry {
                file: PathBuf::from("/w/d.m"),
                canonical: "tree".into(),
                duplicates: vec!["bush".into()],
            }],
        };
        assert_eq!(
            kind.to_string(),
            "TYPECLASH - the following type is multiply named:\n'tree' of file \"/w/d.m\", as: bush"
        );
    }

    #[test]
    fn test_reporter_counts_errors_only() {
        let mut reporter = Reporter::quiet();
        reporter.report(Diagnostic::warning(DiagnosticKind::ExportEmpty));
        assert!(!reporter.has_errors());
        reporter.report(Diagnostic::new(DiagnosticKind::NumberOutOfRange));
        assert_eq!(reporter.error_count(), 1);
        assert_eq!(reporter.matching(|k| matches!(k, DiagnosticKind::ExportEmpty)).count(), 1);
    }

    #[test]
    fn test_similar_names() {
        let names = ["tree", "trees", "free", "xyz"];
        assert_eq!(find_similar_names("tre", names, 2), vec!["tree", "free", "trees"]);
        assert_eq!(levenshtein_distance("", "abc"), 3);
    }
}
