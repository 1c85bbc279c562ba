//! What a frontend hands to the compiler
//!
//! The compiler never looks at source text. A [`Frontend`] turns a script
//! into a [`ParsedScript`]: definitions plus the directives that drive
//! inclusion and export.

use crate::errors::SourceLocation;
use smallvec::SmallVec;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSyntax {
    /// Named type applied to arguments; `num`, `char` and `bool` are primitive
    Name(String, Vec<TypeSyntax>),
    /// `*` is 1, `**` is 2, ...
    Var(u32),
    Arrow(Box<TypeSyntax>, Box<TypeSyntax>),
    List(Box<TypeSyntax>),
    Tuple(Vec<TypeSyntax>),
}

impl TypeSyntax {
    pub fn name(name: &str) -> Self {
        TypeSyntax::Name(name.to_string(), Vec::new())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprSyntax {
    Num(i64),
    Str(String),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefBody {
    /// `name :: type`
    Spec(TypeSyntax),
    /// `name = expr`
    Value(ExprSyntax),
    /// `type T * = C1 t | C2`
    Algebraic { arity: usize, constructors: Vec<(String, Vec<TypeSyntax>)> },
    /// `abstype T *`
    Abstract { arity: usize },
    /// `synonym S * = t`
    Synonym { arity: usize, body: TypeSyntax },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub name: String,
    pub line: usize,
    /// 0 for the script itself, `k` for `inserted[k - 1]`
    pub file: usize,
    pub body: DefBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreeKind {
    Value(TypeSyntax),
    Type { arity: usize },
}

/// A `%free` parameter awaiting a binding from each includer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeParam {
    pub name: String,
    pub line: usize,
    pub kind: FreeKind,
}

/// One item inside the braces of an `%include`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// `name = expr`
    Value { name: String, expr: ExprSyntax },
    /// `T * == type`
    Type { name: String, arity: usize, body: TypeSyntax },
    /// `new/old`
    Alias { new: String, old: String },
    /// `-old`
    Suppress(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective {
    /// Absolute path of the included script
    pub target: PathBuf,
    pub location: SourceLocation,
    pub bindings: SmallVec<[Binding; 4]>,
}

impl IncludeDirective {
    pub fn new(target: impl Into<PathBuf>, location: SourceLocation) -> Self {
        Self { target: target.into(), location, bindings: SmallVec::new() }
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.bindings.iter().filter_map(|b| match b {
            Binding::Alias { new, old } => Some((new.as_str(), old.as_str())),
            _ => None,
        })
    }

    pub fn suppressed(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().filter_map(|b| match b {
            Binding::Suppress(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn parameters(&self) -> impl Iterator<Item = &Binding> {
        self.bindings
            .iter()
            .filter(|b| matches!(b, Binding::Value { .. } | Binding::Type { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportItem {
    /// `+`: every definition of the script itself
    Own,
    /// `"file"`: every variable of an included file
    File(PathBuf),
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSpec {
    pub items: Vec<ExportItem>,
    /// `-name` entries
    pub embargoes: Vec<String>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedScript {
    /// Files pulled in textually by `%insert`, in order of appearance
    pub inserted: Vec<PathBuf>,
    pub definitions: Vec<Definition>,
    /// In declaration order
    pub includes: Vec<IncludeDirective>,
    pub exports: Option<ExportSpec>,
    pub free: Vec<FreeParam>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyntaxError {
    At { line: usize, message: String },
    NumberOutOfRange { line: usize },
    CannotInsert { line: usize, path: PathBuf },
}

impl SyntaxError {
    pub fn at(line: usize, message: impl Into<String>) -> Self {
        SyntaxError::At { line, message: message.into() }
    }

    pub fn line(&self) -> usize {
        match self {
            SyntaxError::At { line, .. }
            | SyntaxError::NumberOutOfRange { line }
            | SyntaxError::CannotInsert { line, .. } => *line,
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyntaxError::At { message, .. } => write!(f, "{}", message),
            SyntaxError::NumberOutOfRange { .. } => write!(f, "number out of range"),
            SyntaxError::CannotInsert { path, .. } => {
                write!(f, "cannot %insert \"{}\"", path.display())
            }
        }
    }
}

impl std::error::Error for SyntaxError {}

/// Turns script text into declarations
pub trait Frontend {
    fn parse(&self, path: &Path, source: &str) -> Result<ParsedScript, SyntaxError>;
}
