#[cfg(not(unix))]
compile_error!("scriptc needs fork, waitpid and POSIX signals");

// Core modules
pub mod compiler;
pub mod core;
pub mod errors;
pub mod frontend;
pub mod infrastructure;

// Re-export commonly used items
pub use compiler::{Checker, Environment, ExportView, NameChecker, ScriptImage, ScriptRecord, ScriptState, Session};
pub use core::{IdentId, SymbolTable};
pub use errors::{Diagnostic, DiagnosticKind, Halt, IncludeFailure, Reporter, SourceLocation};
pub use frontend::{cli_main, Config, DeclParser, Frontend, ParsedScript, SyntaxError};
pub use infrastructure::{init_logging, Interrupts, SessionMetrics};
