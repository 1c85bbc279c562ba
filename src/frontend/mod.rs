//! Frontend components
//!
//! The reference declaration parser, configuration, the batch command line
//! and the interactive loop.

pub mod cli;
pub mod config;
pub mod parser;
pub mod repl;
pub mod syntax;

pub use cli::main as cli_main;
pub use config::Config;
pub use parser::DeclParser;
pub use repl::Repl;
pub use syntax::{Frontend, ParsedScript, SyntaxError};
