//! Incremental compilation
//!
//! A [`Session`] decides per script whether its dump can be reused
//! ([`Session::consider`]), otherwise compiles it from source: parse, bind,
//! resolve includes in an isolated child, check, close the export list and
//! persist a new dump.

pub mod bind;
pub mod eval;
pub mod exports;
pub mod image;
pub mod include;
pub mod reload;
pub mod script;
pub mod session;

pub use bind::NameChecker;
pub use exports::ExportView;
pub use image::ScriptImage;
pub use include::Resolution;
pub use script::{absolute, modified_time, sorted_defs, FileIdentity, ScriptRecord, Timestamp};
pub use session::{BatchStatus, Checker, Environment, ResolverScratch, ScriptState, Session};

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::frontend::config::Config;
    use crate::frontend::syntax::IncludeDirective;
    use std::path::Path;

    pub fn session() -> Session {
        Session::new(Environment::new(Config::default()))
    }

    /// Parse `source` as the script at `path` and install its declarations
    pub fn bind_source(session: &mut Session, path: &str, source: &str) -> Vec<IncludeDirective> {
        let path = Path::new(path);
        let parsed = session.env.frontend.parse(path, source).unwrap();
        session.files.push(ScriptRecord::new(path, 0, true));
        session.bind_script(path, parsed).unwrap()
    }
}
