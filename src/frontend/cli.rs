use crate::compiler::script::absolute;
use crate::compiler::{Environment, Session};
use crate::core::symbols::IdKind;
use crate::frontend::config::Config;
use crate::frontend::repl::Repl;
use crate::infrastructure::interrupt::install_handlers;
use crate::infrastructure::logging::init_logging;
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const USAGE: &str = "Usage: scriptc [OPTIONS] [script]...\n\nOptions:\n  \
     --make          Bring each script's dump up to date\n  \
     --exports       List what each script exports\n  \
     --json          With --exports, print JSON\n  \
     --sources       List the files each script depends on\n  \
     --config FILE   Read settings from FILE instead of .scriptrc\n  \
     --metrics       Print counters and timings on exit\n\n\
     Without a batch option, starts an interactive session on the first script.";

const LISTING_WIDTH: usize = 78;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Interactive,
    Make,
    Exports { json: bool },
    Sources,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliConfig {
    pub mode: Mode,
    pub scripts: Vec<PathBuf>,
    pub config_path: Option<PathBuf>,
    pub metrics: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Interactive,
            scripts: Vec::new(),
            config_path: None,
            metrics: false,
        }
    }
}

pub struct Cli {
    config: CliConfig,
    env: Environment,
}

impl Cli {
    pub fn new(config: CliConfig, env: Environment) -> Self {
        Self { config, env }
    }

    pub fn run(&self) -> Result<i32, String> {
        let mut stdout = io::stdout();
        let code = self.run_with(&mut stdout).map_err(|e| format!("cannot write output: {}", e))?;
        if self.config.metrics {
            eprintln!("{}", self.env.metrics.summary().report());
        }
        Ok(code)
    }

    /// Run the selected mode, writing listings to `out`
    pub fn run_with(&self, out: &mut dyn Write) -> io::Result<i32> {
        let scripts = expand_scripts(&self.config.scripts);
        match self.config.mode {
            Mode::Interactive => {
                let mut repl = Repl::new(Session::new(self.env.clone()));
                if let Some(script) = scripts.first() {
                    repl.switch_to(script, out)?;
                }
                let stdin = io::stdin();
                repl.run(&mut stdin.lock(), out)?;
                Ok(0)
            }
            Mode::Make => self.make(&scripts, out),
            Mode::Exports { json } => self.exports(&scripts, json, out),
            Mode::Sources => self.sources(&scripts, out),
        }
    }

    fn batch_session(&self) -> Session {
        Session::new(self.env.clone()).with_batch_mode(true)
    }

    fn make(&self, scripts: &[PathBuf], out: &mut dyn Write) -> io::Result<i32> {
        let mut failed = Vec::new();
        for script in scripts {
            if self.env.interrupts.terminate_requested() {
                break;
            }
            let mut session = self.batch_session();
            let state = session.load(script);
            debug!(script = %script.display(), ?state, "made");
            failed.extend(session.batch().failed().iter().cloned());
        }
        failed.dedup();

        if failed.is_empty() {
            info!(scripts = scripts.len(), "all dumps up to date");
            return Ok(0);
        }
        writeln!(out, "errors or undefined names found in:")?;
        let names: Vec<String> = failed.iter().map(|p| p.display().to_string()).collect();
        writeln!(out, "{}", columns(&names, LISTING_WIDTH))?;
        Ok(1)
    }

    fn exports(&self, scripts: &[PathBuf], json: bool, out: &mut dyn Write) -> io::Result<i32> {
        let mut code = 0;
        let mut listings = Vec::new();
        for script in scripts {
            if self.env.interrupts.terminate_requested() {
                break;
            }
            let mut session = self.batch_session();
            if session.load(script).is_failure() {
                code = 1;
                continue;
            }
            let listing = ExportListing::of(&session, script);
            if json {
                listings.push(listing);
            } else {
                writeln!(out, "{}:", listing.script)?;
                let names: Vec<String> = listing.exports.into_iter().map(|e| e.name).collect();
                if !names.is_empty() {
                    writeln!(out, "{}", columns(&names, LISTING_WIDTH))?;
                }
            }
        }
        if json {
            match serde_json::to_string_pretty(&listings) {
                Ok(text) => writeln!(out, "{}", text)?,
                Err(e) => {
                    warn!("cannot serialise export listing: {}", e);
                    code = 1;
                }
            }
        }
        Ok(code)
    }

    fn sources(&self, scripts: &[PathBuf], out: &mut dyn Write) -> io::Result<i32> {
        let mut code = 0;
        for script in scripts {
            if self.env.interrupts.terminate_requested() {
                break;
            }
            let mut session = self.batch_session();
            if session.load(script).is_failure() {
                code = 1;
            }
            for record in session.sources() {
                writeln!(out, "{}", record.path.display())?;
            }
        }
        Ok(code)
    }
}

/// One script's exports, as `--exports --json` prints them
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExportListing {
    pub script: String,
    pub exports: Vec<ExportEntry>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExportEntry {
    pub name: String,
    pub kind: &'static str,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
}

impl ExportListing {
    pub fn of(session: &Session, script: &Path) -> Self {
        let symbols = session.symbols();
        let exports = session
            .exported()
            .into_iter()
            .map(|id| {
                let ident = symbols.get(symbols.resolve(id));
                let (kind, ty) = match &ident.kind {
                    IdKind::Type(def) => (def.describe(), None),
                    IdKind::Value(ty) if ident.is_constructor() => ("constructor", Some(symbols.display_type(ty))),
                    IdKind::Value(ty) => ("value", Some(symbols.display_type(ty))),
                    IdKind::Wrong | IdKind::Undef => ("value", None),
                };
                ExportEntry { name: symbols.name(id).to_string(), kind, ty }
            })
            .collect();
        Self { script: absolute(script).display().to_string(), exports }
    }
}

/// Lay names out left to right in as many columns as fit in `width`
pub fn columns(names: &[String], width: usize) -> String {
    let cell = names.iter().map(|n| n.len()).max().unwrap_or(0) + 2;
    let per_row = (width / cell).max(1);
    names
        .chunks(per_row)
        .map(|row| {
            row.iter()
                .map(|name| format!("{:<cell$}", name, cell = cell))
                .collect::<String>()
                .trim_end()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Expand glob patterns; a pattern matching nothing is kept as written so
/// that a new script can still be named
pub fn expand_scripts(patterns: &[PathBuf]) -> Vec<PathBuf> {
    let mut scripts = Vec::new();
    for pattern in patterns {
        let text = pattern.to_string_lossy();
        let matches: Vec<PathBuf> = match glob::glob(&text) {
            Ok(paths) => paths
                .filter_map(|entry| match entry {
                    Ok(path) => Some(path),
                    Err(e) => {
                        warn!("cannot access path: {}", e);
                        None
                    }
                })
                .collect(),
            Err(e) => {
                debug!(pattern = %text, "not a glob pattern: {}", e);
                Vec::new()
            }
        };
        if matches.is_empty() {
            scripts.push(pattern.clone());
        } else {
            scripts.extend(matches);
        }
    }
    scripts
}

pub fn parse_args(args: &[String]) -> Result<CliConfig, String> {
    let mut config = CliConfig::default();
    let mut json = false;
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--make" => config.mode = Mode::Make,
            "--exports" => config.mode = Mode::Exports { json: false },
            "--sources" => config.mode = Mode::Sources,
            "--json" => json = true,
            "--metrics" => config.metrics = true,
            "--config" => {
                i += 1;
                let path = args.get(i).ok_or_else(|| "--config requires an argument".to_string())?;
                config.config_path = Some(PathBuf::from(path));
            }
            "-h" | "--help" => return Err(USAGE.to_string()),
            arg if arg.starts_with("--") => {
                return Err(format!("Unknown option: {}\n\n{}", arg, USAGE));
            }
            path => config.scripts.push(PathBuf::from(path)),
        }
        i += 1;
    }

    match config.mode {
        Mode::Exports { .. } => config.mode = Mode::Exports { json },
        _ if json => return Err("--json only applies to --exports".to_string()),
        _ => {}
    }
    if config.mode != Mode::Interactive && config.scripts.is_empty() {
        return Err(format!("No scripts specified\n\n{}", USAGE));
    }
    Ok(config)
}

/// Entry point for CLI binary
pub fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let cli_config = parse_args(&args)?;

    let settings = match &cli_config.config_path {
        Some(path) => {
            let mut settings = Config::load(path)?;
            settings.apply_env(|key| std::env::var(key).ok());
            settings
        }
        None => Config::discover(),
    };
    let guard = init_logging(settings.log_config());

    let env = Environment::new(settings).with_echo(true);
    install_handlers(&env.interrupts)?;

    let code = Cli::new(cli_config, env).run()?;
    drop(guard);
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("scriptc").chain(list.iter().copied()).map(String::from).collect()
    }

    fn cli(mode: Mode, scripts: Vec<PathBuf>) -> Cli {
        let config = CliConfig { mode, scripts, ..CliConfig::default() };
        Cli::new(config, Environment::new(Config::default()))
    }

    #[test]
    fn test_parse_args_modes() {
        let config = parse_args(&args(&["--exports", "--json", "a.m"])).unwrap();
        assert_eq!(config.mode, Mode::Exports { json: true });
        assert_eq!(config.scripts, vec![PathBuf::from("a.m")]);

        assert_eq!(parse_args(&args(&[])).unwrap().mode, Mode::Interactive);
        assert!(parse_args(&args(&["--make"])).is_err());
        assert!(parse_args(&args(&["--make", "--json", "a.m"])).is_err());
        assert!(parse_args(&args(&["--bogus"])).unwrap_err().starts_with("Unknown option"));
        assert!(parse_args(&args(&["--config"])).is_err());
    }

    #[test]
    fn test_columns() {
        let names: Vec<String> = ["a", "bb", "c"].iter().map(|s| s.to_string()).collect();
        assert_eq!(columns(&names, 8), "a   bb\nc");
        assert_eq!(columns(&names, 1), "a\nbb\nc");
        assert_eq!(columns(&[], 80), "");
    }

    #[test]
    fn test_expand_scripts_keeps_unmatched() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.m"), "").unwrap();
        fs::write(dir.path().join("b.m"), "").unwrap();

        let pattern = dir.path().join("*.m");
        let missing = dir.path().join("new.m");
        let scripts = expand_scripts(&[pattern, missing.clone()]);
        assert_eq!(scripts, vec![dir.path().join("a.m"), dir.path().join("b.m"), missing]);
    }

    #[test]
    fn test_make_lists_failures() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.m");
        let bad = dir.path().join("bad.m");
        fs::write(&good, "a = 1\n").unwrap();
        fs::write(&bad, "b = nowhere\n").unwrap();

        let mut out = Vec::new();
        let code = cli(Mode::Make, vec![good.clone(), bad.clone()]).run_with(&mut out).unwrap();
        assert_eq!(code, 1);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("errors or undefined names found in:\n"));
        assert!(text.contains(&bad.display().to_string()));
        assert!(!text.contains(&good.display().to_string()));
        assert!(dir.path().join("good.x").exists());
    }

    #[test]
    fn test_exports_json() {
        let dir = TempDir::new().unwrap();
        let script = dir.path().join("lib.m");
        fs::write(&script, "%export size shape\ntype shape = Dot\nsize :: num\nsize = 1\nhidden = 2\n").unwrap();

        let mut out = Vec::new();
        let code = cli(Mode::Exports { json: true }, vec![script]).run_with(&mut out).unwrap();
        assert_eq!(code, 0);

        let listings: serde_json::Value = serde_json::from_slice(&out).unwrap();
        let names: Vec<&str> = listings[0]["exports"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["shape", "size", "Dot"]);
        assert_eq!(listings[0]["exports"][1]["type"], "num");
        assert_eq!(listings[0]["exports"][2]["kind"], "constructor");
    }

    #[test]
    fn test_sources_lists_includes() {
        let dir = TempDir::new().unwrap();
        let lib = dir.path().join("lib.m");
        let main = dir.path().join("main.m");
        fs::write(&lib, "one = 1\n").unwrap();
        fs::write(&main, "%include \"lib\"\ntwo = one\n").unwrap();

        let mut out = Vec::new();
        let code = cli(Mode::Sources, vec![main.clone()]).run_with(&mut out).unwrap();
        assert_eq!(code, 0);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, format!("{}\n{}\n", main.display(), lib.display()));
    }
}
