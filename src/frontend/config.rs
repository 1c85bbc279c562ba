use crate::infrastructure::logging::{LogConfig, LogFormat, LogOutput};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing::Level;

const CONFIG_NAMES: [&str; 2] = [".scriptrc", ".scriptrc.toml"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub compile: CompileConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub repl: ReplConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileConfig {
    /// Extension of scripts that get dumps
    #[serde(default = "default_source_extension")]
    pub source_extension: String,

    /// Extension replacing it for the dump file
    #[serde(default = "default_dump_extension")]
    pub dump_extension: String,

    /// Deepest allowed %include nesting before compilation is abandoned
    #[serde(default = "default_max_include_depth")]
    pub max_include_depth: usize,

    /// Reload the current script whenever one of its sources changes
    #[serde(default = "default_false")]
    pub rechecking: bool,

    /// Report progress ("compiling ...") and load results
    #[serde(default = "default_verbosity")]
    pub verbosity: bool,

    /// Print the script's definitions after compiling it
    #[serde(default = "default_false")]
    pub listing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,

    #[serde(default = "default_format")]
    pub format: String,

    /// "stderr", "stdout" or "file"
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default)]
    pub directory: Option<PathBuf>,

    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplConfig {
    #[serde(default = "default_prompt")]
    pub prompt: String,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            source_extension: default_source_extension(),
            dump_extension: default_dump_extension(),
            max_include_depth: default_max_include_depth(),
            rechecking: false,
            verbosity: default_verbosity(),
            listing: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
            output: default_output(),
            directory: None,
            filter: None,
        }
    }
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self { prompt: default_prompt() }
    }
}

fn default_false() -> bool { false }
fn default_source_extension() -> String { "m".to_string() }
fn default_dump_extension() -> String { "x".to_string() }
fn default_max_include_depth() -> usize { 8 }
fn default_verbosity() -> bool { std::io::stdin().is_terminal() }
fn default_level() -> String { "warn".to_string() }
fn default_format() -> String { "compact".to_string() }
fn default_output() -> String { "stderr".to_string() }
fn default_prompt() -> String { "scriptc> ".to_string() }

impl Config {
    /// Load configuration from a .scriptrc file
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config: {}", e))?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML string
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content)
            .map_err(|e| format!("Failed to parse config: {}", e))
    }

    /// Find and load configuration from the current directory or its parents,
    /// then apply environment overrides
    pub fn discover() -> Self {
        let mut current = std::env::current_dir().ok();
        let mut found = None;

        'search: while let Some(dir) = current {
            for name in CONFIG_NAMES {
                let config_path = dir.join(name);
                if config_path.exists() {
                    match Self::load(&config_path) {
                        Ok(config) => {
                            found = Some(config);
                            break 'search;
                        }
                        Err(e) => tracing::warn!(path = %config_path.display(), "{}", e),
                    }
                }
            }
            current = dir.parent().map(|p| p.to_path_buf());
        }

        let mut config = found.unwrap_or_default();
        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    /// Apply `SCRIPTC_PROMPT` and `SCRIPTC_RECHECK`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(prompt) = lookup("SCRIPTC_PROMPT") {
            self.repl.prompt = prompt;
        }
        if let Some(recheck) = lookup("SCRIPTC_RECHECK") {
            self.compile.rechecking = !matches!(recheck.as_str(), "" | "0" | "false" | "no");
        }
    }

    /// Translate the `[logging]` section for `init_logging`
    pub fn log_config(&self) -> LogConfig {
        let level = self.logging.level.parse::<Level>().unwrap_or(Level::WARN);
        let format = LogFormat::parse(&self.logging.format).unwrap_or(LogFormat::Compact);
        let output = match self.logging.output.as_str() {
            "stdout" => LogOutput::Stdout,
            "file" => LogOutput::File {
                directory: self
                    .logging
                    .directory
                    .clone()
                    .unwrap_or_else(std::env::temp_dir)
                    .to_string_lossy()
                    .to_string(),
                prefix: "scriptc".to_string(),
            },
            _ => LogOutput::Stderr,
        };

        let mut config = LogConfig::new().with_level(level).with_format(format).with_output(output);
        if let Some(filter) = &self.logging.filter {
            config = config.with_filter(filter.clone());
        }
        config
    }

    /// Generate default configuration file content
    pub fn generate_default() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate config"))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        fs::write(path, content)
            .map_err(|e| format!("Failed to write config: {}", e))
    }
}
