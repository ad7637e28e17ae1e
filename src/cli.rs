use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Verbosity levels for output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum VerbosityLevel {
    /// Only the summary and the failed files
    Quiet,
    /// Full report
    #[default]
    Normal,
    /// Full report with failure details and per-batch logging
    Verbose,
}

impl VerbosityLevel {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        if quiet {
            VerbosityLevel::Quiet
        } else if verbose {
            VerbosityLevel::Verbose
        } else {
            VerbosityLevel::Normal
        }
    }

    /// Command-line flag selecting this level, if it is not the default
    pub fn flag(self) -> Option<&'static str> {
        match self {
            VerbosityLevel::Quiet => Some("--quiet"),
            VerbosityLevel::Normal => None,
            VerbosityLevel::Verbose => Some("--verbose"),
        }
    }
}

/// Report output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Indented report for terminals
    #[default]
    Human,
    /// Aggregate statistics and failures as JSON
    Json,
}

/// Modes other than the default frequency report
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Count combinations of attribute values on selected elements
    Combinations(CombinationArgs),
}

#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct CombinationArgs {
    /// Elements to inspect, by qualified name
    #[arg(short = 'e', long = "elements", num_args = 1.., required = true, action = clap::ArgAction::Append)]
    pub elements: Vec<String>,

    /// Attributes whose values are combined, by qualified name
    #[arg(short = 'a', long = "attributes", num_args = 1.., required = true, action = clap::ArgAction::Append)]
    pub attributes: Vec<String>,
}

/// Element, attribute and value statistics over a corpus of XML files
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "xml-stats")]
#[command(about = "Count elements, attributes and attribute values across many XML files")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// XML files to analyze
    #[arg(value_name = "FILES")]
    pub paths: Vec<PathBuf>,

    /// More files to analyze
    #[arg(short = 'f', long = "files", num_args = 1.., action = clap::ArgAction::Append, global = true)]
    pub files: Vec<PathBuf>,

    /// Glob patterns selecting files to analyze
    #[arg(short = 'g', long = "glob", action = clap::ArgAction::Append, global = true)]
    pub globs: Vec<String>,

    /// Exclude file patterns (glob syntax)
    #[arg(long = "exclude", action = clap::ArgAction::Append, global = true)]
    pub exclude_patterns: Vec<String>,

    /// Sort elements by name instead of by number of occurrences
    #[arg(short = 'a', long = "alphabetical")]
    pub alphabetical: bool,

    /// List every attribute value
    #[arg(short = 'T', long = "no-truncate", conflicts_with = "truncate")]
    pub no_truncate: bool,

    /// Number of values listed per attribute
    #[arg(long = "truncate", value_name = "N")]
    pub truncate: Option<usize>,

    /// Attributes whose values are not listed
    #[arg(short = 'i', long = "hide", num_args = 1.., action = clap::ArgAction::Append)]
    pub hide: Vec<String>,

    /// Attributes left out of the report
    #[arg(short = 'I', long = "ignore", num_args = 1.., action = clap::ArgAction::Append)]
    pub ignore: Vec<String>,

    /// Do not list values for any attribute
    #[arg(long = "hide-all")]
    pub hide_all: bool,

    /// Leave all attributes out of the report
    #[arg(long = "ignore-all")]
    pub ignore_all: bool,

    /// Report format
    #[arg(long = "format", value_enum, global = true)]
    pub format: Option<OutputFormat>,

    /// Maximum number of files handed to one worker
    #[arg(short = 'b', long = "batch-size", global = true)]
    pub batch_size: Option<usize>,

    /// Seconds to wait for a worker to reply
    #[arg(long = "worker-timeout", value_name = "SECONDS", global = true)]
    pub worker_timeout: Option<u64>,

    /// Run workers as tasks inside this process instead of child processes
    #[arg(long = "in-process", global = true)]
    pub in_process: bool,

    /// Configuration file (TOML or JSON)
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Quiet mode (summary and failures only)
    #[arg(short = 'q', long = "quiet", conflicts_with = "verbose", global = true)]
    pub quiet: bool,

    /// Serve the worker protocol on stdin/stdout
    #[arg(long = "worker", hide = true)]
    pub worker: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Positional files followed by the ones given with `--files`
    pub fn all_files(&self) -> Vec<PathBuf> {
        self.paths.iter().chain(&self.files).cloned().collect()
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        VerbosityLevel::from_flags(self.verbose, self.quiet)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.worker {
            return Ok(());
        }
        if let Some(batch_size) = self.batch_size
            && batch_size == 0
        {
            return Err("Batch size must be greater than 0".to_string());
        }
        if let Some(timeout) = self.worker_timeout
            && timeout == 0
        {
            return Err("Worker timeout must be greater than 0".to_string());
        }
        if let Some(truncate) = self.truncate
            && truncate == 0
        {
            return Err("Truncate limit must be greater than 0".to_string());
        }
        Ok(())
    }
}
