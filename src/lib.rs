//! # xml-stats Library
//!
//! Element, attribute and attribute-value frequency statistics over a corpus
//! of XML files. Files are split into batches, each batch is analyzed by a
//! short-lived worker, and the per-file trees are merged into one aggregate.
//! The same pipeline can count attribute value combinations instead.

pub mod analyzer;
pub mod cli;
pub mod combinations;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod file_source;
pub mod logging;
pub mod merger;
pub mod output;
pub mod tree;
pub mod worker;

pub use analyzer::{analyze_bytes, analyze_document, analyze_file, visit_document};
pub use cli::{Cli, Command, OutputFormat, VerbosityLevel};
pub use combinations::{
    Combination, CombinationQuery, CombinationStatistics, CombinationTable,
    merge_combination_outcomes,
};
pub use config::{Config, ConfigError, ConfigManager};
pub use dispatcher::{
    Batch, BatchDispatcher, BatchProgress, DispatchConfig, DispatchReport, ProgressCallback,
    partition,
};
pub use error::{AnalyzeError, StatsError};
pub use file_source::FileSource;
pub use merger::{CorpusStatistics, MergeTypeError, merge, merge_all, merge_outcomes};
pub use output::{Output, ReportOptions};
pub use tree::{Bucket, Frequency, FrequencyTree};
pub use worker::{
    AnalysisMode, BatchWorker, FailureKind, FileFailure, FileOutcome, ProcessSpawner,
    TaskSpawner, WorkerSpawner,
};
