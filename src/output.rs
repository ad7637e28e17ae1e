//! Report rendering
//!
//! Turns [`CorpusStatistics`] into a human-readable report or JSON. Ranking
//! and truncation of long value lists happen only here; the aggregate itself
//! is never trimmed. Combination counts are rendered as a table.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::cli::{OutputFormat, VerbosityLevel};
use crate::combinations::CombinationStatistics;
use crate::error::Result;
use crate::merger::CorpusStatistics;
use crate::tree::{Bucket, Frequency};
use crate::worker::FileFailure;

/// Default number of attribute values shown per attribute
pub const DEFAULT_TRUNCATE_VALUES: usize = 20;

const KEY_WIDTH: usize = 20;
const INDENT: &str = "  ";
const COLUMN_GAP: &str = "  ";
const MISSING_VALUE: &str = "-";

/// Options controlling what the report shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportOptions {
    /// Sort elements by name instead of by descending total
    pub alphabetical: bool,
    /// Maximum number of values listed per attribute; `None` lists all
    pub truncate_values: Option<usize>,
    /// Attributes whose values are not listed
    pub hidden_attributes: BTreeSet<String>,
    /// Attributes left out of the report entirely
    pub ignored_attributes: BTreeSet<String>,
    /// Hide the values of every attribute
    pub hide_all: bool,
    /// Leave out every attribute
    pub ignore_all: bool,
    pub format: OutputFormat,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            alphabetical: false,
            truncate_values: Some(DEFAULT_TRUNCATE_VALUES),
            hidden_attributes: BTreeSet::new(),
            ignored_attributes: BTreeSet::new(),
            hide_all: false,
            ignore_all: false,
            format: OutputFormat::Human,
        }
    }
}

impl ReportOptions {
    fn shows_attribute(&self, name: &str) -> bool {
        !self.ignore_all && !self.ignored_attributes.contains(name)
    }

    fn shows_values(&self, name: &str) -> bool {
        !self.hide_all && !self.hidden_attributes.contains(name)
    }
}

/// Values of one attribute, most frequent first, cut at the truncation cap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedValues<'a> {
    pub shown: Vec<(&'a str, u64)>,
    /// Number of distinct values cut off
    pub hidden_unique: usize,
    /// Occurrences of the values cut off
    pub hidden_occurrences: u64,
}

/// Rank the children of an attribute bucket by descending count
pub fn rank_values(attribute: &Bucket, cap: Option<usize>) -> RankedValues<'_> {
    let mut values: Vec<(&str, u64)> = attribute
        .children
        .iter()
        .map(|(value, frequency)| (value.as_str(), frequency.count()))
        .collect();
    values.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let cap = cap.unwrap_or(values.len()).min(values.len());
    let rest = values.split_off(cap);

    RankedValues {
        shown: values,
        hidden_unique: rest.len(),
        hidden_occurrences: rest.iter().map(|(_, count)| count).sum(),
    }
}

/// Share formatted the way the report shows it, rounded to two decimals
pub fn percentage(part: u64, whole: u64) -> String {
    if whole == 0 {
        return "0%".to_string();
    }
    let rounded = (part as f64 / whole as f64 * 10000.0).round() / 100.0;
    format!("{}%", rounded)
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    Ok(json)
}

/// Buckets sorted by descending total, ties broken by name
fn by_total(children: &std::collections::BTreeMap<String, Frequency>) -> Vec<(&str, &Bucket)> {
    let mut buckets: Vec<(&str, &Bucket)> = children
        .iter()
        .filter_map(|(name, f)| f.as_bucket().map(|b| (name.as_str(), b)))
        .collect();
    buckets.sort_by(|a, b| b.1.total.cmp(&a.1.total).then_with(|| a.0.cmp(b.0)));
    buckets
}

/// Report formatter for corpus statistics
pub struct Output {
    verbosity: VerbosityLevel,
    show_colors: bool,
    options: ReportOptions,
}

impl Output {
    pub fn new(verbosity: VerbosityLevel, options: ReportOptions) -> Self {
        Self {
            verbosity,
            show_colors: atty::is(atty::Stream::Stdout),
            options,
        }
    }

    pub fn with_colors(mut self, show_colors: bool) -> Self {
        self.show_colors = show_colors;
        self
    }

    fn colorize(&self, text: &str, color: &str) -> String {
        if self.show_colors {
            format!("\x1b[{}m{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    /// Render in the configured format
    pub fn render(&self, statistics: &CorpusStatistics) -> Result<String> {
        match self.options.format {
            OutputFormat::Human => Ok(self.format_statistics(statistics)),
            OutputFormat::Json => to_json(statistics),
        }
    }

    /// Render combination counts in the configured format
    pub fn render_combinations(&self, statistics: &CombinationStatistics) -> Result<String> {
        match self.options.format {
            OutputFormat::Human => Ok(self.format_combinations(statistics)),
            OutputFormat::Json => to_json(statistics),
        }
    }

    pub fn format_combinations(&self, statistics: &CombinationStatistics) -> String {
        let mut output = String::new();

        if self.verbosity > VerbosityLevel::Quiet {
            output.push_str(&self.format_table(statistics));
            output.push('\n');
        }
        output.push_str(&self.property(
            0,
            &statistics.combinations.len().to_string(),
            "unique combinations",
        ));
        output.push_str(&self.property(
            0,
            &statistics.matched_elements().to_string(),
            "matching elements",
        ));
        output.push_str(&self.format_file_counts(
            statistics.analyzed_files,
            statistics.total_files,
            &statistics.failures,
        ));
        if statistics.has_failures() {
            output.push('\n');
            output.push_str(&self.format_failures(&statistics.failures));
        }

        output
    }

    /// Columns: element, occurrences, then one per attribute
    fn format_table(&self, statistics: &CombinationStatistics) -> String {
        let mut header = vec!["Element".to_string(), "#".to_string()];
        header.extend(statistics.attributes.iter().cloned());

        let rows: Vec<Vec<String>> = statistics
            .combinations
            .iter()
            .map(|combination| {
                let mut row = vec![
                    combination.element.clone(),
                    combination.occurrences.to_string(),
                ];
                row.extend(
                    combination
                        .values
                        .iter()
                        .map(|value| value.as_deref().unwrap_or(MISSING_VALUE).to_string()),
                );
                row
            })
            .collect();

        let mut widths: Vec<usize> = header.iter().map(|cell| cell.chars().count()).collect();
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let line = |cells: &[String]| {
            let padded: Vec<String> = cells
                .iter()
                .zip(&widths)
                .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
                .collect();
            format!("{}\n", padded.join(COLUMN_GAP).trim_end())
        };

        let mut output = self.colorize(line(&header).trim_end(), "1");
        output.push('\n');
        for row in &rows {
            output.push_str(&line(row));
        }
        output
    }

    pub fn format_statistics(&self, statistics: &CorpusStatistics) -> String {
        let mut output = String::new();

        if self.verbosity > VerbosityLevel::Quiet {
            output.push_str(&self.format_elements(statistics));
            output.push('\n');
        }
        output.push_str(&self.format_summary(statistics));
        if statistics.has_failures() {
            output.push('\n');
            output.push_str(&self.format_failures(&statistics.failures));
        }

        output
    }

    fn property(&self, depth: usize, key: &str, name: &str) -> String {
        format!("{}{:<width$} {}\n", INDENT.repeat(depth), key, name, width = KEY_WIDTH)
    }

    fn format_elements(&self, statistics: &CorpusStatistics) -> String {
        let aggregate = &statistics.aggregate;
        let mut elements = by_total(&aggregate.elements);
        if self.options.alphabetical {
            elements.sort_by(|a, b| a.0.cmp(b.0));
        }

        let mut output = String::new();
        for (name, element) in elements {
            output.push_str(&self.property(
                0,
                &format!(
                    "{} occs, {}",
                    element.total,
                    percentage(element.total, aggregate.total_elements)
                ),
                &self.colorize(name, "36"),
            ));

            for (attribute_name, attribute) in by_total(&element.children) {
                if !self.options.shows_attribute(attribute_name) {
                    continue;
                }
                output.push_str(&self.property(
                    1,
                    &format!(
                        "{} occs, {}",
                        attribute.total,
                        percentage(attribute.total, element.total)
                    ),
                    &format!("@{}", attribute_name),
                ));

                if !self.options.shows_values(attribute_name) {
                    continue;
                }
                output.push_str(&self.format_values(attribute));
            }
        }
        output
    }

    fn format_values(&self, attribute: &Bucket) -> String {
        let ranked = rank_values(attribute, self.options.truncate_values);

        let mut output = String::new();
        for (value, count) in &ranked.shown {
            output.push_str(&self.property(
                2,
                &format!("{} occs, {}", count, percentage(*count, attribute.total)),
                &format!("\"{}\"", value),
            ));
        }
        if ranked.hidden_unique > 0 {
            output.push_str(&format!(
                "{}...and {} unique others over {} occurrences\n",
                INDENT.repeat(2),
                ranked.hidden_unique,
                ranked.hidden_occurrences
            ));
        }
        output
    }

    fn format_summary(&self, statistics: &CorpusStatistics) -> String {
        let aggregate = &statistics.aggregate;
        let mut output = String::new();
        output.push_str(&self.property(0, &aggregate.total_elements.to_string(), "total elements"));
        output.push_str(&self.property(
            0,
            &aggregate.unique_elements().to_string(),
            "total unique elements",
        ));
        output.push_str(&self.property(
            0,
            &aggregate.total_attributes.to_string(),
            "total attributes",
        ));
        output.push_str(&self.format_file_counts(
            statistics.analyzed_files,
            statistics.total_files,
            &statistics.failures,
        ));
        output
    }

    fn format_file_counts(
        &self,
        analyzed: usize,
        total: usize,
        failures: &[FileFailure],
    ) -> String {
        let mut output = self.property(0, &format!("{} of {}", analyzed, total), "files analyzed");
        if !failures.is_empty() {
            output.push_str(&self.property(
                0,
                &failures.len().to_string(),
                &self.colorize("files failed", "31"),
            ));
        }
        output
    }

    fn format_failures(&self, failures: &[FileFailure]) -> String {
        let mut output = String::new();
        output.push_str(&self.colorize("Failed files:", "33"));
        output.push('\n');
        for failure in failures {
            output.push_str(&format!(
                "{}{} ({})\n",
                INDENT,
                failure.path.display(),
                failure.kind
            ));
            if self.verbosity >= VerbosityLevel::Verbose {
                output.push_str(&format!("{}{}\n", INDENT.repeat(2), failure.message));
            }
        }
        output
    }
}
