//! Attribute value combinations
//!
//! For a chosen set of elements, counts how often each tuple of values of a
//! chosen list of attributes occurs. Elements and attributes are matched by
//! qualified name. An attribute that is absent or empty contributes no value
//! to its tuple position.
//!
//! Per-file tables travel through the same batch workers as frequency trees
//! and are merged by summing the occurrences of identical tuples.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::analyzer::{self, ElementEvent};
use crate::error::AnalyzeError;
use crate::worker::{FailureKind, FileFailure, FileOutcome};

/// Which elements to inspect and which attributes to combine
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CombinationQuery {
    pub elements: Vec<String>,
    pub attributes: Vec<String>,
}

impl CombinationQuery {
    pub fn new(elements: Vec<String>, attributes: Vec<String>) -> Self {
        Self {
            elements,
            attributes,
        }
    }

    fn selects(&self, element: &ElementEvent) -> bool {
        self.elements.iter().any(|name| *name == element.name)
    }

    /// Value of each queried attribute, in query order
    fn values_of(&self, element: &ElementEvent) -> Vec<Option<String>> {
        self.attributes
            .iter()
            .map(|wanted| {
                element
                    .attributes
                    .iter()
                    .find(|attribute| attribute.name == *wanted)
                    .map(|attribute| attribute.value.clone())
                    .filter(|value| !value.is_empty())
            })
            .collect()
    }
}

type CombinationKey = (String, Vec<Option<String>>);

/// Occurrences of one element name with one tuple of attribute values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Combination {
    pub element: String,
    /// One entry per queried attribute; `None` when absent or empty
    pub values: Vec<Option<String>>,
    pub occurrences: u64,
}

/// Combination counts of one file
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CombinationTable {
    pub file_name: Option<PathBuf>,
    /// Distinct combinations ordered by element, then values
    pub combinations: Vec<Combination>,
}

impl CombinationTable {
    fn from_counts(file_name: Option<PathBuf>, counts: BTreeMap<CombinationKey, u64>) -> Self {
        let combinations = counts
            .into_iter()
            .map(|((element, values), occurrences)| Combination {
                element,
                values,
                occurrences,
            })
            .collect();
        Self {
            file_name,
            combinations,
        }
    }

    /// Occurrences of `element` with exactly these values
    pub fn occurrences(&self, element: &str, values: &[Option<&str>]) -> u64 {
        find_occurrences(&self.combinations, element, values)
    }
}

fn find_occurrences(combinations: &[Combination], element: &str, values: &[Option<&str>]) -> u64 {
    combinations
        .iter()
        .find(|c| {
            c.element == element
                && c.values.len() == values.len()
                && c.values.iter().zip(values).all(|(a, b)| a.as_deref() == *b)
        })
        .map_or(0, |c| c.occurrences)
}

/// Count the combinations of one document
pub fn count_document(
    text: &str,
    file_name: &Path,
    query: &CombinationQuery,
) -> Result<CombinationTable, AnalyzeError> {
    let mut counts: BTreeMap<CombinationKey, u64> = BTreeMap::new();
    analyzer::visit_document(text, file_name, |element| {
        if query.selects(&element) {
            let values = query.values_of(&element);
            *counts.entry((element.name, values)).or_insert(0) += 1;
        }
    })?;
    Ok(CombinationTable::from_counts(
        Some(file_name.to_path_buf()),
        counts,
    ))
}

/// Read one file and count its combinations
pub async fn count_file(
    path: &Path,
    query: &CombinationQuery,
) -> Result<CombinationTable, AnalyzeError> {
    let bytes = analyzer::read_file(path).await?;
    count_document(analyzer::document_text(&bytes, path)?, path, query)
}

/// Combination counts over a corpus together with the files that failed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CombinationStatistics {
    pub total_files: usize,
    pub analyzed_files: usize,
    /// Column names of the value tuples
    pub attributes: Vec<String>,
    /// Most frequent combinations first
    pub combinations: Vec<Combination>,
    pub failures: Vec<FileFailure>,
}

impl CombinationStatistics {
    pub fn failed_files(&self) -> usize {
        self.failures.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Number of selected elements over all analyzed files
    pub fn matched_elements(&self) -> u64 {
        self.combinations.iter().map(|c| c.occurrences).sum()
    }

    pub fn occurrences(&self, element: &str, values: &[Option<&str>]) -> u64 {
        find_occurrences(&self.combinations, element, values)
    }
}

/// Sum the per-file tables and collect the failure markers
///
/// A frequency tree among the outcomes is recorded as a worker failure.
pub fn merge_combination_outcomes<I>(
    outcomes: I,
    query: &CombinationQuery,
) -> CombinationStatistics
where
    I: IntoIterator<Item = FileOutcome>,
{
    let mut totals: BTreeMap<CombinationKey, u64> = BTreeMap::new();
    let mut statistics = CombinationStatistics {
        attributes: query.attributes.clone(),
        ..CombinationStatistics::default()
    };

    for outcome in outcomes {
        statistics.total_files += 1;
        match outcome {
            FileOutcome::Combinations(table) => {
                for combination in table.combinations {
                    *totals
                        .entry((combination.element, combination.values))
                        .or_insert(0) += combination.occurrences;
                }
                statistics.analyzed_files += 1;
            }
            FileOutcome::Analyzed(tree) => statistics.failures.push(FileFailure::new(
                tree.file_name.unwrap_or_default(),
                FailureKind::Worker,
                "frequency tree where combination counts were expected",
            )),
            FileOutcome::Failed(failure) => statistics.failures.push(failure),
        }
    }

    let mut combinations = CombinationTable::from_counts(None, totals).combinations;
    combinations.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
    statistics.combinations = combinations;
    statistics
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(elements: &[&str], attributes: &[&str]) -> CombinationQuery {
        CombinationQuery::new(
            elements.iter().map(|s| s.to_string()).collect(),
            attributes.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn table(name: &str, xml: &str, query: &CombinationQuery) -> CombinationTable {
        count_document(xml, Path::new(name), query).unwrap()
    }

    #[test]
    fn test_counts_value_tuples_of_selected_elements() {
        let query = query(&["book"], &["lang", "id"]);
        let table = table(
            "a.xml",
            r#"<lib lang="en">
    <book lang="en" id="1"/>
    <book lang="en" id="1"/>
    <book lang="fr"/>
    <book lang="" id="2"/>
    <shelf><book id="2"/></shelf>
</lib>"#,
            &query,
        );

        assert_eq!(table.file_name, Some(PathBuf::from("a.xml")));
        assert_eq!(table.occurrences("book", &[Some("en"), Some("1")]), 2);
        assert_eq!(table.occurrences("book", &[Some("fr"), None]), 1);
        assert_eq!(table.occurrences("book", &[None, Some("2")]), 2);
        assert_eq!(table.occurrences("lib", &[Some("en"), None]), 0);
        assert_eq!(table.combinations.len(), 3);
    }

    #[test]
    fn test_elements_and_attributes_match_qualified_names() {
        let query = query(&["x:item", "item"], &["x:kind"]);
        let table = table(
            "ns.xml",
            r#"<root xmlns:x="urn:x"><x:item x:kind="a"/><item kind="b"/><y:item xmlns:y="urn:x" y:kind="c"/></root>"#,
            &query,
        );

        assert_eq!(table.occurrences("x:item", &[Some("a")]), 1);
        assert_eq!(table.occurrences("item", &[None]), 1);
        assert_eq!(table.combinations.len(), 2);
    }

    #[test]
    fn test_malformed_document_is_a_parse_error() {
        let result = count_document("<a><b></a>", Path::new("bad.xml"), &query(&["a"], &["x"]));
        assert!(matches!(result, Err(AnalyzeError::Parse { .. })));
    }

    #[test]
    fn test_merge_sums_tables_and_ranks_by_occurrences() {
        let query = query(&["item"], &["n"]);
        let outcomes = vec![
            FileOutcome::Combinations(table(
                "a.xml",
                r#"<r><item n="1"/><item n="2"/></r>"#,
                &query,
            )),
            FileOutcome::Failed(FileFailure::new(
                PathBuf::from("b.xml"),
                FailureKind::Parse,
                "broken",
            )),
            FileOutcome::Combinations(table(
                "c.xml",
                r#"<r><item n="2"/><item/></r>"#,
                &query,
            )),
        ];

        let statistics = merge_combination_outcomes(outcomes, &query);

        assert_eq!(statistics.total_files, 3);
        assert_eq!(statistics.analyzed_files, 2);
        assert_eq!(statistics.attributes, vec!["n"]);
        assert_eq!(statistics.combinations[0].values, vec![Some("2".to_string())]);
        assert_eq!(statistics.combinations[0].occurrences, 2);
        assert_eq!(statistics.occurrences("item", &[Some("1")]), 1);
        assert_eq!(statistics.occurrences("item", &[None]), 1);
        assert_eq!(statistics.matched_elements(), 4);
        assert_eq!(statistics.failures[0].path, PathBuf::from("b.xml"));
    }

    #[test]
    fn test_frequency_tree_in_combination_run_is_a_failure() {
        let tree = crate::analyzer::analyze_document("<a/>", Path::new("a.xml")).unwrap();

        let statistics =
            merge_combination_outcomes([FileOutcome::Analyzed(tree)], &query(&["a"], &["x"]));

        assert_eq!(statistics.analyzed_files, 0);
        assert_eq!(statistics.failures[0].kind, FailureKind::Worker);
        assert_eq!(statistics.failures[0].path, PathBuf::from("a.xml"));
    }

    #[tokio::test]
    async fn test_count_file_reads_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("doc.xml");
        std::fs::write(&path, r#"<a k="v"/>"#).unwrap();

        let table = count_file(&path, &query(&["a"], &["k"])).await.unwrap();
        assert_eq!(table.occurrences("a", &[Some("v")]), 1);

        let missing = count_file(&dir.path().join("none.xml"), &query(&["a"], &["k"])).await;
        assert!(matches!(missing, Err(AnalyzeError::Read { .. })));
    }
}
