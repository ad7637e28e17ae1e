//! Statistics merger
//!
//! Folds per-file frequency trees into one aggregate. Counts are only ever
//! added, so the result does not depend on the order in which trees arrive.
//! A name that is a leaf on one side and a bucket on the other means the
//! trees describe the corpus inconsistently; that is reported as a
//! [`MergeTypeError`] instead of being coerced.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tree::{Frequency, FrequencyTree};
use crate::worker::{FailureKind, FileFailure, FileOutcome};

/// Shape mismatch between the aggregate and an incoming tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Type mismatch for key \"{path}\": {incoming} to {existing}")]
pub struct MergeTypeError {
    /// Key path from the root, joined with '/'
    pub path: String,
    /// Shape already present in the aggregate
    pub existing: &'static str,
    /// Shape of the incoming value
    pub incoming: &'static str,
}

/// Fold one tree into the aggregate
///
/// The tree's file name is dropped: aggregates have no per-file identity.
/// On error the aggregate may be partially updated and must be discarded.
pub fn merge(aggregate: &mut FrequencyTree, tree: FrequencyTree) -> Result<(), MergeTypeError> {
    aggregate.total_elements += tree.total_elements;
    aggregate.total_attributes += tree.total_attributes;
    merge_children(&mut aggregate.elements, tree.elements, &mut Vec::new())
}

/// Fold all trees, starting from an empty aggregate
pub fn merge_all<I>(trees: I) -> Result<FrequencyTree, MergeTypeError>
where
    I: IntoIterator<Item = FrequencyTree>,
{
    let mut aggregate = FrequencyTree::default();
    for tree in trees {
        merge(&mut aggregate, tree)?;
    }
    Ok(aggregate)
}

fn merge_children(
    destination: &mut BTreeMap<String, Frequency>,
    incoming: BTreeMap<String, Frequency>,
    path: &mut Vec<String>,
) -> Result<(), MergeTypeError> {
    for (key, value) in incoming {
        match destination.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
            Entry::Occupied(mut slot) => {
                path.push(slot.key().clone());
                match (slot.get_mut(), value) {
                    (Frequency::Leaf(existing), Frequency::Leaf(count)) => *existing += count,
                    (Frequency::Node(existing), Frequency::Node(bucket)) => {
                        existing.total += bucket.total;
                        merge_children(&mut existing.children, bucket.children, path)?;
                    }
                    (existing, value) => {
                        return Err(MergeTypeError {
                            path: path.join("/"),
                            existing: existing.kind(),
                            incoming: value.kind(),
                        });
                    }
                }
                path.pop();
            }
        }
    }
    Ok(())
}

/// Aggregate statistics over a corpus together with the files that failed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorpusStatistics {
    /// Number of input files, analyzed or not
    pub total_files: usize,
    /// Number of files whose tree was merged
    pub analyzed_files: usize,
    /// Merged counts of the analyzed files
    pub aggregate: FrequencyTree,
    /// One entry per file that did not contribute, in input order
    pub failures: Vec<FileFailure>,
}

impl CorpusStatistics {
    pub fn failed_files(&self) -> usize {
        self.failures.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// Merge the analyzed outcomes and collect the failure markers
///
/// Combination counts among the outcomes are recorded as worker failures.
pub fn merge_outcomes<I>(outcomes: I) -> Result<CorpusStatistics, MergeTypeError>
where
    I: IntoIterator<Item = FileOutcome>,
{
    let mut statistics = CorpusStatistics::default();
    for outcome in outcomes {
        statistics.total_files += 1;
        match outcome {
            FileOutcome::Analyzed(tree) => {
                merge(&mut statistics.aggregate, tree)?;
                statistics.analyzed_files += 1;
            }
            FileOutcome::Combinations(table) => statistics.failures.push(FileFailure::new(
                table.file_name.unwrap_or_default(),
                FailureKind::Worker,
                "combination counts where a frequency tree was expected",
            )),
            FileOutcome::Failed(failure) => statistics.failures.push(failure),
        }
    }
    Ok(statistics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze_document;
    use crate::tree::Bucket;
    use crate::worker::FailureKind;
    use std::path::{Path, PathBuf};

    fn tree(name: &str, xml: &str) -> FrequencyTree {
        analyze_document(xml, Path::new(name)).unwrap()
    }

    #[test]
    fn test_merge_into_empty_is_identity() {
        let input = tree("a.xml", r#"<root><item n="1"/><item n="2"/></root>"#);

        let merged = merge_all([input.clone()]).unwrap();

        assert_eq!(merged, input.without_file_name());
    }

    #[test]
    fn test_merging_twice_doubles_counts() {
        let input = tree("a.xml", r#"<root><item n="1"/><item n="1"/></root>"#);

        let merged = merge_all([input.clone(), input]).unwrap();

        assert_eq!(merged.total_elements, 6);
        assert_eq!(merged.total_attributes, 4);
        assert_eq!(merged.element("root").unwrap().total, 2);
        assert_eq!(merged.element("item").unwrap().total, 4);
        assert_eq!(merged.attribute("item", "n").unwrap().total, 4);
        assert_eq!(merged.value_count("item", "n", "1"), 4);
        assert!(merged.attribute_totals_consistent());
    }

    #[test]
    fn test_disjoint_keys_are_copied() {
        let a = tree("a.xml", r#"<a x="1"/>"#);
        let b = tree("b.xml", r#"<b y="2"/>"#);

        let merged = merge_all([a, b]).unwrap();

        assert_eq!(merged.unique_elements(), 2);
        assert_eq!(merged.value_count("a", "x", "1"), 1);
        assert_eq!(merged.value_count("b", "y", "2"), 1);
        assert!(merged.file_name.is_none());
    }

    #[test]
    fn test_merge_is_order_independent() {
        let trees = vec![
            tree("a.xml", r#"<r><p k="x"/></r>"#),
            tree("b.xml", r#"<r><p k="y"/><q/></r>"#),
            tree("c.xml", r#"<p k="x" l="z"/>"#),
        ];
        let mut reversed = trees.clone();
        reversed.reverse();

        assert_eq!(merge_all(trees).unwrap(), merge_all(reversed).unwrap());
    }

    #[test]
    fn test_shape_mismatch_is_an_error() {
        let good = tree("a.xml", r#"<book id="1"/>"#);

        let mut bad = FrequencyTree::for_file("b.xml");
        bad.total_elements = 1;
        bad.elements.insert(
            "book".to_string(),
            Frequency::Node(Bucket {
                total: 1,
                children: BTreeMap::from([("id".to_string(), Frequency::Leaf(1))]),
            }),
        );

        let err = merge_all([good, bad]).unwrap_err();
        assert_eq!(err.path, "book/id");
        assert_eq!(err.existing, "node");
        assert_eq!(err.incoming, "leaf");
        assert!(err.to_string().contains("Type mismatch"));
    }

    #[test]
    fn test_merge_outcomes_skips_failures() {
        let outcomes = vec![
            FileOutcome::Analyzed(tree("a.xml", r#"<book id="1"/>"#)),
            FileOutcome::Failed(FileFailure::new(
                PathBuf::from("c.xml"),
                FailureKind::Parse,
                "unexpected end of document",
            )),
            FileOutcome::Analyzed(tree("b.xml", r#"<book id="2"/>"#)),
        ];

        let statistics = merge_outcomes(outcomes).unwrap();

        assert_eq!(statistics.total_files, 3);
        assert_eq!(statistics.analyzed_files, 2);
        assert_eq!(statistics.failed_files(), 1);
        assert_eq!(statistics.failures[0].path, PathBuf::from("c.xml"));
        assert_eq!(statistics.aggregate.element("book").unwrap().total, 2);
        assert_eq!(statistics.aggregate.attribute("book", "id").unwrap().total, 2);
        assert_eq!(statistics.aggregate.value_count("book", "id", "1"), 1);
        assert_eq!(statistics.aggregate.value_count("book", "id", "2"), 1);
    }

    #[test]
    fn test_combination_counts_in_frequency_run_are_failures() {
        let table = crate::combinations::CombinationTable {
            file_name: Some(PathBuf::from("d.xml")),
            combinations: Vec::new(),
        };

        let statistics = merge_outcomes([
            FileOutcome::Analyzed(tree("a.xml", "<a/>")),
            FileOutcome::Combinations(table),
        ])
        .unwrap();

        assert_eq!(statistics.analyzed_files, 1);
        assert_eq!(statistics.failures[0].path, PathBuf::from("d.xml"));
        assert_eq!(statistics.failures[0].kind, FailureKind::Worker);
    }
}
