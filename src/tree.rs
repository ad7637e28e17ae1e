//! Frequency tree data model
//!
//! A [`FrequencyTree`] counts how often each element name occurs in a
//! document, and below each element how often each attribute occurs and with
//! which values:
//!
//! ```text
//! elements
//!   book     Node { total: 2, children }
//!     id     Node { total: 2, children }
//!       "1"  Leaf(1)
//!       "2"  Leaf(1)
//! ```
//!
//! Metadata (totals, the file name) lives in struct fields and never in the
//! name mappings, so every XML name is a safe key.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A node of the frequency tree: either a raw count or a nested bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frequency {
    /// Occurrence count of one attribute value
    Leaf(u64),
    /// Counted name with its own breakdown
    Node(Bucket),
}

impl Frequency {
    /// Short name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Frequency::Leaf(_) => "leaf",
            Frequency::Node(_) => "node",
        }
    }

    /// Count carried by this node: the leaf value or the bucket total
    pub fn count(&self) -> u64 {
        match self {
            Frequency::Leaf(count) => *count,
            Frequency::Node(bucket) => bucket.total,
        }
    }

    pub fn as_bucket(&self) -> Option<&Bucket> {
        match self {
            Frequency::Node(bucket) => Some(bucket),
            Frequency::Leaf(_) => None,
        }
    }
}

/// A counted name together with the counts of its children
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Number of times this name was reached
    pub total: u64,
    /// Breakdown by child name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub children: BTreeMap<String, Frequency>,
}

impl Bucket {
    /// Look up a nested bucket by name
    pub fn bucket(&self, name: &str) -> Option<&Bucket> {
        self.children.get(name).and_then(Frequency::as_bucket)
    }

    /// Count stored under `name`, zero when absent
    pub fn count(&self, name: &str) -> u64 {
        self.children.get(name).map_or(0, Frequency::count)
    }

    /// Sum of the direct children counts
    pub fn children_sum(&self) -> u64 {
        self.children.values().map(Frequency::count).sum()
    }
}

/// Element, attribute and value counts of one document or of a whole corpus
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrequencyTree {
    /// Source document; absent on aggregates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<PathBuf>,
    /// Number of elements encountered
    pub total_elements: u64,
    /// Number of attributes encountered
    pub total_attributes: u64,
    /// Element name to its bucket
    #[serde(default)]
    pub elements: BTreeMap<String, Frequency>,
}

impl FrequencyTree {
    /// Empty tree for the given document
    pub fn for_file(file_name: impl Into<PathBuf>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            ..Self::default()
        }
    }

    /// Bucket of an element name
    pub fn element(&self, name: &str) -> Option<&Bucket> {
        self.elements.get(name).and_then(Frequency::as_bucket)
    }

    /// Bucket of an attribute below an element
    pub fn attribute(&self, element: &str, attribute: &str) -> Option<&Bucket> {
        self.element(element).and_then(|e| e.bucket(attribute))
    }

    /// Occurrences of one attribute value below an element
    pub fn value_count(&self, element: &str, attribute: &str, value: &str) -> u64 {
        self.attribute(element, attribute)
            .map_or(0, |a| a.count(value))
    }

    /// Number of distinct element names
    pub fn unique_elements(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_elements == 0 && self.elements.is_empty()
    }

    /// Same counts without the per-file identity
    pub fn without_file_name(mut self) -> Self {
        self.file_name = None;
        self
    }

    /// Whether every attribute total equals the sum of its value counts
    pub fn attribute_totals_consistent(&self) -> bool {
        self.elements
            .values()
            .filter_map(Frequency::as_bucket)
            .flat_map(|element| element.children.values())
            .filter_map(Frequency::as_bucket)
            .all(|attribute| attribute.total == attribute.children_sum())
    }
}
