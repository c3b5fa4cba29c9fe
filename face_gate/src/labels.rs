//! Class labels of the classifier.
//!
//! The label file has one line per class, `"<ordinal> <identity>"`, e.g. `"01 Eduardo"`. Line
//! order defines the class index.
use std::{fs, ops::Index, path::Path};

use crate::InitError;

/// Ordered identity names, index-aligned with the classifier output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelSet {
    identities: Vec<String>,
}

impl LabelSet {
    /// Load labels from a text file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, InitError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| InitError::Labels {
            path: path.to_owned(),
            source,
        })?;

        let labels = Self::parse(&content);
        if labels.is_empty() {
            return Err(InitError::EmptyLabels(path.to_owned()));
        }
        log::info!(
            "Loaded {} labels from {}: {:?}",
            labels.len(),
            path.display(),
            labels.identities
        );

        Ok(labels)
    }

    /// Parse the content of a label file. Blank lines are skipped.
    pub fn parse(content: &str) -> Self {
        let identities = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(identity_from_label_line)
            .collect();

        Self { identities }
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.identities.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.identities.iter().map(String::as_str)
    }
}

impl Index<usize> for LabelSet {
    type Output = str;

    fn index(&self, index: usize) -> &str {
        &self.identities[index]
    }
}

impl<S: Into<String>> FromIterator<S> for LabelSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self {
            identities: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Strip the numeric ordinal prefix and surrounding whitespace from a raw label line.
///
/// The ordinal is the leading run of ASCII digits, with or without a separator after it. Lines
/// without an ordinal, or with nothing after it, are returned trimmed.
pub fn identity_from_label_line(line: &str) -> String {
    let line = line.trim();
    match line.trim_start_matches(|c: char| c.is_ascii_digit()).trim() {
        "" => line.to_owned(),
        name => name.to_owned(),
    }
}
