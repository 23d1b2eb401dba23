use std::{collections::BTreeSet, path::Path};

use crate::classifier::LoadError;

/// The labels of the model outputs.
///
/// Line `n` of the dictionary file names output `n` of the model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelDictionary {
    labels: Vec<String>,
}

impl LabelDictionary {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| LoadError::Dictionary {
            path: path.to_path_buf(),
            source,
        })?;

        let dictionary = Self::parse(&content);
        tracing::info!(
            "Loaded {} labels from {}",
            dictionary.len(),
            path.display()
        );

        Ok(dictionary)
    }

    /// Parse a dictionary, one label per line.
    ///
    /// Blank lines keep their index so that the following labels stay aligned
    /// with the model outputs, but they are never reported as a label.
    pub fn parse(content: &str) -> Self {
        let labels = content
            .lines()
            .map(|line| line.trim().to_string())
            .collect();

        Self { labels }
    }

    /// The label of the output at `index`, if it has one.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels
            .get(index)
            .map(String::as_str)
            .filter(|label| !label.is_empty())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Distinct labels in lexicographic order.
    pub fn sorted(&self) -> Vec<&str> {
        self.labels
            .iter()
            .map(String::as_str)
            .filter(|label| !label.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
