use std::{collections::HashMap, fs, path::Path};

use tracing::debug;

use crate::error::{ensure_exists, ExplainError, Result};

/// Human-readable class names, indexed by class id.
///
/// Parsed from a dump of the form
///
/// ```text
/// {0: 'tench, Tinca tinca',
///  1: 'goldfish, Carassius auratus',
///  ...
/// ```
///
/// where every line holds one `<index>: <label>[, <label>]*,` entry. Lines holding a brace
/// are the delimiters of the dump and are skipped, blank lines carry nothing. Class indices
/// are non-negative, a negative index is a parse error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelTable {
    labels: HashMap<usize, Vec<String>>,
}

impl LabelTable {
    /// Read and parse the label table at `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        ensure_exists(path)?;

        let table = Self::parse(&fs::read_to_string(path)?)?;
        debug!("Loaded {} classes from {}", table.len(), path.display());

        Ok(table)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut labels = HashMap::new();

        for (line_idx, line) in content.lines().enumerate() {
            let line_number = line_idx + 1;
            let line = line.trim();
            if line.is_empty() || line.contains('{') || line.contains('}') {
                continue;
            }

            let (index, synonyms) = parse_line(line).map_err(|reason| ExplainError::Parse {
                line: line_number,
                reason,
            })?;

            if labels.insert(index, synonyms).is_some() {
                return Err(ExplainError::Parse {
                    line: line_number,
                    reason: format!("duplicate class index {index}"),
                });
            }
        }

        Ok(Self { labels })
    }

    /// All synonyms for class `index`, most common first.
    pub fn get(&self, index: usize) -> Option<&[String]> {
        self.labels.get(&index).map(Vec::as_slice)
    }

    /// First synonym of class `index`, or a generic `class <index>` name when the table has
    /// no entry for it.
    pub fn display_name(&self, index: usize) -> String {
        self.get(index)
            .and_then(|synonyms| synonyms.first())
            .cloned()
            .unwrap_or_else(|| format!("class {index}"))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

fn parse_line(line: &str) -> core::result::Result<(usize, Vec<String>), String> {
    let line = line.strip_suffix(',').unwrap_or(line);
    let (index, labels) = line
        .split_once(':')
        .ok_or_else(|| format!("missing ':' separator in {line:?}"))?;

    let index = index
        .trim()
        .parse::<usize>()
        .map_err(|err| {
            format!(
                "class index {:?} is not a non-negative integer: {err}",
                index.trim()
            )
        })?;

    let labels = labels
        .split(',')
        .map(|label| {
            label
                .trim()
                .trim_matches(|c| c == '\'' || c == '"')
                .trim()
                .to_string()
        })
        .filter(|label| !label.is_empty())
        .collect();

    Ok((index, labels))
}
