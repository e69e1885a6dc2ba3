//! Dictionary files shared by the lookup and entity-extraction stages.
//!
//! One entry per line, comma separated: the term, then zero or more
//! payloads. A term without payloads maps to itself. Blank lines and lines
//! starting with `#` are ignored.
//!
//! ```text
//! united states,United States
//! ussr,Russia
//! foo,bar,baz,boom
//! Canada
//! ```

use std::path::Path;

use anyhow::{Context, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DictionaryEntry {
    pub term: String,
    pub payloads: Vec<String>,
}

pub fn load_dictionary(path: &Path) -> Result<Vec<DictionaryEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_path(path)
        .with_context(|| format!("Failed to open dictionary {}", path.display()))?;

    let mut entries = Vec::new();
    for row in reader.records() {
        let row = row.with_context(|| format!("Failed to read dictionary {}", path.display()))?;
        let mut columns = row.iter().filter(|c| !c.is_empty());
        let Some(term) = columns.next() else {
            continue;
        };
        let mut payloads: Vec<String> = columns.map(str::to_string).collect();
        if payloads.is_empty() {
            payloads.push(term.to_string());
        }
        entries.push(DictionaryEntry {
            term: term.to_string(),
            payloads,
        });
    }
    Ok(entries)
}

/// Load several dictionaries in order into one entry list.
pub fn load_dictionaries<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<DictionaryEntry>> {
    let mut entries = Vec::new();
    for path in paths {
        entries.extend(load_dictionary(path.as_ref())?);
    }
    Ok(entries)
}

#[cfg(test)]
pub(crate) fn write_dictionary(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_terms_and_payloads() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_dictionary(
            tmp.path(),
            "dict.csv",
            "# countries\nunited states, United States\n\nCanada\nfoo,bar,baz,boom\n",
        );
        let entries = load_dictionary(&path).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].term, "united states");
        assert_eq!(entries[0].payloads, vec!["United States"]);
        assert_eq!(entries[1].payloads, vec!["Canada"]);
        assert_eq!(entries[2].payloads, vec!["bar", "baz", "boom"]);
    }

    #[test]
    fn test_missing_dictionary_is_error() {
        let err = load_dictionary(Path::new("/no/such/dict.csv")).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to open dictionary"));
    }
}
