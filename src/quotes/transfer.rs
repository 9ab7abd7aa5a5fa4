use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use serde_with::{serde_as, DefaultOnError};
use thiserror::Error;

use super::Quote;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing import file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("import file must contain a JSON array of quotes")]
    NotAnArray,
    #[error("entry {index} is not an object")]
    NotAnObject { index: usize },
}

/// Lenient entry shape: absent or mistyped fields become empty strings.
#[serde_as]
#[derive(Debug, Deserialize)]
struct LooseQuote {
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    text: String,
    #[serde_as(as = "DefaultOnError")]
    #[serde(default)]
    category: String,
}

impl From<LooseQuote> for Quote {
    fn from(loose: LooseQuote) -> Self {
        Quote::new(loose.text, loose.category)
    }
}

pub fn export_json(quotes: &[Quote]) -> serde_json::Result<String> {
    serde_json::to_string(quotes)
}

pub fn export_to_path(quotes: &[Quote], path: &Path) -> anyhow::Result<usize> {
    use anyhow::Context;

    let json = export_json(quotes).context("serialising quotes for export")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating export directory {}", parent.display()))?;
    }
    fs::write(path, json).with_context(|| format!("writing export {}", path.display()))?;
    Ok(quotes.len())
}

pub fn parse_import(raw: &str) -> Result<Vec<Quote>, ImportError> {
    let document: Value = serde_json::from_str(raw)?;
    let Value::Array(entries) = document else {
        return Err(ImportError::NotAnArray);
    };
    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            if !entry.is_object() {
                return Err(ImportError::NotAnObject { index });
            }
            let loose: LooseQuote = serde_json::from_value(entry)?;
            Ok(Quote::from(loose))
        })
        .collect()
}

pub fn import_from_path(path: &Path) -> Result<Vec<Quote>, ImportError> {
    let raw = fs::read_to_string(path).map_err(|source| ImportError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_import(&raw)
}
