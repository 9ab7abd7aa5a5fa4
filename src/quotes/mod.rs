use std::sync::Arc;

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::{KeyValueStore, QUOTES_KEY};

pub mod categories;
pub mod transfer;

pub use categories::{CategoryFilter, CategoryIndex};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub text: String,
    pub category: String,
}

impl Quote {
    pub fn new(text: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            category: category.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuoteError {
    #[error("quote text cannot be empty")]
    EmptyText,
    #[error("quote category cannot be empty")]
    EmptyCategory,
}

impl QuoteError {
    /// Message shown to the user when an add is rejected.
    pub const PROMPT: &'static str = "Please enter both a quote and a category.";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultReason {
    Missing,
    Malformed,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { count: usize },
    Defaulted(DefaultReason),
}

pub fn seed_quotes() -> Vec<Quote> {
    vec![
        Quote::new(
            "Life is what happens when you're busy making other plans.",
            "Life",
        ),
        Quote::new(
            "The greatest glory in living lies not in never falling, but in rising every time we fall.",
            "Inspiration",
        ),
        Quote::new("The purpose of our lives is to be happy.", "Happiness"),
    ]
}

pub struct QuoteRepository {
    quotes: Vec<Quote>,
    store: Arc<dyn KeyValueStore>,
}

impl QuoteRepository {
    pub fn load(store: Arc<dyn KeyValueStore>) -> (Self, LoadOutcome) {
        let (quotes, outcome) = match store.get(QUOTES_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Quote>>(&raw) {
                Ok(quotes) => {
                    let count = quotes.len();
                    (quotes, LoadOutcome::Loaded { count })
                }
                Err(err) => {
                    tracing::warn!(?err, "stored quotes are malformed, using seed list");
                    (seed_quotes(), LoadOutcome::Defaulted(DefaultReason::Malformed))
                }
            },
            Ok(None) => (seed_quotes(), LoadOutcome::Defaulted(DefaultReason::Missing)),
            Err(err) => {
                tracing::error!(?err, "failed to read stored quotes, using seed list");
                (
                    seed_quotes(),
                    LoadOutcome::Defaulted(DefaultReason::Unavailable),
                )
            }
        };
        (Self { quotes, store }, outcome)
    }

    /// The list as currently persisted; empty only when nothing was ever stored.
    pub fn read_persisted(store: &dyn KeyValueStore) -> Result<Vec<Quote>> {
        let Some(raw) = store.get(QUOTES_KEY).context("reading stored quotes")? else {
            return Ok(Vec::new());
        };
        serde_json::from_str(&raw).context("stored quotes are malformed")
    }

    pub fn quotes(&self) -> &[Quote] {
        &self.quotes
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    /// Validates, appends and persists. Rejections leave the list untouched.
    pub fn add(&mut self, text: &str, category: &str) -> Result<Quote, AddError> {
        let text = text.trim();
        let category = category.trim();
        if text.is_empty() {
            return Err(AddError::Rejected(QuoteError::EmptyText));
        }
        if category.is_empty() {
            return Err(AddError::Rejected(QuoteError::EmptyCategory));
        }
        let quote = Quote::new(text, category);
        self.quotes.push(quote.clone());
        self.save().map_err(AddError::Storage)?;
        Ok(quote)
    }

    pub fn import_many(&mut self, quotes: Vec<Quote>) -> Result<usize> {
        let count = quotes.len();
        self.quotes.extend(quotes);
        self.save()?;
        Ok(count)
    }

    pub fn replace_all(&mut self, quotes: Vec<Quote>) -> Result<()> {
        self.quotes = quotes;
        self.save()
    }

    pub fn filtered(&self, filter: &CategoryFilter) -> Vec<&Quote> {
        self.quotes
            .iter()
            .filter(|quote| filter.matches(&quote.category))
            .collect()
    }

    pub fn random<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Quote> {
        if self.quotes.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..self.quotes.len());
        self.quotes.get(index)
    }

    fn save(&self) -> Result<()> {
        let json = serde_json::to_string(&self.quotes).context("serialising quotes")?;
        self.store
            .set(QUOTES_KEY, &json)
            .context("persisting quotes")
    }
}

#[derive(Debug, Error)]
pub enum AddError {
    #[error(transparent)]
    Rejected(#[from] QuoteError),
    #[error("quote added but could not be saved: {0:#}")]
    Storage(anyhow::Error),
}
