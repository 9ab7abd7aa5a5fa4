use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use indexmap::IndexSet;

use super::Quote;

pub const ALL_SENTINEL: &str = "all";

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum CategoryFilter {
    #[default]
    All,
    Category(String),
}

impl CategoryFilter {
    pub fn matches(&self, category: &str) -> bool {
        match self {
            CategoryFilter::All => true,
            CategoryFilter::Category(selected) => selected == category,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            CategoryFilter::All => "All Categories",
            CategoryFilter::Category(name) => name,
        }
    }
}

impl FromStr for CategoryFilter {
    type Err = Infallible;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw == ALL_SENTINEL {
            Ok(CategoryFilter::All)
        } else {
            Ok(CategoryFilter::Category(raw.to_string()))
        }
    }
}

impl fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CategoryFilter::All => f.write_str(ALL_SENTINEL),
            CategoryFilter::Category(name) => f.write_str(name),
        }
    }
}

/// Distinct categories in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct CategoryIndex {
    categories: IndexSet<String>,
}

impl CategoryIndex {
    pub fn from_quotes(quotes: &[Quote]) -> Self {
        let categories = quotes
            .iter()
            .map(|quote| quote.category.clone())
            .collect::<IndexSet<_>>();
        Self { categories }
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn contains(&self, category: &str) -> bool {
        self.categories.contains(category)
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.categories.iter().map(String::as_str)
    }

    /// The sentinel followed by every category.
    pub fn options(&self) -> Vec<CategoryFilter> {
        std::iter::once(CategoryFilter::All)
            .chain(
                self.categories
                    .iter()
                    .map(|name| CategoryFilter::Category(name.clone())),
            )
            .collect()
    }

    /// Position of `filter` within [`CategoryIndex::options`].
    pub fn position_of(&self, filter: &CategoryFilter) -> Option<usize> {
        match filter {
            CategoryFilter::All => Some(0),
            CategoryFilter::Category(name) => self.categories.get_index_of(name).map(|idx| idx + 1),
        }
    }

    /// Whether `filter` is one of the offered options.
    pub fn offers(&self, filter: &CategoryFilter) -> bool {
        self.position_of(filter).is_some()
    }

    /// The option `delta` steps away from `current`, wrapping at both ends.
    pub fn cycle(&self, current: &CategoryFilter, delta: isize) -> CategoryFilter {
        let total = self.categories.len() as isize + 1;
        let current = self.position_of(current).unwrap_or(0) as isize;
        let next = (current + delta).rem_euclid(total) as usize;
        if next == 0 {
            CategoryFilter::All
        } else {
            self.categories
                .get_index(next - 1)
                .map(|name| CategoryFilter::Category(name.clone()))
                .unwrap_or_default()
        }
    }
}
