use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::quotes::transfer;
use crate::quotes::{
    AddError, CategoryFilter, CategoryIndex, LoadOutcome, Quote, QuoteRepository,
};
use crate::storage::{KeyValueStore, LAST_VIEWED_KEY, SELECTED_CATEGORY_KEY};
use crate::sync::merge_remote_first;

/// Binds user actions to the repository, the category index and both storage tiers.
pub struct QuoteController {
    repository: QuoteRepository,
    durable: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
    index: CategoryIndex,
    filter: CategoryFilter,
    displayed: Option<Quote>,
    load_outcome: LoadOutcome,
}

impl QuoteController {
    pub fn start(durable: Arc<dyn KeyValueStore>, session: Arc<dyn KeyValueStore>) -> Self {
        let (repository, load_outcome) = QuoteRepository::load(Arc::clone(&durable));
        tracing::info!(?load_outcome, count = repository.len(), "quotes loaded");
        let index = CategoryIndex::from_quotes(repository.quotes());
        let filter = restore_filter(durable.as_ref(), &index);
        let displayed = restore_last_viewed(session.as_ref());
        Self {
            repository,
            durable,
            session,
            index,
            filter,
            displayed,
            load_outcome,
        }
    }

    pub fn load_outcome(&self) -> LoadOutcome {
        self.load_outcome
    }

    pub fn repository(&self) -> &QuoteRepository {
        &self.repository
    }

    pub fn quotes(&self) -> &[Quote] {
        self.repository.quotes()
    }

    pub fn categories(&self) -> &CategoryIndex {
        &self.index
    }

    pub fn filter(&self) -> &CategoryFilter {
        &self.filter
    }

    pub fn last_viewed(&self) -> Option<&Quote> {
        self.displayed.as_ref()
    }

    pub fn visible_quotes(&self) -> Vec<&Quote> {
        self.repository.filtered(&self.filter)
    }

    /// Picks uniformly over the whole list and remembers the pick for this session.
    pub fn show_random<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Quote> {
        self.show_random_matching(&CategoryFilter::All, rng)
    }

    /// Like [`Self::show_random`], restricted to quotes matching `filter`.
    pub fn show_random_matching<R: Rng + ?Sized>(
        &mut self,
        filter: &CategoryFilter,
        rng: &mut R,
    ) -> Option<Quote> {
        let quote = match filter {
            CategoryFilter::All => self.repository.random(rng)?.clone(),
            CategoryFilter::Category(_) => {
                let candidates = self.repository.filtered(filter);
                (*candidates.choose(rng)?).clone()
            }
        };
        match serde_json::to_string(&quote) {
            Ok(json) => {
                if let Err(err) = self.session.set(LAST_VIEWED_KEY, &json) {
                    tracing::warn!(?err, "failed to remember last viewed quote");
                }
            }
            Err(err) => tracing::warn!(?err, "failed to serialise last viewed quote"),
        }
        self.displayed = Some(quote.clone());
        Some(quote)
    }

    pub fn add_quote(&mut self, text: &str, category: &str) -> Result<Quote, AddError> {
        let result = self.repository.add(text, category);
        if !matches!(result, Err(AddError::Rejected(_))) {
            self.rebuild_index();
        }
        result
    }

    pub fn export_to(&self, path: &Path) -> Result<usize> {
        let count = transfer::export_to_path(self.repository.quotes(), path)?;
        tracing::info!(count, path = %path.display(), "exported quotes");
        Ok(count)
    }

    pub fn import_from(&mut self, path: &Path) -> Result<usize> {
        let imported = transfer::import_from_path(path)
            .with_context(|| format!("importing quotes from {}", path.display()))?;
        let result = self.repository.import_many(imported);
        self.rebuild_index();
        let count = result?;
        tracing::info!(count, path = %path.display(), "imported quotes");
        Ok(count)
    }

    pub fn set_filter(&mut self, filter: CategoryFilter) -> Result<()> {
        if !self.index.offers(&filter) {
            bail!("unknown category '{filter}'");
        }
        self.filter = filter;
        self.durable
            .set(SELECTED_CATEGORY_KEY, &self.filter.to_string())
            .context("saving selected category")
    }

    pub fn cycle_filter(&mut self, delta: isize) -> Result<&CategoryFilter> {
        let next = self.index.cycle(&self.filter, delta);
        self.set_filter(next)?;
        Ok(&self.filter)
    }

    /// Prepends `remote` to the persisted list and adopts the result wholesale.
    pub fn apply_pull(&mut self, remote: Vec<Quote>) -> Result<usize> {
        let pulled = remote.len();
        let local = QuoteRepository::read_persisted(self.durable.as_ref())
            .context("pull abandoned, stored quotes unavailable")?;
        let merged = merge_remote_first(remote, local);
        let result = self.repository.replace_all(merged);
        self.rebuild_index();
        result.context("saving merged quotes")?;
        Ok(pulled)
    }

    /// Also drops the filter back to `all` once its category has left the list.
    fn rebuild_index(&mut self) {
        self.index = CategoryIndex::from_quotes(self.repository.quotes());
        if self.index.offers(&self.filter) {
            return;
        }
        tracing::info!(filter = %self.filter, "selected category no longer present, showing all");
        self.filter = CategoryFilter::All;
        if let Err(err) = self
            .durable
            .set(SELECTED_CATEGORY_KEY, &self.filter.to_string())
        {
            tracing::warn!(?err, "failed to save selected category");
        }
    }
}

fn restore_filter(store: &dyn KeyValueStore, index: &CategoryIndex) -> CategoryFilter {
    let stored = match store.get(SELECTED_CATEGORY_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return CategoryFilter::All,
        Err(err) => {
            tracing::warn!(?err, "failed to read selected category");
            return CategoryFilter::All;
        }
    };
    let filter = stored.parse::<CategoryFilter>().unwrap_or_default();
    if index.offers(&filter) {
        filter
    } else {
        tracing::warn!(%filter, "stored category no longer present, showing all");
        CategoryFilter::All
    }
}

fn restore_last_viewed(store: &dyn KeyValueStore) -> Option<Quote> {
    let raw = match store.get(LAST_VIEWED_KEY) {
        Ok(raw) => raw?,
        Err(err) => {
            tracing::warn!(?err, "failed to read last viewed quote");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(quote) => Some(quote),
        Err(err) => {
            tracing::warn!(?err, "ignoring malformed last viewed quote");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quotes::{seed_quotes, DefaultReason, QuoteError};
    use crate::storage::{MemoryStore, QUOTES_KEY};
    use assert_matches::assert_matches;
    use rand::rngs::mock::StepRng;
    use tempfile::TempDir;

    struct Stores {
        durable: Arc<dyn KeyValueStore>,
        session: Arc<dyn KeyValueStore>,
    }

    impl Stores {
        fn new() -> Self {
            Self {
                durable: Arc::new(MemoryStore::new()),
                session: Arc::new(MemoryStore::new()),
            }
        }

        fn start(&self) -> QuoteController {
            QuoteController::start(Arc::clone(&self.durable), Arc::clone(&self.session))
        }
    }

    fn server_quotes(count: usize) -> Vec<Quote> {
        (0..count)
            .map(|idx| Quote::new(format!("server {idx}"), "Server"))
            .collect()
    }

    #[test]
    fn fresh_start_shows_seed_with_all_filter() {
        let stores = Stores::new();
        let controller = stores.start();
        assert_eq!(
            controller.load_outcome(),
            LoadOutcome::Defaulted(DefaultReason::Missing)
        );
        assert_eq!(controller.visible_quotes().len(), 3);
        assert_eq!(controller.filter(), &CategoryFilter::All);
        assert!(controller.last_viewed().is_none());
        assert_eq!(controller.categories().len(), 3);
    }

    #[test]
    fn random_quote_is_remembered_for_the_session() -> anyhow::Result<()> {
        let stores = Stores::new();
        let mut controller = stores.start();
        let shown = controller
            .show_random(&mut StepRng::new(0, 1))
            .expect("seed list is not empty");
        assert!(seed_quotes().contains(&shown));

        let restarted = stores.start();
        assert_eq!(restarted.last_viewed(), Some(&shown));

        stores.session.remove(LAST_VIEWED_KEY)?;
        assert!(stores.start().last_viewed().is_none());
        Ok(())
    }

    #[test]
    fn random_within_category_only_picks_matching_quotes() {
        let stores = Stores::new();
        let mut controller = stores.start();
        let filter = CategoryFilter::Category("Life".into());
        let shown = controller
            .show_random_matching(&filter, &mut StepRng::new(7, 3))
            .expect("Life has a quote");
        assert_eq!(shown.category, "Life");
        assert!(controller
            .show_random_matching(
                &CategoryFilter::Category("Nope".into()),
                &mut StepRng::new(0, 1)
            )
            .is_none());
    }

    #[test]
    fn add_updates_categories_and_rejects_blanks() -> anyhow::Result<()> {
        let stores = Stores::new();
        let mut controller = stores.start();

        assert_matches!(
            controller.add_quote("", "x"),
            Err(AddError::Rejected(QuoteError::EmptyText))
        );
        assert_eq!(controller.quotes().len(), 3);

        controller.add_quote("Stay hungry", "Motivation")?;
        assert_eq!(controller.quotes().len(), 4);
        assert!(controller.categories().contains("Motivation"));
        assert!(stores.durable.get(QUOTES_KEY)?.is_some());
        Ok(())
    }

    #[test]
    fn selected_filter_is_restored() -> anyhow::Result<()> {
        let stores = Stores::new();
        let mut controller = stores.start();
        controller.set_filter(CategoryFilter::Category("Life".into()))?;
        assert_eq!(controller.visible_quotes().len(), 1);
        assert_eq!(
            stores.durable.get(SELECTED_CATEGORY_KEY)?.as_deref(),
            Some("Life")
        );

        let restarted = stores.start();
        assert_eq!(
            restarted.filter(),
            &CategoryFilter::Category("Life".into())
        );
        assert_eq!(restarted.visible_quotes().len(), 1);
        Ok(())
    }

    #[test]
    fn unknown_filters_are_refused_and_not_restored() -> anyhow::Result<()> {
        let stores = Stores::new();
        let mut controller = stores.start();
        assert!(controller
            .set_filter(CategoryFilter::Category("Nope".into()))
            .is_err());

        stores.durable.set(SELECTED_CATEGORY_KEY, "Vanished")?;
        assert_eq!(stores.start().filter(), &CategoryFilter::All);
        Ok(())
    }

    #[test]
    fn cycling_filter_walks_options() -> anyhow::Result<()> {
        let stores = Stores::new();
        let mut controller = stores.start();
        assert_eq!(
            controller.cycle_filter(1)?,
            &CategoryFilter::Category("Life".into())
        );
        assert_eq!(
            controller.cycle_filter(-2)?,
            &CategoryFilter::Category("Happiness".into())
        );
        Ok(())
    }

    #[test]
    fn repeated_pull_grows_list_by_remote_count() -> anyhow::Result<()> {
        let stores = Stores::new();
        let mut controller = stores.start();
        controller.add_quote("local", "Mine")?;
        let before = controller.quotes().len();

        controller.apply_pull(server_quotes(2))?;
        assert_eq!(controller.quotes().len(), before + 2);
        assert_eq!(controller.quotes()[0], Quote::new("server 0", "Server"));
        assert_eq!(controller.quotes()[2], seed_quotes()[0]);

        controller.apply_pull(server_quotes(2))?;
        assert_eq!(controller.quotes().len(), before + 4);
        assert!(controller.categories().contains("Server"));
        Ok(())
    }

    #[test]
    fn pull_before_anything_was_persisted_drops_the_seed() -> anyhow::Result<()> {
        let stores = Stores::new();
        let mut controller = stores.start();
        controller.apply_pull(server_quotes(1))?;
        assert_eq!(controller.quotes(), &server_quotes(1)[..]);
        Ok(())
    }

    #[test]
    fn pull_resets_filter_when_its_category_disappears() -> anyhow::Result<()> {
        let stores = Stores::new();
        let mut controller = stores.start();
        controller.set_filter(CategoryFilter::Category("Life".into()))?;

        controller.apply_pull(server_quotes(1))?;
        assert_eq!(controller.filter(), &CategoryFilter::All);
        assert_eq!(controller.visible_quotes().len(), 1);
        assert_eq!(
            stores.durable.get(SELECTED_CATEGORY_KEY)?.as_deref(),
            Some("all")
        );
        Ok(())
    }

    #[test]
    fn pull_keeps_filter_while_its_category_survives() -> anyhow::Result<()> {
        let stores = Stores::new();
        let mut controller = stores.start();
        controller.add_quote("local", "Mine")?;
        controller.set_filter(CategoryFilter::Category("Mine".into()))?;

        controller.apply_pull(server_quotes(2))?;
        assert_eq!(
            controller.filter(),
            &CategoryFilter::Category("Mine".into())
        );
        Ok(())
    }

    #[test]
    fn pull_over_unreadable_stored_list_leaves_everything_untouched() -> anyhow::Result<()> {
        let stores = Stores::new();
        stores.durable.set(QUOTES_KEY, "{broken")?;
        let mut controller = stores.start();
        assert_eq!(controller.quotes().len(), 3);

        assert!(controller.apply_pull(server_quotes(1)).is_err());
        assert_eq!(controller.quotes(), seed_quotes().as_slice());
        assert!(!controller.categories().contains("Server"));
        assert_eq!(
            stores.durable.get(QUOTES_KEY)?.as_deref(),
            Some("{broken")
        );
        Ok(())
    }

    #[test]
    fn export_then_import_doubles_the_list() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("quotes.json");
        let stores = Stores::new();
        let mut controller = stores.start();
        let original = controller.quotes().to_vec();

        assert_eq!(controller.export_to(&path)?, 3);
        assert_eq!(controller.import_from(&path)?, 3);
        assert_eq!(controller.quotes().len(), 6);
        assert_eq!(&controller.quotes()[..3], original.as_slice());
        assert_eq!(&controller.quotes()[3..], original.as_slice());
        Ok(())
    }

    #[test]
    fn import_with_missing_category_appends_blank_category() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let path = temp.path().join("partial.json");
        std::fs::write(&path, r#"[{"text":"orphan"}]"#)?;
        let stores = Stores::new();
        let mut controller = stores.start();

        controller.import_from(&path)?;
        assert_eq!(controller.quotes().last(), Some(&Quote::new("orphan", "")));
        assert!(controller.categories().contains(""));
        Ok(())
    }
}
