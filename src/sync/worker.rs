use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use strum::Display;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::{pull_quotes, push_quotes, RemoteEndpoint};
use crate::quotes::Quote;
use crate::storage::KeyValueStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum PushTrigger {
    Timer,
    AfterAdd,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    Pull,
    Push(PushTrigger),
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Pulled(Vec<Quote>),
    PullFailed(String),
    Pushed { trigger: PushTrigger, sent: usize },
    PushFailed { trigger: PushTrigger, message: String },
    PushSkipped(PushTrigger),
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub server_category: String,
    /// `None` disables the periodic push.
    pub push_interval: Option<Duration>,
}

/// Owns the sync thread; network work never touches the caller's thread.
pub struct SyncWorker {
    commands: UnboundedSender<SyncCommand>,
    events: Receiver<SyncEvent>,
    handle: Option<JoinHandle<()>>,
}

impl SyncWorker {
    pub fn spawn(
        endpoint: Arc<dyn RemoteEndpoint>,
        store: Arc<dyn KeyValueStore>,
        settings: WorkerSettings,
    ) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = crossbeam_channel::unbounded();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("building sync runtime")?;
        let handle = thread::Builder::new()
            .name("quote-sync".into())
            .spawn(move || {
                runtime.block_on(run_loop(endpoint, store, settings, command_rx, event_tx));
                tracing::debug!("sync worker stopped");
            })
            .context("spawning sync worker thread")?;
        Ok(Self {
            commands: command_tx,
            events: event_rx,
            handle: Some(handle),
        })
    }

    pub fn request_pull(&self) {
        self.send(SyncCommand::Pull);
    }

    pub fn request_push(&self, trigger: PushTrigger) {
        self.send(SyncCommand::Push(trigger));
    }

    pub fn events(&self) -> &Receiver<SyncEvent> {
        &self.events
    }

    pub fn drain_events(&self) -> Vec<SyncEvent> {
        self.events.try_iter().collect()
    }

    /// Cancels the timer and any request still running, then joins the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn send(&self, command: SyncCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!(?command, "sync worker is gone, dropping command");
        }
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.commands.send(SyncCommand::Shutdown);
        if handle.join().is_err() {
            tracing::error!("sync worker thread panicked");
        }
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

async fn run_loop(
    endpoint: Arc<dyn RemoteEndpoint>,
    store: Arc<dyn KeyValueStore>,
    settings: WorkerSettings,
    mut commands: UnboundedReceiver<SyncCommand>,
    events: Sender<SyncEvent>,
) {
    let in_flight = Arc::new(AtomicBool::new(false));
    let mut timer = settings.push_interval.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    tracing::info!(
        interval = ?settings.push_interval,
        "sync worker started"
    );

    loop {
        let trigger = tokio::select! {
            command = commands.recv() => match command {
                Some(SyncCommand::Pull) => {
                    spawn_pull(&endpoint, &settings.server_category, &events);
                    continue;
                }
                Some(SyncCommand::Push(trigger)) => trigger,
                Some(SyncCommand::Shutdown) | None => break,
            },
            _ = next_tick(&mut timer) => PushTrigger::Timer,
        };
        spawn_push(&endpoint, &store, &in_flight, trigger, &events);
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn spawn_pull(endpoint: &Arc<dyn RemoteEndpoint>, category: &str, events: &Sender<SyncEvent>) {
    let endpoint = Arc::clone(endpoint);
    let category = category.to_string();
    let events = events.clone();
    tokio::spawn(async move {
        let event = match pull_quotes(endpoint.as_ref(), &category).await {
            Ok(quotes) => {
                tracing::info!(count = quotes.len(), "pulled quotes from server");
                SyncEvent::Pulled(quotes)
            }
            Err(err) => {
                tracing::error!(%err, "error fetching quotes from server");
                SyncEvent::PullFailed(err.to_string())
            }
        };
        emit(&events, event);
    });
}

fn spawn_push(
    endpoint: &Arc<dyn RemoteEndpoint>,
    store: &Arc<dyn KeyValueStore>,
    in_flight: &Arc<AtomicBool>,
    trigger: PushTrigger,
    events: &Sender<SyncEvent>,
) {
    if in_flight.swap(true, Ordering::SeqCst) {
        tracing::debug!(%trigger, "previous push still running, skipping");
        emit(events, SyncEvent::PushSkipped(trigger));
        return;
    }
    let guard = InFlight(Arc::clone(in_flight));
    let endpoint = Arc::clone(endpoint);
    let store = Arc::clone(store);
    let events = events.clone();
    tokio::spawn(async move {
        let _guard = guard;
        let event = match push_quotes(endpoint.as_ref(), store.as_ref()).await {
            Ok(report) => {
                tracing::info!(%trigger, sent = report.sent, "quotes synced with server");
                SyncEvent::Pushed {
                    trigger,
                    sent: report.sent,
                }
            }
            Err(err) => {
                tracing::error!(%trigger, %err, "error syncing quotes with server");
                SyncEvent::PushFailed {
                    trigger,
                    message: err.to_string(),
                }
            }
        };
        emit(&events, event);
    });
}

fn emit(events: &Sender<SyncEvent>, event: SyncEvent) {
    if events.send(event).is_err() {
        tracing::debug!("sync event receiver dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, QUOTES_KEY};
    use crate::sync::tests::FixtureEndpoint;
    use crate::sync::{OutgoingPost, RemotePost, SyncError};
    use async_trait::async_trait;
    use assert_matches::assert_matches;

    const WAIT: Duration = Duration::from_secs(5);

    fn seeded_store() -> Arc<dyn KeyValueStore> {
        let store = MemoryStore::new();
        store
            .set(QUOTES_KEY, r#"[{"text":"a","category":"x"}]"#)
            .expect("memory store write");
        Arc::new(store)
    }

    fn settings(push_interval: Option<Duration>) -> WorkerSettings {
        WorkerSettings {
            server_category: "Server".into(),
            push_interval,
        }
    }

    struct SlowEndpoint;

    #[async_trait]
    impl RemoteEndpoint for SlowEndpoint {
        async fn fetch_posts(&self) -> Result<Vec<RemotePost>, SyncError> {
            Ok(Vec::new())
        }

        async fn publish(&self, _post: &OutgoingPost) -> Result<(), SyncError> {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(())
        }
    }

    #[test]
    fn pull_reports_tagged_quotes() -> anyhow::Result<()> {
        let endpoint = Arc::new(FixtureEndpoint::with_titles(&["remote"]));
        let worker = SyncWorker::spawn(endpoint, seeded_store(), settings(None))?;

        worker.request_pull();
        let event = worker.events().recv_timeout(WAIT)?;
        assert_eq!(
            event,
            SyncEvent::Pulled(vec![Quote::new("remote", "Server")])
        );
        worker.shutdown();
        Ok(())
    }

    #[test]
    fn failed_pull_is_reported_not_raised() -> anyhow::Result<()> {
        let endpoint = Arc::new(FixtureEndpoint {
            fail_fetch: true,
            ..FixtureEndpoint::default()
        });
        let worker = SyncWorker::spawn(endpoint, seeded_store(), settings(None))?;

        worker.request_pull();
        assert_matches!(
            worker.events().recv_timeout(WAIT)?,
            SyncEvent::PullFailed(_)
        );
        Ok(())
    }

    #[test]
    fn overlapping_push_is_skipped() -> anyhow::Result<()> {
        let worker = SyncWorker::spawn(Arc::new(SlowEndpoint), seeded_store(), settings(None))?;

        worker.request_push(PushTrigger::Manual);
        worker.request_push(PushTrigger::AfterAdd);

        let first = worker.events().recv_timeout(WAIT)?;
        assert_eq!(first, SyncEvent::PushSkipped(PushTrigger::AfterAdd));
        let second = worker.events().recv_timeout(WAIT)?;
        assert_eq!(
            second,
            SyncEvent::Pushed {
                trigger: PushTrigger::Manual,
                sent: 1
            }
        );

        worker.request_push(PushTrigger::Manual);
        assert_eq!(
            worker.events().recv_timeout(WAIT)?,
            SyncEvent::Pushed {
                trigger: PushTrigger::Manual,
                sent: 1
            }
        );
        Ok(())
    }

    #[test]
    fn timer_pushes_periodically() -> anyhow::Result<()> {
        let endpoint = Arc::new(FixtureEndpoint::default());
        let worker = SyncWorker::spawn(
            endpoint.clone(),
            seeded_store(),
            settings(Some(Duration::from_millis(50))),
        )?;

        let mut pushes = 0;
        while pushes < 2 {
            match worker.events().recv_timeout(WAIT)? {
                SyncEvent::Pushed { trigger, sent } => {
                    assert_eq!(trigger, PushTrigger::Timer);
                    assert_eq!(sent, 1);
                    pushes += 1;
                }
                SyncEvent::PushSkipped(PushTrigger::Timer) => {}
                other => panic!("unexpected event {other:?}"),
            }
        }
        worker.shutdown();
        assert!(endpoint.published.lock().len() >= 2);
        Ok(())
    }

    #[test]
    fn push_trigger_labels_are_kebab_case() {
        assert_eq!(PushTrigger::AfterAdd.to_string(), "after-add");
        assert_eq!(PushTrigger::Timer.to_string(), "timer");
    }
}
