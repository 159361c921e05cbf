//! The individual heuristics.
//!
//! Every probe owns whatever it injects through a drop guard, so elements,
//! observers and in-flight requests are released on success, failure,
//! timeout and cancellation alike.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use url::Url;

use super::loader::{ResourceKind, ResourceLoader};
use super::surface::{BaitSpec, ElementId, ObserverId, PageSurface, Placement};
use super::{ProbeKind, ProbeReport};

/// One independent check for content-blocking software.
#[async_trait]
pub trait Probe: Send + Sync {
    fn kind(&self) -> ProbeKind;

    /// Run to completion. Must resolve exactly once and leave nothing behind.
    async fn run(&self) -> ProbeReport;
}

/// Elements and observer injected by one probe run.
struct Injected {
    surface: Arc<dyn PageSurface>,
    elements: Vec<ElementId>,
    observer: Option<ObserverId>,
}

impl Injected {
    fn new(surface: Arc<dyn PageSurface>) -> Self {
        Self {
            surface,
            elements: Vec::new(),
            observer: None,
        }
    }

    fn insert(&mut self, bait: &BaitSpec) -> ElementId {
        let id = self.surface.insert(bait);
        self.elements.push(id);
        id
    }
}

impl Drop for Injected {
    fn drop(&mut self) {
        // Disconnect first so our own cleanup is not seen as a removal.
        if let Some(observer) = self.observer.take() {
            self.surface.disconnect(observer);
        }
        for id in self.elements.drain(..) {
            self.surface.remove(id);
        }
    }
}

/// Hidden ad-like elements; a cosmetic filter collapses or deletes them.
pub struct BaitProbe {
    surface: Arc<dyn PageSurface>,
    classes: Vec<String>,
    settle: Duration,
    threshold: f64,
}

impl BaitProbe {
    pub fn new(
        surface: Arc<dyn PageSurface>,
        classes: Vec<String>,
        settle: Duration,
        threshold: f64,
    ) -> Self {
        Self {
            surface,
            classes,
            settle,
            threshold,
        }
    }
}

#[async_trait]
impl Probe for BaitProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Bait
    }

    async fn run(&self) -> ProbeReport {
        let mut injected = Injected::new(Arc::clone(&self.surface));
        for class in &self.classes {
            injected.insert(&BaitSpec::new(class, Placement::Offscreen));
        }

        tokio::time::sleep(self.settle).await;

        let suppressed = injected
            .elements
            .iter()
            .filter(|id| {
                self.surface
                    .layout(**id)
                    .map_or(true, |layout| layout.is_suppressed())
            })
            .count();
        let total = injected.elements.len();
        drop(injected);

        ProbeReport::tally(ProbeKind::Bait, suppressed, total, self.threshold)
    }
}

/// Ad-like elements in a watched container; an extension's script deletes them.
pub struct MutationProbe {
    surface: Arc<dyn PageSurface>,
    classes: Vec<String>,
    window: Duration,
    threshold: f64,
}

impl MutationProbe {
    pub fn new(
        surface: Arc<dyn PageSurface>,
        classes: Vec<String>,
        window: Duration,
        threshold: f64,
    ) -> Self {
        Self {
            surface,
            classes,
            window,
            threshold,
        }
    }
}

#[async_trait]
impl Probe for MutationProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Mutation
    }

    async fn run(&self) -> ProbeReport {
        let mut injected = Injected::new(Arc::clone(&self.surface));

        // Observe before inserting so an immediate removal is not missed.
        let mut watch = self.surface.observe_removals();
        injected.observer = Some(watch.id);

        let ours: HashSet<ElementId> = self
            .classes
            .iter()
            .map(|class| injected.insert(&BaitSpec::new(class, Placement::Container)))
            .collect();

        let mut removed = HashSet::new();
        let deadline = tokio::time::sleep(self.window);
        tokio::pin!(deadline);
        while removed.len() < ours.len() {
            tokio::select! {
                _ = &mut deadline => break,
                next = watch.removed.recv() => match next {
                    Some(id) if ours.contains(&id) => {
                        removed.insert(id);
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
        drop(injected);

        ProbeReport::tally(ProbeKind::Mutation, removed.len(), ours.len(), self.threshold)
    }
}

/// Script, fetch or image loads from ad-network hosts.
pub struct NetworkProbe {
    kind: ResourceKind,
    loader: Arc<dyn ResourceLoader>,
    urls: Vec<Url>,
    request_timeout: Duration,
    threshold: f64,
}

impl NetworkProbe {
    pub fn new(
        kind: ResourceKind,
        loader: Arc<dyn ResourceLoader>,
        urls: Vec<Url>,
        request_timeout: Duration,
        threshold: f64,
    ) -> Self {
        Self {
            kind,
            loader,
            urls,
            request_timeout,
            threshold,
        }
    }
}

/// How a single load ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadOutcome {
    Loaded,
    Failed,
    TimedOut,
}

#[async_trait]
impl Probe for NetworkProbe {
    fn kind(&self) -> ProbeKind {
        match self.kind {
            ResourceKind::Script => ProbeKind::Script,
            ResourceKind::Fetch => ProbeKind::Fetch,
            ResourceKind::Image => ProbeKind::Image,
        }
    }

    async fn run(&self) -> ProbeReport {
        // Dropping the set aborts any load still in flight.
        let mut loads = JoinSet::new();
        for url in &self.urls {
            let loader = Arc::clone(&self.loader);
            let url = url.clone();
            let kind = self.kind;
            let limit = self.request_timeout;
            loads.spawn(async move {
                match tokio::time::timeout(limit, loader.load(kind, &url)).await {
                    Ok(Ok(())) => LoadOutcome::Loaded,
                    Ok(Err(e)) => {
                        tracing::debug!(%url, error = %e, "bait resource failed to load");
                        LoadOutcome::Failed
                    }
                    Err(_) => LoadOutcome::TimedOut,
                }
            });
        }

        let mut suppressed = 0;
        while let Some(joined) = loads.join_next().await {
            let outcome = joined.unwrap_or(LoadOutcome::Failed);
            let counts = match outcome {
                LoadOutcome::Loaded => false,
                LoadOutcome::Failed => true,
                // A hung opaque fetch is a block signal; a slow script or
                // image is merely inconclusive.
                LoadOutcome::TimedOut => self.kind == ResourceKind::Fetch,
            };
            if counts {
                suppressed += 1;
            }
        }

        ProbeReport::tally(self.kind(), suppressed, self.urls.len(), self.threshold)
    }
}
