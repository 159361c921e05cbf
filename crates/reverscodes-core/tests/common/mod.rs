//! Test doubles for the page and the network.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reverscodes_core::detection::{
    BaitLayout, BaitSpec, DetectionSettings, ElementId, LoadError, ObserverId, PageSurface,
    Placement, ProbePlan, RemovalWatch, ResourceKind, ResourceLoader,
};
use tokio::sync::mpsc;
use url::Url;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 1, 12, 0, 0).unwrap()
}

pub fn plan() -> ProbePlan {
    ProbePlan::parse(
        &["adsbox".to_string(), "ad-banner".to_string(), "sponsored".to_string()],
        &["https://ads.example.test/show_ads.js".to_string()],
        &[
            "https://ads.example.test/a.js".to_string(),
            "https://track.example.test/b.js".to_string(),
        ],
        &["https://ads.example.test/pixel.gif".to_string()],
    )
}

pub fn settings() -> DetectionSettings {
    DetectionSettings::default()
}

// ============================================================================
// FakeSurface
// ============================================================================

/// What the simulated content blocker does to the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Blocker {
    None,
    /// Cosmetic filter: bait renders with zero height.
    Cosmetic,
    /// Extension script: container bait is deleted as soon as it appears.
    Script,
}

#[derive(Default)]
struct SurfaceState {
    next_id: u64,
    elements: HashMap<ElementId, BaitSpec>,
    observers: HashMap<ObserverId, mpsc::UnboundedSender<ElementId>>,
    inserted: usize,
}

/// An in-memory document that tracks every handle the probes create.
pub struct FakeSurface {
    state: Mutex<SurfaceState>,
    blocker: Mutex<Blocker>,
}

impl FakeSurface {
    pub fn new(blocker: Blocker) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SurfaceState::default()),
            blocker: Mutex::new(blocker),
        })
    }

    pub fn set_blocker(&self, blocker: Blocker) {
        *self.blocker.lock().unwrap() = blocker;
    }

    pub fn live_elements(&self) -> usize {
        self.state.lock().unwrap().elements.len()
    }

    pub fn live_observers(&self) -> usize {
        self.state.lock().unwrap().observers.len()
    }

    pub fn inserted(&self) -> usize {
        self.state.lock().unwrap().inserted
    }

    pub fn dom_ids(&self) -> HashSet<String> {
        let state = self.state.lock().unwrap();
        state.elements.values().map(|b| b.dom_id.clone()).collect()
    }

    fn blocker(&self) -> Blocker {
        *self.blocker.lock().unwrap()
    }

    fn detach(state: &mut SurfaceState, id: ElementId) {
        if state.elements.remove(&id).is_some() {
            for tx in state.observers.values() {
                let _ = tx.send(id);
            }
        }
    }
}

impl PageSurface for FakeSurface {
    fn insert(&self, bait: &BaitSpec) -> ElementId {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        state.inserted += 1;
        let id = ElementId(state.next_id);
        state.elements.insert(id, bait.clone());
        if self.blocker() == Blocker::Script && bait.placement == Placement::Container {
            Self::detach(&mut state, id);
        }
        id
    }

    fn layout(&self, id: ElementId) -> Option<BaitLayout> {
        let state = self.state.lock().unwrap();
        state.elements.get(&id)?;
        Some(match self.blocker() {
            Blocker::Cosmetic => BaitLayout::collapsed(),
            _ => BaitLayout::rendered(1.0),
        })
    }

    fn remove(&self, id: ElementId) {
        let mut state = self.state.lock().unwrap();
        Self::detach(&mut state, id);
    }

    fn observe_removals(&self) -> RemovalWatch {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = ObserverId(state.next_id);
        let (tx, removed) = mpsc::unbounded_channel();
        state.observers.insert(id, tx);
        RemovalWatch { id, removed }
    }

    fn disconnect(&self, observer: ObserverId) {
        self.state.lock().unwrap().observers.remove(&observer);
    }
}

// ============================================================================
// FakeLoader
// ============================================================================

/// How every load through the fake network ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Open,
    Blocked,
    /// Requests never complete.
    Hanging,
}

pub struct FakeLoader {
    network: Mutex<Network>,
    overrides: Mutex<HashMap<String, Network>>,
    in_flight: Arc<Mutex<usize>>,
    started: Mutex<usize>,
}

/// Decrements the in-flight counter when a load future ends or is dropped.
struct InFlight(Arc<Mutex<usize>>);

impl Drop for InFlight {
    fn drop(&mut self) {
        *self.0.lock().unwrap() -= 1;
    }
}

impl FakeLoader {
    pub fn new(network: Network) -> Arc<Self> {
        Arc::new(Self {
            network: Mutex::new(network),
            overrides: Mutex::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(0)),
            started: Mutex::new(0),
        })
    }

    pub fn set_network(&self, network: Network) {
        *self.network.lock().unwrap() = network;
    }

    pub fn set_url(&self, url: &str, network: Network) {
        self.overrides.lock().unwrap().insert(url.to_string(), network);
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.lock().unwrap()
    }

    pub fn started(&self) -> usize {
        *self.started.lock().unwrap()
    }
}

#[async_trait]
impl ResourceLoader for FakeLoader {
    async fn load(&self, _kind: ResourceKind, url: &Url) -> Result<(), LoadError> {
        let network = self
            .overrides
            .lock()
            .unwrap()
            .get(url.as_str())
            .copied()
            .unwrap_or_else(|| *self.network.lock().unwrap());

        *self.started.lock().unwrap() += 1;
        *self.in_flight.lock().unwrap() += 1;
        let _guard = InFlight(Arc::clone(&self.in_flight));

        tokio::time::sleep(Duration::from_millis(20)).await;
        match network {
            Network::Open => Ok(()),
            Network::Blocked => Err(LoadError::Transport("net::ERR_BLOCKED_BY_CLIENT".into())),
            Network::Hanging => std::future::pending().await,
        }
    }
}
