//! The DOM boundary.
//!
//! Probes never touch a document directly; a shell (a wasm binding, a
//! headless browser driver, a test double) implements [`PageSurface`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use tokio::sync::mpsc;

/// Handle to an injected element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub u64);

/// Handle to a registered removal observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// Where a bait element goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Positioned far off-screen in the body, 1x1 px.
    Offscreen,
    /// Inside the visible probe container watched for removals.
    Container,
}

/// An element made to look like an ad slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaitSpec {
    /// DOM id: a random per-process prefix and a counter, so ids never
    /// repeat within a process and are hard for filter lists to predict.
    pub dom_id: String,
    pub class_name: String,
    pub placement: Placement,
}

impl BaitSpec {
    pub fn new(class_name: &str, placement: Placement) -> Self {
        Self {
            dom_id: next_dom_id(),
            class_name: class_name.to_string(),
            placement,
        }
    }
}

fn next_dom_id() -> String {
    static PREFIX: OnceLock<u32> = OnceLock::new();
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let prefix = PREFIX.get_or_init(rand::random::<u32>);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("rc-bait-{prefix:08x}-{n:x}")
}

/// Rendered geometry of a bait element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaitLayout {
    /// Still connected to the document.
    pub attached: bool,
    /// Rendered height in CSS pixels.
    pub height: f64,
    /// Participates in layout (has an offset parent).
    pub has_offset_parent: bool,
}

impl BaitLayout {
    /// A visible, unmolested element.
    pub fn rendered(height: f64) -> Self {
        Self {
            attached: true,
            height,
            has_offset_parent: true,
        }
    }

    /// Hidden by a cosmetic filter (`display: none`).
    pub fn collapsed() -> Self {
        Self {
            attached: true,
            height: 0.0,
            has_offset_parent: false,
        }
    }

    pub fn is_suppressed(&self) -> bool {
        !self.attached || self.height <= 0.0 || !self.has_offset_parent
    }
}

/// Stream of elements removed from the document by anyone.
pub struct RemovalWatch {
    pub id: ObserverId,
    pub removed: mpsc::UnboundedReceiver<ElementId>,
}

/// Operations the probes need from the page.
///
/// `remove` and `disconnect` must tolerate handles that are already gone;
/// cleanup runs unconditionally.
pub trait PageSurface: Send + Sync {
    fn insert(&self, bait: &BaitSpec) -> ElementId;

    /// `None` once the element is no longer in the document.
    fn layout(&self, id: ElementId) -> Option<BaitLayout>;

    fn remove(&self, id: ElementId);

    /// Start observing element removals.
    fn observe_removals(&self) -> RemovalWatch;

    fn disconnect(&self, observer: ObserverId);
}
