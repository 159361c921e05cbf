//! # ReversCodes Core Library
//!
//! This library provides the logic behind the ReversCodes site's ad-blocker
//! gate: detect whether a visitor blocks ads, then decide between a polite
//! prompt, a short cooldown, or a hard block based on a rolling deferral
//! quota. The page shell and the `reverscodes` CLI are thin layers over it.
//!
//! ## Architecture
//!
//! - **Detection**: independent probes (bait elements, network loads, DOM
//!   removal watching) run concurrently; any single positive means blocked
//! - **Quota**: deferral count, rolling window and cooldown persisted as four
//!   string keys, sanitized on every load
//! - **Presentation**: a pure modal state machine, driven by [`GateSession`]
//! - **Storage**: SQLite key-value table and TOML configuration
//! - **Comments**: HTTP client for the site's comment store
//!
//! ## Key Components
//!
//! - [`DetectionEngine`]: runs probe batteries with retries
//! - [`DeferralManager`]: turns a blocked verdict into a [`GateDecision`]
//! - [`GateSession`]: wires detection, quota and the modal together
//! - [`Config`]: application configuration management

pub mod clock;
pub mod comments;
pub mod detection;
pub mod error;
pub mod events;
pub mod manager;
pub mod presentation;
pub mod quota;
pub mod session;
pub mod storage;

pub use clock::{Clock, SystemClock, TokioClock};
pub use comments::{Comment, CommentClient, NewComment, Thread};
pub use detection::{
    DetectionEngine, DetectionSettings, DetectionVerdict, HttpLoader, PageSurface, ProbeKind,
    ProbePlan, ResourceLoader,
};
pub use error::{CommentError, ConfigError, CoreError, DatabaseError, ValidationError};
pub use events::GateEvent;
pub use manager::{Deferral, DeferralManager, GateDecision};
pub use presentation::{ModalController, ModalState};
pub use quota::{QuotaPolicy, QuotaRecord, QuotaStore};
pub use session::GateSession;
pub use storage::{Config, Database, KeyValue, MemoryKv};
