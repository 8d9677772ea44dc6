//! # trip-core
//!
//! Offline-first core for the campus shuttle driver: the trip/check-in state
//! machine, a durable sync outbox, and crash recovery for interrupted trips.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. The host decides when to tick.
//! - **Explicit context**: All state lives in one [`DriverApp`]; there are no globals.
//! - **Durable first**: Every intent writes the store before it changes memory.
//! - **Nothing fatal**: Failures are [`TripError`] values; a failed sync is retried.
//! - **Core notifies, host renders**: Intents queue [`CoreEvent`]s for the presentation.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trip_core::{DriverApp, FileStore, Route, StorageConfig};
//!
//! let config = StorageConfig::from_env().ok_or("no home directory")?;
//! let store = FileStore::open(&config.store_dir())?;
//! let mut app = DriverApp::open(store, Route::default(), transport)?;
//! app.login("D-7", "4321", None, true)?;
//! app.start_trip()?;
//! app.check_in_next_stop()?;
//! for event in app.drain_events() {
//!     println!("{:?}", event.toast());
//! }
//! ```

pub mod app;
pub mod changes;
pub mod error;
pub mod events;
pub mod history;
pub mod recovery;
pub mod route;
pub mod session;
pub mod settings;
pub mod storage;
pub mod store;
pub mod sync;
pub mod trip;

pub use app::{Clock, DriverApp};
pub use changes::ChangeLog;
pub use error::{Result, TripError};
pub use events::CoreEvent;
pub use history::{TripHistory, DEFAULT_RETENTION_DAYS};
pub use recovery::{RecoveryDecision, RecoveryPrompt};
pub use route::{Route, Stop};
pub use session::{DriverIdentity, DEFAULT_BUS_NUMBER};
pub use settings::{DriverSettings, SettingKey};
pub use storage::StorageConfig;
pub use store::{FileStore, KeyValueStore, MemoryStore};
pub use sync::{
    DeferReason, DeliveryError, FlushOutcome, NetworkStatus, SyncGate, SyncStatus, Transport,
};
pub use trip::{CheckIn, PersistedTripSnapshot, TripMachine, TripPhase, TripRecord, TripSummary};

pub use bustrack_sync_protocol::PendingChange;
