//! The driver app context.
//!
//! [`DriverApp`] owns every piece of driver state: the trip machine, the
//! trip outbox, settings, identity, connectivity, retry spacing, any pending
//! recovery prompt, and the outgoing [`CoreEvent`] buffer. The presentation
//! layer holds one instance, issues intents, and drains events.
//!
//! State-changing intents write to the store first and only then replace the
//! in-memory state. A failed write leaves the app exactly as it was.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::changes::ChangeLog;
use crate::error::{Result, TripError};
use crate::events::CoreEvent;
use crate::history::TripHistory;
use crate::recovery::{self, RecoveryDecision, RecoveryPrompt};
use crate::route::Route;
use crate::session::DriverIdentity;
use crate::settings::{DriverSettings, SettingKey};
use crate::store::{keys, load_json_or_default, save_json, KeyValueStore};
use crate::sync::{
    last_sync_label, sync_gate, FlushOutcome, NetworkStatus, RetryState, SyncGate, SyncQueue,
    SyncStatus, Transport, TRIP_QUEUE,
};
use crate::trip::{CheckIn, TripMachine, TripPhase, TripRecord, TripSummary};
use bustrack_sync_protocol::PendingChange;

pub type Clock = Box<dyn Fn() -> DateTime<Utc>>;

pub struct DriverApp<S, T> {
    store: S,
    transport: T,
    machine: TripMachine,
    trips: SyncQueue<TripRecord>,
    changes: ChangeLog,
    history: TripHistory,
    settings: DriverSettings,
    identity: Option<DriverIdentity>,
    network: NetworkStatus,
    retry: RetryState,
    pending_recovery: Option<RecoveryPrompt>,
    events: Vec<CoreEvent>,
    clock: Clock,
}

impl<S, T> DriverApp<S, T>
where
    S: KeyValueStore,
    T: Transport<TripRecord> + Transport<PendingChange>,
{
    /// Loads persisted state and checks for an interrupted trip.
    ///
    /// A malformed trip or change queue fails the open: those hold
    /// undelivered records and must not be replaced by an empty list.
    pub fn open(store: S, route: Route, transport: T) -> Result<Self> {
        let settings = DriverSettings::load(&store)?;
        let identity = DriverIdentity::load_remembered(&store)?;
        let trips = SyncQueue::load(&store, TRIP_QUEUE)?;
        let changes = ChangeLog::load(&store)?;
        let history = TripHistory::load(&store)?;
        let retry: RetryState = load_json_or_default(&store, keys::SYNC_FAILURES)?;

        let mut app = Self {
            store,
            transport,
            machine: TripMachine::new(route),
            trips,
            changes,
            history,
            settings,
            identity,
            network: NetworkStatus::default(),
            retry,
            pending_recovery: None,
            events: Vec::new(),
            clock: Box::new(Utc::now),
        };
        app.check_recovery()?;

        tracing::info!(
            route = app.machine.route().id(),
            pending = app.trips.pending_count(),
            signed_in = app.identity.is_some(),
            recovery = app.pending_recovery.is_some(),
            "Driver app opened"
        );
        Ok(app)
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    fn check_recovery(&mut self) -> Result<()> {
        let Some(prompt) = recovery::detect(&self.store, self.machine.route())? else {
            return Ok(());
        };

        // An end-trip whose snapshot removal failed leaves an active snapshot
        // behind for a trip that is already queued or delivered.
        if let Some(snapshot) = prompt.snapshot() {
            let finished = self
                .trips
                .pending()
                .iter()
                .chain(self.history.trips())
                .any(|trip| {
                    Some(trip.start_time) == snapshot.start_time
                        && trip.route_id == snapshot.route_id
                });
            if finished {
                tracing::warn!("Removing stale snapshot of an already finalized trip");
                self.store.remove(keys::ACTIVE_TRIP)?;
                return Ok(());
            }
        }

        self.events.push(CoreEvent::RecoveryRequired {
            message: prompt.message(),
        });
        self.pending_recovery = Some(prompt);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    pub fn route(&self) -> &Route {
        self.machine.route()
    }

    pub fn phase(&self) -> TripPhase {
        self.machine.phase()
    }

    pub fn current_stop_index(&self) -> usize {
        self.machine.current_stop_index()
    }

    pub fn passengers(&self) -> u32 {
        self.machine.passengers()
    }

    pub fn check_ins(&self) -> &[CheckIn] {
        self.machine
            .active()
            .map(|trip| trip.check_ins.as_slice())
            .unwrap_or_default()
    }

    pub fn identity(&self) -> Option<&DriverIdentity> {
        self.identity.as_ref()
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn network(&self) -> NetworkStatus {
        self.network
    }

    pub fn recovery_prompt(&self) -> Option<&RecoveryPrompt> {
        self.pending_recovery.as_ref()
    }

    pub fn pending_count(&self) -> usize {
        self.trips.pending_count()
    }

    pub fn pending_trips(&self) -> &[TripRecord] {
        self.trips.pending()
    }

    pub fn pending_change_count(&self) -> usize {
        self.changes.pending_count()
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.trips.last_sync()
    }

    pub fn last_sync_label(&self) -> String {
        last_sync_label(self.trips.last_sync(), self.now())
    }

    pub fn sync_status(&self) -> SyncStatus {
        SyncStatus::derive(
            self.trips.is_in_flight(),
            self.network,
            self.trips.pending_count(),
        )
    }

    pub fn retry_state(&self) -> &RetryState {
        &self.retry
    }

    pub fn history(&self) -> &[TripRecord] {
        self.history.trips()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Hands pending notifications to the presentation layer.
    pub fn drain_events(&mut self) -> Vec<CoreEvent> {
        std::mem::take(&mut self.events)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Session
    // ─────────────────────────────────────────────────────────────────────

    pub fn login(
        &mut self,
        driver_id: &str,
        pin: &str,
        bus_number: Option<&str>,
        remember: bool,
    ) -> Result<&DriverIdentity> {
        if self.machine.phase().is_active() {
            return Err(TripError::TripInProgress);
        }
        let identity = DriverIdentity::sign_in(driver_id, pin, bus_number)?;
        if remember {
            identity.remember(&mut self.store)?;
        } else {
            DriverIdentity::forget(&mut self.store)?;
        }
        tracing::info!(driver_id = %identity.id, bus = %identity.bus_number, remember, "Driver signed in");
        Ok(self.identity.insert(identity))
    }

    pub fn logout(&mut self) -> Result<()> {
        if self.machine.phase().is_active() {
            return Err(TripError::TripInProgress);
        }
        DriverIdentity::forget(&mut self.store)?;
        if let Some(identity) = self.identity.take() {
            tracing::info!(driver_id = %identity.id, "Driver signed out");
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Trip Intents
    // ─────────────────────────────────────────────────────────────────────

    fn ensure_no_recovery(&self) -> Result<()> {
        if self.pending_recovery.is_some() {
            return Err(TripError::RecoveryPending);
        }
        Ok(())
    }

    /// Persists `next`'s snapshot, then adopts it.
    fn commit_trip(&mut self, next: TripMachine) -> Result<()> {
        match next.snapshot() {
            Some(snapshot) => save_json(&mut self.store, keys::ACTIVE_TRIP, &snapshot)?,
            None => self.store.remove(keys::ACTIVE_TRIP)?,
        }
        self.machine = next;
        Ok(())
    }

    pub fn start_trip(&mut self) -> Result<()> {
        self.ensure_no_recovery()?;
        let Some(identity) = self.identity.as_ref() else {
            return Err(TripError::NotSignedIn);
        };
        let now = self.now();
        let mut next = self.machine.clone();
        next.start(now, &identity.id, &identity.bus_number)?;
        self.commit_trip(next)?;

        tracing::info!(route = self.machine.route().id(), "Trip started");
        self.events.push(CoreEvent::TripStarted { at: now });
        Ok(())
    }

    pub fn check_in_next_stop(&mut self) -> Result<CheckIn> {
        self.ensure_no_recovery()?;
        let mut next = self.machine.clone();
        let check_in = next.check_in_next_stop(self.now())?;
        self.commit_trip(next)?;

        let index = self.machine.current_stop_index();
        let total = self.machine.route().total_stops();
        tracing::info!(
            stop_id = check_in.stop_id,
            passengers = check_in.passengers_at_check_in,
            index,
            total,
            "Stop checked in"
        );
        self.events.push(CoreEvent::StopReached {
            stop_name: check_in.stop_name.clone(),
            index,
            total,
        });
        Ok(check_in)
    }

    /// Finalizes the trip, queues it, and tries to deliver it right away.
    ///
    /// The record names the driver who started the trip, so a resumed trip
    /// can be ended without signing in again. A record the receiver would
    /// refuse is reported as [`TripError::InvalidRecord`] and never queued.
    ///
    /// A failed delivery does not fail the intent: the trip is safely queued
    /// and the failure is reported as a [`CoreEvent::SyncFailed`].
    pub fn end_trip(&mut self) -> Result<TripSummary> {
        self.ensure_no_recovery()?;
        let now = self.now();
        let mut next = self.machine.clone();
        let record = next.end(now)?;
        record
            .validate()
            .map_err(|info| TripError::InvalidRecord {
                code: info.code,
                message: info.message,
            })?;

        self.trips.enqueue(&mut self.store, record.clone())?;
        self.machine = next;
        if let Err(err) = self.store.remove(keys::ACTIVE_TRIP) {
            tracing::warn!(error = %err, trip_id = %record.id, "Trip queued but snapshot not cleared");
        }

        let summary = TripSummary::of(&record);
        tracing::info!(
            trip_id = %record.id,
            stops = record.stops.len(),
            passengers = record.total_passengers,
            "Trip ended"
        );
        self.events.push(CoreEvent::TripCompleted {
            summary: summary.clone(),
        });

        match self.gate() {
            SyncGate::Open => self.attempt_sync(now)?,
            SyncGate::Deferred(reason) => self.events.push(CoreEvent::SyncDeferred { reason }),
        }
        Ok(summary)
    }

    pub fn adjust_count(&mut self, delta: i32) -> Result<u32> {
        self.ensure_no_recovery()?;
        let mut next = self.machine.clone();
        let count = next.adjust_count(delta)?;
        self.commit_trip(next)?;
        self.events.push(CoreEvent::PassengerCountChanged { count });
        Ok(count)
    }

    pub fn set_count(&mut self, value: u32) -> Result<u32> {
        self.ensure_no_recovery()?;
        let mut next = self.machine.clone();
        let count = next.set_count(value)?;
        self.commit_trip(next)?;
        self.events.push(CoreEvent::PassengerCountChanged { count });
        Ok(count)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Recovery
    // ─────────────────────────────────────────────────────────────────────

    pub fn resume_trip(&mut self) -> Result<TripPhase> {
        let phase = self.resolve_recovery(RecoveryDecision::Resume)?;
        self.events.push(CoreEvent::TripResumed {
            current_stop_index: self.machine.current_stop_index(),
        });
        Ok(phase)
    }

    pub fn discard_trip(&mut self) -> Result<TripPhase> {
        let phase = self.resolve_recovery(RecoveryDecision::Discard)?;
        self.events.push(CoreEvent::TripDiscarded);
        Ok(phase)
    }

    fn resolve_recovery(&mut self, decision: RecoveryDecision) -> Result<TripPhase> {
        let Some(prompt) = self.pending_recovery.as_ref() else {
            return Err(TripError::InvalidTransition {
                from: self.machine.phase(),
                action: decision.action(),
            });
        };
        let phase = recovery::resolve(&mut self.machine, &mut self.store, prompt, decision)?;
        self.pending_recovery = None;
        Ok(phase)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sync
    // ─────────────────────────────────────────────────────────────────────

    fn gate(&self) -> SyncGate {
        sync_gate(self.network, self.settings.wifi_only)
    }

    /// Operator-initiated sync. Ignores retry spacing.
    ///
    /// Returns the delivery error when the receiver does not acknowledge;
    /// the queue is unchanged in that case.
    pub fn request_sync(&mut self) -> Result<FlushOutcome<TripRecord>> {
        let now = self.now();
        self.sync_trips(now)
    }

    /// Records a connectivity change. When the change opens the sync gate
    /// and trips are waiting, an automatic sync is attempted.
    pub fn set_network(&mut self, status: NetworkStatus) -> Result<()> {
        let was_open = matches!(self.gate(), SyncGate::Open);
        self.network = status;
        tracing::info!(network = %status, "Network status changed");

        let is_open = matches!(self.gate(), SyncGate::Open);
        if !was_open && is_open && self.trips.pending_count() > 0 {
            let now = self.now();
            self.auto_sync(now)?;
        }
        Ok(())
    }

    /// Periodic driver: runs an automatic sync when one is due.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.trips.pending_count() == 0 || !matches!(self.gate(), SyncGate::Open) {
            return Ok(());
        }
        self.auto_sync(now)
    }

    fn auto_sync(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.retry.is_due(now) {
            tracing::debug!(
                failures = self.retry.consecutive_failures,
                "Automatic sync waiting for backoff"
            );
            return Ok(());
        }
        self.attempt_sync(now)
    }

    /// A sync whose delivery failure is already reported as an event.
    fn attempt_sync(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.sync_trips(now) {
            Ok(_) | Err(TripError::SyncFailure { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn sync_trips(&mut self, now: DateTime<Utc>) -> Result<FlushOutcome<TripRecord>> {
        let gate = self.gate();
        let result = self
            .trips
            .flush(&mut self.store, &mut self.transport, gate, now);

        match &result {
            Ok(FlushOutcome::Delivered(report)) => {
                if let Err(err) = self.history.append(&mut self.store, &report.delivered) {
                    tracing::warn!(error = %err, "Delivered trips not added to history");
                }
                self.retry.record_success();
                self.save_retry();
                self.events.push(CoreEvent::SyncSucceeded {
                    delivered: report.delivered.len(),
                    at: report.synced_at,
                });
            }
            Ok(FlushOutcome::Deferred(reason)) => {
                self.events.push(CoreEvent::SyncDeferred { reason: *reason });
            }
            Ok(FlushOutcome::Empty) | Ok(FlushOutcome::InFlight) => {}
            Err(TripError::SyncFailure { source }) => {
                self.retry.record_failure(now);
                self.save_retry();
                self.events.push(CoreEvent::SyncFailed {
                    reason: source.to_string(),
                });
            }
            Err(_) => {}
        }
        result
    }

    /// Retry spacing is advisory; losing it only changes when the next
    /// automatic attempt happens.
    fn save_retry(&mut self) {
        if let Err(err) = save_json(&mut self.store, keys::SYNC_FAILURES, &self.retry) {
            tracing::warn!(error = %err, "Failed to persist sync retry state");
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Preference Changes
    // ─────────────────────────────────────────────────────────────────────

    pub fn record_change(&mut self, kind: &str, data: Value) -> Result<String> {
        let now = self.now();
        self.changes.record(&mut self.store, kind, data, now)
    }

    pub fn sync_changes(&mut self) -> Result<FlushOutcome<PendingChange>> {
        let now = self.now();
        let gate = self.gate();
        self.changes
            .flush(&mut self.store, &mut self.transport, gate, now)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Settings & Housekeeping
    // ─────────────────────────────────────────────────────────────────────

    pub fn update_settings(&mut self, key: SettingKey, value: bool) -> Result<&DriverSettings> {
        let next = self.settings.with(key, value);
        next.save(&mut self.store)?;
        self.settings = next;
        tracing::info!(%key, value, "Setting saved");
        self.events.push(CoreEvent::SettingsSaved);
        Ok(&self.settings)
    }

    pub fn purge_history(&mut self, older_than: Duration) -> Result<usize> {
        let now = self.now();
        let removed = self.history.purge(&mut self.store, now, older_than)?;
        tracing::info!(removed, "Trip history purged");
        self.events.push(CoreEvent::HistoryPurged { removed });
        Ok(removed)
    }
}
