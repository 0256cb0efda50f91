// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Aircraft registry: the authoritative in-memory snapshot of tracked
//! aircraft plus selection and connection status.
//!
//! All state changes go through the enumerated mutation methods below; each
//! runs to completion under one `&mut self` call, so an observer holding a
//! read lock between calls never sees a partially-applied batch. Change
//! notifications go out on a broadcast channel, one event per affected
//! slice, so observers can react to just the slices they care about.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use tokio::sync::broadcast;

use crate::protocol::AircraftUpdate;

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Connection status of the live feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Vertical movement of an aircraft, derived from its vertical rate.
///
/// An absent or zero rate reads as level flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerticalTrend {
    Climbing,
    Descending,
    Level,
}

/// One tracked aircraft record, keyed by callsign.
#[derive(Debug, Clone, PartialEq)]
pub struct Aircraft {
    /// Callsign identifying the aircraft (case-sensitive, immutable).
    pub callsign: String,
    /// Current latitude in degrees.
    pub latitude: Option<f64>,
    /// Current longitude in degrees.
    pub longitude: Option<f64>,
    /// Current altitude in feet.
    pub altitude: Option<f64>,
    /// Heading in degrees (0-360, north = 0).
    pub heading: Option<f64>,
    /// Ground speed in knots.
    pub speed: Option<f64>,
    /// Vertical rate in feet per minute (positive = climb, negative = descend).
    pub vertical_rate: Option<f64>,
    /// When the registry last merged an update into this record. Stamped by
    /// the registry, never taken from the producer.
    pub last_updated: DateTime<Utc>,
}

impl Aircraft {
    fn new(callsign: String, now: DateTime<Utc>) -> Self {
        Self {
            callsign,
            latitude: None,
            longitude: None,
            altitude: None,
            heading: None,
            speed: None,
            vertical_rate: None,
            last_updated: now,
        }
    }

    fn from_update(update: &AircraftUpdate, now: DateTime<Utc>) -> Self {
        let mut aircraft = Self::new(update.callsign.clone(), now);
        aircraft.merge_from(update);
        aircraft
    }

    /// Merge an update into this record.
    ///
    /// Precedence: present incoming fields override, absent incoming fields
    /// preserve the prior value. The callsign never changes and
    /// `last_updated` is stamped by the registry, not here.
    pub fn merge_from(&mut self, update: &AircraftUpdate) {
        if let Some(v) = update.latitude {
            self.latitude = Some(v);
        }
        if let Some(v) = update.longitude {
            self.longitude = Some(v);
        }
        if let Some(v) = update.altitude {
            self.altitude = Some(v);
        }
        if let Some(v) = update.heading {
            self.heading = Some(v);
        }
        if let Some(v) = update.speed {
            self.speed = Some(v);
        }
        if let Some(v) = update.vertical_rate {
            self.vertical_rate = Some(v);
        }
    }

    /// Current position, if both coordinates are known.
    #[must_use]
    pub fn position(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    /// Vertical movement derived from the vertical rate.
    #[must_use]
    pub fn vertical_trend(&self) -> VerticalTrend {
        match self.vertical_rate {
            Some(rate) if rate > 0.0 => VerticalTrend::Climbing,
            Some(rate) if rate < 0.0 => VerticalTrend::Descending,
            _ => VerticalTrend::Level,
        }
    }
}

/// Events emitted by the registry when state changes.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A new aircraft was added to tracking.
    AircraftAdded(String),
    /// An existing aircraft received an update.
    AircraftUpdated(String),
    /// An aircraft was removed.
    AircraftRemoved(String),
    /// The selected aircraft changed (or was cleared).
    SelectionChanged(Option<String>),
    /// The feed connection status changed.
    StatusChanged(ConnectionStatus),
    /// The initial-load flag changed.
    LoadingChanged(bool),
    /// The last error message changed (or was cleared).
    ErrorChanged(Option<String>),
}

/// Registry of tracked aircraft with selection and connection status.
pub struct AircraftRegistry {
    aircraft: HashMap<String, Aircraft>,
    selected: Option<String>,
    connection_status: ConnectionStatus,
    loading: bool,
    last_error: Option<String>,
    event_tx: broadcast::Sender<RegistryEvent>,
}

impl std::fmt::Debug for AircraftRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AircraftRegistry")
            .field("aircraft_count", &self.aircraft.len())
            .field("selected", &self.selected)
            .field("connection_status", &self.connection_status)
            .field("loading", &self.loading)
            .finish_non_exhaustive()
    }
}

impl Default for AircraftRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AircraftRegistry {
    /// Create an empty registry.
    ///
    /// Starts with `loading` set, since consumers come up before the bulk
    /// seed completes; [`replace_all`](Self::replace_all) clears it.
    #[must_use]
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Create an empty registry with a specific event channel capacity.
    #[must_use]
    pub fn with_event_capacity(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self {
            aircraft: HashMap::new(),
            selected: None,
            connection_status: ConnectionStatus::Disconnected,
            loading: true,
            last_error: None,
            event_tx,
        }
    }

    fn emit(&self, event: RegistryEvent) {
        // Send fails only when no observer is subscribed.
        let _ = self.event_tx.send(event);
    }

    /// Clear the selection if it no longer resolves to a tracked aircraft.
    ///
    /// Run at the end of every mutation that can remove records, so the
    /// selection invariant is restored in the same atomic step.
    fn revalidate_selection(&mut self) {
        let dangling = self
            .selected
            .as_ref()
            .is_some_and(|selected| !self.aircraft.contains_key(selected));
        if dangling {
            debug!("clearing selection of departed aircraft {:?}", self.selected);
            self.selected = None;
            self.emit(RegistryEvent::SelectionChanged(None));
        }
    }

    /// Discard the current aircraft set and install the given one.
    ///
    /// Used by the one-shot bulk seed. Clears `loading` and drops a
    /// selection that no longer resolves.
    pub fn replace_all(&mut self, updates: &[AircraftUpdate]) {
        self.replace_all_at(updates, Utc::now());
    }

    /// [`replace_all`](Self::replace_all) with an injected timestamp.
    pub fn replace_all_at(&mut self, updates: &[AircraftUpdate], now: DateTime<Utc>) {
        let mut next: HashMap<String, Aircraft> = HashMap::with_capacity(updates.len());
        for update in updates {
            if update.callsign.is_empty() {
                warn!("skipping aircraft record with empty callsign");
                continue;
            }
            next.entry(update.callsign.clone())
                .and_modify(|aircraft| aircraft.merge_from(update))
                .or_insert_with(|| Aircraft::from_update(update, now));
        }

        for callsign in self.aircraft.keys() {
            if !next.contains_key(callsign) {
                self.emit(RegistryEvent::AircraftRemoved(callsign.clone()));
            }
        }
        for callsign in next.keys() {
            if self.aircraft.contains_key(callsign) {
                self.emit(RegistryEvent::AircraftUpdated(callsign.clone()));
            } else {
                self.emit(RegistryEvent::AircraftAdded(callsign.clone()));
            }
        }

        self.aircraft = next;
        self.set_loading(false);
        self.revalidate_selection();
    }

    /// Apply a batch of partial updates as one state transition.
    ///
    /// Per update, by callsign: merge onto the existing record (present
    /// fields win, absent fields preserve) or insert a new one. Updates
    /// apply in input order, so a later update to the same callsign in the
    /// same batch wins field-by-field. Every touched record gets
    /// `last_updated` stamped. Never removes records, so an existing
    /// selection stays valid.
    pub fn apply_delta(&mut self, updates: &[AircraftUpdate]) {
        self.apply_delta_at(updates, Utc::now());
    }

    /// [`apply_delta`](Self::apply_delta) with an injected timestamp, for
    /// deterministic tests and replays.
    pub fn apply_delta_at(&mut self, updates: &[AircraftUpdate], now: DateTime<Utc>) {
        for update in updates {
            if update.callsign.is_empty() {
                warn!("skipping aircraft update with empty callsign");
                continue;
            }
            let is_new = !self.aircraft.contains_key(&update.callsign);
            let aircraft = self
                .aircraft
                .entry(update.callsign.clone())
                .or_insert_with(|| Aircraft::new(update.callsign.clone(), now));
            aircraft.merge_from(update);
            aircraft.last_updated = now;

            if is_new {
                self.emit(RegistryEvent::AircraftAdded(update.callsign.clone()));
            } else {
                self.emit(RegistryEvent::AircraftUpdated(update.callsign.clone()));
            }
        }
    }

    /// Additive variant of [`apply_delta`](Self::apply_delta).
    ///
    /// Records whose callsign is already tracked are merged rather than
    /// duplicated; at most one record per callsign is invariant.
    pub fn add_aircraft(&mut self, updates: &[AircraftUpdate]) {
        self.apply_delta(updates);
    }

    /// Remove the given callsigns, clearing a matching selection.
    pub fn remove_aircraft(&mut self, callsigns: &[&str]) {
        for callsign in callsigns {
            if self.aircraft.remove(*callsign).is_some() {
                self.emit(RegistryEvent::AircraftRemoved((*callsign).to_string()));
            }
        }
        self.revalidate_selection();
    }

    /// Remove aircraft whose last update is older than `max_age_secs`.
    ///
    /// Returns the number of evicted records. Clears the selection if the
    /// selected aircraft is evicted.
    pub fn evict_stale(&mut self, max_age_secs: i64, now: DateTime<Utc>) -> usize {
        let stale: Vec<String> = self
            .aircraft
            .iter()
            .filter(|(_, a)| (now - a.last_updated).num_seconds() >= max_age_secs)
            .map(|(callsign, _)| callsign.clone())
            .collect();

        for callsign in &stale {
            self.aircraft.remove(callsign);
            self.emit(RegistryEvent::AircraftRemoved(callsign.clone()));
        }
        self.revalidate_selection();
        stale.len()
    }

    /// Select an aircraft by callsign, or clear the selection with `None`.
    ///
    /// Selecting a callsign that is not tracked clears the selection.
    pub fn select(&mut self, callsign: Option<&str>) {
        let next = callsign
            .filter(|c| self.aircraft.contains_key(*c))
            .map(str::to_string);
        if callsign.is_some() && next.is_none() {
            debug!("ignoring selection of unknown aircraft {:?}", callsign);
        }
        if next != self.selected {
            self.selected = next;
            self.emit(RegistryEvent::SelectionChanged(self.selected.clone()));
        }
    }

    /// Set the feed connection status.
    pub fn set_connection_status(&mut self, status: ConnectionStatus) {
        if status != self.connection_status {
            self.connection_status = status;
            self.emit(RegistryEvent::StatusChanged(status));
        }
    }

    /// Set the initial-load flag.
    pub fn set_loading(&mut self, loading: bool) {
        if loading != self.loading {
            self.loading = loading;
            self.emit(RegistryEvent::LoadingChanged(loading));
        }
    }

    /// Set or clear the last error message.
    pub fn set_error(&mut self, error: Option<String>) {
        if error != self.last_error {
            self.last_error = error;
            self.emit(RegistryEvent::ErrorChanged(self.last_error.clone()));
        }
    }

    /// Get all tracked aircraft. No ordering guarantee.
    #[must_use]
    pub fn aircraft(&self) -> Vec<&Aircraft> {
        self.aircraft.values().collect()
    }

    /// Get a specific aircraft by callsign.
    #[must_use]
    pub fn get(&self, callsign: &str) -> Option<&Aircraft> {
        self.aircraft.get(callsign)
    }

    /// The currently selected aircraft, resolved live by callsign so the
    /// snapshot always reflects the latest merge.
    #[must_use]
    pub fn selected(&self) -> Option<&Aircraft> {
        self.selected
            .as_deref()
            .and_then(|callsign| self.aircraft.get(callsign))
    }

    /// The selected callsign, if any.
    #[must_use]
    pub fn selected_callsign(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Current feed connection status.
    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection_status
    }

    /// Whether the initial bulk load is still pending.
    #[must_use]
    pub fn loading(&self) -> bool {
        self.loading
    }

    /// The last error message, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Number of tracked aircraft.
    #[must_use]
    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    /// Check if there are no tracked aircraft.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }

    /// Subscribe to registry change events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }
}
