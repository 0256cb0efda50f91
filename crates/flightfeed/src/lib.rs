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

//! Client library for consuming live aircraft position feeds.
//!
//! This library provides a modular architecture for receiving and tracking
//! live aircraft data. It supports multiple layers that can be used
//! independently or composed together:
//!
//! - **Protocol layer**: JSON event-frame decoding and validation
//! - **Registry layer**: aircraft state, merge semantics, selection, and
//!   connection status
//! - **Connection layer**: async WebSocket with bounded exponential-backoff
//!   reconnection
//! - **Seed layer**: the one-shot HTTP bulk fetch that populates the
//!   registry before streaming begins
//!
//! # Quick Start
//!
//! Use the [`Client`] type for full-stack operation:
//!
//! ```no_run
//! use flightfeed::{Client, ClientConfig, ConnectionConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut client = Client::spawn(ClientConfig {
//!         connection: ConnectionConfig {
//!             url: "ws://localhost:3001".to_string(),
//!             ..Default::default()
//!         },
//!         ..Default::default()
//!     });
//!
//!     let registry = client.registry();
//!     tokio::spawn(async move {
//!         loop {
//!             if let Ok(registry) = registry.read() {
//!                 println!("tracking {} aircraft", registry.len());
//!             }
//!             tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!         }
//!     });
//!
//!     client.run().await;
//! }
//! ```
//!
//! # Using Individual Layers
//!
//! ## Protocol Layer Only
//!
//! ```
//! use flightfeed::protocol::{EventFrameParser, Protocol};
//!
//! let mut parser = EventFrameParser::new();
//! let frame = br#"{"event":"aircraft_update","data":[{"callsign":"QFA1"}]}"#;
//! if let Ok(Some(batch)) = parser.parse(frame) {
//!     println!("got {} updates", batch.len());
//! }
//! ```
//!
//! ## Registry Layer Only
//!
//! ```
//! use flightfeed::registry::AircraftRegistry;
//! use flightfeed::protocol::AircraftUpdate;
//!
//! let mut registry = AircraftRegistry::new();
//! registry.apply_delta(&[AircraftUpdate {
//!     callsign: "QFA1".to_string(),
//!     latitude: Some(-33.9),
//!     longitude: Some(151.2),
//!     ..Default::default()
//! }]);
//!
//! println!("tracking {} aircraft", registry.len());
//! ```

pub mod protocol;
pub mod registry;
pub mod seed;
pub mod ws;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use log::warn;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub use protocol::{AircraftUpdate, EventFrameParser, ParseError, Protocol};
pub use registry::{Aircraft, AircraftRegistry, ConnectionStatus, RegistryEvent, VerticalTrend};
pub use seed::{fetch_aircraft, SeedError};
pub use ws::{Connection, ConnectionConfig, ConnectionEvent, ConnectionState, RetryPolicy};

/// Configuration for the full-stack client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection configuration.
    pub connection: ConnectionConfig,
    /// Evict aircraft not updated for this long. `None` (the default) keeps
    /// records forever, matching the behavior of a feed that never issues
    /// removals.
    pub stale_timeout: Option<Duration>,
    /// How often the eviction task runs, when `stale_timeout` is set.
    pub eviction_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            stale_timeout: None,
            eviction_interval: Duration::from_secs(30),
        }
    }
}

/// Full-stack feed client that wires all layers together.
///
/// The client manages a WebSocket connection, parses incoming event frames,
/// and maintains aircraft state in a registry. It drives the registry
/// through `apply_delta` and `set_connection_status` only — the merge
/// policy stays in the registry, where it is independently testable.
pub struct Client {
    registry: Arc<RwLock<AircraftRegistry>>,
    connection: Connection,
    parser: EventFrameParser,
    tasks_cancel: CancellationToken,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

/// Registry status for a connection-layer state.
fn status_for(state: &ConnectionState) -> ConnectionStatus {
    match state {
        ConnectionState::Connecting => ConnectionStatus::Connecting,
        ConnectionState::Connected => ConnectionStatus::Connected,
        ConnectionState::Disconnected => ConnectionStatus::Disconnected,
        ConnectionState::Error(_) | ConnectionState::GaveUp => ConnectionStatus::Error,
    }
}

impl Client {
    /// Spawn a new client with the given configuration.
    ///
    /// Starts the background connection task and, if a stale timeout is
    /// configured, a periodic eviction task.
    #[must_use]
    pub fn spawn(config: ClientConfig) -> Self {
        let registry = Arc::new(RwLock::new(AircraftRegistry::new()));
        let connection = Connection::spawn(config.connection);
        let tasks_cancel = CancellationToken::new();

        if let Some(stale_timeout) = config.stale_timeout {
            let max_age_secs = stale_timeout.as_secs() as i64;
            let registry = Arc::clone(&registry);
            let cancel = tasks_cancel.clone();
            let eviction_interval = config.eviction_interval;

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(eviction_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            if let Ok(mut registry) = registry.write() {
                                registry.evict_stale(max_age_secs, Utc::now());
                            }
                        }
                        () = cancel.cancelled() => return,
                    }
                }
            });
        }

        Self {
            registry,
            connection,
            parser: EventFrameParser::new(),
            tasks_cancel,
        }
    }

    /// Process the next event from the connection.
    ///
    /// Returns `false` once the connection has shut down. A frame that
    /// fails to decode is dropped with a warning; it never stops the loop.
    pub async fn process_next(&mut self) -> bool {
        let Some(event) = self.connection.recv().await else {
            return false;
        };

        match event {
            ConnectionEvent::StateChanged(state) => {
                if let Ok(mut registry) = self.registry.write() {
                    registry.set_connection_status(status_for(&state));
                }
            }
            ConnectionEvent::DataReceived(data) => match self.parser.parse(&data) {
                Ok(Some(batch)) => {
                    if let Ok(mut registry) = self.registry.write() {
                        registry.apply_delta(&batch);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("dropping undecodable frame: {}", e);
                }
            },
        }

        true
    }

    /// Process connection events until shutdown.
    pub async fn run(&mut self) {
        while self.process_next().await {}
    }

    /// Shared handle to the registry.
    #[must_use]
    pub fn registry(&self) -> Arc<RwLock<AircraftRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Subscribe to registry change events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.registry
            .read()
            .map(|registry| registry.subscribe())
            .unwrap_or_else(|_| {
                let (tx, rx) = broadcast::channel(1);
                drop(tx);
                rx
            })
    }

    /// Get all tracked aircraft.
    #[must_use]
    pub fn aircraft(&self) -> Vec<Aircraft> {
        self.registry
            .read()
            .map(|registry| registry.aircraft().into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Get a specific aircraft by callsign.
    #[must_use]
    pub fn get(&self, callsign: &str) -> Option<Aircraft> {
        self.registry
            .read()
            .ok()
            .and_then(|registry| registry.get(callsign).cloned())
    }

    /// Number of tracked aircraft.
    #[must_use]
    pub fn aircraft_count(&self) -> usize {
        self.registry.read().map(|registry| registry.len()).unwrap_or(0)
    }

    /// Current feed connection status.
    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        self.registry
            .read()
            .map(|registry| registry.connection_status())
            .unwrap_or(ConnectionStatus::Disconnected)
    }

    /// Install a full aircraft set from the bulk seed, clearing the
    /// loading flag.
    pub fn replace_all(&self, updates: &[AircraftUpdate]) {
        if let Ok(mut registry) = self.registry.write() {
            registry.replace_all(updates);
        }
    }

    /// Select an aircraft by callsign, or clear the selection.
    pub fn select(&self, callsign: Option<&str>) {
        if let Ok(mut registry) = self.registry.write() {
            registry.select(callsign);
        }
    }

    /// Set the initial-load flag.
    pub fn set_loading(&self, loading: bool) {
        if let Ok(mut registry) = self.registry.write() {
            registry.set_loading(loading);
        }
    }

    /// Set or clear the last error message.
    pub fn set_error(&self, error: Option<String>) {
        if let Ok(mut registry) = self.registry.write() {
            registry.set_error(error);
        }
    }

    /// Request a reconnect, reviving a connection that has given up.
    pub fn reconnect(&self) {
        self.connection.reconnect();
    }

    /// Shut down the connection and background tasks.
    pub fn shutdown(&self) {
        self.connection.shutdown();
        self.tasks_cancel.cancel();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.tasks_cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&ConnectionState::Connecting),
            ConnectionStatus::Connecting
        );
        assert_eq!(
            status_for(&ConnectionState::Connected),
            ConnectionStatus::Connected
        );
        assert_eq!(
            status_for(&ConnectionState::Disconnected),
            ConnectionStatus::Disconnected
        );
        assert_eq!(
            status_for(&ConnectionState::Error("boom".to_string())),
            ConnectionStatus::Error
        );
        assert_eq!(status_for(&ConnectionState::GaveUp), ConnectionStatus::Error);
    }

    #[tokio::test]
    async fn test_spawned_client_starts_loading_and_empty() {
        let client = Client::spawn(ClientConfig::default());

        let registry = client.registry();
        {
            let registry = registry.read().unwrap();
            assert!(registry.loading());
            assert!(registry.is_empty());
        }

        client.replace_all(&[]);
        assert!(!registry.read().unwrap().loading());

        client.shutdown();
    }
}
