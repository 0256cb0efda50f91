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

//! WebSocket connection layer with bounded automatic reconnection.
//!
//! Provides a connection handle that manages one logical WebSocket session
//! to a feed server: exponential backoff between reconnect attempts, a
//! terminal give-up state after the attempt budget is spent, an explicit
//! reconnect request to revive a given-up connection, and graceful shutdown.

use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tokio_util::sync::CancellationToken;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Reconnect backoff policy.
///
/// Delay before attempt `n` is `min(base_delay * 2^n, cap_delay)`; after
/// `max_attempts` consecutive failures the connection gives up.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
    /// Upper bound on the backoff delay.
    pub cap_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_millis(1000),
            cap_delay: Duration::from_millis(30000),
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before reconnect attempt `attempt` (0-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.cap_delay)
    }
}

/// Configuration for the feed connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL of the feed server.
    pub url: String,
    /// Reconnect backoff policy.
    pub retry: RetryPolicy,
    /// Bound on a single handshake attempt.
    pub connect_timeout: Duration,
    /// Channel buffer size for received frames.
    pub buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3001".to_string(),
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            buffer_size: 1024,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Attempting a handshake.
    Connecting,
    /// Session established.
    Connected,
    /// Session ended normally (a reconnect will follow).
    Disconnected,
    /// Session failed (a reconnect will follow if attempts remain).
    Error(String),
    /// Attempt budget spent; no further automatic reconnects. Only
    /// [`Connection::reconnect`] leaves this state.
    GaveUp,
}

/// Events emitted by the connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Connection state changed.
    StateChanged(ConnectionState),
    /// One text frame received, undecoded.
    DataReceived(Vec<u8>),
}

/// Handle to a managed feed connection.
///
/// The connection runs in a background task and reconnects on disconnect
/// with exponential backoff until the attempt budget is spent. Use `recv()`
/// to receive events, `reconnect()` to reset the budget and force a new
/// attempt, and `shutdown()` (or drop) to tear everything down, including a
/// pending reconnect timer.
pub struct Connection {
    event_rx: mpsc::Receiver<ConnectionEvent>,
    reconnect_tx: watch::Sender<u32>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("cancel_token", &self.cancel_token)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Spawn a new connection task with the given configuration.
    #[must_use]
    pub fn spawn(config: ConnectionConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(config.buffer_size);
        let (reconnect_tx, reconnect_rx) = watch::channel(0u32);
        let cancel_token = CancellationToken::new();

        let task_cancel = cancel_token.clone();
        tokio::spawn(async move {
            connection_loop(config, event_tx, reconnect_rx, task_cancel).await;
        });

        Self {
            event_rx,
            reconnect_tx,
            cancel_token,
        }
    }

    /// Receive the next event from the connection.
    ///
    /// Returns `None` once the connection has shut down.
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.event_rx.recv().await
    }

    /// Request a reconnect: resets the attempt budget, skips a pending
    /// backoff delay, and revives a connection that has given up.
    pub fn reconnect(&self) {
        self.reconnect_tx.send_modify(|gen| *gen = gen.wrapping_add(1));
    }

    /// Shut down the connection and cancel any pending reconnect timer.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

enum SessionEnd {
    /// Server closed the session or the stream ended.
    Closed,
    /// Shutdown requested or the event receiver went away.
    Cancelled,
}

async fn connection_loop(
    config: ConnectionConfig,
    event_tx: mpsc::Sender<ConnectionEvent>,
    mut reconnect_rx: watch::Receiver<u32>,
    cancel_token: CancellationToken,
) {
    let mut attempts: u32 = 0;

    loop {
        if cancel_token.is_cancelled() {
            info!("connection cancelled");
            return;
        }

        if event_tx
            .send(ConnectionEvent::StateChanged(ConnectionState::Connecting))
            .await
            .is_err()
        {
            return; // Receiver dropped
        }

        info!("connecting to {}...", config.url);

        match run_session(&config, &event_tx, &cancel_token, &mut attempts).await {
            Ok(SessionEnd::Cancelled) => {
                info!("connection cancelled");
                return;
            }
            Ok(SessionEnd::Closed) => {
                info!("connection closed by server");
                if event_tx
                    .send(ConnectionEvent::StateChanged(ConnectionState::Disconnected))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            Err(e) => {
                error!("connection error: {}", e);
                if event_tx
                    .send(ConnectionEvent::StateChanged(ConnectionState::Error(
                        e.to_string(),
                    )))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }

        if attempts >= config.retry.max_attempts {
            error!(
                "giving up after {} failed reconnect attempts",
                config.retry.max_attempts
            );
            if event_tx
                .send(ConnectionEvent::StateChanged(ConnectionState::GaveUp))
                .await
                .is_err()
            {
                return;
            }

            // Terminal: no timer is armed. Only an explicit reconnect
            // request (or shutdown) leaves this state.
            tokio::select! {
                () = cancel_token.cancelled() => {
                    info!("connection cancelled");
                    return;
                }
                changed = reconnect_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    info!("manual reconnect requested");
                    attempts = 0;
                }
            }
            continue;
        }

        let delay = config.retry.delay_for(attempts);
        attempts += 1;
        warn!(
            "reconnecting in {:?} (attempt {} of {})",
            delay, attempts, config.retry.max_attempts
        );

        tokio::select! {
            () = sleep(delay) => {}
            () = cancel_token.cancelled() => {
                info!("connection cancelled during reconnect delay");
                return;
            }
            changed = reconnect_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                info!("manual reconnect requested, skipping backoff");
                attempts = 0;
            }
        }
    }
}

async fn run_session(
    config: &ConnectionConfig,
    event_tx: &mpsc::Sender<ConnectionEvent>,
    cancel_token: &CancellationToken,
    attempts: &mut u32,
) -> Result<SessionEnd, BoxError> {
    let handshake = timeout(config.connect_timeout, connect_async(config.url.as_str()));
    let handshake_result = tokio::select! {
        res = handshake => res,
        () = cancel_token.cancelled() => return Ok(SessionEnd::Cancelled),
    };
    let (mut ws, _response) = match handshake_result {
        Ok(Ok(established)) => established,
        Ok(Err(e)) => return Err(Box::new(e)),
        Err(_) => return Err("handshake timed out".into()),
    };

    info!("connected to {}", config.url);

    if event_tx
        .send(ConnectionEvent::StateChanged(ConnectionState::Connected))
        .await
        .is_err()
    {
        return Ok(SessionEnd::Cancelled);
    }
    *attempts = 0;

    loop {
        tokio::select! {
            frame = ws.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if event_tx
                            .send(ConnectionEvent::DataReceived(text.as_bytes().to_vec()))
                            .await
                            .is_err()
                        {
                            return Ok(SessionEnd::Cancelled);
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!("ignoring binary frame ({} bytes)", data.len());
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Ok(SessionEnd::Closed);
                    }
                    // Ping/pong are handled at the protocol level.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(Box::new(e));
                    }
                }
            }

            () = cancel_token.cancelled() => {
                let _ = ws.close(None).await;
                return Ok(SessionEnd::Cancelled);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::SinkExt;
    use tokio::net::TcpListener;

    /// Retry policy tuned so failing tests finish in milliseconds.
    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            cap_delay: Duration::from_millis(5),
        }
    }

    async fn next_event(conn: &mut Connection) -> ConnectionEvent {
        timeout(Duration::from_secs(5), conn.recv())
            .await
            .expect("timed out waiting for connection event")
            .expect("event channel closed")
    }

    /// An address with nothing listening on it.
    async fn dead_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{}", addr)
    }

    #[test]
    fn test_backoff_delay_sequence() {
        let policy = RetryPolicy::default();

        let delays: Vec<u64> = (0..5)
            .map(|attempt| policy.delay_for(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);

        for attempt in 5..8 {
            assert_eq!(policy.delay_for(attempt), Duration::from_millis(30000));
        }
    }

    #[test]
    fn test_backoff_delay_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(64), Duration::from_millis(30000));
    }

    #[tokio::test]
    async fn test_session_lifecycle_delivers_frames_and_states() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::text(r#"{"event":"aircraft_update","data":[]}"#))
                .await
                .unwrap();
            ws.send(Message::text(r#"{"event":"heartbeat"}"#))
                .await
                .unwrap();
            ws.close(None).await.unwrap();
        });

        let mut conn = Connection::spawn(ConnectionConfig {
            url: format!("ws://{}", addr),
            retry: fast_retry(0),
            ..Default::default()
        });

        assert!(matches!(
            next_event(&mut conn).await,
            ConnectionEvent::StateChanged(ConnectionState::Connecting)
        ));
        assert!(matches!(
            next_event(&mut conn).await,
            ConnectionEvent::StateChanged(ConnectionState::Connected)
        ));
        assert!(matches!(
            next_event(&mut conn).await,
            ConnectionEvent::DataReceived(data)
                if data == br#"{"event":"aircraft_update","data":[]}"#
        ));
        assert!(matches!(
            next_event(&mut conn).await,
            ConnectionEvent::DataReceived(_)
        ));
        assert!(matches!(
            next_event(&mut conn).await,
            ConnectionEvent::StateChanged(ConnectionState::Disconnected)
        ));

        server.await.unwrap();
        conn.shutdown();
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts_then_manual_reconnect_revives() {
        let mut conn = Connection::spawn(ConnectionConfig {
            url: dead_addr().await,
            retry: fast_retry(2),
            ..Default::default()
        });

        // Initial attempt plus two retries, each Connecting -> Error.
        for _ in 0..3 {
            assert!(matches!(
                next_event(&mut conn).await,
                ConnectionEvent::StateChanged(ConnectionState::Connecting)
            ));
            assert!(matches!(
                next_event(&mut conn).await,
                ConnectionEvent::StateChanged(ConnectionState::Error(_))
            ));
        }
        assert!(matches!(
            next_event(&mut conn).await,
            ConnectionEvent::StateChanged(ConnectionState::GaveUp)
        ));

        // Terminal: no timer fires after this point.
        assert!(timeout(Duration::from_millis(100), conn.recv())
            .await
            .is_err());

        conn.reconnect();
        assert!(matches!(
            next_event(&mut conn).await,
            ConnectionEvent::StateChanged(ConnectionState::Connecting)
        ));

        conn.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_during_backoff_cancels_pending_retry() {
        let mut conn = Connection::spawn(ConnectionConfig {
            url: dead_addr().await,
            retry: RetryPolicy {
                max_attempts: 10,
                base_delay: Duration::from_secs(60),
                cap_delay: Duration::from_secs(60),
            },
            ..Default::default()
        });

        assert!(matches!(
            next_event(&mut conn).await,
            ConnectionEvent::StateChanged(ConnectionState::Connecting)
        ));
        assert!(matches!(
            next_event(&mut conn).await,
            ConnectionEvent::StateChanged(ConnectionState::Error(_))
        ));

        // Now parked in a 60s backoff; shutdown must cancel it promptly.
        conn.shutdown();
        let closed = timeout(Duration::from_secs(5), conn.recv()).await;
        assert!(matches!(closed, Ok(None)));
    }

    #[tokio::test]
    async fn test_manual_reconnect_skips_backoff() {
        let mut conn = Connection::spawn(ConnectionConfig {
            url: dead_addr().await,
            retry: RetryPolicy {
                max_attempts: 10,
                base_delay: Duration::from_secs(60),
                cap_delay: Duration::from_secs(60),
            },
            ..Default::default()
        });

        assert!(matches!(
            next_event(&mut conn).await,
            ConnectionEvent::StateChanged(ConnectionState::Connecting)
        ));
        assert!(matches!(
            next_event(&mut conn).await,
            ConnectionEvent::StateChanged(ConnectionState::Error(_))
        ));

        conn.reconnect();
        assert!(matches!(
            next_event(&mut conn).await,
            ConnectionEvent::StateChanged(ConnectionState::Connecting)
        ));

        conn.shutdown();
    }
}
