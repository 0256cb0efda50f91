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

//! Headless monitor for a live aircraft position feed.
//!
//! Seeds the registry with a one-shot bulk fetch, then follows the live
//! WebSocket feed and renders registry state as log output: status
//! transitions, aircraft arrivals and departures, and a periodic summary.

mod config;

use std::time::Duration;

use clap::Parser;
use log::{debug, error, info, warn};
use tokio::sync::broadcast::error::RecvError;

use config::AppConfig;
use flightfeed::{seed, Client, ClientConfig, ConnectionConfig, RegistryEvent};

#[derive(Parser, Debug)]
#[command(name = "skywatch", version, about = "Live aircraft position feed monitor")]
struct Args {
    /// Base URL of the aircraft API used for the initial bulk fetch
    #[arg(long, env = "API_URL")]
    api_url: Option<String>,

    /// WebSocket URL of the live aircraft feed
    #[arg(long, env = "WS_URL")]
    stream_url: Option<String>,

    /// Give up after this many consecutive failed reconnect attempts
    #[arg(long)]
    max_reconnect_attempts: Option<u32>,

    /// Evict aircraft not updated for this many seconds
    #[arg(long)]
    stale_timeout_secs: Option<u64>,

    /// Seconds between registry summary log lines
    #[arg(long, default_value_t = 10)]
    summary_interval_secs: u64,
}

/// Subscribe to registry changes and log them; this is the render surface
/// of the headless app.
fn spawn_monitor(client: &Client, summary_interval: Duration) {
    let mut events = client.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RegistryEvent::StatusChanged(status)) => {
                    info!("feed status: {:?}", status);
                }
                Ok(RegistryEvent::AircraftAdded(callsign)) => {
                    debug!("aircraft added: {}", callsign);
                }
                Ok(RegistryEvent::AircraftRemoved(callsign)) => {
                    debug!("aircraft removed: {}", callsign);
                }
                Ok(RegistryEvent::SelectionChanged(selected)) => {
                    debug!("selection: {:?}", selected);
                }
                Ok(RegistryEvent::LoadingChanged(loading)) => {
                    debug!("loading: {}", loading);
                }
                Ok(RegistryEvent::ErrorChanged(Some(message))) => {
                    warn!("feed error: {}", message);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("monitor lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => return,
            }
        }
    });

    let registry = client.registry();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(summary_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Ok(registry) = registry.read() {
                info!(
                    "tracking {} aircraft ({:?})",
                    registry.len(),
                    registry.connection_status()
                );
            }
        }
    });
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!("failed to load config, using defaults: {}", e);
        AppConfig::default()
    });
    if let Some(api_url) = args.api_url {
        config.api_url = api_url;
    }
    if let Some(stream_url) = args.stream_url {
        config.stream_url = stream_url;
    }
    if let Some(max_attempts) = args.max_reconnect_attempts {
        config.max_reconnect_attempts = max_attempts;
    }
    if let Some(stale_timeout) = args.stale_timeout_secs {
        config.stale_timeout_secs = Some(stale_timeout);
    }
    if let Ok(path) = AppConfig::get_config_path() {
        info!("config file: {}", path.display());
    }

    let mut client = Client::spawn(ClientConfig {
        connection: ConnectionConfig {
            url: config.stream_url.clone(),
            retry: config.retry_policy(),
            ..Default::default()
        },
        stale_timeout: config.stale_timeout_secs.map(Duration::from_secs),
        ..Default::default()
    });

    spawn_monitor(&client, Duration::from_secs(args.summary_interval_secs));

    // One-shot bulk seed before streaming takes over. Stream failures are
    // absorbed by the reconnect machinery; a failed seed is fatal.
    let http = reqwest::Client::new();
    match seed::fetch_aircraft(&http, &config.api_url).await {
        Ok(aircraft) => client.replace_all(&aircraft),
        Err(e) => {
            client.set_error(Some(e.to_string()));
            error!("failed to load initial aircraft data: {}", e);
            std::process::exit(1);
        }
    }

    tokio::select! {
        () = client.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }
    client.shutdown();
}
