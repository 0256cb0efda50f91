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

//! One-shot bulk fetch that seeds the registry before streaming begins.

use log::info;
use serde::Deserialize;
use thiserror::Error;

use crate::protocol::AircraftUpdate;

/// Errors from the bulk seed fetch.
///
/// Seed failure is fatal for startup (unlike stream failures, which the
/// connection layer absorbs), so it propagates to the caller.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Deserialize)]
struct SeedResponse {
    #[serde(default)]
    data: Option<Vec<AircraftUpdate>>,
}

/// Fetch the current aircraft set from `{base_url}/api/aircraft`.
///
/// A missing `data` field is an empty set, not an error.
pub async fn fetch_aircraft(
    http: &reqwest::Client,
    base_url: &str,
) -> Result<Vec<AircraftUpdate>, SeedError> {
    let url = format!("{}/api/aircraft", base_url.trim_end_matches('/'));
    info!("fetching initial aircraft set from {}", url);

    let response = http.get(&url).send().await?;
    if !response.status().is_success() {
        return Err(SeedError::Status(response.status()));
    }

    let body: SeedResponse = response.json().await?;
    let aircraft = body.data.unwrap_or_default();
    info!("seeded {} aircraft", aircraft.len());
    Ok(aircraft)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_with_data() {
        let body: SeedResponse =
            serde_json::from_str(r#"{"data":[{"callsign":"QFA1","latitude":-33.9}]}"#).unwrap();

        let aircraft = body.data.unwrap();
        assert_eq!(aircraft.len(), 1);
        assert_eq!(aircraft[0].callsign, "QFA1");
    }

    #[test]
    fn test_missing_data_is_empty_set() {
        let body: SeedResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(body.data.unwrap_or_default().len(), 0);
    }

    #[test]
    fn test_null_data_is_empty_set() {
        let body: SeedResponse = serde_json::from_str(r#"{"data":null}"#).unwrap();
        assert_eq!(body.data.unwrap_or_default().len(), 0);
    }
}
