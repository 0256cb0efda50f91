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

//! JSON event-frame parser.
//!
//! Parses the envelope format emitted by the live feed server:
//!
//! ```text
//! { "event": "aircraft_update", "data": [ { "callsign": "QFA1", ... }, ... ] }
//! ```
//!
//! Frames with any other `event` value are recognized and ignored; frames
//! that are not valid JSON or lack `data` are parse errors. Either way the
//! caller drops the frame and keeps reading — a bad frame never ends the
//! session.

use log::{debug, warn};
use serde::Deserialize;

use super::{AircraftUpdate, ParseError, Protocol};

/// Event name carrying aircraft position updates.
const AIRCRAFT_UPDATE_EVENT: &str = "aircraft_update";

/// Raw frame envelope, decoded before the event type is known.
#[derive(Debug, Deserialize)]
struct RawFrame {
    event: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Parser for JSON event frames.
#[derive(Debug, Default)]
pub struct EventFrameParser;

impl EventFrameParser {
    /// Create a new event-frame parser.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Protocol for EventFrameParser {
    type Message = Vec<AircraftUpdate>;
    type Error = ParseError;

    fn parse(&mut self, input: &[u8]) -> Result<Option<Vec<AircraftUpdate>>, ParseError> {
        let frame: RawFrame = serde_json::from_slice(input)?;

        if frame.event != AIRCRAFT_UPDATE_EVENT {
            debug!("ignoring frame with event '{}'", frame.event);
            return Ok(None);
        }

        let data = frame.data.ok_or(ParseError::MissingField("data"))?;
        let updates: Vec<AircraftUpdate> = serde_json::from_value(data)?;

        // Per-element validation: a bad element drops out of the batch
        // without taking the rest of the frame with it.
        let mut valid = Vec::with_capacity(updates.len());
        for update in updates {
            match update.validate() {
                Ok(()) => valid.push(update),
                Err(e) => warn!("dropping invalid aircraft update: {}", e),
            }
        }

        Ok(Some(valid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Result<Option<Vec<AircraftUpdate>>, ParseError> {
        EventFrameParser::new().parse(input.as_bytes())
    }

    #[test]
    fn test_parse_aircraft_update_frame() {
        let batch = parse(
            r#"{"event":"aircraft_update","data":[
                {"callsign":"QFA1","latitude":-33.9,"longitude":151.2,"altitude":35000,
                 "heading":270,"speed":450,"vertical_rate":-500},
                {"callsign":"UAL123","speed":430}
            ]}"#,
        )
        .unwrap()
        .unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].callsign, "QFA1");
        assert_eq!(batch[0].latitude, Some(-33.9));
        assert_eq!(batch[0].vertical_rate, Some(-500.0));
        assert_eq!(batch[1].callsign, "UAL123");
        assert_eq!(batch[1].latitude, None);
    }

    #[test]
    fn test_unknown_event_is_ignored_not_an_error() {
        assert!(parse(r#"{"event":"heartbeat","data":{}}"#).unwrap().is_none());
        assert!(parse(r#"{"event":"unknown"}"#).unwrap().is_none());
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(matches!(parse("not json"), Err(ParseError::Json(_))));
    }

    #[test]
    fn test_missing_data_is_an_error() {
        assert!(matches!(
            parse(r#"{"event":"aircraft_update"}"#),
            Err(ParseError::MissingField("data"))
        ));
    }

    #[test]
    fn test_non_array_data_is_an_error() {
        assert!(matches!(
            parse(r#"{"event":"aircraft_update","data":42}"#),
            Err(ParseError::Json(_))
        ));
    }

    #[test]
    fn test_out_of_range_element_drops_only_that_element() {
        let batch = parse(
            r#"{"event":"aircraft_update","data":[
                {"callsign":"QFA1","latitude":95.0},
                {"callsign":"UAL123","latitude":37.6}
            ]}"#,
        )
        .unwrap()
        .unwrap();

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].callsign, "UAL123");
    }

    #[test]
    fn test_empty_batch_is_valid() {
        let batch = parse(r#"{"event":"aircraft_update","data":[]}"#)
            .unwrap()
            .unwrap();
        assert!(batch.is_empty());
    }
}
