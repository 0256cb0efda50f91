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

//! Protocol layer for aircraft feed message parsing.
//!
//! This module provides a trait-based abstraction for extensible protocol
//! support. Currently implements the JSON event-frame format used by the
//! live feed server.

mod event_frame;

pub use event_frame::EventFrameParser;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during message parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid value for field '{field}': {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// A partial aircraft record as it appears on the wire.
///
/// Every field except `callsign` is optional; a frame may carry any subset
/// and the registry merges present fields onto the existing record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AircraftUpdate {
    /// Callsign identifying the aircraft (case-sensitive).
    pub callsign: String,
    /// Latitude in degrees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    /// Longitude in degrees.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Altitude in feet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    /// Heading in degrees (0-360, north = 0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    /// Ground speed in knots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    /// Vertical rate in feet per minute (positive = climb, negative = descend).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertical_rate: Option<f64>,
}

impl AircraftUpdate {
    /// Check that every present field holds a plausible value.
    ///
    /// Returns the first offending field. Absent fields are always valid;
    /// partial updates are the normal case.
    pub fn validate(&self) -> Result<(), ParseError> {
        fn check(
            field: &'static str,
            value: Option<f64>,
            valid: impl Fn(f64) -> bool,
        ) -> Result<(), ParseError> {
            match value {
                Some(v) if !v.is_finite() || !valid(v) => Err(ParseError::InvalidValue {
                    field,
                    value: v.to_string(),
                }),
                _ => Ok(()),
            }
        }

        if self.callsign.is_empty() {
            return Err(ParseError::MissingField("callsign"));
        }
        check("latitude", self.latitude, |v| (-90.0..=90.0).contains(&v))?;
        check("longitude", self.longitude, |v| {
            (-180.0..=180.0).contains(&v)
        })?;
        check("altitude", self.altitude, |v| v >= 0.0)?;
        check("heading", self.heading, |v| (0.0..=360.0).contains(&v))?;
        check("speed", self.speed, |v| v >= 0.0)?;
        check("vertical_rate", self.vertical_rate, |_| true)?;
        Ok(())
    }
}

/// Trait for protocol parsers.
///
/// Implement this trait to add support for new feed formats.
pub trait Protocol {
    /// The message type produced by this parser.
    type Message;
    /// The error type for parsing failures.
    type Error;

    /// Parse input bytes into a message.
    ///
    /// Returns `Ok(Some(message))` if parsing succeeded,
    /// `Ok(None)` if the input is valid but doesn't produce a message,
    /// or `Err(error)` if parsing failed.
    fn parse(&mut self, input: &[u8]) -> Result<Option<Self::Message>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(callsign: &str) -> AircraftUpdate {
        AircraftUpdate {
            callsign: callsign.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_partial_update_deserializes_with_absent_fields() {
        let update: AircraftUpdate =
            serde_json::from_str(r#"{"callsign":"QFA1","altitude":35000}"#).unwrap();

        assert_eq!(update.callsign, "QFA1");
        assert_eq!(update.altitude, Some(35000.0));
        assert_eq!(update.latitude, None);
        assert_eq!(update.vertical_rate, None);
    }

    #[test]
    fn test_vertical_rate_wire_name() {
        let update: AircraftUpdate =
            serde_json::from_str(r#"{"callsign":"QFA1","vertical_rate":-1200}"#).unwrap();

        assert_eq!(update.vertical_rate, Some(-1200.0));
    }

    #[test]
    fn test_validate_accepts_boundary_values() {
        let mut u = update("QFA1");
        u.latitude = Some(-90.0);
        u.longitude = Some(180.0);
        u.heading = Some(360.0);
        u.altitude = Some(0.0);
        u.vertical_rate = Some(-2000.0);

        assert!(u.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_latitude() {
        let mut u = update("QFA1");
        u.latitude = Some(91.0);

        assert!(matches!(
            u.validate(),
            Err(ParseError::InvalidValue {
                field: "latitude",
                ..
            })
        ));
    }

    #[test]
    fn test_validate_rejects_negative_speed() {
        let mut u = update("QFA1");
        u.speed = Some(-1.0);

        assert!(u.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_callsign() {
        assert!(matches!(
            update("").validate(),
            Err(ParseError::MissingField("callsign"))
        ));
    }
}
