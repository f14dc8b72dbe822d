//! Real-time event envelope and typed payloads.
//!
//! Every event travels as a JSON object of the form
//!
//! ```json
//! {"type": "seatUpdate", "channel": "seatUpdate:42", "data": {...}, "timestamp": "2025-01-01T12:00:00Z"}
//! ```
//!
//! where `data` has the payload shape selected by `type`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Kind of real-time event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    /// A fare price changed for a search.
    PriceTick,
    /// A seat on a flight changed status.
    SeatUpdate,
    /// A booking moved to a new status.
    BookingStatus,
}

impl EventType {
    /// Wire name of the event type, also used as the channel prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PriceTick => "priceTick",
            EventType::SeatUpdate => "seatUpdate",
            EventType::BookingStatus => "bookingStatus",
        }
    }

    /// Build the channel name `"<type>:<scope>"` for this event type.
    ///
    /// Numeric scopes are rendered in decimal, so flight 42 becomes
    /// `seatUpdate:42`.
    pub fn channel(&self, scope: impl fmt::Display) -> String {
        format!("{}:{}", self.as_str(), scope)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "priceTick" => Ok(EventType::PriceTick),
            "seatUpdate" => Ok(EventType::SeatUpdate),
            "bookingStatus" => Ok(EventType::BookingStatus),
            other => Err(Error::InvalidMessage(format!("unknown event type: {other}"))),
        }
    }
}

/// A fare price change for a cached search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    /// Hash identifying the search the fare belongs to.
    pub search_hash: String,
    pub flight_id: u64,
    pub fare_id: u64,
    pub old_price: f64,
    pub new_price: f64,
    /// ISO 4217 currency code.
    pub currency: String,
}

/// Seat availability states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatStatus {
    Available,
    Occupied,
    Blocked,
    Selected,
}

/// A seat status change on a flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatUpdate {
    pub flight_id: u64,
    pub seat_id: u64,
    pub status: SeatStatus,
    pub row: i32,
    /// Seat letter within the row.
    pub column: String,
    /// Cabin class (economy, business, first).
    pub class: String,
}

/// Booking lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingState {
    Hold,
    Paid,
    Ticketed,
    Cancelled,
}

/// A booking status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingStatus {
    pub booking_id: u64,
    /// Passenger name record locator.
    pub pnr: String,
    pub status: BookingState,
    /// Human readable detail, omitted from the wire when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Type-specific event data.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    PriceTick(PriceTick),
    SeatUpdate(SeatUpdate),
    BookingStatus(BookingStatus),
}

impl Payload {
    /// The event type this payload belongs to.
    pub fn event_type(&self) -> EventType {
        match self {
            Payload::PriceTick(_) => EventType::PriceTick,
            Payload::SeatUpdate(_) => EventType::SeatUpdate,
            Payload::BookingStatus(_) => EventType::BookingStatus,
        }
    }

    /// The channel this payload is routed to by default.
    ///
    /// Price ticks are scoped by search hash, seat updates by flight and
    /// booking updates by booking.
    pub fn default_channel(&self) -> String {
        let event_type = self.event_type();
        match self {
            Payload::PriceTick(tick) => event_type.channel(&tick.search_hash),
            Payload::SeatUpdate(seat) => event_type.channel(seat.flight_id),
            Payload::BookingStatus(booking) => event_type.channel(booking.booking_id),
        }
    }

    fn from_value(event_type: EventType, data: serde_json::Value) -> Result<Self, Error> {
        let mismatch = |e: serde_json::Error| Error::PayloadMismatch {
            expected: event_type,
            reason: e.to_string(),
        };

        Ok(match event_type {
            EventType::PriceTick => Payload::PriceTick(serde_json::from_value(data).map_err(mismatch)?),
            EventType::SeatUpdate => Payload::SeatUpdate(serde_json::from_value(data).map_err(mismatch)?),
            EventType::BookingStatus => {
                Payload::BookingStatus(serde_json::from_value(data).map_err(mismatch)?)
            }
        })
    }
}

impl From<PriceTick> for Payload {
    fn from(tick: PriceTick) -> Self {
        Payload::PriceTick(tick)
    }
}

impl From<SeatUpdate> for Payload {
    fn from(seat: SeatUpdate) -> Self {
        Payload::SeatUpdate(seat)
    }
}

impl From<BookingStatus> for Payload {
    fn from(booking: BookingStatus) -> Self {
        Payload::BookingStatus(booking)
    }
}

/// An immutable, timestamped notification routed to one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    channel: String,
    payload: Payload,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event stamped with the current time, routed to the
    /// payload's default channel.
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self::at(payload, Utc::now())
    }

    /// Create an event with an explicit timestamp.
    pub fn at(payload: impl Into<Payload>, timestamp: DateTime<Utc>) -> Self {
        let payload = payload.into();
        Self {
            channel: payload.default_channel(),
            payload,
            timestamp,
        }
    }

    /// Price change for a fare found by a search.
    pub fn price_tick(
        search_hash: impl Into<String>,
        flight_id: u64,
        fare_id: u64,
        old_price: f64,
        new_price: f64,
        currency: impl Into<String>,
    ) -> Self {
        Self::new(PriceTick {
            search_hash: search_hash.into(),
            flight_id,
            fare_id,
            old_price,
            new_price,
            currency: currency.into(),
        })
    }

    /// Seat status change on a flight.
    pub fn seat_update(
        flight_id: u64,
        seat_id: u64,
        status: SeatStatus,
        row: i32,
        column: impl Into<String>,
        class: impl Into<String>,
    ) -> Self {
        Self::new(SeatUpdate {
            flight_id,
            seat_id,
            status,
            row,
            column: column.into(),
            class: class.into(),
        })
    }

    /// Booking status change.
    pub fn booking_status(
        booking_id: u64,
        pnr: impl Into<String>,
        status: BookingState,
        message: Option<String>,
    ) -> Self {
        Self::new(BookingStatus {
            booking_id,
            pnr: pnr.into(),
            status,
            message,
        })
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Encode the event as a JSON text frame.
    pub fn encode(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Decode an event from a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, Error> {
        let frame: EventFrame = serde_json::from_str(text)
            .map_err(|e| Error::Deserialization(e.to_string()))?;
        Self::from_frame(frame)
    }

    fn from_frame(frame: EventFrame) -> Result<Self, Error> {
        Ok(Self {
            payload: Payload::from_value(frame.event_type, frame.data)?,
            channel: frame.channel,
            timestamp: frame.timestamp,
        })
    }
}

/// Borrowed wire view used for serialization.
#[derive(Serialize)]
struct EventFrameRef<'a> {
    #[serde(rename = "type")]
    event_type: EventType,
    channel: &'a str,
    data: &'a Payload,
    timestamp: &'a DateTime<Utc>,
}

/// Owned wire view used for deserialization; `data` is resolved against
/// `type` afterwards.
#[derive(Deserialize)]
struct EventFrame {
    #[serde(rename = "type")]
    event_type: EventType,
    channel: String,
    data: serde_json::Value,
    timestamp: DateTime<Utc>,
}

impl Serialize for Event {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // JSON has no NaN or infinity; serde_json would write them as null.
        if let Payload::PriceTick(tick) = &self.payload {
            if !tick.old_price.is_finite() || !tick.new_price.is_finite() {
                return Err(S::Error::custom(format!(
                    "non-finite price for fare {}",
                    tick.fare_id
                )));
            }
        }

        EventFrameRef {
            event_type: self.event_type(),
            channel: &self.channel,
            data: &self.payload,
            timestamp: &self.timestamp,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Event {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let frame = EventFrame::deserialize(deserializer)?;
        Event::from_frame(frame).map_err(D::Error::custom)
    }
}
