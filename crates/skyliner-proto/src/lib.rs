//! Skyliner real-time protocol types.
//!
//! This crate defines the frames exchanged between the real-time hub and its
//! WebSocket clients. Both directions use JSON text frames.
//!
//! # Modules
//!
//! - [`event`] - Event envelope, typed payloads and channel naming
//! - [`control`] - Subscribe/unsubscribe frames sent by clients
//! - [`error`] - Protocol error types

pub mod control;
pub mod error;
pub mod event;

pub use control::ControlMessage;
pub use error::Error;
pub use event::{
    BookingState, BookingStatus, Event, EventType, Payload, PriceTick, SeatStatus, SeatUpdate,
};
