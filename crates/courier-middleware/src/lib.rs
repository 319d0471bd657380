//! `courier-middleware` – live state fan-out.
//!
//! Moves snapshots of the vehicle and the order book to every connected
//! observer without caring who they are or how fast they read.
//!
//! # Modules
//!
//! - [`hub`] – [`BroadcastHub`], a per-subscriber bounded queue fan-out with
//!   drop-on-full semantics.

pub mod hub;

pub use hub::{BroadcastHub, Frame, Subscription, SUBSCRIBER_CAPACITY};
