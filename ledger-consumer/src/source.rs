//! # Source
//!
//! The acquire → process → acknowledge contract between the ingestion loop and whatever it
//! reads from. A `Delivery` is acquired with `fetch`, and its `Acknowledger` is consumed exactly
//! once: `ack` when the message is done with (stored, or deliberately dropped), `release` when it
//! must be delivered again. Dropping an acknowledger without calling either leaves the position
//! where it was, same as a crash would.
use std::fmt;

use async_trait::async_trait;

use crate::error::{AckError, SourceError};

/// Where a delivery sits in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub partition: i32,
    pub offset: i64,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.partition, self.offset)
    }
}

pub struct Delivery<A> {
    /// `None` for messages without a payload, e.g. tombstones.
    pub payload: Option<Vec<u8>>,
    pub position: Position,
    pub acknowledger: A,
}

#[async_trait]
pub trait Acknowledger: Send {
    /// Advance the consumption position past this delivery.
    async fn ack(self) -> Result<(), AckError>;

    /// Hand this delivery back so it is fetched again.
    async fn release(self) -> Result<(), AckError>;
}

#[async_trait]
pub trait MessageSource: Send + Sync {
    type Acknowledger: Acknowledger;

    /// Wait for the next delivery. Must be cancel safe: dropping the future loses nothing.
    async fn fetch(&self) -> Result<Delivery<Self::Acknowledger>, SourceError>;
}
