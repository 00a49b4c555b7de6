//! # Validation
//!
//! Decides whether a raw stream payload is a transaction we can store. Nothing here has side
//! effects: callers decide what to do with a rejection.
use thiserror::Error;

use crate::transaction::{InboundTransaction, TransactionKind};

/// The payload couldn't be read as a transaction at all.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("message has no payload")]
    Empty,
    #[error("payload is not a valid transaction: {0}")]
    Json(#[from] serde_json::Error),
}

/// The payload is a well-formed transaction that breaks a business rule.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is not a valid transaction_type")]
    UnknownKind(String),
    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(i64),
}

/// The fields of a transaction that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validated {
    pub kind: TransactionKind,
    pub amount: i64,
}

pub fn parse(payload: Option<&[u8]>) -> Result<InboundTransaction, ParseError> {
    let payload = payload.ok_or(ParseError::Empty)?;
    Ok(serde_json::from_slice(payload)?)
}

pub fn validate(inbound: &InboundTransaction) -> Result<Validated, ValidationError> {
    let kind = inbound
        .transaction_type
        .parse::<TransactionKind>()
        .map_err(|e| ValidationError::UnknownKind(e.0))?;

    if inbound.amount <= 0 {
        return Err(ValidationError::NonPositiveAmount(inbound.amount));
    }

    Ok(Validated {
        kind,
        amount: inbound.amount,
    })
}
