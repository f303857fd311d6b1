// FleetSim - IoT device fleet simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for FleetSim
//!
//! Generators never fail (malformed attribute specs fall back to defaults)
//! and lifecycle endings are reported as [`crate::widget::TickOutcome`]
//! values. What remains here are failures of the external collaborators
//! and of the boundary operations consumed by the CRUD layer.

use serde::Serialize;
use thiserror::Error;

/// Result type alias for FleetSim operations
pub type Result<T> = std::result::Result<T, SimError>;

/// Main error type for FleetSim operations
#[derive(Error, Debug)]
pub enum SimError {
    /// Backing store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Message sink failure
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    /// Route could not be loaded
    #[error("Route error: {0}")]
    Route(#[from] RouteError),

    /// Request rejected before reaching the store
    #[error("Validation error: {0}")]
    Validation(String),

    /// Item does not exist (or is not visible to the caller)
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Per-request cap exceeded
    #[error("Requested {requested} devices, maximum per request is {max}")]
    LimitExceeded { requested: usize, max: usize },

    /// JSON (de)serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by a [`crate::store::Store`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Store unreachable or refused the request
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    /// Batch write larger than the store accepts
    #[error("Batch too large: {size} items exceeds maximum {max}")]
    BatchTooLarge { size: usize, max: usize },

    /// Item lacks a key attribute required by the table
    #[error("Item is missing key attribute '{attribute}'")]
    MissingKey { attribute: String },

    /// Table not declared
    #[error("Unknown table: {0}")]
    UnknownTable(String),
}

/// Errors raised by a [`crate::sink::MessageSink`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    /// Sink refused the message
    #[error("Publish to '{topic}' rejected: {reason}")]
    Rejected { topic: String, reason: String },

    /// Sink is closed
    #[error("Sink closed")]
    Closed,
}

/// Errors raised while loading a route
#[derive(Error, Debug)]
pub enum RouteError {
    /// No route with that name
    #[error("Route not found: {0}")]
    NotFound(String),

    /// Reading the route blob failed
    #[error("IO error reading route: {0}")]
    Io(#[from] std::io::Error),

    /// Route blob is not valid route JSON
    #[error("Malformed route: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Route has no stages
    #[error("Route '{0}' has no stages")]
    Empty(String),
}

/// Typed failure object handed back to the CRUD layer.
///
/// Mirrors the `{code, error, message}` shape the HTTP handlers serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub code: u16,
    pub error: String,
    pub message: String,
}

impl From<&SimError> for Failure {
    fn from(err: &SimError) -> Self {
        let (code, error) = match err {
            SimError::Store(_) => (500, "StoreFailure"),
            SimError::Publish(_) => (500, "PublishFailure"),
            SimError::Route(_) => (500, "RouteLoadFailure"),
            SimError::Validation(_) => (400, "ValidationFailure"),
            SimError::NotFound { .. } => (404, "NotFound"),
            SimError::LimitExceeded { .. } => (400, "DeviceCreateLimitExceeded"),
            SimError::Serialization(_) => (500, "SerializationFailure"),
        };
        Self {
            code,
            error: error.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<SimError> for Failure {
    fn from(err: SimError) -> Self {
        Failure::from(&err)
    }
}
