/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Error taxonomy of the engine.
//!
//! The split matters more than the type names: parse and authentication
//! failures are local (log, drop the message, keep going); invalid-state
//! failures wrap their cause and propagate; fatal failures and the
//! cooperative exit signal always unwind to the owning loop's root, which
//! shuts the thread down.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::net::Ipv4Addr;

use crate::types::basic::ChainId;

/// A malformed wire frame, block header, or impossible declared size.
#[derive(Debug)]
pub struct ParseError {
    what: String,
    cause: Option<Box<dyn Error + Send + Sync>>,
}

impl ParseError {
    pub fn new(what: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            cause: None,
        }
    }

    pub fn with_cause(
        what: impl Into<String>,
        cause: impl Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            what: what.into(),
            cause: Some(Box::new(cause)),
        }
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "parse error: {}", self.what)
    }
}

impl Error for ParseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_deref().map(|cause| cause as &(dyn Error + 'static))
    }
}

/// Every failure kind the engine distinguishes.
#[derive(Debug)]
pub enum EngineError {
    /// Malformed message. Dropped locally, the sender is not penalized.
    Parse(ParseError),
    /// A message for a different chain.
    InvalidChain { expected: ChainId, got: ChainId },
    /// A message whose claimed source address does not match the transport
    /// peer, or comes from an address outside the fixed membership.
    InvalidSourceIp(Ipv4Addr),
    /// A message naming a position outside 1..=N.
    InvalidSchain(u64),
    /// An internal invariant was violated; carries the failing operation and
    /// the nested cause.
    InvalidState {
        context: String,
        cause: Option<Box<dyn Error + Send + Sync>>,
    },
    /// Unrecoverable failure (corrupt store, poisoned lock). The process-level
    /// shutdown routine runs when one of these reaches a loop root.
    Fatal(String),
    /// Cooperative shutdown. Always rethrown, never swallowed.
    ExitRequested,
    /// Transient send or receive failure; retried via the delayed-send queue.
    Network(String),
}

impl EngineError {
    pub fn invalid_state(context: impl Into<String>) -> Self {
        EngineError::InvalidState {
            context: context.into(),
            cause: None,
        }
    }

    pub fn invalid_state_caused_by(
        context: impl Into<String>,
        cause: impl Error + Send + Sync + 'static,
    ) -> Self {
        EngineError::InvalidState {
            context: context.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Whether this error must unwind past per-message handling.
    pub fn must_propagate(&self) -> bool {
        matches!(self, EngineError::Fatal(_) | EngineError::ExitRequested)
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Parse(err) => Display::fmt(err, f),
            EngineError::InvalidChain { expected, got } => {
                write!(f, "message for chain {} on chain {}", got, expected)
            }
            EngineError::InvalidSourceIp(ip) => write!(f, "message from unknown ip {}", ip),
            EngineError::InvalidSchain(index) => write!(f, "unknown subchain position {}", index),
            EngineError::InvalidState { context, .. } => write!(f, "invalid state: {}", context),
            EngineError::Fatal(what) => write!(f, "fatal: {}", what),
            EngineError::ExitRequested => write!(f, "exit requested"),
            EngineError::Network(what) => write!(f, "network: {}", what),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EngineError::Parse(err) => err.source(),
            EngineError::InvalidState { cause, .. } => {
                cause.as_deref().map(|cause| cause as &(dyn Error + 'static))
            }
            _ => None,
        }
    }
}

impl From<ParseError> for EngineError {
    fn from(err: ParseError) -> Self {
        EngineError::Parse(err)
    }
}

/// Log an error and its whole cause chain at warn level.
pub fn log_nested(context: &str, err: &(dyn Error + 'static)) {
    log::warn!("{}: {}", context, err);
    let mut cause = err.source();
    while let Some(inner) = cause {
        log::warn!("  caused by: {}", inner);
        cause = inner.source();
    }
}
