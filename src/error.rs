//! Error types used by the modvisor runtime, modules and the message bus.
//!
//! This module defines one enum per failure concern:
//!
//! - [`RuntimeError`] errors raised while driving the server lifecycle.
//! - [`RegistrationError`] fatal configuration errors detected at registration time.
//! - [`RpcError`] failures surfaced to a requester instead of a response.
//! - [`MailboxError`] a module mailbox refused an item.
//! - [`CodecError`] / [`TransportError`] cross-process encoding and delivery failures.
//! - [`EventError`] malformed event arguments.
//!
//! Every enum provides `as_label` (stable snake_case) for logs/metrics.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::module::{ServerState, Stage};

/// # Errors produced while driving the server lifecycle.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A lifecycle hook returned an error (or panicked) during a startup transition.
    #[error("module {module}: {stage:?}({state:?}) hook failed: {error:#}")]
    Hook {
        /// Name of the module whose hook failed.
        module: String,
        /// Target state of the transition.
        state: ServerState,
        /// Hook stage.
        stage: Stage,
        /// The hook error.
        error: anyhow::Error,
    },

    /// Two modules were mounted under the same name.
    #[error("module {module} is already mounted")]
    DuplicateModule {
        /// The duplicated module name.
        module: String,
    },

    /// A handler or subscriber registration was rejected.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// `start` was called twice, or a module was mounted after start.
    #[error("server already started")]
    AlreadyStarted,

    /// OS signal listener could not be installed.
    #[error("signal listener failed: {0}")]
    Signal(#[from] std::io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Hook { .. } => "runtime_hook_failed",
            RuntimeError::DuplicateModule { .. } => "runtime_duplicate_module",
            RuntimeError::Registration(_) => "runtime_registration",
            RuntimeError::AlreadyStarted => "runtime_already_started",
            RuntimeError::Signal(_) => "runtime_signal",
        }
    }
}

/// # Fatal configuration errors.
///
/// Returned at registration time; callers are expected to abort startup.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    /// The module already has a handler for this message type.
    #[error("message duplicate registration {module} {message}")]
    DuplicateHandler {
        /// Module name.
        module: String,
        /// Message type name.
        message: &'static str,
    },

    /// An event subscriber with this name is already registered.
    #[error("subscriber {name} has registered")]
    DuplicateSubscriber {
        /// Subscriber name.
        name: String,
    },
}

impl RegistrationError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RegistrationError::DuplicateHandler { .. } => "registration_duplicate_handler",
            RegistrationError::DuplicateSubscriber { .. } => "registration_duplicate_subscriber",
        }
    }
}

/// # Failures delivered to a requester in place of a response.
///
/// Serializable so a remote responder can ship it back over the transport.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcError {
    /// No response arrived within the configured deadline.
    #[error("rpc timed out after {timeout:?}")]
    Timeout {
        /// The deadline that elapsed.
        timeout: Duration,
    },

    /// The responder was dropped without resolving or rejecting.
    #[error("responder dropped without reply")]
    BrokenPromise,

    /// No module is registered for the request type.
    #[error("no receiver for {message}")]
    NoReceiver {
        /// Request type name.
        message: String,
    },

    /// The handler rejected the request.
    #[error("rejected: {message}")]
    Rejected {
        /// Rejection reason.
        message: String,
    },

    /// The response had a different type than the requester expected.
    #[error("response type mismatch, expected {expected}")]
    TypeMismatch {
        /// The type the requester asked for.
        expected: String,
    },

    /// The target mailbox refused the request.
    #[error("mailbox refused request: {0}")]
    Mailbox(MailboxError),

    /// Encoding or decoding the payload failed.
    #[error("codec: {message}")]
    Codec {
        /// Codec error text.
        message: String,
    },

    /// The transport could not ship the request.
    #[error("transport: {message}")]
    Transport {
        /// Transport error text.
        message: String,
    },
}

impl RpcError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RpcError::Timeout { .. } => "rpc_timeout",
            RpcError::BrokenPromise => "rpc_broken_promise",
            RpcError::NoReceiver { .. } => "rpc_no_receiver",
            RpcError::Rejected { .. } => "rpc_rejected",
            RpcError::TypeMismatch { .. } => "rpc_type_mismatch",
            RpcError::Mailbox(_) => "rpc_mailbox",
            RpcError::Codec { .. } => "rpc_codec",
            RpcError::Transport { .. } => "rpc_transport",
        }
    }

    /// Indicates whether the failure came from the deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Timeout { .. })
    }
}

impl From<CodecError> for RpcError {
    fn from(e: CodecError) -> Self {
        RpcError::Codec {
            message: e.to_string(),
        }
    }
}

impl From<TransportError> for RpcError {
    fn from(e: TransportError) -> Self {
        RpcError::Transport {
            message: e.to_string(),
        }
    }
}

/// # A module mailbox refused an item.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MailboxError {
    /// The bounded mailbox is at capacity.
    #[error("mailbox of {module} is full")]
    Full {
        /// Module name.
        module: String,
    },

    /// The module run loop has exited.
    #[error("mailbox of {module} is closed")]
    Closed {
        /// Module name.
        module: String,
    },
}

impl MailboxError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            MailboxError::Full { .. } => "mailbox_full",
            MailboxError::Closed { .. } => "mailbox_closed",
        }
    }
}

/// # Payload encoding failures.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CodecError {
    /// The frame names a type that was never registered with the codec.
    #[error("unknown message type {0}")]
    UnknownType(String),

    /// A value did not have the type its encoder expected.
    #[error("value is not a {expected}")]
    WrongType {
        /// Type the encoder was built for.
        expected: &'static str,
    },

    /// JSON (de)serialization failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl CodecError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            CodecError::UnknownType(_) => "codec_unknown_type",
            CodecError::WrongType { .. } => "codec_wrong_type",
            CodecError::Json(_) => "codec_json",
        }
    }
}

/// # Transport failures.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport connection is closed.
    #[error("transport closed")]
    Closed,

    /// A request found nobody subscribed to its subject.
    #[error("no responders on {subject}")]
    NoResponders {
        /// Request subject.
        subject: String,
    },

    /// A request got no answer in time.
    #[error("transport request timed out after {timeout:?}")]
    Timeout {
        /// The elapsed deadline.
        timeout: Duration,
    },

    /// Any other transport-specific failure.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TransportError::Closed => "transport_closed",
            TransportError::NoResponders { .. } => "transport_no_responders",
            TransportError::Timeout { .. } => "transport_timeout",
            TransportError::Other(_) => "transport_other",
        }
    }
}

/// # Malformed event arguments.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// The event has no argument under this name.
    #[error("event param {0} not found")]
    MissingArg(String),

    /// The argument exists but is not an integer.
    #[error("event param {name} not a number: {value:?}")]
    NotANumber {
        /// Argument name.
        name: String,
        /// Raw argument value.
        value: String,
    },
}

impl EventError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventError::MissingArg(_) => "event_missing_arg",
            EventError::NotANumber { .. } => "event_not_a_number",
        }
    }
}
