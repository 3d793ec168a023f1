//! # Request completion.
//!
//! A [`Responder`] travels with every request into the receiving module. It is
//! consumed by [`resolve`](Responder::resolve) or [`reject`](Responder::reject),
//! so a request is answered at most once; dropping it unanswered answers
//! [`RpcError::BrokenPromise`], so a request is answered at least once.

use std::any::{Any, type_name};
use std::fmt;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{CodecError, RpcError};

use super::codec::encode_any;
use super::message::Message;

pub(crate) type Outcome = Result<Reply, RpcError>;

/// One-shot completion handed to RPC handlers.
pub struct Responder {
    tx: Option<oneshot::Sender<Outcome>>,
}

impl Responder {
    pub(crate) fn new() -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Answers the request with `value`.
    pub fn resolve<R: Message>(self, value: R) {
        self.complete(Ok(Reply::Local {
            value: Box::new(value),
            encode: encode_any::<R>,
        }));
    }

    /// Answers the request with [`RpcError::Rejected`].
    pub fn reject(self, reason: impl Into<String>) {
        self.complete(Err(RpcError::Rejected {
            message: reason.into(),
        }));
    }

    /// Returns true if the requester stopped waiting (timed out or went away).
    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_none_or(|tx| tx.is_closed())
    }

    pub(crate) fn fail(self, err: RpcError) {
        self.complete(Err(err));
    }

    pub(crate) fn complete(mut self, outcome: Outcome) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(outcome);
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(RpcError::BrokenPromise));
        }
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("answered", &self.tx.is_none())
            .finish()
    }
}

/// A successful answer: by value in-process, JSON when it crossed the link.
pub(crate) enum Reply {
    Local {
        value: Box<dyn Any + Send>,
        encode: fn(&(dyn Any + Send)) -> Result<Value, CodecError>,
    },
    Encoded(Value),
}

impl Reply {
    pub(crate) fn into_value<R: Message>(self) -> Result<R, RpcError> {
        match self {
            Reply::Local { value, .. } => {
                value
                    .downcast::<R>()
                    .map(|value| *value)
                    .map_err(|_| RpcError::TypeMismatch {
                        expected: type_name::<R>().to_string(),
                    })
            }
            Reply::Encoded(value) => {
                serde_json::from_value(value).map_err(|err| CodecError::from(err).into())
            }
        }
    }

    pub(crate) fn into_json(self) -> Result<Value, CodecError> {
        match self {
            Reply::Local { value, encode } => encode(&*value),
            Reply::Encoded(value) => Ok(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropped_responder_breaks_the_promise() {
        let (responder, rx) = Responder::new();
        drop(responder);
        assert!(matches!(rx.await.unwrap(), Err(RpcError::BrokenPromise)));
    }

    #[tokio::test]
    async fn resolve_answers_exactly_once() {
        let (responder, rx) = Responder::new();
        responder.resolve(7u32);
        let reply = rx.await.unwrap().unwrap();
        assert_eq!(reply.into_value::<u32>().unwrap(), 7);
    }

    #[tokio::test]
    async fn reject_carries_the_reason() {
        let (responder, rx) = Responder::new();
        assert!(!responder.is_closed());
        responder.reject("no such player");
        assert_eq!(
            rx.await.unwrap().err(),
            Some(RpcError::Rejected {
                message: "no such player".into()
            })
        );
    }

    #[test]
    fn local_reply_encodes_for_the_wire() {
        let (responder, mut rx) = Responder::new();
        responder.resolve(String::from("pong"));
        let reply = rx.try_recv().unwrap().unwrap();
        assert_eq!(reply.into_json().unwrap(), Value::String("pong".into()));
    }

    #[test]
    fn wrong_response_type_is_a_mismatch() {
        let (responder, mut rx) = Responder::new();
        responder.resolve(1u8);
        let err = rx.try_recv().unwrap().unwrap().into_value::<String>().unwrap_err();
        assert!(matches!(err, RpcError::TypeMismatch { .. }));
    }
}
