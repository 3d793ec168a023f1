//! Keyed worker lanes.
//!
//! [`WorkerGroup`] runs jobs serialized per key and concurrently across keys,
//! with lanes that exist only while their key has pending work.

mod error;
mod group;

pub use error::SubmitError;
pub use group::WorkerGroup;
