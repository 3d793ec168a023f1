use serde::Serialize;
use serde::de::DeserializeOwned;

/// Anything the bus can route: local by value, remote through the codec.
///
/// Blanket-implemented for every serde type that is `Send + Sync + 'static`.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> Message for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}
