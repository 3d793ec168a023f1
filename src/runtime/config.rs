//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings for a [`Server`](crate::Server).
//!
//! ## Sentinel values
//! - `mailbox_capacity = 0` → clamped to 1
//! - `lane_capacity = 0` → clamped to 1
//! - `lane_pool_size = 0` → lane buffers are never recycled
//! - `rpc_timeout = 0s` → clamped to 1ms (a request always gets a deadline)

use std::time::Duration;

/// Global configuration for the server runtime.
///
/// Defines:
/// - **Identity**: server id and server type used for cross-process routing
/// - **Mailboxes**: bounded capacity of every module mailbox
/// - **Worker lanes**: pending-queue bound per key and recycled buffer pool size
/// - **RPC**: per-request deadline
/// - **Shutdown behavior**: maximum wait for supervised tasks to exit
///
/// ## Notes
/// All fields are public for flexibility. Prefer the clamped accessors to avoid
/// sprinkling sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// Identifier of this process inside the cluster.
    ///
    /// Casts targeting this id are delivered locally; any other id is handed to the link module.
    pub server_id: u32,

    /// Server type (pool name) of this process, e.g. `"game"` or `"gate"`.
    pub server_type: String,

    /// Capacity of every module mailbox.
    ///
    /// `assign` waits when the mailbox is full; `cast`/`try_assign` drop and log instead.
    pub mailbox_capacity: usize,

    /// Maximum number of pending tasks per worker-group key.
    pub lane_capacity: usize,

    /// How many drained lane buffers are kept for reuse.
    pub lane_pool_size: usize,

    /// Deadline applied to every request.
    ///
    /// A request without a response after this long completes with [`RpcError::Timeout`](crate::RpcError).
    pub rpc_timeout: Duration,

    /// Maximum time [`Server::shutdown`](crate::Server::shutdown) waits for supervised tasks.
    ///
    /// On expiry a diagnostic is logged and shutdown returns anyway.
    pub drain_timeout: Duration,
}

impl Config {
    /// Returns a mailbox capacity clamped to a minimum of 1.
    #[inline]
    pub fn mailbox_capacity_clamped(&self) -> usize {
        self.mailbox_capacity.max(1)
    }

    /// Returns a lane capacity clamped to a minimum of 1.
    #[inline]
    pub fn lane_capacity_clamped(&self) -> usize {
        self.lane_capacity.max(1)
    }

    /// Returns the request deadline clamped to a minimum of 1ms.
    #[inline]
    pub fn rpc_timeout_clamped(&self) -> Duration {
        self.rpc_timeout.max(Duration::from_millis(1))
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `server_id = 1`, `server_type = "default"`
    /// - `mailbox_capacity = 4096`
    /// - `lane_capacity = 256`, `lane_pool_size = 64`
    /// - `rpc_timeout = 10s`
    /// - `drain_timeout = 30s`
    fn default() -> Self {
        Self {
            server_id: 1,
            server_type: "default".to_string(),
            mailbox_capacity: 4096,
            lane_capacity: 256,
            lane_pool_size: 64,
            rpc_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(30),
        }
    }
}
