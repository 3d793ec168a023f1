//! # Keyed worker group: serialized lanes per key.
//!
//! Each key owns at most one **lane**: a FIFO queue plus one drain loop.
//! Lanes exist only while their key has pending work.
//!
//! ## Architecture
//! ```text
//! submit(key, job)
//!     │ lock
//!     ├─► lanes[key] (or new lane, buffer from pool)
//!     ├─► pending.push_back(job)
//!     └─► if !active { active = true; launch(drain_lane(key)) }
//!       unlock
//!
//! drain_lane(key):
//!   loop {
//!     lock ─► pop_front()
//!            ├─ Some(job) → unlock → run job (catch_unwind)
//!            └─ None      → remove lane, buffer → pool → unlock → exit
//!   }
//! ```
//!
//! ## Rules
//! - Jobs under the same key run one at a time, in submission order.
//! - Jobs under different keys may run in parallel.
//! - The group mutex guards membership only; jobs run outside it.
//! - A new lane's drain loop is launched under the mutex. If the launch is
//!   refused, the lane holds only the job being submitted, so dropping it
//!   never discards work another submitter was told was accepted.
//! - "Queue empty" and "lane removed" happen in one critical section, so a
//!   submit either lands before the check (and is drained) or after the
//!   removal (and starts a new lane). No job is lost in between.
//! - A panicking job is logged and dropped; the lane keeps draining.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{debug, error};

use crate::runtime::Launcher;
use crate::runtime::launcher::panic_message;

use super::error::SubmitError;

type Job = BoxFuture<'static, ()>;

/// One serialized execution lane.
struct Lane {
    pending: VecDeque<Job>,
    active: bool,
}

struct Lanes {
    live: HashMap<String, Lane>,
    pool: Vec<VecDeque<Job>>,
}

/// Scheduler guaranteeing serialized, ordered execution per key.
///
/// Cheap to clone; clones share the same lanes.
#[derive(Clone)]
pub struct WorkerGroup {
    lanes: Arc<Mutex<Lanes>>,
    launcher: Launcher,
    lane_capacity: usize,
    pool_size: usize,
}

impl WorkerGroup {
    /// Creates a group whose drain loops are launched through `launcher`.
    ///
    /// - `lane_capacity`: pending jobs allowed per key (min 1)
    /// - `pool_size`: drained lane buffers kept for reuse
    pub fn new(launcher: Launcher, lane_capacity: usize, pool_size: usize) -> Self {
        Self {
            lanes: Arc::new(Mutex::new(Lanes {
                live: HashMap::new(),
                pool: Vec::new(),
            })),
            launcher,
            lane_capacity: lane_capacity.max(1),
            pool_size,
        }
    }

    /// Enqueues `job` for serialized execution under `key`.
    ///
    /// - `Err(Full)`: the lane already holds `lane_capacity` pending jobs
    /// - `Err(Closed)`: the launcher is draining
    pub fn submit<F>(&self, key: impl Into<String>, job: F) -> Result<(), SubmitError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.launcher.is_draining() {
            return Err(SubmitError::Closed);
        }
        let key = key.into();

        let mut guard = self.lock();
        let Lanes { live, pool } = &mut *guard;
        let lane = live.entry(key.clone()).or_insert_with(|| Lane {
            pending: pool.pop().unwrap_or_default(),
            active: false,
        });
        if lane.pending.len() >= self.lane_capacity {
            return Err(SubmitError::Full { key });
        }
        lane.pending.push_back(Box::pin(job));
        if std::mem::replace(&mut lane.active, true) {
            return Ok(());
        }

        if !self.launcher.launch(self.clone().drain_lane(key.clone())) {
            if let Some(mut lane) = live.remove(&key) {
                lane.pending.clear();
                if pool.len() < self.pool_size {
                    pool.push(lane.pending);
                }
            }
            return Err(SubmitError::Closed);
        }
        Ok(())
    }

    /// Number of keys that currently own a lane.
    pub fn active_lanes(&self) -> usize {
        self.lock().live.len()
    }

    /// Number of jobs waiting (not yet started) under `key`.
    pub fn pending(&self, key: &str) -> usize {
        self.lock()
            .live
            .get(key)
            .map(|lane| lane.pending.len())
            .unwrap_or(0)
    }

    /// Number of lane buffers waiting for reuse.
    pub fn pooled(&self) -> usize {
        self.lock().pool.len()
    }

    async fn drain_lane(self, key: String) {
        loop {
            let job = {
                let mut guard = self.lock();
                let Lanes { live, pool } = &mut *guard;
                let Some(lane) = live.get_mut(&key) else {
                    return;
                };
                match lane.pending.pop_front() {
                    Some(job) => job,
                    None => {
                        if let Some(lane) = live.remove(&key) {
                            if pool.len() < self.pool_size {
                                pool.push(lane.pending);
                            }
                        }
                        debug!(key = %key, "lane retired");
                        return;
                    }
                }
            };

            if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
                error!(key = %key, panic = %panic_message(&*panic), "lane job panicked");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Lanes> {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
