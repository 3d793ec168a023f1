//! # Server: owns the runtime pieces and drives module lifecycles.
//!
//! A [`Server`] is one runtime instance: a [`Launcher`], a [`WorkerGroup`], a
//! [`Bus`] and the modules mounted on it. Nothing is global, so independent
//! servers can live side by side (tests run several in one process).
//!
//! ## Lifecycle
//! ```text
//! mount(module)*             modules: Created
//! start():
//!   launch every run loop
//!   Before(Init) → After(Init) → Before(Run)   (each module, mount order)
//!       └─ first failure → Err(RuntimeError::Hook)
//!   Start                                      modules: Running
//!   After(Run)                                 (failures logged)
//! shutdown():
//!   Before(Stop)                               (failures logged)
//!   stop every module → After(Stop) on its task modules: Draining → Stopped
//!   launcher.drain(drain_timeout)              → bool
//! ```

use std::fmt;

use futures::FutureExt;
use futures::future::BoxFuture;
use tracing::{info, warn};

use crate::bus::Bus;
use crate::error::RuntimeError;
use crate::module::{Module, ModuleHandle, Phase, ServerState, Stage};
use crate::workers::WorkerGroup;

use super::config::Config;
use super::launcher::Launcher;
use super::signals;

const STARTUP: [(ServerState, Stage); 3] = [
    (ServerState::Init, Stage::Before),
    (ServerState::Init, Stage::After),
    (ServerState::Run, Stage::Before),
];

struct Mounted {
    handle: ModuleHandle,
    run: Option<BoxFuture<'static, ()>>,
}

/// One runtime instance.
pub struct Server {
    cfg: Config,
    launcher: Launcher,
    workers: WorkerGroup,
    bus: Bus,
    mounted: Vec<Mounted>,
    started: bool,
}

impl Server {
    pub fn new(cfg: Config) -> Self {
        let launcher = Launcher::new();
        let workers = WorkerGroup::new(
            launcher.clone(),
            cfg.lane_capacity_clamped(),
            cfg.lane_pool_size,
        );
        let bus = Bus::new(&cfg);
        Self {
            cfg,
            launcher,
            workers,
            bus,
            mounted: Vec::new(),
            started: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn workers(&self) -> &WorkerGroup {
        &self.workers
    }

    pub fn launcher(&self) -> &Launcher {
        &self.launcher
    }

    /// Creates an unmounted module wired to this server.
    pub fn module<S: Send + 'static>(&self, name: impl Into<String>, state: S) -> Module<S> {
        Module::new(
            name.into(),
            state,
            self.cfg.mailbox_capacity_clamped(),
            self.bus.clone(),
            self.launcher.clone(),
            self.workers.clone(),
        )
    }

    /// Adds `module` to the server. Its loop starts with [`start`](Self::start).
    pub fn mount<S: Send + 'static>(&mut self, module: Module<S>) -> Result<ModuleHandle, RuntimeError> {
        if self.started {
            return Err(RuntimeError::AlreadyStarted);
        }
        if self.handle(module.name()).is_some() {
            return Err(RuntimeError::DuplicateModule {
                module: module.name().to_string(),
            });
        }
        let handle = module.handle();
        self.mounted.push(Mounted {
            handle: handle.clone(),
            run: Some(module.run().boxed()),
        });
        Ok(handle)
    }

    /// Handle of the mounted module called `name`.
    pub fn handle(&self, name: &str) -> Option<ModuleHandle> {
        self.mounted
            .iter()
            .find(|m| m.handle.name() == name)
            .map(|m| m.handle.clone())
    }

    /// Names of the mounted modules, in mount order.
    pub fn modules(&self) -> Vec<String> {
        self.mounted
            .iter()
            .map(|m| m.handle.name().to_string())
            .collect()
    }

    /// Launches every module and walks them through `Init` into `Run`.
    ///
    /// On `Err` the server is left partially started; call
    /// [`shutdown`](Self::shutdown) to release it.
    pub async fn start(&mut self) -> Result<(), RuntimeError> {
        if self.started {
            return Err(RuntimeError::AlreadyStarted);
        }
        self.started = true;

        for mounted in &mut self.mounted {
            if let Some(run) = mounted.run.take() {
                self.launcher.launch(run);
            }
        }

        for (state, stage) in STARTUP {
            for mounted in &self.mounted {
                mounted
                    .handle
                    .run_hooks(state, stage)
                    .await
                    .map_err(|error| RuntimeError::Hook {
                        module: mounted.handle.name().to_string(),
                        state,
                        stage,
                        error,
                    })?;
            }
        }

        for mounted in &self.mounted {
            mounted.handle.start();
        }
        for mounted in &self.mounted {
            if let Err(err) = mounted.handle.run_hooks(ServerState::Run, Stage::After).await {
                warn!(module = %mounted.handle.name(), error = %err, "after run hook failed");
            }
        }

        info!(
            server_id = self.cfg.server_id,
            server_type = %self.cfg.server_type,
            modules = self.mounted.len(),
            "server started"
        );
        Ok(())
    }

    /// Stops every module and drains supervised tasks.
    ///
    /// Returns `false` if tasks were still running after
    /// [`Config::drain_timeout`].
    pub async fn shutdown(&mut self) -> bool {
        if self.started {
            for mounted in &self.mounted {
                if mounted.handle.phase() == Phase::Stopped {
                    continue;
                }
                if let Err(err) = mounted.handle.run_hooks(ServerState::Stop, Stage::Before).await {
                    warn!(module = %mounted.handle.name(), error = %err, "before stop hook failed");
                }
            }
        }
        for mounted in &self.mounted {
            mounted.handle.stop();
        }

        let drained = self.launcher.drain(self.cfg.drain_timeout).await;
        info!(server_id = self.cfg.server_id, drained, "server stopped");
        drained
    }

    /// Starts, waits for a termination signal, then shuts down.
    pub async fn run_until_signal(&mut self) -> Result<bool, RuntimeError> {
        if let Err(err) = self.start().await {
            self.shutdown().await;
            return Err(err);
        }
        let waited = signals::terminated().await;
        let drained = self.shutdown().await;
        waited?;
        Ok(drained)
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("server_id", &self.cfg.server_id)
            .field("modules", &self.modules())
            .field("started", &self.started)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::bus::CastOptions;

    fn server() -> Server {
        Server::new(Config {
            drain_timeout: Duration::from_secs(1),
            ..Config::default()
        })
    }

    fn record(
        log: Arc<Mutex<Vec<&'static str>>>,
        tag: &'static str,
    ) -> impl for<'a> FnMut(&'a mut ()) -> BoxFuture<'a, anyhow::Result<()>> + Send + 'static {
        move |_| {
            log.lock().unwrap().push(tag);
            async { Ok(()) }.boxed()
        }
    }

    #[tokio::test]
    async fn hooks_run_in_lifecycle_order() {
        let mut server = server();
        let log = Arc::new(Mutex::new(Vec::new()));

        let mut module = server.module("store", ());
        for (state, stage, tag) in [
            (ServerState::Init, Stage::Before, "before init"),
            (ServerState::Init, Stage::After, "after init"),
            (ServerState::Run, Stage::Before, "before run"),
            (ServerState::Run, Stage::After, "after run"),
            (ServerState::Stop, Stage::Before, "before stop"),
            (ServerState::Stop, Stage::After, "after stop"),
        ] {
            match stage {
                Stage::Before => module.before(state, record(log.clone(), tag)),
                Stage::After => module.after(state, record(log.clone(), tag)),
            }
        }
        assert_eq!(module.hooks(ServerState::Init, Stage::Before), 1);
        let handle = server.mount(module).unwrap();
        assert_eq!(handle.phase(), Phase::Created);

        server.start().await.unwrap();
        assert_eq!(handle.phase(), Phase::Running);
        assert!(server.shutdown().await);
        assert_eq!(handle.phase(), Phase::Stopped);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "before init",
                "after init",
                "before run",
                "after run",
                "before stop",
                "after stop"
            ]
        );
    }

    #[tokio::test]
    async fn failing_startup_hook_aborts_start() {
        let mut server = server();
        let mut module = server.module("db", false);
        module.before(ServerState::Run, |_| {
            async { Err(anyhow::anyhow!("connect timeout")) }.boxed()
        });
        module.after(ServerState::Run, |reached| {
            *reached = true;
            async { Ok(()) }.boxed()
        });
        server.mount(module).unwrap();

        let err = server.start().await.unwrap_err();
        match &err {
            RuntimeError::Hook {
                module,
                state,
                stage,
                ..
            } => {
                assert_eq!(module, "db");
                assert_eq!(*state, ServerState::Run);
                assert_eq!(*stage, Stage::Before);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.as_label(), "runtime_hook_failed");
        assert!(server.shutdown().await);
    }

    #[tokio::test]
    async fn panicking_hook_is_reported_as_failure() {
        let mut server = server();
        let mut module = server.module("cache", ());
        module.before(ServerState::Init, |_| {
            async { panic!("cache warmup exploded") }.boxed()
        });
        server.mount(module).unwrap();

        let err = server.start().await.unwrap_err();
        assert!(err.to_string().contains("cache warmup exploded"));
        assert!(server.shutdown().await);
    }

    #[tokio::test]
    async fn mount_rejects_duplicates_and_late_modules() {
        let mut server = server();
        server.mount(server.module("player", ())).unwrap();
        let err = server.mount(server.module("player", ())).unwrap_err();
        assert_eq!(err.as_label(), "runtime_duplicate_module");

        server.start().await.unwrap();
        let err = server.mount(server.module("late", ())).unwrap_err();
        assert!(matches!(err, RuntimeError::AlreadyStarted));
        assert_eq!(server.modules(), vec!["player".to_string()]);
        assert!(server.shutdown().await);
    }

    #[tokio::test]
    async fn mailbox_waits_for_start() {
        let mut server = server();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut module = server.module("player", ());
        let sink = seen.clone();
        server
            .bus()
            .clone()
            .register_handler(&mut module, move |_, msg: &u32, _| sink.lock().unwrap().push(*msg))
            .unwrap();
        let handle = server.mount(module).unwrap();

        server.bus().cast(1u32, CastOptions::new());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(seen.lock().unwrap().is_empty());

        server.start().await.unwrap();
        handle.assign(2u32).await.unwrap();
        for _ in 0..100 {
            if seen.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert!(server.shutdown().await);
    }
}
