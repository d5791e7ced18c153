//! GT7 telemetry client: connects to a console, keeps the latest snapshot,
//! derives game/race/driver events and fans frames out to callbacks.
//!
//! ```no_run
//! use gt7_link::{Client, ClientConfig};
//! use gt7_events::RaceEventKind;
//! use gt7_ingest_core::Callback;
//!
//! # fn main() -> Result<(), gt7_link::ClientError> {
//! let client = Client::connect_blocking(ClientConfig::default())?;
//! client.race_events().subscribe(RaceEventKind::LapChange, |e| {
//!     println!("{e:?}");
//!     Ok(())
//! });
//! client.register_callback(Callback::sync(|s| {
//!     println!("{:.0} km/h", s.speed_kph());
//!     Ok(())
//! }));
//! client.run()
//! # }
//! ```

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use arc_swap::ArcSwapOption;
use gt7_events::{
    DriverEngine, DriverEvents, GameEngine, GameEvents, GameMode, RaceEngine, RaceEvents,
    TrackDetector, TrackError,
};
use gt7_ingest::{discover, DiscoveryError, HeartbeatSession};
use gt7_ingest_core::{Dispatcher, FrameCounts, SessionError, SnapshotSink, TelemetrySource};
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

mod config;

pub use config::ClientConfig;
pub use gt7_ingest_core::{Callback, CallbackId};
pub use gt7_model::Snapshot;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("telemetry session already started")]
    AlreadyRunning,
    #[error("telemetry session not running")]
    NotRunning,
    #[error("runtime: {0}")]
    Runtime(#[source] std::io::Error),
    #[error("track bounds: {0}")]
    TrackBounds(#[from] TrackError),
    #[error("invalid {var}={value:?}")]
    Config { var: &'static str, value: String },
    #[error("telemetry thread panicked")]
    Panicked,
}

struct LatestSink(Arc<ArcSwapOption<Snapshot>>);

impl SnapshotSink for LatestSink {
    fn on_snapshot(&mut self, snapshot: &Arc<Snapshot>) {
        self.0.store(Some(Arc::clone(snapshot)));
    }
}

struct Engines {
    game: GameEngine,
    race: RaceEngine,
    driver: DriverEngine,
}

#[derive(Default)]
struct Callbacks {
    registered: Vec<(CallbackId, Callback)>,
    live: Option<Arc<Dispatcher>>,
}

struct Inner {
    config: ClientConfig,
    session: HeartbeatSession,
    engines: Mutex<Option<Engines>>,
    callbacks: Mutex<Callbacks>,
    latest: Arc<ArcSwapOption<Snapshot>>,
    game: Arc<GameEvents>,
    race: Arc<RaceEvents>,
    driver: Arc<DriverEvents>,
    mode: Arc<RwLock<Option<GameMode>>>,
}

impl Inner {
    /// The one loop body behind `run`, `start` and `run_async`.
    async fn drive(&self, cancel: CancellationToken) -> Result<(), ClientError> {
        let engines = self.engines.lock().take().ok_or(ClientError::AlreadyRunning)?;
        let dispatcher = Arc::new(
            Dispatcher::new(self.config.worker_count, tokio::runtime::Handle::current())
                .map_err(ClientError::Runtime)?,
        );
        {
            let mut callbacks = self.callbacks.lock();
            for (id, callback) in &callbacks.registered {
                dispatcher.register_with(*id, callback.clone());
            }
            callbacks.live = Some(Arc::clone(&dispatcher));
        }

        let mut sinks: Vec<Box<dyn SnapshotSink>> = vec![
            Box::new(LatestSink(Arc::clone(&self.latest))),
            Box::new(engines.game),
            Box::new(engines.race),
            Box::new(engines.driver),
            Box::new(Arc::clone(&dispatcher)),
        ];
        let result = self.session.run(&mut sinks, cancel).await;

        self.callbacks.lock().live = None;
        dispatcher.shutdown().await;
        Ok(result?)
    }
}

struct Worker {
    handle: JoinHandle<Result<(), ClientError>>,
    cancel: CancellationToken,
}

pub struct Client {
    inner: Arc<Inner>,
    console_ip: IpAddr,
    worker: Mutex<Option<Worker>>,
    started: AtomicBool,
}

fn build_runtime() -> Result<tokio::runtime::Runtime, ClientError> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("gt7-runtime")
        .build()
        .map_err(ClientError::Runtime)
}

/// Cancels `token` once `signal` fires. A handler that cannot be installed
/// leaves the session running until it ends on its own.
async fn watch_interrupt<F>(signal: F, token: CancellationToken)
where
    F: std::future::Future<Output = std::io::Result<()>>,
{
    match signal.await {
        Ok(()) => {
            tracing::info!("interrupted");
            token.cancel();
        }
        Err(err) => tracing::warn!(error = %err, "ctrl-c handler unavailable; interrupt disabled"),
    }
}

impl Client {
    /// Uses `config.console_ip`, or discovers a console on the local network.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let console_ip = match config.console_ip {
            Some(ip) => ip,
            None => discover(config.discovery_timeout).await?.ip,
        };
        Self::with_console(config, console_ip)
    }

    /// [`Client::connect`] for callers without a runtime. Must not be called
    /// from inside one.
    pub fn connect_blocking(config: ClientConfig) -> Result<Self, ClientError> {
        match config.console_ip {
            Some(ip) => Self::with_console(config, ip),
            None => tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(ClientError::Runtime)?
                .block_on(Self::connect(config)),
        }
    }

    fn with_console(config: ClientConfig, console_ip: IpAddr) -> Result<Self, ClientError> {
        let game = GameEvents::new();
        let race = RaceEvents::new();
        let driver = DriverEvents::new();

        let game_engine = GameEngine::new(Arc::clone(&game));
        let mode = game_engine.mode_handle();
        let mut race_engine = RaceEngine::new(Arc::clone(&race));
        if let Some(path) = &config.track_bounds_csv {
            race_engine = race_engine.with_track_detector(TrackDetector::from_csv(path)?);
        }
        let driver_engine =
            DriverEngine::new(Arc::clone(&driver)).with_shift_lights(config.shift_lights);

        let session = HeartbeatSession::new(config.session(console_ip));
        tracing::info!(%console_ip, variant = %config.variant, "client ready");

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                session,
                engines: Mutex::new(Some(Engines {
                    game: game_engine,
                    race: race_engine,
                    driver: driver_engine,
                })),
                callbacks: Mutex::new(Callbacks::default()),
                latest: Arc::new(ArcSwapOption::empty()),
                game,
                race,
                driver,
                mode,
            }),
            console_ip,
            worker: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    fn claim(&self) -> Result<(), ClientError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyRunning);
        }
        Ok(())
    }

    pub fn console_ip(&self) -> IpAddr {
        self.console_ip
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn game_events(&self) -> Arc<GameEvents> {
        Arc::clone(&self.inner.game)
    }

    pub fn race_events(&self) -> Arc<RaceEvents> {
        Arc::clone(&self.inner.race)
    }

    pub fn driver_events(&self) -> Arc<DriverEvents> {
        Arc::clone(&self.inner.driver)
    }

    pub fn game_mode(&self) -> Option<GameMode> {
        *self.inner.mode.read()
    }

    /// Latest decoded snapshot, if any frame has arrived.
    pub fn telemetry(&self) -> Option<Arc<Snapshot>> {
        self.inner.latest.load_full()
    }

    pub fn frame_counts(&self) -> FrameCounts {
        self.inner.session.stats().counts()
    }

    /// Callbacks can be registered before or while the session runs.
    pub fn register_callback(&self, callback: Callback) -> CallbackId {
        let id = CallbackId::generate();
        let mut callbacks = self.inner.callbacks.lock();
        if let Some(dispatcher) = &callbacks.live {
            dispatcher.register_with(id, callback.clone());
        }
        callbacks.registered.push((id, callback));
        id
    }

    pub fn deregister_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = self.inner.callbacks.lock();
        if let Some(dispatcher) = &callbacks.live {
            dispatcher.deregister(id);
        }
        let before = callbacks.registered.len();
        callbacks.registered.retain(|(existing, _)| *existing != id);
        callbacks.registered.len() != before
    }

    /// Runs on the caller's runtime until `cancel` fires or the session
    /// fails.
    pub async fn run_async(&self, cancel: CancellationToken) -> Result<(), ClientError> {
        self.claim()?;
        self.inner.drive(cancel).await
    }

    /// Blocks on an internal runtime until Ctrl-C or a terminal error.
    pub fn run(&self) -> Result<(), ClientError> {
        self.claim()?;
        let runtime = build_runtime()?;
        let cancel = CancellationToken::new();
        runtime.block_on(async {
            let interrupt = cancel.clone();
            tokio::spawn(watch_interrupt(tokio::signal::ctrl_c(), interrupt));
            self.inner.drive(cancel).await
        })
    }

    /// Runs the session on a background thread; see [`Client::stop`].
    pub fn start(&self) -> Result<(), ClientError> {
        let mut worker = self.worker.lock();
        self.claim()?;
        let runtime = build_runtime()?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let inner = Arc::clone(&self.inner);
        let handle = std::thread::Builder::new()
            .name("gt7-telemetry".into())
            .spawn(move || runtime.block_on(inner.drive(token)))
            .map_err(ClientError::Runtime)?;
        *worker = Some(Worker { handle, cancel });
        Ok(())
    }

    /// Cancels a session started with [`Client::start`] and waits for it.
    /// When this returns the socket is closed and no callback is running.
    pub fn stop(&self) -> Result<(), ClientError> {
        let worker = self.worker.lock().take().ok_or(ClientError::NotRunning)?;
        worker.cancel.cancel();
        worker.handle.join().map_err(|_| ClientError::Panicked)?
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.cancel.cancel();
            if worker.handle.join().is_err() {
                tracing::warn!("telemetry thread panicked");
            }
        }
    }
}
