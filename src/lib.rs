//! # nzbqueue
//!
//! Embeddable download-queue and post-processing core for binary
//! newsgroups.
//!
//! The crate owns a persistent queue of multi-file jobs, decides which
//! article to fetch next, deduplicates across runs, renames obfuscated
//! files from PAR2 metadata while articles stream in, and drives finished
//! jobs through verification/unpack/cleanup stages into a history with
//! retry and redownload support.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - no CLI or HTTP surface, purely a Rust crate for
//!   embedding
//! - **Event-driven** - consumers subscribe to queue events, no polling
//!   required
//! - **Narrow collaborators** - the NNTP transport, the PAR2 repair
//!   engine, unpackers and user scripts plug in behind small traits
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use nzbqueue::{Collaborators, Config, QueueServer};
//! # use nzbqueue::transport::{ArticleRequest, ArticleTransport, FetchOutcome};
//! # struct MyTransport;
//! # #[async_trait::async_trait]
//! # impl ArticleTransport for MyTransport {
//! #     async fn fetch(&self, _request: ArticleRequest) -> FetchOutcome {
//! #         FetchOutcome::Failed { server_id: 0, reason: "no servers".into() }
//! #     }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let collaborators = Collaborators::new(Arc::new(MyTransport));
//!     let server = QueueServer::new(config, collaborators).await?;
//!
//!     let mut events = server.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     server.start();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Persistence store: queue file, per-file side files, cache sentinel
pub mod diskstate;
/// Duplicate coordinator
pub mod dupe;
/// Error types
pub mod error;
/// History coordinator
pub mod history;
/// Data model: jobs, files, articles, history entries
pub mod model;
/// NZB intake: parsing, filename derivation, content hashes
pub mod nzb;
/// PAR2 packet metadata reader
pub mod par2;
/// Post-processing pipeline driver
pub mod postprocess;
/// Queue coordinator and editor
pub mod queue;
/// Direct renamer, par-renamer and the article content analyzer
pub mod rename;
/// Incoming-directory scanner
pub mod scanner;
/// Shared service context
pub mod services;
/// Article transport interface
pub mod transport;
/// Core identifiers, status enums and queue events
pub mod types;
/// Utility functions
pub mod utils;

use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::diskstate::DiskState;
use crate::model::DownloadQueue;
use crate::postprocess::{NoOpParChecker, NoOpScripts, NoOpUnpacker, PostProcessor};
use crate::queue::QueueCoordinator;
use crate::scanner::{NoOpScanScript, ScanCandidate, Scanner};
use crate::services::Services;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use postprocess::{ParChecker, PostScriptRunner, Unpacker};
pub use queue::{EditAction, MatchMode};
pub use scanner::ScanScript;
pub use transport::{ArticleBody, ArticleRequest, ArticleTransport, FetchOutcome};
pub use types::{AddStatus, FileId, NzbId, QueueEvent};

/// External collaborators plugged into the core.
///
/// Only the transport is mandatory; every post-processing engine defaults
/// to a no-op that marks its stage as skipped.
pub struct Collaborators {
    /// Article download transport
    pub transport: Arc<dyn ArticleTransport>,
    /// PAR2 verify/repair engine
    pub par_checker: Arc<dyn ParChecker>,
    /// Archive unpacker
    pub unpacker: Arc<dyn Unpacker>,
    /// Post-processing script runner
    pub scripts: Arc<dyn PostScriptRunner>,
    /// Scan-script hook for incoming files
    pub scan_script: Arc<dyn ScanScript>,
}

impl Collaborators {
    /// Wire a transport with no-op post-processing collaborators
    pub fn new(transport: Arc<dyn ArticleTransport>) -> Self {
        Self {
            transport,
            par_checker: Arc::new(NoOpParChecker),
            unpacker: Arc::new(NoOpUnpacker),
            scripts: Arc::new(NoOpScripts),
            scan_script: Arc::new(NoOpScanScript),
        }
    }
}

/// The assembled queue server: coordinator, scanner, history service and
/// post-processing pipeline over one shared queue.
pub struct QueueServer {
    queue: Arc<Mutex<DownloadQueue>>,
    services: Services,
    coordinator: Arc<QueueCoordinator>,
    scanner: Arc<Scanner>,
    post_processor: Arc<PostProcessor>,
    shutdown: CancellationToken,
    tasks: StdMutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl QueueServer {
    /// Create a server from a configuration and the external
    /// collaborators. Restores the persisted queue when one exists.
    pub async fn new(config: Config, collaborators: Collaborators) -> Result<Self> {
        std::fs::create_dir_all(&config.paths.dest_dir)?;
        std::fs::create_dir_all(&config.paths.nzb_dir)?;
        std::fs::create_dir_all(&config.paths.temp_dir)?;

        let disk_state = Arc::new(DiskState::new(config.paths.queue_dir.clone())?);

        if disk_state.cache_flag_exists() {
            tracing::warn!(
                "write cache flag found: the previous shutdown may not have flushed, \
                 verifying queue state"
            );
        }

        let queue = if disk_state.queue_exists() {
            match disk_state.load_queue() {
                Ok(queue) => {
                    tracing::info!(
                        jobs = queue.queue.len(),
                        history = queue.history.len(),
                        "restored queue from disk"
                    );
                    queue
                }
                Err(e) => {
                    tracing::error!(error = %e, "could not load queue state, starting empty");
                    DownloadQueue::new()
                }
            }
        } else {
            DownloadQueue::new()
        };
        let queue = Arc::new(Mutex::new(queue));

        let (events, _) = broadcast::channel(1000);
        let (post_tx, post_rx) = mpsc::unbounded_channel();
        let config = Arc::new(config);

        let services = Services {
            config: config.clone(),
            events,
            disk_state: disk_state.clone(),
            post_tx,
            post_cancel: Arc::default(),
        };

        if config.persistence.write_cache {
            disk_state.set_cache_flag();
        }

        let shutdown = CancellationToken::new();

        let coordinator = Arc::new(QueueCoordinator::new(
            queue.clone(),
            services.clone(),
            collaborators.transport,
            shutdown.clone(),
        ));

        let post_processor = Arc::new(PostProcessor::new(
            queue.clone(),
            services.clone(),
            collaborators.par_checker,
            collaborators.unpacker,
            collaborators.scripts,
            post_rx,
            shutdown.clone(),
        ));

        let scanner = Arc::new(Scanner::new(
            coordinator.clone(),
            services.clone(),
            collaborators.scan_script,
            shutdown.clone(),
        ));

        Ok(Self {
            queue,
            services,
            coordinator,
            scanner,
            post_processor,
            shutdown,
            tasks: StdMutex::new(Vec::new()),
        })
    }

    /// Spawn the long-lived tasks: coordinator loop, scanner loop,
    /// post-processing pipeline and the hourly history service.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if !tasks.is_empty() {
            return;
        }

        let coordinator = self.coordinator.clone();
        tasks.push(tokio::spawn(async move { coordinator.run().await }));

        let scanner = self.scanner.clone();
        tasks.push(tokio::spawn(async move { scanner.run().await }));

        let post_processor = self.post_processor.clone();
        tasks.push(tokio::spawn(async move { post_processor.run().await }));

        // history maintenance runs once per hour
        let queue = self.queue.clone();
        let services = self.services.clone();
        let shutdown = self.shutdown.clone();
        tasks.push(tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(60 * 60));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await; // the first tick fires immediately
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => {
                        let mut queue = queue.lock().await;
                        history::service_work(&services, &mut queue);
                    }
                }
            }
        }));
    }

    /// Subscribe to queue events. Multiple subscribers are supported;
    /// each receives all events independently.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.services.events.subscribe()
    }

    /// The queue coordinator (scheduling, merges, splits, edits)
    pub fn coordinator(&self) -> Arc<QueueCoordinator> {
        self.coordinator.clone()
    }

    /// The scanner (manual scan requests, external-file intake)
    pub fn scanner(&self) -> Arc<Scanner> {
        self.scanner.clone()
    }

    /// The shared queue lock, for inspection and tests
    pub fn download_queue(&self) -> Arc<Mutex<DownloadQueue>> {
        self.queue.clone()
    }

    /// Parse an NZB file from disk and add it to the queue
    pub async fn add_nzb_file(&self, path: &std::path::Path, category: &str) -> Result<NzbId> {
        let mut nzb = nzb::parse_nzb_file(path, category, &self.services.config)?;
        nzb.queued_filename = path.to_string_lossy().into_owned();
        Ok(self.coordinator.add_nzb_to_queue(nzb, false).await)
    }

    /// Synchronous intake of NZB content: the buffer lands in the watched
    /// directory and is processed by the scanner.
    pub async fn add_external_file(
        &self,
        nzb_name: &str,
        buffer: &[u8],
        candidate: ScanCandidate,
    ) -> (AddStatus, NzbId) {
        self.scanner
            .add_external_file(nzb_name, buffer, candidate)
            .await
    }

    /// Pause or resume global downloading
    pub fn set_download_paused(&self, paused: bool) {
        self.coordinator.set_paused(paused);
    }

    /// True while any unfinished work remains, post-processing included
    pub async fn has_more_jobs(&self) -> bool {
        self.coordinator.has_more_jobs().await
    }

    /// Graceful shutdown: stop all loops, flush the queue, drop the
    /// write-cache sentinel.
    pub async fn shutdown(&self) -> Result<()> {
        self.services.emit(QueueEvent::Shutdown);
        self.shutdown.cancel();

        let tasks: Vec<_> = {
            let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            tasks.drain(..).collect()
        };
        for task in tasks {
            task.await.ok();
        }

        let queue = self.queue.lock().await;
        self.services.disk_state.save_queue(&queue)?;
        drop(queue);

        self.services.disk_state.clear_cache_flag();
        tracing::info!("queue server stopped");
        Ok(())
    }
}

/// Run the server until SIGTERM/SIGINT, then shut down gracefully.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use nzbqueue::{Collaborators, Config, QueueServer, run_with_shutdown};
/// # use nzbqueue::transport::{ArticleRequest, ArticleTransport, FetchOutcome};
/// # struct MyTransport;
/// # #[async_trait::async_trait]
/// # impl ArticleTransport for MyTransport {
/// #     async fn fetch(&self, _request: ArticleRequest) -> FetchOutcome {
/// #         FetchOutcome::Failed { server_id: 0, reason: "no servers".into() }
/// #     }
/// # }
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let server = QueueServer::new(
///         Config::default(),
///         Collaborators::new(Arc::new(MyTransport)),
///     )
///     .await?;
///     server.start();
///     run_with_shutdown(server).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(server: QueueServer) -> Result<()> {
    wait_for_signal().await;
    server.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    // signal registration may fail in restricted environments
    let sigterm = signal(SignalKind::terminate());
    let sigint = signal(SignalKind::interrupt());

    match (sigterm, sigint) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM"),
                _ = sigint.recv() => tracing::info!("received SIGINT"),
            }
        }
        _ => {
            tracing::warn!("could not register signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    tokio::signal::ctrl_c().await.ok();
}
