//! Lifecycle coordination for long-running service processes.
//!
//! The runner owns a shared [`CancellationToken`] and drives the shutdown
//! sequence of the service:
//! - app processes run concurrently until a shutdown signal arrives or one fails
//! - the token is cancelled and processes get a bounded window to stop
//! - closers then run one after another, in registration order, exactly once,
//!   each bounded by the closer timeout
//!
//! The shutdown signal defaults to SIGHUP/SIGINT/SIGTERM/SIGQUIT but can be
//! replaced with any future, which is how tests drive the sequence.
//!
//! # Example
//!
//! ```no_run
//! use tempstream_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let runner = Runner::new()
//!         .with_named_process("worker", |ctx| async move {
//!             ctx.cancelled().await;
//!             tracing::info!("worker stopping");
//!             Ok(())
//!         })
//!         .with_closer("flush", || async move {
//!             tracing::info!("flushing");
//!             Ok(())
//!         })
//!         .with_closer_timeout(Duration::from_secs(5));
//!
//!     runner.run().await;
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type BoxedResultFuture = Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>;

/// Type alias for an app process function.
/// Takes a cancellation token and returns a future that resolves to Result<(), anyhow::Error>
pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> BoxedResultFuture + Send>;

/// Type alias for a closer function.
pub type Closer = Box<dyn FnOnce() -> BoxedResultFuture + Send>;

/// Future that resolves when the service should shut down.
pub type ShutdownSignal = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Coordinates app processes, the shutdown signal and the closers that
/// release resources afterwards.
pub struct Runner {
    app_processes: Vec<(String, AppProcess)>,
    closers: Vec<(String, Closer)>,
    closer_timeout: Duration,
    process_shutdown_timeout: Duration,
    cancellation_token: CancellationToken,
    shutdown_signal: Option<ShutdownSignal>,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Creates a new Runner with default configuration.
    ///
    /// Default settings:
    /// - Closer timeout: 10 seconds per closer
    /// - Process shutdown timeout: 5 seconds
    /// - Shutdown signal: SIGHUP, SIGINT, SIGTERM or SIGQUIT
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            process_shutdown_timeout: Duration::from_secs(5),
            cancellation_token: CancellationToken::new(),
            shutdown_signal: None,
        }
    }

    /// Adds an unnamed app process.
    pub fn with_app_process<F, Fut>(self, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let index = self.app_processes.len();
        self.with_named_process(format!("process_{}", index), process)
    }

    /// Adds an app process under a name used in log records.
    ///
    /// App processes run concurrently. If any process returns an error,
    /// the shared token is cancelled and the shutdown sequence starts.
    pub fn with_named_process<N, F, Fut>(mut self, name: N, process: F) -> Self
    where
        N: Into<String>,
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let process: AppProcess = Box::new(|token| Box::pin(process(token)));
        self.app_processes.push((name.into(), process));
        self
    }

    /// Adds a closer.
    ///
    /// Closers run after the app processes have stopped, sequentially and in
    /// the order they were added. A failing closer does not prevent the
    /// following ones from running.
    pub fn with_closer<N, F, Fut>(mut self, name: N, closer: F) -> Self
    where
        N: Into<String>,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let closer: Closer = Box::new(|| Box::pin(closer()));
        self.closers.push((name.into(), closer));
        self
    }

    /// Sets how long each closer may run. A closer that overruns is aborted
    /// and the next one starts. Default is 10 seconds.
    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Sets how long app processes get to observe cancellation before they
    /// are aborted. Default is 5 seconds.
    pub fn with_process_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.process_shutdown_timeout = timeout;
        self
    }

    /// Sets a custom cancellation token.
    ///
    /// This allows external control over process cancellation.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Replaces the OS signal listener with an arbitrary future.
    ///
    /// The shutdown sequence starts when the future resolves.
    pub fn with_shutdown_signal<F>(mut self, signal: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shutdown_signal = Some(Box::pin(signal));
        self
    }

    /// Runs the service and exits the process once shutdown completes.
    ///
    /// Exits with code 1 when an app process failed, 0 otherwise.
    pub async fn run(self) {
        match self.run_until_shutdown().await {
            Ok(()) => {
                info!("Application exiting normally");
                std::process::exit(0);
            }
            Err(err) => {
                error!("Application exiting with error: {:#}", err);
                std::process::exit(1);
            }
        }
    }

    /// Runs all app processes until shutdown, then executes the closers.
    ///
    /// This method:
    /// 1. Spawns all app processes concurrently
    /// 2. Waits for the shutdown signal or for a process to fail
    /// 3. Cancels the shared token and waits for processes to stop
    /// 4. Runs closers sequentially, each with the configured timeout
    ///
    /// Returns the first process error, if any.
    pub async fn run_until_shutdown(self) -> anyhow::Result<()> {
        let Runner {
            app_processes,
            closers,
            closer_timeout,
            process_shutdown_timeout,
            cancellation_token: token,
            shutdown_signal,
        } = self;

        let mut join_set = JoinSet::new();
        let mut process_names = HashMap::new();
        for (name, process) in app_processes {
            let process_token = token.clone();
            let task_name = name.clone();
            let handle = join_set.spawn(async move {
                let result = process(process_token).await;
                (task_name, result)
            });
            process_names.insert(handle.id(), name);
        }

        let shutdown_signal = shutdown_signal.unwrap_or_else(|| Box::pin(os_shutdown_signal()));
        let signal_token = token.clone();
        let signal_task = tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_signal => {
                    info!("Shutdown signal received, canceling everything");
                    signal_token.cancel();
                }
                _ = signal_token.cancelled() => {}
            }
        });

        let mut first_error = None;
        let mut processes_running = !join_set.is_empty();
        while !token.is_cancelled() {
            if !processes_running {
                debug!("No app process running, waiting for shutdown signal");
                token.cancelled().await;
                break;
            }

            tokio::select! {
                _ = token.cancelled() => break,
                joined = join_set.join_next() => match joined {
                    None => processes_running = false,
                    Some(Ok((name, Ok(())))) => {
                        debug!(process = %name, "App process completed");
                    }
                    Some(Ok((name, Err(err)))) => {
                        error!(process = %name, "App process error: {:#}", err);
                        first_error = Some(err);
                        token.cancel();
                    }
                    Some(Err(err)) => {
                        let err = panic_error(&process_names, err);
                        error!("{:#}", err);
                        first_error.get_or_insert(err);
                        token.cancel();
                    }
                },
            }
        }
        signal_task.abort();

        let drained = tokio::time::timeout(
            process_shutdown_timeout,
            Self::drain_processes(&mut join_set, &process_names, &mut first_error),
        )
        .await;
        if drained.is_err() {
            warn!(
                timeout = ?process_shutdown_timeout,
                "App processes did not stop in time, aborting"
            );
            join_set.shutdown().await;
        }

        if !closers.is_empty() {
            info!("Running closers with timeout of {:?} each", closer_timeout);
            Self::run_closers(closers, closer_timeout).await;
            info!("All closers finished");
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn drain_processes(
        join_set: &mut JoinSet<(String, Result<(), anyhow::Error>)>,
        process_names: &HashMap<task::Id, String>,
        first_error: &mut Option<anyhow::Error>,
    ) {
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => debug!(process = %name, "App process stopped"),
                Ok((name, Err(err))) => {
                    warn!(process = %name, "App process failed during shutdown: {:#}", err)
                }
                Err(err) => {
                    let err = panic_error(process_names, err);
                    error!("{:#} during shutdown", err);
                    first_error.get_or_insert(err);
                }
            }
        }
    }

    /// Runs closers one at a time, in order.
    async fn run_closers(closers: Vec<(String, Closer)>, timeout: Duration) {
        for (name, closer) in closers {
            let mut handle = tokio::spawn(closer());
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(Ok(()))) => debug!(closer = %name, "Closer completed successfully"),
                Ok(Ok(Err(err))) => error!(closer = %name, "Closer error: {:#}", err),
                Ok(Err(err)) => error!(closer = %name, "Closer panicked: {}", err),
                Err(_) => {
                    error!(closer = %name, "Closer timed out after {:?}", timeout);
                    handle.abort();
                }
            }
        }
    }
}

/// A process task that panicked (or was aborted) counts as a failed process.
fn panic_error(process_names: &HashMap<task::Id, String>, err: JoinError) -> anyhow::Error {
    let name = process_names
        .get(&err.id())
        .map(String::as_str)
        .unwrap_or("unknown");
    if err.is_panic() {
        anyhow::anyhow!("App process {} panicked: {}", name, err)
    } else {
        anyhow::anyhow!("App process {} was cancelled: {}", name, err)
    }
}

/// Resolves on the first hang-up, interrupt, terminate or quit signal.
///
/// If the handlers cannot be installed the error is logged and the future
/// never resolves.
async fn os_shutdown_signal() {
    match wait_for_termination_signal().await {
        Ok(signal) => info!(signal, "Received termination signal"),
        Err(err) => {
            error!("Error setting up signal handler: {}", err);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(unix)]
async fn wait_for_termination_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    let received = tokio::select! {
        _ = hangup.recv() => "SIGHUP",
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
    };
    Ok(received)
}

#[cfg(not(unix))]
async fn wait_for_termination_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}
