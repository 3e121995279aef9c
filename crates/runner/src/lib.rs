//! Process supervisor for the pipeline stages.
//!
//! Every stage consumer, tick loop and flush loop is registered as a named app
//! process. The runner starts them together and cancels all of them as soon as
//! one fails or SIGINT/SIGTERM arrives. Closers (rule-state flush, telemetry
//! shutdown) then run under a shared timeout.
//!
//! # Example
//!
//! ```no_run
//! use hyperstream_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     Runner::new()
//!         .with_named_process("heartbeat", |ctx| async move {
//!             loop {
//!                 tokio::select! {
//!                     _ = ctx.cancelled() => break,
//!                     _ = tokio::time::sleep(Duration::from_secs(1)) => {
//!                         tracing::info!("tick");
//!                     }
//!                 }
//!             }
//!             Ok(())
//!         })
//!         .with_closer(|| async move {
//!             tracing::info!("flushing state");
//!             Ok(())
//!         })
//!         .with_closer_timeout(Duration::from_secs(5))
//!         .run()
//!         .await;
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub type BoxedResultFuture = Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>;

/// A long-running process: receives the shared cancellation token.
pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> BoxedResultFuture + Send>;

/// Cleanup run once every app process has stopped.
pub type Closer = Box<dyn FnOnce() -> BoxedResultFuture + Send>;

pub struct Runner {
    app_processes: Vec<(String, AppProcess)>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Creates a runner with a 10 second closer timeout and nothing registered.
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Adds an anonymous app process.
    pub fn with_app_process<F, Fut>(self, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let name = format!("process-{}", self.app_processes.len());
        self.with_named_process(name, process)
    }

    /// Adds an app process whose name appears in every lifecycle log line.
    ///
    /// If any process returns an error, all processes are cancelled and the
    /// closers run.
    pub fn with_named_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.app_processes
            .push((name.into(), Box::new(|token| Box::pin(process(token)))));
        self
    }

    /// Adds an already boxed process, as produced by the workers' `into_runner_processes`.
    pub fn with_boxed_process(mut self, name: impl Into<String>, process: AppProcess) -> Self {
        self.app_processes.push((name.into(), process));
        self
    }

    /// Adds a closer. Closers run concurrently after the processes stop, and all
    /// of them run even when some fail.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Uses an externally owned token, so callers can trigger shutdown themselves.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Runs everything and exits the process: code 1 if a process failed, 0 otherwise.
    pub async fn run(self) {
        Self::spawn_signal_handlers(self.cancellation_token.clone());

        match self.run_until_stopped().await {
            Ok(()) => {
                tracing::info!("application exiting normally");
                std::process::exit(0);
            }
            Err(err) => {
                tracing::error!(error = %format!("{:#}", err), "application exiting with error");
                std::process::exit(1);
            }
        }
    }

    /// Runs the processes until one fails or the token is cancelled, then the closers.
    /// Returns the first process error.
    pub async fn run_until_stopped(self) -> Result<(), anyhow::Error> {
        let token = self.cancellation_token;
        let mut join_set = JoinSet::new();

        for (name, process) in self.app_processes {
            let process_token = token.clone();
            tracing::info!(process = %name, "starting app process");
            join_set.spawn(async move { (name.clone(), process(process_token).await) });
        }

        let mut first_error = None;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                joined = join_set.join_next() => {
                    match joined {
                        None => break,
                        Some(Ok((name, Ok(())))) => {
                            tracing::debug!(process = %name, "app process completed");
                        }
                        Some(Ok((name, Err(err)))) => {
                            tracing::error!(process = %name, error = %format!("{:#}", err), "app process failed");
                            first_error = Some(err);
                            token.cancel();
                            break;
                        }
                        Some(Err(err)) => {
                            tracing::error!(error = %err, "app process panicked");
                            first_error = Some(anyhow::anyhow!("app process panicked: {}", err));
                            token.cancel();
                            break;
                        }
                    }
                }
            }
        }

        // Cancelled processes get the chance to finish their in-flight message.
        while let Some(joined) = join_set.join_next().await {
            if let Ok((name, Err(err))) = joined {
                tracing::warn!(process = %name, error = %format!("{:#}", err), "app process failed during shutdown");
            }
        }

        if !self.closers.is_empty() {
            tracing::info!(timeout = ?self.closer_timeout, "running closers");
            match tokio::time::timeout(self.closer_timeout, Self::run_closers(self.closers)).await {
                Ok(()) => tracing::info!("all closers completed"),
                Err(_) => tracing::error!(timeout = ?self.closer_timeout, "closers timed out"),
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn spawn_signal_handlers(token: CancellationToken) {
        let ctrl_c_token = token.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("received shutdown signal");
                    ctrl_c_token.cancel();
                }
                Err(err) => tracing::error!(error = %err, "error setting up signal handler"),
            }
        });

        #[cfg(unix)]
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    tracing::info!("received SIGTERM signal");
                    token.cancel();
                }
                Err(err) => tracing::error!(error = %err, "error setting up SIGTERM handler"),
            }
        });
    }

    async fn run_closers(closers: Vec<Closer>) {
        let mut closer_set = JoinSet::new();
        for closer in closers {
            closer_set.spawn(async move { closer().await });
        }

        while let Some(result) = closer_set.join_next().await {
            match result {
                Ok(Ok(())) => tracing::debug!("closer completed"),
                Ok(Err(err)) => tracing::error!(error = %format!("{:#}", err), "closer failed"),
                Err(err) => tracing::error!(error = %err, "closer panicked"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cancellation_stops_processes_and_runs_closers() {
        let closed = Arc::new(AtomicBool::new(false));
        let closed_flag = closed.clone();
        let token = CancellationToken::new();
        let trigger = token.clone();

        let runner = Runner::new()
            .with_named_process("waiter", |ctx| async move {
                ctx.cancelled().await;
                Ok(())
            })
            .with_closer(move || async move {
                closed_flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .with_cancellation_token(token)
            .with_closer_timeout(Duration::from_secs(1));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        assert!(runner.run_until_stopped().await.is_ok());
        assert!(closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failing_process_cancels_the_others() {
        let stopped = Arc::new(AtomicBool::new(false));
        let stopped_flag = stopped.clone();

        let result = Runner::new()
            .with_named_process("waiter", move |ctx| async move {
                ctx.cancelled().await;
                stopped_flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .with_named_process("broken", |_| async move { Err(anyhow::anyhow!("boom")) })
            .run_until_stopped()
            .await;

        assert_eq!(result.unwrap_err().to_string(), "boom");
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_every_closer_runs_even_when_one_fails() {
        let counter = Arc::new(AtomicUsize::new(0));
        let first = counter.clone();
        let second = counter.clone();

        let runner = Runner::new()
            .with_closer(move || async move {
                first.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("flush failed"))
            })
            .with_closer(move || async move {
                second.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

        Runner::run_closers(runner.closers).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_anonymous_processes_are_numbered() {
        let runner = Runner::new()
            .with_app_process(|_| async move { Ok(()) })
            .with_app_process(|_| async move { Ok(()) });

        let names: Vec<&str> = runner.app_processes.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["process-0", "process-1"]);
    }
}
