//! Execution manager — runs queued compiled queries one at a time.
//!
//! A single worker thread drains the run queue. For each item it registers
//! every datapoint the code can report in a [`KeyedLatch`], hands the code to
//! the collection runtime and waits until all datapoints reported, the per-item
//! timeout elapsed or a stop was requested.
//!
//! - Property errors short-circuit: every datapoint gets the error, nothing runs.
//! - Timeouts are recoverable: unreported datapoints get a timeout error and the
//!   worker moves on to the next item.
//! - Runtime failures and panics are reported once on the error channel and
//!   end the worker.
//!
//! ```ignore
//! let (queue_tx, queue_rx) = crossbeam_channel::unbounded();
//! let (results_tx, results_rx) = crossbeam_channel::unbounded();
//! let manager = ExecutionManager::new(runtime, queue_rx, results_tx, ExecutorConfig::from_env());
//! manager.start()?;
//! queue_tx.send(item)?;
//! for result in results_rx.iter() { /* correlate */ }
//! manager.stop();
//! ```

use crossbeam_channel::{after, bounded, select, Receiver, Sender, TryRecvError, TrySendError};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::config::ExecutorConfig;
use super::latch::KeyedLatch;
use super::memory::MemoryUsage;
use super::runtime::{CollectionRuntime, RawResult, ResultCallback, RunQueueItem};
use crate::error::ExecutionError;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Completion {
    Reported,
    TimedOut,
    Stopped,
}

pub struct ExecutionManager {
    inner: Arc<Worker>,
    stop_signal: Mutex<Option<Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    errors: Receiver<ExecutionError>,
}

impl ExecutionManager {
    pub fn new(
        runtime: Arc<dyn CollectionRuntime>,
        run_queue: Receiver<RunQueueItem>,
        results: Sender<RawResult>,
        config: ExecutorConfig,
    ) -> Self {
        let (stop_signal, stop) = bounded(1);
        // First report wins; later ones are dropped.
        let (error_tx, errors) = bounded(1);
        Self {
            inner: Arc::new(Worker {
                runtime,
                run_queue,
                results,
                errors: error_tx,
                stop,
                config,
            }),
            stop_signal: Mutex::new(Some(stop_signal)),
            handle: Mutex::new(None),
            errors,
        }
    }

    /// Spawns the worker. Calling it again while running is a no-op.
    pub fn start(&self) -> Result<(), ExecutionError> {
        let mut handle = lock(&self.handle);
        if handle.is_some() {
            return Ok(());
        }
        let worker = self.inner.clone();
        let spawned = thread::Builder::new()
            .name("policy-execution".into())
            .spawn(move || worker.run())
            .map_err(|e| ExecutionError::Runtime(e.into()))?;
        *handle = Some(spawned);
        Ok(())
    }

    /// Fatal errors; at most one is ever delivered.
    pub fn errors(&self) -> Receiver<ExecutionError> {
        self.errors.clone()
    }

    /// Closes the stop signal and joins the worker.
    pub fn stop(&self) {
        drop(lock(&self.stop_signal).take());
        if let Some(handle) = lock(&self.handle).take() {
            if handle.join().is_err() {
                tracing::warn!("execution worker panicked during shutdown");
            }
        }
    }
}

impl Drop for ExecutionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    runtime: Arc<dyn CollectionRuntime>,
    run_queue: Receiver<RunQueueItem>,
    results: Sender<RawResult>,
    errors: Sender<ExecutionError>,
    /// Never sent on; disconnects when the manager stops.
    stop: Receiver<()>,
    config: ExecutorConfig,
}

impl Worker {
    fn run(&self) {
        tracing::debug!("execution worker started");
        loop {
            // Stop wins over queued work.
            if self.stop_requested() {
                break;
            }
            select! {
                recv(self.stop) -> _ => break,
                recv(self.run_queue) -> item => {
                    let Ok(item) = item else {
                        tracing::debug!("run queue closed");
                        break;
                    };
                    match panic::catch_unwind(AssertUnwindSafe(|| self.execute(item))) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::error!(error = %e, "query execution failed");
                            self.report(e);
                            break;
                        }
                        Err(payload) => {
                            let message = panic_message(payload.as_ref());
                            tracing::error!(panic = %message, "execution worker panicked");
                            self.report(ExecutionError::Panicked(message));
                            break;
                        }
                    }
                },
            }
        }
        tracing::debug!("execution worker stopped");
    }

    fn stop_requested(&self) -> bool {
        matches!(self.stop.try_recv(), Err(TryRecvError::Disconnected))
    }

    fn report(&self, err: ExecutionError) {
        if let Err(TrySendError::Full(err)) = self.errors.try_send(err) {
            tracing::debug!(error = %err, "execution error already reported");
        }
    }

    /// Forwards a result to the sink, then marks its datapoint complete. A
    /// pending handoff is abandoned once stop is requested.
    fn result_sink(&self, latch: Arc<KeyedLatch>) -> ResultCallback {
        let results = self.results.clone();
        let stop = self.stop.clone();
        Arc::new(move |result: RawResult| {
            let code_id = result.code_id.clone();
            select! {
                send(results, result) -> sent => {
                    if sent.is_err() {
                        tracing::debug!(qrid = %code_id, "result sink closed");
                    }
                },
                recv(stop) -> _ => {},
            }
            latch.done(&code_id);
        })
    }

    fn execute(&self, item: RunQueueItem) -> Result<(), ExecutionError> {
        let latch = Arc::new(KeyedLatch::new());
        let sink = self.result_sink(latch.clone());

        let checksums = item.code.codepoint_checksums();
        for checksum in &checksums {
            latch.add(checksum.clone());
        }

        if let Some(message) = item.property_error() {
            tracing::debug!(qrid = %item.code.id, error = %message, "skipping query with failed property");
            for checksum in checksums {
                sink(RawResult::error(checksum, message.clone()));
            }
            return Ok(());
        }

        let (code, props) = item.into_parts();
        tracing::debug!(qrid = %code.id, "starting query execution");
        let started = Instant::now();

        let mut executor = self
            .runtime
            .executor(&code, props, sink.clone())
            .map_err(ExecutionError::Runtime)?;
        executor.run().map_err(ExecutionError::Runtime)?;

        let (completion, missing) = self.await_completion(&latch)?;
        let took = started.elapsed();
        if self.config.mem_debug {
            MemoryUsage::current().log();
        }

        match completion {
            Completion::Reported => {
                tracing::debug!(qrid = %code.id, took = ?took, "finished query execution");
                if took > self.config.slow_query_threshold {
                    tracing::warn!(qrid = %code.id, took = ?took, "slow query execution");
                }
            }
            Completion::TimedOut => {
                tracing::error!(
                    qrid = %code.id,
                    timeout = ?self.config.timeout,
                    "execution timed out"
                );
                if !missing.is_empty() {
                    tracing::warn!(qrid = %code.id, missing = ?missing, "unreported datapoints");
                }
                let message = ExecutionError::QueryTimeout.to_string();
                for checksum in missing {
                    sink(RawResult::error(checksum, message.clone()));
                }
            }
            Completion::Stopped => {
                tracing::debug!(
                    qrid = %code.id,
                    unreported = missing.len(),
                    "stopped while waiting for results"
                );
            }
        }
        Ok(())
    }

    /// Waits on a background observer so the wait can be bounded by the timeout
    /// and the stop signal. Returns the datapoints that never reported.
    fn await_completion(
        &self,
        latch: &Arc<KeyedLatch>,
    ) -> Result<(Completion, Vec<String>), ExecutionError> {
        let (released_tx, released) = bounded::<()>(1);
        let observer = {
            let latch = latch.clone();
            thread::Builder::new()
                .name("policy-execution-observer".into())
                .spawn(move || {
                    latch.wait();
                    let _ = released_tx.send(());
                })
                .map_err(|e| ExecutionError::Runtime(e.into()))?
        };

        let completion = select! {
            recv(released) -> _ => Completion::Reported,
            recv(after(self.config.timeout)) -> _ => Completion::TimedOut,
            recv(self.stop) -> _ => Completion::Stopped,
        };
        let missing = match completion {
            Completion::Reported => Vec::new(),
            // Releases the observer.
            _ => latch.decommission(),
        };
        if observer.join().is_err() {
            tracing::warn!("completion observer panicked");
        }
        Ok((completion, missing))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
