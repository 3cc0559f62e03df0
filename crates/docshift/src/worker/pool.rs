use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use super::runner::{ConversionRunner, RunOutcome, ABORTED_MESSAGE};
use crate::error::WorkerError;
use crate::model::JobId;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What happened to outstanding work during [`WorkerPool::shutdown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    /// Every worker finished before the deadline.
    pub drained: bool,
    /// Queued jobs recorded as failed without running.
    pub aborted: usize,
    /// Workers still inside a conversion when the pool gave up waiting.
    pub detached: usize,
}

/// Fixed set of worker threads draining a FIFO queue of job ids.
///
/// `submit` never blocks. Lifecycle is explicit: [`close`](Self::close)
/// stops intake, [`drain`](Self::drain) waits, [`force_stop`](Self::force_stop)
/// abandons whatever is still queued.
pub struct WorkerPool {
    job_sender: Mutex<Option<Sender<JobId>>>,
    job_receiver: Receiver<JobId>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    accepting: AtomicBool,
    abort: Arc<AtomicBool>,
    runner: Arc<ConversionRunner>,
}

impl WorkerPool {
    pub fn start(runner: Arc<ConversionRunner>, worker_count: usize) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }
        let (job_sender, job_receiver) = unbounded::<JobId>();
        let abort = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let abort_flag = Arc::clone(&abort);
            let worker_runner = Arc::clone(&runner);

            let handle = thread::Builder::new()
                .name(format!("docshift-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, job_rx, abort_flag, worker_runner));

            match handle {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Already-started workers exit once the sender is dropped.
                    abort.store(true, Ordering::SeqCst);
                    return Err(WorkerError::SpawnFailed(e.to_string()));
                }
            }
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            job_sender: Mutex::new(Some(job_sender)),
            job_receiver,
            workers: Mutex::new(workers),
            accepting: AtomicBool::new(true),
            abort,
            runner,
        })
    }

    pub fn submit(&self, job_id: JobId) -> Result<(), WorkerError> {
        if !self.is_accepting() {
            return Err(WorkerError::ChannelClosed);
        }
        let sender = self.job_sender.lock().map_err(|_| WorkerError::ChannelClosed)?;
        match sender.as_ref() {
            Some(tx) => tx.send(job_id).map_err(|_| WorkerError::ChannelClosed),
            None => Err(WorkerError::ChannelClosed),
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Number of submitted jobs no worker has picked up yet.
    pub fn queued(&self) -> usize {
        self.job_receiver.len()
    }

    /// Stops accepting submissions. Queued jobs are still processed.
    pub fn close(&self) {
        if self.accepting.swap(false, Ordering::SeqCst) {
            info!("Worker pool closed to new submissions");
        }
        // Dropping the sender lets workers exit once the queue is empty.
        if let Ok(mut sender) = self.job_sender.lock() {
            sender.take();
        }
    }

    /// Waits up to `timeout` for every worker to exit. Returns true if all did.
    ///
    /// Only returns true after [`close`](Self::close); open pools keep their
    /// workers waiting for more work. A timeout too large to represent as an
    /// instant waits without a deadline.
    pub fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let all_finished = match self.workers.lock() {
                Ok(workers) => workers.iter().all(|w| w.is_finished()),
                Err(_) => return false,
            };
            if all_finished {
                self.join_finished();
                return true;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return false;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
    }

    /// Raises the abort signal and fails every job still queued.
    ///
    /// Conversions already running are not interrupted; they still record
    /// their outcome. Returns the number of queued jobs that were aborted.
    pub fn force_stop(&self) -> usize {
        self.close();
        self.abort.store(true, Ordering::SeqCst);

        let mut aborted = 0;
        while let Ok(job_id) = self.job_receiver.try_recv() {
            if self.runner.abort(job_id, ABORTED_MESSAGE) == RunOutcome::Failed {
                aborted += 1;
            }
        }
        if aborted > 0 {
            warn!("Aborted {} queued jobs", aborted);
        }
        aborted
    }

    /// Close, wait up to `timeout`, then force-stop whatever is left.
    pub fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        info!("Shutting down worker pool...");
        self.close();
        if self.drain(timeout) {
            info!("All workers have stopped");
            return ShutdownReport {
                drained: true,
                ..Default::default()
            };
        }

        let aborted = self.force_stop();
        // Workers between jobs notice the abort within one poll interval.
        let drained = self.drain(POLL_INTERVAL * 2);
        let detached = self
            .workers
            .lock()
            .map(|mut workers| {
                let count = workers.len();
                workers.clear();
                count
            })
            .unwrap_or(0);
        if detached > 0 {
            warn!("Detached {} workers still converting", detached);
        }
        ShutdownReport {
            drained,
            aborted,
            detached,
        }
    }

    fn join_finished(&self) {
        let Ok(mut workers) = self.workers.lock() else {
            return;
        };
        for (i, worker) in workers.drain(..).enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Let idle workers exit; running ones finish on their own.
        self.close();
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<JobId>,
    abort: Arc<AtomicBool>,
    runner: Arc<ConversionRunner>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if abort.load(Ordering::SeqCst) {
            debug!("Worker {} received abort signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(POLL_INTERVAL) {
            Ok(job_id) => {
                if abort.load(Ordering::SeqCst) {
                    runner.abort(job_id, ABORTED_MESSAGE);
                    break;
                }
                debug!("Worker {} processing job {}", worker_id, job_id);
                runner.run(job_id);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
