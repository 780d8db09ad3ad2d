use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info};
use tokio::sync::oneshot;

use crate::error::WorkerError;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of OS threads running blocking work (parsing, embedding
/// calls, database writes) on behalf of async callers.
///
/// The pool is shared by every job an engine runs, so its size bounds the
/// number of blocking operations in flight across all of them.
pub struct WorkerPool {
    task_sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    size: usize,
}

impl WorkerPool {
    /// Starts `worker_count` worker threads.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(worker_count: usize) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (task_sender, task_receiver) = unbounded::<Task>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let task_rx = task_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let handle = thread::Builder::new()
                .name(format!("codeindex-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, task_rx, shutdown_flag));
            match handle {
                Ok(handle) => workers.push(handle),
                Err(e) => error!("Failed to spawn worker {}: {}", worker_id, e),
            }
        }

        info!("Started {} workers", workers.len());

        Self {
            task_sender: Mutex::new(Some(task_sender)),
            size: workers.len(),
            workers: Mutex::new(workers),
            shutdown,
        }
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Runs `f` on a worker thread and waits for its result without
    /// blocking the async executor. A panic inside `f` is caught and
    /// reported as [`WorkerError::Panicked`].
    pub async fn run<F, T>(&self, f: F) -> Result<T, WorkerError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        if self.is_shutdown() {
            return Err(WorkerError::ChannelClosed);
        }

        let (result_tx, result_rx) = oneshot::channel();
        let task: Task = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f))
                .map_err(|payload| WorkerError::Panicked(panic_message(payload.as_ref())));
            // The caller may have stopped waiting.
            let _ = result_tx.send(outcome);
        });

        {
            let sender = self
                .task_sender
                .lock()
                .map_err(|_| WorkerError::ChannelClosed)?;
            let sender = sender.as_ref().ok_or(WorkerError::ChannelClosed)?;
            sender.send(task).map_err(|_| WorkerError::ChannelClosed)?;
        }

        result_rx.await.map_err(|_| WorkerError::Dropped)?
    }

    /// Signals workers to stop after their current task. Queued tasks are
    /// dropped and their callers receive [`WorkerError::Dropped`].
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Ok(mut sender) = self.task_sender.lock() {
            sender.take();
        }

        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => return,
        };
        for (i, worker) in workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }
}

fn run_worker(worker_id: usize, task_receiver: Receiver<Task>, shutdown: Arc<AtomicBool>) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match task_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(task) => task(),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} task channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
