//! Bounded hand-off queue between the dispatcher and the worker pool.
//!
//! A tokio `mpsc` channel whose receiving half is shared by all workers. Its
//! capacity is the worker count, so the number of free slots tells the
//! dispatcher exactly how many jobs it can usefully fetch.

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};

use sluice_core::Job;

/// Create a queue holding at most `capacity` jobs.
pub fn channel<T>(capacity: usize) -> (HandoffSender<T>, HandoffReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        HandoffSender { tx },
        HandoffReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Dispatcher side. Dropping it closes the queue for further pushes.
#[derive(Debug)]
pub struct HandoffSender<T> {
    tx: mpsc::Sender<Job<T>>,
}

impl<T> HandoffSender<T> {
    /// Free slots (`capacity - queued`).
    pub fn available_slots(&self) -> usize {
        self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Queue a job, waiting for a slot if necessary.
    ///
    /// Fails only when every receiver is gone; the job is handed back.
    pub async fn push(&self, job: Job<T>) -> Result<(), Job<T>> {
        self.tx.send(job).await.map_err(|err| err.0)
    }
}

/// Worker side, cloned once per worker.
#[derive(Debug)]
pub struct HandoffReceiver<T> {
    rx: Arc<Mutex<mpsc::Receiver<Job<T>>>>,
}

impl<T> Clone for HandoffReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<T> HandoffReceiver<T> {
    /// Next job; `None` once the queue is closed and empty.
    pub async fn pull(&self) -> Option<Job<T>> {
        self.rx.lock().await.recv().await
    }

    /// Close the queue and take every job still buffered in it.
    ///
    /// Workers waiting in [`pull`](Self::pull) observe the closed, empty
    /// queue afterwards and exit.
    pub async fn close_and_drain(&self) -> Vec<Job<T>> {
        let mut rx = self.rx.lock().await;
        rx.close();

        let mut remaining = Vec::new();
        while let Ok(job) = rx.try_recv() {
            remaining.push(job);
        }
        remaining
    }

    /// Jobs currently buffered.
    pub async fn len(&self) -> usize {
        self.rx.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
