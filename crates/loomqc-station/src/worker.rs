//! Long-lived stage workers.
//!
//! Each worker owns one [`Stage`] on a dedicated OS thread. Requests go
//! in over an unbounded channel; every request carries its own oneshot
//! reply channel, so a reply can only ever reach the cycle that asked for
//! it. A worker takes one request at a time: submitting while the
//! previous request is still running fails with [`WorkerError::Busy`],
//! which keeps a stalled stage from piling up work after its cycle timed
//! out.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use loomqc_pipeline::RgbImage;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{StageError, WorkerError};
use crate::stages::Stage;

struct Request<T> {
    cycle: u64,
    image: Arc<RgbImage>,
    reply: oneshot::Sender<Result<T, StageError>>,
}

/// Handle to a stage running on its own thread.
pub struct StageWorker<S: Stage> {
    name: &'static str,
    requests: mpsc::UnboundedSender<Request<S::Output>>,
    busy: Arc<AtomicBool>,
}

impl<S: Stage> StageWorker<S> {
    /// Move `stage` onto a new worker thread.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the thread cannot be spawned.
    pub fn spawn(stage: S) -> std::io::Result<Self> {
        let name = stage.name();
        let (requests, receiver) = mpsc::unbounded_channel();
        let busy = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&busy);
        std::thread::Builder::new()
            .name(format!("stage-{name}"))
            .spawn(move || serve(stage, receiver, &flag))?;

        debug!(stage = name, "worker started");
        Ok(Self {
            name,
            requests,
            busy,
        })
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` while a request is being processed.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Hand `image` to the stage.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Busy`] if the previous request has not
    /// finished and [`WorkerError::Disconnected`] if the worker thread is
    /// gone.
    pub fn submit(&self, cycle: u64, image: Arc<RgbImage>) -> Result<Ticket<S::Output>, WorkerError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(WorkerError::Busy(self.name));
        }

        let (reply, receiver) = oneshot::channel();
        let request = Request {
            cycle,
            image,
            reply,
        };
        if self.requests.send(request).is_err() {
            self.busy.store(false, Ordering::Release);
            return Err(WorkerError::Disconnected(self.name));
        }

        Ok(Ticket {
            stage: self.name,
            reply: receiver,
        })
    }
}

/// A pending stage result.
#[must_use = "a ticket does nothing unless waited on"]
pub struct Ticket<T> {
    stage: &'static str,
    reply: oneshot::Receiver<Result<T, StageError>>,
}

impl<T> Ticket<T> {
    /// Wait up to `timeout` for the stage's reply.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Timeout`] when the deadline passes,
    /// [`WorkerError::Stage`] when the stage failed and
    /// [`WorkerError::Disconnected`] when the worker died.
    pub async fn wait(self, timeout: Duration) -> Result<T, WorkerError> {
        match tokio::time::timeout(timeout, self.reply).await {
            Err(_) => Err(WorkerError::Timeout {
                stage: self.stage,
                seconds: timeout.as_secs_f64(),
            }),
            Ok(Err(_)) => Err(WorkerError::Disconnected(self.stage)),
            Ok(Ok(Err(source))) => Err(WorkerError::Stage {
                stage: self.stage,
                source,
            }),
            Ok(Ok(Ok(output))) => Ok(output),
        }
    }
}

fn serve<S: Stage>(mut stage: S, mut receiver: mpsc::UnboundedReceiver<Request<S::Output>>, busy: &AtomicBool) {
    let name = stage.name();
    while let Some(request) = receiver.blocking_recv() {
        let started = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| stage.run(&request.image)))
            .unwrap_or_else(|payload| Err(StageError::Panicked(panic_message(payload.as_ref()))));

        #[allow(clippy::cast_possible_truncation)]
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => debug!(stage = name, cycle = request.cycle, elapsed_ms, "stage finished"),
            Err(e) => warn!(stage = name, cycle = request.cycle, elapsed_ms, error = %e, "stage failed"),
        }

        busy.store(false, Ordering::Release);
        if request.reply.send(result).is_err() {
            debug!(stage = name, cycle = request.cycle, "reply dropped, cycle already gave up");
        }
    }
    debug!(stage = name, "worker stopped");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}
