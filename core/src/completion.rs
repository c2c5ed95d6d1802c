//! The designated completion thread.
//!
//! Every fan-out is posted here and executed in posting order on one thread,
//! so no two completions ever run concurrently, whichever exchange thread
//! produced them. A panicking callback is logged and does not stop the queue.

use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::sync::mpsc;
use tracing::{debug, error};

pub const COMPLETION_THREAD_NAME: &str = "netcache-completion";

type Job = Box<dyn FnOnce() + Send>;

pub(crate) struct CompletionQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl CompletionQueue {
    pub(crate) fn start() -> io::Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        std::thread::Builder::new()
            .name(COMPLETION_THREAD_NAME.to_string())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("completion callback panicked");
                    }
                }
                debug!("completion queue stopped");
            })?;
        Ok(Self { tx })
    }

    /// Queue `job`. If the thread is gone the job is dropped, which closes any
    /// channels it owns.
    pub(crate) fn post<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Box::new(job)).is_err() {
            error!("completion queue is closed, dropping delivery");
        }
    }
}
