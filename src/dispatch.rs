// Worker-thread dispatcher for CPU-bound pipeline jobs.
// Numan Thabit 2026

use std::{
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
};

use ahash::AHashSet;

type Job<T> = (u64, Box<dyn FnOnce() -> T + Send + 'static>);

/// Identifier of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkHandle(u64);

/// Runs submitted closures on a fixed pool of worker threads and hands their
/// results back to the control thread.
///
/// Results are delivered through [`poll`](Dispatcher::poll), drained
/// non-blockingly from the control thread, so completion never races with
/// other control-path activity. Each submission completes exactly once
/// unless cancelled first. Dropping the dispatcher shuts the pool down and
/// joins the workers.
#[derive(Debug)]
pub struct Dispatcher<T> {
    jobs: Option<Sender<Job<T>>>,
    done_rx: Receiver<(u64, T)>,
    next_id: u64,
    cancelled: AHashSet<u64>,
    workers: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> Dispatcher<T> {
    /// Spawns a pool of `threads` workers (at least one).
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let (job_tx, job_rx) = mpsc::channel::<Job<T>>();
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (done_tx, done_rx) = mpsc::channel();

        let workers = (0..threads)
            .map(|idx| {
                let job_rx = Arc::clone(&job_rx);
                let done_tx = done_tx.clone();
                thread::Builder::new()
                    .name(format!("tunnelport-worker-{idx}"))
                    .spawn(move || loop {
                        let job = {
                            let queue = job_rx.lock().expect("worker queue lock");
                            queue.recv()
                        };
                        match job {
                            Ok((id, work)) => {
                                let output = work();
                                if done_tx.send((id, output)).is_err() {
                                    break;
                                }
                            }
                            Err(_closed) => break,
                        }
                    })
                    .expect("spawn worker thread")
            })
            .collect();

        Self {
            jobs: Some(job_tx),
            done_rx,
            next_id: 0,
            cancelled: AHashSet::new(),
            workers,
        }
    }

    /// Submits `work` for execution off the control thread.
    pub fn submit(&mut self, work: impl FnOnce() -> T + Send + 'static) -> WorkHandle {
        let id = self.next_id;
        self.next_id += 1;
        self.jobs
            .as_ref()
            .expect("dispatcher is running")
            .send((id, Box::new(work)))
            .expect("worker pool alive");
        WorkHandle(id)
    }

    /// Suppresses the completion of a submitted job.
    ///
    /// The closure may still run (or already be running); its result is
    /// discarded when it arrives. Used for forced teardown, not mid-flight
    /// abort of the work itself.
    pub fn cancel(&mut self, handle: WorkHandle) {
        self.cancelled.insert(handle.0);
    }

    /// Returns a finished job, if any, without blocking.
    pub fn poll(&mut self) -> Option<(WorkHandle, T)> {
        loop {
            match self.done_rx.try_recv() {
                Ok((id, output)) => {
                    if self.cancelled.remove(&id) {
                        continue;
                    }
                    return Some((WorkHandle(id), output));
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return None,
            }
        }
    }
}

impl<T> Drop for Dispatcher<T> {
    fn drop(&mut self) {
        // Closing the job channel lets the workers drain and exit.
        self.jobs.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
