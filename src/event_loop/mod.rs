//! The process-wide ui loop.
//!
//! One native thread owns every ui object. Work reaches it through
//! [`UiLoop::run_async`] and [`UiLoop::run_sync`]; a call made from the loop
//! thread itself runs inline so listeners can call back into the bridge.

mod task;

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, DispatchError};

pub(crate) use task::panic_message;
use task::PendingTask;

static INSTANCE: Mutex<Option<UiLoop>> = parking_lot::const_mutex(None);

enum Job {
    Run(PendingTask),
    /// Wakes the loop so it looks at deferred work.
    Wake,
    Quit,
}

enum Next {
    Job(Job),
    Idle,
    Closed,
}

struct LoopShared {
    sender: mpsc::UnboundedSender<Job>,
    receiver: Mutex<mpsc::UnboundedReceiver<Job>>,
    idle: Mutex<VecDeque<PendingTask>>,
    thread_id: OnceLock<ThreadId>,
    thread: Mutex<Option<JoinHandle<()>>>,
    ready: AtomicBool,
    running: AtomicBool,
    stopping: AtomicBool,
    quit: AtomicBool,
    drain_limit: usize,
}

/// Handle to the running ui loop. Clones share the same thread.
#[derive(Clone)]
pub struct UiLoop {
    shared: Arc<LoopShared>,
}

impl UiLoop {
    /// Starts the loop, or returns the one already running.
    ///
    /// Blocks until the loop thread signals readiness, bounded by
    /// `config.init_timeout_ms`.
    pub fn start(config: &BridgeConfig) -> Result<UiLoop, BridgeError> {
        let mut slot = INSTANCE.lock();
        while let Some(existing) = slot.clone() {
            if !existing.is_running() {
                break;
            }
            if !existing.shared.stopping.load(Ordering::Acquire) {
                return Ok(existing);
            }
            // A stopping loop keeps its slot until the thread exits.
            if existing.is_loop_thread() {
                return Err(BridgeError::Initialization(
                    "ui loop is stopping on this thread".to_string(),
                ));
            }
            drop(slot);
            existing.join();
            thread::yield_now();
            slot = INSTANCE.lock();
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(LoopShared {
            sender,
            receiver: Mutex::new(receiver),
            idle: Mutex::new(VecDeque::new()),
            thread_id: OnceLock::new(),
            thread: Mutex::new(None),
            ready: AtomicBool::new(false),
            running: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            quit: AtomicBool::new(false),
            drain_limit: config.drain_limit.max(1),
        });

        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || run_loop(thread_shared, ready_tx))
            .map_err(|err| {
                BridgeError::Initialization(format!("failed to spawn ui thread: {err}"))
            })?;

        match ready_rx.recv_timeout(config.init_timeout()) {
            Ok(()) => {}
            Err(RecvTimeoutError::Timeout) => {
                shared.stopping.store(true, Ordering::Release);
                let _ = shared.sender.send(Job::Quit);
                return Err(BridgeError::Initialization(format!(
                    "ui loop not ready after {} ms",
                    config.init_timeout_ms
                )));
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = handle.join();
                return Err(BridgeError::Initialization(
                    "ui thread exited during startup".to_string(),
                ));
            }
        }

        *shared.thread.lock() = Some(handle);
        let ui = UiLoop { shared };
        *slot = Some(ui.clone());
        tracing::info!(target = "ui-loop", thread = %config.thread_name, "ui loop started");
        Ok(ui)
    }

    /// The registered loop, if one is running.
    pub fn current() -> Option<UiLoop> {
        INSTANCE
            .lock()
            .as_ref()
            .filter(|ui| ui.is_running() && !ui.shared.stopping.load(Ordering::Acquire))
            .cloned()
    }

    /// Stops the registered loop. No-op when nothing was started.
    pub fn shutdown() {
        let current = INSTANCE.lock().clone();
        if let Some(ui) = current {
            ui.stop();
        }
    }

    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire) && self.is_running()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn is_loop_thread(&self) -> bool {
        self.shared.thread_id.get() == Some(&thread::current().id())
    }

    /// Posts a quit behind all queued work and waits for the thread to exit.
    ///
    /// From the loop thread the quit takes effect once the current task
    /// returns; the loop stays registered until then.
    pub fn stop(&self) {
        if self.shared.stopping.swap(true, Ordering::AcqRel) {
            if !self.is_loop_thread() {
                self.join();
            }
            return;
        }
        let _ = self.shared.sender.send(Job::Quit);
        if !self.is_loop_thread() {
            self.join();
        }
        tracing::info!(target = "ui-loop", "ui loop stopped");
    }

    fn join(&self) {
        let handle = self.shared.thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(target = "ui-loop", "ui thread panicked while stopping");
            }
        }
    }

    /// Queues `work` without waiting for it.
    pub fn run_async<F>(&self, work: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_loop_thread() {
            if let Err(err) = PendingTask::new(work).run() {
                tracing::error!(target = "ui-loop", error = %err, "inline task failed");
            }
            return Ok(());
        }
        self.submit(PendingTask::new(work))
    }

    /// Runs `work` on the loop thread and blocks until it finished.
    ///
    /// Must not be called from inside an async runtime worker.
    pub fn run_sync<F, R>(&self, work: F) -> Result<R, DispatchError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_loop_thread() {
            return panic::catch_unwind(AssertUnwindSafe(work))
                .map_err(|payload| DispatchError::TaskPanicked(panic_message(payload.as_ref())));
        }

        let (value_tx, mut value_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        self.submit(PendingTask::with_completion(
            move || {
                let _ = value_tx.send(work());
            },
            done_tx,
        ))?;

        match done_rx.blocking_recv() {
            Ok(Ok(())) => value_rx.try_recv().map_err(|_| DispatchError::LoopExited),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(DispatchError::LoopExited),
        }
    }

    /// Queues low-priority work that runs only when no dispatched job waits.
    pub fn defer<F>(&self, work: F) -> Result<(), DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        if !self.is_running() {
            return Err(DispatchError::NotRunning);
        }
        self.shared.idle.lock().push_back(PendingTask::new(work));
        if !self.is_loop_thread() {
            self.shared
                .sender
                .send(Job::Wake)
                .map_err(|_| DispatchError::NotRunning)?;
        }
        Ok(())
    }

    /// Runs queued and deferred work until both queues are empty.
    ///
    /// Only meaningful on the loop thread; returns the number of tasks run.
    pub fn drain_pending(&self) -> usize {
        if !self.is_loop_thread() {
            return 0;
        }
        let mut ran = 0;
        while ran < self.shared.drain_limit && !self.shared.quit.load(Ordering::Acquire) {
            let queued = self.shared.receiver.lock().try_recv().ok();
            if let Some(job) = queued {
                if self.shared.execute(job) {
                    ran += 1;
                }
                continue;
            }
            let deferred = self.shared.idle.lock().pop_front();
            match deferred {
                Some(task) => {
                    self.shared.execute(Job::Run(task));
                    ran += 1;
                }
                None => break,
            }
        }
        if ran > 0 {
            tracing::debug!(target = "ui-loop", ran, "drained pending work");
        }
        ran
    }

    fn submit(&self, task: PendingTask) -> Result<(), DispatchError> {
        if !self.is_running() || self.shared.stopping.load(Ordering::Acquire) {
            return Err(DispatchError::NotRunning);
        }
        self.shared
            .sender
            .send(Job::Run(task))
            .map_err(|_| DispatchError::NotRunning)
    }
}

impl LoopShared {
    fn next(&self) -> Next {
        let mut receiver = self.receiver.lock();
        let has_idle = !self.idle.lock().is_empty();
        if has_idle {
            match receiver.try_recv() {
                Ok(job) => Next::Job(job),
                Err(mpsc::error::TryRecvError::Empty) => Next::Idle,
                Err(mpsc::error::TryRecvError::Disconnected) => Next::Closed,
            }
        } else {
            match receiver.blocking_recv() {
                Some(job) => Next::Job(job),
                None => Next::Closed,
            }
        }
    }

    /// Returns whether a task ran.
    fn execute(&self, job: Job) -> bool {
        match job {
            Job::Run(task) => {
                let sync = task.is_sync();
                if let Err(err) = task.run() {
                    if sync {
                        tracing::warn!(target = "ui-loop", error = %err, "sync task failed");
                    } else {
                        tracing::error!(target = "ui-loop", error = %err, "async task failed");
                    }
                }
                true
            }
            Job::Wake => false,
            Job::Quit => {
                self.quit.store(true, Ordering::Release);
                false
            }
        }
    }

    fn drain_queue(&self) {
        while !self.quit.load(Ordering::Acquire) {
            let queued = self.receiver.lock().try_recv().ok();
            match queued {
                Some(job) => {
                    self.execute(job);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
const SLOW_START_THREAD: &str = "wvbridge-slow-start";

fn run_loop(shared: Arc<LoopShared>, ready: std_mpsc::SyncSender<()>) {
    #[cfg(test)]
    if thread::current().name() == Some(SLOW_START_THREAD) {
        thread::sleep(std::time::Duration::from_millis(300));
    }
    let _ = shared.thread_id.set(thread::current().id());
    shared.running.store(true, Ordering::Release);
    shared.ready.store(true, Ordering::Release);
    let _ = ready.send(());
    tracing::debug!(target = "ui-loop", "ui thread entered loop");

    while !shared.quit.load(Ordering::Acquire) {
        match shared.next() {
            Next::Job(job) => {
                shared.execute(job);
                shared.drain_queue();
            }
            Next::Idle => {
                let deferred = shared.idle.lock().pop_front();
                if let Some(task) = deferred {
                    shared.execute(Job::Run(task));
                }
            }
            Next::Closed => break,
        }
    }

    shared.ready.store(false, Ordering::Release);
    shared.running.store(false, Ordering::Release);
    {
        let mut slot = INSTANCE.lock();
        if slot
            .as_ref()
            .is_some_and(|registered| Arc::ptr_eq(&registered.shared, &shared))
        {
            *slot = None;
        }
    }
    let mut receiver = shared.receiver.lock();
    receiver.close();
    let mut dropped = 0usize;
    while let Ok(job) = receiver.try_recv() {
        if matches!(job, Job::Run(_)) {
            dropped += 1;
        }
    }
    drop(receiver);
    dropped += std::mem::take(&mut *shared.idle.lock()).len();
    if dropped > 0 {
        tracing::warn!(target = "ui-loop", dropped, "ui loop exited with queued work");
    }
}
