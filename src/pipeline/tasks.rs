//! Single-threaded execution contexts
//!
//! Each `BackgroundTask` is one named thread draining a job queue in order.
//! The pipeline runs three of them: capture (device callbacks, routing),
//! drawing (preview conversion) and inference (recognition).

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::error::TaskError;

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Stop,
}

/// Cheap, cloneable handle for posting work onto a task
#[derive(Clone)]
pub struct TaskHandle {
    name: Arc<str>,
    tx: Sender<Message>,
}

impl TaskHandle {
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> Result<(), TaskError> {
        self.tx
            .send(Message::Run(Box::new(job)))
            .map_err(|_| TaskError::Stopped)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Jobs waiting to run
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .finish()
    }
}

pub struct BackgroundTask {
    handle: TaskHandle,
    thread: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    pub fn start(name: &str) -> Result<Self, TaskError> {
        Self::start_on(name, None)
    }

    /// Start the task, optionally pinned to one core
    pub fn start_on(name: &str, core: Option<core_affinity::CoreId>) -> Result<Self, TaskError> {
        let (tx, rx) = flume::unbounded();
        let thread_name = name.to_string();
        let thread = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                if let Some(core) = core {
                    if !core_affinity::set_for_current(core) {
                        warn!(task = %thread_name, core = core.id, "failed to pin thread");
                    }
                }
                run(&thread_name, rx);
            })?;

        info!(task = name, "background task started");
        Ok(Self {
            handle: TaskHandle {
                name: Arc::from(name),
                tx,
            },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> TaskHandle {
        self.handle.clone()
    }

    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> Result<(), TaskError> {
        self.handle.post(job)
    }

    /// Run the jobs already queued, then stop and join the thread
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.handle.tx.send(Message::Stop);
        if thread.join().is_err() {
            warn!(task = %self.handle.name, "background task panicked");
        }
        info!(task = %self.handle.name, "background task stopped");
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(name: &str, rx: Receiver<Message>) {
    while let Ok(message) = rx.recv() {
        match message {
            Message::Run(job) => job(),
            Message::Stop => break,
        }
    }
    let dropped = rx.drain().count();
    if dropped > 0 {
        debug!(task = name, dropped, "discarded jobs posted after stop");
    }
}

/// The three contexts the pipeline is scheduled onto
pub struct BackgroundTaskPool {
    pub capture: BackgroundTask,
    pub drawing: BackgroundTask,
    pub inference: BackgroundTask,
}

impl BackgroundTaskPool {
    pub fn start(pin_threads: bool) -> Result<Self, TaskError> {
        let cores = if pin_threads {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };
        let core = |i: usize| (!cores.is_empty()).then(|| cores[i % cores.len()]);

        Ok(Self {
            inference: BackgroundTask::start_on("InferenceBackgroundThread", core(2))?,
            drawing: BackgroundTask::start_on("DrawingBackgroundThread", core(1))?,
            capture: BackgroundTask::start_on("CameraBackgroundThread", core(0))?,
        })
    }

    pub fn stop(&mut self) {
        self.capture.stop();
        self.drawing.stop();
        self.inference.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn jobs_run_in_order_on_the_named_thread() {
        let mut task = BackgroundTask::start("OrderTask").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let seen = Arc::clone(&seen);
            task.post(move || {
                let name = thread::current().name().map(str::to_owned);
                seen.lock().unwrap().push((i, name));
            })
            .unwrap();
        }
        task.stop();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        for (i, (n, name)) in seen.iter().enumerate() {
            assert_eq!(*n, i);
            assert_eq!(name.as_deref(), Some("OrderTask"));
        }
    }

    #[test]
    fn post_after_stop_fails() {
        let mut task = BackgroundTask::start("StoppedTask").unwrap();
        let handle = task.handle();
        task.stop();
        assert!(matches!(handle.post(|| {}), Err(TaskError::Stopped)));
    }

    #[test]
    fn slow_task_does_not_block_another() {
        let pool = BackgroundTaskPool::start(false).unwrap();
        let (tx, rx) = flume::bounded(1);

        pool.inference
            .post(|| thread::sleep(Duration::from_millis(300)))
            .unwrap();
        pool.drawing.post(move || tx.send(()).unwrap()).unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_ok());
    }
}
