use crate::orchestrator::MuteOrchestrator;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

pub const ACTIVITY_QUEUE_CAP: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityMsg {
    Activity(bool),
    RefreshRunning,
    Shutdown,
}

/// Single worker that applies activity transitions to the orchestrator in arrival order.
pub struct ActivityWorker {
    tx: Sender<ActivityMsg>,
    shutdown: AtomicBool,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl ActivityWorker {
    pub fn spawn(orchestrator: Arc<MuteOrchestrator>, refresh_every: Duration) -> io::Result<Self> {
        let (tx, rx) = bounded(ACTIVITY_QUEUE_CAP);
        let join_handle = thread::Builder::new()
            .name("hushmic-activity".to_string())
            .spawn(move || run_worker(orchestrator, rx, refresh_every))?;

        Ok(Self {
            tx,
            shutdown: AtomicBool::new(false),
            join_handle: Mutex::new(Some(join_handle)),
        })
    }

    pub fn sender(&self) -> Sender<ActivityMsg> {
        self.tx.clone()
    }

    /// Blocks while the queue is full; transitions are never dropped.
    pub fn notify(&self, active: bool) -> bool {
        self.tx.send(ActivityMsg::Activity(active)).is_ok()
    }

    /// Queues a restore pass behind pending transitions and waits for the worker to finish it.
    pub fn shutdown(&self) {
        if !self.shutdown.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(ActivityMsg::Shutdown);
        }
        if let Ok(mut h) = self.join_handle.lock() {
            if let Some(h) = h.take() {
                let _ = h.join();
            }
        }
    }
}

impl Drop for ActivityWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(orchestrator: Arc<MuteOrchestrator>, rx: Receiver<ActivityMsg>, refresh_every: Duration) {
    let ticker = tick(refresh_every);
    orchestrator.refresh_running();

    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(ActivityMsg::Activity(active)) => {
                    let transition = orchestrator.on_activity_changed(active);
                    debug!(active, ?transition, "activity applied");
                }
                Ok(ActivityMsg::RefreshRunning) => orchestrator.refresh_running(),
                Ok(ActivityMsg::Shutdown) | Err(_) => break,
            },
            recv(ticker) -> _ => orchestrator.refresh_running(),
        }
    }

    orchestrator.shutdown();
    info!("activity worker stopped");
}
