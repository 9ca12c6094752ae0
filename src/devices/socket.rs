// MIT License - Copyright (c) 2026 Peter Wright
// Socket/relay controller

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::config::PlcConfig;
use crate::database::{Assignment, Database};
use crate::error::{PlcError, Result};
use crate::event::{ChangeSource, EventSender, PlcEvent};
use crate::gpio::{Gpio, GpioPin};

/// Table holding one `(name, status)` row per socket.
pub const SOCKET_TABLE: &str = "socket";

/// Longest accepted socket name.
pub const SOCKET_NAME_MAX_LEN: usize = 50;

/// Kind of load behind a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketGroup {
    Socket,
    Light,
}

/// A relay output paired with a push button.
#[derive(Debug)]
pub struct Socket {
    name: String,
    button: GpioPin,
    relay: GpioPin,
    group: SocketGroup,
    /// Last commanded relay level. Held while the relay is written.
    status: Mutex<bool>,
}

impl Socket {
    pub fn new(name: impl Into<String>, button: GpioPin, relay: GpioPin, group: SocketGroup) -> Self {
        Self {
            name: name.into(),
            button,
            relay,
            group,
            status: Mutex::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn button(&self) -> &GpioPin {
        &self.button
    }

    pub fn relay(&self) -> &GpioPin {
        &self.relay
    }

    pub fn group(&self) -> SocketGroup {
        self.group
    }

    /// In-memory status; the relay is never read back.
    pub fn status(&self) -> bool {
        *self.status.lock()
    }
}

/// Completion of a background status save.
#[derive(Debug)]
pub struct SaveHandle {
    rx: oneshot::Receiver<Result<()>>,
}

impl SaveHandle {
    /// Wait for the save to finish and return its outcome.
    pub async fn wait(self) -> Result<()> {
        self.rx.await.map_err(|_| PlcError::ChannelClosed)?
    }
}

/// Result of a successful relay write.
#[derive(Debug)]
pub struct SocketUpdate {
    pub status: bool,
    /// Present when persistence was requested
    pub save: Option<SaveHandle>,
}

struct SaveJob {
    name: String,
    status: bool,
    done: oneshot::Sender<Result<()>>,
}

/// Socket status rows behind the persistence port.
///
/// Every open/update/close sequence runs under `lock`, so at most one
/// persistence operation touches the store at a time.
#[derive(Clone)]
struct StatusStore {
    db: Arc<dyn Database>,
    store: String,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl StatusStore {
    async fn save(&self, name: &str, status: bool) -> Result<()> {
        let _guard = self.lock.lock().await;
        let db = self.db.clone();
        let store = self.store.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || save_status(db.as_ref(), &store, &name, status))
            .await
            .map_err(|e| PlcError::Persistence(format!("save task failed: {}", e)))?
    }

    async fn load(&self, name: &str) -> Result<Option<bool>> {
        let _guard = self.lock.lock().await;
        let db = self.db.clone();
        let store = self.store.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || load_status(db.as_ref(), &store, &name))
            .await
            .map_err(|e| PlcError::Persistence(format!("load task failed: {}", e)))?
    }
}

fn save_status(db: &dyn Database, store: &str, name: &str, status: bool) -> Result<()> {
    let mut conn = db.open(store)?;
    let key = Assignment::new("name", name);
    let value = Assignment::new("status", status);

    let result = match conn.update(SOCKET_TABLE, &value, &key) {
        Ok(0) => conn.insert(SOCKET_TABLE, &[key, value]),
        Ok(_) => Ok(()),
        Err(e) => Err(e),
    };
    let closed = conn.close();
    result.and(closed)
}

fn load_status(db: &dyn Database, store: &str, name: &str) -> Result<Option<bool>> {
    let mut conn = db.open(store)?;
    let result = conn.select(SOCKET_TABLE, "status", &Assignment::new("name", name));
    let closed = conn.close();
    let value = result?;
    closed?;
    Ok(value.and_then(|v| v.as_bool()))
}

async fn save_worker(mut rx: mpsc::Receiver<SaveJob>, store: StatusStore, event_tx: EventSender) {
    while let Some(job) = rx.recv().await {
        let result = store.save(&job.name, job.status).await;
        match &result {
            Ok(()) => debug!("Socket \"{}\" status saved", job.name),
            Err(e) => {
                error!("Failed to save Socket \"{}\" status: {}", job.name, e);
                let _ = event_tx.send(PlcEvent::SaveFailed {
                    name: job.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
        let _ = job.done.send(result);
    }
    debug!("Socket save queue closed");
}

/// Owns the sockets, drives their relays and persists their status.
///
/// Sockets are registered through `&mut self` before the controller is
/// shared; once it sits behind an `Arc` the set is frozen and iterated
/// without locking.
pub struct SocketController {
    sockets: Vec<Arc<Socket>>,
    index: HashMap<String, usize>,
    gpio: Arc<dyn Gpio>,
    store: StatusStore,
    save_tx: mpsc::Sender<SaveJob>,
    event_tx: EventSender,
    poll_interval: Duration,
    debounce: Duration,
}

impl SocketController {
    /// Create an empty controller and spawn its save worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: &PlcConfig,
        gpio: Arc<dyn Gpio>,
        db: Arc<dyn Database>,
        event_tx: EventSender,
    ) -> Self {
        let store = StatusStore {
            db,
            store: config.socket_db.clone(),
            lock: Arc::new(tokio::sync::Mutex::new(())),
        };
        let (save_tx, save_rx) = mpsc::channel(config.save_queue_capacity);
        tokio::spawn(save_worker(save_rx, store.clone(), event_tx.clone()));

        Self {
            sockets: Vec::new(),
            index: HashMap::new(),
            gpio,
            store,
            save_tx,
            event_tx,
            poll_interval: config.poll_interval(),
            debounce: config.debounce(),
        }
    }

    /// Add a socket to the live set.
    pub fn register(&mut self, socket: Socket) -> Result<()> {
        if socket.name.is_empty() || socket.name.chars().count() > SOCKET_NAME_MAX_LEN {
            return Err(PlcError::config(format!(
                "socket name {:?} must be 1-{} characters",
                socket.name, SOCKET_NAME_MAX_LEN
            )));
        }
        if self.index.contains_key(&socket.name) {
            return Err(PlcError::DuplicateSocket { name: socket.name });
        }

        info!(
            "Add Socket \"{}\" button: \"{}\" relay: \"{}\" group: {:?}",
            socket.name, socket.button.name, socket.relay.name, socket.group
        );
        self.index.insert(socket.name.clone(), self.sockets.len());
        self.sockets.push(Arc::new(socket));
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<Arc<Socket>> {
        self.index.get(name).map(|&idx| self.sockets[idx].clone())
    }

    /// Sockets in registration order.
    pub fn sockets(&self) -> impl Iterator<Item = &Arc<Socket>> {
        self.sockets.iter()
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    pub fn get_status(&self, socket: &Socket) -> bool {
        socket.status()
    }

    /// Drive a socket's relay and optionally queue a status save.
    ///
    /// The status field is updated before the relay write and is not rolled
    /// back if the write fails. A failed write returns `Hardware` and skips
    /// the save. The save is queued without waiting; a full queue or a
    /// failed store write is reported through the returned handle and a
    /// `SaveFailed` event.
    pub async fn set_status(&self, socket: &Socket, status: bool, persist: bool) -> Result<SocketUpdate> {
        self.drive(socket, |_| status, persist, ChangeSource::Command).await
    }

    /// [`Self::set_status`] by socket name.
    pub async fn set_status_by_name(&self, name: &str, status: bool, persist: bool) -> Result<SocketUpdate> {
        self.set_status_from(name, status, persist, ChangeSource::Command)
            .await
    }

    pub(crate) async fn set_status_from(
        &self,
        name: &str,
        status: bool,
        persist: bool,
        source: ChangeSource,
    ) -> Result<SocketUpdate> {
        let socket = self.find(name).ok_or_else(|| PlcError::SocketNotFound {
            name: name.to_string(),
        })?;
        self.drive(&socket, |_| status, persist, source).await
    }

    /// Invert a socket's status, as a button press does.
    pub async fn toggle(&self, socket: &Socket, persist: bool) -> Result<SocketUpdate> {
        self.drive(socket, |current| !current, persist, ChangeSource::Button)
            .await
    }

    async fn drive(
        &self,
        socket: &Socket,
        next: impl FnOnce(bool) -> bool,
        persist: bool,
        source: ChangeSource,
    ) -> Result<SocketUpdate> {
        // Saves are queued under the socket lock so the queue order of one
        // socket matches the order of its relay writes.
        let (status, save) = {
            let mut current = socket.status.lock();
            let status = next(*current);
            *current = status;
            if let Err(e) = self.gpio.write(&socket.relay, status) {
                error!("Failed to write relay of Socket \"{}\": {}", socket.name, e);
                return Err(e);
            }
            let save = persist.then(|| self.queue_save(&socket.name, status));
            (status, save)
        };

        if status {
            info!("Socket \"{}\" on", socket.name);
        } else {
            info!("Socket \"{}\" off", socket.name);
        }
        let _ = self.event_tx.send(PlcEvent::SocketChanged {
            name: socket.name.clone(),
            status,
            source,
            at: Utc::now(),
        });
        Ok(SocketUpdate { status, save })
    }

    fn queue_save(&self, name: &str, status: bool) -> SaveHandle {
        let (done, rx) = oneshot::channel();
        let job = SaveJob {
            name: name.to_string(),
            status,
            done,
        };
        let (job, reason) = match self.save_tx.try_send(job) {
            Ok(()) => return SaveHandle { rx },
            Err(TrySendError::Full(job)) => (job, "save queue full"),
            Err(TrySendError::Closed(job)) => (job, "save queue closed"),
        };

        error!("Failed to queue status save for Socket \"{}\": {}", name, reason);
        let _ = self.event_tx.send(PlcEvent::SaveFailed {
            name: job.name,
            reason: reason.to_string(),
        });
        let _ = job.done.send(Err(PlcError::Persistence(reason.to_string())));
        SaveHandle { rx }
    }

    /// Load persisted status of every socket and drive the relays to it.
    ///
    /// Missing rows leave the socket off. Returns how many relays were set.
    pub async fn restore(&self) -> usize {
        let mut restored = 0;
        for socket in &self.sockets {
            let status = match self.store.load(&socket.name).await {
                Ok(status) => status.unwrap_or(false),
                Err(e) => {
                    warn!("Failed to load Socket \"{}\" status: {}", socket.name, e);
                    continue;
                }
            };
            match self
                .drive(socket, |_| status, false, ChangeSource::Restore)
                .await
            {
                Ok(_) => restored += 1,
                Err(e) => warn!("Failed to restore Socket \"{}\": {}", socket.name, e),
            }
        }
        restored
    }

    /// Start the button poll loop. Runs for the process lifetime.
    pub fn start(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        info!("Starting Socket controller");
        let controller = self.clone();
        tokio::spawn(async move { controller.poll_loop().await })
    }

    async fn poll_loop(&self) {
        loop {
            let mut pressed = false;

            for socket in &self.sockets {
                match self.gpio.read(&socket.button) {
                    Ok(true) => {
                        pressed = true;
                        if let Err(e) = self.toggle(socket, true).await {
                            warn!("Button toggle of Socket \"{}\" failed: {}", socket.name, e);
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        error!("Failed to read GPIO \"{}\": {}", socket.button.name, e);
                    }
                }
            }

            if pressed {
                sleep(self.debounce).await;
            }
            sleep(self.poll_interval).await;
        }
    }
}
