use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::storage::StateStorage;
use crate::error::{StorageError, StoreError, StoreResult};

type Reply<R> = oneshot::Sender<Result<R, StorageError>>;

enum Command {
    Get {
        name: String,
        reply: Reply<Option<String>>,
    },
    Set {
        name: String,
        value: String,
        reply: Option<Reply<()>>,
    },
    Remove {
        name: String,
        reply: Reply<()>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the task that owns a persisted store's storage.
///
/// Commands run one at a time, in the order they were sent, so a write
/// issued after another always lands after it.
#[derive(Clone)]
pub(crate) struct StorageWorker {
    tx: mpsc::UnboundedSender<Command>,
}

impl StorageWorker {
    /// Spawn the worker on `runtime`. It stops once every handle is dropped.
    pub(crate) fn spawn(runtime: &Handle, storage: Arc<dyn StateStorage>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        runtime.spawn(run(storage, rx));
        Self { tx }
    }

    pub(crate) async fn get_item(&self, name: &str) -> StoreResult<Option<String>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Get {
            name: name.to_string(),
            reply,
        })?;
        Ok(rx.await.map_err(|_| StoreError::WorkerClosed)??)
    }

    pub(crate) async fn set_item(&self, name: &str, value: String) -> StoreResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Set {
            name: name.to_string(),
            value,
            reply: Some(reply),
        })?;
        Ok(rx.await.map_err(|_| StoreError::WorkerClosed)??)
    }

    /// Queue a write without waiting for it. Failures are logged by the
    /// worker.
    pub(crate) fn set_item_detached(&self, name: &str, value: String) -> StoreResult<()> {
        self.send(Command::Set {
            name: name.to_string(),
            value,
            reply: None,
        })
    }

    pub(crate) async fn remove_item(&self, name: &str) -> StoreResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Remove {
            name: name.to_string(),
            reply,
        })?;
        Ok(rx.await.map_err(|_| StoreError::WorkerClosed)??)
    }

    /// Wait until every command sent before this call has run.
    pub(crate) async fn flush(&self) -> StoreResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Flush { reply })?;
        rx.await.map_err(|_| StoreError::WorkerClosed)
    }

    fn send(&self, command: Command) -> StoreResult<()> {
        self.tx.send(command).map_err(|_| StoreError::WorkerClosed)
    }
}

async fn run(storage: Arc<dyn StateStorage>, mut rx: mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Get { name, reply } => {
                let result = storage.get_item(&name).await;
                debug!(%name, found = matches!(result, Ok(Some(_))), "storage read");
                let _ = reply.send(result);
            }
            Command::Set { name, value, reply } => {
                let result = storage.set_item(&name, value).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!(%name, error = %e, "failed to persist state");
                        }
                    }
                }
            }
            Command::Remove { name, reply } => {
                let result = storage.remove_item(&name).await;
                debug!(%name, ok = result.is_ok(), "storage remove");
                let _ = reply.send(result);
            }
            Command::Flush { reply } => {
                let _ = reply.send(());
            }
        }
    }
    debug!("storage worker stopped");
}
