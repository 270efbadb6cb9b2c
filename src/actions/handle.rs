use anyhow::Result;
use tokio::{
    sync::{
        mpsc::{self, UnboundedReceiver, UnboundedSender},
        oneshot,
    },
    task::JoinHandle,
};

use super::{
    AccountId, ActionEvent, ActionManager, Backend, FolderId, MessageId, OperationInfo,
    PartLocation, Priority, Request, RetrievalSpec, Serial, SortKey,
};

/// Command sent to the action manager task by something else (i.e. UI)
#[derive(Debug)]
enum Command {
    Submit(Request, Priority, oneshot::Sender<Serial>),
    Cancel(Serial, oneshot::Sender<bool>),
    CancelForMessage(MessageId, oneshot::Sender<usize>),
    CancelForLocation(PartLocation, oneshot::Sender<usize>),
    OperationsForMessage(MessageId, oneshot::Sender<Vec<Serial>>),
    OperationsForLocation(PartLocation, oneshot::Sender<Vec<Serial>>),
    OperationInfo(Serial, oneshot::Sender<Option<OperationInfo>>),
    Active(oneshot::Sender<Option<Serial>>),
    Queued(oneshot::Sender<Vec<Serial>>),
    IsIdle(oneshot::Sender<bool>),
    Subscribe(oneshot::Sender<UnboundedReceiver<ActionEvent>>),
}

/// A cloneable handle to an [`ActionManager`] running in its own task.
///
/// Cloning returns a handle to the same manager. The task shuts down once every handle has been
/// dropped.
#[derive(Clone, Debug)]
pub struct ActionHandle {
    tx: UnboundedSender<Command>,
}

/// Moves the manager into a new task that also listens for the backend worker's events.
pub fn spawn<B>(
    manager: ActionManager<B>,
    backend_rx: UnboundedReceiver<ActionEvent>,
) -> (ActionHandle, JoinHandle<()>)
where
    B: Backend + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(listen(manager, rx, backend_rx));
    (ActionHandle { tx }, handle)
}

impl ActionHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(make(tx))
            .map_err(|_| anyhow!("action manager has shut down"))?;
        Ok(rx.await?)
    }

    /// See [`ActionManager::submit`]
    pub async fn submit(&self, request: Request) -> Result<Serial> {
        let priority = request.default_priority();
        self.submit_with_priority(request, priority).await
    }

    /// See [`ActionManager::submit_with_priority`]
    pub async fn submit_with_priority(
        &self,
        request: Request,
        priority: Priority,
    ) -> Result<Serial> {
        self.call(|tx| Command::Submit(request, priority, tx)).await
    }

    /// See [`ActionManager::submit_list_folders`]
    pub async fn submit_list_folders(
        &self,
        account: AccountId,
        parent: Option<FolderId>,
        descending: bool,
    ) -> Result<Serial> {
        self.submit(Request::ListFolders {
            account,
            parent,
            descending,
        })
        .await
    }

    /// See [`ActionManager::submit_list_messages`]
    pub async fn submit_list_messages(
        &self,
        account: AccountId,
        folder: FolderId,
        minimum: u32,
        sort: SortKey,
    ) -> Result<Serial> {
        self.submit(Request::ListMessages {
            account,
            folder,
            minimum,
            sort,
        })
        .await
    }

    /// See [`ActionManager::submit_fetch_part`]
    pub async fn submit_fetch_part(&self, location: PartLocation) -> Result<Serial> {
        self.submit(Request::FetchPart { location }).await
    }

    /// See [`ActionManager::submit_fetch_messages`]
    pub async fn submit_fetch_messages(
        &self,
        ids: Vec<MessageId>,
        spec: RetrievalSpec,
    ) -> Result<Serial> {
        self.submit(Request::FetchMessages { ids, spec }).await
    }

    /// See [`ActionManager::cancel`]
    pub async fn cancel(&self, serial: Serial) -> Result<bool> {
        self.call(|tx| Command::Cancel(serial, tx)).await
    }

    /// See [`ActionManager::cancel_for_message`]
    pub async fn cancel_for_message(&self, id: MessageId) -> Result<usize> {
        self.call(|tx| Command::CancelForMessage(id, tx)).await
    }

    /// See [`ActionManager::cancel_for_location`]
    pub async fn cancel_for_location(&self, location: PartLocation) -> Result<usize> {
        self.call(|tx| Command::CancelForLocation(location, tx)).await
    }

    /// See [`ActionManager::operations_for_message`]
    pub async fn operations_for_message(&self, id: MessageId) -> Result<Vec<Serial>> {
        self.call(|tx| Command::OperationsForMessage(id, tx)).await
    }

    /// See [`ActionManager::operations_for_location`]
    pub async fn operations_for_location(&self, location: PartLocation) -> Result<Vec<Serial>> {
        self.call(|tx| Command::OperationsForLocation(location, tx)).await
    }

    /// See [`ActionManager::operation_info`]
    pub async fn operation_info(&self, serial: Serial) -> Result<Option<OperationInfo>> {
        self.call(|tx| Command::OperationInfo(serial, tx)).await
    }

    /// See [`ActionManager::active`]
    pub async fn active(&self) -> Result<Option<Serial>> {
        self.call(Command::Active).await
    }

    /// See [`ActionManager::queued`]
    pub async fn queued(&self) -> Result<Vec<Serial>> {
        self.call(Command::Queued).await
    }

    /// See [`ActionManager::is_idle`]
    pub async fn is_idle(&self) -> Result<bool> {
        self.call(Command::IsIdle).await
    }

    /// See [`ActionManager::subscribe`]
    pub async fn subscribe(&self) -> Result<UnboundedReceiver<ActionEvent>> {
        self.call(Command::Subscribe).await
    }
}

async fn listen<B: Backend>(
    mut manager: ActionManager<B>,
    mut cmd_rx: UnboundedReceiver<Command>,
    mut backend_rx: UnboundedReceiver<ActionEvent>,
) {
    let mut backend_open = true;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(cmd) => dispatch(&mut manager, cmd),
                None => {
                    debug!("all action handles dropped, shutting down");
                    break;
                }
            },

            evt = backend_rx.recv(), if backend_open => match evt {
                Some(evt) => manager.handle_backend_event(evt),
                None => {
                    warn!("backend event stream closed");
                    backend_open = false;
                }
            },
        }
    }
}

fn dispatch<B: Backend>(manager: &mut ActionManager<B>, cmd: Command) {
    // a dropped reply receiver just means the caller stopped waiting
    match cmd {
        Command::Submit(request, priority, tx) => {
            let _ = tx.send(manager.submit_with_priority(request, priority));
        }
        Command::Cancel(serial, tx) => {
            let _ = tx.send(manager.cancel(serial));
        }
        Command::CancelForMessage(id, tx) => {
            let _ = tx.send(manager.cancel_for_message(id));
        }
        Command::CancelForLocation(location, tx) => {
            let _ = tx.send(manager.cancel_for_location(&location));
        }
        Command::OperationsForMessage(id, tx) => {
            let _ = tx.send(manager.operations_for_message(id));
        }
        Command::OperationsForLocation(location, tx) => {
            let _ = tx.send(manager.operations_for_location(&location));
        }
        Command::OperationInfo(serial, tx) => {
            let _ = tx.send(manager.operation_info(serial));
        }
        Command::Active(tx) => {
            let _ = tx.send(manager.active());
        }
        Command::Queued(tx) => {
            let _ = tx.send(manager.queued());
        }
        Command::IsIdle(tx) => {
            let _ = tx.send(manager.is_idle());
        }
        Command::Subscribe(tx) => {
            let _ = tx.send(manager.subscribe());
        }
    }
}
