//! The outbound half of the backend worker contract

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::operation::{AccountId, FolderId, MessageId, PartLocation, RetrievalSpec, SortKey};
use super::Serial;

/// Calls the action manager makes against the backend worker.
///
/// Every call is fire-and-forget: the worker reports back asynchronously through
/// [`ActionEvent`][super::ActionEvent]s tagged with the same serial.
pub trait Backend {
    /// Retrieve the folder list of an account
    fn retrieve_folder_list(
        &mut self,
        serial: Serial,
        account: AccountId,
        parent: Option<FolderId>,
        descending: bool,
    );

    /// Retrieve the message list of a folder
    fn retrieve_message_list(
        &mut self,
        serial: Serial,
        account: AccountId,
        folder: FolderId,
        minimum: u32,
        sort: SortKey,
    );

    /// Retrieve the content of one message part
    fn retrieve_message_part(&mut self, serial: Serial, location: &PartLocation);

    /// Retrieve a set of messages
    fn retrieve_messages(&mut self, serial: Serial, ids: &[MessageId], spec: RetrievalSpec);

    /// Stop whatever the worker is doing for this serial
    fn cancel_transfer(&mut self, serial: Serial);
}

/// Command sent to a backend worker running somewhere else (another task, another thread)
#[derive(Clone, Debug, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum BackendCommand {
    RetrieveFolderList {
        serial: Serial,
        account: AccountId,
        parent: Option<FolderId>,
        descending: bool,
    },
    RetrieveMessageList {
        serial: Serial,
        account: AccountId,
        folder: FolderId,
        minimum: u32,
        sort: SortKey,
    },
    RetrieveMessagePart {
        serial: Serial,
        location: PartLocation,
    },
    RetrieveMessages {
        serial: Serial,
        ids: Vec<MessageId>,
        spec: RetrievalSpec,
    },
    Cancel(Serial),
}

impl BackendCommand {
    /// Retrieves the serial that this command is about
    pub fn serial(&self) -> Serial {
        use BackendCommand::*;
        match self {
            RetrieveFolderList { serial, .. }
            | RetrieveMessageList { serial, .. }
            | RetrieveMessagePart { serial, .. }
            | RetrieveMessages { serial, .. }
            | Cancel(serial) => *serial,
        }
    }

    /// Whether this is a cancel request rather than a start
    pub fn is_cancel(&self) -> bool {
        matches!(self, BackendCommand::Cancel(_))
    }
}

/// A [`Backend`] that forwards every call as a [`BackendCommand`] over a channel.
///
/// If the worker went away the command is dropped; the operation then simply never reports back.
#[derive(Clone, Debug)]
pub struct ChannelBackend {
    tx: UnboundedSender<BackendCommand>,
}

impl ChannelBackend {
    /// Create a backend along with the receiving end the worker should listen on
    pub fn new() -> (Self, UnboundedReceiver<BackendCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelBackend { tx }, rx)
    }

    fn send(&self, cmd: BackendCommand) {
        if self.tx.send(cmd).is_err() {
            warn!("backend worker has gone away, dropping command");
        }
    }
}

impl Backend for ChannelBackend {
    fn retrieve_folder_list(
        &mut self,
        serial: Serial,
        account: AccountId,
        parent: Option<FolderId>,
        descending: bool,
    ) {
        self.send(BackendCommand::RetrieveFolderList {
            serial,
            account,
            parent,
            descending,
        });
    }

    fn retrieve_message_list(
        &mut self,
        serial: Serial,
        account: AccountId,
        folder: FolderId,
        minimum: u32,
        sort: SortKey,
    ) {
        self.send(BackendCommand::RetrieveMessageList {
            serial,
            account,
            folder,
            minimum,
            sort,
        });
    }

    fn retrieve_message_part(&mut self, serial: Serial, location: &PartLocation) {
        self.send(BackendCommand::RetrieveMessagePart {
            serial,
            location: location.clone(),
        });
    }

    fn retrieve_messages(&mut self, serial: Serial, ids: &[MessageId], spec: RetrievalSpec) {
        self.send(BackendCommand::RetrieveMessages {
            serial,
            ids: ids.to_vec(),
            spec,
        });
    }

    fn cancel_transfer(&mut self, serial: Serial) {
        self.send(BackendCommand::Cancel(serial));
    }
}
