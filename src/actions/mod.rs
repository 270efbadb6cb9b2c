//! Actions
//! ===
//!
//! Every request for the mail backend worker (listing folders, listing messages, fetching
//! message parts or whole messages) goes through an [`ActionManager`]. The manager makes sure
//! only one operation runs against the backend at a time:
//!
//! - each submitted request gets a [`Serial`] that is never reused
//! - pending work is ordered by [`Priority`], first-come first-served within a priority
//! - a higher priority request preempts a running lower priority one, which is cancelled on the
//!   backend and put back at the front of the queue
//! - backend events are only forwarded for the operation that is currently active
//!
//! The manager also keeps a reverse index from messages and message parts to the operations
//! that touch them, so UI code can display per-message progress or stop a download without
//! holding on to the operations themselves.
//!
//! [`ActionManager`] is a plain synchronous state machine. To share it between tasks, move it
//! into an actor with [`spawn`] and talk to it through an [`ActionHandle`].

mod backend;
mod event;
mod handle;
mod index;
mod operation;


use std::collections::{HashMap, VecDeque};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub use self::backend::{Backend, BackendCommand, ChannelBackend};
pub use self::event::{ActionEvent, Activity, Connectivity, ErrorCode, Status};
pub use self::handle::{spawn, ActionHandle};
pub use self::index::ReverseIndex;
pub use self::operation::{
    AccountId, FolderId, MessageId, Operation, OperationInfo, PartLocation, Priority, Request,
    RetrievalSpec, SortKey,
};

/// Identifier of a submitted operation. Never zero.
pub type Serial = u64;

/// Serializes operations against a single backend worker.
pub struct ActionManager<B> {
    backend: B,

    /// The operation whose backend events are forwarded. A preempted operation stays here
    /// (while also sitting at the front of the queue) until the backend reports it finished.
    active: Option<Serial>,
    queue: VecDeque<Serial>,
    records: HashMap<Serial, Operation>,
    index: ReverseIndex,
    last_serial: Serial,
    reset_retry_limit: Option<u32>,
    subscribers: Vec<UnboundedSender<ActionEvent>>,
}

impl<B: Backend> ActionManager<B> {
    /// Creates a manager that owns the given backend.
    ///
    /// `reset_retry_limit` bounds how many times a single operation is transparently restarted
    /// after the backend reports an internal state reset. `None` restarts forever.
    pub fn new(backend: B, reset_retry_limit: Option<u32>) -> Self {
        ActionManager {
            backend,
            active: None,
            queue: VecDeque::new(),
            records: HashMap::new(),
            index: ReverseIndex::default(),
            last_serial: 0,
            reset_retry_limit,
            subscribers: Vec::new(),
        }
    }

    /// Registers a new listener for lifecycle events. Dropping the receiver unsubscribes.
    pub fn subscribe(&mut self) -> UnboundedReceiver<ActionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Retrieves the folder list of an account
    pub fn submit_list_folders(
        &mut self,
        account: AccountId,
        parent: Option<FolderId>,
        descending: bool,
    ) -> Serial {
        self.submit(Request::ListFolders {
            account,
            parent,
            descending,
        })
    }

    /// Retrieves the message list of a folder
    pub fn submit_list_messages(
        &mut self,
        account: AccountId,
        folder: FolderId,
        minimum: u32,
        sort: SortKey,
    ) -> Serial {
        self.submit(Request::ListMessages {
            account,
            folder,
            minimum,
            sort,
        })
    }

    /// Retrieves the content of a single message part
    pub fn submit_fetch_part(&mut self, location: PartLocation) -> Serial {
        self.submit(Request::FetchPart { location })
    }

    /// Retrieves a set of messages
    pub fn submit_fetch_messages(&mut self, ids: Vec<MessageId>, spec: RetrievalSpec) -> Serial {
        self.submit(Request::FetchMessages { ids, spec })
    }

    /// Schedules any request at its default priority and returns its serial
    pub fn submit(&mut self, request: Request) -> Serial {
        let priority = request.default_priority();
        self.submit_with_priority(request, priority)
    }

    /// Schedules a request at the given priority and returns its serial
    pub fn submit_with_priority(&mut self, request: Request, priority: Priority) -> Serial {
        self.last_serial += 1;
        let op = Operation::with_priority(self.last_serial, request, priority);
        debug!(
            "submitting [{}] {} ({:?})",
            op.serial,
            op.request.kind(),
            op.priority
        );
        self.index.register(&op);
        let serial = op.serial;
        self.enqueue(op);
        serial
    }

    /// Cancels an operation. Returns false if the serial is not outstanding.
    ///
    /// Cancelling the active operation only asks the backend to stop; the backend's final
    /// activity event completes it as usual, and until then the operation stays listed by the
    /// query methods with [`OperationInfo::cancelled`] set. A queued operation is dropped
    /// immediately and a `Failed` activity is emitted on its behalf.
    pub fn cancel(&mut self, serial: Serial) -> bool {
        let queued_at = self.queue.iter().position(|s| *s == serial);

        if self.active == Some(serial) {
            let op = match self.records.get_mut(&serial) {
                Some(op) => op,
                None => return false,
            };
            if op.cancelled {
                return true;
            }
            op.cancelled = true;

            match queued_at {
                None => {
                    debug!("cancelling active operation [{}]", serial);
                    op.cancel(&mut self.backend);
                }
                Some(pos) => {
                    // preempted: the backend was already told to stop, so just make sure it
                    // doesn't get started again
                    debug!("cancelling preempted operation [{}]", serial);
                    self.queue.remove(pos);
                }
            }
            return true;
        }

        let pos = match queued_at {
            Some(pos) => pos,
            None => return false,
        };

        debug!("cancelling queued operation [{}]", serial);
        self.queue.remove(pos);
        if let Some(op) = self.records.remove(&serial) {
            self.index.unregister(&op);
        }
        self.emit(ActionEvent::Activity(serial, Activity::Failed));
        true
    }

    /// Cancels every outstanding operation touching the message. Returns how many were affected.
    pub fn cancel_for_message(&mut self, id: MessageId) -> usize {
        let serials = self.index.for_message(id);
        self.cancel_all(serials)
    }

    /// Cancels every outstanding operation touching the message part. Returns how many were
    /// affected.
    pub fn cancel_for_location(&mut self, location: &PartLocation) -> usize {
        let serials = self.index.for_location(location);
        self.cancel_all(serials)
    }

    /// Outstanding operations touching a message, oldest first
    pub fn operations_for_message(&self, id: MessageId) -> Vec<Serial> {
        self.index.for_message(id)
    }

    /// Outstanding operations touching a message part, oldest first
    pub fn operations_for_location(&self, location: &PartLocation) -> Vec<Serial> {
        self.index.for_location(location)
    }

    /// Describes an outstanding operation.
    ///
    /// Completion and lookup race each other, so `None` is an expected answer.
    pub fn operation_info(&self, serial: Serial) -> Option<OperationInfo> {
        self.records.get(&serial).map(Operation::info)
    }

    /// The operation currently started against the backend
    pub fn active(&self) -> Option<Serial> {
        self.active
    }

    /// Queued operations, in the order they will be started
    pub fn queued(&self) -> Vec<Serial> {
        self.queue.iter().copied().collect()
    }

    /// Whether there is nothing running and nothing waiting
    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.queue.is_empty()
    }

    /// Feeds an event reported by the backend worker into the state machine
    pub fn handle_backend_event(&mut self, evt: ActionEvent) {
        match evt {
            ActionEvent::Activity(serial, activity) => self.on_activity_changed(serial, activity),
            ActionEvent::Connectivity(serial, connectivity) => {
                if self.is_active(serial) {
                    self.emit(ActionEvent::Connectivity(serial, connectivity));
                }
            }
            ActionEvent::Progress(serial, value, total) => {
                if self.is_active(serial) {
                    self.emit(ActionEvent::Progress(serial, value, total));
                }
            }
            ActionEvent::Status(serial, status) => self.on_status_changed(serial, status),
        }
    }

    fn on_activity_changed(&mut self, serial: Serial, activity: Activity) {
        debug!("activity [{}] {:?}", serial, activity);
        if !self.is_active(serial) {
            trace!("ignoring activity for inactive operation [{}]", serial);
            return;
        }

        match activity {
            Activity::Pending | Activity::InProgress => {
                self.emit(ActionEvent::Activity(serial, activity));
            }

            Activity::Successful | Activity::Failed => {
                let preempted = self.queue.contains(&serial);
                let cancelled = self.records.get(&serial).map_or(false, |op| op.cancelled);
                if !preempted && !cancelled && self.restart_after_reset(serial) {
                    return;
                }

                self.active = None;
                if preempted {
                    self.emit(ActionEvent::Activity(serial, Activity::Pending));
                } else {
                    if let Some(op) = self.records.remove(&serial) {
                        self.index.unregister(&op);
                    }
                    self.emit(ActionEvent::Activity(serial, activity));
                }

                self.start_next();
            }
        }
    }

    fn on_status_changed(&mut self, serial: Serial, status: Status) {
        debug!("status [{}] {}", serial, status);
        if !self.is_active(serial) {
            return;
        }

        if let Some(op) = self.records.get_mut(&serial) {
            op.last_status = status.clone();
        }
        self.emit(ActionEvent::Status(serial, status));
    }

    /// Restarts the active operation in place if its last status was an internal state reset
    /// and it still has restarts left. Returns whether it was restarted.
    fn restart_after_reset(&mut self, serial: Serial) -> bool {
        let op = match self.records.get_mut(&serial) {
            Some(op) if op.last_status.is_internal_reset() => op,
            _ => return false,
        };

        if let Some(limit) = self.reset_retry_limit {
            if op.resets >= limit {
                warn!(
                    "operation [{}] was reset {} times, giving up on restarting it",
                    serial, op.resets
                );
                return false;
            }
        }

        op.resets += 1;
        op.last_status = Status::default();
        warn!(
            "restarting operation [{}] after an internal state reset (attempt {})",
            serial, op.resets
        );
        op.start(&mut self.backend);
        true
    }

    fn cancel_all(&mut self, serials: Vec<Serial>) -> usize {
        serials
            .into_iter()
            .filter(|s| {
                let already = self.records.get(s).map_or(false, |op| op.cancelled);
                !already && self.cancel(*s)
            })
            .count()
    }

    fn enqueue(&mut self, op: Operation) {
        let serial = op.serial;
        let priority = op.priority;
        self.records.insert(serial, op);

        match self.active {
            None => {
                debug_assert!(self.queue.is_empty());
                self.active = Some(serial);
                self.start(serial);
            }

            Some(active) => {
                // an active operation that is already queued has been preempted before and is
                // only waiting for the backend to confirm the cancel
                if !self.queue.contains(&active) && self.priority_of(active) < priority {
                    debug!("preempting [{}] in favor of [{}]", active, serial);
                    if let Some(op) = self.records.get(&active) {
                        op.cancel(&mut self.backend);
                    }
                    self.queue.push_front(active);
                }

                let records = &self.records;
                let pos = self.queue.iter().position(|s| {
                    records
                        .get(s)
                        .map_or(false, |queued| queued.priority < priority)
                });
                match pos {
                    Some(pos) => self.queue.insert(pos, serial),
                    None => self.queue.push_back(serial),
                }
            }
        }

        self.emit(ActionEvent::Activity(serial, Activity::Pending));
    }

    fn start_next(&mut self) {
        if let Some(next) = self.queue.pop_front() {
            self.active = Some(next);
            self.start(next);
        }
    }

    fn start(&mut self, serial: Serial) {
        if let Some(op) = self.records.get_mut(&serial) {
            debug!("starting [{}] {}", serial, op.request.kind());
            // a status left over from a preempted run must not decide the outcome of this one
            op.last_status = Status::default();
            op.start(&mut self.backend);
        }
    }

    fn priority_of(&self, serial: Serial) -> Priority {
        self.records
            .get(&serial)
            .map_or(Priority::Low, |op| op.priority)
    }

    fn is_active(&self, serial: Serial) -> bool {
        self.active == Some(serial)
    }

    fn emit(&mut self, evt: ActionEvent) {
        self.subscribers.retain(|tx| tx.send(evt.clone()).is_ok());
    }
}
