use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Error, Result};

use super::backend::Backend;
use super::event::Status;
use super::Serial;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;
            fn from_str(s: &str) -> Result<Self> {
                let id = s
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("invalid {}: {:?}", stringify!($name), s))?;
                Ok($name(id))
            }
        }
    };
}

id_type!(
    /// Opaque identifier of a mail account
    AccountId
);
id_type!(
    /// Opaque identifier of a folder
    FolderId
);
id_type!(
    /// Opaque identifier of a message
    MessageId
);

/// Location of a single part inside a message: the containing message plus the part number
/// path (`1.2` is the second child of the first part).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PartLocation {
    /// The message that contains this part
    pub message: MessageId,

    /// Part numbers from the root of the message down to this part
    pub path: Vec<u32>,
}

impl PartLocation {
    /// Construct a location from a message id and a part number path
    pub fn new(message: MessageId, path: impl Into<Vec<u32>>) -> Self {
        PartLocation {
            message,
            path: path.into(),
        }
    }

    /// String key used for indexing, e.g. `42-1.2`
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PartLocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-", self.message)?;
        for (i, num) in self.path.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", num)?;
        }
        Ok(())
    }
}

impl FromStr for PartLocation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (message, path) = match s.find('-') {
            Some(idx) => (&s[..idx], &s[idx + 1..]),
            None => bail!("part location {:?} is missing a part path", s),
        };
        let message = message.parse::<MessageId>()?;
        if path.is_empty() {
            return Ok(PartLocation::new(message, Vec::new()));
        }
        let path = path
            .split('.')
            .map(|num| {
                num.parse::<u32>()
                    .with_context(|| format!("invalid part number {:?} in {:?}", num, s))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(PartLocation { message, path })
    }
}

/// Ordering requested for a message listing
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SortKey {
    /// Whatever order the backend prefers
    Default,

    /// By timestamp, `true` for ascending
    TimeStamp(bool),

    /// By sender, `true` for ascending
    Sender(bool),

    /// By subject, `true` for ascending
    Subject(bool),

    /// By size, `true` for ascending
    Size(bool),
}

impl Default for SortKey {
    fn default() -> Self {
        SortKey::Default
    }
}

/// How much of a message to retrieve
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RetrievalSpec {
    /// Only flags
    Flags,

    /// Headers and structure
    MetaData,

    /// Full content
    Content,

    /// Let the backend decide based on its own policy
    Auto,
}

impl Default for RetrievalSpec {
    fn default() -> Self {
        RetrievalSpec::MetaData
    }
}

/// Scheduling priority. Higher priorities run first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    #[allow(missing_docs)]
    Low = 0,
    #[allow(missing_docs)]
    Normal = 1,
    #[allow(missing_docs)]
    High = 2,
}

/// A request for the backend worker, by kind
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// List the folders of an account, optionally below a parent folder
    ListFolders {
        /// Account to list
        account: AccountId,
        /// Folder to start from, or the account root
        parent: Option<FolderId>,
        /// Also list sub-folders
        descending: bool,
    },

    /// List the messages in a folder
    ListMessages {
        /// Account that owns the folder
        account: AccountId,
        /// Folder to list
        folder: FolderId,
        /// Minimum number of messages to retrieve
        minimum: u32,
        /// Ordering of the listing
        sort: SortKey,
    },

    /// Fetch the content of one message part
    FetchPart {
        /// The part to fetch
        location: PartLocation,
    },

    /// Fetch a set of messages
    FetchMessages {
        /// Messages to fetch
        ids: Vec<MessageId>,
        /// How much of each message
        spec: RetrievalSpec,
    },
}

impl Request {
    /// Listings are background work; content fetches are usually waited on by the user.
    pub fn default_priority(&self) -> Priority {
        match self {
            Request::ListFolders { .. } | Request::ListMessages { .. } => Priority::Low,
            Request::FetchPart { .. } | Request::FetchMessages { .. } => Priority::High,
        }
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Request::ListFolders { .. } => "list-folders",
            Request::ListMessages { .. } => "list-messages",
            Request::FetchPart { .. } => "fetch-part",
            Request::FetchMessages { .. } => "fetch-messages",
        }
    }

    /// Messages this request touches
    pub fn message_ids(&self) -> Vec<MessageId> {
        match self {
            Request::FetchPart { location } => vec![location.message],
            Request::FetchMessages { ids, .. } => ids.clone(),
            _ => Vec::new(),
        }
    }

    /// The message part this request touches, if any
    pub fn part_location(&self) -> Option<&PartLocation> {
        match self {
            Request::FetchPart { location } => Some(location),
            _ => None,
        }
    }
}

/// One scheduled request along with its bookkeeping
#[derive(Clone, Debug)]
pub struct Operation {
    /// Identity of the operation
    pub serial: Serial,

    /// What to ask the backend for
    pub request: Request,

    /// Scheduling priority
    pub priority: Priority,

    /// The last status reported by the backend while this operation was active
    pub last_status: Status,

    /// How many times this operation was restarted after an internal state reset
    pub resets: u32,

    /// Set once the operation was cancelled while started against the backend. It is never
    /// restarted after that.
    pub cancelled: bool,
}

impl Operation {
    /// Creates an operation with the request's default priority
    pub fn new(serial: Serial, request: Request) -> Self {
        let priority = request.default_priority();
        Operation::with_priority(serial, request, priority)
    }

    /// Creates an operation with an explicit priority
    pub fn with_priority(serial: Serial, request: Request, priority: Priority) -> Self {
        assert_ne!(serial, 0, "operations must have a non-zero serial");
        Operation {
            serial,
            request,
            priority,
            last_status: Status::default(),
            resets: 0,
            cancelled: false,
        }
    }

    /// Asks the backend to start this operation
    pub fn start<B: Backend + ?Sized>(&self, backend: &mut B) {
        let serial = self.serial;
        match &self.request {
            Request::ListFolders {
                account,
                parent,
                descending,
            } => backend.retrieve_folder_list(serial, *account, *parent, *descending),
            Request::ListMessages {
                account,
                folder,
                minimum,
                sort,
            } => backend.retrieve_message_list(serial, *account, *folder, *minimum, *sort),
            Request::FetchPart { location } => backend.retrieve_message_part(serial, location),
            Request::FetchMessages { ids, spec } => backend.retrieve_messages(serial, ids, *spec),
        }
    }

    /// Asks the backend to stop working on this operation
    pub fn cancel<B: Backend + ?Sized>(&self, backend: &mut B) {
        backend.cancel_transfer(self.serial);
    }

    /// Descriptive data handed out to collaborators
    pub fn info(&self) -> OperationInfo {
        OperationInfo {
            serial: self.serial,
            kind: self.request.kind(),
            priority: self.priority,
            message_ids: self.request.message_ids(),
            part_location: self.request.part_location().cloned(),
            cancelled: self.cancelled,
        }
    }
}

/// A snapshot of what an outstanding operation is about
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationInfo {
    /// Identity of the operation
    pub serial: Serial,
    /// Request kind, for display
    pub kind: &'static str,
    /// Scheduling priority
    pub priority: Priority,
    /// Messages the operation touches
    pub message_ids: Vec<MessageId>,
    /// Message part the operation touches
    pub part_location: Option<PartLocation>,
    /// Cancelled, waiting for the backend to report the operation finished
    pub cancelled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_location_key() {
        let loc = PartLocation::new(MessageId(42), vec![1, 2]);
        assert_eq!(loc.key(), "42-1.2");
        assert_eq!("42-1.2".parse::<PartLocation>().unwrap(), loc);
        assert_eq!(
            "7-3".parse::<PartLocation>().unwrap(),
            PartLocation::new(MessageId(7), vec![3])
        );
    }

    #[test]
    fn part_location_rejects_garbage() {
        assert!("42".parse::<PartLocation>().is_err());
        assert!("x-1".parse::<PartLocation>().is_err());
        assert!("42-1.b".parse::<PartLocation>().is_err());
        assert!("42-1.".parse::<PartLocation>().is_err());
    }

    #[test]
    fn whole_message_location() {
        let loc = PartLocation::new(MessageId(42), vec![]);
        assert_eq!(loc.key(), "42-");
        assert_eq!(loc.key().parse::<PartLocation>().unwrap(), loc);
    }

    #[test]
    fn default_priorities() {
        let list = Request::ListFolders {
            account: AccountId(1),
            parent: None,
            descending: true,
        };
        let fetch = Request::FetchMessages {
            ids: vec![MessageId(1)],
            spec: RetrievalSpec::Content,
        };
        assert_eq!(Operation::new(1, list).priority, Priority::Low);
        assert_eq!(Operation::new(2, fetch.clone()).priority, Priority::High);
        assert_eq!(
            Operation::with_priority(3, fetch, Priority::Normal).priority,
            Priority::Normal
        );
        assert!(Priority::High > Priority::Normal && Priority::Normal > Priority::Low);
    }

    #[test]
    fn touched_identities() {
        let loc = PartLocation::new(MessageId(9), vec![2]);
        let req = Request::FetchPart {
            location: loc.clone(),
        };
        assert_eq!(req.message_ids(), vec![MessageId(9)]);
        assert_eq!(req.part_location(), Some(&loc));

        let req = Request::ListMessages {
            account: AccountId(1),
            folder: FolderId(2),
            minimum: 20,
            sort: SortKey::default(),
        };
        assert!(req.message_ids().is_empty());
        assert!(req.part_location().is_none());
    }

    #[test]
    #[should_panic]
    fn zero_serial_is_a_bug() {
        Operation::new(
            0,
            Request::FetchPart {
                location: PartLocation::new(MessageId(1), vec![1]),
            },
        );
    }
}
