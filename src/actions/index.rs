use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

use super::operation::{MessageId, Operation, PartLocation};
use super::Serial;

/// Reverse lookup from messages and message parts to the outstanding operations touching them.
#[derive(Debug, Default)]
pub struct ReverseIndex {
    messages: HashMap<MessageId, BTreeSet<Serial>>,
    locations: HashMap<String, BTreeSet<Serial>>,
}

impl ReverseIndex {
    /// Records every identity the operation touches
    pub fn register(&mut self, op: &Operation) {
        for id in op.request.message_ids() {
            self.messages.entry(id).or_default().insert(op.serial);
        }
        if let Some(location) = op.request.part_location() {
            self.locations
                .entry(location.key())
                .or_default()
                .insert(op.serial);
        }
    }

    /// Forgets the operation; keys left without serials are dropped
    pub fn unregister(&mut self, op: &Operation) {
        for id in op.request.message_ids() {
            remove_serial(&mut self.messages, &id, op.serial);
        }
        if let Some(location) = op.request.part_location() {
            remove_serial(&mut self.locations, &location.key(), op.serial);
        }
    }

    /// Outstanding serials for a message, ascending
    pub fn for_message(&self, id: MessageId) -> Vec<Serial> {
        collect(self.messages.get(&id))
    }

    /// Outstanding serials for a message part, ascending
    pub fn for_location(&self, location: &PartLocation) -> Vec<Serial> {
        collect(self.locations.get(&location.key()))
    }

    /// Whether nothing is indexed at all
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.locations.is_empty()
    }
}

fn remove_serial<K: Hash + Eq>(map: &mut HashMap<K, BTreeSet<Serial>>, key: &K, serial: Serial) {
    if let Some(serials) = map.get_mut(key) {
        serials.remove(&serial);
        if serials.is_empty() {
            map.remove(key);
        }
    }
}

fn collect(serials: Option<&BTreeSet<Serial>>) -> Vec<Serial> {
    serials
        .map(|serials| serials.iter().copied().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::operation::{Request, RetrievalSpec};

    fn fetch_part(serial: Serial, msg: u64, path: &[u32]) -> Operation {
        Operation::new(
            serial,
            Request::FetchPart {
                location: PartLocation::new(MessageId(msg), path.to_vec()),
            },
        )
    }

    #[test]
    fn register_and_unregister() {
        let mut index = ReverseIndex::default();
        let a = fetch_part(1, 10, &[1]);
        let b = Operation::new(
            2,
            Request::FetchMessages {
                ids: vec![MessageId(10), MessageId(11)],
                spec: RetrievalSpec::Content,
            },
        );
        index.register(&a);
        index.register(&b);

        assert_eq!(index.for_message(MessageId(10)), vec![1, 2]);
        assert_eq!(index.for_message(MessageId(11)), vec![2]);
        let loc = PartLocation::new(MessageId(10), vec![1]);
        assert_eq!(index.for_location(&loc), vec![1]);

        index.unregister(&a);
        assert_eq!(index.for_message(MessageId(10)), vec![2]);
        assert!(index.for_location(&loc).is_empty());

        index.unregister(&b);
        assert!(index.is_empty());
    }

    #[test]
    fn unknown_identities_are_empty() {
        let index = ReverseIndex::default();
        assert!(index.for_message(MessageId(1)).is_empty());
        assert!(index
            .for_location(&PartLocation::new(MessageId(1), vec![1]))
            .is_empty());
    }
}
