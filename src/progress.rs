//! Per-operation progress, as seen by whoever displays it

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::actions::{ActionEvent, Activity, Connectivity, Serial, Status};

/// How many finished operations are remembered
const FINISHED_HISTORY: usize = 64;

/// What is currently known about one outstanding operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressInfo {
    /// Which operation this is about
    pub serial: Serial,

    /// Last reported lifecycle state
    pub activity: Activity,

    /// Progress value, if the backend reported any yet
    pub value: Option<u32>,

    /// Progress total
    pub total: u32,

    /// Last reported connection state
    pub connectivity: Option<Connectivity>,

    /// Last reported status
    pub status: Option<Status>,
}

impl ProgressInfo {
    fn new(serial: Serial) -> Self {
        ProgressInfo {
            serial,
            activity: Activity::Pending,
            value: None,
            total: 1,
            connectivity: None,
            status: None,
        }
    }

    /// Completed fraction between 0 and 1, if known
    pub fn fraction(&self) -> Option<f64> {
        let value = self.value?;
        if self.total == 0 {
            return None;
        }
        Some((value as f64 / self.total as f64).min(1.0))
    }
}

/// Keeps track of progress for every outstanding operation by listening to action events.
///
/// This struct is clone-safe: cloning it will just return a reference to the same data structure
#[derive(Clone, Debug, Default)]
pub struct ProgressTracker {
    inner: Arc<RwLock<TrackerState>>,
}

#[derive(Debug, Default)]
struct TrackerState {
    outstanding: HashMap<Serial, ProgressInfo>,
    finished: VecDeque<(Serial, Activity)>,
}

impl ProgressTracker {
    /// Updates the tracked state with an event from the action manager
    pub fn handle_event(&self, evt: &ActionEvent) {
        let mut state = self.inner.write();
        let serial = evt.serial();

        match evt {
            ActionEvent::Activity(_, activity) if activity.is_terminal() => {
                state.outstanding.remove(&serial);
                state.finished.push_back((serial, *activity));
                while state.finished.len() > FINISHED_HISTORY {
                    state.finished.pop_front();
                }
            }
            ActionEvent::Activity(_, Activity::Pending) => {
                // covers requeueing after preemption, which restarts the progress
                state.outstanding.insert(serial, ProgressInfo::new(serial));
            }
            ActionEvent::Activity(_, activity) => {
                state.entry(serial).activity = *activity;
            }
            ActionEvent::Progress(_, value, total) => {
                let info = state.entry(serial);
                info.value = Some(*value);
                info.total = *total;
            }
            ActionEvent::Connectivity(_, connectivity) => {
                state.entry(serial).connectivity = Some(*connectivity);
            }
            ActionEvent::Status(_, status) => {
                state.entry(serial).status = Some(status.clone());
            }
        }
    }

    /// Progress of an outstanding operation
    pub fn progress_of(&self, serial: Serial) -> Option<ProgressInfo> {
        self.inner.read().outstanding.get(&serial).cloned()
    }

    /// Every outstanding operation, by serial
    pub fn outstanding(&self) -> Vec<ProgressInfo> {
        let state = self.inner.read();
        let mut infos = state.outstanding.values().cloned().collect::<Vec<_>>();
        infos.sort_by_key(|info| info.serial);
        infos
    }

    /// How a recently finished operation ended
    pub fn outcome_of(&self, serial: Serial) -> Option<Activity> {
        let state = self.inner.read();
        state
            .finished
            .iter()
            .rev()
            .find(|(s, _)| *s == serial)
            .map(|(_, activity)| *activity)
    }

    /// Consumes a subscription until the action manager goes away
    pub async fn run(self, mut events: UnboundedReceiver<ActionEvent>) {
        while let Some(evt) = events.recv().await {
            self.handle_event(&evt);
        }
        debug!("progress tracker stopped");
    }
}

impl TrackerState {
    fn entry(&mut self, serial: Serial) -> &mut ProgressInfo {
        self.outstanding
            .entry(serial)
            .or_insert_with(|| ProgressInfo::new(serial))
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::actions::ErrorCode;

    #[test]
    fn follows_an_operation_to_completion() {
        let tracker = ProgressTracker::default();
        tracker.handle_event(&ActionEvent::Activity(1, Activity::Pending));
        assert_eq!(tracker.progress_of(1).unwrap().fraction(), None);

        tracker.handle_event(&ActionEvent::Activity(1, Activity::InProgress));
        tracker.handle_event(&ActionEvent::Connectivity(1, Connectivity::Connected));
        tracker.handle_event(&ActionEvent::Progress(1, 1, 4));

        let info = tracker.progress_of(1).unwrap();
        assert_eq!(info.activity, Activity::InProgress);
        assert_eq!(info.connectivity, Some(Connectivity::Connected));
        assert_eq!(info.fraction(), Some(0.25));

        tracker.handle_event(&ActionEvent::Status(
            1,
            Status::new(ErrorCode::NoError, ""),
        ));
        tracker.handle_event(&ActionEvent::Activity(1, Activity::Successful));
        assert_eq!(tracker.progress_of(1), None);
        assert_eq!(tracker.outcome_of(1), Some(Activity::Successful));
        assert!(tracker.outstanding().is_empty());
    }

    #[test]
    fn requeued_operations_start_over() {
        let tracker = ProgressTracker::default();
        tracker.handle_event(&ActionEvent::Progress(3, 5, 10));
        tracker.handle_event(&ActionEvent::Activity(3, Activity::Pending));
        tracker.handle_event(&ActionEvent::Activity(4, Activity::Pending));

        let infos = tracker.outstanding();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].serial, 3);
        assert_eq!(infos[0].value, None);
    }

    #[test]
    fn finished_history_is_bounded() {
        let tracker = ProgressTracker::default();
        for serial in 1..=(FINISHED_HISTORY as u64 + 10) {
            tracker.handle_event(&ActionEvent::Activity(serial, Activity::Failed));
        }
        assert_eq!(tracker.outcome_of(1), None);
        assert_eq!(
            tracker.outcome_of(FINISHED_HISTORY as u64 + 10),
            Some(Activity::Failed)
        );
    }

    #[tokio::test]
    async fn runs_until_the_channel_closes() {
        let (tx, rx) = mpsc::unbounded_channel();
        let tracker = ProgressTracker::default();
        let task = tokio::spawn(tracker.clone().run(rx));

        tx.send(ActionEvent::Activity(2, Activity::Pending)).unwrap();
        tx.send(ActionEvent::Progress(2, 1, 2)).unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(tracker.progress_of(2).unwrap().fraction(), Some(0.5));
    }
}
