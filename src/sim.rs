//! A simulated backend worker.
//!
//! Stands in for the real mail backend when running the command-line tool: every operation
//! connects, ticks through a configurable number of progress steps and succeeds, unless it is
//! cancelled in between.

use std::collections::VecDeque;

use anyhow::Result;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::actions::{
    ActionEvent, Activity, BackendCommand, Connectivity, ErrorCode, Serial, Status,
};
use crate::config::SimulatorConfig;

/// Main entrypoint for the simulated worker. Runs until the command channel closes.
pub async fn run_worker(
    mut cmd_rx: UnboundedReceiver<BackendCommand>,
    events_tx: UnboundedSender<ActionEvent>,
    config: SimulatorConfig,
) -> Result<()> {
    // commands that arrived while another operation was running
    let mut backlog = VecDeque::new();

    loop {
        let cmd = match backlog.pop_front() {
            Some(cmd) => cmd,
            None => match cmd_rx.recv().await {
                Some(cmd) => cmd,
                None => break,
            },
        };

        if let BackendCommand::Cancel(serial) = cmd {
            debug!("nothing running for [{}], ignoring cancel", serial);
            continue;
        }

        debug!("worker starting {:?}", cmd);
        run_operation(cmd.serial(), &mut cmd_rx, &mut backlog, &events_tx, &config).await?;
    }

    debug!("worker shutting down");
    Ok(())
}

async fn run_operation(
    serial: Serial,
    cmd_rx: &mut UnboundedReceiver<BackendCommand>,
    backlog: &mut VecDeque<BackendCommand>,
    events_tx: &UnboundedSender<ActionEvent>,
    config: &SimulatorConfig,
) -> Result<()> {
    let send = |evt: ActionEvent| -> Result<()> {
        events_tx
            .send(evt)
            .map_err(|_| anyhow!("nobody is listening to the worker anymore"))
    };

    send(ActionEvent::Activity(serial, Activity::InProgress))?;
    send(ActionEvent::Connectivity(serial, Connectivity::Connected))?;

    for step in 1..=config.steps {
        tokio::time::sleep(config.step_delay()).await;

        let mut cancelled = false;
        while let Ok(cmd) = cmd_rx.try_recv() {
            match cmd {
                BackendCommand::Cancel(s) if s == serial => cancelled = true,
                other => backlog.push_back(other),
            }
        }

        if cancelled {
            debug!("worker cancelled [{}] at step {}", serial, step);
            send(ActionEvent::Status(
                serial,
                Status::new(ErrorCode::UserCancel, "cancelled"),
            ))?;
            send(ActionEvent::Activity(serial, Activity::Failed))?;
            return Ok(());
        }

        send(ActionEvent::Progress(serial, step, config.steps))?;
    }

    send(ActionEvent::Status(serial, Status::default()))?;
    send(ActionEvent::Activity(serial, Activity::Successful))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::actions::{AccountId, ActionManager, ChannelBackend, MessageId, PartLocation};

    fn fast() -> SimulatorConfig {
        SimulatorConfig {
            steps: 2,
            step_delay_ms: 1,
        }
    }

    async fn collect(rx: &mut UnboundedReceiver<ActionEvent>, serial: Serial) -> Vec<ActionEvent> {
        let mut events = Vec::new();
        while let Some(evt) = rx.recv().await {
            let done = matches!(evt, ActionEvent::Activity(s, a) if s == serial && a.is_terminal());
            events.push(evt);
            if done {
                break;
            }
        }
        events
    }

    #[tokio::test]
    async fn completes_operations() -> Result<()> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(cmd_rx, events_tx, fast()));

        cmd_tx.send(BackendCommand::RetrieveMessages {
            serial: 1,
            ids: vec![MessageId(1)],
            spec: Default::default(),
        })?;
        let events = collect(&mut events_rx, 1).await;
        assert_eq!(
            events,
            vec![
                ActionEvent::Activity(1, Activity::InProgress),
                ActionEvent::Connectivity(1, Connectivity::Connected),
                ActionEvent::Progress(1, 1, 2),
                ActionEvent::Progress(1, 2, 2),
                ActionEvent::Status(1, Status::default()),
                ActionEvent::Activity(1, Activity::Successful),
            ]
        );

        drop(cmd_tx);
        worker.await??;
        Ok(())
    }

    #[tokio::test]
    async fn drives_the_action_manager() -> Result<()> {
        let (backend, cmd_rx) = ChannelBackend::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        // slow enough that the fetch arrives while the list is still running
        let config = SimulatorConfig {
            steps: 2,
            step_delay_ms: 20,
        };
        tokio::spawn(run_worker(cmd_rx, events_tx, config));

        let (handle, _task) = crate::actions::spawn(ActionManager::new(backend, None), events_rx);
        let mut events = handle.subscribe().await?;

        let list = handle.submit_list_folders(AccountId(1), None, true).await?;
        let fetch = handle
            .submit_fetch_part(PartLocation::new(MessageId(3), vec![1]))
            .await?;

        // the list got preempted, so the fetch finishes first and the list is retried after
        let mut finished = Vec::new();
        while finished.len() < 2 {
            match events.recv().await {
                Some(ActionEvent::Activity(serial, activity)) if activity.is_terminal() => {
                    finished.push((serial, activity));
                }
                Some(_) => {}
                None => break,
            }
        }
        assert_eq!(
            finished,
            vec![(fetch, Activity::Successful), (list, Activity::Successful)]
        );
        Ok(())
    }
}
