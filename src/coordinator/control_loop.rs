use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use super::events::{ConnectionEvent, ControlCommand};
use super::state::CoordinatorState;

/// Serialized owner of all coordinator state.
///
/// Exits after a `Stop` command or once every control sender is gone.
pub(super) async fn run_control_loop(
    mut state: CoordinatorState,
    mut control_rx: mpsc::UnboundedReceiver<ControlCommand>,
    mut event_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
) {
    let mut ticker = tokio::time::interval(state.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    state.publish();

    loop {
        tokio::select! {
            command = control_rx.recv() => {
                let Some(command) = command else {
                    state.shutdown("Coordinator handle dropped.", Instant::now());
                    break;
                };
                match command {
                    ControlCommand::StartRun { total, respond_to } => {
                        if respond_to.send(state.start_run(total)).is_err() {
                            // Requester dropped the response channel.
                        }
                    }
                    ControlCommand::AbortRun { run_id, respond_to } => {
                        if respond_to.send(state.abort_run(&run_id)).is_err() {
                            // Requester dropped the response channel.
                        }
                    }
                    ControlCommand::Stop { reason, respond_to } => {
                        state.shutdown(&reason, Instant::now());
                        if respond_to.send(()).is_err() {
                            // Requester dropped the response channel.
                        }
                        break;
                    }
                }
            }
            Some(event) = event_rx.recv() => {
                state.on_event(event, Instant::now());
            }
            _ = ticker.tick() => {
                state.on_tick(Instant::now());
            }
        }
    }
    debug!("Coordinator control loop exited");
}
