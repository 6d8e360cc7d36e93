//! Background task that drives the tracking engine on a fixed interval

use std::time::Duration;
use tally_util::{Result as TallyResult, TallyError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::{CoreEvent, TrackingEngine};

/// Spawns the tracking loop
pub struct Tracker;

impl Tracker {
    /// Start ticking `engine` every `interval`, beginning immediately.
    ///
    /// Each tick runs on the blocking pool with the engine moved in and back
    /// out, so snapshot and store calls never stall the runtime and the
    /// engine is never shared. Events are forwarded in tick order.
    pub fn spawn(
        engine: TrackingEngine,
        interval: Duration,
    ) -> (TrackerHandle, mpsc::UnboundedReceiver<CoreEvent>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run(engine, interval, shutdown_rx, events_tx));

        (
            TrackerHandle {
                shutdown: shutdown_tx,
                task,
            },
            events_rx,
        )
    }
}

async fn run(
    mut engine: TrackingEngine,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<CoreEvent>,
) -> TallyResult<TrackingEngine> {
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval_secs = interval.as_secs_f64(), "Tracker running");

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                // A dropped handle counts as a shutdown request
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            _ = timer.tick() => {
                let now = tally_util::now();
                let (tick_events, returned) = tokio::task::spawn_blocking(move || {
                    let tick_events = engine.tick(now);
                    (tick_events, engine)
                })
                .await
                .map_err(|e| TallyError::tick(e.to_string()))?;
                engine = returned;

                for event in tick_events {
                    // Nobody listening is not a reason to stop tracking
                    let _ = events.send(event);
                }
            }
        }
    }

    debug!(ticks = engine.ticks(), "Tracker loop exited");
    Ok(engine)
}

/// Handle to a running tracker
pub struct TrackerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<TallyResult<TrackingEngine>>,
}

impl TrackerHandle {
    /// Ask the tracker to stop after the tick in progress, if any
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Stop the tracker and take the engine back
    pub async fn shutdown(self) -> TallyResult<TrackingEngine> {
        self.request_shutdown();
        self.task
            .await
            .map_err(|e| TallyError::tracker(format!("tracker task failed: {e}")))?
    }
}
