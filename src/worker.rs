use log::{info, warn};
use tokio::{
    select,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;

use crate::check::execute;
use crate::config::{MAX_INTERVAL, Settings};
use crate::outcome::CheckOutcome;
use crate::probe::Probe;
use crate::sink::Logger;
use crate::table::TableRenderer;
use crate::target::Target;

/// Outcomes of one pass over the targets, in input order.
#[derive(Debug, Default)]
pub struct Tick {
    pub outcomes: Vec<CheckOutcome>,
    /// Set when the token fired mid-check; later targets were skipped.
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorExit {
    /// Stopped between ticks.
    Interrupted,
    /// Stopped while a check was in flight.
    CancelledMidCheck,
}

impl MonitorExit {
    pub fn exit_code(self) -> u8 {
        match self {
            MonitorExit::Interrupted => 0,
            MonitorExit::CancelledMidCheck => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorReport {
    pub ticks: u64,
    pub exit: MonitorExit,
}

/// Checks each target once, sequentially. Each check, retries included,
/// finishes before the next starts.
pub async fn run_tick<P: Probe>(
    probe: &P,
    targets: &[Target],
    settings: &Settings,
    logger: &Logger,
    token: &CancellationToken,
) -> Tick {
    let mut tick = Tick::default();
    for target in targets {
        let outcome = execute(
            probe,
            target,
            &settings.retry,
            settings.threshold,
            logger,
            token,
        )
        .await;
        let cancelled = outcome.was_cancelled();
        tick.outcomes.push(outcome);
        if cancelled {
            tick.cancelled = true;
            break;
        }
    }
    tick
}

/// Re-checks every target each `settings.interval` until `token` fires.
///
/// The first tick runs one interval after start. When a table is given it is
/// redrawn once all targets of a tick are done.
pub async fn monitor<P: Probe>(
    probe: &P,
    targets: &[Target],
    settings: &Settings,
    logger: &Logger,
    mut table: Option<&mut TableRenderer>,
    token: &CancellationToken,
) -> MonitorReport {
    info!("Starting monitoring...");
    info!("Check interval: {:?}", settings.interval);
    info!(
        "Threshold: {:?}, retries: {}, backoff: {:?}",
        settings.threshold, settings.retry.max_retries, settings.retry.backoff
    );
    info!("Monitoring {} targets", targets.len());

    // Resolved settings are already bounded; the clamp keeps the deadline math in range.
    let period = settings.interval.min(MAX_INTERVAL);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = 0;

    loop {
        // Interruptible wait
        select! {
            biased;
            () = token.cancelled() => {
                info!("Shutdown requested, stopping monitor");
                return MonitorReport { ticks, exit: MonitorExit::Interrupted };
            }
            _ = ticker.tick() => {}
        }

        info!("Checking target status...");
        let tick = run_tick(probe, targets, settings, logger, token).await;
        if tick.cancelled {
            warn!("Shutdown requested during a check, stopping monitor");
            return MonitorReport {
                ticks,
                exit: MonitorExit::CancelledMidCheck,
            };
        }
        ticks += 1;

        if let Some(table) = table.as_deref_mut() {
            if let Err(e) = table.render(&tick.outcomes) {
                warn!("Failed to render status table: {e}");
            }
        }
    }
}
