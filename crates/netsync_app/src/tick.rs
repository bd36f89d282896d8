//! Fixed-timestep driver.
//!
//! Each tick hands the simulation the current instant and the nominal step
//! length; the simulation runs its server and client updates from there.

use std::time::{Duration, Instant};

use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

/// Something advanced once per tick.
pub trait Step {
    fn step(&mut self, tick_id: u64, now: Instant, dt: Duration);
}

#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Target ticks per second.
    pub tick_rate: f64,
    /// Maximum number of ticks to run (0 = unlimited).
    pub max_ticks: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate: 30.0,
            max_ticks: 0,
        }
    }
}

#[derive(Debug)]
pub struct TickLoop {
    tick_id: u64,
    config: TickConfig,
}

impl TickLoop {
    #[must_use]
    pub fn new(config: TickConfig) -> Self {
        Self { tick_id: 0, config }
    }

    #[must_use]
    pub fn tick_id(&self) -> u64 {
        self.tick_id
    }

    #[must_use]
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.config.tick_rate)
    }

    /// Advance `target` by one tick at `now`.
    pub fn tick(&mut self, target: &mut impl Step, now: Instant) {
        self.tick_id += 1;
        target.step(self.tick_id, now, self.tick_duration());
    }

    /// Tick on a timer until `max_ticks` is reached, or forever.
    pub async fn run(&mut self, target: &mut impl Step) {
        let tick_duration = self.tick_duration();
        let mut timer = interval(tick_duration);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            tick_rate = self.config.tick_rate,
            max_ticks = self.config.max_ticks,
            "starting tick loop"
        );

        loop {
            let start = timer.tick().await.into_std();
            self.tick(target, start);

            if self.config.max_ticks > 0 && self.tick_id >= self.config.max_ticks {
                info!(ticks = self.tick_id, "tick loop complete");
                break;
            }

            let elapsed = start.elapsed();
            if elapsed > tick_duration {
                warn!(
                    tick_id = self.tick_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    budget_ms = tick_duration.as_millis() as u64,
                    "tick exceeded time budget"
                );
            }
        }
    }
}
