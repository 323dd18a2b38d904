//! Fixed-period tick driver.
//!
//! One task owns the [`Game`] and fires it on a tokio interval. Ticks never
//! overlap: a tick that overruns its period makes the interval skip the
//! missed firings instead of queueing them.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use thiserror::Error;
use tokio::{
    sync::watch,
    time::{self, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    game::{Game, Outgoing, TickReport},
    world::WorldState,
};

/// The world as shared between the tick task and connection workers.
pub type SharedWorld = Arc<Mutex<WorldState>>;

/// Errors that stop the tick loop. Per-entity failures never do.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("world lock poisoned")]
    Poisoned,
}

/// Receives each tick's outbound frames once the world lock is released.
pub trait TickSink {
    fn deliver(&self, tick: u64, outgoing: Vec<Outgoing>);
}

impl TickSink for () {
    fn deliver(&self, _tick: u64, _outgoing: Vec<Outgoing>) {}
}

pub struct TickScheduler<S> {
    period: Duration,
    world: SharedWorld,
    game: Game,
    sink: S,
    ticks: Arc<AtomicU64>,
}

impl<S: TickSink> TickScheduler<S> {
    pub fn new(period: Duration, world: SharedWorld, game: Game, sink: S) -> Self {
        Self {
            period,
            world,
            game,
            sink,
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Monotonic count of completed ticks, readable from other tasks.
    pub fn counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.ticks)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Runs exactly one tick and hands its output to the sink.
    pub fn tick_once(&mut self) -> Result<TickReport, TickError> {
        let tick = self.ticks.load(Ordering::Acquire) + 1;
        let mut report = {
            let mut world = self.world.lock().map_err(|_| TickError::Poisoned)?;
            self.game.tick(&mut world, tick)
        };
        self.ticks.store(tick, Ordering::Release);

        for fault in &report.errors {
            warn!(
                tick,
                entity = %fault.entity,
                phase = ?fault.phase,
                error = %fault.error,
                "Entity step failed"
            );
        }
        let outgoing = std::mem::take(&mut report.outgoing);
        self.sink.deliver(tick, outgoing);
        Ok(report)
    }

    /// Ticks until `shutdown` flips to true or its sender goes away.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), TickError> {
        let mut interval = time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period_ms = self.period.as_millis() as u64, "Tick loop started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick_once() {
                        error!(error = %e, tick = self.ticks(), "Tick loop stopped");
                        return Err(e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(ticks = self.ticks(), "Tick loop stopping");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Runs `count` ticks on the configured period.
    pub async fn run_for_ticks(&mut self, count: u64) -> Result<(), TickError> {
        let mut interval = time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        for _ in 0..count {
            interval.tick().await;
            self.tick_once()?;
        }
        debug!(ticks = self.ticks(), "Finished fixed tick run");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::WorldSettings;
    use realm_shared::net::ConnectionId;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(u64, usize)>>);

    impl TickSink for Arc<Recorder> {
        fn deliver(&self, tick: u64, outgoing: Vec<Outgoing>) {
            self.0.lock().unwrap().push((tick, outgoing.len()));
        }
    }

    fn shared_world() -> SharedWorld {
        Arc::new(Mutex::new(WorldState::new(WorldSettings::default())))
    }

    #[test]
    fn ticks_are_numbered_from_one() {
        let world = shared_world();
        world
            .lock()
            .unwrap()
            .add_player("a", ConnectionId(1))
            .unwrap();
        let (game, _tx) = Game::seeded(&WorldSettings::default(), 3);
        let recorder = Arc::new(Recorder::default());
        let mut scheduler =
            TickScheduler::new(Duration::from_millis(10), world, game, Arc::clone(&recorder));

        assert_eq!(scheduler.tick_once().unwrap().tick, 1);
        assert_eq!(scheduler.tick_once().unwrap().tick, 2);
        assert_eq!(scheduler.ticks(), 2);
        assert_eq!(*recorder.0.lock().unwrap(), vec![(1, 1), (2, 1)]);
    }

    #[test]
    fn poisoned_world_is_fatal() {
        let world = shared_world();
        let poisoner = Arc::clone(&world);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        })
        .join();

        let (game, _tx) = Game::seeded(&WorldSettings::default(), 3);
        let mut scheduler = TickScheduler::new(Duration::from_millis(10), world, game, ());
        assert!(matches!(scheduler.tick_once(), Err(TickError::Poisoned)));
        assert_eq!(scheduler.ticks(), 0);
    }

    #[tokio::test]
    async fn run_for_ticks_advances_the_counter() {
        let (game, _tx) = Game::seeded(&WorldSettings::default(), 3);
        let mut scheduler =
            TickScheduler::new(Duration::from_millis(5), shared_world(), game, ());
        let counter = scheduler.counter();
        scheduler.run_for_ticks(4).await.unwrap();
        assert_eq!(counter.load(Ordering::Acquire), 4);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (game, _tx) = Game::seeded(&WorldSettings::default(), 3);
        let scheduler = TickScheduler::new(Duration::from_millis(5), shared_world(), game, ());
        let counter = scheduler.counter();
        let (stop, rx) = watch::channel(false);
        let task = tokio::spawn(scheduler.run(rx));

        time::sleep(Duration::from_millis(40)).await;
        stop.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert!(counter.load(Ordering::Acquire) >= 1);
    }
}
