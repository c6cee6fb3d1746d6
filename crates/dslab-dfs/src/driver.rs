//! Reference time-slice driver.

use dslab_dfs_storage::{log_debug, log_info, log_trace};

use crate::engine::DfsEngine;

/// Default time slice in seconds.
pub const DEFAULT_STEP: f64 = 1.;

/// Advances the engine in fixed time slices until all tasks are settled.
///
/// At the beginning of every slice each client starts its next task if it is due. Link limits are then refreshed
/// with bandwidth averaged over the slice and the engine processes the slice. When the horizon is reached, all
/// unfinished operations are force-completed.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeSliceDriver {
    step: f64,
    horizon: f64,
}

impl Default for TimeSliceDriver {
    fn default() -> Self {
        Self::new(DEFAULT_STEP, f64::INFINITY)
    }
}

impl TimeSliceDriver {
    /// Creates driver with the given slice length and time horizon.
    pub fn new(step: f64, horizon: f64) -> Self {
        assert!(step > 0., "time slice must be positive");
        Self { step, horizon }
    }

    /// Slice length.
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Time after which unfinished operations are force-completed.
    pub fn horizon(&self) -> f64 {
        self.horizon
    }

    /// Starts due tasks of every client. After a task fails to start, the next task of the client is tried.
    pub fn start_due_tasks(&self, engine: &mut DfsEngine, time: f64) -> usize {
        let mut started = 0;
        for client in engine.topology().clients() {
            while let Some(id) = engine.next_task(client) {
                let due = engine.task(id).map_or(false, |t| t.spec.not_before <= time);
                if !due {
                    break;
                }
                if engine.start_task(id, time).is_ok() {
                    started += 1;
                    break;
                }
            }
        }
        started
    }

    fn has_startable_tasks(engine: &DfsEngine) -> bool {
        engine
            .topology()
            .clients()
            .into_iter()
            .any(|c| engine.next_task(c).is_some())
    }

    /// Runs the simulation. Returns the time when the last slice ended.
    pub fn run(&self, engine: &mut DfsEngine) -> f64 {
        let mut time = engine.time();
        let mut slices = 0u64;
        log_info!(time, "driver", "simulation started with step {}", self.step);
        while time < self.horizon {
            self.start_due_tasks(engine, time);
            if engine.pool().is_idle() && !Self::has_startable_tasks(engine) {
                break;
            }
            let elapsed = self.step.min(self.horizon - time);
            engine.refresh_limits(time, elapsed);
            let events = engine.tick(time, elapsed);
            if !events.is_empty() {
                log_debug!(time, "driver", "slice {} produced {} storage events", slices, events.len());
            }
            time += elapsed;
            for path in engine.active_paths() {
                log_trace!(
                    time,
                    "driver",
                    "transfer {} -> {} runs at {:.3}",
                    engine.topology().label(path.origin),
                    engine.topology().label(path.target),
                    engine.possible_throughput(path, time)
                );
            }
            slices += 1;
        }
        if !engine.pool().is_idle() {
            let forced = engine.finish_all(time);
            log_info!(time, "driver", "horizon reached, {} operations force-completed", forced.len());
        }
        log_info!(time, "driver", "simulation finished after {} slices", slices);
        time
    }
}
