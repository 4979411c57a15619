use std::time::{Duration, Instant};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Pacing {
    // how long to sleep before starting the next tick
    pub wait: Duration,
    // grid slots that passed entirely while the last tick was running
    pub dropped: u32,
}

/// Fixed-rate tick deadlines on a grid anchored at the start time. A tick that
/// overruns makes the next one start immediately; slots that were missed
/// altogether are dropped, so the loop never drifts off the grid and never
/// runs more than one catch-up tick.
pub struct TickClock {
    interval: Duration,
    // when the next tick is due
    deadline: Instant,
}

impl TickClock {
    // the first tick is expected to run right at `start`
    pub fn new(interval: Duration, start: Instant) -> TickClock {
        TickClock {
            interval,
            deadline: start + interval,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    // call once a tick has finished
    pub fn advance(&mut self, now: Instant) -> Pacing {
        if now <= self.deadline {
            let wait = self.deadline - now;
            self.deadline += self.interval;
            return Pacing { wait, dropped: 0 };
        }

        let behind = now - self.deadline;
        let missed = (behind.as_nanos() / self.interval.as_nanos().max(1)) as u32;
        self.deadline += self.interval * (missed + 1);
        Pacing {
            wait: Duration::ZERO,
            dropped: missed,
        }
    }
}
