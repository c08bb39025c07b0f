//! Single-threaded cooperative scheduler: three periodic rate classes plus
//! a bounded I/O step run once per tick.
//!
//! There are no locks and no second thread; everything the closures
//! passed to [`Scheduler::run_until_restart`] touch is owned by the
//! caller's single god object and mutated only from inside a tick, as
//! required by §5's concurrency model.

use std::time::{Duration, Instant};

pub struct RateClass {
    period: Duration,
    next_due: Instant,
}

impl RateClass {
    fn new(period: Duration, now: Instant) -> Self {
        Self {
            period,
            next_due: now + period,
        }
    }

    fn due(&self, now: Instant) -> bool {
        now >= self.next_due
    }

    fn advance(&mut self, now: Instant) {
        self.next_due = now + self.period;
    }
}

pub struct Scheduler {
    fast: RateClass,
    one_hz: RateClass,
    tenth_hz: RateClass,
    io_batch_size: usize,
}

impl Scheduler {
    pub fn new(fast_period: Duration, io_batch_size: usize) -> Self {
        let now = Instant::now();
        Self {
            fast: RateClass::new(fast_period, now),
            one_hz: RateClass::new(Duration::from_secs(1), now),
            tenth_hz: RateClass::new(Duration::from_secs(10), now),
            io_batch_size,
        }
    }

    pub fn io_batch_size(&self) -> usize {
        self.io_batch_size
    }

    fn earliest_deadline(&self) -> Instant {
        self.fast.next_due.min(self.one_hz.next_due).min(self.tenth_hz.next_due)
    }

    /// Run one scheduling iteration: fire whichever periodic tasks are due,
    /// then invoke `io_step` with a deadline no later than the next due
    /// periodic task. Returns after one I/O step; the caller loops this
    /// until `restart_required` returns true.
    pub fn tick(
        &mut self,
        mut fast_task: impl FnMut(),
        mut one_hz_task: impl FnMut(),
        mut tenth_hz_task: impl FnMut(),
        mut io_step: impl FnMut(Instant, usize),
    ) {
        let now = Instant::now();

        if self.fast.due(now) {
            fast_task();
            self.fast.advance(now);
        }
        if self.one_hz.due(now) {
            one_hz_task();
            self.one_hz.advance(now);
        }
        if self.tenth_hz.due(now) {
            tenth_hz_task();
            self.tenth_hz.advance(now);
        }

        io_step(self.earliest_deadline(), self.io_batch_size);
    }

    /// Runs `tick` in a loop until `restart_required` reports true, then
    /// returns so the caller can flush in-flight TX and restart.
    pub fn run_until_restart(
        &mut self,
        mut fast_task: impl FnMut(),
        mut one_hz_task: impl FnMut(),
        mut tenth_hz_task: impl FnMut(),
        mut io_step: impl FnMut(Instant, usize),
        mut restart_required: impl FnMut() -> bool,
    ) {
        while !restart_required() {
            self.tick(&mut fast_task, &mut one_hz_task, &mut tenth_hz_task, &mut io_step);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_task_fires_every_tick_when_period_elapsed() {
        let mut sched = Scheduler::new(Duration::from_millis(1), 16);
        std::thread::sleep(Duration::from_millis(2));
        let mut fast_count = 0;
        sched.tick(|| fast_count += 1, || {}, || {}, |_, _| {});
        assert_eq!(fast_count, 1);
    }

    #[test]
    fn one_hz_task_does_not_fire_immediately() {
        let mut sched = Scheduler::new(Duration::from_millis(100), 16);
        let mut one_hz_count = 0;
        sched.tick(|| {}, || one_hz_count += 1, || {}, |_, _| {});
        assert_eq!(one_hz_count, 0);
    }

    #[test]
    fn io_step_runs_every_tick() {
        let mut sched = Scheduler::new(Duration::from_millis(100), 16);
        let mut io_calls = 0;
        sched.tick(|| {}, || {}, || {}, |_, _| io_calls += 1);
        sched.tick(|| {}, || {}, || {}, |_, _| io_calls += 1);
        assert_eq!(io_calls, 2);
    }

    #[test]
    fn run_until_restart_stops_when_flag_set() {
        let mut sched = Scheduler::new(Duration::from_millis(1), 16);
        let mut ticks = 0;
        sched.run_until_restart(
            || {},
            || {},
            || {},
            |_, _| ticks += 1,
            || ticks >= 3,
        );
        assert_eq!(ticks, 3);
    }
}
