//! Reference payload: an actuator setpoint/feedback loop.
//!
//! Readiness and setpoint subjects are cached as they arrive; the cached
//! setpoint is only meaningful to apply to hardware while `armed()` is
//! true. The control-timeout constant is, per the design notes, a
//! DSDL-provided constant in a real deployment; it's taken as a parameter
//! here rather than hard-coded.

use cyphal::transfer::manager::timestamp_expired;
use cyphal::time::Duration;
use embedded_time::{Clock, Instant};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Readiness {
    Sleep,
    Standby,
    Engaged,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Setpoint {
    pub position: f32,
    pub velocity: f32,
    pub acceleration: f32,
    pub force: f32,
}

pub struct Actuator<C: Clock> {
    readiness: Readiness,
    setpoint: Setpoint,
    armed: bool,
    last_setpoint_at: Option<Instant<C>>,
    control_timeout: Duration,
}

impl<C: Clock> Actuator<C> {
    pub fn new(control_timeout: Duration) -> Self {
        Self {
            readiness: Readiness::Sleep,
            setpoint: Setpoint::default(),
            armed: false,
            last_setpoint_at: None,
            control_timeout,
        }
    }

    pub fn armed(&self) -> bool {
        self.armed
    }

    pub fn setpoint(&self) -> Setpoint {
        self.setpoint
    }

    pub fn on_readiness(&mut self, readiness: Readiness) {
        self.readiness = readiness;
        self.armed = self.readiness >= Readiness::Engaged;
    }

    pub fn on_setpoint(&mut self, setpoint: Setpoint, now: Instant<C>) {
        self.setpoint = setpoint;
        self.last_setpoint_at = Some(now);
    }

    /// Called from the 1 Hz loop: clears `armed` if no setpoint has arrived
    /// within `control_timeout` of `now`. Returns true if this call
    /// transitioned the actuator from armed to disarmed, so the caller can
    /// log the disarm event.
    pub fn check_control_timeout(&mut self, now: Instant<C>) -> bool {
        if !self.armed {
            return false;
        }
        let stale = self.last_setpoint_at.is_none()
            || timestamp_expired(self.control_timeout, now, self.last_setpoint_at);
        if stale {
            self.armed = false;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestClock;
    impl Clock for TestClock {
        type T = u64;
        const SCALING_FACTOR: embedded_time::fraction::Fraction =
            embedded_time::fraction::Fraction::new(1, 1_000_000);
        fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
            Ok(Instant::new(0))
        }
    }

    #[test]
    fn arming_follows_readiness() {
        let mut act: Actuator<TestClock> = Actuator::new(Duration::new(1_000_000));
        assert!(!act.armed());
        act.on_readiness(Readiness::Engaged);
        assert!(act.armed());
        act.on_readiness(Readiness::Standby);
        assert!(!act.armed());
    }

    #[test]
    fn disarms_after_control_timeout() {
        let mut act: Actuator<TestClock> = Actuator::new(Duration::new(1_000_000));
        act.on_readiness(Readiness::Engaged);
        act.on_setpoint(Setpoint::default(), Instant::new(0));
        assert!(!act.check_control_timeout(Instant::new(500_000)));
        assert!(act.check_control_timeout(Instant::new(1_500_000)));
        assert!(!act.armed());
    }

    #[test]
    fn refreshed_setpoint_resets_timeout() {
        let mut act: Actuator<TestClock> = Actuator::new(Duration::new(1_000_000));
        act.on_readiness(Readiness::Engaged);
        act.on_setpoint(Setpoint::default(), Instant::new(0));
        act.on_setpoint(Setpoint::default(), Instant::new(900_000));
        assert!(!act.check_control_timeout(Instant::new(1_500_000)));
    }
}
