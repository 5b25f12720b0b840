//! Link liveness from heartbeat beacons.
//!
//! The egress side cannot ask the ingress side anything; the only liveness
//! signal is the periodic beacon frame. The monitor records when a beacon
//! was last seen and reports transitions exactly once per direction: one
//! event when the link goes quiet past the timeout, one when beacons return.
//! It never attempts to restart the far side.

use std::{ops::Sub, time::Duration};

/// Monitor tuning.
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    /// Silence on the link after which it is declared dead.
    pub timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(360) }
    }
}

/// Link state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// The link exceeded the silence timeout.
    Dead {
        /// How long the link had been silent when declared dead
        silent_for: Duration,
    },
    /// A beacon arrived after the link was declared dead.
    Recovered,
}

/// Heartbeat liveness monitor.
#[derive(Debug)]
pub struct LinkMonitor<I> {
    config: MonitorConfig,
    last_seen: I,
    dead: bool,
}

impl<I> LinkMonitor<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create a monitor; the link starts alive with a full grace period.
    #[must_use]
    pub fn new(config: MonitorConfig, now: I) -> Self {
        Self { config, last_seen: now, dead: false }
    }

    /// Record a beacon observation.
    ///
    /// Returns `Some(Recovered)` on the first beacon after a dead
    /// declaration, `None` otherwise.
    pub fn observe_beacon(&mut self, now: I) -> Option<LinkEvent> {
        self.last_seen = now;
        if self.dead {
            self.dead = false;
            Some(LinkEvent::Recovered)
        } else {
            None
        }
    }

    /// Evaluate the timeout at time `now`.
    ///
    /// Returns `Some(Dead { .. })` exactly once per transition into the dead
    /// state; repeated checks while dead stay silent.
    pub fn check(&mut self, now: I) -> Option<LinkEvent> {
        let silent_for = now - self.last_seen;
        if !self.dead && silent_for > self.config.timeout {
            self.dead = true;
            return Some(LinkEvent::Dead { silent_for });
        }
        None
    }

    /// True while the link is declared dead.
    #[must_use]
    pub fn is_dead(&self) -> bool {
        self.dead
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
    struct Tick(u64);

    impl Sub for Tick {
        type Output = Duration;

        fn sub(self, rhs: Self) -> Duration {
            Duration::from_millis(self.0 - rhs.0)
        }
    }

    fn monitor() -> LinkMonitor<Tick> {
        LinkMonitor::new(MonitorConfig { timeout: Duration::from_millis(1000) }, Tick(0))
    }

    #[test]
    fn stays_alive_while_beacons_arrive() {
        let mut mon = monitor();

        for at in [400, 800, 1200, 1600] {
            assert_eq!(mon.check(Tick(at)), None);
            assert_eq!(mon.observe_beacon(Tick(at)), None);
        }
        assert!(!mon.is_dead());
    }

    #[test]
    fn declares_dead_exactly_once() {
        let mut mon = monitor();
        mon.observe_beacon(Tick(100));

        assert_eq!(mon.check(Tick(1100)), None); // exactly at timeout: still alive
        assert_eq!(
            mon.check(Tick(1200)),
            Some(LinkEvent::Dead { silent_for: Duration::from_millis(1100) })
        );

        // Still dead, no duplicate event
        assert_eq!(mon.check(Tick(5000)), None);
        assert!(mon.is_dead());
    }

    #[test]
    fn recovery_emits_exactly_once() {
        let mut mon = monitor();
        assert!(mon.check(Tick(2000)).is_some());

        assert_eq!(mon.observe_beacon(Tick(2100)), Some(LinkEvent::Recovered));
        assert_eq!(mon.observe_beacon(Tick(2200)), None);
        assert!(!mon.is_dead());
    }

    #[test]
    fn can_die_and_recover_repeatedly() {
        let mut mon = monitor();

        assert!(matches!(mon.check(Tick(1500)), Some(LinkEvent::Dead { .. })));
        assert_eq!(mon.observe_beacon(Tick(1600)), Some(LinkEvent::Recovered));

        assert!(matches!(mon.check(Tick(3000)), Some(LinkEvent::Dead { .. })));
        assert_eq!(mon.observe_beacon(Tick(3100)), Some(LinkEvent::Recovered));
    }
}
