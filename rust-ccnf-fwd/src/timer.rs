//! Hashed timer wheel driving the forwarder's periodic work.
//!
//! One slot per tick, wrapping at the wheel size; an event scheduled
//! further out than one revolution carries a round counter. The dispatcher
//! advances the wheel once per tick and reschedules recurring events as
//! they fire.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Expire due PIT entries.
    PitSweep,
    /// Purge lapsed content-store entries.
    CsHousekeeping,
}

#[derive(Debug)]
pub struct TimerWheel {
    slots: Vec<Vec<(u64, TimerEvent)>>,
}

impl TimerWheel {
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "timer wheel needs at least one slot");
        Self {
            slots: (0..size).map(|_| Vec::new()).collect(),
        }
    }

    /// Schedules `event` to fire `after` ticks past `now`. Zero delays are
    /// promoted to one tick; a timer can never fire in the tick that
    /// scheduled it.
    pub fn schedule(&mut self, now: u64, after: u64, event: TimerEvent) {
        let after = after.max(1);
        let size = self.slots.len() as u64;
        let slot = ((now + after) % size) as usize;
        let rounds = (after - 1) / size;
        self.slots[slot].push((rounds, event));
    }

    /// Advances to `now`, returning the events due this tick.
    pub fn advance(&mut self, now: u64) -> Vec<TimerEvent> {
        let slot = (now % self.slots.len() as u64) as usize;
        let mut due = Vec::new();
        self.slots[slot].retain_mut(|(rounds, event)| {
            if *rounds == 0 {
                due.push(*event);
                false
            } else {
                *rounds -= 1;
                true
            }
        });
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_at_the_scheduled_tick() {
        let mut wheel = TimerWheel::new(8);
        wheel.schedule(0, 3, TimerEvent::PitSweep);
        assert!(wheel.advance(1).is_empty());
        assert!(wheel.advance(2).is_empty());
        assert_eq!(wheel.advance(3), vec![TimerEvent::PitSweep]);
        assert!(wheel.advance(4).is_empty());
    }

    #[test]
    fn delays_longer_than_one_revolution() {
        let mut wheel = TimerWheel::new(4);
        wheel.schedule(0, 9, TimerEvent::CsHousekeeping);
        for tick in 1..9 {
            assert!(wheel.advance(tick).is_empty(), "fired early at {tick}");
        }
        assert_eq!(wheel.advance(9), vec![TimerEvent::CsHousekeeping]);
    }

    #[test]
    fn recurring_reschedule_pattern() {
        let mut wheel = TimerWheel::new(16);
        wheel.schedule(0, 1, TimerEvent::PitSweep);
        let mut fired = 0;
        for tick in 1..=5 {
            for event in wheel.advance(tick) {
                assert_eq!(event, TimerEvent::PitSweep);
                fired += 1;
                wheel.schedule(tick, 1, TimerEvent::PitSweep);
            }
        }
        assert_eq!(fired, 5);
    }

    #[test]
    fn zero_delay_rounds_up() {
        let mut wheel = TimerWheel::new(4);
        wheel.schedule(2, 0, TimerEvent::PitSweep);
        assert_eq!(wheel.advance(3), vec![TimerEvent::PitSweep]);
    }
}
