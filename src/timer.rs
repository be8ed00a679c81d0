/// Outcome of a single one-second tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Remaining(u64),
    /// Raised once, on the tick that reaches zero.
    Expired,
    /// The timer was cancelled or has already expired; nothing happened.
    Inert,
}

/// Session-wide wall-clock countdown, advanced by an external one-second tick.
#[derive(Debug, Clone)]
pub struct CountdownTimer {
    total_secs: u64,
    remaining_secs: u64,
    expired: bool,
    cancelled: bool,
}

impl CountdownTimer {
    pub fn new(total_secs: u64) -> Self {
        Self {
            total_secs,
            remaining_secs: total_secs,
            expired: false,
            cancelled: false,
        }
    }

    pub fn tick(&mut self) -> Tick {
        if self.cancelled || self.expired {
            return Tick::Inert;
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 {
            self.expired = true;
            Tick::Expired
        } else {
            Tick::Remaining(self.remaining_secs)
        }
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn remaining(&self) -> u64 {
        self.remaining_secs
    }

    pub fn elapsed(&self) -> u64 {
        self.total_secs - self.remaining_secs
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn has_expired(&self) -> bool {
        self.expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reaches_zero_after_exactly_total_ticks() {
        let mut t = CountdownTimer::new(5);
        let outcomes: Vec<Tick> = (0..5).map(|_| t.tick()).collect();

        assert_eq!(
            outcomes,
            vec![
                Tick::Remaining(4),
                Tick::Remaining(3),
                Tick::Remaining(2),
                Tick::Remaining(1),
                Tick::Expired,
            ]
        );
        assert_eq!(t.remaining(), 0);
        assert_eq!(t.elapsed(), 5);
    }

    #[test]
    fn expired_fires_once_and_never_goes_negative() {
        let mut t = CountdownTimer::new(2);
        let expirations = (0..10).filter(|_| t.tick() == Tick::Expired).count();

        assert_eq!(expirations, 1);
        assert_eq!(t.remaining(), 0);
        assert!(t.has_expired());
    }

    #[test]
    fn zero_length_timer_expires_on_first_tick() {
        let mut t = CountdownTimer::new(0);
        assert_eq!(t.tick(), Tick::Expired);
        assert_eq!(t.tick(), Tick::Inert);
    }

    #[test]
    fn cancelled_timer_delivers_no_ticks() {
        let mut t = CountdownTimer::new(10);
        t.tick();
        t.cancel();

        assert_eq!(t.tick(), Tick::Inert);
        assert_eq!(t.remaining(), 9);
        assert!(t.is_cancelled());
    }
}
