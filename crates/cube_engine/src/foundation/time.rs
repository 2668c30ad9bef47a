//! Time management utilities

use std::time::Instant;

/// Milliseconds per animation tick
pub const MS_PER_TICK: u128 = 5;

/// Source of the animation tick `t` fed into the cube's transforms
#[derive(Debug, Clone, Copy)]
pub enum FrameClock {
    /// Ticks advance with wall-clock time since `start`
    Running {
        /// Moment the clock was started
        start: Instant,
    },
    /// Always reports the same tick, for reproducible frames
    Fixed(u64),
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::start()
    }
}

impl FrameClock {
    /// Start a wall-clock driven clock now
    pub fn start() -> Self {
        Self::Running { start: Instant::now() }
    }

    /// Clock that always reports `tick`
    pub fn fixed(tick: u64) -> Self {
        Self::Fixed(tick)
    }

    /// Current tick: whole milliseconds since start, divided by five
    pub fn tick(&self) -> u64 {
        match self {
            Self::Running { start } => ticks_from_millis(start.elapsed().as_millis()),
            Self::Fixed(tick) => *tick,
        }
    }
}

fn ticks_from_millis(millis: u128) -> u64 {
    u64::try_from(millis / MS_PER_TICK).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_never_advances() {
        let clock = FrameClock::fixed(42);
        assert_eq!(clock.tick(), 42);
        std::thread::sleep(std::time::Duration::from_millis(12));
        assert_eq!(clock.tick(), 42);
    }

    #[test]
    fn test_tick_is_integer_division() {
        assert_eq!(ticks_from_millis(0), 0);
        assert_eq!(ticks_from_millis(4), 0);
        assert_eq!(ticks_from_millis(5), 1);
        assert_eq!(ticks_from_millis(1999), 399);
    }

    #[test]
    fn test_running_clock_is_monotonic() {
        let clock = FrameClock::start();
        let first = clock.tick();
        std::thread::sleep(std::time::Duration::from_millis(11));
        assert!(clock.tick() >= first + 2);
    }
}
