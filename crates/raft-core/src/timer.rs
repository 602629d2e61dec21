//! # timer
//!
//! why: the node holds at most one live election timer and one heartbeat timer
//! relations: armed and polled by node.rs against the injected clock
//! what: Timer (disarmed / armed at a deadline), randomized election timeout

use rand::Rng;

/// A cancel-and-replace timer measured on the node's millisecond clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timer {
    #[default]
    Disarmed,
    Armed {
        deadline: u64,
    },
}

impl Timer {
    /// Replace whatever was armed with a new deadline.
    pub fn arm(&mut self, deadline: u64) {
        *self = Timer::Armed { deadline };
    }

    pub fn disarm(&mut self) {
        *self = Timer::Disarmed;
    }

    pub fn is_armed(&self) -> bool {
        matches!(self, Timer::Armed { .. })
    }

    pub fn deadline(&self) -> Option<u64> {
        match self {
            Timer::Armed { deadline } => Some(*deadline),
            Timer::Disarmed => None,
        }
    }

    /// Disarm and report true if the deadline has passed.
    pub fn fire(&mut self, now: u64) -> bool {
        match *self {
            Timer::Armed { deadline } if deadline <= now => {
                self.disarm();
                true
            }
            _ => false,
        }
    }
}

/// Draws an election timeout uniformly from `[base_ms, 2 * base_ms)`.
pub fn random_election_timeout<R: Rng + ?Sized>(rng: &mut R, base_ms: u64) -> u64 {
    base_ms + rng.gen_range(0..base_ms.max(1))
}
