//! Queue admission gate

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Whether a queue admits and forwards messages
///
/// | Gate        | `send_async` | worker forwards |
/// |-------------|--------------|-----------------|
/// | `Accepting` | enqueues     | yes             |
/// | `Paused`    | no-op        | no              |
/// | `Draining`  | no-op        | yes, then stops |
/// | `Stopped`   | no-op        | worker gone     |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    Accepting,
    Paused,
    Draining,
    Stopped,
}

impl Gate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gate::Accepting => "accepting",
            Gate::Paused => "paused",
            Gate::Draining => "draining",
            Gate::Stopped => "stopped",
        }
    }

    pub fn forwards(&self) -> bool {
        matches!(self, Gate::Accepting | Gate::Draining)
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Gate::Accepting,
            1 => Gate::Paused,
            2 => Gate::Draining,
            _ => Gate::Stopped,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Gate::Accepting => 0,
            Gate::Paused => 1,
            Gate::Draining => 2,
            Gate::Stopped => 3,
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Gate shared between the service and a queue worker
#[derive(Debug)]
pub struct SharedGate(AtomicU8);

impl SharedGate {
    pub fn new(gate: Gate) -> Self {
        Self(AtomicU8::new(gate.to_u8()))
    }

    pub fn get(&self) -> Gate {
        Gate::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, gate: Gate) {
        self.0.store(gate.to_u8(), Ordering::SeqCst);
    }

    /// Moves from `from` to `to`; returns the gate actually in place afterwards
    pub fn transition(&self, from: Gate, to: Gate) -> std::result::Result<Gate, Gate> {
        self.0
            .compare_exchange(from.to_u8(), to.to_u8(), Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| to)
            .map_err(Gate::from_u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition() {
        let gate = SharedGate::new(Gate::Accepting);
        assert_eq!(gate.transition(Gate::Accepting, Gate::Paused), Ok(Gate::Paused));
        assert_eq!(gate.transition(Gate::Accepting, Gate::Paused), Err(Gate::Paused));
        gate.set(Gate::Draining);
        assert_eq!(gate.get(), Gate::Draining);
    }

    #[test]
    fn test_forwards() {
        assert!(Gate::Accepting.forwards());
        assert!(Gate::Draining.forwards());
        assert!(!Gate::Paused.forwards());
        assert!(!Gate::Stopped.forwards());
    }
}
