//! Messages and simulation time.

use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::node::NodeId;

/// Algorithm-defined message payload.
///
/// Structured records are JSON objects. Field-level corruption only applies to them.
pub type Payload = serde_json::Value;

/// Point on the simulation clock.
///
/// The asynchronous discipline advances a real-valued time, the synchronous one advances integer rounds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub enum SimTime {
    /// Real-valued time (asynchronous discipline).
    Time(f64),
    /// Round number (synchronous discipline).
    Round(u64),
}

impl SimTime {
    /// Returns the clock value as a real number.
    pub fn as_f64(&self) -> f64 {
        match *self {
            SimTime::Time(t) => t,
            SimTime::Round(r) => r as f64,
        }
    }

    /// Returns the round number, truncating real-valued time.
    pub fn as_round(&self) -> u64 {
        match *self {
            SimTime::Time(t) => t.max(0.) as u64,
            SimTime::Round(r) => r,
        }
    }
}

impl Default for SimTime {
    fn default() -> Self {
        SimTime::Time(0.)
    }
}

impl Display for SimTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SimTime::Time(t) => write!(f, "{:.3}", t),
            SimTime::Round(r) => write!(f, "r{}", r),
        }
    }
}

/// In-flight payload between two adjacent nodes.
///
/// Created by the communication layer on send, consumed exactly once on delivery.
#[derive(Clone, Debug, Serialize)]
pub struct Message {
    /// Sender.
    pub src: NodeId,
    /// Receiver.
    pub dst: NodeId,
    /// Time the message was sent.
    pub sent: SimTime,
    /// Scheduled arrival, never earlier than `sent`.
    pub arrival: SimTime,
    /// Message content.
    pub payload: Payload,
}

impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {} @ {}: {}", self.src, self.dst, self.arrival, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_time_display() {
        assert_eq!(SimTime::Time(1.5).to_string(), "1.500");
        assert_eq!(SimTime::Round(7).to_string(), "r7");
    }

    #[test]
    fn test_sim_time_conversions() {
        assert_eq!(SimTime::Round(3).as_f64(), 3.);
        assert_eq!(SimTime::Time(2.9).as_round(), 2);
        assert_eq!(SimTime::Time(-1.).as_round(), 0);
    }
}
