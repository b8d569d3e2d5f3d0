//! Connection state machine: CONNECTING → OPEN → CLOSING → CLOSED. States
//! only ever move forward, so readers of the current state never need a
//! lock — the lattice is sticky once it reaches CLOSED.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Connecting => 0,
            ConnectionState::Open => 1,
            ConnectionState::Closing => 2,
            ConnectionState::Closed => 3,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Monotonic state cell. `advance_to` only ever moves the state forward
/// (matching `Closed` being terminal and sticky); it never needs external
/// locking because each transition is a single atomic compare-exchange.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(ConnectionState::Connecting.to_u8()))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `target` if the current state is strictly earlier in the
    /// lattice. Returns the state actually observed afterward, which lets a
    /// caller detect a race where another task already advanced further.
    pub fn advance_to(&self, target: ConnectionState) -> ConnectionState {
        loop {
            let current = self.0.load(Ordering::Acquire);
            if current >= target.to_u8() {
                return ConnectionState::from_u8(current);
            }
            if self
                .0
                .compare_exchange(
                    current,
                    target.to_u8(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return target;
            }
        }
    }

    /// Checks whether `opcode` may legally be sent/received while in the
    /// current state, per the legality table in the connection state
    /// machine design.
    pub fn allows_data_frame(&self) -> bool {
        matches!(self.get(), ConnectionState::Open)
    }

    pub fn allows_control_frame(&self) -> bool {
        matches!(self.get(), ConnectionState::Open | ConnectionState::Closing)
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.get(), ConnectionState::Closed)
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
