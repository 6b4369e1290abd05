//! Operator tooling for Dobot Magician style arms.
//!
//! The crate wraps the controller's serial protocol behind the [`robot::Arm`]
//! trait and builds the interactive flows (waypoint moves, keyboard jog and
//! boundary monitoring) on top of it.

pub mod cancel;
mod comm;
pub mod jog;
pub mod keys;
pub mod limits;
pub mod menu;
pub mod panel;
pub mod pose;
pub mod ports;
pub mod prompt;
pub mod robot;
pub mod sim;
pub mod spinner;

pub use pose::{Margin, Pose, Waypoint};
pub use robot::{Arm, Dobot, MoveMode, Session};

/// Failures talking to an arm, real or simulated.
#[derive(Debug, thiserror::Error)]
pub enum ArmError {
    #[error("Serial port write error")]
    WriteError,
    #[error("Serial port read error")]
    ReadError,
    #[error("Invalid header bytes: {0:#X}, {1:#X}")]
    InvalidHeader(u8, u8),
    #[error("Checksum mismatch: calculated {0:#X}, received {1:#X}")]
    ChecksumMismatch(u8, u8),
    #[error("Unexpected reply: expected command {expected}, received {received}")]
    UnexpectedReply { expected: u8, received: u8 },
    #[error("Reply to command {0} is too short")]
    ShortReply(u8),
    #[error("Command parameters exceed the frame capacity")]
    FrameOverflow,
    /// A blocking move was cut short by [`Arm::stop`].
    #[error("Motion halted by a stop command")]
    Halted,
    #[error("Connection already closed")]
    Closed,
    #[error("No serial ports found")]
    NoPorts,
    #[error("Serial port error: {0}")]
    Port(#[from] serialport::Error),
    /// Injected by [`sim::SimArm`]; never produced by hardware.
    #[error("Simulated pose read failure")]
    SimulatedFault,
}
