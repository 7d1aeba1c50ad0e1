//! Outbound command transport.
//!
//! One persistent TCP connection to the vehicle controller, carrying one
//! decision literal per processed frame.

mod command;

pub use command::{ChannelError, CommandChannel, DecisionSink, Framing};
