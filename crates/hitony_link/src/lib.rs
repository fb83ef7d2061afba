//! Hi Tony Link - Transport Layer
//!
//! A message-oriented persistent connection to the conversation server plus
//! the thin receive path in front of the control worker:
//!
//! ```text
//! socket thread                               control worker
//!   tungstenite ──frames──▶ RxSink ──RawMsg queue──▶ parse & dispatch
//!                 (copy into pool block,
//!                  reassemble by offset,
//!                  push; nothing else)
//! ```
//!
//! The receive callback performs zero parsing and takes no locks shared
//! with the audio or control workers; any heavier work inside it would
//! stall the socket under load.

mod error;
mod message;
mod sink;
mod transport;
mod ws;

pub use error::{LinkError, LinkResult};
pub use message::RawMsg;
pub use sink::{LinkCounters, LinkEvent, Opcode, RxSink};
pub use transport::{Connector, Transport};
pub use ws::WsConnector;
