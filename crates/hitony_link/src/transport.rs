//! Transport Seams
//!
//! The control worker owns the connection through these two traits. A
//! reconnect is a full re-init: drop the old [`Transport`], call
//! [`Connector::connect`] again with a fresh sink, and the handshake headers
//! are re-sent from scratch.

use crate::error::LinkResult;
use crate::sink::RxSink;

/// An open connection. Sends never block beyond a bounded queue push;
/// `close` is atomic and idempotent, and the worker acknowledges it by
/// delivering `Closed` through the sink.
pub trait Transport: Send {
    fn send_text(&self, text: &str) -> LinkResult<()>;
    fn send_binary(&self, data: &[u8]) -> LinkResult<()>;
    fn close(&self);
}

/// Connection factory. Each call produces an independent transport whose
/// receive path feeds the given sink.
pub trait Connector: Send {
    fn connect(&mut self, sink: RxSink) -> LinkResult<Box<dyn Transport>>;
}
