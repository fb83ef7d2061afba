//! Raw Transport Messages
//!
//! The single queue between the transport worker and the control loop
//! carries this tagged sum type. Buffer variants own their pool block; when
//! the consumer drops the message the block returns to the pool.

use hitony_rt::PoolBlock;

#[derive(Debug)]
pub enum RawMsg {
    /// A complete (possibly reassembled) binary frame.
    Binary(PoolBlock),
    /// A complete text frame, UTF-8 but unparsed.
    Text(PoolBlock),
    /// The connection is up.
    Connected,
    /// The connection dropped unexpectedly; the owner should reconnect.
    Disconnected,
    /// The connection was closed deliberately from our side.
    Closed,
}

impl RawMsg {
    pub fn kind(&self) -> &'static str {
        match self {
            RawMsg::Binary(_) => "binary",
            RawMsg::Text(_) => "text",
            RawMsg::Connected => "connected",
            RawMsg::Disconnected => "disconnected",
            RawMsg::Closed => "closed",
        }
    }
}
