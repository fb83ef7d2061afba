//! Receive Callback
//!
//! [`RxSink::on_event`] runs on the transport library's worker thread. Its
//! contract is strict: no parsing, no state-machine access, no locks shared
//! with the workers. It copies payload bytes into a pool block, reassembles
//! chunked frames by payload offset, and pushes the result onto the receive
//! queue. Everything else happens on the consumer side.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Sender, TrySendError};
use hitony_rt::{BlockPool, PoolBlock};
use tracing::warn;

use crate::message::RawMsg;

/// Payload framing of one delivered chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Text,
    Binary,
    Ping,
    Pong,
}

/// One event from the transport worker. `payload_len` is the total length of
/// the message; when it exceeds `data.len()` the message arrives as chunks
/// positioned by `payload_offset`.
#[derive(Debug)]
pub enum LinkEvent<'a> {
    Frame {
        opcode: Opcode,
        data: &'a [u8],
        payload_len: usize,
        payload_offset: usize,
    },
    Connected,
    Disconnected,
    Closed,
}

/// Receive-path drop accounting, shared with the control loop.
#[derive(Debug, Default)]
pub struct LinkCounters {
    pub frames: AtomicU64,
    pub dropped_queue_full: AtomicU64,
    pub dropped_pool_empty: AtomicU64,
    pub refused_oversize: AtomicU64,
}

impl LinkCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

struct PartialFrame {
    block: PoolBlock,
    text: bool,
    expected: usize,
    filled: usize,
}

/// The thin receive path: copy, reassemble, enqueue.
pub struct RxSink {
    queue: Sender<RawMsg>,
    pool: Arc<BlockPool>,
    counters: Arc<LinkCounters>,
    partial: Option<PartialFrame>,
    queue_full_logged: u64,
}

impl RxSink {
    pub fn new(queue: Sender<RawMsg>, pool: Arc<BlockPool>, counters: Arc<LinkCounters>) -> Self {
        Self {
            queue,
            pool,
            counters,
            partial: None,
            queue_full_logged: 0,
        }
    }

    pub fn on_event(&mut self, event: LinkEvent<'_>) {
        match event {
            LinkEvent::Frame {
                opcode: Opcode::Ping | Opcode::Pong,
                ..
            } => {}
            LinkEvent::Frame {
                opcode,
                data,
                payload_len,
                payload_offset,
            } => self.on_frame(opcode == Opcode::Text, data, payload_len, payload_offset),
            LinkEvent::Connected => {
                self.partial = None;
                self.push(RawMsg::Connected);
            }
            LinkEvent::Disconnected => {
                self.partial = None;
                self.push(RawMsg::Disconnected);
            }
            LinkEvent::Closed => {
                self.partial = None;
                self.push(RawMsg::Closed);
            }
        }
    }

    fn on_frame(&mut self, text: bool, data: &[u8], payload_len: usize, payload_offset: usize) {
        self.counters.frames.fetch_add(1, Ordering::Relaxed);

        // Unfragmented: one copy, one push.
        if payload_offset == 0 && payload_len <= data.len() {
            match self.pool.copy_from(data) {
                Some(block) => self.push(Self::wrap(text, block)),
                None => {
                    self.counters.dropped_pool_empty.fetch_add(1, Ordering::Relaxed);
                }
            }
            return;
        }

        // First chunk of a fragmented message: reserve the full payload.
        if payload_offset == 0 {
            if payload_len > BlockPool::max_block_size() {
                self.counters.refused_oversize.fetch_add(1, Ordering::Relaxed);
                warn!(payload_len, "refusing oversized fragmented frame");
                return;
            }
            match self.pool.acquire_for(payload_len) {
                Some(block) => {
                    self.partial = Some(PartialFrame {
                        block,
                        text,
                        expected: payload_len,
                        filled: 0,
                    });
                }
                None => {
                    self.counters.dropped_pool_empty.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }

        // Continue (or finish) the in-flight reassembly. Chunks with no
        // matching start (refused or pool-dropped above) fall through here
        // with `partial` unset and are discarded.
        let complete = match self.partial.as_mut() {
            None => return,
            Some(partial) => {
                if payload_offset != partial.filled
                    || payload_offset + data.len() > partial.expected
                {
                    warn!(
                        offset = payload_offset,
                        filled = partial.filled,
                        "fragment out of sequence, dropping frame"
                    );
                    self.partial = None;
                    return;
                }
                partial.block.buf_mut()[payload_offset..payload_offset + data.len()]
                    .copy_from_slice(data);
                partial.filled += data.len();
                partial.filled == partial.expected
            }
        };

        if complete {
            if let Some(mut done) = self.partial.take() {
                done.block.set_len(done.expected);
                self.push(Self::wrap(done.text, done.block));
            }
        }
    }

    fn wrap(text: bool, block: PoolBlock) -> RawMsg {
        if text {
            RawMsg::Text(block)
        } else {
            RawMsg::Binary(block)
        }
    }

    fn push(&mut self, msg: RawMsg) {
        match self.queue.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                // The block inside `msg` returns to the pool on drop.
                let n = self
                    .counters
                    .dropped_queue_full
                    .fetch_add(1, Ordering::Relaxed)
                    + 1;
                if n >= self.queue_full_logged + 50 || self.queue_full_logged == 0 {
                    warn!(kind = msg.kind(), total = n, "receive queue full, dropping");
                    self.queue_full_logged = n;
                }
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;
    use hitony_rt::PoolLayout;

    fn sink_with_queue(cap: usize) -> (RxSink, crossbeam_channel::Receiver<RawMsg>, Arc<BlockPool>) {
        let (tx, rx) = bounded(cap);
        let pool = BlockPool::new();
        let counters = LinkCounters::new();
        (RxSink::new(tx, Arc::clone(&pool), counters), rx, pool)
    }

    fn whole_frame(data: &[u8]) -> LinkEvent<'_> {
        LinkEvent::Frame {
            opcode: Opcode::Binary,
            data,
            payload_len: data.len(),
            payload_offset: 0,
        }
    }

    #[test]
    fn test_unfragmented_binary() {
        let (mut sink, rx, _pool) = sink_with_queue(8);
        sink.on_event(whole_frame(&[1, 2, 3, 4]));

        match rx.try_recv().unwrap() {
            RawMsg::Binary(block) => assert_eq!(&block[..], &[1, 2, 3, 4]),
            other => panic!("unexpected {:?}", other.kind()),
        }
    }

    #[test]
    fn test_text_frame_keeps_type() {
        let (mut sink, rx, _pool) = sink_with_queue(8);
        sink.on_event(LinkEvent::Frame {
            opcode: Opcode::Text,
            data: b"{\"type\":\"pong\"}",
            payload_len: 15,
            payload_offset: 0,
        });
        assert!(matches!(rx.try_recv().unwrap(), RawMsg::Text(_)));
    }

    #[test]
    fn test_ping_pong_ignored() {
        let (mut sink, rx, _pool) = sink_with_queue(8);
        sink.on_event(LinkEvent::Frame {
            opcode: Opcode::Ping,
            data: &[],
            payload_len: 0,
            payload_offset: 0,
        });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_fragmented_reassembly() {
        let (mut sink, rx, _pool) = sink_with_queue(8);
        let payload: Vec<u8> = (0..3000).map(|i| (i % 251) as u8).collect();

        for chunk_start in (0..payload.len()).step_by(1024) {
            let chunk = &payload[chunk_start..(chunk_start + 1024).min(payload.len())];
            sink.on_event(LinkEvent::Frame {
                opcode: Opcode::Binary,
                data: chunk,
                payload_len: payload.len(),
                payload_offset: chunk_start,
            });
        }

        match rx.try_recv().unwrap() {
            RawMsg::Binary(block) => {
                assert_eq!(block.len(), payload.len());
                assert_eq!(&block[..], &payload[..]);
            }
            other => panic!("unexpected {:?}", other.kind()),
        }
        // No spurious second message
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_oversize_fragment_refused() {
        let (tx, rx) = bounded(8);
        let pool = BlockPool::new();
        let counters = LinkCounters::new();
        let mut sink = RxSink::new(tx, pool, Arc::clone(&counters));

        sink.on_event(LinkEvent::Frame {
            opcode: Opcode::Binary,
            data: &[0u8; 1024],
            payload_len: 8192,
            payload_offset: 0,
        });
        // Follow-up chunks of the refused frame are discarded too
        sink.on_event(LinkEvent::Frame {
            opcode: Opcode::Binary,
            data: &[0u8; 1024],
            payload_len: 8192,
            payload_offset: 1024,
        });

        assert!(rx.try_recv().is_err());
        assert_eq!(counters.refused_oversize.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_out_of_sequence_fragment_drops_frame() {
        let (mut sink, rx, _pool) = sink_with_queue(8);
        sink.on_event(LinkEvent::Frame {
            opcode: Opcode::Binary,
            data: &[0u8; 512],
            payload_len: 2048,
            payload_offset: 0,
        });
        // Gap: offset jumps past the filled prefix
        sink.on_event(LinkEvent::Frame {
            opcode: Opcode::Binary,
            data: &[0u8; 512],
            payload_len: 2048,
            payload_offset: 1024,
        });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_queue_full_releases_block() {
        let (tx, rx) = bounded(1);
        let pool = BlockPool::with_layout(PoolLayout {
            capacity: [2, 2, 2, 2, 2],
        });
        let counters = LinkCounters::new();
        let mut sink = RxSink::new(tx, Arc::clone(&pool), Arc::clone(&counters));

        sink.on_event(whole_frame(&[1]));
        sink.on_event(whole_frame(&[2])); // queue full, dropped
        sink.on_event(whole_frame(&[3])); // still full, dropped

        assert_eq!(counters.dropped_queue_full.load(Ordering::Relaxed), 2);
        // Dropped blocks went back to the pool: only the queued one is out
        assert_eq!(pool.stats().classes[0].in_use, 1);
        drop(rx);
    }

    #[test]
    fn test_disconnect_clears_partial() {
        let (mut sink, rx, _pool) = sink_with_queue(8);
        sink.on_event(LinkEvent::Frame {
            opcode: Opcode::Binary,
            data: &[0u8; 512],
            payload_len: 2048,
            payload_offset: 0,
        });
        sink.on_event(LinkEvent::Disconnected);
        assert!(matches!(rx.try_recv().unwrap(), RawMsg::Disconnected));

        // A fresh frame after reconnect works from scratch
        sink.on_event(whole_frame(&[9, 9]));
        assert!(matches!(rx.try_recv().unwrap(), RawMsg::Binary(_)));
    }
}
