//! Wire Protocol
//!
//! JSON control messages in both directions plus the downlink binary batch
//! framing. Control messages are internally tagged on `"type"`; unknown
//! server types deserialize to [`ServerMsg::Unknown`] and are ignored by
//! the control worker.

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenState {
    Detect,
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenMode {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    WakeWordDetected,
    SpeakingTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MusicAction {
    Pause,
    Resume,
}

/// Client -> server control messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    Hello {
        device_id: String,
        fw: String,
        listen_mode: ListenMode,
    },
    Listen {
        state: ListenState,
        #[serde(skip_serializing_if = "Option::is_none")]
        mode: Option<ListenMode>,
        /// Wake phrase, on `detect`.
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    Abort {
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<AbortReason>,
    },
    MusicCtrl {
        action: MusicAction,
    },
}

impl ClientMsg {
    pub fn to_json(&self) -> String {
        // Only fails on non-string map keys, which these types cannot have
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Optional capabilities announced in the server `hello`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    #[serde(default)]
    pub abort: bool,
}

fn default_expression_ms() -> u64 {
    3000
}

/// Server -> client control messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    Hello {
        session_id: String,
        #[serde(default)]
        features: Option<Features>,
    },
    TtsStart {
        #[serde(default)]
        text: Option<String>,
    },
    TtsEnd {
        #[serde(default)]
        reason: Option<String>,
    },
    MusicStart {
        #[serde(default)]
        title: Option<String>,
    },
    MusicEnd,
    MusicResume,
    AsrText {
        text: String,
    },
    Error {
        message: String,
    },
    Expression {
        expr: String,
        #[serde(default = "default_expression_ms")]
        duration_ms: u64,
    },
    Pong,
    OtaNotify {
        version: String,
        url: String,
    },
    #[serde(other)]
    Unknown,
}

impl ServerMsg {
    pub fn parse(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }
}

/// Iterator over the packets of one downlink batch:
/// `[len_be16][payload]*`. A malformed tail (zero length, or a length
/// overrunning the frame) ends iteration and sets [`BatchIter::truncated`].
pub struct BatchIter<'a> {
    data: &'a [u8],
    pos: usize,
    truncated: bool,
}

impl<'a> BatchIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            truncated: false,
        }
    }

    /// True once a malformed entry forced the rest of the batch to be
    /// discarded.
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

impl<'a> Iterator for BatchIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.pos == self.data.len() {
            return None;
        }
        if self.pos + 2 > self.data.len() {
            self.truncated = true;
            return None;
        }
        let len = BigEndian::read_u16(&self.data[self.pos..self.pos + 2]) as usize;
        if len == 0 || self.pos + 2 + len > self.data.len() {
            self.truncated = true;
            return None;
        }
        let start = self.pos + 2;
        self.pos = start + len;
        Some(&self.data[start..self.pos])
    }
}

/// Pack packets into one batch frame. The device never sends batches; this
/// exists for test servers and tooling.
pub fn encode_batch(packets: &[&[u8]]) -> Vec<u8> {
    let total: usize = packets.iter().map(|p| p.len() + 2).sum();
    let mut out = Vec::with_capacity(total);
    for packet in packets {
        let mut len = [0u8; 2];
        BigEndian::write_u16(&mut len, packet.len() as u16);
        out.extend_from_slice(&len);
        out.extend_from_slice(packet);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hello_json_shape() {
        let msg = ClientMsg::Hello {
            device_id: "hitony-246f28abcdef".into(),
            fw: "0.1.0".into(),
            listen_mode: ListenMode::Auto,
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(json["type"], "hello");
        assert_eq!(json["device_id"], "hitony-246f28abcdef");
        assert_eq!(json["listen_mode"], "auto");
    }

    #[test]
    fn test_listen_detect_carries_phrase() {
        let msg = ClientMsg::Listen {
            state: ListenState::Detect,
            mode: None,
            text: Some("Hi Tony".into()),
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(json["type"], "listen");
        assert_eq!(json["state"], "detect");
        assert_eq!(json["text"], "Hi Tony");
        assert!(json.get("mode").is_none());
    }

    #[test]
    fn test_abort_reason_encoding() {
        let msg = ClientMsg::Abort {
            reason: Some(AbortReason::WakeWordDetected),
        };
        let json: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(json["reason"], "wake_word_detected");
    }

    #[test]
    fn test_server_hello_parse() {
        let raw = br#"{"type":"hello","session_id":"s-42","features":{"abort":true}}"#;
        match ServerMsg::parse(raw).unwrap() {
            ServerMsg::Hello {
                session_id,
                features,
            } => {
                assert_eq!(session_id, "s-42");
                assert!(features.unwrap().abort);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_expression_default_duration() {
        let raw = br#"{"type":"expression","expr":"wink"}"#;
        match ServerMsg::parse(raw).unwrap() {
            ServerMsg::Expression { expr, duration_ms } => {
                assert_eq!(expr, "wink");
                assert_eq!(duration_ms, 3000);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_tolerated() {
        let raw = br#"{"type":"brand_new_thing","payload":1}"#;
        assert_eq!(ServerMsg::parse(raw).unwrap(), ServerMsg::Unknown);
    }

    #[test]
    fn test_batch_round_trip() {
        let packets: Vec<Vec<u8>> = (0u8..10).map(|i| vec![i; 60 + i as usize]).collect();
        let refs: Vec<&[u8]> = packets.iter().map(|p| p.as_slice()).collect();
        let frame = encode_batch(&refs);

        let mut iter = BatchIter::new(&frame);
        for expected in &packets {
            assert_eq!(iter.next().unwrap(), expected.as_slice());
        }
        assert!(iter.next().is_none());
        assert!(!iter.truncated());
    }

    #[test]
    fn test_batch_zero_length_truncates() {
        let frame = [0u8, 3, 9, 9, 9, 0, 0, 1, 1];
        let mut iter = BatchIter::new(&frame);
        assert_eq!(iter.next().unwrap(), &[9, 9, 9]);
        assert!(iter.next().is_none());
        assert!(iter.truncated());
    }

    #[test]
    fn test_batch_overrun_discards_rest() {
        // Second entry claims 200 bytes but only 2 remain
        let mut frame = encode_batch(&[&[1, 2, 3]]);
        frame.extend_from_slice(&[0, 200, 7, 7]);
        let mut iter = BatchIter::new(&frame);
        assert_eq!(iter.next().unwrap(), &[1, 2, 3]);
        assert!(iter.next().is_none());
        assert!(iter.truncated());
    }

    #[test]
    fn test_empty_batch() {
        let mut iter = BatchIter::new(&[]);
        assert!(iter.next().is_none());
        assert!(!iter.truncated());
    }
}
