//! Device Identity
//!
//! Both transport headers are derived from the hardware unique identifier
//! (the MAC) at boot. The token is not a secret in any strong sense; it
//! only has to be stable and cheap to recompute on the server.

/// The identity pair sent as `x-device-id` / `x-device-token` and inside
/// the `hello` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub device_token: String,
}

impl DeviceIdentity {
    /// Derive the identity from the 6-byte hardware MAC.
    ///
    /// `device_id` is `hitony-` plus the MAC in lowercase hex.
    /// `device_token` is the MAC reversed, each byte XOR-masked with
    /// alternating `0xA5` / `0x5A`, in lowercase hex.
    pub fn from_mac(mac: [u8; 6]) -> Self {
        let device_id = format!("hitony-{}", hex(&mac));

        let mut masked = [0u8; 6];
        for (i, byte) in mac.iter().rev().enumerate() {
            let mask = if i % 2 == 0 { 0xA5 } else { 0x5A };
            masked[i] = byte ^ mask;
        }

        Self {
            device_id,
            device_token: hex(&masked),
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}
