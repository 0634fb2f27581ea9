pub mod builder;
pub mod checksum;
pub mod factory;
pub mod ipv4;
pub mod tcp;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

pub use factory::PacketFactory;

// データグラムの最大長
pub const DATAGRAM_LEN: usize = 4096;
pub const IPV4_HEADER_LEN: usize = 20;
pub const TCP_HEADER_LEN: usize = 20;
// 固定のTCPオプション長 (MSS + SACK許可 + パディング)
pub const TCP_OPTIONS_LEN: usize = 20;
pub const HEADERS_LEN: usize = IPV4_HEADER_LEN + TCP_HEADER_LEN + TCP_OPTIONS_LEN;
pub const MAX_PAYLOAD_LEN: usize = DATAGRAM_LEN - HEADERS_LEN;

pub const IPPROTO_TCP: u8 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: Ipv4Addr, port: u16) -> Self {
        Self { address, port }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// 送信可能な状態まで組み立て済みのIPv4/TCPパケット
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    data: Bytes,
}

impl Packet {
    pub(crate) fn from_bytes(data: Bytes) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    // IPv4ヘッダーの合計長と常に一致する
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[cfg(test)]
    pub fn payload(&self) -> &[u8] {
        &self.data[HEADERS_LEN..]
    }
}
