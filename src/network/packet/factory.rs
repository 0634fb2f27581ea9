use crate::error::PacketResult;
use crate::network::packet::builder::build_packet;
use crate::network::packet::tcp::TCPFlags;
use crate::network::packet::{Endpoint, Packet};
use rand::Rng;

/// セッションの2つのエンドポイントに向けたSYN/ACK/データパケットを作る
///
/// IPの識別子と初期シーケンス番号は内部の乱数生成器から取るので、
/// シードを固定すれば出力はバイト単位で再現できる。
pub struct PacketFactory<R: Rng> {
    local: Endpoint,
    remote: Endpoint,
    rng: R,
}

impl<R: Rng> PacketFactory<R> {
    pub fn new(local: Endpoint, remote: Endpoint, rng: R) -> Self {
        Self { local, remote, rng }
    }

    pub fn local(&self) -> Endpoint {
        self.local
    }

    pub fn remote(&self) -> Endpoint {
        self.remote
    }

    /// ランダムな初期シーケンス番号を持つSYNパケット
    pub fn syn(&mut self) -> PacketResult<(Packet, u32)> {
        let initial_sequence: u32 = self.rng.gen();
        let packet = self.build(TCPFlags::SYN, initial_sequence, 0, &[])?;
        Ok((packet, initial_sequence))
    }

    pub fn ack(&mut self, sequence: u32, acknowledgment: u32) -> PacketResult<Packet> {
        self.build(TCPFlags::ACK, sequence, acknowledgment, &[])
    }

    pub fn data(
        &mut self,
        sequence_number: u32,
        acknowledgment_number: u32,
        payload: &[u8],
    ) -> PacketResult<Packet> {
        self.build(TCPFlags::PSH_ACK, sequence_number, acknowledgment_number, payload)
    }

    fn build(
        &mut self,
        flags: TCPFlags,
        seq: u32,
        ack: u32,
        payload: &[u8],
    ) -> PacketResult<Packet> {
        let identification: u16 = self.rng.gen();
        build_packet(self.local, self.remote, flags, seq, ack, payload, identification)
    }
}
