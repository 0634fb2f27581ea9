use crate::config::SequenceAccounting;
use crate::error::{PacketError, PacketResult};
use crate::network::packet::ipv4::IPv4Header;
use crate::network::packet::tcp::{parse_tcp_options, TCPFlags, TCPHeader};
use crate::network::packet::{Endpoint, IPPROTO_TCP, TCP_HEADER_LEN};
use serde::Serialize;

// ハンドシェイクの進行状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HandshakeState {
    Idle,           // まだ何も送っていない
    SynSent,        // SYNを送信し、SYN-ACKを待っている
    SynAckReceived, // SYN-ACKを受信した
    Established,    // ACKを返してデータを送れる状態
    DataSent,       // データ(PSH)を送信し、応答を待っている
    AckSent,        // 応答に対してACKを返した
    Closed,         // トランスポートを解放した
}

/// セッションのシーケンス番号と確認応答番号
///
/// 各遷移関数は値を受け取って新しい値を返す。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub local: Endpoint,
    pub remote: Endpoint,
    pub sequence_number: u32,
    pub acknowledgement_number: u32,
}

/// 受信したTCPセグメントのうち、ハンドシェイクに必要な部分
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub source: Endpoint,
    pub destination: Endpoint,
    pub sequence_number: u32,
    pub acknowledgement_number: u32,
    pub flags: TCPFlags,
    pub mss: Option<u16>,
    pub payload_len: usize,
}

impl Segment {
    /// IPヘッダーから始まる受信バッファを解析する
    pub fn parse(data: &[u8]) -> PacketResult<Self> {
        let (ip, segment) = IPv4Header::parse(data)?;
        if ip.version != 4 || ip.protocol != IPPROTO_TCP {
            return Err(PacketError::NotTcpOverIpv4 {
                version: ip.version,
                protocol: ip.protocol,
            });
        }
        let (tcp, payload) = TCPHeader::parse(segment)?;
        let options = &segment[TCP_HEADER_LEN..tcp.data_offset as usize * 4];

        Ok(Self {
            source: Endpoint::new(ip.source, tcp.source_port),
            destination: Endpoint::new(ip.destination, tcp.destination_port),
            sequence_number: tcp.sequence_number,
            acknowledgement_number: tcp.acknowledgment_number,
            flags: tcp.flags,
            mss: parse_tcp_options(options),
            payload_len: payload.len(),
        })
    }

    // SYNとFINはそれぞれシーケンス空間を1つ消費する
    pub fn sequence_len(&self) -> u32 {
        self.payload_len as u32 + self.flags.syn as u32 + self.flags.fin as u32
    }
}

impl ConnectionState {
    /// SYN送信直後の状態
    pub fn after_syn(local: Endpoint, remote: Endpoint, initial_sequence: u32) -> Self {
        Self {
            local,
            remote,
            sequence_number: initial_sequence,
            acknowledgement_number: 0,
        }
    }

    // 相手のackをそのまま自分のseqに、相手のseq+1をackにする
    pub fn on_syn_ack(self, syn_ack: &Segment) -> Self {
        Self {
            sequence_number: syn_ack.acknowledgement_number,
            acknowledgement_number: syn_ack.sequence_number.wrapping_add(1),
            ..self
        }
    }

    pub fn after_data_sent(self, payload_len: usize, mode: SequenceAccounting) -> Self {
        match mode {
            SequenceAccounting::Standard => Self {
                sequence_number: self.sequence_number.wrapping_add(payload_len as u32),
                ..self
            },
            SequenceAccounting::Compat => self,
        }
    }

    /// 応答セグメントを受けて、次に返すACKの番号を決める
    pub fn on_response(self, response: &Segment, mode: SequenceAccounting) -> Self {
        match mode {
            SequenceAccounting::Standard => Self {
                acknowledgement_number: response
                    .sequence_number
                    .wrapping_add(response.sequence_len()),
                ..self
            },
            SequenceAccounting::Compat => Self {
                sequence_number: response.acknowledgement_number,
                acknowledgement_number: response.sequence_number.wrapping_add(1),
                ..self
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::packet::builder::build_packet;
    use crate::network::packet::tcp::{TCP_ACK, TCP_FIN, TCP_SYN};
    use std::net::Ipv4Addr;

    fn local() -> Endpoint {
        Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 40000)
    }

    fn remote() -> Endpoint {
        Endpoint::new(Ipv4Addr::new(10, 0, 0, 2), 80)
    }

    fn segment(seq: u32, ack: u32, flags: u8, payload_len: usize) -> Segment {
        Segment {
            source: remote(),
            destination: local(),
            sequence_number: seq,
            acknowledgement_number: ack,
            flags: TCPFlags::from_bits(flags),
            mss: Some(48),
            payload_len,
        }
    }

    #[test]
    fn parses_inbound_segment() {
        let flags = TCPFlags::from_bits(TCP_SYN | TCP_ACK);
        let packet = build_packet(remote(), local(), flags, 1000, 500, b"hi", 3).unwrap();
        let parsed = Segment::parse(packet.as_bytes()).unwrap();
        assert_eq!(parsed, segment(1000, 500, TCP_SYN | TCP_ACK, 2));
    }

    #[test]
    fn sequence_and_ack_sit_at_fixed_offsets() {
        let packet =
            build_packet(remote(), local(), TCPFlags::ACK, 0x01020304, 0x0a0b0c0d, &[], 3).unwrap();
        let data = packet.as_bytes();
        assert_eq!(&data[24..28], &[1, 2, 3, 4]);
        assert_eq!(&data[28..32], &[0x0a, 0x0b, 0x0c, 0x0d]);
    }

    #[test]
    fn rejects_truncated_and_foreign_packets() {
        let packet = build_packet(remote(), local(), TCPFlags::ACK, 1, 1, &[], 3).unwrap();
        let err = Segment::parse(&packet.as_bytes()[..31]).unwrap_err();
        assert!(matches!(err, PacketError::Truncated { header: "TCP", .. }));

        let mut udp = packet.as_bytes().to_vec();
        udp[9] = 17;
        assert_eq!(
            Segment::parse(&udp).unwrap_err(),
            PacketError::NotTcpOverIpv4 { version: 4, protocol: 17 }
        );
    }

    #[test]
    fn syn_ack_reflects_peer_numbers() {
        let syn_ack = segment(1000, 500, TCP_SYN | TCP_ACK, 0);
        let state = ConnectionState::after_syn(local(), remote(), 77).on_syn_ack(&syn_ack);
        assert_eq!(state.sequence_number, 500);
        assert_eq!(state.acknowledgement_number, 1001);
    }

    #[test]
    fn syn_ack_wraps_at_u32_max() {
        let syn_ack = segment(u32::MAX, 1, TCP_SYN | TCP_ACK, 0);
        let state = ConnectionState::after_syn(local(), remote(), 0).on_syn_ack(&syn_ack);
        assert_eq!(state.acknowledgement_number, 0);
    }

    #[test]
    fn standard_accounting_advances_by_payload() {
        let state = ConnectionState::after_syn(local(), remote(), 0)
            .on_syn_ack(&segment(5000, 1, TCP_SYN | TCP_ACK, 0))
            .after_data_sent(15, SequenceAccounting::Standard);
        assert_eq!(state.sequence_number, 16);

        let mode = SequenceAccounting::Standard;
        let state = state.on_response(&segment(5001, 16, TCP_ACK, 100), mode);
        assert_eq!(state.sequence_number, 16);
        assert_eq!(state.acknowledgement_number, 5101);

        let state = state.on_response(&segment(5101, 16, TCP_ACK | TCP_FIN, 0), mode);
        assert_eq!(state.acknowledgement_number, 5102);
    }

    #[test]
    fn compat_accounting_keeps_demonstrator_arithmetic() {
        let state = ConnectionState::after_syn(local(), remote(), 0)
            .on_syn_ack(&segment(5000, 1, TCP_SYN | TCP_ACK, 0))
            .after_data_sent(15, SequenceAccounting::Compat);
        assert_eq!(state.sequence_number, 1);

        let state = state.on_response(&segment(5001, 16, TCP_ACK, 100), SequenceAccounting::Compat);
        assert_eq!(state.sequence_number, 16);
        assert_eq!(state.acknowledgement_number, 5002);
    }
}
