use crate::error::{PacketError, PacketResult};
use crate::network::packet::IPV4_HEADER_LEN;
use std::net::Ipv4Addr;

//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |Version|  IHL  |Type of Service|          Total Length         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         Identification        |Flags|      Fragment Offset    |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  Time to Live |    Protocol   |         Header Checksum       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                       Source Address                          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                    Destination Address                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IPv4Header {
    pub version: u8,
    pub ihl: u8,
    pub dscp: u8,
    pub ecn: u8,
    pub total_length: u16,
    pub identification: u16,
    pub flags: u8,
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

impl IPv4Header {
    pub const CHECKSUM_OFFSET: usize = 10;

    /// ヘッダーを解析し、ヘッダー以降のデータを返す
    pub fn parse(data: &[u8]) -> PacketResult<(Self, &[u8])> {
        if data.len() < IPV4_HEADER_LEN {
            return Err(PacketError::Truncated {
                header: "IPv4",
                needed: IPV4_HEADER_LEN,
                actual: data.len(),
            });
        }

        let version = (data[0] >> 4) & 0xf;
        let ihl = data[0] & 0xf;
        let header_len = ihl as usize * 4;
        // IHLが5未満、またはバッファより長いヘッダーは読まない
        if header_len < IPV4_HEADER_LEN || data.len() < header_len {
            return Err(PacketError::Truncated {
                header: "IPv4",
                needed: header_len.max(IPV4_HEADER_LEN),
                actual: data.len(),
            });
        }

        let dscp = data[1] >> 2;
        let ecn = data[1] & 0x3;
        let total_length = u16::from_be_bytes([data[2], data[3]]);
        let identification = u16::from_be_bytes([data[4], data[5]]);
        let flags = (data[6] >> 5) & 0x7;
        let fragment_offset = u16::from_be_bytes([data[6] & 0x1f, data[7]]);
        let ttl = data[8];
        let protocol = data[9];
        let checksum = u16::from_be_bytes([data[10], data[11]]);
        let source = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
        let destination = Ipv4Addr::new(data[16], data[17], data[18], data[19]);

        // 合計長が妥当ならそこで切り詰める (イーサネットのパディング対策)
        let end = match total_length as usize {
            len if len >= header_len && len <= data.len() => len,
            _ => data.len(),
        };

        Ok((
            Self {
                version,
                ihl,
                dscp,
                ecn,
                total_length,
                identification,
                flags,
                fragment_offset,
                ttl,
                protocol,
                checksum,
                source,
                destination,
            },
            &data[header_len..end],
        ))
    }

    /// オプションなしの20バイトヘッダーを書き込む
    pub fn write_to(&self, buffer: &mut [u8]) {
        // バージョンとIHL
        buffer[0] = (self.version << 4) | (self.ihl & 0xf);
        // DSCP と ECN
        buffer[1] = (self.dscp << 2) | (self.ecn & 0x3);
        // 合計長
        buffer[2..4].copy_from_slice(&self.total_length.to_be_bytes());
        // 識別子
        buffer[4..6].copy_from_slice(&self.identification.to_be_bytes());
        // フラグとフラグメントオフセット
        let flags_offset = ((self.flags as u16) << 13) | (self.fragment_offset & 0x1fff);
        buffer[6..8].copy_from_slice(&flags_offset.to_be_bytes());
        // TTL, プロトコル, チェックサム
        buffer[8] = self.ttl;
        buffer[9] = self.protocol;
        buffer[10..12].copy_from_slice(&self.checksum.to_be_bytes());
        // 送信元IPアドレス
        buffer[12..16].copy_from_slice(&self.source.octets());
        // 宛先IPアドレス
        buffer[16..20].copy_from_slice(&self.destination.octets());
    }
}
