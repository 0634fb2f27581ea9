use crate::error::{PacketError, PacketResult};
use crate::network::packet::{TCP_HEADER_LEN, TCP_OPTIONS_LEN};

// TCPフラグの定義
pub const TCP_FIN: u8 = 0x01;
pub const TCP_SYN: u8 = 0x02;
pub const TCP_RST: u8 = 0x04;
pub const TCP_PSH: u8 = 0x08;
pub const TCP_ACK: u8 = 0x10;
pub const TCP_URG: u8 = 0x20;

pub const TCP_WINDOW: u16 = 5840;
pub const TCP_MSS: u16 = 48;
// 20バイトヘッダー + 20バイトの固定オプション
pub const TCP_DATA_OFFSET: u8 = ((TCP_HEADER_LEN + TCP_OPTIONS_LEN) / 4) as u8;

//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |          Source Port          |       Destination Port        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        Sequence Number                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                    Acknowledgment Number                      |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  Data |           |U|A|P|R|S|F|                               |
// | Offset| Reserved  |R|C|S|S|Y|I|            Window             |
// |       |           |G|K|H|T|N|N|                               |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |           Checksum            |         Urgent Pointer        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TCPHeader {
    pub source_port: u16,
    pub destination_port: u16,
    pub sequence_number: u32,
    pub acknowledgment_number: u32,
    pub data_offset: u8,
    pub flags: TCPFlags,
    pub window_size: u16,
    pub checksum: u16,
    pub urgent_pointer: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TCPFlags {
    pub urg: bool,
    pub ack: bool,
    pub psh: bool,
    pub rst: bool,
    pub syn: bool,
    pub fin: bool,
}

impl TCPFlags {
    pub const SYN: TCPFlags = TCPFlags::from_bits(TCP_SYN);
    pub const ACK: TCPFlags = TCPFlags::from_bits(TCP_ACK);
    pub const PSH_ACK: TCPFlags = TCPFlags::from_bits(TCP_PSH | TCP_ACK);

    pub const fn from_bits(bits: u8) -> Self {
        Self {
            urg: bits & TCP_URG != 0,
            ack: bits & TCP_ACK != 0,
            psh: bits & TCP_PSH != 0,
            rst: bits & TCP_RST != 0,
            syn: bits & TCP_SYN != 0,
            fin: bits & TCP_FIN != 0,
        }
    }

    pub fn bits(&self) -> u8 {
        let mut bits = 0;
        if self.urg {
            bits |= TCP_URG;
        }
        if self.ack {
            bits |= TCP_ACK;
        }
        if self.psh {
            bits |= TCP_PSH;
        }
        if self.rst {
            bits |= TCP_RST;
        }
        if self.syn {
            bits |= TCP_SYN;
        }
        if self.fin {
            bits |= TCP_FIN;
        }
        bits
    }
}

impl TCPHeader {
    pub const CHECKSUM_OFFSET: usize = 16;

    /// ヘッダーを解析し、オプションを除いたペイロードを返す
    pub fn parse(data: &[u8]) -> PacketResult<(Self, &[u8])> {
        if data.len() < TCP_HEADER_LEN {
            return Err(PacketError::Truncated {
                header: "TCP",
                needed: TCP_HEADER_LEN,
                actual: data.len(),
            });
        }

        let source_port = u16::from_be_bytes([data[0], data[1]]);
        let destination_port = u16::from_be_bytes([data[2], data[3]]);
        let sequence_number = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let acknowledgment_number = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
        let data_offset = (data[12] >> 4) & 0xf;
        let flags = TCPFlags::from_bits(data[13]);
        let window_size = u16::from_be_bytes([data[14], data[15]]);
        let checksum = u16::from_be_bytes([data[16], data[17]]);
        let urgent_pointer = u16::from_be_bytes([data[18], data[19]]);

        let header_len = data_offset as usize * 4;
        if header_len < TCP_HEADER_LEN || data.len() < header_len {
            return Err(PacketError::Truncated {
                header: "TCP",
                needed: header_len.max(TCP_HEADER_LEN),
                actual: data.len(),
            });
        }

        Ok((
            Self {
                source_port,
                destination_port,
                sequence_number,
                acknowledgment_number,
                data_offset,
                flags,
                window_size,
                checksum,
                urgent_pointer,
            },
            &data[header_len..],
        ))
    }

    /// オプションを除く20バイトのヘッダーを書き込む
    pub fn write_to(&self, buffer: &mut [u8]) {
        // 送信元ポートと宛先ポート
        buffer[0..2].copy_from_slice(&self.source_port.to_be_bytes());
        buffer[2..4].copy_from_slice(&self.destination_port.to_be_bytes());
        // シーケンス番号
        buffer[4..8].copy_from_slice(&self.sequence_number.to_be_bytes());
        // 確認応答番号
        buffer[8..12].copy_from_slice(&self.acknowledgment_number.to_be_bytes());
        // データオフセットとフラグ
        buffer[12] = (self.data_offset & 0xf) << 4;
        buffer[13] = self.flags.bits();
        // ウィンドウサイズ、チェックサム、緊急ポインタ
        buffer[14..16].copy_from_slice(&self.window_size.to_be_bytes());
        buffer[16..18].copy_from_slice(&self.checksum.to_be_bytes());
        buffer[18..20].copy_from_slice(&self.urgent_pointer.to_be_bytes());
    }
}

/// 固定のオプションブロック: MSS (kind 2, len 4) と SACK許可 (kind 4, len 2)、残りは0埋め
pub fn write_fixed_options(buffer: &mut [u8]) {
    buffer[..TCP_OPTIONS_LEN].fill(0);
    buffer[0] = 0x02;
    buffer[1] = 0x04;
    buffer[2..4].copy_from_slice(&TCP_MSS.to_be_bytes());
    buffer[4] = 0x04;
    buffer[5] = 0x02;
}

/// オプション列からMSSを取り出す
pub fn parse_tcp_options(data: &[u8]) -> Option<u16> {
    let mut i = 0;
    while i < data.len() {
        match data[i] {
            0 => break,  // End of options
            1 => i += 1, // NOP
            2 if data.len() >= i + 4 => {
                // MSS option
                return Some(u16::from_be_bytes([data[i + 2], data[i + 3]]));
            }
            _ if data.len() > i + 1 && data[i + 1] >= 2 => i += data[i + 1] as usize,
            _ => break,
        }
    }
    None
}
