use crate::error::{PacketError, PacketResult};
use crate::network::packet::checksum::{checksum, tcp_checksum};
use crate::network::packet::ipv4::IPv4Header;
use crate::network::packet::tcp::{
    write_fixed_options, TCPFlags, TCPHeader, TCP_DATA_OFFSET, TCP_WINDOW,
};
use crate::network::packet::{
    Endpoint, Packet, HEADERS_LEN, IPPROTO_TCP, IPV4_HEADER_LEN, MAX_PAYLOAD_LEN, TCP_HEADER_LEN,
};
use bytes::BytesMut;

pub const IP_TTL: u8 = 64;

/// IPv4ヘッダー・TCPヘッダー・固定オプション・ペイロードを1つのバッファに組み立てる
///
/// チェックサムは他の全フィールドが確定してから、TCP、IPの順に計算する。
pub fn build_packet(
    local: Endpoint,
    remote: Endpoint,
    flags: TCPFlags,
    sequence_number: u32,
    acknowledgment_number: u32,
    payload: &[u8],
    identification: u16,
) -> PacketResult<Packet> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(PacketError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }

    let total_length = HEADERS_LEN + payload.len();
    // 0埋めされたバッファ
    let mut buffer = BytesMut::zeroed(total_length);

    // IPヘッダー (チェックサム以外)
    let ip_header = IPv4Header {
        version: 4,
        ihl: (IPV4_HEADER_LEN / 4) as u8,
        dscp: 0,
        ecn: 0,
        total_length: total_length as u16,
        identification,
        flags: 0,
        fragment_offset: 0,
        ttl: IP_TTL,
        protocol: IPPROTO_TCP,
        checksum: 0,
        source: local.address,
        destination: remote.address,
    };
    ip_header.write_to(&mut buffer[..IPV4_HEADER_LEN]);

    // TCPヘッダー (チェックサム以外)
    let tcp_header = TCPHeader {
        source_port: local.port,
        destination_port: remote.port,
        sequence_number,
        acknowledgment_number,
        data_offset: TCP_DATA_OFFSET,
        flags,
        window_size: TCP_WINDOW,
        checksum: 0,
        urgent_pointer: 0,
    };
    let tcp_start = IPV4_HEADER_LEN;
    let options_start = tcp_start + TCP_HEADER_LEN;
    tcp_header.write_to(&mut buffer[tcp_start..options_start]);

    // オプションとペイロード
    write_fixed_options(&mut buffer[options_start..HEADERS_LEN]);
    buffer[HEADERS_LEN..].copy_from_slice(payload);

    // TCPチェックサム (疑似ヘッダー + セグメント全体)
    let tcp_sum = tcp_checksum(local.address, remote.address, &buffer[tcp_start..]);
    let tcp_checksum_at = tcp_start + TCPHeader::CHECKSUM_OFFSET;
    buffer[tcp_checksum_at..tcp_checksum_at + 2].copy_from_slice(&tcp_sum.to_be_bytes());

    // IPチェックサム
    let ip_sum = checksum(&buffer[..IPV4_HEADER_LEN]);
    let ip_checksum_at = IPv4Header::CHECKSUM_OFFSET;
    buffer[ip_checksum_at..ip_checksum_at + 2].copy_from_slice(&ip_sum.to_be_bytes());

    Ok(Packet::from_bytes(buffer.freeze()))
}
