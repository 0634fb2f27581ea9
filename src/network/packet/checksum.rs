use crate::network::packet::IPPROTO_TCP;
use std::net::Ipv4Addr;

// RFC 1071 のインターネットチェックサム
// ビッグエンディアンの16ビットワードとして加算するので
// ホストのエンディアンに依存しない
pub fn checksum(data: &[u8]) -> u16 {
    finish(sum_words(0, data))
}

/// 疑似ヘッダーを前置してTCPセグメントのチェックサムを計算する
///
/// `segment` はTCPヘッダー・オプション・ペイロードを連結したもので、
/// チェックサムフィールドは0になっている必要がある。
pub fn tcp_checksum(source: Ipv4Addr, destination: Ipv4Addr, segment: &[u8]) -> u16 {
    let pseudo_header = pseudo_header(source, destination, segment.len() as u16);
    let sum = sum_words(0, &pseudo_header);
    finish(sum_words(sum, segment))
}

// 送信されない一時的なヘッダー
fn pseudo_header(source: Ipv4Addr, destination: Ipv4Addr, tcp_length: u16) -> [u8; 12] {
    let mut header = [0u8; 12];
    header[0..4].copy_from_slice(&source.octets());
    header[4..8].copy_from_slice(&destination.octets());
    header[8] = 0;
    header[9] = IPPROTO_TCP;
    header[10..12].copy_from_slice(&tcp_length.to_be_bytes());
    header
}

// u64で加算するので、折り返し前に桁あふれすることはない
fn sum_words(mut sum: u64, data: &[u8]) -> u64 {
    // 16ビット単位で合計を計算
    for chunk in data.chunks(2) {
        let mut word = (chunk[0] as u64) << 8;
        if chunk.len() > 1 {
            word |= chunk[1] as u64;
        }
        sum += word;
    }
    sum
}

fn finish(mut sum: u64) -> u16 {
    // 上位16ビットを下位16ビットに折り返す
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    // 1の補数を取る
    !sum as u16
}
