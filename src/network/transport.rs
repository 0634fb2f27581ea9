use crate::error::TransportError;
use crate::network::packet::DATAGRAM_LEN;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::Packet as _;
use pnet::transport::{self, TransportChannelType::Layer3, TransportReceiver, TransportSender};
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// IPヘッダーごと送受信できるトランスポート
pub trait Transport {
    /// 組み立て済みのパケットを送信し、送信したバイト数を返す
    fn send(&mut self, packet: &[u8], destination: Ipv4Addr) -> io::Result<usize>;

    /// 1パケット受信してバッファにコピーする。`timeout` 内に届かなければ `None`
    fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<Option<usize>>;
}

// IP_HDRINCL付きのTCP生ソケット
pub struct RawTransport {
    tx: TransportSender,
    rx: TransportReceiver,
}

impl RawTransport {
    pub fn open() -> Result<Self, TransportError> {
        // Layer3 チャネルはカーネルにIPヘッダーを生成させない
        let protocol = Layer3(IpNextHeaderProtocols::Tcp);
        let (tx, rx) = transport::transport_channel(DATAGRAM_LEN, protocol)
            .map_err(TransportError::SocketCreation)?;
        Ok(Self { tx, rx })
    }
}

impl Transport for RawTransport {
    fn send(&mut self, packet: &[u8], destination: Ipv4Addr) -> io::Result<usize> {
        let packet = Ipv4Packet::new(packet)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "IPv4ヘッダーより短いパケットです"))?;
        self.tx.send_to(packet, IpAddr::V4(destination))
    }

    fn receive(&mut self, buffer: &mut [u8], timeout: Duration) -> io::Result<Option<usize>> {
        let mut iter = transport::ipv4_packet_iter(&mut self.rx);
        match iter.next_with_timeout(timeout)? {
            Some((packet, _)) => {
                let data = packet.packet();
                let len = data.len().min(buffer.len());
                buffer[..len].copy_from_slice(&data[..len]);
                Ok(Some(len))
            }
            None => Ok(None),
        }
    }
}
