use crate::config::SessionConfig;
use crate::error::{ProtocolError, SessionResult, TransportError};
use crate::handshake::state::Segment;
use crate::network::packet::DATAGRAM_LEN;
use crate::network::transport::Transport;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// 受信待ちを外部から打ち切るためのトークン
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub enum ReceiveOutcome {
    Matched(Segment),
    TimedOut,
}

/// 宛先ポートが `local_port` のセグメントが届くまで受信する
///
/// 他のポート宛てや解析できないパケットは破棄する。`receive_timeout` を過ぎれば
/// `TimedOut`、破棄数が `max_discards` を超えれば `NoMatchingTraffic` になる。
pub fn receive_matching<T: Transport + ?Sized>(
    transport: &mut T,
    local_port: u16,
    config: &SessionConfig,
    cancel: &CancellationToken,
) -> SessionResult<ReceiveOutcome> {
    let deadline = Instant::now() + config.receive_timeout();
    let mut buffer = [0u8; DATAGRAM_LEN];
    let mut discarded = 0usize;

    loop {
        if cancel.is_cancelled() {
            return Err(ProtocolError::Cancelled.into());
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(ReceiveOutcome::TimedOut);
        }

        // キャンセルに気づけるよう、短い間隔で区切って待つ
        let slice = (deadline - now).min(config.poll_interval());
        let received = match transport
            .receive(&mut buffer, slice)
            .map_err(TransportError::Receive)?
        {
            Some(received) => received,
            None => continue,
        };

        match Segment::parse(&buffer[..received]) {
            Ok(segment) if segment.destination.port == local_port => {
                info!(
                    "{} バイト受信しました ({} -> {})",
                    received, segment.source, segment.destination
                );
                return Ok(ReceiveOutcome::Matched(segment));
            }
            Ok(segment) => {
                debug!("宛先ポート {} のパケットを破棄しました", segment.destination.port)
            }
            Err(e) => debug!("解析できないパケットを破棄しました: {}", e),
        }

        discarded += 1;
        if discarded > config.max_discards {
            return Err(ProtocolError::NoMatchingTraffic { discarded }.into());
        }
    }
}
