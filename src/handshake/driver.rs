use crate::config::SessionConfig;
use crate::error::{AppError, ProtocolError, SessionResult, TransportError};
use crate::handshake::receive::{receive_matching, CancellationToken, ReceiveOutcome};
use crate::handshake::state::{ConnectionState, HandshakeState, Segment};
use crate::network::packet::tcp::{TCP_ACK, TCP_SYN};
use crate::network::packet::{Packet, PacketFactory};
use crate::network::transport::Transport;
use log::{debug, info, warn};
use rand::Rng;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionOutcome {
    Completed,
    HandshakeIncomplete,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub outcome: SessionOutcome,
    pub final_state: HandshakeState,
    pub connection: Option<ConnectionState>,
    pub packets_sent: usize,
    pub bytes_sent: usize,
    pub responses_acknowledged: usize,
    pub anomalies: Vec<String>,
}

impl SessionReport {
    fn new() -> Self {
        Self {
            outcome: SessionOutcome::Completed,
            final_state: HandshakeState::Idle,
            connection: None,
            packets_sent: 0,
            bytes_sent: 0,
            responses_acknowledged: 0,
            anomalies: Vec::new(),
        }
    }
}

/// SYN → SYN-ACK → ACK → データ → 応答ごとのACK を1回だけ実行する
pub struct Session<T: Transport, R: Rng> {
    transport: T,
    factory: PacketFactory<R>,
    config: SessionConfig,
    cancel: CancellationToken,
    report: SessionReport,
}

impl<T: Transport, R: Rng> Session<T, R> {
    pub fn new(
        transport: T,
        factory: PacketFactory<R>,
        config: SessionConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            factory,
            config,
            cancel,
            report: SessionReport::new(),
        }
    }

    pub fn run(mut self) -> SessionResult<SessionReport> {
        let local = self.factory.local();
        let remote = self.factory.remote();
        info!("セッションを開始します: {} -> {}", local, remote);

        // SYN
        let (syn, initial_sequence) = self.factory.syn()?;
        self.transmit("SYN", &syn)?;
        let connection = ConnectionState::after_syn(local, remote, initial_sequence);
        self.enter(HandshakeState::SynSent, connection);

        // SYN-ACK
        let syn_ack = match self.receive() {
            Ok(ReceiveOutcome::Matched(segment)) => segment,
            Ok(ReceiveOutcome::TimedOut) => {
                return self.incomplete("SYN-ACKの受信がタイムアウトしました".to_string())
            }
            Err(AppError::Protocol(ProtocolError::Cancelled)) => {
                return Ok(self.finish(SessionOutcome::Cancelled))
            }
            Err(e @ (AppError::Protocol(_) | AppError::Transport(_))) => {
                return self.incomplete(e.to_string())
            }
            Err(e) => return Err(e),
        };
        info!(
            "SYN-ACKを受信しました: sequence number: {}, acknowledgement number: {}",
            syn_ack.sequence_number, syn_ack.acknowledgement_number
        );
        if let Some(mss) = syn_ack.mss {
            info!("相手のMSS: {}", mss);
        }
        let expected = TCP_SYN | TCP_ACK;
        if syn_ack.flags.bits() & expected != expected {
            self.anomaly(
                ProtocolError::UnexpectedFlags {
                    expected,
                    actual: syn_ack.flags.bits(),
                }
                .into(),
            )?;
        }
        let connection = connection.on_syn_ack(&syn_ack);
        self.enter(HandshakeState::SynAckReceived, connection);

        // ACK
        let ack = self.factory.ack(connection.sequence_number, connection.acknowledgement_number)?;
        self.transmit("ACK", &ack)?;
        self.enter(HandshakeState::Established, connection);

        // データ (PSH)
        let payload = self.config.payload.clone().into_bytes();
        let data = self.factory.data(
            connection.sequence_number,
            connection.acknowledgement_number,
            &payload,
        )?;
        self.transmit("PSH", &data)?;
        let connection = connection.after_data_sent(payload.len(), self.config.sequence_mode);
        self.enter(HandshakeState::DataSent, connection);

        self.acknowledge_responses(connection)?;
        Ok(self.finish(SessionOutcome::Completed))
    }

    // 応答が途切れるまで、受信したセグメントごとにACKを返す
    fn acknowledge_responses(&mut self, mut connection: ConnectionState) -> SessionResult<()> {
        for _ in 0..self.config.max_responses {
            let response = match self.receive() {
                Ok(ReceiveOutcome::Matched(segment)) => segment,
                Ok(ReceiveOutcome::TimedOut) => {
                    info!("応答がなくなりました");
                    return Ok(());
                }
                Err(AppError::Protocol(ProtocolError::Cancelled)) => {
                    self.report.outcome = SessionOutcome::Cancelled;
                    return Ok(());
                }
                Err(e @ (AppError::Protocol(_) | AppError::Transport(_))) => return self.anomaly(e),
                Err(e) => return Err(e),
            };

            if response.flags.rst {
                warn!("相手がコネクションをリセットしました");
                return Ok(());
            }

            connection = self.respond(connection, &response)?;
        }

        warn!("応答数が上限 ({}) に達しました", self.config.max_responses);
        Ok(())
    }

    fn respond(
        &mut self,
        connection: ConnectionState,
        response: &Segment,
    ) -> SessionResult<ConnectionState> {
        info!(
            "応答を受信しました: sequence number: {}, acknowledgement number: {}, {} バイト",
            response.sequence_number, response.acknowledgement_number, response.payload_len
        );
        let connection = connection.on_response(response, self.config.sequence_mode);
        let ack = self.factory.ack(connection.sequence_number, connection.acknowledgement_number)?;
        self.transmit("ACK", &ack)?;
        self.report.responses_acknowledged += 1;
        self.enter(HandshakeState::AckSent, connection);
        Ok(connection)
    }

    fn receive(&mut self) -> SessionResult<ReceiveOutcome> {
        let local_port = self.factory.local().port;
        receive_matching(&mut self.transport, local_port, &self.config, &self.cancel)
    }

    fn transmit(&mut self, kind: &'static str, packet: &Packet) -> SessionResult<()> {
        let destination = self.factory.remote().address;
        debug!("{}パケットを {} へ送信します ({} バイト)", kind, destination, packet.len());
        match self.transport.send(packet.as_bytes(), destination) {
            Ok(sent) => {
                info!("{} バイトの{}を送信しました", sent, kind);
                self.report.packets_sent += 1;
                self.report.bytes_sent += sent;
                Ok(())
            }
            Err(e) => self.anomaly(
                ProtocolError::SendFailed {
                    packet: kind,
                    source: TransportError::Send(e),
                }
                .into(),
            ),
        }
    }

    // 厳格モードでなければ記録して続行する
    fn anomaly(&mut self, error: AppError) -> SessionResult<()> {
        if self.config.strict {
            return Err(error);
        }
        warn!("{}", error);
        self.report.anomalies.push(error.to_string());
        Ok(())
    }

    fn incomplete(mut self, reason: String) -> SessionResult<SessionReport> {
        if self.config.strict {
            return Err(ProtocolError::HandshakeIncomplete(reason).into());
        }
        warn!("{}", ProtocolError::HandshakeIncomplete(reason.clone()));
        self.report.anomalies.push(reason);
        Ok(self.finish(SessionOutcome::HandshakeIncomplete))
    }

    fn enter(&mut self, state: HandshakeState, connection: ConnectionState) {
        self.report.final_state = state;
        self.report.connection = Some(connection);
    }

    fn finish(mut self, outcome: SessionOutcome) -> SessionReport {
        if self.report.outcome == SessionOutcome::Completed {
            self.report.outcome = outcome;
        }
        self.report.final_state = HandshakeState::Closed;
        info!("セッションを終了します");
        // transport はここで破棄される
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SequenceAccounting;
    use crate::network::packet::builder::build_packet;
    use crate::network::packet::ipv4::IPv4Header;
    use crate::network::packet::tcp::{TCPFlags, TCPHeader, TCP_FIN, TCP_PSH, TCP_RST};
    use crate::network::packet::Endpoint;
    use crate::network::transport::testing::{Reply, ScriptedTransport};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io;
    use std::net::Ipv4Addr;

    const LOCAL_PORT: u16 = 45000;

    fn local() -> Endpoint {
        Endpoint::new(Ipv4Addr::LOCALHOST, LOCAL_PORT)
    }

    fn remote() -> Endpoint {
        Endpoint::new(Ipv4Addr::LOCALHOST, 8080)
    }

    fn config() -> SessionConfig {
        SessionConfig {
            receive_timeout_ms: 30,
            poll_interval_ms: 10,
            max_discards: 8,
            ..Default::default()
        }
    }

    fn from_peer(flags: u8, seq: u32, ack: u32, payload: &[u8]) -> Reply {
        let flags = TCPFlags::from_bits(flags);
        let packet = build_packet(remote(), local(), flags, seq, ack, payload, 9).unwrap();
        Reply::Packet(packet.as_bytes().to_vec())
    }

    // 別のポート宛てのセグメント
    fn to_other_port(seq: u32) -> Reply {
        let other = Endpoint::new(Ipv4Addr::LOCALHOST, LOCAL_PORT + 1);
        let packet = build_packet(remote(), other, TCPFlags::ACK, seq, 0, &[], 9).unwrap();
        Reply::Packet(packet.as_bytes().to_vec())
    }

    fn session(
        transport: ScriptedTransport,
        config: SessionConfig,
    ) -> Session<ScriptedTransport, StdRng> {
        let factory = PacketFactory::new(local(), remote(), StdRng::seed_from_u64(7));
        Session::new(transport, factory, config, CancellationToken::new())
    }

    fn run(
        replies: Vec<Reply>,
        config: SessionConfig,
    ) -> (SessionResult<SessionReport>, Vec<Vec<u8>>) {
        let transport = ScriptedTransport::new(replies);
        let sent = transport.sent_log();
        let result = session(transport, config).run();
        let sent = sent.lock().unwrap().clone();
        (result, sent)
    }

    fn tcp_of(packet: &[u8]) -> (TCPHeader, usize) {
        let (_, segment) = IPv4Header::parse(packet).unwrap();
        let (tcp, payload) = TCPHeader::parse(segment).unwrap();
        (tcp, payload.len())
    }

    #[test]
    fn handshake_ack_reflects_syn_ack() {
        let (result, sent) = run(vec![from_peer(TCP_SYN | TCP_ACK, 1000, 500, &[])], config());
        let report = result.unwrap();
        assert_eq!(report.outcome, SessionOutcome::Completed);

        let (syn, _) = tcp_of(&sent[0]);
        assert_eq!(syn.flags, TCPFlags::SYN);

        let (ack, len) = tcp_of(&sent[1]);
        assert_eq!(ack.flags, TCPFlags::ACK);
        assert_eq!(ack.sequence_number, 500);
        assert_eq!(ack.acknowledgment_number, 1001);
        assert_eq!(len, 0);

        // データは直前のACKと同じ番号で送る
        let (data, len) = tcp_of(&sent[2]);
        assert_eq!(data.flags, TCPFlags::from_bits(TCP_PSH | TCP_ACK));
        assert_eq!(data.sequence_number, 500);
        assert_eq!(data.acknowledgment_number, 1001);
        assert_eq!(len, "Hello server!!!".len());
    }

    #[test]
    fn loopback_session_ends_on_first_silence() {
        let replies = vec![from_peer(TCP_SYN | TCP_ACK, 5000, 1, &[]), Reply::Timeout];
        let (result, sent) = run(replies, config());
        let report = result.unwrap();

        assert_eq!(report.outcome, SessionOutcome::Completed);
        assert_eq!(report.final_state, HandshakeState::Closed);
        assert_eq!(report.responses_acknowledged, 0);
        assert!(report.anomalies.is_empty());
        assert_eq!(sent.len(), 3);
        assert_eq!(report.packets_sent, 3);
        assert_eq!(report.bytes_sent, 60 + 60 + 60 + 15);

        let connection = report.connection.unwrap();
        assert_eq!(connection.acknowledgement_number, 5001);
        assert_eq!(connection.sequence_number, 1 + 15);
    }

    #[test]
    fn each_response_is_acknowledged() {
        let replies = vec![
            from_peer(TCP_SYN | TCP_ACK, 5000, 1, &[]),
            from_peer(TCP_ACK, 5001, 16, &[]),
            from_peer(TCP_PSH | TCP_ACK, 5001, 16, b"hello back"),
            from_peer(TCP_FIN | TCP_ACK, 5011, 16, &[]),
        ];
        let (result, sent) = run(replies, config());
        let report = result.unwrap();
        assert_eq!(report.responses_acknowledged, 3);
        assert_eq!(sent.len(), 6);

        let acks: Vec<(u32, u32)> = sent[3..]
            .iter()
            .map(|packet| {
                let (tcp, _) = tcp_of(packet);
                (tcp.sequence_number, tcp.acknowledgment_number)
            })
            .collect();
        assert_eq!(acks, vec![(16, 5001), (16, 5011), (16, 5012)]);
    }

    #[test]
    fn compat_mode_reflects_peer_numbers() {
        let replies = vec![
            from_peer(TCP_SYN | TCP_ACK, 5000, 1, &[]),
            from_peer(TCP_PSH | TCP_ACK, 5001, 1, b"hello back"),
        ];
        let config = SessionConfig {
            sequence_mode: SequenceAccounting::Compat,
            ..config()
        };
        let (result, sent) = run(replies, config);
        result.unwrap();

        let (data, _) = tcp_of(&sent[2]);
        assert_eq!((data.sequence_number, data.acknowledgment_number), (1, 5001));
        let (ack, _) = tcp_of(&sent[3]);
        assert_eq!((ack.sequence_number, ack.acknowledgment_number), (1, 5002));
    }

    #[test]
    fn missing_syn_ack_is_handshake_incomplete() {
        let (result, sent) = run(vec![Reply::Timeout], config());
        let report = result.unwrap();
        assert_eq!(report.outcome, SessionOutcome::HandshakeIncomplete);
        assert_eq!(report.anomalies.len(), 1);
        // 未定義の番号でACKやデータを送らない
        assert_eq!(sent.len(), 1);
    }

    #[test]
    fn strict_mode_aborts_on_incomplete_handshake() {
        let config = SessionConfig { strict: true, ..config() };
        let (result, _) = run(vec![Reply::Timeout], config);
        assert!(matches!(result, Err(AppError::Protocol(ProtocolError::HandshakeIncomplete(_)))));
    }

    #[test]
    fn unrelated_traffic_before_syn_ack_is_handshake_incomplete() {
        // max_discards (8) を超えて別ポート宛てのパケットが届く
        let replies: Vec<Reply> = (0..9).map(to_other_port).collect();
        let (result, sent) = run(replies, config());
        let report = result.unwrap();
        assert_eq!(report.outcome, SessionOutcome::HandshakeIncomplete);
        assert_eq!(report.final_state, HandshakeState::Closed);
        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(sent.len(), 1);
        assert_eq!(report.packets_sent, 1);

        let strict = SessionConfig { strict: true, ..config() };
        let (result, sent) = run((0..9).map(to_other_port).collect(), strict);
        assert!(matches!(
            result,
            Err(AppError::Protocol(ProtocolError::HandshakeIncomplete(_)))
        ));
        assert_eq!(sent.len(), 1);
    }

    #[test]
    fn receive_error_before_syn_ack_is_handshake_incomplete() {
        let replies = vec![Reply::Error(io::ErrorKind::ConnectionReset)];
        let (result, sent) = run(replies, config());
        let report = result.unwrap();
        assert_eq!(report.outcome, SessionOutcome::HandshakeIncomplete);
        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(sent.len(), 1);

        let strict = SessionConfig { strict: true, ..config() };
        let replies = vec![Reply::Error(io::ErrorKind::ConnectionReset)];
        let (result, sent) = run(replies, strict);
        assert!(matches!(
            result,
            Err(AppError::Protocol(ProtocolError::HandshakeIncomplete(_)))
        ));
        assert_eq!(sent.len(), 1);
    }

    #[test]
    fn unexpected_flags_are_recorded_but_not_fatal() {
        let (result, sent) = run(vec![from_peer(TCP_ACK, 1000, 500, &[])], config());
        let report = result.unwrap();
        assert_eq!(report.outcome, SessionOutcome::Completed);
        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(sent.len(), 3);

        let strict = SessionConfig { strict: true, ..config() };
        let (result, _) = run(vec![from_peer(TCP_ACK, 1000, 500, &[])], strict);
        assert!(matches!(
            result,
            Err(AppError::Protocol(ProtocolError::UnexpectedFlags { expected: 0x12, actual: 0x10 }))
        ));
    }

    #[test]
    fn send_failures_are_reported_and_skipped() {
        let replies = vec![from_peer(TCP_SYN | TCP_ACK, 1000, 500, &[])];
        let mut transport = ScriptedTransport::new(replies);
        transport.fail_sends = true;
        let report = session(transport, config()).run().unwrap();

        assert_eq!(report.outcome, SessionOutcome::Completed);
        assert_eq!(report.packets_sent, 0);
        assert_eq!(report.anomalies.len(), 3);
    }

    #[test]
    fn reset_ends_response_loop() {
        let replies = vec![
            from_peer(TCP_SYN | TCP_ACK, 5000, 1, &[]),
            from_peer(TCP_RST, 5001, 0, &[]),
            from_peer(TCP_ACK, 5001, 16, &[]),
        ];
        let (result, sent) = run(replies, config());
        assert_eq!(result.unwrap().responses_acknowledged, 0);
        assert_eq!(sent.len(), 3);
    }

    #[test]
    fn cancelled_session_reports_cancellation() {
        let transport = ScriptedTransport::new(vec![from_peer(TCP_SYN | TCP_ACK, 5000, 1, &[])]);
        let factory = PacketFactory::new(local(), remote(), StdRng::seed_from_u64(7));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = Session::new(transport, factory, config(), cancel).run().unwrap();
        assert_eq!(report.outcome, SessionOutcome::Cancelled);
        assert_eq!(report.final_state, HandshakeState::Closed);
    }
}
