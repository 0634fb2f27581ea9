use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("引数の数が不正です\nUSAGE: {program} <source-ip> <target-ip> <port>")]
    Usage { program: String },

    #[error("{role}IPアドレスの解析に失敗しました: {value}")]
    InvalidAddress { role: &'static str, value: String },

    #[error("無効なポート番号: {0}")]
    InvalidPort(String),

    #[error("環境変数 {name} の解析に失敗しました: {value}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("ペイロードが大きすぎます: {len} バイト (最大 {max} バイト)")]
    PayloadTooLarge { len: usize, max: usize },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("ソケットの作成に失敗しました: {0}")]
    SocketCreation(std::io::Error),

    #[error("パケットの送信に失敗しました: {0}")]
    Send(std::io::Error),

    #[error("パケットの受信に失敗しました: {0}")]
    Receive(std::io::Error),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    #[error("ペイロードが大きすぎます: {len} バイト (最大 {max} バイト)")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("{header}ヘッダーが途中で切れています: {needed} バイト必要ですが {actual} バイトしかありません")]
    Truncated {
        header: &'static str,
        needed: usize,
        actual: usize,
    },

    #[error("IPv4/TCP以外のパケットです: version={version}, protocol={protocol}")]
    NotTcpOverIpv4 { version: u8, protocol: u8 },
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("ハンドシェイクが完了しませんでした: {0}")]
    HandshakeIncomplete(String),

    #[error("一致するトラフィックがありません ({discarded} パケットを破棄)")]
    NoMatchingTraffic { discarded: usize },

    #[error("想定外のTCPフラグです: 期待値 {expected:#04x}, 実際 {actual:#04x}")]
    UnexpectedFlags { expected: u8, actual: u8 },

    #[error("{packet}パケットの送信に失敗しました: {source}")]
    SendFailed {
        packet: &'static str,
        #[source]
        source: TransportError,
    },

    #[error("キャンセルされました")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("設定エラー: {0}")]
    Config(#[from] ConfigError),

    #[error("トランスポートエラー: {0}")]
    Transport(#[from] TransportError),

    #[error("パケットエラー: {0}")]
    Packet(#[from] PacketError),

    #[error("プロトコルエラー: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("ロガーのセットアップに失敗しました: {0}")]
    Logger(String),

    #[error("予期せぬエラー: {0}")]
    Unexpected(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
pub type PacketResult<T> = Result<T, PacketError>;
pub type SessionResult<T> = Result<T, AppError>;
