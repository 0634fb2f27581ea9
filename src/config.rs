use crate::error::{ConfigError, ConfigResult};
use crate::network::packet::MAX_PAYLOAD_LEN;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PAYLOAD: &str = "Hello server!!!";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub network: NetworkConfig,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub source_addr: Ipv4Addr,
    pub destination_addr: Ipv4Addr,
    pub destination_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub payload: String,
    pub receive_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub max_discards: usize,
    pub max_responses: usize,
    pub strict: bool,
    pub sequence_mode: SequenceAccounting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: String,
}

// 送信側シーケンス番号の進め方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceAccounting {
    // ペイロード長だけシーケンス番号を進める (通常のTCP)
    Standard,
    // ペイロードを送ってもシーケンス番号を進めず、常に peer_seq + 1 を返す
    Compat,
}

impl FromStr for SequenceAccounting {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(SequenceAccounting::Standard),
            "compat" | "compatible" => Ok(SequenceAccounting::Compat),
            _ => Err(()),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            payload: DEFAULT_PAYLOAD.to_string(),
            receive_timeout_ms: 3000,
            poll_interval_ms: 200,
            max_discards: 1024,
            max_responses: 64,
            strict: false,
            sequence_mode: SequenceAccounting::Standard,
        }
    }
}

impl SessionConfig {
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Configuration {
    /// コマンドライン引数と環境変数 (.env を含む) から設定を組み立てる
    pub fn from_args_and_env(args: &[String]) -> ConfigResult<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(args, |name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(args: &[String], lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let network = NetworkConfig::from_args(args)?;
        let defaults = SessionConfig::default();

        let payload = lookup("RAWTCP_PAYLOAD").unwrap_or(defaults.payload);
        // パケットを組み立てる前にここで弾く
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ConfigError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }

        let receive_timeout_ms =
            env_or(&lookup, "RAWTCP_RECV_TIMEOUT_MS", defaults.receive_timeout_ms)?;
        // 0ms では一度も受信を試みずにタイムアウトしてしまう
        if receive_timeout_ms == 0 {
            return Err(ConfigError::InvalidEnv {
                name: "RAWTCP_RECV_TIMEOUT_MS",
                value: receive_timeout_ms.to_string(),
            });
        }

        let session = SessionConfig {
            payload,
            receive_timeout_ms,
            poll_interval_ms: env_or(
                &lookup,
                "RAWTCP_POLL_INTERVAL_MS",
                defaults.poll_interval_ms,
            )?,
            max_discards: env_or(&lookup, "RAWTCP_MAX_DISCARDS", defaults.max_discards)?,
            max_responses: env_or(&lookup, "RAWTCP_MAX_RESPONSES", defaults.max_responses)?,
            strict: env_or(&lookup, "RAWTCP_STRICT", defaults.strict)?,
            sequence_mode: env_or(&lookup, "RAWTCP_SEQUENCE_MODE", defaults.sequence_mode)?,
        };

        let logging = LoggingConfig {
            level: lookup("RAWTCP_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            file: lookup("RAWTCP_LOG_FILE").unwrap_or_else(|| "rawtcp.log".to_string()),
        };

        Ok(Configuration {
            network,
            session,
            logging,
        })
    }
}

impl NetworkConfig {
    pub fn from_args(args: &[String]) -> ConfigResult<Self> {
        if args.len() != 4 {
            let program = args.first().cloned().unwrap_or_else(|| "raw-handshake".to_string());
            return Err(ConfigError::Usage { program });
        }

        let source_addr = args[1].parse::<Ipv4Addr>().map_err(|_| ConfigError::InvalidAddress {
            role: "送信元",
            value: args[1].clone(),
        })?;
        let destination_addr = args[2].parse::<Ipv4Addr>().map_err(|_| ConfigError::InvalidAddress {
            role: "宛先",
            value: args[2].clone(),
        })?;
        let destination_port = args[3]
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(args[3].clone()))?;

        Ok(NetworkConfig {
            source_addr,
            destination_addr,
            destination_port,
        })
    }
}

fn env_or<F, T>(lookup: &F, name: &'static str, default: T) -> ConfigResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidEnv { name, value }),
        None => Ok(default),
    }
}
