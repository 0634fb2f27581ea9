use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task;

mod config;
mod error;
mod handshake;
mod network;
mod setup_logger;

use crate::config::Configuration;
use crate::error::{AppError, SessionResult};
use crate::handshake::{CancellationToken, Session, SessionOutcome};
use crate::network::{Endpoint, PacketFactory, RawTransport};
use setup_logger::setup_logger;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        // ロガーの初期化前に失敗することもあるので標準エラーにも出す
        error!("{}", e);
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> SessionResult<()> {
    let args: Vec<String> = std::env::args().collect();
    let config = Configuration::from_args_and_env(&args)?;

    setup_logger(&config.logging).map_err(|e| AppError::Logger(e.to_string()))?;

    // 送信元ポートはランダムに選ぶ
    let local_port = rand::thread_rng().gen_range(1024..=65535);
    let local = Endpoint::new(config.network.source_addr, local_port);
    let remote = Endpoint::new(config.network.destination_addr, config.network.destination_port);
    info!("選択された送信元ポート: {}", local.port);

    let transport = RawTransport::open()?;
    let factory = PacketFactory::new(local, remote, StdRng::from_entropy());

    // Ctrl-C で受信待ちを打ち切る
    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    task::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("中断要求を受け取りました");
            watcher.cancel();
        }
    });

    let session = Session::new(transport, factory, config.session, cancel);
    let report = task::spawn_blocking(move || session.run())
        .await
        .map_err(|e| AppError::Unexpected(e.to_string()))??;

    let summary = serde_json::to_string(&report).map_err(|e| AppError::Unexpected(e.to_string()))?;
    info!("セッション結果: {}", summary);

    match report.outcome {
        SessionOutcome::Completed => info!("{} 件の応答にACKを返しました", report.responses_acknowledged),
        SessionOutcome::HandshakeIncomplete => warn!("ハンドシェイクが完了しませんでした"),
        SessionOutcome::Cancelled => warn!("セッションは中断されました"),
    }

    Ok(())
}
