use crate::config::LoggingConfig;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::File;
use std::io::Write;
use std::str::FromStr;

pub fn setup_logger(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    // ログファイルを開く
    let file = File::create(&config.file)?;
    let level = LevelFilter::from_str(&config.level)?;

    // ビルダーでロガーをカスタマイズ
    Builder::new()
        // ログレベルの設定
        .filter_level(level)
        // タイムスタンプ付きのフォーマット
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(), // モジュールパスが表示される
                record.args()
            )
        })
        // 標準出力とファイルの両方に出力
        .target(Target::Pipe(Box::new(Tee { file })))
        .try_init()?;

    Ok(())
}

struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        std::io::stdout().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stdout().flush()?;
        self.file.flush()
    }
}
