//! 構造化ログの初期化。
//! `RUST_LOG` が設定されていればそれを優先し、なければ設定ファイルの `log.level` を使う。

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::infrastructure::config::LogConfig;

/// tracing-subscriber を初期化する。`format` が "text" ならプレーンテキスト、それ以外は JSON。
pub fn init_tracing(cfg: &LogConfig) -> anyhow::Result<()> {
    let filter = build_filter(cfg);
    let registry = tracing_subscriber::registry().with(filter);

    if cfg.format == "text" {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()?;
    }
    Ok(())
}

fn build_filter(cfg: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.level))
}
