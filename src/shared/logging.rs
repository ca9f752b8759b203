use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// ログ設定を初期化
///
/// `RUST_LOG` が設定されていればそちらを優先する。
pub fn init(level: &str, json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let fmt_layer = if json {
        fmt::layer().json().with_current_span(false).boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!(json, "logging initialized");
}
