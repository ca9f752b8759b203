use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// 同期エンジンのチューニング値
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// カウンター更新をまとめるバッチウィンドウ（ミリ秒）
    pub batch_window_ms: u64,
    /// 1回の再取得リクエストに含める最大ID数
    pub reconcile_chunk_size: usize,
    pub max_reconcile_retries: u32,
    pub reconcile_timeout_ms: u64,
    pub page_size: u32,
    pub initial_load_retries: u32,
    pub load_retry_delay_ms: u64,
    /// プッシュ経路が健全な時のポーリング間隔（秒）
    pub poll_interval_secs: u64,
    /// プッシュ経路が切断されている時のポーリング間隔（秒）
    pub degraded_poll_interval_secs: u64,
    pub reconnect_initial_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub command_buffer: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite:data/photowall.db?mode=rwc".to_string(),
                max_connections: 5,
            },
            sync: SyncConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_window_ms: 300,
            reconcile_chunk_size: 10,
            max_reconcile_retries: 3,
            reconcile_timeout_ms: 5_000,
            page_size: 50,
            initial_load_retries: 2,
            load_retry_delay_ms: 500,
            poll_interval_secs: 30,
            degraded_poll_interval_secs: 2,
            reconnect_initial_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
            command_buffer: 1024,
        }
    }
}

impl SyncConfig {
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_millis(self.reconcile_timeout_ms)
    }

    pub fn load_retry_delay(&self) -> Duration {
        Duration::from_millis(self.load_retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn degraded_poll_interval(&self) -> Duration {
        Duration::from_secs(self.degraded_poll_interval_secs)
    }

    pub fn reconnect_initial_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.batch_window_ms == 0 {
            return Err("Sync batch_window_ms must be greater than 0".to_string());
        }
        if self.reconcile_chunk_size == 0 {
            return Err("Sync reconcile_chunk_size must be greater than 0".to_string());
        }
        if self.reconcile_timeout_ms == 0 {
            return Err("Sync reconcile_timeout_ms must be greater than 0".to_string());
        }
        if self.page_size == 0 {
            return Err("Sync page_size must be greater than 0".to_string());
        }
        if self.poll_interval_secs == 0 || self.degraded_poll_interval_secs == 0 {
            return Err("Sync poll intervals must be greater than 0".to_string());
        }
        if self.reconnect_initial_delay_ms == 0 {
            return Err("Sync reconnect_initial_delay_ms must be greater than 0".to_string());
        }
        if self.reconnect_initial_delay_ms > self.reconnect_max_delay_ms {
            return Err(
                "Sync reconnect_initial_delay_ms must not exceed reconnect_max_delay_ms".to_string(),
            );
        }
        if self.command_buffer == 0 {
            return Err("Sync command_buffer must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        // 既定値
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("PHOTOWALL_DATABASE_URL") {
            if !v.trim().is_empty() {
                cfg.database.url = v.trim().to_string();
            }
        }
        if let Some(value) = env_u64("PHOTOWALL_DATABASE_MAX_CONNECTIONS") {
            cfg.database.max_connections = value.max(1) as u32;
        }

        // 同期設定の環境変数反映
        if let Some(value) = env_u64("PHOTOWALL_BATCH_WINDOW_MS") {
            cfg.sync.batch_window_ms = value.max(1);
        }
        if let Some(value) = env_u64("PHOTOWALL_RECONCILE_CHUNK_SIZE") {
            cfg.sync.reconcile_chunk_size = value.max(1) as usize;
        }
        if let Some(value) = env_u64("PHOTOWALL_MAX_RECONCILE_RETRIES") {
            cfg.sync.max_reconcile_retries = value as u32;
        }
        if let Some(value) = env_u64("PHOTOWALL_RECONCILE_TIMEOUT_MS") {
            cfg.sync.reconcile_timeout_ms = value.max(1);
        }
        if let Some(value) = env_u64("PHOTOWALL_PAGE_SIZE") {
            cfg.sync.page_size = value.max(1) as u32;
        }
        if let Some(value) = env_u64("PHOTOWALL_POLL_INTERVAL_SECS") {
            cfg.sync.poll_interval_secs = value.max(1);
        }
        if let Some(value) = env_u64("PHOTOWALL_DEGRADED_POLL_INTERVAL_SECS") {
            cfg.sync.degraded_poll_interval_secs = value.max(1);
        }
        if let Some(value) = env_u64("PHOTOWALL_RECONNECT_INITIAL_DELAY_MS") {
            cfg.sync.reconnect_initial_delay_ms = value;
        }
        if let Some(value) = env_u64("PHOTOWALL_RECONNECT_MAX_DELAY_MS") {
            cfg.sync.reconnect_max_delay_ms = value;
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        self.sync.validate()
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| parse_u64(&v))
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.sync.batch_window(), Duration::from_millis(300));
        assert_eq!(cfg.sync.reconcile_chunk_size, 10);
    }

    #[test]
    fn zero_batch_window_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.sync.batch_window_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn reconnect_bounds_must_be_ordered() {
        let mut cfg = AppConfig::default();
        cfg.sync.reconnect_initial_delay_ms = 60_000;
        cfg.sync.reconnect_max_delay_ms = 1_000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_reconnect_delay_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.sync.reconnect_initial_delay_ms = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("reconnect_initial_delay_ms"));
    }

    #[test]
    fn zero_command_buffer_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.sync.command_buffer = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parse_u64_trims_and_rejects_garbage() {
        assert_eq!(parse_u64(" 250 "), Some(250));
        assert_eq!(parse_u64("fast"), None);
    }
}
