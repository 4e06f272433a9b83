//! 日誌初始化
//!
//! 使用 `RUST_LOG` 設定過濾器，未設定時使用呼叫端提供的預設值。

use thiserror::Error;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("日誌初始化失敗: {0}")]
    Init(String),
}

/// 初始化全域日誌訂閱者
///
/// 已有訂閱者時返回錯誤。
pub fn init_tracing(default_filter: &str) -> Result<(), LoggingError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| LoggingError::Init(e.to_string()))
}

/// 測試用日誌，輸出到測試擷取器，可重複呼叫
pub fn init_test_tracing() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
