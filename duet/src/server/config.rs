use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 可从配置文件反序列化的服务配置，用于初始化 [`ServerBuilder`](super::ServerBuilder)。
///
/// ```
/// use duet::ServerConfig;
/// let config: ServerConfig = serde_json::from_str(r#"{"address": ":8000", "timeout_ms": 500}"#).unwrap();
/// assert_eq!(config.network, "tcp");
/// assert!(config.strict_slash);
/// ```
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `tcp`、`tcp4` 或 `tcp6`
    pub network: String,
    pub address: String,
    /// 单个请求的超时时间（毫秒），0 表示不限制。
    pub timeout_ms: u64,
    pub enable_http3: bool,
    /// 显式指定对外地址，不设置时由监听地址推导。
    pub endpoint: Option<String>,
    pub strict_slash: bool,
    pub path_prefix: Option<String>,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    /// HTTP/3 请求体大小上限（字节）。
    pub max_body_size: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: "tcp".to_string(),
            address: ":0".to_string(),
            timeout_ms: 1000,
            enable_http3: false,
            endpoint: None,
            strict_slash: true,
            path_prefix: None,
            cert_path: None,
            key_path: None,
            max_body_size: None,
        }
    }
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
