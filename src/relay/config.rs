// Runtime configuration for the relay server

use std::net::SocketAddr;
use std::path::PathBuf;

/// Address the relay listens on when none is given
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8787";

/// Resolved server settings
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// HTTP/WebSocket listen address
    pub listen_addr: SocketAddr,
    /// Directory holding the history database
    pub data_dir: PathBuf,
}

impl RelayConfig {
    pub fn new(listen_addr: SocketAddr, data_dir: Option<PathBuf>) -> Self {
        Self {
            listen_addr,
            data_dir: data_dir.unwrap_or_else(Self::default_data_dir),
        }
    }

    /// Default data directory, `$HOME/.mission-relay`
    pub fn default_data_dir() -> PathBuf {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(".mission-relay")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_data_dir() {
        let dir = RelayConfig::default_data_dir();
        assert!(dir.ends_with(".mission-relay"));
    }

    #[test]
    fn test_explicit_data_dir_wins() {
        let addr: SocketAddr = DEFAULT_LISTEN_ADDR.parse().unwrap();
        let config = RelayConfig::new(addr, Some(PathBuf::from("/var/lib/relay")));
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/relay"));
        assert_eq!(config.listen_addr.port(), 8787);
    }
}
