//! Engine configuration parsed from environment variables.
//!
//! Boolean master switches gate the sync channel on or off per runtime
//! environment without changing the engine's internal contract.

const DEFAULT_CURSOR_INTERVAL_MS: u64 = 20;
const DEFAULT_MAX_UNDO: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Whether the sync channel is active at all.
    pub websocket_enabled: bool,
    /// Whether live cursor broadcasts are sent and replayed. Implies
    /// `websocket_enabled`.
    pub live_cursors_enabled: bool,
    /// WebSocket endpoint of the sync service.
    pub ws_url: String,
    /// Base URL of the persistence service.
    pub api_base_url: String,
    /// Cursor queue drain interval in milliseconds.
    pub cursor_interval_ms: u64,
    /// Maximum undo depth; older entries are dropped past this.
    pub max_undo: usize,
}

impl SyncConfig {
    /// Build config from environment variables.
    ///
    /// Optional:
    /// - `SYNC_WEBSOCKET_ENABLED`: default `true`
    /// - `SYNC_LIVE_CURSORS_ENABLED`: default `true`
    /// - `SYNC_WS_URL`: default `ws://localhost:3001/sync`
    /// - `SYNC_API_BASE_URL`: default `http://localhost:3000`
    /// - `SYNC_CURSOR_INTERVAL_MS`: default 20
    /// - `SYNC_MAX_UNDO`: default 50
    #[must_use]
    pub fn from_env() -> Self {
        let websocket_enabled = env_parse("SYNC_WEBSOCKET_ENABLED", true);
        Self {
            websocket_enabled,
            live_cursors_enabled: websocket_enabled && env_parse("SYNC_LIVE_CURSORS_ENABLED", true),
            ws_url: std::env::var("SYNC_WS_URL").unwrap_or_else(|_| "ws://localhost:3001/sync".into()),
            api_base_url: std::env::var("SYNC_API_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".into()),
            cursor_interval_ms: env_parse("SYNC_CURSOR_INTERVAL_MS", DEFAULT_CURSOR_INTERVAL_MS),
            max_undo: env_parse("SYNC_MAX_UNDO", DEFAULT_MAX_UNDO),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            websocket_enabled: true,
            live_cursors_enabled: true,
            ws_url: "ws://localhost:3001/sync".into(),
            api_base_url: "http://localhost:3000".into(),
            cursor_interval_ms: DEFAULT_CURSOR_INTERVAL_MS,
            max_undo: DEFAULT_MAX_UNDO,
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
