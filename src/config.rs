use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub db_path: PathBuf,
    /// Seconds between position-management passes.
    pub position_interval_secs: u64,
    /// Seconds between scheduled settlement runs.
    pub settlement_interval_secs: u64,
    /// Management fee on collected yield, in basis points.
    pub fee_bps: u32,
    pub openrouter_base_url: String,
    pub openrouter_api_key: Option<String>,
    pub openrouter_model: String,
    /// Position/market indexer consumed read-only.
    pub indexer_base_url: String,
    /// Delegated execution relay that submits calls with the session key.
    pub relay_base_url: String,
    pub position_manager_address: String,
    pub token0_address: String,
    pub token1_address: String,
}

impl Config {
    pub fn from_env() -> Self {
        let data_dir = env::var("LP_AUTOPILOT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".lp-autopilot"));

        let db_path = env::var("LP_AUTOPILOT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let mut path = data_dir.clone();
                path.push("autopilot.sqlite");
                path
            });

        Self {
            bind_addr: env::var("LP_AUTOPILOT_BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:8788".to_string()),
            db_path,
            position_interval_secs: env_u64("LP_AUTOPILOT_POSITION_INTERVAL_SECS", 3600),
            settlement_interval_secs: env_u64("LP_AUTOPILOT_SETTLEMENT_INTERVAL_SECS", 86400),
            fee_bps: env_u64("LP_AUTOPILOT_FEE_BPS", 100) as u32,
            openrouter_base_url: env::var("OPENROUTER_BASE_URL")
                .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string()),
            openrouter_api_key: env::var("OPENROUTER_API_KEY").ok(),
            openrouter_model: env::var("OPENROUTER_MODEL")
                .unwrap_or_else(|_| "openai/gpt-4o-mini".to_string()),
            indexer_base_url: env::var("LP_AUTOPILOT_INDEXER_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8899".to_string()),
            relay_base_url: env::var("LP_AUTOPILOT_RELAY_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8900".to_string()),
            position_manager_address: env::var("LP_AUTOPILOT_POSITION_MANAGER")
                .unwrap_or_else(|_| "0xc36442b4a4522e871399cd717abdd847ab11fe88".to_string()),
            token0_address: env::var("LP_AUTOPILOT_TOKEN0")
                .unwrap_or_else(|_| "0x4200000000000000000000000000000000000006".to_string()),
            token1_address: env::var("LP_AUTOPILOT_TOKEN1")
                .unwrap_or_else(|_| "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".to_string()),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}
