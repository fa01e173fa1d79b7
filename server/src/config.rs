use std::path::PathBuf;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Physics stepper frequency
    pub physics_rate_hz: u32,
    /// Snapshot broadcast frequency
    pub broadcast_rate_hz: u32,
    /// Period of the finish-checker while a race is running
    pub finish_check_interval: Duration,
    /// Delay between `starting` and `started` (length of the start jingle)
    pub start_delay: Duration,
    /// Grace delay before ending a round in which every marble finished
    pub all_finished_grace: Duration,
    pub max_player_count: usize,
    pub max_marble_count: usize,
    /// Vertical gravity (m/s²)
    pub gravity: f32,
    pub marble_radius: f32,
    pub marble_density: f32,
    pub rng_seed: u64,
    /// Level file; the built-in level is used when unset
    pub level_path: Option<PathBuf>,
    /// Directory for round history and player statistics; log-only when unset
    pub stats_dir: Option<PathBuf>,
    /// Chat user ids allowed to run admin commands
    pub developer_ids: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9004".to_string(),
            physics_rate_hz: 60,
            broadcast_rate_hz: 20,
            finish_check_interval: Duration::from_millis(50),
            start_delay: Duration::from_millis(2825),
            all_finished_grace: Duration::from_millis(2000),
            max_player_count: 250,
            max_marble_count: 250,
            gravity: -10.0,
            marble_radius: 0.2,
            marble_density: 1.0,
            rng_seed: 42,
            level_path: None,
            stats_dir: None,
            developer_ids: Vec::new(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", key, raw);
            None
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Some(hz) = env_parse::<u32>("PHYSICS_RATE_HZ") {
            config.physics_rate_hz = hz;
        }
        if let Some(hz) = env_parse::<u32>("BROADCAST_RATE_HZ") {
            config.broadcast_rate_hz = hz;
        }
        if let Some(count) = env_parse::<usize>("MAX_PLAYER_COUNT") {
            config.max_player_count = count;
        }
        if let Some(count) = env_parse::<usize>("MAX_MARBLE_COUNT") {
            config.max_marble_count = count;
        }
        if let Some(gravity) = env_parse::<f32>("GRAVITY") {
            config.gravity = gravity;
        }
        if let Some(seed) = env_parse::<u64>("RNG_SEED") {
            config.rng_seed = seed;
        }
        if let Ok(path) = std::env::var("LEVEL_PATH") {
            config.level_path = Some(PathBuf::from(path));
        }
        if let Ok(dir) = std::env::var("STATS_DIR") {
            config.stats_dir = Some(PathBuf::from(dir));
        }
        if let Ok(ids) = std::env::var("DEVELOPER_IDS") {
            config.developer_ids = ids
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect();
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.physics_rate_hz == 0 {
            return Err("physics_rate_hz must be at least 1".to_string());
        }
        if self.broadcast_rate_hz == 0 {
            return Err("broadcast_rate_hz must be at least 1".to_string());
        }
        if self.finish_check_interval.is_zero() {
            return Err("finish_check_interval must be > 0".to_string());
        }
        if self.max_player_count == 0 {
            return Err("max_player_count must be at least 1".to_string());
        }
        if self.max_marble_count < self.max_player_count {
            return Err("max_marble_count cannot be below max_player_count".to_string());
        }
        if !self.gravity.is_finite() {
            return Err("gravity must be finite".to_string());
        }
        if !self.marble_radius.is_finite() || self.marble_radius <= 0.0 {
            return Err("marble_radius must be finite and > 0".to_string());
        }
        if !self.marble_density.is_finite() || self.marble_density <= 0.0 {
            return Err("marble_density must be finite and > 0".to_string());
        }
        Ok(())
    }

    pub fn is_developer(&self, user_id: &str) -> bool {
        self.developer_ids.iter().any(|id| id == user_id)
    }
}
