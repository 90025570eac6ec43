use anyhow::Context;
use std::env;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    pub records_dir: PathBuf,
    pub max_record_bytes: usize,
    pub db_max_connections: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let session_ttl_hours = parse_or("SESSION_TTL_HOURS", 24);
        let records_dir = env::var("RECORDS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/records"));
        let max_record_bytes = parse_or("MAX_RECORD_BYTES", 10 * 1024 * 1024);
        let db_max_connections = parse_or("DB_MAX_CONNECTIONS", 10);

        if session_ttl_hours <= 0 {
            anyhow::bail!("SESSION_TTL_HOURS must be positive");
        }

        Ok(Self {
            database_url,
            bind_addr,
            session_ttl_hours,
            records_dir,
            max_record_bytes,
            db_max_connections,
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}
