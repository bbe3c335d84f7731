use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, anyhow};

use crate::occupancy::{MAX_SEAT_COUNT, OccupancyConfig, ReaperConfig};

const MAX_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    /// Base url of the account service; random aliases are used without it.
    pub accounts_url: Option<String>,
    pub occupancy: OccupancyConfig,
    pub reaper: ReaperConfig,
}

impl Config {
    /// Reads `.env` and the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let database_url = lookup("DATABASE_URL").ok_or_else(|| anyhow!("DATABASE_URL is not set"))?;
        let bind_addr = parse(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?;

        let occupancy_defaults = OccupancyConfig::default();
        let default_seat_count = parse(&lookup, "DEFAULT_SEAT_COUNT", occupancy_defaults.default_seat_count)?;
        if default_seat_count > MAX_SEAT_COUNT {
            return Err(anyhow!("DEFAULT_SEAT_COUNT={default_seat_count} exceeds {MAX_SEAT_COUNT}"));
        }
        let occupancy = OccupancyConfig {
            default_seat_count,
            default_scenario: lookup("DEFAULT_SCENARIO").unwrap_or(occupancy_defaults.default_scenario),
        };

        let reaper_defaults = ReaperConfig::default();
        let reaper = ReaperConfig {
            interval: seconds(&lookup, "REAPER_INTERVAL_SECS", reaper_defaults.interval)?,
            heartbeat_timeout: seconds(&lookup, "HEARTBEAT_TIMEOUT_SECS", reaper_defaults.heartbeat_timeout)?,
            room_inactivity: seconds(&lookup, "ROOM_INACTIVITY_SECS", reaper_defaults.room_inactivity)?,
        };

        Ok(Self {
            database_url,
            bind_addr,
            accounts_url: lookup("ACCOUNTS_URL"),
            occupancy,
            reaper,
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().with_context(|| format!("{key}={raw} is invalid")),
        None => Ok(default),
    }
}

// between one second and thirty days
fn seconds(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: Duration) -> anyhow::Result<Duration> {
    let secs = parse(lookup, key, default.as_secs())?;
    Ok(Duration::from_secs(secs.clamp(1, MAX_SECS)))
}
