use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::{Error, Result};

/// Run options shared by every connection.
#[derive(Clone, Debug)]
pub struct Config {
    pub servers: Vec<String>,
    /// Connections per server per worker thread
    pub connections: usize,
    pub threads: usize,
    pub records: u64,
    pub depth: usize,
    pub time: Duration,
    /// Aggregate target rate across all connections, 0 disables pacing
    pub qps: u64,
    pub iadist: String,
    pub keysize: String,
    pub valuesize: String,
    /// Probability that a generated command is a SET
    pub update: f64,
    pub loadonly: bool,
    pub noload: bool,
    pub no_nodelay: bool,
    pub save: Option<PathBuf>,
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            servers: vec![Self::DEFAULT_SERVER.to_string()],
            connections: 1,
            threads: 1,
            records: 10_000,
            depth: 1,
            time: Duration::from_secs(5),
            qps: 0,
            iadist: Self::DEFAULT_IADIST.to_string(),
            keysize: Self::DEFAULT_KEYSIZE.to_string(),
            valuesize: Self::DEFAULT_VALUESIZE.to_string(),
            update: 0.0,
            loadonly: false,
            noload: false,
            no_nodelay: false,
            save: None,
            seed: None,
        }
    }
}

impl Config {
    const DEFAULT_SERVER: &str = "127.0.0.1:11211";
    const DEFAULT_IADIST: &str = "exponential";
    const DEFAULT_KEYSIZE: &str = "30";
    const DEFAULT_VALUESIZE: &str = "200";

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source. Missing variables keep their
    /// defaults, malformed ones are rejected.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(servers) = lookup("HAILSTORM_SERVERS") {
            config.servers = servers
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if config.servers.is_empty() {
                return Err(invalid("HAILSTORM_SERVERS", &servers));
            }
        }

        config.connections = parse_or(&lookup, "HAILSTORM_CONNECTIONS", config.connections)?;
        config.threads = parse_or(&lookup, "HAILSTORM_THREADS", config.threads)?;
        config.records = parse_or(&lookup, "HAILSTORM_RECORDS", config.records)?;
        config.depth = parse_or(&lookup, "HAILSTORM_DEPTH", config.depth)?;
        config.qps = parse_or(&lookup, "HAILSTORM_QPS", config.qps)?;
        config.update = parse_or(&lookup, "HAILSTORM_UPDATE", config.update)?;
        config.loadonly = parse_or(&lookup, "HAILSTORM_LOADONLY", config.loadonly)?;
        config.noload = parse_or(&lookup, "HAILSTORM_NOLOAD", config.noload)?;
        config.no_nodelay = parse_or(&lookup, "HAILSTORM_NO_NODELAY", config.no_nodelay)?;

        let secs: f64 = parse_or(&lookup, "HAILSTORM_TIME_SECS", config.time.as_secs_f64())?;
        config.time = Duration::try_from_secs_f64(secs)
            .map_err(|_| invalid("HAILSTORM_TIME_SECS", &secs.to_string()))?;

        if let Some(v) = lookup("HAILSTORM_IADIST") {
            config.iadist = v;
        }
        if let Some(v) = lookup("HAILSTORM_KEYSIZE") {
            config.keysize = v;
        }
        if let Some(v) = lookup("HAILSTORM_VALUESIZE") {
            config.valuesize = v;
        }
        config.save = lookup("HAILSTORM_SAVE").map(PathBuf::from);
        config.seed = match lookup("HAILSTORM_SEED") {
            Some(v) => Some(v.parse().map_err(|_| invalid("HAILSTORM_SEED", &v))?),
            None => None,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connections == 0 {
            return Err(invalid("HAILSTORM_CONNECTIONS", "0"));
        }
        if self.threads == 0 {
            return Err(invalid("HAILSTORM_THREADS", "0"));
        }
        if self.depth == 0 {
            return Err(invalid("HAILSTORM_DEPTH", "0"));
        }
        if self.records == 0 {
            return Err(invalid("HAILSTORM_RECORDS", "0"));
        }
        if !(0.0..=1.0).contains(&self.update) {
            return Err(invalid("HAILSTORM_UPDATE", &self.update.to_string()));
        }
        if self.loadonly && self.noload {
            warn!("HAILSTORM_LOADONLY and HAILSTORM_NOLOAD both set, nothing will be sent");
        }
        Ok(())
    }

    /// Total number of connections opened across all servers and threads.
    pub fn total_connections(&self) -> usize {
        self.servers.len() * self.connections * self.threads
    }

    /// Per-connection arrival rate in operations per second.
    pub fn lambda(&self) -> f64 {
        self.qps as f64 / self.total_connections() as f64
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| invalid(key, &raw)),
        None => Ok(default),
    }
}

fn invalid(key: &str, value: &str) -> Error {
    Error::InvalidConfig {
        key: key.to_string(),
        value: value.to_string(),
    }
}
