use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug)]
pub struct AppConfig {
    pub root: PathBuf,
    /// Admin/API endpoint of the wider backend; the delta port derives
    /// from it when not given explicitly.
    pub api_bind_addr: String,
    pub delta_bind_addr: String,
    pub tick_length: Duration,
    pub announce_interval: Duration,
    pub token_secret: String,
}

impl AppConfig {
    pub fn from_args(args: &[String]) -> Result<Self, String> {
        if args.len() < 2 {
            return Err(
                "usage: idleforge <data-root> [api_bind_addr] [delta_bind_addr]".to_string(),
            );
        }

        let root = Path::new(&args[1]).to_path_buf();
        let api_bind_addr = if args.len() > 2 {
            args[2].clone()
        } else {
            env_addr("IDLEFORGE_API_ADDR").unwrap_or_else(|| "0.0.0.0:7171".to_string())
        };
        let delta_bind_addr = if args.len() > 3 {
            args[3].clone()
        } else {
            env_addr("IDLEFORGE_DELTA_ADDR")
                .or_else(|| derive_delta_bind_addr(&api_bind_addr))
                .unwrap_or_else(|| "0.0.0.0:7172".to_string())
        };

        let tick_length = env_millis("IDLEFORGE_TICK_MS").unwrap_or(Duration::from_millis(1000));
        let announce_interval =
            env_millis("IDLEFORGE_ANNOUNCE_MS").unwrap_or(Duration::from_secs(60));
        let token_secret = std::env::var("IDLEFORGE_TOKEN_SECRET")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "idleforge-dev-secret".to_string());

        Ok(Self {
            root,
            api_bind_addr,
            delta_bind_addr,
            tick_length,
            announce_interval,
            token_secret,
        })
    }
}

fn env_addr(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_millis(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|millis| *millis > 0)
        .map(Duration::from_millis)
}

/// The delta service listens one port above the API endpoint.
fn derive_delta_bind_addr(api_bind_addr: &str) -> Option<String> {
    let (host, port_str) = api_bind_addr.rsplit_once(':')?;
    let port: u16 = port_str.parse().ok()?;
    let delta_port = port.saturating_add(1);
    Some(format!("{host}:{delta_port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn missing_root_is_an_error() {
        assert!(AppConfig::from_args(&args(&["idleforge"])).is_err());
    }

    #[test]
    fn delta_addr_derives_from_api_addr() {
        let config =
            AppConfig::from_args(&args(&["idleforge", "/tmp/data", "127.0.0.1:9000"]))
                .expect("config");
        assert_eq!(config.api_bind_addr, "127.0.0.1:9000");
        assert_eq!(config.delta_bind_addr, "127.0.0.1:9001");
    }

    #[test]
    fn explicit_delta_addr_wins() {
        let config = AppConfig::from_args(&args(&[
            "idleforge",
            "/tmp/data",
            "127.0.0.1:9000",
            "127.0.0.1:4444",
        ]))
        .expect("config");
        assert_eq!(config.delta_bind_addr, "127.0.0.1:4444");
    }

    #[test]
    fn derive_handles_port_edge() {
        assert_eq!(
            derive_delta_bind_addr("0.0.0.0:65535").as_deref(),
            Some("0.0.0.0:65535")
        );
        assert_eq!(derive_delta_bind_addr("no-port"), None);
    }
}
