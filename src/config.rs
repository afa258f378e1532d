use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::session::paths::claude_projects_dir;
use crate::session::StatusThresholds;

pub const DEFAULT_PORT: u16 = 3333;
pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Runtime settings for the server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root holding one directory per project.
    pub projects_dir: PathBuf,
    pub bind_addr: SocketAddr,
    pub thresholds: StatusThresholds,
}

impl Config {
    /// Build a config, falling back to `~/.claude/projects` when no
    /// projects directory is given.
    pub fn new(projects_dir: Option<PathBuf>, host: IpAddr, port: u16) -> Result<Self> {
        let projects_dir = match projects_dir {
            Some(dir) => dir,
            None => claude_projects_dir().context("cannot determine home directory")?,
        };

        Ok(Self {
            projects_dir,
            bind_addr: SocketAddr::new(host, port),
            thresholds: StatusThresholds::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_projects_dir_wins() {
        let config = Config::new(Some("/srv/transcripts".into()), DEFAULT_HOST, 4000).unwrap();
        assert_eq!(config.projects_dir, PathBuf::from("/srv/transcripts"));
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:4000");
        assert_eq!(config.thresholds, StatusThresholds::default());
    }

    #[test]
    fn default_projects_dir_is_under_home() {
        if let Ok(config) = Config::new(None, DEFAULT_HOST, DEFAULT_PORT) {
            assert!(config.projects_dir.ends_with(".claude/projects"));
        }
    }
}
