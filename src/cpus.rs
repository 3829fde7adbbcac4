//! Cores available to Spark tasks on the cluster.
//!
//! One core is reserved for the OS. In cluster deploy mode the driver runs
//! on the cluster too and takes another.

use std::fmt;
use std::str::FromStr;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeployMode {
    #[default]
    Cluster,
    Client,
}

impl DeployMode {
    fn reserved_cores(self) -> u32 {
        match self {
            DeployMode::Cluster => 2,
            DeployMode::Client => 1,
        }
    }
}

impl FromStr for DeployMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cluster" | "cluster_mode" => Ok(DeployMode::Cluster),
            "client" | "client_mode" => Ok(DeployMode::Client),
            other => Err(PipelineError::config(format!(
                "invalid deploy mode '{}' (expected cluster or client)",
                other
            ))),
        }
    }
}

impl fmt::Display for DeployMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployMode::Cluster => f.write_str("cluster"),
            DeployMode::Client => f.write_str("client"),
        }
    }
}

pub fn resolve_cpus_available(total_cores: u32, mode: DeployMode) -> Result<u32> {
    let available = total_cores.saturating_sub(mode.reserved_cores());
    if available < 1 {
        return Err(PipelineError::config(format!(
            "{} total cores leave no core for tasks in {} deploy mode",
            total_cores, mode
        )));
    }

    tracing::info!(
        total_cores,
        available,
        "Total CPU cores available for tasks: {} (deploy mode {})",
        available,
        mode
    );
    Ok(available)
}

/// Same as [`resolve_cpus_available`] with the deploy mode given as text.
pub fn cpus_available_for(total_cores: u32, mode: &str) -> Result<u32> {
    resolve_cpus_available(total_cores, mode.parse()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_reserves_driver_core() {
        assert_eq!(resolve_cpus_available(32, DeployMode::Cluster).unwrap(), 30);
        assert_eq!(cpus_available_for(32, "cluster_mode").unwrap(), 30);
    }

    #[test]
    fn test_client_reserves_os_core() {
        assert_eq!(resolve_cpus_available(32, DeployMode::Client).unwrap(), 31);
        assert_eq!(cpus_available_for(32, "client").unwrap(), 31);
    }

    #[test]
    fn test_invalid_mode_is_configuration_error() {
        let err = cpus_available_for(32, "yarn").unwrap_err();
        assert!(matches!(err, PipelineError::ConfigurationError(_)));
        assert!(err.to_string().contains("yarn"));
    }

    #[test]
    fn test_too_few_cores() {
        assert!(resolve_cpus_available(2, DeployMode::Cluster).is_err());
        assert!(resolve_cpus_available(0, DeployMode::Client).is_err());
        assert_eq!(resolve_cpus_available(2, DeployMode::Client).unwrap(), 1);
    }

    #[test]
    fn test_default_mode_is_cluster() {
        assert_eq!(DeployMode::default(), DeployMode::Cluster);
        assert_eq!(DeployMode::Client.to_string(), "client");
    }
}
