//! Node configuration.
//!
//! Settings are layered, later sources winning:
//!
//! 1. built-in defaults,
//! 2. an optional YAML file,
//! 3. `SYNOD_*` environment variables (`SYNOD_PROPOSER__QUORUM=5`,
//!    `SYNOD_LOG_LEVEL=debug`, lists comma separated),
//! 4. command-line flags, applied by the binary.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use synod_consensus::{AcceptorConfig, ProposerConfig};
use synod_protocol::{Phase, DEFAULT_BASE_PORT};

use crate::{NodeError, Result};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "SYNOD";

/// Longest accepted duration setting, one year in seconds.
pub const MAX_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Configuration for the `synod` binary.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log format (pretty or json).
    pub log_format: String,
    /// Proposer settings.
    pub proposer: ProposerSettings,
    /// Acceptor settings.
    pub acceptor: AcceptorSettings,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            proposer: ProposerSettings::default(),
            acceptor: AcceptorSettings::default(),
        }
    }
}

/// Proposer settings. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProposerSettings {
    /// Interface the queues are bound on.
    pub bind: String,
    /// Port of the first queue.
    pub baseport: u16,
    /// Number of acceptors.
    pub quorum: usize,
    /// Deadline for promises and for learns.
    pub timeout: u64,
    /// Upper bound of injected latency.
    pub delay: u64,
    /// Rounds to run.
    pub iters: u32,
    /// Pause between rounds.
    pub round_pause: u64,
    /// Require learns to match the proposal exactly.
    pub strict_learn: bool,
    /// Scripted proposal numbers, cycled by round. Empty means prompt.
    pub numbers: Vec<u64>,
    /// Scripted proposal values, cycled by round.
    pub values: Vec<String>,
}

impl Default for ProposerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            baseport: DEFAULT_BASE_PORT,
            quorum: 3,
            timeout: 10,
            delay: 5,
            iters: 5,
            round_pause: 10,
            strict_learn: false,
            numbers: Vec::new(),
            values: Vec::new(),
        }
    }
}

impl ProposerSettings {
    /// Role configuration for the consensus engine.
    pub fn consensus(&self) -> ProposerConfig {
        ProposerConfig {
            quorum: self.quorum,
            timeout: Duration::from_secs(self.timeout),
            max_delay: Duration::from_secs(self.delay),
            strict_learn: self.strict_learn,
        }
    }

    /// The parsed bind address.
    pub fn bind_ip(&self) -> Result<IpAddr> {
        self.bind
            .parse()
            .map_err(|_| NodeError::Invalid(format!("proposer.bind: bad address {:?}", self.bind)))
    }

    /// Pause between rounds.
    pub fn round_pause(&self) -> Duration {
        Duration::from_secs(self.round_pause)
    }

    fn validate(&self) -> Result<()> {
        if self.quorum == 0 {
            return Err(NodeError::Invalid("proposer.quorum must be at least 1".into()));
        }
        check_iters("proposer", self.iters)?;
        check_baseport("proposer", self.baseport)?;
        check_seconds("proposer.timeout", self.timeout)?;
        check_seconds("proposer.delay", self.delay)?;
        check_seconds("proposer.round_pause", self.round_pause)?;
        self.bind_ip()?;
        if self.numbers.is_empty() != self.values.is_empty() {
            return Err(NodeError::Invalid(
                "proposer.numbers and proposer.values must be given together".into(),
            ));
        }
        Ok(())
    }
}

/// Acceptor settings. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AcceptorSettings {
    /// Host of the proposer.
    pub ipaddr: String,
    /// Port of the proposer's first queue.
    pub baseport: u16,
    /// How long to wait for each request.
    pub timeout: u64,
    /// Upper bound of injected latency.
    pub delay: u64,
    /// Rounds to run.
    pub iters: u32,
    /// Pause between rounds.
    pub round_pause: u64,
    /// How long to keep trying to reach the proposer.
    pub connect_timeout: u64,
    /// Scripted numbers held at round start (`none` or a number), cycled by
    /// round. Empty means prompt.
    pub held: Vec<String>,
}

impl Default for AcceptorSettings {
    fn default() -> Self {
        Self {
            ipaddr: "localhost".to_string(),
            baseport: DEFAULT_BASE_PORT,
            timeout: 20,
            delay: 5,
            iters: 5,
            round_pause: 10,
            connect_timeout: 60,
            held: Vec::new(),
        }
    }
}

impl AcceptorSettings {
    /// Role configuration for the consensus engine.
    pub fn consensus(&self) -> AcceptorConfig {
        AcceptorConfig {
            timeout: Duration::from_secs(self.timeout),
            max_delay: Duration::from_secs(self.delay),
        }
    }

    /// Pause between rounds.
    pub fn round_pause(&self) -> Duration {
        Duration::from_secs(self.round_pause)
    }

    /// How long to keep trying to reach the proposer.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    fn validate(&self) -> Result<()> {
        if self.ipaddr.trim().is_empty() {
            return Err(NodeError::Invalid("acceptor.ipaddr must not be empty".into()));
        }
        check_iters("acceptor", self.iters)?;
        check_baseport("acceptor", self.baseport)?;
        check_seconds("acceptor.timeout", self.timeout)?;
        check_seconds("acceptor.delay", self.delay)?;
        check_seconds("acceptor.round_pause", self.round_pause)?;
        check_seconds("acceptor.connect_timeout", self.connect_timeout)
    }
}

fn check_iters(role: &str, iters: u32) -> Result<()> {
    if iters == 0 {
        return Err(NodeError::Invalid(format!("{role}.iters must be at least 1")));
    }
    Ok(())
}

fn check_seconds(key: &str, seconds: u64) -> Result<()> {
    if seconds > MAX_SECONDS {
        return Err(NodeError::Invalid(format!(
            "{key} of {seconds}s exceeds the {MAX_SECONDS}s limit"
        )));
    }
    Ok(())
}

fn check_baseport(role: &str, baseport: u16) -> Result<()> {
    if Phase::Learn.port(baseport).is_none() {
        return Err(NodeError::Invalid(format!(
            "{role}.baseport {baseport} leaves no room for five queues"
        )));
    }
    Ok(())
}

impl NodeConfig {
    /// Loads defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&NodeConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("proposer.numbers")
                .with_list_parse_key("proposer.values")
                .with_list_parse_key("acceptor.held"),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// Checks both role sections.
    pub fn validate(&self) -> Result<()> {
        self.proposer.validate()?;
        self.acceptor.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_reference_values() {
        let config = NodeConfig::default();
        assert_eq!(config.proposer.baseport, 5555);
        assert_eq!(config.proposer.quorum, 3);
        assert_eq!(config.proposer.timeout, 10);
        assert_eq!(config.acceptor.timeout, 20);
        assert_eq!(config.acceptor.delay, 5);
        assert_eq!(config.acceptor.iters, 5);
        assert_eq!(config.acceptor.ipaddr, "localhost");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "log_level: debug\nproposer:\n  quorum: 5\n  numbers: [5, 8]\n  values: [red, blue]\nacceptor:\n  ipaddr: 10.0.0.1\n  held: [none, 7]"
        )
        .unwrap();

        let config = NodeConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.proposer.quorum, 5);
        assert_eq!(config.proposer.numbers, vec![5, 8]);
        assert_eq!(config.proposer.values, vec!["red", "blue"]);
        assert_eq!(config.proposer.timeout, 10);
        assert_eq!(config.acceptor.ipaddr, "10.0.0.1");
        assert_eq!(config.acceptor.held, vec!["none", "7"]);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = NodeConfig::load(Some(&dir.path().join("absent.yaml")));
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn environment_overrides_file() {
        std::env::set_var("SYNOD_ACCEPTOR__CONNECT_TIMEOUT", "7");
        let config = NodeConfig::load(None).unwrap();
        std::env::remove_var("SYNOD_ACCEPTOR__CONNECT_TIMEOUT");

        assert_eq!(config.acceptor.connect_timeout, 7);
    }

    #[test]
    fn empty_quorum_is_rejected() {
        let mut config = NodeConfig::default();
        config.proposer.quorum = 0;
        assert!(matches!(config.validate(), Err(NodeError::Invalid(_))));
    }

    #[test]
    fn baseport_must_leave_room_for_five_queues() {
        let mut config = NodeConfig::default();
        config.acceptor.baseport = 65_531;
        assert!(config.validate().is_ok());
        config.acceptor.baseport = 65_532;
        assert!(matches!(config.validate(), Err(NodeError::Invalid(_))));
    }

    #[test]
    fn numbers_need_values() {
        let mut config = NodeConfig::default();
        config.proposer.numbers = vec![1];
        assert!(config.validate().is_err());
        config.proposer.values = vec!["a".into()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn durations_beyond_a_year_are_rejected() {
        let mut config = NodeConfig::default();
        config.proposer.timeout = MAX_SECONDS;
        assert!(config.validate().is_ok());
        config.proposer.timeout = u64::MAX;
        assert!(matches!(config.validate(), Err(NodeError::Invalid(_))));

        let mut config = NodeConfig::default();
        config.acceptor.delay = MAX_SECONDS + 1;
        assert!(matches!(config.validate(), Err(NodeError::Invalid(_))));

        let mut config = NodeConfig::default();
        config.acceptor.connect_timeout = u64::MAX;
        assert!(matches!(config.validate(), Err(NodeError::Invalid(_))));
    }
}
