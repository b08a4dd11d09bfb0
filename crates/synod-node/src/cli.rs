//! Command-line interface.
//!
//! Every flag is optional and, when given, overrides the value loaded from
//! the configuration file and the environment.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::{AcceptorSettings, NodeConfig, ProposerSettings};

/// Synod - single-decree Paxos over five TCP queues
#[derive(Parser, Debug)]
#[command(name = "synod")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (pretty, json)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Roles the binary can play.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bind the five queues and drive rounds
    Proposer(ProposerArgs),

    /// Connect to a proposer and answer its rounds
    Acceptor(AcceptorArgs),

    /// Run a proposer and its acceptors in one process
    Simulate(SimulateArgs),
}

/// Proposer flags.
#[derive(Args, Debug, Default, Clone)]
pub struct ProposerArgs {
    /// Port of the first queue
    #[arg(short = 'p', long)]
    pub baseport: Option<u16>,

    /// Number of acceptors
    #[arg(short = 'q', long)]
    pub quorum: Option<usize>,

    /// Seconds to wait for promises and for learns
    #[arg(short = 't', long)]
    pub timeout: Option<u64>,

    /// Upper bound of injected latency, in seconds
    #[arg(short = 'd', long)]
    pub delay: Option<u64>,

    /// Rounds to run
    #[arg(short = 'i', long)]
    pub iters: Option<u32>,

    /// Seconds between rounds
    #[arg(long)]
    pub round_pause: Option<u64>,

    /// Require learns to carry exactly the proposed number and value
    #[arg(long)]
    pub strict_learn: bool,

    /// Interface to bind
    #[arg(long)]
    pub bind: Option<String>,

    /// Scripted proposal numbers, comma separated
    #[arg(long, value_delimiter = ',')]
    pub numbers: Option<Vec<u64>>,

    /// Scripted proposal values, comma separated
    #[arg(long, value_delimiter = ',')]
    pub values: Option<Vec<String>>,
}

impl ProposerArgs {
    /// Writes the given flags over `settings`.
    pub fn apply(&self, settings: &mut ProposerSettings) {
        if let Some(baseport) = self.baseport {
            settings.baseport = baseport;
        }
        if let Some(quorum) = self.quorum {
            settings.quorum = quorum;
        }
        if let Some(timeout) = self.timeout {
            settings.timeout = timeout;
        }
        if let Some(delay) = self.delay {
            settings.delay = delay;
        }
        if let Some(iters) = self.iters {
            settings.iters = iters;
        }
        if let Some(pause) = self.round_pause {
            settings.round_pause = pause;
        }
        if self.strict_learn {
            settings.strict_learn = true;
        }
        if let Some(bind) = &self.bind {
            settings.bind = bind.clone();
        }
        if let Some(numbers) = &self.numbers {
            settings.numbers = numbers.clone();
        }
        if let Some(values) = &self.values {
            settings.values = values.clone();
        }
    }
}

/// Acceptor flags.
#[derive(Args, Debug, Default, Clone)]
pub struct AcceptorArgs {
    /// Proposer host
    #[arg(short = 'a', long)]
    pub ipaddr: Option<String>,

    /// Port of the proposer's first queue
    #[arg(short = 'p', long)]
    pub baseport: Option<u16>,

    /// Seconds to wait for a propose and for an accept
    #[arg(short = 't', long)]
    pub timeout: Option<u64>,

    /// Upper bound of injected latency, in seconds
    #[arg(short = 'd', long)]
    pub delay: Option<u64>,

    /// Rounds to run
    #[arg(short = 'i', long)]
    pub iters: Option<u32>,

    /// Seconds between rounds
    #[arg(long)]
    pub round_pause: Option<u64>,

    /// Seconds to keep retrying the proposer's ports
    #[arg(long)]
    pub connect_timeout: Option<u64>,

    /// Scripted held numbers (`none` for nothing held), comma separated
    #[arg(long, value_delimiter = ',')]
    pub held: Option<Vec<String>>,
}

impl AcceptorArgs {
    /// Writes the given flags over `settings`.
    pub fn apply(&self, settings: &mut AcceptorSettings) {
        if let Some(ipaddr) = &self.ipaddr {
            settings.ipaddr = ipaddr.clone();
        }
        if let Some(baseport) = self.baseport {
            settings.baseport = baseport;
        }
        if let Some(timeout) = self.timeout {
            settings.timeout = timeout;
        }
        if let Some(delay) = self.delay {
            settings.delay = delay;
        }
        if let Some(iters) = self.iters {
            settings.iters = iters;
        }
        if let Some(pause) = self.round_pause {
            settings.round_pause = pause;
        }
        if let Some(connect_timeout) = self.connect_timeout {
            settings.connect_timeout = connect_timeout;
        }
        if let Some(held) = &self.held {
            settings.held = held.clone();
        }
    }
}

/// Simulation flags: the proposer's, plus the acceptors' held numbers and
/// timeout.
#[derive(Args, Debug, Default, Clone)]
pub struct SimulateArgs {
    /// Proposer flags shared with `synod proposer`
    #[command(flatten)]
    pub proposer: ProposerArgs,

    /// Seconds each acceptor waits for a propose and for an accept
    #[arg(long)]
    pub acceptor_timeout: Option<u64>,

    /// Held number per acceptor (`none` for nothing held), comma separated
    #[arg(long, value_delimiter = ',')]
    pub held: Option<Vec<String>>,
}

impl SimulateArgs {
    /// Writes the given flags over `config`.
    pub fn apply(&self, config: &mut NodeConfig) {
        self.proposer.apply(&mut config.proposer);
        if let Some(timeout) = self.acceptor_timeout {
            config.acceptor.timeout = timeout;
        }
        if let Some(held) = &self.held {
            config.acceptor.held = held.clone();
        }
    }
}

impl Cli {
    /// Applies the global and role flags to a loaded configuration.
    pub fn apply(&self, config: &mut NodeConfig) {
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.log_format = format.clone();
        }
        match &self.command {
            Command::Proposer(args) => args.apply(&mut config.proposer),
            Command::Acceptor(args) => args.apply(&mut config.acceptor),
            Command::Simulate(args) => args.apply(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proposer_short_flags() {
        let cli = Cli::try_parse_from([
            "synod", "proposer", "-p", "6000", "-q", "5", "-t", "3", "-d", "0", "-i", "2",
        ])
        .unwrap();

        let mut config = NodeConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.proposer.baseport, 6000);
        assert_eq!(config.proposer.quorum, 5);
        assert_eq!(config.proposer.timeout, 3);
        assert_eq!(config.proposer.delay, 0);
        assert_eq!(config.proposer.iters, 2);
        // untouched
        assert_eq!(config.proposer.round_pause, 10);
        assert_eq!(config.acceptor, NodeConfig::default().acceptor);
    }

    #[test]
    fn acceptor_flags_and_lists() {
        let cli = Cli::try_parse_from([
            "synod",
            "acceptor",
            "-a",
            "10.1.2.3",
            "--held",
            "none,4",
            "--log-level",
            "debug",
        ])
        .unwrap();

        let mut config = NodeConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.acceptor.ipaddr, "10.1.2.3");
        assert_eq!(config.acceptor.held, vec!["none", "4"]);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn simulate_takes_scripts() {
        let cli = Cli::try_parse_from([
            "synod",
            "simulate",
            "--numbers",
            "5,8",
            "--values",
            "a,b",
            "--held",
            "7",
            "--strict-learn",
        ])
        .unwrap();

        let mut config = NodeConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.proposer.numbers, vec![5, 8]);
        assert_eq!(config.proposer.values, vec!["a", "b"]);
        assert!(config.proposer.strict_learn);
        assert_eq!(config.acceptor.held, vec!["7"]);
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["synod"]).is_err());
        assert!(Cli::try_parse_from(["synod", "proposer", "-q", "many"]).is_err());
    }
}
