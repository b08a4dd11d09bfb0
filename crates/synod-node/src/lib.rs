//! # Synod Node
//!
//! The `synod` binary and the pieces it is built from: configuration,
//! operator input, logging and the loops that run a role for a number of
//! rounds.
//!
//! ## Roles
//!
//! ```text
//!   synod proposer            binds basePort+0..=basePort+4, drives rounds
//!   synod acceptor -a HOST    connects to HOST's five queues, answers rounds
//!   synod simulate            one proposer and `quorum` acceptors in-process
//! ```
//!
//! Each role runs `iters` rounds. Proposal numbers and values (and, on the
//! acceptor side, the number already held) are read from stdin every round
//! unless scripted in the configuration.
//!
//! ## Quick Start
//!
//! ```bash
//! synod proposer -q 3 -i 5 --numbers 5,8,9 --values red,green,blue
//! synod acceptor -a 127.0.0.1 -i 5 --held none
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Layered configuration (defaults, YAML, `SYNOD_*` env)
//! - [`cli`] - Command-line flags
//! - [`ballot`] - Per-round operator input
//! - [`runner`] - Role loops and the in-process simulation
//! - [`observability`] - Structured logging

pub mod ballot;
pub mod cli;
pub mod config;
mod error;
pub mod observability;
pub mod runner;

pub use ballot::{parse_held, BallotSource, HeldSource};
pub use config::{AcceptorSettings, NodeConfig, ProposerSettings, ENV_PREFIX, MAX_SECONDS};
pub use error::{NodeError, Result};
pub use runner::{
    run_acceptor, run_proposer, simulate, AcceptorTally, ProposerTally, SimulationReport,
};
