//! Synod - single-decree Paxos proposer and acceptor.

use anyhow::Context;
use clap::Parser;
use synod_consensus::{Acceptor, Proposer};
use synod_node::cli::{Cli, Command};
use synod_node::observability::{init_logging, LogFormat};
use synod_node::{run_acceptor, run_proposer, simulate, BallotSource, HeldSource, NodeConfig};
use synod_transport::{ConnectPolicy, TcpAcceptorEndpoint, TcpProposerEndpoint};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!(error = %format!("{e:#}"), "synod failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = NodeConfig::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config);
    config.validate()?;

    init_logging(&config.log_level, LogFormat::parse(&config.log_format));
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting synod");

    match cli.command {
        Command::Proposer(_) => {
            let settings = &config.proposer;
            let endpoint = TcpProposerEndpoint::with_ip(settings.bind_ip()?, settings.baseport);
            let mut proposer = Proposer::new(settings.consensus())?;
            let mut ballots = BallotSource::from_lists(&settings.numbers, &settings.values)?;

            let tally = run_proposer(
                &endpoint,
                &mut proposer,
                &mut ballots,
                settings.iters,
                settings.round_pause(),
            )
            .await
            .context("proposer failed")?;
            println!("{tally}");
        }
        Command::Acceptor(_) => {
            let settings = &config.acceptor;
            let endpoint = TcpAcceptorEndpoint::with_policy(
                settings.ipaddr.as_str(),
                settings.baseport,
                ConnectPolicy::with_limit(settings.connect_timeout()),
            );
            let mut acceptor = Acceptor::new(settings.consensus());
            let mut held = HeldSource::from_list(&settings.held)?;

            let tally = run_acceptor(
                &endpoint,
                &mut acceptor,
                &mut held,
                settings.iters,
                settings.round_pause(),
            )
            .await
            .context("acceptor failed")?;
            println!("{tally}");
        }
        Command::Simulate(_) => {
            let report = simulate(&config).await.context("simulation failed")?;
            println!("proposer: {}", report.proposer);
            for (index, tally) in report.acceptors.iter().enumerate() {
                println!("acceptor {index}: {tally}");
            }
        }
    }

    Ok(())
}
