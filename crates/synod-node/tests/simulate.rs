//! End-to-end runs of the in-process simulation.

use synod_consensus::DefeatReason;
use synod_node::{simulate, AcceptorTally, NodeConfig};

fn config(iters: u32) -> NodeConfig {
    let mut config = NodeConfig::default();
    config.proposer.quorum = 3;
    config.proposer.iters = iters;
    config.proposer.delay = 1;
    config.proposer.round_pause = 1;
    config.acceptor.delay = 1;
    config
}

#[tokio::test(start_paused = true)]
async fn fresh_acceptors_decide_every_round() {
    let report = simulate(&config(3)).await.unwrap();

    assert_eq!(report.proposer.decided, 3);
    assert_eq!(report.acceptors.len(), 3);
    for tally in &report.acceptors {
        assert_eq!(
            *tally,
            AcceptorTally {
                learned: 3,
                stale: 0,
                timed_out: 0
            }
        );
    }
}

#[tokio::test(start_paused = true)]
async fn held_number_defeats_the_lower_ballot() {
    let mut config = config(3);
    config.proposer.numbers = vec![5, 8, 9];
    config.proposer.values = vec!["red".into(), "green".into(), "blue".into()];
    config.acceptor.held = vec!["none".into(), "none".into(), "7".into()];

    let report = simulate(&config).await.unwrap();

    assert_eq!(report.proposer.decided, 2);
    assert_eq!(report.proposer.defeated_by(DefeatReason::StaleNumber), 1);
    assert_eq!(
        report.proposer.to_string(),
        "decided=2 quorum_not_met=0 stale_number=1 incomplete_learn=0 conflicting_learn=0"
    );

    // The two fresh acceptors sat out the first round waiting for an accept
    for tally in &report.acceptors[..2] {
        assert_eq!(tally.learned, 2);
        assert_eq!(tally.timed_out, 1);
    }
    assert_eq!(
        report.acceptors[2],
        AcceptorTally {
            learned: 2,
            stale: 1,
            timed_out: 0
        }
    );
}

#[tokio::test]
async fn unusable_held_entry_is_rejected() {
    let mut config = config(1);
    config.acceptor.held = vec!["seven".into()];

    assert!(simulate(&config).await.is_err());
}
