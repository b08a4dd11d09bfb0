//! Per-round operator input.
//!
//! Each round the proposer needs a number and a value and each acceptor
//! needs the number it already holds. Both come either from a script given
//! in the configuration (cycled by round) or from prompts on stdin.

use std::io::{BufRead, Write};

use synod_consensus::Ballot;
use synod_protocol::{ProposalNumber, ProposalValue};

use crate::{NodeError, Result};

/// Where the proposer's ballots come from.
#[derive(Debug, Clone)]
pub enum BallotSource {
    /// Ask on stdin every round.
    Interactive,
    /// Cycle through fixed lists.
    Scripted {
        /// Proposal numbers.
        numbers: Vec<ProposalNumber>,
        /// Proposal values.
        values: Vec<ProposalValue>,
        /// Rounds handed out so far.
        next: usize,
    },
}

impl BallotSource {
    /// Scripted when `numbers` is non-empty, interactive otherwise.
    pub fn from_lists(numbers: &[u64], values: &[String]) -> Result<Self> {
        if numbers.is_empty() && values.is_empty() {
            return Ok(Self::Interactive);
        }
        if numbers.is_empty() || values.is_empty() {
            return Err(NodeError::Invalid(
                "scripted ballots need both numbers and values".into(),
            ));
        }
        Ok(Self::Scripted {
            numbers: numbers.iter().copied().map(ProposalNumber).collect(),
            values: values.iter().map(|v| ProposalValue::text(v.as_str())).collect(),
            next: 0,
        })
    }

    /// The ballot for the next round.
    pub async fn next_ballot(&mut self) -> Result<Ballot> {
        match self {
            Self::Interactive => {
                let num = loop {
                    let line = prompt("Select some proposal number between 1 and 10: ").await?;
                    match line.trim().parse::<u64>() {
                        Ok(n) => break ProposalNumber(n),
                        Err(_) => eprintln!("not a number: {:?}", line.trim()),
                    }
                };
                let val = prompt("Select some value for the proposal: ").await?;
                Ok(Ballot {
                    num,
                    val: ProposalValue::text(val.trim()),
                })
            }
            Self::Scripted {
                numbers,
                values,
                next,
            } => {
                let ballot = Ballot {
                    num: numbers[*next % numbers.len()],
                    val: values[*next % values.len()].clone(),
                };
                *next += 1;
                Ok(ballot)
            }
        }
    }
}

/// Where an acceptor's starting number comes from.
#[derive(Debug, Clone)]
pub enum HeldSource {
    /// Ask on stdin every round.
    Interactive,
    /// Cycle through a fixed list.
    Scripted {
        /// Held numbers; `None` means nothing held.
        held: Vec<Option<ProposalNumber>>,
        /// Rounds handed out so far.
        next: usize,
    },
}

impl HeldSource {
    /// Scripted when `held` is non-empty, interactive otherwise.
    pub fn from_list(held: &[String]) -> Result<Self> {
        if held.is_empty() {
            return Ok(Self::Interactive);
        }
        let held = held
            .iter()
            .map(|s| parse_held(s))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::Scripted { held, next: 0 })
    }

    /// Always hands out `held`.
    pub fn fixed(held: Option<ProposalNumber>) -> Self {
        Self::Scripted {
            held: vec![held],
            next: 0,
        }
    }

    /// The held number for the next round.
    pub async fn next_held(&mut self) -> Result<Option<ProposalNumber>> {
        match self {
            Self::Interactive => loop {
                let line = prompt("Select some proposal number between 1 and 10: ").await?;
                match parse_held(&line) {
                    Ok(held) => return Ok(held),
                    Err(e) => eprintln!("{e}"),
                }
            },
            Self::Scripted { held, next } => {
                let value = held[*next % held.len()];
                *next += 1;
                Ok(value)
            }
        }
    }
}

/// Parses a held number: `none`, `null`, `-` or empty mean nothing held.
pub fn parse_held(s: &str) -> Result<Option<ProposalNumber>> {
    let s = s.trim();
    match s.to_ascii_lowercase().as_str() {
        "" | "none" | "null" | "-" => Ok(None),
        _ => s
            .parse::<u64>()
            .map(|n| Some(ProposalNumber(n)))
            .map_err(|_| NodeError::Input(format!("not a proposal number: {s:?}"))),
    }
}

async fn prompt(question: &'static str) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        let mut stdout = std::io::stdout().lock();
        write!(stdout, "{question}")?;
        stdout.flush()?;

        let mut line = String::new();
        if std::io::stdin().lock().read_line(&mut line)? == 0 {
            return Err(NodeError::Input("stdin closed".into()));
        }
        Ok(line)
    })
    .await
    .map_err(|e| NodeError::Input(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_ballots_cycle() {
        let mut source =
            BallotSource::from_lists(&[5, 6, 7], &["a".to_string(), "b".to_string()]).unwrap();

        let mut ballots = Vec::new();
        for _ in 0..4 {
            ballots.push(source.next_ballot().await.unwrap());
        }

        assert_eq!(ballots[0], Ballot::new(5, "a"));
        assert_eq!(ballots[1], Ballot::new(6, "b"));
        assert_eq!(ballots[2], Ballot::new(7, "a"));
        assert_eq!(ballots[3], Ballot::new(5, "b"));
    }

    #[test]
    fn numbers_without_values_are_rejected() {
        assert!(BallotSource::from_lists(&[1], &[]).is_err());
        assert!(matches!(
            BallotSource::from_lists(&[], &[]),
            Ok(BallotSource::Interactive)
        ));
    }

    #[tokio::test]
    async fn held_numbers_cycle() {
        let mut source =
            HeldSource::from_list(&["none".to_string(), "3".to_string()]).unwrap();
        assert_eq!(source.next_held().await.unwrap(), None);
        assert_eq!(source.next_held().await.unwrap(), Some(ProposalNumber(3)));
        assert_eq!(source.next_held().await.unwrap(), None);
    }

    #[test]
    fn parses_held_spellings() {
        assert_eq!(parse_held(" None ").unwrap(), None);
        assert_eq!(parse_held("-").unwrap(), None);
        assert_eq!(parse_held("12").unwrap(), Some(ProposalNumber(12)));
        assert!(matches!(parse_held("twelve"), Err(NodeError::Input(_))));
    }
}
