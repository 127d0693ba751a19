//! Strategies for picking the second anchor of a TDoA pair.
//!
//! A packet from anchor A lists the anchors A has recently heard. Any of them
//! can pair with A, provided the tag heard the same broadcast (the sequence
//! number A reports matches the one the tag stored) and A has a time of
//! flight to it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::storage::{AnchorCtx, AnchorStorage, RemoteSeqNr};
use crate::types::{age_ms, AnchorId};

/// Matching strategy, chosen at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchingAlgorithm {
    /// Never match; packets only feed the clock correction
    None,
    /// First eligible candidate, starting from a rotating offset
    Random,
    /// Eligible candidate updated most recently
    #[default]
    Youngest,
}

impl MatchingAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            MatchingAlgorithm::None => "none",
            MatchingAlgorithm::Random => "random",
            MatchingAlgorithm::Youngest => "youngest",
        }
    }
}

impl fmt::Display for MatchingAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MatchingAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(MatchingAlgorithm::None),
            "random" => Ok(MatchingAlgorithm::Random),
            "youngest" => Ok(MatchingAlgorithm::Youngest),
            other => Err(format!("unknown matching algorithm: {other}")),
        }
    }
}

/// Runs the configured strategy over a pre-allocated candidate buffer.
#[derive(Debug, Clone)]
pub(crate) struct Matcher {
    algorithm: MatchingAlgorithm,
    offset: usize,
    candidates: Box<[RemoteSeqNr]>,
}

impl Matcher {
    pub(crate) fn new(algorithm: MatchingAlgorithm, remote_capacity: usize) -> Self {
        let empty = RemoteSeqNr {
            id: AnchorId::default(),
            seq_nr: 0,
        };
        Self {
            algorithm,
            offset: 0,
            candidates: vec![empty; remote_capacity].into_boxed_slice(),
        }
    }

    pub(crate) fn algorithm(&self) -> MatchingAlgorithm {
        self.algorithm
    }

    /// Picks a partner for the anchor behind `ctx`. Never creates or evicts
    /// slots.
    pub(crate) fn find(
        &mut self,
        storage: &AnchorStorage,
        ctx: &AnchorCtx,
        exclude: Option<AnchorId>,
    ) -> Option<AnchorCtx> {
        match self.algorithm {
            MatchingAlgorithm::None => None,
            MatchingAlgorithm::Random => self.match_random(storage, ctx, exclude),
            MatchingAlgorithm::Youngest => self.match_youngest(storage, ctx, exclude),
        }
    }

    fn match_random(
        &mut self,
        storage: &AnchorStorage,
        ctx: &AnchorCtx,
        exclude: Option<AnchorId>,
    ) -> Option<AnchorCtx> {
        // Start somewhere else every call so the same pair is not always picked
        self.offset = self.offset.wrapping_add(1);
        let count = storage.remote_seq_nr_list(ctx, &mut self.candidates);

        (0..count)
            .map(|i| self.candidates[self.offset.wrapping_add(i) % count])
            .find_map(|candidate| eligible(storage, ctx, candidate, exclude))
    }

    fn match_youngest(
        &mut self,
        storage: &AnchorStorage,
        ctx: &AnchorCtx,
        exclude: Option<AnchorId>,
    ) -> Option<AnchorCtx> {
        let count = storage.remote_seq_nr_list(ctx, &mut self.candidates);
        let mut best: Option<(AnchorCtx, u32)> = None;

        for &candidate in &self.candidates[..count] {
            if let Some(other) = eligible(storage, ctx, candidate, exclude) {
                let age = age_ms(storage.last_update_ms(&other), ctx.now_ms());
                if best.map_or(true, |(_, youngest)| age < youngest) {
                    best = Some((other, age));
                }
            }
        }

        best.map(|(other, _)| other)
    }
}

/// Context of `candidate` if it can pair with the anchor behind `ctx`.
fn eligible(
    storage: &AnchorStorage,
    ctx: &AnchorCtx,
    candidate: RemoteSeqNr,
    exclude: Option<AnchorId>,
) -> Option<AnchorCtx> {
    if exclude == Some(candidate.id) {
        return None;
    }
    storage.remote_tof(ctx, candidate.id)?;

    let other = storage.get(candidate.id, ctx.now_ms())?;
    let heard_same_packet = storage.seq_nr(&other) == candidate.seq_nr;
    (heard_same_packet && storage.rx_time(&other).is_some()).then_some(other)
}
