//! Cross-supplier ranking of terminal pair outcomes.

use serde::{Deserialize, Serialize};

use crate::domain::summary::{NegotiationSummary, OfferTerms, PairOutcome};
use crate::domain::supplier::SupplierId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedOffer {
    pub position: usize,
    pub supplier_id: SupplierId,
    pub offer: Option<OfferTerms>,
    pub summary: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnrankedPair {
    pub supplier_id: SupplierId,
    pub outcome: PairOutcome,
    pub summary: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum RankingVerdict {
    Ranked { ranked: Vec<RankedOffer>, unranked: Vec<UnrankedPair>, currencies_mixed: bool },
    NoAcceptableOffer { unranked: Vec<UnrankedPair> },
}

impl RankingVerdict {
    pub fn best(&self) -> Option<&RankedOffer> {
        match self {
            Self::Ranked { ranked, .. } => ranked.first(),
            Self::NoAcceptableOffer { .. } => None,
        }
    }

    pub fn has_acceptable_offer(&self) -> bool {
        matches!(self, Self::Ranked { .. })
    }
}

pub trait OfferRanking: Send + Sync {
    fn rank(&self, summaries: &[NegotiationSummary]) -> RankingVerdict;
}

/// Converged offers with a price first (cheapest wins), then converged pairs without a price.
#[derive(Clone, Copy, Debug, Default)]
pub struct LowestPriceRanking;

impl OfferRanking for LowestPriceRanking {
    fn rank(&self, summaries: &[NegotiationSummary]) -> RankingVerdict {
        let mut priced = Vec::new();
        let mut unpriced = Vec::new();
        let mut unranked = Vec::new();

        for summary in summaries {
            match (&summary.outcome, &summary.offer) {
                (PairOutcome::Converged, Some(offer)) => priced.push((summary, offer)),
                (PairOutcome::Converged, None) => unpriced.push(summary),
                (PairOutcome::Exhausted(_), _) => unranked.push(UnrankedPair {
                    supplier_id: summary.pair.supplier_id.clone(),
                    outcome: summary.outcome,
                    summary: summary.summary.clone(),
                }),
            }
        }

        if priced.is_empty() && unpriced.is_empty() {
            return RankingVerdict::NoAcceptableOffer { unranked };
        }

        priced.sort_by(|(left, left_offer), (right, right_offer)| {
            left_offer
                .amount
                .cmp(&right_offer.amount)
                .then_with(|| left.pair.supplier_id.0.cmp(&right.pair.supplier_id.0))
        });
        unpriced.sort_by(|left, right| left.pair.supplier_id.0.cmp(&right.pair.supplier_id.0));

        let currencies_mixed = priced
            .windows(2)
            .any(|window| window[0].1.currency != window[1].1.currency);

        let ranked = priced
            .into_iter()
            .map(|(summary, offer)| (summary, Some(offer.clone())))
            .chain(unpriced.into_iter().map(|summary| (summary, None)))
            .enumerate()
            .map(|(index, (summary, offer))| RankedOffer {
                position: index + 1,
                supplier_id: summary.pair.supplier_id.clone(),
                offer,
                summary: summary.summary.clone(),
            })
            .collect();

        RankingVerdict::Ranked { ranked, unranked, currencies_mixed }
    }
}
