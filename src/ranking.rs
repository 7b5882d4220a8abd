//! Rank / percentile statistics over one protocol's trader snapshot
//!
//! ## Algorithm
//!
//! 1. Stable sort of volumes, descending (rank = position in the sorted list)
//! 2. Prefix sums over the sorted volumes
//! 3. For each percentile `p` of the ladder:
//!    - `rank_cutoff = floor(p * total_count / 100)`
//!    - bracket = the top `rank_cutoff` traders (cumulative, so the 10% bracket
//!      contains everyone in the 5% bracket)
//!    - `volume_share = min(100, bracket_volume / total_volume * 100)`
//!
//! Headline metrics:
//! - `avg_volume_per_trader = total_volume / total_count`
//! - `top1/top5_percent_volume` = bracket volumes at p = 1 / p = 5
//! - `percentile99/95_volume` = volume of the trader at rank
//!   `floor(0.01 n) - 1` / `floor(0.05 n) - 1` (0 when that rank does not exist)

use crate::types::TraderVolumeRecord;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const DEFAULT_PERCENTILE_LADDER: [u32; 15] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 20, 30, 50, 75, 100];

/// Cumulative top-`percentile`% slice of the ranked traders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileBracket {
    pub percentile: u32,
    pub trader_count: usize,
    /// `"1-{trader_count}"`, or `"0"` for an empty bracket
    pub rank_range: String,
    pub volume: f64,
    /// Share of total volume, 0..=100
    pub volume_share: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankMetrics {
    pub total_traders: usize,
    pub total_volume: f64,
    pub avg_volume_per_trader: f64,
    pub top1_percent_volume: f64,
    pub top5_percent_volume: f64,
    pub percentile99_volume: f64,
    pub percentile95_volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankStatistics {
    pub metrics: RankMetrics,
    pub brackets: Vec<PercentileBracket>,
}

/// Pure percentile calculator; holds only the ladder
#[derive(Debug, Clone)]
pub struct RankStatisticsEngine {
    ladder: Vec<u32>,
}

impl Default for RankStatisticsEngine {
    fn default() -> Self {
        Self::new(DEFAULT_PERCENTILE_LADDER.to_vec())
    }
}

impl RankStatisticsEngine {
    /// Percentiles outside 1..=100 are ignored; the ladder is sorted and deduplicated
    pub fn new(mut ladder: Vec<u32>) -> Self {
        ladder.retain(|p| (1..=100).contains(p));
        ladder.sort_unstable();
        ladder.dedup();
        Self { ladder }
    }

    pub fn ladder(&self) -> &[u32] {
        &self.ladder
    }

    pub fn compute(&self, records: &[TraderVolumeRecord]) -> RankStatistics {
        let ranked = RankedVolumes::new(records);

        let brackets = self
            .ladder
            .iter()
            .map(|&p| ranked.bracket(p))
            .collect();

        RankStatistics {
            metrics: ranked.metrics(),
            brackets,
        }
    }
}

/// Volumes in rank order plus prefix sums
struct RankedVolumes {
    sorted: Vec<f64>,
    cumulative: Vec<f64>,
}

impl RankedVolumes {
    fn new(records: &[TraderVolumeRecord]) -> Self {
        let mut sorted: Vec<f64> = records.iter().map(|r| r.volume_usd).collect();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal));

        let mut cumulative = Vec::with_capacity(sorted.len() + 1);
        let mut running = 0.0;
        cumulative.push(running);
        for volume in &sorted {
            running += volume;
            cumulative.push(running);
        }

        Self { sorted, cumulative }
    }

    fn count(&self) -> usize {
        self.sorted.len()
    }

    fn total(&self) -> f64 {
        self.cumulative[self.count()]
    }

    fn rank_cutoff(&self, percentile: u32) -> usize {
        percentile as usize * self.count() / 100
    }

    fn top_volume(&self, percentile: u32) -> f64 {
        self.cumulative[self.rank_cutoff(percentile)]
    }

    /// Volume of the trader at `floor(fraction_pct% * n) - 1`
    fn volume_at_rank_cutoff(&self, percentile: u32) -> f64 {
        self.rank_cutoff(percentile)
            .checked_sub(1)
            .and_then(|rank| self.sorted.get(rank))
            .copied()
            .unwrap_or(0.0)
    }

    fn bracket(&self, percentile: u32) -> PercentileBracket {
        let trader_count = self.rank_cutoff(percentile);
        let volume = self.cumulative[trader_count];
        let total = self.total();

        let volume_share = if total > 0.0 {
            (volume / total * 100.0).min(100.0)
        } else {
            0.0
        };

        PercentileBracket {
            percentile,
            trader_count,
            rank_range: if trader_count > 0 {
                format!("1-{}", trader_count)
            } else {
                "0".to_string()
            },
            volume,
            volume_share,
        }
    }

    fn metrics(&self) -> RankMetrics {
        let total_traders = self.count();
        let total_volume = self.total();

        RankMetrics {
            total_traders,
            total_volume,
            avg_volume_per_trader: if total_traders > 0 {
                total_volume / total_traders as f64
            } else {
                0.0
            },
            top1_percent_volume: self.top_volume(1),
            top5_percent_volume: self.top_volume(5),
            percentile99_volume: self.volume_at_rank_cutoff(1),
            percentile95_volume: self.volume_at_rank_cutoff(5),
        }
    }
}
