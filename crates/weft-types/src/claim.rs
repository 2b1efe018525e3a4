use serde::{Deserialize, Serialize};

/// How long a region claim stays live after `claimed_at`.
pub const CLAIM_TTL_MS: u64 = 5 * 60 * 1000;

/// An advisory lock over part of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Region {
    WholeFile,
    /// Symbol granularity is not tracked yet; a symbol claim behaves as a
    /// whole-file claim for conflict purposes.
    Symbol { name: String },
    Lines { start: u32, end: u32 },
}

impl Region {
    /// Two regions on the same path overlap unless both are line ranges that
    /// are strictly disjoint.
    pub fn overlaps(&self, other: &Region) -> bool {
        match (self, other) {
            (Region::Lines { start: s1, end: e1 }, Region::Lines { start: s2, end: e2 }) => {
                s1 <= e2 && s2 <= e1
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionClaim {
    pub agent: String,
    pub path: String,
    pub region: Region,
    pub claimed_at: u64,
}

impl RegionClaim {
    /// A claim is live strictly less than [`CLAIM_TTL_MS`] after creation.
    pub fn is_live(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.claimed_at) < CLAIM_TTL_MS
    }
}
