use serde::{Deserialize, Serialize};

/// Half-open range of alignment sites `[min, max)` owned by one rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteRange {
    pub min: usize,
    pub max: usize,
}

impl SiteRange {
    pub const EMPTY: Self = Self { min: 0, max: 0 };

    #[inline]
    pub fn len(&self) -> usize {
        self.max - self.min
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.max == self.min
    }

    #[inline]
    pub fn contains(&self, site: usize) -> bool {
        site >= self.min && site < self.max
    }

    pub fn sites(&self) -> std::ops::Range<usize> {
        self.min..self.max
    }
}

/// Sites owned by `rank` in a pool of `pool_size` processes.
///
/// The coordinator (rank 0) owns nothing. Workers split the alignment into
/// contiguous blocks of `n_site / (pool_size - 1)` sites and the last worker
/// takes the remainder.
pub fn site_range(n_site: usize, rank: usize, pool_size: usize) -> SiteRange {
    if rank == 0 || pool_size < 2 || rank >= pool_size {
        return SiteRange::EMPTY;
    }
    let workers = pool_size - 1;
    let width = n_site / workers;
    let min = (rank - 1) * width;
    let max = if rank == workers { n_site } else { rank * width };
    SiteRange { min, max }
}
