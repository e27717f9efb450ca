use serde::{Deserialize, Serialize};
use std::fmt;

use crate::internal::common::error::SepiaError;
use crate::internal::resources::descriptor::ResourceInventory;

fn default_ranks() -> u32 {
    1
}

/// Resources requested by a single task, as totals over all its ranks.
///
/// The totals are split into equal per-rank chunks at allocation time;
/// every chunk has to fit on a single node.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    #[serde(default = "default_ranks")]
    n_ranks: u32,
    cores: u32,
    #[serde(default)]
    gpus: u32,
    #[serde(default)]
    lfs: u64,
    #[serde(default)]
    mem: u64,
}

/// Per-rank share of a [`ResourceRequest`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RankChunk {
    pub cores: u32,
    pub gpus: u32,
    pub lfs: u64,
    pub mem: u64,
}

impl ResourceRequest {
    pub fn new(n_ranks: u32, cores: u32, gpus: u32, lfs: u64, mem: u64) -> Self {
        ResourceRequest {
            n_ranks,
            cores,
            gpus,
            lfs,
            mem,
        }
    }

    /// Single-rank CPU-only request.
    pub fn simple(cores: u32) -> Self {
        ResourceRequest::new(1, cores, 0, 0, 0)
    }

    pub fn n_ranks(&self) -> u32 {
        self.n_ranks
    }

    pub fn cores(&self) -> u32 {
        self.cores
    }

    pub fn gpus(&self) -> u32 {
        self.gpus
    }

    /// Checked before any shared state is touched; a request that fails
    /// here never reaches the allocator lock or the wait queue.
    pub fn validate(&self) -> crate::Result<()> {
        if self.cores == 0 {
            return Err(SepiaError::InvalidRequest(
                "zero cores requested".to_string(),
            ));
        }
        if self.n_ranks == 0 {
            return Err(SepiaError::InvalidRequest(
                "zero ranks requested".to_string(),
            ));
        }
        if self.cores % self.n_ranks != 0 {
            return Err(SepiaError::InvalidRequest(format!(
                "{} cores cannot be split into {} equal rank chunks",
                self.cores, self.n_ranks
            )));
        }
        if self.gpus % self.n_ranks != 0 {
            return Err(SepiaError::InvalidRequest(format!(
                "{} gpus cannot be split into {} equal rank chunks",
                self.gpus, self.n_ranks
            )));
        }
        if self.lfs % self.n_ranks as u64 != 0 || self.mem % self.n_ranks as u64 != 0 {
            return Err(SepiaError::InvalidRequest(format!(
                "lfs/mem request cannot be split into {} equal rank chunks",
                self.n_ranks
            )));
        }
        Ok(())
    }

    /// The per-rank share. Call only on a validated request.
    pub fn rank_chunk(&self) -> RankChunk {
        debug_assert!(self.validate().is_ok());
        RankChunk {
            cores: self.cores / self.n_ranks,
            gpus: self.gpus / self.n_ranks,
            lfs: self.lfs / self.n_ranks as u64,
            mem: self.mem / self.n_ranks as u64,
        }
    }

    /// True if no node of `inventory` could ever host a single rank chunk.
    /// Such a request is admitted (exhaustion is not an error) but will
    /// wait forever; callers use this to warn.
    pub fn never_fits(&self, inventory: &ResourceInventory) -> bool {
        let chunk = self.rank_chunk();
        !inventory.nodes().iter().any(|node| {
            node.cores.len() as u32 >= chunk.cores
                && node.gpus.len() as u32 >= chunk.gpus
                && node.lfs >= chunk.lfs
                && node.mem >= chunk.mem
        })
    }
}

impl fmt::Display for ResourceRequest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} cores, {} gpus, {} lfs, {} mem over {} rank(s)",
            self.cores, self.gpus, self.lfs, self.mem, self.n_ranks
        )
    }
}

#[cfg(test)]
mod tests {
    use super::ResourceRequest;
    use crate::internal::common::error::SepiaError;
    use crate::internal::resources::descriptor::ResourceInventory;

    #[test]
    fn test_validate_zero_cores() {
        let rq = ResourceRequest::new(1, 0, 0, 0, 0);
        assert!(matches!(
            rq.validate(),
            Err(SepiaError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_validate_zero_ranks() {
        let rq = ResourceRequest::new(0, 4, 0, 0, 0);
        assert!(matches!(
            rq.validate(),
            Err(SepiaError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_validate_indivisible_totals() {
        assert!(ResourceRequest::new(3, 4, 0, 0, 0).validate().is_err());
        assert!(ResourceRequest::new(2, 4, 3, 0, 0).validate().is_err());
        assert!(ResourceRequest::new(2, 4, 2, 5, 0).validate().is_err());
        assert!(ResourceRequest::new(2, 4, 2, 4, 2).validate().is_ok());
    }

    #[test]
    fn test_rank_chunk() {
        let chunk = ResourceRequest::new(4, 8, 4, 400, 800).rank_chunk();
        assert_eq!(chunk.cores, 2);
        assert_eq!(chunk.gpus, 1);
        assert_eq!(chunk.lfs, 100);
        assert_eq!(chunk.mem, 200);
    }

    #[test]
    fn test_never_fits() {
        let inventory = ResourceInventory::uniform(2, 4, 0, 0, 0);
        assert!(!ResourceRequest::simple(4).never_fits(&inventory));
        assert!(ResourceRequest::simple(5).never_fits(&inventory));
        // Two ranks of 4 cores fit even though 8 > any single node
        assert!(!ResourceRequest::new(2, 8, 0, 0, 0).never_fits(&inventory));
        assert!(ResourceRequest::new(1, 1, 1, 0, 0).never_fits(&inventory));
    }
}
