//! Deterministic RNG doubles for pinning the compaction branch.
//!
//! `commit` consults an injected RNG for its rare whole-file rewrite.
//! Tests pass one of these through `open_with_rng` to force a branch
//! instead of sampling seeds until one cooperates.

use rand::RngCore;

/// RNG whose draws always hit the 1-in-N compaction draw.
pub struct AlwaysCompact;

impl RngCore for AlwaysCompact {
    fn next_u32(&mut self) -> u32 {
        0
    }
    fn next_u64(&mut self) -> u64 {
        0
    }
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        dest.fill(0);
    }
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        dest.fill(0);
        Ok(())
    }
}

/// RNG whose draws never hit the compaction draw, keeping commits
/// incremental (unless the live-item threshold triggers a rewrite
/// anyway).
pub struct NeverCompact;

impl RngCore for NeverCompact {
    // Not `MAX`: rand's `gen_range` rejection-samples, and `MAX` lands in
    // the rejection zone, so a constant `MAX` draw would loop forever.
    // The top bit alone maps to the middle of any range — never zero.
    fn next_u32(&mut self) -> u32 {
        1 << 31
    }
    fn next_u64(&mut self) -> u64 {
        1 << 63
    }
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        dest.fill(0xFF);
    }
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        dest.fill(0xFF);
        Ok(())
    }
}
