//! Sharded first-match search over a credential list.
//!
//! At most one credential is expected to verify against a given ciphertext,
//! so the outcome is independent of how the list is partitioned. With one
//! shard the search runs sequentially on the calling thread; with more, the
//! list is split into that many chunks and searched on the rayon pool,
//! short-circuiting on the first hit.

use rayon::prelude::*;

/// Return the first non-`None` result of `matcher` over `candidates`
pub fn find_first_match<C, R, F>(candidates: &[C], num_shards: u8, matcher: F) -> Option<R>
where
    C: Sync,
    R: Send,
    F: Fn(&C) -> Option<R> + Sync,
{
    if candidates.is_empty() {
        return None;
    }
    if num_shards <= 1 || candidates.len() == 1 {
        return candidates.iter().find_map(&matcher);
    }

    let chunk_len = candidates.len().div_ceil(usize::from(num_shards));
    candidates
        .par_chunks(chunk_len)
        .find_map_any(|shard| shard.iter().find_map(&matcher))
}
