//! Shard routing hash.
//!
//! Sessions are routed to worker shards by the 32-bit murmur3 (x86, seed 0)
//! hash of `"app:user:session"`. Every async job for a session therefore lands
//! on the same shard and is processed in submission order.

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

/// 32-bit murmur3 (x86 variant).
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    let mut h = seed;
    let chunks = data.chunks_exact(4);
    let tail = chunks.remainder();

    for chunk in chunks {
        let k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        h ^= mix_k(k);
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let mut k = 0u32;
    if tail.len() >= 3 {
        k ^= u32::from(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        k ^= u32::from(tail[1]) << 8;
    }
    if !tail.is_empty() {
        k ^= u32::from(tail[0]);
        h ^= mix_k(k);
    }

    #[allow(clippy::cast_possible_truncation)]
    let len = data.len() as u32;
    fmix(h ^ len)
}

/// Hash of `"app:user:session"` with seed 0.
pub fn session_hash(app_name: &str, user_id: &str, session_id: &str) -> u32 {
    murmur3_32(format!("{app_name}:{user_id}:{session_id}").as_bytes(), 0)
}

/// Shard index for a hash over `shards` workers.
///
/// Returns 0 when `shards` is 0 so callers never divide by zero.
pub fn shard_index(hash: u32, shards: usize) -> usize {
    if shards == 0 {
        return 0;
    }
    hash as usize % shards
}

fn mix_k(k: u32) -> u32 {
    k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
}

fn fmix(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
