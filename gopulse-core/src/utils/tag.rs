use std::sync::Arc;
use tinyrand::RandRange;
use tinyrand_std::thread_rand;

const TAG_CHARS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const SUFFIX_LEN: usize = 4;

/// Short label for one channel connection instance, e.g. `c3-K7QM`.
///
/// The generation counts connect attempts within a session so log lines from
/// successive reconnects can be told apart; the suffix separates sessions.
pub fn connection_tag(generation: u64) -> Arc<str> {
    let mut rng = thread_rand();
    let mut tag = format!("c{generation}-");
    tag.reserve(SUFFIX_LEN);

    for _ in 0..SUFFIX_LEN {
        let idx = rng.next_range(0..TAG_CHARS.len());
        tag.push(TAG_CHARS[idx] as char);
    }

    Arc::from(tag)
}
