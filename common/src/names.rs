use rand::Rng;

/// Characters used for generated name suffixes. Vowels and easily confused
/// glyphs (0/o, 1/l/i) are left out so generated names never spell words
/// and stay readable in logs.
const SUFFIX_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz2456789";

const SUFFIX_LEN: usize = 5;

/// Appends a short random suffix to `base`, e.g. `rs1` -> `rs1-x7f2k`.
///
/// Generated names keep `base` as a prefix, which is what ownership checks
/// key on.
pub fn generate_name(base: &str) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| SUFFIX_ALPHABET[rng.gen_range(0..SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("{base}-{suffix}")
}
