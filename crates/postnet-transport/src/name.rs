use rand::Rng;

const ALPHABET: &[u8; 64] =
    b"_ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-";

/// Eight characters sampled uniformly from the 64-symbol alphabet
/// `[_a-zA-Z0-9-]` (spec §4.5), one per generated post name.
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}
