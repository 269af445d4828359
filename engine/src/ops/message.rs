//! Random payload generation

use rand::Rng;
use rand::distr::Alphanumeric;

/// Random alphanumeric payload of exactly `size` bytes
pub fn generate_message(size: usize) -> String {
    generate_message_with(&mut rand::rng(), size)
}

/// Same as [`generate_message`] with a caller-supplied generator
pub fn generate_message_with<R: Rng + ?Sized>(rng: &mut R, size: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(size)
        .map(char::from)
        .collect()
}
