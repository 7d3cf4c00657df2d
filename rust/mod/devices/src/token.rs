use rand::Rng;

use trakhound_core::DEFAULT_TOKEN_LENGTH;

/// Source of update tokens and unique ids.
///
/// A token is a change-detection nonce, not a secret.
pub trait UpdateTokenGenerator: Send + Sync {
    fn next_token(&self) -> String;
}

/// Draws tokens uniformly from the uppercase letters `A..=Z`.
#[derive(Debug, Clone)]
pub struct RandomTokenGenerator {
    length: usize,
}

impl RandomTokenGenerator {
    pub fn new(length: usize) -> Self {
        Self { length }
    }

    pub fn length(&self) -> usize {
        self.length
    }
}

impl Default for RandomTokenGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_LENGTH)
    }
}

impl UpdateTokenGenerator for RandomTokenGenerator {
    fn next_token(&self) -> String {
        let mut rng = rand::rng();
        (0..self.length)
            .map(|_| rng.random_range(b'A'..=b'Z') as char)
            .collect()
    }
}
