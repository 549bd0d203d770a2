use rand::RngCore;

/// Source of randomness for generated passwords, salt tokens and
/// activation keys.
///
/// Implementations must be cryptographically secure; the character draw
/// helpers stay uniform regardless of charset size.
pub trait RandomSource: Send + Sync {
    fn fill_bytes(&self, buf: &mut [u8]);

    /// Draw `len` characters uniformly from `charset`.
    fn token(&self, charset: &[u8], len: usize) -> String {
        assert!(!charset.is_empty() && charset.len() <= 256);
        // Rejection sampling keeps the draw uniform when the charset
        // does not divide 256.
        let bound = 256 - (256 % charset.len());
        let mut out = String::with_capacity(len);
        let mut byte = [0u8; 1];
        while out.len() < len {
            self.fill_bytes(&mut byte);
            if (byte[0] as usize) < bound {
                out.push(charset[byte[0] as usize % charset.len()] as char);
            }
        }
        out
    }
}

/// Operating-system seeded CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRandom;

impl RandomSource for SystemRandom {
    fn fill_bytes(&self, buf: &mut [u8]) {
        rand::rng().fill_bytes(buf);
    }
}
