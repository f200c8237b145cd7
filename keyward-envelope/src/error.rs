//! Error type shared by every primitive in this crate.

use core::fmt;

/// Failure of a cipher primitive.
///
/// Authentication failures and malformed input both surface as
/// `InvalidCiphertext`; callers cannot tell which check rejected the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherError {
    /// Ciphertext is truncated, malformed, or failed authentication.
    InvalidCiphertext,
    /// The supplied key cannot perform this operation on this ciphertext
    /// (wrong key family, or a public-only key asked to decrypt).
    KeyMismatch,
    /// Key material or ciphertext could not be encoded.
    Encoding,
    /// The operating system RNG failed.
    Randomness,
}

impl fmt::Display for CipherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCiphertext => write!(f, "invalid ciphertext"),
            Self::KeyMismatch => write!(f, "key does not match ciphertext or operation"),
            Self::Encoding => write!(f, "encoding error"),
            Self::Randomness => write!(f, "random number generator failure"),
        }
    }
}

impl std::error::Error for CipherError {}
