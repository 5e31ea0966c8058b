//! Token validation errors.

use thiserror::Error;

/// Why a submission token was refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    /// Not hex, wrong length, or failed AEAD authentication.
    #[error("malformed token")]
    Malformed,

    /// Token was issued to a different identity or address.
    #[error("token bound to another identity")]
    IdentityMismatch,

    /// Token is older than the maximum age.
    #[error("token expired ({age_secs}s old)")]
    Expired {
        /// Seconds since issuance
        age_secs: u64,
    },

    /// Token has already been spent.
    #[error("token already used")]
    Replayed,
}
