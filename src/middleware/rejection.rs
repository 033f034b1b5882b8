//! Default rejection responses.

use serde::{Deserialize, Serialize};

/// A response produced when a request is not admitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// HTTP-style status code
    pub status: u16,
    /// Human-readable reason
    pub message: String,
}

impl Rejection {
    /// Status used when the store denies a request.
    pub const TOO_MANY_REQUESTS: u16 = 429;
    /// Status used when no identifier could be extracted.
    pub const FORBIDDEN: u16 = 403;

    /// The default response for a denied request.
    pub fn too_many_requests() -> Self {
        Self {
            status: Self::TOO_MANY_REQUESTS,
            message: "rate limit exceeded".to_string(),
        }
    }

    /// The default response for an identifier extraction failure.
    pub fn forbidden() -> Self {
        Self {
            status: Self::FORBIDDEN,
            message: "error while extracting identifier".to_string(),
        }
    }
}
