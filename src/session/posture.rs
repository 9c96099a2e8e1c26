//! Security posture and the degrading fallback ladder.
//!
//! A posture is the triple (require TLS, attempt STARTTLS, allow insecure
//! auth). When a connect attempt fails the manager degrades exactly one
//! dimension and retries, in a fixed order:
//!
//! 1. drop the direct-TLS requirement
//! 2. allow unencrypted authentication
//! 3. drop the STARTTLS upgrade
//!
//! The ladder ends once no dimension can be degraded further.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How strongly a connection is protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecurityPosture {
    /// Require an encrypted transport from the first byte.
    pub require_tls: bool,
    /// Attempt an in-band upgrade to TLS.
    pub starttls: bool,
    /// Permit authentication over an unencrypted stream.
    pub allow_insecure_auth: bool,
}

impl Default for SecurityPosture {
    fn default() -> Self {
        Self::STRICT
    }
}

impl SecurityPosture {
    /// Strongest posture: TLS required, STARTTLS attempted, insecure auth refused.
    pub const STRICT: Self = Self {
        require_tls: true,
        starttls: true,
        allow_insecure_auth: false,
    };

    /// Build a posture from its three flags.
    pub const fn new(require_tls: bool, starttls: bool, allow_insecure_auth: bool) -> Self {
        Self {
            require_tls,
            starttls,
            allow_insecure_auth,
        }
    }

    /// The next weaker posture, or `None` when the ladder is exhausted.
    pub fn degrade(self) -> Option<Self> {
        if self.require_tls {
            Some(Self {
                require_tls: false,
                ..self
            })
        } else if !self.allow_insecure_auth {
            Some(Self {
                allow_insecure_auth: true,
                ..self
            })
        } else if self.starttls {
            Some(Self {
                starttls: false,
                ..self
            })
        } else {
            None
        }
    }

    /// Every posture the ladder visits from `self`, `self` first.
    pub fn ladder(self) -> FallbackLadder {
        FallbackLadder { next: Some(self) }
    }
}

impl fmt::Display for SecurityPosture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tls={} starttls={} insecure_auth={}",
            self.require_tls, self.starttls, self.allow_insecure_auth
        )
    }
}

/// Iterator over successive postures of the fallback ladder.
#[derive(Debug, Clone)]
pub struct FallbackLadder {
    next: Option<SecurityPosture>,
}

impl Iterator for FallbackLadder {
    type Item = SecurityPosture;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.degrade();
        Some(current)
    }
}
