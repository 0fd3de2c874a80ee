//! PKCE code verifier and challenge generation.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::ConfigError;

/// RFC 7636 unreserved characters allowed in a code verifier.
const UNRESERVED: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

const PLAIN_VERIFIER_LEN: usize = 128;
const S256_VERIFIER_LEN: usize = 64;

/// Code-challenge transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeMethod {
    /// Challenge equals the verifier.
    Plain,
    /// Challenge is `base64url(sha256(verifier))`, unpadded.
    S256,
}

impl ChallengeMethod {
    /// Parses the `challenge_method` parameter value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "plain" => Some(ChallengeMethod::Plain),
            "S256" => Some(ChallengeMethod::S256),
            _ => None,
        }
    }

    /// Canonical parameter spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeMethod::Plain => "plain",
            ChallengeMethod::S256 => "S256",
        }
    }
}

/// A generated verifier/challenge pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub method: ChallengeMethod,
    pub verifier: String,
    pub challenge: String,
}

/// Generates a fresh verifier and its challenge for `method`.
pub fn generate(method: ChallengeMethod) -> Challenge {
    match method {
        ChallengeMethod::Plain => {
            let verifier = random_verifier(PLAIN_VERIFIER_LEN);
            Challenge {
                method,
                challenge: verifier.clone(),
                verifier,
            }
        }
        ChallengeMethod::S256 => {
            let verifier = random_verifier(S256_VERIFIER_LEN);
            let digest = Sha256::digest(verifier.as_bytes());
            Challenge {
                method,
                challenge: URL_SAFE_NO_PAD.encode(digest),
                verifier,
            }
        }
    }
}

/// Generates a challenge from a `challenge_method` parameter value.
pub fn generate_for(value: &str) -> Result<Challenge, ConfigError> {
    let method = ChallengeMethod::parse(value).ok_or_else(|| {
        ConfigError::new(format!(
            "challenge_method must be `plain` or `S256`, got `{value}`"
        ))
    })?;
    Ok(generate(method))
}

fn random_verifier(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| UNRESERVED[rng.gen_range(0..UNRESERVED.len())] as char)
        .collect()
}
