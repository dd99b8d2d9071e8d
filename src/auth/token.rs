//! Stateless bearer tokens minted after SIWE verification.
//!
//! Tokens are HS256 JWTs over a symmetric secret of at least 32 bytes. The
//! payload commits to the address, scopes, and issue/expiry instants; no
//! server-side lookup is needed to validate one. Expiry is compared against a
//! caller-supplied `now` with zero leeway so the boundary is exact and
//! testable.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::{Claims, ClaimsSource, EvmAddress, UnixTimestamp};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed or its signature does not verify")]
    Invalid,
    #[error("token expired")]
    Expired,
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenPayload {
    /// Canonical lowercase address.
    sub: String,
    scopes: Vec<String>,
    iat: u64,
    exp: u64,
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    expiry: Duration,
}

impl TokenService {
    pub fn new(secret: &[u8], expiry: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked manually against the caller's `now`.
        validation.validate_exp = false;
        validation.leeway = 0;
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            expiry,
        }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Mints a token for `address` carrying `scopes`, valid from `now` for
    /// the configured expiry.
    pub fn mint(
        &self,
        address: &EvmAddress,
        scopes: &[String],
        now: UnixTimestamp,
    ) -> Result<String, TokenError> {
        let payload = TokenPayload {
            sub: address.canonical(),
            scopes: scopes.to_vec(),
            iat: now.0,
            exp: (now + self.expiry.as_secs()).0,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &payload, &self.encoding)
            .map_err(|_| TokenError::Invalid)
    }

    /// Checks the MAC, parses the payload, and rejects tokens past expiry.
    /// `now == exp` is still valid; `now > exp` is not.
    pub fn verify(&self, token: &str, now: UnixTimestamp) -> Result<Claims, TokenError> {
        let data = jsonwebtoken::decode::<TokenPayload>(token, &self.decoding, &self.validation)
            .map_err(|_| TokenError::Invalid)?;
        if now.0 > data.claims.exp {
            return Err(TokenError::Expired);
        }
        let address: EvmAddress = data.claims.sub.parse().map_err(|_| TokenError::Invalid)?;
        Ok(Claims::new(
            address,
            data.claims.scopes,
            ClaimsSource::SiweToken,
        ))
    }
}
