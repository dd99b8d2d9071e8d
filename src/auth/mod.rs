//! Identity establishment: nonce challenges, SIWE verification, bearer
//! tokens, and API keys.

pub mod apikey;
pub mod nonce;
pub mod siwe;
pub mod token;

pub use apikey::{ApiKeyError, ApiKeyService, Revoked};
pub use nonce::{NonceError, NonceService};
pub use siwe::{SiweError, SiweVerifier};
pub use token::{TokenError, TokenService};
