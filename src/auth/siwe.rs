//! Sign-In With Ethereum (EIP-4361) message parsing and verification.
//!
//! Parsing is label-based and tolerant of layout noise, but strict on the
//! security-relevant fields: the signer address must match the 20-byte hex
//! pattern and the nonce must be present. Verification hashes the message
//! byte-for-byte as received (EIP-191 `personal_sign`); no normalization
//! happens before hashing, because any rewrite would break the signature.

use alloy_primitives::{Signature, U256, eip191_hash_message};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

use super::nonce::NonceService;
use crate::types::{EvmAddress, UnixTimestamp};

const SIGN_IN_MARKER: &str = "wants you to sign in";

static ADDRESS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("static pattern compiles"));

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SiweError {
    #[error("malformed SIWE message: {0}")]
    InvalidMessage(&'static str),
    #[error("nonce unknown, expired, or already used")]
    InvalidNonce,
    #[error("signature does not match the stated address")]
    SignatureMismatch,
}

/// Fields extracted from a SIWE message. Optional fields stay optional; the
/// verifier only requires `address` and `nonce`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiweMessage {
    pub domain: String,
    pub address: EvmAddress,
    pub uri: Option<String>,
    pub version: Option<String>,
    pub chain_id: Option<u64>,
    pub nonce: String,
    pub issued_at: Option<String>,
}

impl SiweMessage {
    /// Label-based extraction.
    ///
    /// The first non-empty line is the domain. The line containing the
    /// literal "wants you to sign in" marks the address line as the line
    /// immediately prior; when that line does not hold an address (the
    /// single-line EIP-4361 header layout), the line immediately after the
    /// marker is accepted instead. Labelled fields are picked up wherever
    /// they appear.
    pub fn parse(message: &str) -> Result<Self, SiweError> {
        let lines: Vec<&str> = message.lines().collect();

        let domain = lines
            .iter()
            .map(|line| line.trim())
            .find(|line| !line.is_empty())
            .ok_or(SiweError::InvalidMessage("empty message"))?
            .to_string();

        let marker_index = lines
            .iter()
            .position(|line| line.contains(SIGN_IN_MARKER))
            .ok_or(SiweError::InvalidMessage("missing sign-in line"))?;

        let address_line = marker_index
            .checked_sub(1)
            .and_then(|i| lines.get(i))
            .map(|line| line.trim())
            .filter(|line| ADDRESS_PATTERN.is_match(line))
            .or_else(|| {
                lines
                    .get(marker_index + 1)
                    .map(|line| line.trim())
                    .filter(|line| ADDRESS_PATTERN.is_match(line))
            })
            .ok_or(SiweError::InvalidMessage("missing signer address"))?;
        let address: EvmAddress = address_line
            .parse()
            .map_err(|_| SiweError::InvalidMessage("invalid signer address"))?;

        let labelled = |label: &str| -> Option<String> {
            lines.iter().find_map(|line| {
                line.trim()
                    .strip_prefix(label)
                    .map(|rest| rest.trim().to_string())
            })
        };

        let nonce = labelled("Nonce:")
            .filter(|n| !n.is_empty())
            .ok_or(SiweError::InvalidMessage("missing nonce"))?;
        let chain_id = match labelled("Chain ID:") {
            Some(raw) => Some(
                raw.parse()
                    .map_err(|_| SiweError::InvalidMessage("invalid chain id"))?,
            ),
            None => None,
        };

        Ok(Self {
            domain,
            address,
            uri: labelled("URI:"),
            version: labelled("Version:"),
            chain_id,
            nonce,
            issued_at: labelled("Issued At:"),
        })
    }
}

/// Verifies SIWE messages against the nonce table and recovers the signer.
pub struct SiweVerifier {
    nonces: Arc<NonceService>,
}

impl SiweVerifier {
    pub fn new(nonces: Arc<NonceService>) -> Self {
        Self { nonces }
    }

    /// Full verification: parse, nonce pre-check, signature recovery,
    /// case-insensitive address match, then atomic nonce consumption. The
    /// consume step decides concurrent races; the loser fails with
    /// [`SiweError::InvalidNonce`] and at most one verification per nonce
    /// ever succeeds.
    pub fn verify(
        &self,
        message: &str,
        signature: &str,
        now: UnixTimestamp,
    ) -> Result<EvmAddress, SiweError> {
        let parsed = SiweMessage::parse(message)?;

        if !self.nonces.verify(&parsed.nonce, now) {
            return Err(SiweError::InvalidNonce);
        }

        let recovered = recover_eip191(message, signature)?;
        if EvmAddress::new(recovered) != parsed.address {
            return Err(SiweError::SignatureMismatch);
        }

        self.nonces
            .consume(&parsed.nonce, now)
            .map_err(|_| SiweError::InvalidNonce)?;

        Ok(EvmAddress::new(recovered))
    }
}

/// Decodes a 65-byte `r || s || v` signature, normalizes `v` from
/// {27, 28} to {0, 1}, and recovers the signer over the EIP-191
/// `personal_sign` digest of the exact message bytes.
fn recover_eip191(message: &str, signature: &str) -> Result<alloy_primitives::Address, SiweError> {
    let bytes = hex::decode(signature.trim_start_matches("0x"))
        .map_err(|_| SiweError::SignatureMismatch)?;
    if bytes.len() != 65 {
        return Err(SiweError::SignatureMismatch);
    }

    let r = U256::from_be_slice(&bytes[0..32]);
    let s = U256::from_be_slice(&bytes[32..64]);
    let y_parity = match bytes[64] {
        0 | 27 => false,
        1 | 28 => true,
        _ => return Err(SiweError::SignatureMismatch),
    };

    let digest = eip191_hash_message(message.as_bytes());
    Signature::new(r, s, y_parity)
        .recover_address_from_prehash(&digest)
        .map_err(|_| SiweError::SignatureMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::keccak256;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;
    use std::time::Duration;

    fn message_for(address: &str, nonce: &str) -> String {
        format!(
            "example.com\n\
             {address}\n\
             wants you to sign in with your Ethereum account.\n\
             \n\
             URI: https://example.com/login\n\
             Version: 1\n\
             Chain ID: 1\n\
             Nonce: {nonce}\n\
             Issued At: 2026-08-01T00:00:00Z"
        )
    }

    fn signed(signer: &PrivateKeySigner, message: &str) -> String {
        let signature = signer.sign_message_sync(message.as_bytes()).unwrap();
        format!("0x{}", hex::encode(signature.as_bytes()))
    }

    fn verifier() -> (SiweVerifier, Arc<NonceService>) {
        let nonces = Arc::new(NonceService::new(Duration::from_secs(300)));
        (SiweVerifier::new(nonces.clone()), nonces)
    }

    #[test]
    fn parser_extracts_every_labelled_field() {
        let message = message_for("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045", "abc123");
        let parsed = SiweMessage::parse(&message).unwrap();
        assert_eq!(parsed.domain, "example.com");
        assert_eq!(
            parsed.address.canonical(),
            "0xd8da6bf26964af9d7eed9e03e53415d37aa96045"
        );
        assert_eq!(parsed.uri.as_deref(), Some("https://example.com/login"));
        assert_eq!(parsed.version.as_deref(), Some("1"));
        assert_eq!(parsed.chain_id, Some(1));
        assert_eq!(parsed.nonce, "abc123");
        assert_eq!(parsed.issued_at.as_deref(), Some("2026-08-01T00:00:00Z"));
    }

    #[test]
    fn parser_accepts_the_single_line_header_layout() {
        let message = "example.com wants you to sign in with your Ethereum account:\n\
                       0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045\n\
                       \n\
                       URI: https://example.com\n\
                       Version: 1\n\
                       Chain ID: 1\n\
                       Nonce: xyz789\n\
                       Issued At: 2026-08-01T00:00:00Z";
        let parsed = SiweMessage::parse(message).unwrap();
        assert_eq!(
            parsed.address.canonical(),
            "0xd8da6bf26964af9d7eed9e03e53415d37aa96045"
        );
        assert_eq!(parsed.nonce, "xyz789");
    }

    #[test]
    fn parser_rejects_missing_address_and_missing_nonce() {
        assert_eq!(
            SiweMessage::parse("example.com\nnot-an-address\nwants you to sign in\nNonce: n"),
            Err(SiweError::InvalidMessage("missing signer address"))
        );
        let no_nonce = "example.com\n\
                        0xd8da6bf26964af9d7eed9e03e53415d37aa96045\n\
                        wants you to sign in with your Ethereum account.";
        assert_eq!(
            SiweMessage::parse(no_nonce),
            Err(SiweError::InvalidMessage("missing nonce"))
        );
        assert_eq!(
            SiweMessage::parse(""),
            Err(SiweError::InvalidMessage("empty message"))
        );
    }

    #[test]
    fn eip191_digest_matches_the_manual_prefix_construction() {
        let message = "hello gatekeeper";
        let manual = keccak256(
            [
                format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes(),
                message.as_bytes(),
            ]
            .concat(),
        );
        assert_eq!(eip191_hash_message(message.as_bytes()), manual);
    }

    #[test]
    fn verify_recovers_the_canonical_signer_address() {
        let (verifier, nonces) = verifier();
        let signer = PrivateKeySigner::random();
        let nonce = nonces.generate(UnixTimestamp(1000));
        let message = message_for(&signer.address().to_string(), &nonce);
        let signature = signed(&signer, &message);

        let address = verifier
            .verify(&message, &signature, UnixTimestamp(1001))
            .unwrap();
        assert_eq!(
            address.canonical(),
            format!("0x{}", hex::encode(signer.address()))
        );
    }

    #[test]
    fn replay_of_a_verified_message_fails_with_invalid_nonce() {
        let (verifier, nonces) = verifier();
        let signer = PrivateKeySigner::random();
        let nonce = nonces.generate(UnixTimestamp(1000));
        let message = message_for(&signer.address().to_string(), &nonce);
        let signature = signed(&signer, &message);

        assert!(verifier.verify(&message, &signature, UnixTimestamp(1001)).is_ok());
        assert_eq!(
            verifier.verify(&message, &signature, UnixTimestamp(1002)),
            Err(SiweError::InvalidNonce)
        );
    }

    #[test]
    fn unknown_nonce_fails_before_signature_checks() {
        let (verifier, _nonces) = verifier();
        let signer = PrivateKeySigner::random();
        let message = message_for(&signer.address().to_string(), "deadbeefdeadbeef");
        let signature = signed(&signer, &message);
        assert_eq!(
            verifier.verify(&message, &signature, UnixTimestamp(1000)),
            Err(SiweError::InvalidNonce)
        );
    }

    #[test]
    fn wrong_signer_is_a_signature_mismatch() {
        let (verifier, nonces) = verifier();
        let stated = PrivateKeySigner::random();
        let actual = PrivateKeySigner::random();
        let nonce = nonces.generate(UnixTimestamp(1000));
        let message = message_for(&stated.address().to_string(), &nonce);
        let signature = signed(&actual, &message);

        assert_eq!(
            verifier.verify(&message, &signature, UnixTimestamp(1001)),
            Err(SiweError::SignatureMismatch)
        );
        // The nonce survives a failed verification attempt.
        assert!(nonces.verify(&nonce, UnixTimestamp(1001)));
    }

    #[test]
    fn tampered_message_no_longer_verifies() {
        let (verifier, nonces) = verifier();
        let signer = PrivateKeySigner::random();
        let nonce = nonces.generate(UnixTimestamp(1000));
        let message = message_for(&signer.address().to_string(), &nonce);
        let signature = signed(&signer, &message);

        let tampered = format!("{message} ");
        assert_eq!(
            verifier.verify(&tampered, &signature, UnixTimestamp(1001)),
            Err(SiweError::SignatureMismatch)
        );
    }

    #[test]
    fn both_recovery_id_notations_are_accepted() {
        let (verifier, nonces) = verifier();
        let signer = PrivateKeySigner::random();

        for electrum in [false, true] {
            let nonce = nonces.generate(UnixTimestamp(1000));
            let message = message_for(&signer.address().to_string(), &nonce);
            let signature = signer.sign_message_sync(message.as_bytes()).unwrap();
            let mut bytes = signature.as_bytes();
            // Re-encode the true parity in both notations: {0,1} and {27,28}.
            let parity = matches!(bytes[64], 1 | 28) as u8;
            bytes[64] = if electrum { 27 + parity } else { parity };
            let hex_sig = format!("0x{}", hex::encode(bytes));
            assert!(
                verifier.verify(&message, &hex_sig, UnixTimestamp(1001)).is_ok(),
                "v encoding {} should verify",
                bytes[64]
            );
        }
    }

    #[test]
    fn out_of_range_recovery_ids_are_rejected() {
        let (verifier, nonces) = verifier();
        let signer = PrivateKeySigner::random();
        let nonce = nonces.generate(UnixTimestamp(1000));
        let message = message_for(&signer.address().to_string(), &nonce);
        let signature = signer.sign_message_sync(message.as_bytes()).unwrap();

        for bad_v in [2u8, 26u8, 29u8, 255u8] {
            let mut bytes = signature.as_bytes();
            bytes[64] = bad_v;
            let hex_sig = format!("0x{}", hex::encode(bytes));
            assert_eq!(
                verifier.verify(&message, &hex_sig, UnixTimestamp(1001)),
                Err(SiweError::SignatureMismatch),
                "v = {bad_v} must be rejected"
            );
        }
    }

    #[test]
    fn truncated_signatures_are_rejected() {
        let (verifier, nonces) = verifier();
        let signer = PrivateKeySigner::random();
        let nonce = nonces.generate(UnixTimestamp(1000));
        let message = message_for(&signer.address().to_string(), &nonce);

        assert_eq!(
            verifier.verify(&message, "0xdeadbeef", UnixTimestamp(1001)),
            Err(SiweError::SignatureMismatch)
        );
        assert_eq!(
            verifier.verify(&message, "not-hex", UnixTimestamp(1001)),
            Err(SiweError::SignatureMismatch)
        );
    }
}
