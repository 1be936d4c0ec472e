// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signing identity for gateway accounts.
//!
//! An [`Identity`] owns one secp256k1 private key. It signs:
//! - the gateway's authentication challenge (EIP-712 typed data),
//! - arbitrary messages (EIP-191 personal messages),
//! - legacy value transfers submitted by the owner account.
//!
//! ECDSA signatures here are RFC 6979 deterministic: signing the same
//! message with the same key always yields the same bytes.

use std::fmt;

use alloy::{
    consensus::{SignableTransaction, TxEnvelope, TxLegacy},
    eips::eip2718::Encodable2718,
    network::TxSignerSync,
    dyn_abi::TypedData,
    primitives::{Address, Bytes, Signature, TxKind, B256, U256},
    signers::{local::PrivateKeySigner, SignerSync},
};
use k256::SecretKey;
use serde_json::json;

use crate::error::GatewayError;

/// EIP-712 domain name used by the gateway.
pub const AUTH_DOMAIN_NAME: &str = "Ten";

/// EIP-712 domain version used by the gateway.
pub const AUTH_DOMAIN_VERSION: &str = "1.0";

/// Primary type of the authentication message.
const AUTHENTICATION_TYPE: &str = "Authentication";

/// Single field of the authentication message, typed `address`.
const ENCRYPTION_TOKEN_FIELD: &str = "Encryption Token";

/// A legacy value transfer ready to be signed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransfer {
    pub chain_id: u64,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub to: Address,
    pub value: U256,
}

/// A signed transfer in EIP-2718 wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransfer {
    pub tx_hash: B256,
    pub raw: Bytes,
}

/// A private key plus its derived address.
#[derive(Clone)]
pub struct Identity {
    signer: PrivateKeySigner,
    address: Address,
}

impl Identity {
    /// Generate a fresh random identity.
    pub fn random() -> Self {
        use k256::ecdsa::SigningKey;
        use k256::elliptic_curve::rand_core::OsRng;

        Self::from_signer(PrivateKeySigner::from_signing_key(SigningKey::random(
            &mut OsRng,
        )))
    }

    /// Load an identity from a hex private key (with or without `0x`).
    pub fn from_hex(private_key_hex: &str) -> Result<Self, GatewayError> {
        let trimmed = private_key_hex.trim();
        let key_bytes = alloy::hex::decode(trimmed)
            .map_err(|e| GatewayError::InvalidKey(format!("Invalid hex: {e}")))?;
        if key_bytes.len() != 32 {
            return Err(GatewayError::InvalidKey(format!(
                "Expected 32 key bytes, got {}",
                key_bytes.len()
            )));
        }

        let signer = PrivateKeySigner::from_slice(&key_bytes)
            .map_err(|e| GatewayError::InvalidKey(e.to_string()))?;
        Ok(Self::from_signer(signer))
    }

    /// Load an identity from a SEC1 or PKCS#8 PEM private key.
    pub fn from_pem(pem_bytes: &[u8]) -> Result<Self, GatewayError> {
        let hex_key = pem_to_hex(pem_bytes)?;
        Self::from_hex(&hex_key)
    }

    fn from_signer(signer: PrivateKeySigner) -> Self {
        let address = signer.address();
        Self { signer, address }
    }

    /// The account address derived from the key. Stable for the identity's lifetime.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Hex-encoded private key with `0x` prefix.
    ///
    /// Scenario accounts are throwaway test accounts; the key is exposed so
    /// an operator can recover stranded funds.
    pub fn private_key_hex(&self) -> String {
        alloy::hex::encode_prefixed(self.signer.to_bytes())
    }

    /// Sign an arbitrary message (EIP-191 personal message).
    pub fn sign(&self, message: &[u8]) -> Result<Signature, GatewayError> {
        self.signer
            .sign_message_sync(message)
            .map_err(|e| GatewayError::InvalidKey(format!("Signing failed: {e}")))
    }

    /// Sign the gateway authentication challenge for `token` on `chain_id`.
    ///
    /// Returns the 65-byte `r || s || v` signature as `0x`-prefixed hex.
    pub fn sign_challenge(&self, token: &str, chain_id: u64) -> Result<String, GatewayError> {
        let digest = challenge_digest(token, chain_id)?;
        let signature = self
            .signer
            .sign_hash_sync(&digest)
            .map_err(|e| GatewayError::InvalidKey(format!("Signing failed: {e}")))?;
        Ok(alloy::hex::encode_prefixed(signature.as_bytes()))
    }

    /// Sign a legacy (EIP-155) value transfer.
    pub fn sign_transfer(&self, transfer: &LegacyTransfer) -> Result<SignedTransfer, GatewayError> {
        let mut tx = TxLegacy {
            chain_id: Some(transfer.chain_id),
            nonce: transfer.nonce,
            gas_price: transfer.gas_price,
            gas_limit: transfer.gas_limit,
            to: TxKind::Call(transfer.to),
            value: transfer.value,
            input: Bytes::new(),
        };

        let signature = self
            .signer
            .sign_transaction_sync(&mut tx)
            .map_err(|e| GatewayError::InvalidKey(format!("Transaction signing failed: {e}")))?;

        let signed = tx.into_signed(signature);
        let tx_hash = *signed.hash();
        let envelope = TxEnvelope::Legacy(signed);

        Ok(SignedTransfer {
            tx_hash,
            raw: Bytes::from(envelope.encoded_2718()),
        })
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// EIP-712 digest the gateway expects to be signed for `token`.
///
/// The token is interpreted as a 20-byte value (`0x<token>`) of type `address`.
pub fn challenge_digest(token: &str, chain_id: u64) -> Result<B256, GatewayError> {
    let token_hex = token.trim().trim_start_matches("0x");
    let token_address: Address = format!("0x{token_hex}")
        .parse()
        .map_err(|e| GatewayError::InvalidResponse(format!("Malformed challenge token: {e}")))?;

    let typed_data: TypedData = serde_json::from_value(json!({
        "types": {
            "EIP712Domain": [
                { "name": "name", "type": "string" },
                { "name": "version", "type": "string" },
                { "name": "chainId", "type": "uint256" },
                { "name": "verifyingContract", "type": "address" },
            ],
            AUTHENTICATION_TYPE: [
                { "name": ENCRYPTION_TOKEN_FIELD, "type": "address" },
            ],
        },
        "primaryType": AUTHENTICATION_TYPE,
        "domain": {
            "name": AUTH_DOMAIN_NAME,
            "version": AUTH_DOMAIN_VERSION,
            "chainId": chain_id,
            "verifyingContract": Address::ZERO,
        },
        "message": { ENCRYPTION_TOKEN_FIELD: token_address },
    }))
    .map_err(|e| GatewayError::InvalidResponse(format!("Invalid challenge typed data: {e}")))?;

    typed_data
        .eip712_signing_hash()
        .map_err(|e| GatewayError::InvalidResponse(format!("Challenge hashing failed: {e}")))
}

/// Recover the address that signed the challenge for `token`.
pub fn recover_challenge_signer(
    token: &str,
    chain_id: u64,
    signature_hex: &str,
) -> Result<Address, GatewayError> {
    let digest = challenge_digest(token, chain_id)?;
    let bytes = alloy::hex::decode(signature_hex.trim())
        .map_err(|e| GatewayError::AuthRejected(format!("Signature is not hex: {e}")))?;
    let signature = Signature::from_raw(&bytes)
        .map_err(|e| GatewayError::AuthRejected(format!("Malformed signature: {e}")))?;
    signature
        .recover_address_from_prehash(&digest)
        .map_err(|e| GatewayError::AuthRejected(format!("Unrecoverable signature: {e}")))
}

/// Parse a private key from PEM format to hex string.
///
/// Accepts SEC1 (`EC PRIVATE KEY`) and PKCS#8 (`PRIVATE KEY`) encodings.
///
/// # Returns
/// * `Ok(String)` - Hex-encoded private key (64 characters, no 0x prefix)
/// * `Err(GatewayError::InvalidKey)` - If PEM parsing fails
pub fn pem_to_hex(pem_bytes: &[u8]) -> Result<String, GatewayError> {
    let pem_str = std::str::from_utf8(pem_bytes)
        .map_err(|e| GatewayError::InvalidKey(format!("Invalid UTF-8: {}", e)))?;

    let pem = pem::parse(pem_str)
        .map_err(|e| GatewayError::InvalidKey(format!("Invalid PEM: {}", e)))?;

    let secret_key = SecretKey::from_sec1_der(pem.contents())
        .or_else(|_| parse_pkcs8_to_secret_key(pem.contents()))
        .map_err(|e| GatewayError::InvalidKey(format!("Invalid key format: {}", e)))?;

    Ok(alloy::hex::encode(secret_key.to_bytes()))
}

fn parse_pkcs8_to_secret_key(der: &[u8]) -> Result<SecretKey, String> {
    use k256::pkcs8::DecodePrivateKey;
    SecretKey::from_pkcs8_der(der).map_err(|e| e.to_string())
}
