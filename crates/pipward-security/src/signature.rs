use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

/// Checks a detached Ed25519 signature over a requirements manifest.
///
/// Returns an error for malformed keys or signatures as well as for a valid
/// signature that does not cover `payload`.
pub fn verify_manifest_signature(
    payload: &[u8],
    public_key_hex: &str,
    signature_hex: &str,
) -> Result<()> {
    let key_bytes: [u8; 32] = decode_fixed(public_key_hex, "public key")?;
    let signature_bytes: [u8; 64] = decode_fixed(signature_hex, "signature")?;

    let key = VerifyingKey::from_bytes(&key_bytes).context("invalid Ed25519 public key bytes")?;
    key.verify(payload, &Signature::from_bytes(&signature_bytes))
        .map_err(|_| anyhow!("manifest signature does not match the trusted key"))
}

/// Reads a hex signature file, tolerating surrounding whitespace.
pub fn read_signature_file(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest signature: {}", path.display()))?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("manifest signature is empty: {}", path.display()));
    }
    Ok(trimmed.to_string())
}

fn decode_fixed<const N: usize>(value: &str, what: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(value.trim())
        .with_context(|| format!("failed to decode Ed25519 {what} hex"))?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| {
        anyhow!("invalid Ed25519 {what} length: expected {N} bytes, got {len}")
    })
}
