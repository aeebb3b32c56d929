//! Content identifiers for on-chain metadata digests.
//!
//! Contracts store metadata as a bare 32-byte sha2-256 digest. Prefixing it
//! with the multihash header (`0x12` = sha2-256, `0x20` = 32 bytes) and
//! base58-encoding the result yields the CIDv0 (`Qm…`) under which the blob is
//! published.

const SHA2_256: u8 = 0x12;
const DIGEST_LEN: u8 = 0x20;

/// Render a raw sha2-256 digest as a CIDv0 string.
pub fn digest_to_cid(digest: &[u8]) -> String {
    let mut multihash = Vec::with_capacity(digest.len() + 2);
    multihash.push(SHA2_256);
    multihash.push(DIGEST_LEN);
    multihash.extend_from_slice(digest);
    bs58::encode(multihash).into_string()
}
