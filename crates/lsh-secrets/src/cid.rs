//! Locally computed content identifiers for encrypted bundles.
//!
//! When the IPFS daemon is reachable its CID is authoritative; this
//! local form only names bundles that have not reached the network yet,
//! while still changing whenever the ciphertext changes.

use sha2::{Digest, Sha256};

/// Prefix shared with the daemon's raw-leaf v1 CIDs, so local names
/// look uniform in metadata and history.
const CID_PREFIX: &str = "bafkrei";
/// Hex digits of the SHA-256 kept after the prefix.
const CID_HEX_LEN: usize = 52;

/// Compute the local CID of a ciphertext: `"bafkrei" + hex(sha256)[..52]`.
pub fn local_cid(ciphertext: &[u8]) -> String {
    let digest = hex::encode(Sha256::digest(ciphertext));
    format!("{CID_PREFIX}{}", &digest[..CID_HEX_LEN])
}
