//! Pseudonymous visitor identity
//!
//! SHA-256 over `address ++ agent ++ secret ++ salt`, rendered as lowercase
//! hex. Rotating either the secret or the salt yields an unrelated digest.

use crate::secrets::HashSecret;
use crate::types::UserId;
use sha2::{Digest, Sha256};

/// Hash a client into the identity space of one (secret, salt) pair
pub fn hash_identity(
    client_address: &str,
    client_agent: &str,
    secret: &HashSecret,
    salt: &HashSecret,
) -> UserId {
    let mut hasher = Sha256::new();
    hasher.update(client_address.as_bytes());
    hasher.update(client_agent.as_bytes());
    hasher.update(secret.expose().as_bytes());
    hasher.update(salt.expose().as_bytes());

    UserId(
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<String>(),
    )
}
