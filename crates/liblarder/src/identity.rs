use sha2::{Digest, Sha256};

/// Approximate fingerprint of "the same logical client", used only for
/// connection deduplication. Not guaranteed unique.
pub type IdentityKey = String;

/// Derive the stable identity key for (subject, origin, agent fingerprint).
///
/// Each part is length-prefixed before hashing so concatenation ambiguity
/// cannot make distinct inputs collide.
pub fn identity_key(subject: &str, origin: &str, user_agent: &str) -> IdentityKey {
    let mut hasher = Sha256::new();
    for part in [subject, origin, user_agent] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}
