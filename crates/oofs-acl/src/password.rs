//! Salted password hashes: `b3$<salt hex>$<hash hex>`.

const SCHEME: &str = "b3";

fn digest(salt: &[u8], password: &str) -> [u8; 32] {
    let key = blake3::hash(salt);
    *blake3::keyed_hash(key.as_bytes(), password.as_bytes()).as_bytes()
}

/// Hash `password` under a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let salt = *uuid::Uuid::new_v4().as_bytes();
    format!(
        "{}${}${}",
        SCHEME,
        hex::encode(salt),
        hex::encode(digest(&salt, password))
    )
}

/// Check `password` against a stored hash. Empty or unparsable hashes never
/// verify.
pub fn verify_password(stored: &str, password: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(SCHEME), Some(salt_hex), Some(hash_hex), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(hash_hex)) else {
        return false;
    };
    let actual = digest(&salt, password);
    // Compare through blake3::Hash for a constant-time check
    match <[u8; 32]>::try_from(expected.as_slice()) {
        Ok(expected) => blake3::Hash::from(expected) == blake3::Hash::from(actual),
        Err(_) => false,
    }
}
