use md5::{Digest, Md5};

/// The empty password run through [`xm_hash`] with the factory default
/// account.
pub const DEFAULT_PASSWORD_HASH: &str = "tlJwpbo6";

const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// The device vendor's password obfuscation ("XM hash").
///
/// MD5 of the ASCII password bytes; adjacent digest bytes are summed
/// pairwise, reduced modulo 62 and mapped into `0-9A-Za-z`, yielding a fixed
/// 8-character effective password.
pub fn xm_hash(password: &str) -> String {
    let digest = Md5::digest(password.as_bytes());
    let mut out = String::with_capacity(8);
    for pair in digest.chunks_exact(2) {
        let idx = (pair[0] as usize + pair[1] as usize) % ALPHABET.len();
        out.push(ALPHABET[idx] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    // Golden values; the empty-password hash doubles as the device's factory
    // default credential.
    #[test]
    fn known_hashes() {
        assert_eq!(xm_hash(""), DEFAULT_PASSWORD_HASH);
        assert_eq!(xm_hash("admin"), "6QNMIQGe");
        assert_eq!(xm_hash("secret"), "awAU3E4X");
    }

    #[test]
    fn output_is_always_eight_chars() {
        for pw in ["", "a", "a-much-longer-password-0123456789"] {
            let h = xm_hash(pw);
            assert_eq!(h.len(), 8);
            assert!(h.bytes().all(|b| b.is_ascii_alphanumeric()));
        }
    }
}
