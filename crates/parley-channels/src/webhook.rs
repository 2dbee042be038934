use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 over a webhook payload.
pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex signature against the payload.
///
/// Comparison runs over the MAC bytes via `verify_slice`, which is
/// constant-time; a malformed hex signature simply fails.
pub fn verify(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Ok(expected) = hex::decode(signature.trim_start_matches("sha256=")) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let sig = sign("topsecret", b"{\"x\":1}");
        assert!(verify("topsecret", b"{\"x\":1}", &sig));
        assert!(verify("topsecret", b"{\"x\":1}", &format!("sha256={sig}")));
    }

    #[test]
    fn wrong_secret_or_payload_fails() {
        let sig = sign("topsecret", b"payload");
        assert!(!verify("other", b"payload", &sig));
        assert!(!verify("topsecret", b"tampered", &sig));
        assert!(!verify("topsecret", b"payload", "not-hex!"));
    }
}
