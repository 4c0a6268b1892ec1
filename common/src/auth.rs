//! Per-room auth tokens.
//!
//! A token binds one user to one room: `hash = hex(HMAC-SHA256(room_key,
//! user_id ‖ nonce))`. The lobby hands the token out with the join
//! response; the host verifies it when the websocket peer attaches.

use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub nonce: String,
    pub hash: String,
}

/// Random lowercase-hex string of `n_bytes * 2` chars.
pub fn random_hex(n_bytes: usize) -> String {
    let mut buf = vec![0u8; n_bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

pub fn issue_token(user_id: &str, key: &str) -> AuthToken {
    let nonce = random_hex(8);
    AuthToken {
        hash: hex_hmac(key, user_id, &nonce),
        nonce,
    }
}

pub fn validate_token(token: &AuthToken, key: &str, user_id: &str) -> bool {
    let Ok(expected) = hex::decode(&token.hash) else {
        return false;
    };
    let mut mac = new_mac(key);
    mac.update(user_id.as_bytes());
    mac.update(token.nonce.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

fn hex_hmac(key: &str, user_id: &str, nonce: &str) -> String {
    let mut mac = new_mac(key);
    mac.update(user_id.as_bytes());
    mac.update(nonce.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn new_mac(key: &str) -> HmacSha256 {
    // HMAC accepts keys of any length.
    HmacSha256::new_from_slice(key.as_bytes()).expect("hmac key")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_validate() {
        let token = issue_token("u1", "room-key");
        assert!(validate_token(&token, "room-key", "u1"));
    }

    #[test]
    fn test_validate_rejects_wrong_user_or_key() {
        let token = issue_token("u1", "room-key");
        assert!(!validate_token(&token, "room-key", "u2"));
        assert!(!validate_token(&token, "other-key", "u1"));
    }

    #[test]
    fn test_validate_rejects_tampered_nonce() {
        let mut token = issue_token("u1", "room-key");
        token.nonce = "0000000000000000".into();
        assert!(!validate_token(&token, "room-key", "u1"));
    }

    #[test]
    fn test_random_hex_shape() {
        let s = random_hex(8);
        assert_eq!(s.len(), 16);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
