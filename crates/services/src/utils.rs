//! Small helpers shared by the services.

use std::net::IpAddr;

use sha2::{Digest, Sha256};

/// Opaque, stable poster id derived from the IP.
/// The salt keeps the raw address from being recoverable by brute force.
pub fn ip_hash(salt: &str, ip: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(ip.as_bytes());
    let hash = hex::encode(hasher.finalize());
    hash[..16].to_string()
}

/// Keeps only `[a-zA-Z0-9_-]`, the characters allowed in a board slug.
pub fn sanitize_board(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

pub fn is_valid_ip(ip: &str) -> bool {
    ip.parse::<IpAddr>().is_ok()
}

/// Trims and turns blank strings into `None`.
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ip_hash_is_stable_and_salted() {
        let a = ip_hash("salt", "203.0.113.1");
        assert_eq!(a.len(), 16);
        assert_eq!(a, ip_hash("salt", "203.0.113.1"));
        assert_ne!(a, ip_hash("pepper", "203.0.113.1"));
    }

    #[test]
    fn board_names_are_sanitized() {
        assert_eq!(sanitize_board("../te ch_1-"), "tech_1-");
    }

    #[test]
    fn ip_validation() {
        assert!(is_valid_ip("192.168.0.1"));
        assert!(is_valid_ip("2001:db8::1"));
        assert!(!is_valid_ip("256.1.1.1"));
        assert!(!is_valid_ip("localhost"));
    }

    #[test]
    fn blank_values_collapse() {
        assert_eq!(non_blank(Some("  ")), None);
        assert_eq!(non_blank(Some(" x ")), Some("x".into()));
    }
}
