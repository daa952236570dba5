//! Message patterns used to classify free-text backend errors.
//!
//! Backends often surface failures as strings (HTTP status lines, OS error
//! codes, SDK messages). These patterns map them onto [`ErrorKind`].
//!
//! [`ErrorKind`]: crate::errors::ErrorKind

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Throttling: HTTP 429, "rate limit", "quota exceeded", "too many requests"
    pub static ref RATE_LIMIT_PATTERN: Regex = Regex::new(
        r"(?i)(\b429\b|rate[\s_-]?limit|too many requests|quota exceeded|throttl)"
    ).unwrap();

    /// Credential rejection: HTTP 401/403, "unauthorized", "invalid api key"
    pub static ref AUTH_PATTERN: Regex = Regex::new(
        r"(?i)(\b401\b|\b403\b|unauthori[sz]ed|forbidden|invalid[\s_-]?(api[\s_-]?)?key|authentication|permission denied)"
    ).unwrap();

    /// Deadline exceeded
    pub static ref TIMEOUT_PATTERN: Regex = Regex::new(
        r"(?i)(timed?[\s_-]?out|deadline exceeded|\betimedout\b|\b504\b)"
    ).unwrap();

    /// Connectivity: refused/reset connections, DNS failures, offline
    pub static ref NETWORK_PATTERN: Regex = Regex::new(
        r"(?i)(econnrefused|econnreset|enotfound|ehostunreach|enetunreach|connection (refused|reset|closed)|network (error|unreachable)|dns|failed to fetch|offline)"
    ).unwrap();

    /// Local persistence
    pub static ref DATABASE_PATTERN: Regex = Regex::new(
        r"(?i)(database|sqlite|indexeddb|\bsql\b|storage quota)"
    ).unwrap();

    /// Malformed request
    pub static ref VALIDATION_PATTERN: Regex = Regex::new(
        r"(?i)(validation|invalid (input|request|argument|parameter)|\b400\b|\b422\b|malformed)"
    ).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_pattern() {
        assert!(RATE_LIMIT_PATTERN.is_match("HTTP 429"));
        assert!(RATE_LIMIT_PATTERN.is_match("rate_limit_error"));
        assert!(!RATE_LIMIT_PATTERN.is_match("port 14290 closed"));
    }

    #[test]
    fn test_network_pattern() {
        assert!(NETWORK_PATTERN.is_match("getaddrinfo ENOTFOUND api.example.com"));
        assert!(NETWORK_PATTERN.is_match("Connection reset by peer"));
        assert!(!NETWORK_PATTERN.is_match("model overloaded"));
    }

    #[test]
    fn test_auth_pattern() {
        assert!(AUTH_PATTERN.is_match("403 Forbidden"));
        assert!(AUTH_PATTERN.is_match("Invalid API key provided"));
    }
}
