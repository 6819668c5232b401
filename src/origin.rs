use std::net::IpAddr;

/// Decides which senders the executor answers
#[derive(Debug, Clone)]
pub struct OriginPolicy {
    allowed_origins: Vec<String>,
    hostname: String,
}

impl OriginPolicy {
    pub fn new(allowed_origins: &[String], hostname: impl Into<String>) -> Self {
        Self {
            allowed_origins: allowed_origins.iter().map(|o| normalize(o)).collect(),
            hostname: hostname.into(),
        }
    }

    /// True when the executor itself is served from a loopback host
    pub fn bypass(&self) -> bool {
        is_loopback_host(&self.hostname)
    }

    /// Checks an event origin. A missing origin counts as the opaque `null` origin.
    pub fn permits(&self, origin: Option<&str>) -> bool {
        if self.bypass() {
            return true;
        }
        let origin = normalize(origin.unwrap_or("null"));
        self.allowed_origins.iter().any(|allowed| *allowed == origin)
    }
}

pub fn is_loopback_host(hostname: &str) -> bool {
    let host = hostname.trim().trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

fn normalize(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn production() -> OriginPolicy {
        OriginPolicy::new(
            &[
                "https://codebox.dev".to_string(),
                "https://www.codebox.dev/".to_string(),
            ],
            "sandbox.codebox.dev",
        )
    }

    #[test]
    fn test_allow_list_enforced_off_loopback() {
        let policy = production();
        assert!(!policy.bypass());
        assert!(policy.permits(Some("https://codebox.dev")));
        assert!(policy.permits(Some("https://WWW.codebox.dev")));
        assert!(!policy.permits(Some("https://evil.example")));
        assert!(!policy.permits(Some("http://codebox.dev")));
        assert!(!policy.permits(None));
    }

    #[test]
    fn test_loopback_bypasses_check() {
        for host in ["localhost", "127.0.0.1", "127.1.2.3", "::1", "[::1]"] {
            let policy = OriginPolicy::new(&[], host);
            assert!(policy.bypass(), "{host} should bypass");
            assert!(policy.permits(Some("https://anything.example")));
            assert!(policy.permits(None));
        }
    }

    #[test]
    fn test_non_loopback_names() {
        assert!(!is_loopback_host("0.0.0.0"));
        assert!(!is_loopback_host("localhost.evil.example"));
        assert!(!is_loopback_host("10.0.0.1"));
        assert!(!is_loopback_host(""));
    }
}
