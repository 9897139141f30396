//! CONNECT admission policy.
//!
//! The tunnel only ever dials TCP port 443 on a handful of iTunes hosts.
//! Everything else, including anything that looks like a literal IP
//! address, is refused before a socket is opened.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::wisp::{ConnectPayload, STREAM_TYPE_TCP};

/// Flow-control credit granted on session open and on each successful
/// CONNECT. The value is fixed; inbound data is not metered further.
pub const INITIAL_STREAM_CREDIT: u32 = 128 * 1024;

const ALLOWED_PORT: u16 = 443;

const STATIC_ALLOWLIST: &[&str] = &[
    "auth.itunes.apple.com",
    "buy.itunes.apple.com",
    "init.itunes.apple.com",
];

static POD_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^p\d+-buy\.itunes\.apple\.com$").expect("pod host pattern is valid")
});

/// Reason a CONNECT was refused. All variants map to CLOSE reason `0x41`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    /// Stream type other than TCP.
    #[error("stream type {stream_type:#04x} is not supported")]
    StreamType {
        /// Requested stream type byte.
        stream_type: u8,
    },
    /// Destination port other than 443.
    #[error("port {port} is not allowed")]
    Port {
        /// Requested port.
        port: u16,
    },
    /// Hostname was a literal IP address.
    #[error("literal IP targets are not allowed")]
    IpLiteral,
    /// Hostname is not on the allowlist.
    #[error("hostname {hostname} is not allowed")]
    Hostname {
        /// Requested hostname.
        hostname: String,
    },
}

fn is_ip_literal(host: &str) -> bool {
    host.parse::<std::net::Ipv4Addr>().is_ok()
        || host.parse::<std::net::Ipv6Addr>().is_ok()
        || host.starts_with('[')
}

/// Decide whether a CONNECT may open a socket.
///
/// # Errors
///
/// Returns the specific [`AdmissionError`] violated; callers answer with a
/// CLOSE `0x41` frame and never dial.
pub fn admit_connect(connect: &ConnectPayload) -> Result<(), AdmissionError> {
    if connect.stream_type != STREAM_TYPE_TCP {
        return Err(AdmissionError::StreamType {
            stream_type: connect.stream_type,
        });
    }
    if connect.port != ALLOWED_PORT {
        return Err(AdmissionError::Port { port: connect.port });
    }
    // IP literals are refused independently of the patterns below.
    if is_ip_literal(&connect.hostname) {
        return Err(AdmissionError::IpLiteral);
    }
    let host = connect.hostname.as_str();
    if STATIC_ALLOWLIST.contains(&host) || POD_HOST.is_match(host) {
        return Ok(());
    }
    Err(AdmissionError::Hostname {
        hostname: connect.hostname.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(stream_type: u8, port: u16, hostname: &str) -> ConnectPayload {
        ConnectPayload {
            stream_type,
            port,
            hostname: hostname.to_string(),
        }
    }

    #[test]
    fn allowlisted_hosts_are_admitted() {
        for host in [
            "auth.itunes.apple.com",
            "buy.itunes.apple.com",
            "init.itunes.apple.com",
            "p1-buy.itunes.apple.com",
            "p25-buy.itunes.apple.com",
            "p999-buy.itunes.apple.com",
        ] {
            assert!(admit_connect(&connect(STREAM_TYPE_TCP, 443, host)).is_ok(), "{host}");
        }
    }

    #[test]
    fn udp_streams_are_refused() {
        let err = admit_connect(&connect(0x02, 443, "buy.itunes.apple.com")).unwrap_err();
        assert!(matches!(err, AdmissionError::StreamType { stream_type: 2 }));
    }

    #[test]
    fn only_port_443_is_allowed() {
        let err = admit_connect(&connect(STREAM_TYPE_TCP, 80, "buy.itunes.apple.com")).unwrap_err();
        assert_eq!(err, AdmissionError::Port { port: 80 });
    }

    #[test]
    fn off_list_hosts_are_refused() {
        for host in [
            "evil.com",
            "apple.com",
            "itunes.apple.com",
            "pX-buy.itunes.apple.com",
            "p-buy.itunes.apple.com",
            "p1-buy.itunes.apple.com.evil.com",
            "",
        ] {
            assert!(
                admit_connect(&connect(STREAM_TYPE_TCP, 443, host)).is_err(),
                "{host} should be refused"
            );
        }
    }

    #[test]
    fn ip_literals_are_refused_before_pattern_checks() {
        for host in ["1.2.3.4", "127.0.0.1", "::1", "[::1]", "[2001:db8::1]"] {
            let err = admit_connect(&connect(STREAM_TYPE_TCP, 443, host)).unwrap_err();
            assert_eq!(err, AdmissionError::IpLiteral, "{host}");
        }
    }
}
