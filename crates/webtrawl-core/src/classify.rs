//! Failure classification.
//!
//! Everything a scrape attempt can go wrong with is folded into a tagged
//! [`FailureKind`] first, then mapped to a [`Classification`] by a single
//! table. DNS and certificate failures are structural and never retried;
//! transport drops, timeouts and server-side errors are; unknown errors
//! default to retryable because the retry cap bounds the cost.

/// Outcome of classifying a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub retryable: bool,
    pub temporary: bool,
    pub reason: String,
    /// Observed or synthetic HTTP status to persist with the failure.
    pub status: Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    HttpStatus(u16),
    ChromeErr(ChromeErrKind),
    PosixErr(PosixErrKind),
    TimeoutLike,
    Unknown,
}

/// Chromium `net::ERR_*` families we care about distinguishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromeErrKind {
    ConnectionRefused,
    TimedOut,
    NameNotResolved,
    Certificate,
    NetworkChanged,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PosixErrKind {
    NotFound,
    ConnectionRefused,
    ConnectionReset,
    TimedOut,
}

impl FailureKind {
    /// Fold a raw error message plus optional error code into a kind.
    /// Total: every input maps to something.
    pub fn from_parts(message: &str, code: Option<&str>) -> Self {
        if message.contains("ERR_CONNECTION_REFUSED") {
            return FailureKind::ChromeErr(ChromeErrKind::ConnectionRefused);
        }
        if message.contains("ERR_CONNECTION_TIMED_OUT") || message.contains("ERR_TIMED_OUT") {
            return FailureKind::ChromeErr(ChromeErrKind::TimedOut);
        }
        if message.contains("ERR_NAME_NOT_RESOLVED") {
            return FailureKind::ChromeErr(ChromeErrKind::NameNotResolved);
        }
        if message.contains("ERR_CERT_") {
            return FailureKind::ChromeErr(ChromeErrKind::Certificate);
        }
        if message.contains("ERR_NETWORK_CHANGED") || message.contains("ERR_INTERNET_DISCONNECTED")
        {
            return FailureKind::ChromeErr(ChromeErrKind::NetworkChanged);
        }
        if message.contains("ERR_") {
            return FailureKind::ChromeErr(ChromeErrKind::Other);
        }
        match code {
            Some("ENOTFOUND") => return FailureKind::PosixErr(PosixErrKind::NotFound),
            Some("ECONNREFUSED") => return FailureKind::PosixErr(PosixErrKind::ConnectionRefused),
            Some("ECONNRESET") => return FailureKind::PosixErr(PosixErrKind::ConnectionReset),
            Some("ETIMEDOUT") => return FailureKind::PosixErr(PosixErrKind::TimedOut),
            _ => {}
        }
        if message.to_ascii_lowercase().contains("timeout")
            || message.to_ascii_lowercase().contains("timed out")
        {
            return FailureKind::TimeoutLike;
        }
        FailureKind::Unknown
    }
}

/// Classify an HTTP response status.
pub fn classify_status(status: u16) -> Classification {
    let (retryable, temporary, reason) = match status {
        200..=299 => (false, false, format!("HTTP {status}")),
        408 | 429 => (true, true, reason_for(status, "Client error")),
        400..=499 => (false, false, reason_for(status, "Client error")),
        500..=599 => (true, true, reason_for(status, "Server error")),
        _ => (false, false, format!("HTTP {status}")),
    };
    Classification {
        retryable,
        temporary,
        reason,
        status: Some(status),
    }
}

/// Classify a raw error (message plus optional platform error code).
pub fn classify_error(message: &str, code: Option<&str>) -> Classification {
    let (retryable, temporary, reason, status): (bool, bool, &str, Option<u16>) =
        match FailureKind::from_parts(message, code) {
            FailureKind::HttpStatus(status) => {
                return classify_status(status);
            }
            FailureKind::ChromeErr(ChromeErrKind::ConnectionRefused) => {
                (true, true, "Connection refused", Some(503))
            }
            FailureKind::ChromeErr(ChromeErrKind::TimedOut) => {
                (true, true, "Connection timed out", Some(408))
            }
            FailureKind::ChromeErr(ChromeErrKind::NameNotResolved) => {
                (false, false, "DNS resolution failed", Some(404))
            }
            FailureKind::ChromeErr(ChromeErrKind::Certificate) => {
                (false, false, "SSL certificate error", Some(502))
            }
            FailureKind::ChromeErr(ChromeErrKind::NetworkChanged) => {
                (true, true, "Network unavailable", Some(503))
            }
            FailureKind::ChromeErr(ChromeErrKind::Other) => {
                (true, true, "Browser network error", Some(503))
            }
            FailureKind::PosixErr(PosixErrKind::NotFound) => {
                (false, false, "DNS resolution failed", None)
            }
            FailureKind::PosixErr(PosixErrKind::ConnectionRefused) => {
                (true, true, "Connection refused", None)
            }
            FailureKind::PosixErr(PosixErrKind::ConnectionReset) => {
                (true, true, "Connection reset", None)
            }
            FailureKind::PosixErr(PosixErrKind::TimedOut) => {
                (true, true, "Connection timed out", None)
            }
            FailureKind::TimeoutLike => (true, true, "Navigation timeout", Some(408)),
            FailureKind::Unknown => {
                let reason = if message.trim().is_empty() {
                    "Unknown error".to_string()
                } else {
                    message.trim().to_string()
                };
                return Classification {
                    retryable: true,
                    temporary: true,
                    reason,
                    status: None,
                };
            }
        };
    Classification {
        retryable,
        temporary,
        reason: reason.to_string(),
        status,
    }
}

fn reason_for(status: u16, class: &str) -> String {
    match canonical_reason(status) {
        Some(phrase) => format!("{class} {status}: {phrase}"),
        None => format!("{class} {status}"),
    }
}

fn canonical_reason(status: u16) -> Option<&'static str> {
    let phrase = match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        410 => "Gone",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => return None,
    };
    Some(phrase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn http_status_table() {
        assert!(!classify_status(200).retryable);
        assert!(!classify_status(404).retryable);
        assert!(!classify_status(403).retryable);
        assert!(classify_status(408).retryable);
        assert!(classify_status(429).retryable);
        assert!(classify_status(500).retryable);
        assert!(classify_status(503).retryable);
        assert_eq!(
            classify_status(503).reason,
            "Server error 503: Service Unavailable"
        );
        assert_eq!(classify_status(418).reason, "Client error 418");
        assert_eq!(classify_status(503).status, Some(503));
    }

    #[test]
    fn chrome_errors() {
        let c = classify_error("net::ERR_CONNECTION_REFUSED at https://x", None);
        assert!(c.retryable);
        assert_eq!(c.status, Some(503));
        assert_eq!(c.reason, "Connection refused");

        let c = classify_error("net::ERR_NAME_NOT_RESOLVED", None);
        assert!(!c.retryable);
        assert_eq!(c.status, Some(404));
        assert_eq!(c.reason, "DNS resolution failed");

        let c = classify_error("net::ERR_CERT_AUTHORITY_INVALID", None);
        assert!(!c.retryable);
        assert_eq!(c.status, Some(502));

        let c = classify_error("net::ERR_INTERNET_DISCONNECTED", None);
        assert!(c.retryable);
        assert_eq!(c.status, Some(503));

        // Any other chrome-style net error is optimistically retried.
        let c = classify_error("net::ERR_EMPTY_RESPONSE", None);
        assert!(c.retryable);
        assert_eq!(c.status, Some(503));
    }

    #[test]
    fn posix_codes() {
        assert!(!classify_error("getaddrinfo failed", Some("ENOTFOUND")).retryable);
        assert!(classify_error("connect failed", Some("ECONNREFUSED")).retryable);
        assert!(classify_error("read failed", Some("ECONNRESET")).retryable);
        assert!(classify_error("connect failed", Some("ETIMEDOUT")).retryable);
        assert_eq!(classify_error("x", Some("ENOTFOUND")).status, None);
    }

    #[test]
    fn timeout_like_messages() {
        let c = classify_error("Navigation timeout of 15000 ms exceeded", None);
        assert!(c.retryable);
        assert_eq!(c.status, Some(408));
        assert_eq!(c.reason, "Navigation timeout");
    }

    #[test]
    fn unknown_defaults_to_retryable() {
        let c = classify_error("something odd happened", None);
        assert!(c.retryable);
        assert_eq!(c.status, None);
        assert_eq!(c.reason, "something odd happened");
    }

    #[test]
    fn chrome_match_wins_over_code() {
        // Message content is checked before platform codes.
        let c = classify_error("net::ERR_NAME_NOT_RESOLVED", Some("ECONNREFUSED"));
        assert!(!c.retryable);
    }

    proptest! {
        #[test]
        fn classify_error_is_total(message in any::<String>(), code in proptest::option::of("[A-Z]{4,12}")) {
            let c = classify_error(&message, code.as_deref());
            prop_assert!(!c.reason.is_empty());
        }

        #[test]
        fn classify_status_is_total(status in any::<u16>()) {
            let c = classify_status(status);
            prop_assert_eq!(c.status, Some(status));
        }
    }
}
