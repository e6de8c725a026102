use std::fmt;

/// Protocols a server can be checked over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Https,
    Smtp,
    Pop3,
    Ping,
}

impl Protocol {
    /// Every supported protocol, in dispatch order
    pub const ALL: [Protocol; 5] =
        [Protocol::Http, Protocol::Smtp, Protocol::Pop3, Protocol::Https, Protocol::Ping];

    /// Well-known port used when the server record does not configure one
    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
            Protocol::Smtp => 25,
            Protocol::Pop3 => 110,
            Protocol::Ping => 0,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => write!(f, "HTTP"),
            Protocol::Https => write!(f, "HTTPS"),
            Protocol::Smtp => write!(f, "SMTP"),
            Protocol::Pop3 => write!(f, "POP3"),
            Protocol::Ping => write!(f, "PING"),
        }
    }
}

/// Result texts written when a check cannot complete
pub mod failure {
    pub const PORT_UNAVAILABLE: &str = "Unable to open port";
    pub const NO_RESPONSE: &str = "No response received from server";
    pub const SMTP_UNAVAILABLE: &str = "Unable to open SMTP connection";
    pub const POP3_UNAVAILABLE: &str = "Unable to open POP3 connection";
    pub const PING_NOT_PERMITTED: &str = "Ping requires root";
    pub const PING_UNRESOLVED: &str = "Unable to resolve address";
    pub const PING_NO_REPLY: &str = "No ping reply received";

    pub fn timed_out(after: std::time::Duration) -> String {
        format!("Check timed out after {}s", after.as_secs())
    }
}

/// Whether an HTTP status line reports `200 OK`
pub fn is_valid_http_response(line: &str) -> bool {
    line.contains("200 OK")
}
