use crate::monitoring::types::Protocol;

/// Default SMTP port when the row does not carry one.
pub const DEFAULT_SMTP_PORT: u16 = 25;

/// Enable flag and last observed result of one protocol on a server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeSlot {
    pub enabled: bool,
    /// Absent until the first completed check
    pub result: Option<String>,
}

/// Server model - one row of the `servers` table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    pub id: i64,
    pub hostname: String,
    /// Raw connection address (`ip` column)
    pub address: String,
    pub http: ProbeSlot,
    pub smtp: ProbeSlot,
    pub smtp_port: u16,
    pub pop3: ProbeSlot,
    pub https: ProbeSlot,
    pub ping: ProbeSlot,
    /// Claim marker, unix seconds
    pub last_update: Option<i64>,
}

impl ServerRecord {
    pub fn slot(&self, protocol: Protocol) -> &ProbeSlot {
        match protocol {
            Protocol::Http => &self.http,
            Protocol::Https => &self.https,
            Protocol::Smtp => &self.smtp,
            Protocol::Pop3 => &self.pop3,
            Protocol::Ping => &self.ping,
        }
    }

    pub fn slot_mut(&mut self, protocol: Protocol) -> &mut ProbeSlot {
        match protocol {
            Protocol::Http => &mut self.http,
            Protocol::Https => &mut self.https,
            Protocol::Smtp => &mut self.smtp,
            Protocol::Pop3 => &mut self.pop3,
            Protocol::Ping => &mut self.ping,
        }
    }

    pub fn is_enabled(&self, protocol: Protocol) -> bool {
        self.slot(protocol).enabled
    }

    /// Convert the stored port column, falling back to the SMTP default
    pub fn port_from_column(port: Option<i64>) -> u16 {
        port.and_then(|port| u16::try_from(port).ok())
            .filter(|port| *port != 0)
            .unwrap_or(DEFAULT_SMTP_PORT)
    }
}

#[cfg(test)]
impl ServerRecord {
    /// Create a record with every protocol disabled
    pub fn new(id: i64, hostname: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id,
            hostname: hostname.into(),
            address: address.into(),
            http: ProbeSlot::default(),
            smtp: ProbeSlot::default(),
            smtp_port: DEFAULT_SMTP_PORT,
            pop3: ProbeSlot::default(),
            https: ProbeSlot::default(),
            ping: ProbeSlot::default(),
            last_update: None,
        }
    }

    /// Enable a protocol, builder style
    pub fn with_enabled(mut self, protocol: Protocol) -> Self {
        self.slot_mut(protocol).enabled = true;
        self
    }
}
