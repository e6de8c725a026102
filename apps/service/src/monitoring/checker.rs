use anyhow::{Context, Result};
use rustls::RootCertStore;
use rustls::pki_types::ServerName;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{error, info};

use super::types::{Protocol, failure, is_valid_http_response};
use crate::database::ServerRecord;

/// Request sent by the line probes that expect an HTTP-style reply
const GET_REQUEST: &[u8] = b"GET / HTTP/1.0\r\n\r\n";

/// Longest response line read from a server
const MAX_LINE_BYTES: u64 = 4096;

const HTTPS_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const SMTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PING_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// One protocol check against one server.
///
/// Probes never fail: every transport problem becomes the returned result text.
/// They are only invoked for protocols enabled on the server.
#[async_trait::async_trait]
pub trait Probe: Send + Sync {
    fn protocol(&self) -> Protocol;

    async fn check(&self, server: &ServerRecord) -> String;
}

/// Why a line exchange produced no line
#[derive(Debug)]
enum LineError {
    Connect(io::Error),
    NoResponse,
}

fn connect_timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "connection timed out")
}

async fn connect(
    host: &str,
    port: u16,
    connect_timeout: Option<Duration>,
) -> io::Result<TcpStream> {
    let connect = TcpStream::connect((host, port));
    match connect_timeout {
        Some(limit) => timeout(limit, connect).await.map_err(|_| connect_timed_out())?,
        None => connect.await,
    }
}

/// Optionally send `request` over `stream`, then read one line back.
///
/// Bytes that are not UTF-8 are replaced, the line is kept.
async fn read_reply_line<S>(mut stream: S, request: Option<&[u8]>) -> Result<String, LineError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Some(request) = request {
        stream.write_all(request).await.map_err(|_| LineError::NoResponse)?;
        stream.flush().await.map_err(|_| LineError::NoResponse)?;
    }

    let mut reader = BufReader::new(stream.take(MAX_LINE_BYTES));
    let mut line = Vec::new();
    match reader.read_until(b'\n', &mut line).await {
        Ok(0) | Err(_) => Err(LineError::NoResponse),
        Ok(_) => Ok(String::from_utf8_lossy(&line).trim().to_string()),
    }
}

/// Connect to `(host, port)`, optionally send `request`, and read one line.
async fn exchange_line(
    host: &str,
    port: u16,
    request: Option<&[u8]>,
    connect_timeout: Option<Duration>,
) -> Result<String, LineError> {
    let stream = connect(host, port, connect_timeout).await.map_err(LineError::Connect)?;
    read_reply_line(stream, request).await
}

fn log_http_line(server: &ServerRecord, protocol: Protocol, port: u16, line: &str) {
    if is_valid_http_response(line) {
        info!(server = %server.hostname, service = %protocol, port, "{protocol} check ok. Response: {line}");
    } else {
        error!(server = %server.hostname, service = %protocol, port, "Returned invalid {protocol} response: '{line}'");
    }
}

/// HTTP and HTTPS report a reply the same way
fn http_result(
    server: &ServerRecord,
    protocol: Protocol,
    port: u16,
    reply: Result<String, LineError>,
) -> String {
    match reply {
        Ok(line) => {
            log_http_line(server, protocol, port, &line);
            line
        }
        Err(LineError::Connect(e)) => {
            error!(server = %server.hostname, service = %protocol, port, error = %e, "{}", failure::PORT_UNAVAILABLE);
            failure::PORT_UNAVAILABLE.to_string()
        }
        Err(LineError::NoResponse) => {
            error!(server = %server.hostname, service = %protocol, port, "{}", failure::NO_RESPONSE);
            failure::NO_RESPONSE.to_string()
        }
    }
}

/// Plain HTTP check: `GET /` on port 80, first response line
pub struct HttpProbe {
    port: u16,
}

impl HttpProbe {
    pub fn new() -> Self {
        Self::with_port(Protocol::Http.default_port())
    }

    pub fn with_port(port: u16) -> Self {
        Self { port }
    }
}

#[async_trait::async_trait]
impl Probe for HttpProbe {
    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    async fn check(&self, server: &ServerRecord) -> String {
        let reply = exchange_line(&server.address, self.port, Some(GET_REQUEST), None).await;
        http_result(server, Protocol::Http, self.port, reply)
    }
}

/// HTTPS check: TLS to `hostname`, first line of the reply to `GET /`
pub struct HttpsProbe {
    connector: TlsConnector,
    port: u16,
}

impl HttpsProbe {
    /// Verifies servers against the Mozilla root store
    pub fn new() -> Result<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Self::with_roots(roots, Protocol::Https.default_port())
    }

    pub fn with_roots(roots: RootCertStore, port: u16) -> Result<Self> {
        let config = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()
        .context("unable to configure TLS protocol versions")?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self { connector: TlsConnector::from(Arc::new(config)), port })
    }

    /// TCP connect and TLS handshake, both within the connect timeout
    async fn open(&self, host: &str) -> io::Result<TlsStream<TcpStream>> {
        let name = ServerName::try_from(host.to_string()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("invalid TLS server name '{host}'"))
        })?;

        let handshake = async {
            let stream = TcpStream::connect((host, self.port)).await?;
            self.connector.connect(name, stream).await
        };
        timeout(HTTPS_CONNECT_TIMEOUT, handshake).await.map_err(|_| connect_timed_out())?
    }
}

#[async_trait::async_trait]
impl Probe for HttpsProbe {
    fn protocol(&self) -> Protocol {
        Protocol::Https
    }

    async fn check(&self, server: &ServerRecord) -> String {
        let host = if server.hostname.is_empty() { &server.address } else { &server.hostname };
        let reply = match self.open(host).await {
            Ok(stream) => read_reply_line(stream, Some(GET_REQUEST)).await,
            Err(e) => Err(LineError::Connect(e)),
        };
        http_result(server, Protocol::Https, self.port, reply)
    }
}

/// SMTP check: passive capture of the greeting banner on the configured port
pub struct SmtpProbe {
    connect_timeout: Duration,
}

impl SmtpProbe {
    pub fn new() -> Self {
        Self { connect_timeout: SMTP_CONNECT_TIMEOUT }
    }
}

#[async_trait::async_trait]
impl Probe for SmtpProbe {
    fn protocol(&self) -> Protocol {
        Protocol::Smtp
    }

    async fn check(&self, server: &ServerRecord) -> String {
        let port = server.smtp_port;
        match exchange_line(&server.address, port, None, Some(self.connect_timeout)).await {
            Ok(line) => {
                info!(server = %server.hostname, service = "SMTP", port, "SMTP check ok. Response: {line}");
                line
            }
            Err(LineError::Connect(e)) => {
                error!(server = %server.hostname, service = "SMTP", port, error = %e, "{}", failure::SMTP_UNAVAILABLE);
                failure::SMTP_UNAVAILABLE.to_string()
            }
            Err(LineError::NoResponse) => {
                error!(server = %server.hostname, service = "SMTP", port, "{}", failure::NO_RESPONSE);
                failure::NO_RESPONSE.to_string()
            }
        }
    }
}

/// POP3 check: sends the HTTP-style request the deployed monitors have always
/// sent and records the first line back
pub struct Pop3Probe {
    port: u16,
}

impl Pop3Probe {
    pub fn new() -> Self {
        Self::with_port(Protocol::Pop3.default_port())
    }

    pub fn with_port(port: u16) -> Self {
        Self { port }
    }
}

#[async_trait::async_trait]
impl Probe for Pop3Probe {
    fn protocol(&self) -> Protocol {
        Protocol::Pop3
    }

    async fn check(&self, server: &ServerRecord) -> String {
        match exchange_line(&server.address, self.port, Some(GET_REQUEST), None).await {
            Ok(line) => {
                info!(server = %server.hostname, service = "POP3", port = self.port, "Returned on port {}: {line}", self.port);
                line
            }
            Err(LineError::Connect(e)) => {
                error!(server = %server.hostname, service = "POP3", port = self.port, error = %e, "{}", failure::POP3_UNAVAILABLE);
                failure::POP3_UNAVAILABLE.to_string()
            }
            Err(LineError::NoResponse) => {
                error!(server = %server.hostname, service = "POP3", port = self.port, "{}", failure::NO_RESPONSE);
                failure::NO_RESPONSE.to_string()
            }
        }
    }
}

/// A single ICMP echo request/reply exchange
#[async_trait::async_trait]
pub trait EchoPrimitive: Send + Sync {
    /// Send one echo request and return the round-trip time of the reply
    async fn echo(&self, target: IpAddr) -> Result<Duration>;
}

/// ICMP echo over `surge-ping` raw sockets
pub struct SurgeEcho {
    reply_timeout: Duration,
}

impl SurgeEcho {
    pub fn new(reply_timeout: Duration) -> Self {
        Self { reply_timeout }
    }
}

#[async_trait::async_trait]
impl EchoPrimitive for SurgeEcho {
    async fn echo(&self, target: IpAddr) -> Result<Duration> {
        let config = match target {
            IpAddr::V4(_) => surge_ping::Config::default(),
            IpAddr::V6(_) => surge_ping::Config::builder().kind(surge_ping::ICMP::V6).build(),
        };
        let client = surge_ping::Client::new(&config).context("unable to open ICMP socket")?;

        let identifier = surge_ping::PingIdentifier(std::process::id() as u16);
        let mut pinger = client.pinger(target, identifier).await;
        pinger.timeout(self.reply_timeout);

        let (_reply, rtt) = pinger.ping(surge_ping::PingSequence(0), &[0; 56]).await?;
        Ok(rtt)
    }
}

/// Whether the process may open raw ICMP sockets
pub fn has_ping_privilege() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Ping check: one ICMP echo to the server address
pub struct PingProbe {
    echo: Arc<dyn EchoPrimitive>,
    privileged: bool,
}

impl PingProbe {
    pub fn new(echo: Arc<dyn EchoPrimitive>, privileged: bool) -> Self {
        Self { echo, privileged }
    }

    async fn resolve(address: &str) -> Option<IpAddr> {
        if let Ok(ip) = address.parse::<IpAddr>() {
            return Some(ip);
        }

        let addrs: Vec<IpAddr> =
            tokio::net::lookup_host((address, 0)).await.ok()?.map(|addr| addr.ip()).collect();
        addrs.iter().find(|ip| ip.is_ipv4()).or(addrs.first()).copied()
    }
}

#[async_trait::async_trait]
impl Probe for PingProbe {
    fn protocol(&self) -> Protocol {
        Protocol::Ping
    }

    async fn check(&self, server: &ServerRecord) -> String {
        if !self.privileged {
            error!(server = %server.hostname, service = "PING", port = 0, "{}", failure::PING_NOT_PERMITTED);
            return failure::PING_NOT_PERMITTED.to_string();
        }

        let Some(ip) = Self::resolve(&server.address).await else {
            error!(server = %server.hostname, service = "PING", port = 0, "{}", failure::PING_UNRESOLVED);
            return failure::PING_UNRESOLVED.to_string();
        };

        match self.echo.echo(ip).await {
            Ok(rtt) => {
                info!(server = %server.hostname, service = "PING", port = 0, "Ping successful");
                format!("IP Addr: {ip} receive, RTT: {rtt:?}")
            }
            Err(e) => {
                error!(server = %server.hostname, service = "PING", port = 0, error = %e, "Ping failed");
                failure::PING_NO_REPLY.to_string()
            }
        }
    }
}

/// One probe per protocol, shared by every check runner
#[derive(Clone)]
pub struct ProbeSet {
    probes: Vec<Arc<dyn Probe>>,
}

impl ProbeSet {
    /// Probes on the well-known ports, ping through raw ICMP sockets
    pub fn standard() -> Result<Self> {
        let echo = Arc::new(SurgeEcho::new(PING_REPLY_TIMEOUT));

        Ok(Self::from_probes(vec![
            Arc::new(HttpProbe::new()),
            Arc::new(SmtpProbe::new()),
            Arc::new(Pop3Probe::new()),
            Arc::new(HttpsProbe::new()?),
            Arc::new(PingProbe::new(echo, has_ping_privilege())),
        ]))
    }

    pub fn from_probes(probes: Vec<Arc<dyn Probe>>) -> Self {
        Self { probes }
    }

    /// Look up the probe for a protocol
    pub fn get(&self, protocol: Protocol) -> Option<&Arc<dyn Probe>> {
        self.probes.iter().find(|probe| probe.protocol() == protocol)
    }
}
