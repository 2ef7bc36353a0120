//! Local SOCKS5 front for socks4 proxies
//!
//! reqwest only speaks socks5 to a proxy. A relay listens on loopback as a
//! no-auth SOCKS5 server, reads the CONNECT target and opens it through the
//! upstream socks4 proxy (socks4a for hostnames), then copies bytes both ways.

use reqwest::Url;
use std::borrow::Cow;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_socks::tcp::Socks4Stream;
use tokio_socks::TargetAddr;
use tracing::{debug, info, warn};

use super::ProxyEndpoint;
use crate::error::RelayError;

const SOCKS5_VERSION: u8 = 0x05;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const REPLY_SUCCEEDED: u8 = 0x00;
const REPLY_GENERAL_FAILURE: u8 = 0x01;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;

/// Upstream socks4 proxy coordinates
#[derive(Debug, Clone)]
struct Upstream {
    host: String,
    port: u16,
    user_id: Option<String>,
    label: String,
}

impl Upstream {
    fn from_endpoint(endpoint: &ProxyEndpoint) -> Result<Self, RelayError> {
        let url = Url::parse(endpoint.url())
            .map_err(|e| RelayError::InvalidUrl(format!("{}: {e}", endpoint.redacted())))?;
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| RelayError::InvalidUrl(format!("{}: missing host", endpoint.redacted())))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let user_id = Some(url.username())
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        Ok(Self {
            host,
            port: url.port().unwrap_or(1080),
            user_id,
            label: endpoint.redacted(),
        })
    }

    async fn connect(&self, target: TargetAddr<'static>) -> Result<Socks4Stream<TcpStream>, RelayError> {
        let proxy = (self.host.as_str(), self.port);
        let stream = match &self.user_id {
            Some(user_id) => Socks4Stream::connect_with_userid(proxy, target, user_id).await?,
            None => Socks4Stream::connect(proxy, target).await?,
        };
        Ok(stream)
    }
}

/// Loopback SOCKS5 listener tunnelling through one socks4 proxy.
/// The accept loop stops when the relay is dropped.
#[derive(Debug)]
pub struct Socks4Relay {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Socks4Relay {
    pub async fn start(endpoint: &ProxyEndpoint) -> Result<Self, RelayError> {
        let upstream = Arc::new(Upstream::from_endpoint(endpoint)?);
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let local_addr = listener.local_addr()?;
        info!(proxy = %upstream.label, local = %local_addr, "🧦 socks4 relay listening");

        let task = tokio::spawn(accept_loop(listener, upstream));
        Ok(Self { local_addr, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// socks5h URL for reqwest; hostnames are resolved by the upstream proxy
    pub fn proxy_url(&self) -> String {
        format!("socks5h://{}", self.local_addr)
    }
}

impl Drop for Socks4Relay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, upstream: Arc<Upstream>) {
    loop {
        match listener.accept().await {
            Ok((inbound, peer)) => {
                let upstream = Arc::clone(&upstream);
                tokio::spawn(async move {
                    if let Err(e) = tunnel(inbound, &upstream).await {
                        warn!(proxy = %upstream.label, peer = %peer, error = %e, "socks4 relay connection failed");
                    }
                });
            }
            Err(e) => {
                warn!(proxy = %upstream.label, error = %e, "socks4 relay accept failed");
            }
        }
    }
}

async fn tunnel(mut inbound: TcpStream, upstream: &Upstream) -> Result<(), RelayError> {
    let target = read_connect_request(&mut inbound).await?;
    debug!(proxy = %upstream.label, target = ?target, "Opening socks4 tunnel");

    let mut outbound = match upstream.connect(target).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = inbound.write_all(&reply(REPLY_GENERAL_FAILURE)).await;
            return Err(e);
        }
    };
    inbound.write_all(&reply(REPLY_SUCCEEDED)).await?;

    tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await?;
    Ok(())
}

/// No-auth greeting followed by a CONNECT request
async fn read_connect_request(inbound: &mut TcpStream) -> Result<TargetAddr<'static>, RelayError> {
    let mut head = [0u8; 2];
    inbound.read_exact(&mut head).await?;
    if head[0] != SOCKS5_VERSION {
        return Err(RelayError::Handshake(format!("version {}", head[0])));
    }
    let mut methods = vec![0u8; head[1] as usize];
    inbound.read_exact(&mut methods).await?;
    if !methods.contains(&0x00) {
        inbound.write_all(&[SOCKS5_VERSION, 0xFF]).await?;
        return Err(RelayError::Handshake("client requires authentication".to_string()));
    }
    inbound.write_all(&[SOCKS5_VERSION, 0x00]).await?;

    let mut request = [0u8; 4];
    inbound.read_exact(&mut request).await?;
    if request[0] != SOCKS5_VERSION {
        return Err(RelayError::Handshake(format!("version {}", request[0])));
    }
    if request[1] != CMD_CONNECT {
        inbound.write_all(&reply(REPLY_COMMAND_NOT_SUPPORTED)).await?;
        return Err(RelayError::Handshake(format!("command {}", request[1])));
    }

    let target = match request[3] {
        ATYP_IPV4 => {
            let mut ip = [0u8; 4];
            inbound.read_exact(&mut ip).await?;
            TargetAddr::Ip(SocketAddr::new(Ipv4Addr::from(ip).into(), read_port(inbound).await?))
        }
        ATYP_IPV6 => {
            let mut ip = [0u8; 16];
            inbound.read_exact(&mut ip).await?;
            TargetAddr::Ip(SocketAddr::new(Ipv6Addr::from(ip).into(), read_port(inbound).await?))
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            inbound.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            inbound.read_exact(&mut name).await?;
            let name = String::from_utf8(name)
                .map_err(|_| RelayError::Handshake("non-utf8 domain".to_string()))?;
            TargetAddr::Domain(Cow::Owned(name), read_port(inbound).await?)
        }
        other => return Err(RelayError::Handshake(format!("address type {}", other))),
    };
    Ok(target)
}

async fn read_port(inbound: &mut TcpStream) -> Result<u16, RelayError> {
    let mut port = [0u8; 2];
    inbound.read_exact(&mut port).await?;
    Ok(u16::from_be_bytes(port))
}

/// Reply with an unspecified IPv4 bind address
fn reply(code: u8) -> [u8; 10] {
    [SOCKS5_VERSION, code, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0]
}
