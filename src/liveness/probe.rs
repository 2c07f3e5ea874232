//! HTTP readiness probe for the local API surface

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Empty;
use hyper::client::conn::http1;
use hyper::{header, Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::debug;

use super::ApiProbe;

/// Path answered by the API surface once it is serving
pub const READINESS_PATH: &str = "/config/params";

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Probes the API surface with a plain HTTP/1 GET
#[derive(Debug, Clone)]
pub struct HttpApiProbe {
    addr: SocketAddr,
    path: String,
}

impl HttpApiProbe {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            path: READINESS_PATH.to_string(),
        }
    }

    /// Probe for an API server bound to `bind`; wildcard binds are probed
    /// on loopback
    pub fn for_bind(bind: SocketAddr) -> Self {
        let ip = if bind.ip().is_unspecified() {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            bind.ip()
        };
        Self::new(SocketAddr::new(ip, bind.port()))
    }

    pub fn url(&self) -> String {
        format!("http://{}{}", self.addr, self.path)
    }

    async fn fetch_status(&self) -> Result<StatusCode, Box<dyn std::error::Error + Send + Sync>> {
        let stream = TcpStream::connect(self.addr).await?;
        let (mut sender, conn) = http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Readiness probe connection error: {}", e);
            }
        });

        let request = Request::builder()
            .method(Method::GET)
            .uri(self.path.as_str())
            .header(header::HOST, self.addr.to_string())
            .body(Empty::<Bytes>::new())?;
        let response = sender.send_request(request).await?;
        Ok(response.status())
    }
}

#[async_trait]
impl ApiProbe for HttpApiProbe {
    async fn is_ready(&self) -> bool {
        match tokio::time::timeout(PROBE_TIMEOUT, self.fetch_status()).await {
            Ok(Ok(status)) => status.is_success(),
            Ok(Err(e)) => {
                debug!("Readiness probe {} failed: {}", self.url(), e);
                false
            }
            Err(_) => {
                debug!("Readiness probe {} timed out", self.url());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_bind_probes_loopback() {
        let probe = HttpApiProbe::for_bind("0.0.0.0:11111".parse().unwrap());
        assert_eq!(probe.url(), "http://127.0.0.1:11111/config/params");

        let probe = HttpApiProbe::for_bind("10.0.0.5:8080".parse().unwrap());
        assert_eq!(probe.url(), "http://10.0.0.5:8080/config/params");
    }

    #[tokio::test]
    async fn test_not_ready_without_server() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = HttpApiProbe::new(addr);
        assert!(!probe.is_ready().await);
    }
}
