//! Delivery channels: UDP broadcast, webhook POST, HTTP POST

use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;

/// Ports every broadcast is sent to
pub const BROADCAST_PORTS: [u16; 4] = [9999, 9998, 10000, 8888];

const CHANNEL_TIMEOUT: Duration = Duration::from_secs(5);
const DATAGRAM_TIMEOUT: Duration = Duration::from_secs(1);

/// Outbound notification transport
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// True if the datagram left on at least one port
    async fn send_broadcast(&self, bytes: &[u8], ports: &[u16]) -> bool;

    /// True on HTTP 200
    async fn send_webhook(&self, url: &str, payload: &serde_json::Value) -> bool;

    /// True on HTTP 200
    async fn send_http(&self, url: &str, payload: &serde_json::Value) -> bool;
}

/// Real network transport
pub struct NetworkChannels {
    client: reqwest::Client,
    addresses: Vec<Ipv4Addr>,
}

impl NetworkChannels {
    pub fn new(addresses: Vec<Ipv4Addr>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(CHANNEL_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client, addresses }
    }

    pub fn addresses(&self) -> &[Ipv4Addr] {
        &self.addresses
    }

    async fn broadcast_port(&self, bytes: &[u8], port: u16) -> std::io::Result<usize> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;

        let mut delivered = 0;
        for addr in &self.addresses {
            let target = SocketAddr::from((*addr, port));
            match tokio::time::timeout(DATAGRAM_TIMEOUT, socket.send_to(bytes, target)).await {
                Ok(Ok(_)) => {
                    tracing::debug!(target = %target, "Broadcast sent");
                    delivered += 1;
                }
                Ok(Err(e)) => tracing::debug!(target = %target, error = %e, "Broadcast send failed"),
                Err(_) => tracing::debug!(target = %target, "Broadcast send timed out"),
            }
        }
        Ok(delivered)
    }

    async fn post(&self, kind: &str, url: &str, payload: &serde_json::Value) -> bool {
        match self.client.post(url).json(payload).send().await {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => {
                tracing::info!(channel = kind, url = url, "Notification delivered");
                true
            }
            Ok(resp) => {
                tracing::warn!(channel = kind, url = url, status = %resp.status(), "Notification rejected");
                false
            }
            Err(e) if e.is_timeout() => {
                tracing::warn!(channel = kind, url = url, "Notification timed out");
                false
            }
            Err(e) => {
                tracing::warn!(channel = kind, url = url, error = %e, "Notification failed");
                false
            }
        }
    }
}

#[async_trait]
impl NotificationChannel for NetworkChannels {
    async fn send_broadcast(&self, bytes: &[u8], ports: &[u16]) -> bool {
        let mut ok_ports = 0;
        for &port in ports {
            match self.broadcast_port(bytes, port).await {
                Ok(n) if n > 0 => ok_ports += 1,
                Ok(_) => {}
                Err(e) => tracing::debug!(port = port, error = %e, "Broadcast socket failed"),
            }
        }

        if ok_ports > 0 {
            tracing::info!(
                ports = ok_ports,
                addresses = self.addresses.len(),
                size = bytes.len(),
                "UDP broadcast sent"
            );
            true
        } else {
            tracing::warn!("UDP broadcast failed on all ports");
            false
        }
    }

    async fn send_webhook(&self, url: &str, payload: &serde_json::Value) -> bool {
        self.post("webhook", url, payload).await
    }

    async fn send_http(&self, url: &str, payload: &serde_json::Value) -> bool {
        self.post("http", url, payload).await
    }
}

/// Outbound IPv4 address, found by connecting a UDP socket (no packet is sent)
pub async fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await.ok()?;
    socket.connect(("8.8.8.8", 80)).await.ok()?;
    match socket.local_addr().ok()? {
        SocketAddr::V4(addr) if !addr.ip().is_unspecified() => Some(*addr.ip()),
        _ => None,
    }
}

/// Global broadcast plus the private-range subnet broadcast of `local`
pub fn broadcast_addresses(local: Option<Ipv4Addr>) -> Vec<Ipv4Addr> {
    let mut addresses = vec![Ipv4Addr::BROADCAST];

    let subnet = local.and_then(|ip| match ip.octets() {
        [192, 168, c, _] => Some(Ipv4Addr::new(192, 168, c, 255)),
        [10, ..] => Some(Ipv4Addr::new(10, 255, 255, 255)),
        [172, b, ..] if (16..=31).contains(&b) => Some(Ipv4Addr::new(172, b, 255, 255)),
        _ => None,
    });
    if let Some(addr) = subnet {
        addresses.push(addr);
    }

    addresses
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_addresses() {
        assert_eq!(broadcast_addresses(None), vec![Ipv4Addr::BROADCAST]);
        assert_eq!(
            broadcast_addresses(Some(Ipv4Addr::new(192, 168, 3, 14))),
            vec![Ipv4Addr::BROADCAST, Ipv4Addr::new(192, 168, 3, 255)]
        );
        assert_eq!(broadcast_addresses(Some(Ipv4Addr::new(10, 1, 2, 3)))[1], Ipv4Addr::new(10, 255, 255, 255));
        assert_eq!(broadcast_addresses(Some(Ipv4Addr::new(172, 20, 0, 5)))[1], Ipv4Addr::new(172, 20, 255, 255));
        assert_eq!(broadcast_addresses(Some(Ipv4Addr::new(172, 40, 0, 5))).len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_to_loopback_listener() {
        let listener = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let channels = NetworkChannels::new(vec![Ipv4Addr::LOCALHOST]);
        assert!(channels.send_broadcast(b"{\"id\":\"x\"}", &[port]).await);

        let mut buf = [0u8; 64];
        let (n, _) = listener.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"{\"id\":\"x\"}");
    }

    #[tokio::test]
    async fn test_http_requires_200() {
        use axum::{http::StatusCode, routing::post, Router};

        let app = Router::new()
            .route("/ok", post(|| async { StatusCode::OK }))
            .route("/accepted", post(|| async { StatusCode::ACCEPTED }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let channels = NetworkChannels::new(vec![]);
        let payload = serde_json::json!({"id": "x"});
        assert!(channels.send_http(&format!("http://{}/ok", addr), &payload).await);
        assert!(!channels.send_webhook(&format!("http://{}/accepted", addr), &payload).await);
        assert!(!channels.send_webhook(&format!("http://{}/missing", addr), &payload).await);
    }
}
