use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use async_trait::async_trait;
use hyper::header::HeaderValue;
use telemetry_core::layers::Layer;
use tracing::debug;

use crate::{BoxTransport, IncomingResponse, OutgoingRequest, Transport, TransportError};

/// Header carrying the sender's own address.
pub const REAL_IP_HEADER: &str = "X-Real-IP";

// Connecting a UDP socket only selects a route, no packet is sent.
const FALLBACK_PROBE: (Ipv4Addr, u16) = (Ipv4Addr::new(192, 0, 2, 1), 9);

fn usable(ip: IpAddr) -> Option<Ipv4Addr> {
    match ip {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

fn route_source(target: &str) -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(target).ok()?;
    usable(socket.local_addr().ok()?.ip())
}

/// Discovers the outbound IPv4 address of this host.
///
/// The address used to reach `server` (a `host:port` pair) is preferred. If that route is the
/// loopback interface, the address of the default route is used instead. Returns `None` if
/// neither yields a non-loopback IPv4 address.
pub fn discover_outbound_ip(server: &str) -> Option<Ipv4Addr> {
    route_source(server).or_else(|| {
        let (ip, port) = FALLBACK_PROBE;
        route_source(&format!("{ip}:{port}"))
    })
}

/// Tags requests with the sender's address.
pub struct RealIp {
    inner: BoxTransport,
    ip: HeaderValue,
}

#[async_trait]
impl Transport for RealIp {
    async fn send(&self, mut request: OutgoingRequest) -> Result<IncomingResponse, TransportError> {
        request.headers.insert(REAL_IP_HEADER, self.ip.clone());
        self.inner.send(request).await
    }
}

/// A layer for tagging requests with the sender's address.
///
/// The address is fixed when the layer is created. A layer without an address leaves the
/// transport untouched.
#[derive(Clone, Debug, Default)]
pub struct RealIpLayer {
    ip: Option<Ipv4Addr>,
}

impl RealIpLayer {
    /// Creates a new `RealIpLayer` tagging requests with `ip`.
    pub fn new(ip: Ipv4Addr) -> Self {
        RealIpLayer { ip: Some(ip) }
    }

    /// Creates a new `RealIpLayer` using the discovered outbound address for `server`.
    pub fn discover(server: &str) -> Self {
        let ip = discover_outbound_ip(server);
        debug!(?ip, "Discovered outbound address.");
        RealIpLayer { ip }
    }

    /// Returns the address requests are tagged with.
    pub fn ip(&self) -> Option<Ipv4Addr> {
        self.ip
    }
}

impl Layer<BoxTransport> for RealIpLayer {
    type Output = BoxTransport;

    fn layer(&self, inner: BoxTransport) -> Self::Output {
        match self.ip.and_then(|ip| HeaderValue::from_str(&ip.to_string()).ok()) {
            Some(ip) => Box::new(RealIp { inner, ip }),
            None => inner,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    use telemetry_core::layers::Layer;

    use super::{usable, RealIpLayer, REAL_IP_HEADER};
    use crate::{testing::Recorder, OutgoingRequest, Transport};

    #[test]
    fn test_usable_addresses() {
        assert_eq!(usable(IpAddr::V4(Ipv4Addr::LOCALHOST)), None);
        assert_eq!(usable(IpAddr::V4(Ipv4Addr::UNSPECIFIED)), None);
        assert_eq!(usable(IpAddr::V6(Ipv6Addr::LOCALHOST)), None);
        assert_eq!(
            usable(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))),
            Some(Ipv4Addr::new(10, 0, 0, 7))
        );
    }

    #[tokio::test]
    async fn test_tags_requests() {
        let recorder = Recorder::new();
        let layer = RealIpLayer::new(Ipv4Addr::new(10, 0, 0, 7));
        let transport = layer.layer(Box::new(recorder.clone()));

        let uri = "http://localhost/updates/".parse().unwrap();
        transport.send(OutgoingRequest::post(uri, "application/json", "[]")).await.unwrap();
        assert_eq!(recorder.last().headers[REAL_IP_HEADER], "10.0.0.7");
    }

    #[tokio::test]
    async fn test_absent_address_is_untouched() {
        let recorder = Recorder::new();
        let transport = RealIpLayer::default().layer(Box::new(recorder.clone()));

        let uri = "http://localhost/updates/".parse().unwrap();
        transport.send(OutgoingRequest::post(uri, "application/json", "[]")).await.unwrap();
        assert!(recorder.last().headers.get(REAL_IP_HEADER).is_none());
    }
}
