//! Length-delimited Protocol Buffers RPC.
//!
//! Every frame is a single message prefixed with its length as a varint, the same framing as
//! [`prost::Message::encode_length_delimited`]. A connection carries a sequence of request and
//! response frames, one response per request.
use std::io;

use parking_lot::Mutex;
use prost::Message;
use telemetry_core::{Backoff, Metric};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    sync::Semaphore,
};
use tracing::debug;

use crate::RpcError;

pub mod proto;
use self::proto::{Method, ReportBatch, ReportMetric, ReportRawMetric, Request, Response};

/// Maximum accepted frame length, in bytes.
pub const MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

// A varint encoding a `u64` is at most ten bytes long.
const MAX_PREFIX_LEN: usize = 10;

/// Reads a single frame.
///
/// Returns `None` if the stream ends cleanly before the start of a frame.
///
/// # Errors
///
/// Fails if reading fails, the stream ends within a frame, the frame is longer than `limit`, or
/// the message cannot be decoded.
pub async fn read_frame<R, M>(reader: &mut R, limit: usize) -> Result<Option<M>, RpcError>
where
    R: AsyncRead + Unpin,
    M: Message + Default,
{
    let mut prefix = Vec::with_capacity(MAX_PREFIX_LEN);
    loop {
        let byte = match reader.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof && prefix.is_empty() => {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };
        prefix.push(byte);
        if byte & 0x80 == 0 || prefix.len() == MAX_PREFIX_LEN {
            break;
        }
    }

    let len = prost::decode_length_delimiter(prefix.as_slice())?;
    if len > limit {
        return Err(RpcError::FrameTooLarge { len, limit });
    }

    let mut buf = vec![0; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(M::decode(buf.as_slice())?))
}

/// Writes a single frame and flushes the writer.
///
/// # Errors
///
/// Fails if writing fails.
pub async fn write_frame<W, M>(writer: &mut W, message: &M) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
    M: Message,
{
    writer.write_all(&message.encode_length_delimited_to_vec()).await?;
    writer.flush().await?;
    Ok(())
}

/// Client for the RPC service.
///
/// Each call takes a connection of its own for the duration of one exchange, so up to
/// [`max_connections`][RpcClient::with_max_connections] calls are in flight at once. Connections
/// are opened on demand and kept for reuse once an exchange succeeds; a connection whose exchange
/// fails is discarded. Exchanges that fail are retried on a fresh connection; calls the server
/// rejects are not.
pub struct RpcClient {
    address: String,
    backoff: Backoff,
    slots: Semaphore,
    idle: Mutex<Vec<BufReader<TcpStream>>>,
}

impl RpcClient {
    /// Creates a client for the service at `address` (`host:port`), with a single connection.
    ///
    /// No connection is made until the first call.
    pub fn new<A: Into<String>>(address: A, backoff: Backoff) -> Self {
        RpcClient {
            address: address.into(),
            backoff,
            slots: Semaphore::new(1),
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Allows up to `max` calls to be in flight at once, each on its own connection.
    ///
    /// Zero is treated as one.
    #[must_use]
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.slots = Semaphore::new(max.clamp(1, Semaphore::MAX_PERMITS));
        self
    }

    /// Returns the address of the service.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Reports a single metric in its raw form, to be parsed by the server.
    ///
    /// # Errors
    ///
    /// Fails if the call cannot be exchanged or the server rejects it.
    pub async fn report_raw(&self, kind: &str, name: &str, value: &str) -> Result<(), RpcError> {
        let report = ReportRawMetric {
            kind: kind.to_owned(),
            key: name.to_owned(),
            value: value.to_owned(),
        };
        self.call(Method::ReportRaw(report)).await
    }

    /// Reports a single metric.
    ///
    /// # Errors
    ///
    /// Fails if the call cannot be exchanged or the server rejects it.
    pub async fn report(&self, metric: Metric) -> Result<(), RpcError> {
        self.call(Method::Report(ReportMetric { metric: Some(metric.into()) })).await
    }

    /// Reports a batch of metrics.
    ///
    /// # Errors
    ///
    /// Fails if the call cannot be exchanged or the server rejects it.
    pub async fn report_batch(&self, metrics: Vec<Metric>) -> Result<(), RpcError> {
        let metrics = metrics.into_iter().map(Into::into).collect();
        self.call(Method::ReportBatch(ReportBatch { metrics })).await
    }

    async fn call(&self, method: Method) -> Result<(), RpcError> {
        let name = method_name(&method);
        let request = Request { method: Some(method) };
        let response = self.backoff.retry(name, || self.exchange(&request)).await?;
        debug!(method = name, ok = response.ok, "RPC call completed.");

        if response.ok {
            Ok(())
        } else {
            Err(RpcError::Rejected(response.error.unwrap_or_default()))
        }
    }

    async fn exchange(&self, request: &Request) -> Result<Response, RpcError> {
        let _slot =
            self.slots.acquire().await.map_err(|_| io::Error::other("connection pool closed"))?;
        let idle = self.idle.lock().pop();
        let mut stream = match idle {
            Some(stream) => stream,
            None => BufReader::new(TcpStream::connect(&self.address).await?),
        };

        write_frame(&mut stream, request).await?;
        let response = read_frame(&mut stream, MAX_FRAME_LEN)
            .await?
            .ok_or_else(|| RpcError::Io(io::ErrorKind::UnexpectedEof.into()))?;

        self.idle.lock().push(stream);
        Ok(response)
    }
}

fn method_name(method: &Method) -> &'static str {
    match method {
        Method::ReportRaw(_) => "report_raw",
        Method::Report(_) => "report",
        Method::ReportBatch(_) => "report_batch",
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use prost::Message;
    use telemetry_core::{Backoff, Metric};
    use tokio::{
        io::BufReader,
        net::TcpListener,
        sync::Barrier,
        time::timeout,
    };

    use super::{
        proto::{Method, Request, Response},
        read_frame, write_frame, RpcClient, MAX_FRAME_LEN,
    };
    use crate::RpcError;

    #[tokio::test]
    async fn test_frames_over_a_stream() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut server = BufReader::new(server);

        write_frame(&mut client, &Response::failure("nope")).await.unwrap();
        write_frame(&mut client, &Response::success()).await.unwrap();
        drop(client);

        let first: Response = read_frame(&mut server, MAX_FRAME_LEN).await.unwrap().unwrap();
        assert_eq!(first.error.as_deref(), Some("nope"));
        let second: Response = read_frame(&mut server, MAX_FRAME_LEN).await.unwrap().unwrap();
        assert!(second.ok);
        let end: Option<Response> = read_frame(&mut server, MAX_FRAME_LEN).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn test_rejects_oversized_frames() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let response = Response::failure("x".repeat(100));
        write_frame(&mut client, &response).await.unwrap();

        let result: Result<Option<Response>, _> = read_frame(&mut server, 16).await;
        assert!(matches!(result, Err(RpcError::FrameTooLarge { limit: 16, .. })));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let bytes = Response::failure("truncated").encode_length_delimited_to_vec();
        tokio::io::AsyncWriteExt::write_all(&mut client, &bytes[..bytes.len() - 2]).await.unwrap();
        drop(client);

        let result: Result<Option<Response>, _> = read_frame(&mut server, MAX_FRAME_LEN).await;
        assert!(matches!(result, Err(RpcError::Io(_))));
    }

    // Answers every request on a connection, then hangs up after `per_connection` requests.
    async fn serve(listener: TcpListener, per_connection: usize, seen: Arc<AtomicUsize>) {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            let mut stream = BufReader::new(stream);
            for _ in 0..per_connection {
                let request: Request = match read_frame(&mut stream, MAX_FRAME_LEN).await {
                    Ok(Some(request)) => request,
                    _ => break,
                };
                seen.fetch_add(1, Ordering::SeqCst);
                let response = match request.method {
                    Some(Method::ReportBatch(batch)) if batch.metrics.is_empty() => {
                        Response::failure("empty batch")
                    }
                    Some(_) => Response::success(),
                    None => Response::failure("missing method"),
                };
                write_frame(&mut stream, &response).await.unwrap();
            }
        }
    }

    async fn start(per_connection: usize) -> (RpcClient, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let seen = Arc::new(AtomicUsize::new(0));
        tokio::spawn(serve(listener, per_connection, Arc::clone(&seen)));
        let backoff = Backoff::new([Duration::from_millis(10)]);
        (RpcClient::new(address, backoff), seen)
    }

    #[tokio::test]
    async fn test_client_calls() {
        let (client, seen) = start(usize::MAX).await;

        client.report_raw("counter", "PollCount", "5").await.unwrap();
        client.report(Metric::gauge("RandomValue", 0.5)).await.unwrap();
        client.report_batch(vec![Metric::counter("PollCount", 1)]).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 3);

        let rejected = client.report_batch(Vec::new()).await;
        assert!(matches!(rejected, Err(RpcError::Rejected(reason)) if reason == "empty batch"));
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_client_reconnects() {
        let (client, seen) = start(1).await;

        for _ in 0..3 {
            client.report(Metric::counter("PollCount", 1)).await.unwrap();
        }
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    // Holds every response until `barrier` has seen as many requests as it waits for.
    async fn serve_together(
        listener: TcpListener,
        barrier: Arc<Barrier>,
        accepted: Arc<AtomicUsize>,
    ) {
        loop {
            let Ok((stream, _)) = listener.accept().await else { return };
            accepted.fetch_add(1, Ordering::SeqCst);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                let mut stream = BufReader::new(stream);
                while let Ok(Some(_)) = read_frame::<_, Request>(&mut stream, MAX_FRAME_LEN).await {
                    barrier.wait().await;
                    if write_frame(&mut stream, &Response::success()).await.is_err() {
                        break;
                    }
                }
            });
        }
    }

    #[tokio::test]
    async fn test_calls_overlap_up_to_max_connections() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let accepted = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(4));
        tokio::spawn(serve_together(listener, barrier, Arc::clone(&accepted)));

        let client = RpcClient::new(address, Backoff::none()).with_max_connections(4);
        let batch = || vec![Metric::counter("PollCount", 1), Metric::gauge("Alloc", 2.0)];

        for _ in 0..2 {
            let calls = async {
                tokio::join!(
                    client.report_batch(batch()),
                    client.report_batch(batch()),
                    client.report_batch(batch()),
                    client.report_batch(batch()),
                )
            };
            let (a, b, c, d) = timeout(Duration::from_secs(5), calls).await.unwrap();
            for result in [a, b, c, d] {
                result.unwrap();
            }
        }
        assert_eq!(accepted.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let client = RpcClient::new(address.clone(), Backoff::none());
        assert_eq!(client.address(), address);
        assert!(matches!(client.report(Metric::counter("a", 1)).await, Err(RpcError::Io(_))));
    }
}
