//! Channel factory: builds one HTTP/2 connection per call
//!
//! Parsing, TCP connect, optional TLS, and the HTTP/2 handshake live here.
//! No retry logic here; retries belong to the pool and manager layers.

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::client::conn::http2;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use socket2::TcpKeepalive;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::config::ChannelOptions;
use crate::endpoint::Endpoint;
use crate::error::{PoolError, Result};

/// Body type flowing through pooled HTTP/2 senders
pub type H2Body = Full<Bytes>;

/// Valid HTTP/2 frame-size bounds (RFC 9113 §4.2)
const MIN_FRAME_SIZE: u32 = 16_384;
const MAX_FRAME_SIZE: u32 = 16_777_215;

/// One transport connection as seen by the pool layer
///
/// Pools drive the graceful-then-forced shutdown sequence through this
/// interface; callers never close a channel directly.
pub trait TransportChannel: Send + Sync + fmt::Debug {
    /// Whether the channel can currently carry a request
    fn is_ready(&self) -> bool;

    /// Concrete-type access, e.g. to reach an [`H2Channel`]'s request sender
    fn as_any(&self) -> &dyn std::any::Any;

    /// Begin a graceful shutdown; idempotent
    fn shutdown(&self);

    /// Tear the connection down immediately
    fn force_shutdown(&self);

    fn is_shutdown(&self) -> bool;

    /// Whether the underlying connection has fully wound down
    fn is_terminated(&self) -> bool;
}

/// Builds transport channels; the seam pools and the manager are injected with
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        options: &ChannelOptions,
        connect_timeout: Duration,
    ) -> Result<Box<dyn TransportChannel>>;
}

/// HTTP/2 channel over TCP, optionally TLS-wrapped
pub struct H2Channel {
    sender: Mutex<Option<http2::SendRequest<H2Body>>>,
    driver: tokio::task::AbortHandle,
    terminated: Arc<AtomicBool>,
    shut: AtomicBool,
    user_agent: String,
}

impl H2Channel {
    /// Clone of the request sender, if the channel has not been shut down.
    /// Callers multiplex RPCs over it; stream-level errors are theirs to
    /// handle and report back via the success/failure signals.
    pub fn sender(&self) -> Option<http2::SendRequest<H2Body>> {
        self.sender.lock().ok().and_then(|guard| (*guard).clone())
    }

    /// User-agent the caller should attach to outgoing requests
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}

impl TransportChannel for H2Channel {
    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn is_ready(&self) -> bool {
        if self.shut.load(Ordering::Acquire) {
            return false;
        }
        self.sender
            .lock()
            .map(|guard| guard.as_ref().map_or(false, |s| s.is_ready()))
            .unwrap_or(false)
    }

    fn shutdown(&self) {
        self.shut.store(true, Ordering::Release);
        // Dropping the sender lets in-flight streams finish and the
        // connection wind down with a GOAWAY
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
    }

    fn force_shutdown(&self) {
        self.shutdown();
        self.driver.abort();
        self.terminated.store(true, Ordering::Release);
    }

    fn is_shutdown(&self) -> bool {
        self.shut.load(Ordering::Acquire)
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}

impl fmt::Debug for H2Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("H2Channel")
            .field("shutdown", &self.is_shutdown())
            .field("terminated", &self.is_terminated())
            .finish()
    }
}

/// Default connector: HTTP/2 over `TcpStream`, TLS via native-tls for
/// `https` endpoints
pub struct H2Connector {
    tls: tokio_native_tls::TlsConnector,
}

impl H2Connector {
    /// Connector with a stock TLS configuration
    pub fn new() -> Result<Self> {
        let tls = native_tls::TlsConnector::new()?;
        Ok(Self { tls: tls.into() })
    }

    /// Connector using supplied TLS credential material
    pub fn with_tls(tls: native_tls::TlsConnector) -> Self {
        Self { tls: tls.into() }
    }

    async fn handshake<T>(
        &self,
        io: T,
        endpoint: &Endpoint,
        options: &ChannelOptions,
    ) -> Result<Box<dyn TransportChannel>>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut builder = http2::Builder::new(TokioExecutor::new());
        builder
            // Keep-alive needs a timer driving the ping machinery
            .timer(TokioTimer::new())
            .keep_alive_interval(Some(options.keep_alive_interval()))
            .keep_alive_timeout(options.keep_alive_timeout())
            .keep_alive_while_idle(true)
            .max_frame_size(options.max_message_bytes.clamp(MIN_FRAME_SIZE, MAX_FRAME_SIZE));

        let (sender, conn) = builder
            .handshake::<_, H2Body>(TokioIo::new(io))
            .await
            .map_err(|e| PoolError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        // Drive the connection until it winds down; the flag is how the
        // channel observes termination
        let terminated = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&terminated);
        let target = endpoint.to_string();
        let driver = tokio::spawn(async move {
            if let Err(e) = conn.await {
                warn!(endpoint = %target, error = %e, "HTTP/2 connection error");
            }
            flag.store(true, Ordering::Release);
        });

        debug!(endpoint = %endpoint, "Built transport channel");

        Ok(Box::new(H2Channel {
            sender: Mutex::new(Some(sender)),
            driver: driver.abort_handle(),
            terminated,
            shut: AtomicBool::new(false),
            user_agent: options.user_agent.clone(),
        }))
    }
}

#[async_trait]
impl ChannelConnector for H2Connector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        options: &ChannelOptions,
        connect_timeout: Duration,
    ) -> Result<Box<dyn TransportChannel>> {
        let addr = endpoint.authority();

        let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| PoolError::ConnectTimeout(connect_timeout))?
            .map_err(|e| PoolError::ConnectionFailed {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        // Configure TCP keep-alive so a dead peer is noticed between requests
        let socket = socket2::Socket::from(stream.into_std()?);
        socket.set_nodelay(true)?;
        let keepalive = TcpKeepalive::new().with_time(options.keep_alive_interval());
        socket.set_tcp_keepalive(&keepalive)?;
        let stream = TcpStream::from_std(socket.into())?;

        if endpoint.use_tls() {
            let tls_stream = self
                .tls
                .connect(endpoint.host(), stream)
                .await
                .map_err(PoolError::Tls)?;
            self.handshake(tls_stream, endpoint, options).await
        } else {
            self.handshake(stream, endpoint, options).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused_is_retryable() {
        // Bind then drop to get a port with nothing listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = H2Connector::new().unwrap();
        let endpoint = Endpoint::parse(&format!("http://127.0.0.1:{}", port)).unwrap();

        let err = connector
            .connect(&endpoint, &ChannelOptions::default(), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_frame_size_clamped_to_h2_bounds() {
        assert_eq!(1_024u32.clamp(MIN_FRAME_SIZE, MAX_FRAME_SIZE), MIN_FRAME_SIZE);
        assert_eq!(
            (64 * 1024 * 1024u32).clamp(MIN_FRAME_SIZE, MAX_FRAME_SIZE),
            MAX_FRAME_SIZE
        );
        let default = ChannelOptions::default().max_message_bytes;
        assert_eq!(default.clamp(MIN_FRAME_SIZE, MAX_FRAME_SIZE), default);
    }
}
