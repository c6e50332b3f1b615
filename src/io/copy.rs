//! Tunnel byte pump
//!
//! Copies bytes between the accepted client socket and the upstream
//! tunnel in both directions. Each direction runs until EOF or error,
//! flushing and shutting down its write side when its read side
//! finishes; the copy completes once both directions have terminated,
//! so a half-closed connection still receives everything the other
//! side has in flight. There is deliberately no timeout here: idle
//! tunnels (SSH sessions, long-polling) must stay up until a peer
//! closes.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

/// Per-direction copy buffer size
const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// Bytes moved by a finished tunnel copy
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyResult {
    /// Bytes copied from the accepted client to the upstream tunnel
    pub client_to_upstream: u64,
    /// Bytes copied from the upstream tunnel to the accepted client
    pub upstream_to_client: u64,
}

impl CopyResult {
    /// Total bytes moved in both directions
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.client_to_upstream + self.upstream_to_client
    }
}

/// One direction of the pump
struct Pump {
    buf: Box<[u8]>,
    pos: usize,
    cap: usize,
    read_done: bool,
    done: bool,
    bytes: u64,
}

impl Pump {
    fn new() -> Self {
        Self {
            buf: vec![0u8; COPY_BUFFER_SIZE].into_boxed_slice(),
            pos: 0,
            cap: 0,
            read_done: false,
            done: false,
            bytes: 0,
        }
    }

    /// Drive this direction until it blocks or terminates
    ///
    /// Returns `Ready` when the direction has flushed everything after
    /// EOF and shut down its writer, or when either side reported an
    /// error.
    fn poll_pump<R, W>(
        &mut self,
        cx: &mut Context<'_>,
        mut reader: Pin<&mut R>,
        mut writer: Pin<&mut W>,
    ) -> Poll<io::Result<()>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        loop {
            if self.pos < self.cap {
                let n = match writer.as_mut().poll_write(cx, &self.buf[self.pos..self.cap]) {
                    Poll::Ready(Ok(0)) => {
                        return Poll::Ready(Err(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "wrote zero bytes to tunnel",
                        )));
                    }
                    Poll::Ready(Ok(n)) => n,
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                };
                self.pos += n;
                self.bytes += n as u64;
                if self.pos == self.cap {
                    self.pos = 0;
                    self.cap = 0;
                }
            } else if self.read_done {
                match writer.as_mut().poll_flush(cx) {
                    Poll::Ready(Ok(())) => {}
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
                match writer.as_mut().poll_shutdown(cx) {
                    Poll::Ready(Ok(())) => return Poll::Ready(Ok(())),
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            } else {
                let mut read_buf = ReadBuf::new(&mut self.buf);
                match reader.as_mut().poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        if n == 0 {
                            self.read_done = true;
                        } else {
                            self.cap = n;
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
        }
    }
}

/// Future driving both pump directions over one pair of streams
struct TunnelCopy<'a, C, U>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    client: &'a mut C,
    upstream: &'a mut U,
    client_to_upstream: Pump,
    upstream_to_client: Pump,
}

impl<C, U> std::future::Future for TunnelCopy<'_, C, U>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    type Output = CopyResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;

        if !this.client_to_upstream.done {
            match this.client_to_upstream.poll_pump(
                cx,
                Pin::new(&mut this.client),
                Pin::new(&mut this.upstream),
            ) {
                Poll::Ready(Ok(())) => this.client_to_upstream.done = true,
                Poll::Ready(Err(e)) => {
                    debug!(error = %e, "client to upstream copy ended");
                    this.client_to_upstream.done = true;
                }
                Poll::Pending => {}
            }
        }

        if !this.upstream_to_client.done {
            match this.upstream_to_client.poll_pump(
                cx,
                Pin::new(&mut this.upstream),
                Pin::new(&mut this.client),
            ) {
                Poll::Ready(Ok(())) => this.upstream_to_client.done = true,
                Poll::Ready(Err(e)) => {
                    debug!(error = %e, "upstream to client copy ended");
                    this.upstream_to_client.done = true;
                }
                Poll::Pending => {}
            }
        }

        if this.client_to_upstream.done && this.upstream_to_client.done {
            Poll::Ready(CopyResult {
                client_to_upstream: this.client_to_upstream.bytes,
                upstream_to_client: this.upstream_to_client.bytes,
            })
        } else {
            Poll::Pending
        }
    }
}

/// Pump bytes between a client socket and its upstream tunnel
///
/// Runs until both directions have terminated through EOF or error,
/// then returns the byte counts moved in each. A direction reaching
/// EOF flushes and shuts down its write side, so the opposite
/// direction keeps draining until its own end closes. Per-direction
/// FIFO order is preserved; no ordering holds between the two
/// directions.
pub async fn tunnel_copy<C, U>(client: &mut C, upstream: &mut U) -> CopyResult
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    TunnelCopy {
        client,
        upstream,
        client_to_upstream: Pump::new(),
        upstream_to_client: Pump::new(),
    }
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_copy_result_total() {
        let result = CopyResult {
            client_to_upstream: 100,
            upstream_to_client: 200,
        };
        assert_eq!(result.total(), 300);
    }

    #[tokio::test]
    async fn test_tunnel_copy_moves_bytes_both_ways() {
        // client <-> proxy-side pair, upstream <-> echo pair
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let echo = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = echo.accept().await.unwrap();
            let mut buf = [0u8; 64];
            loop {
                let n = match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                stream.write_all(&buf[..n]).await.unwrap();
            }
        });

        // The pump runs between the accepted client socket and the echo
        let pump = tokio::spawn(async move {
            let (mut client_side, _) = listener.accept().await.unwrap();
            let mut upstream = TcpStream::connect(echo_addr).await.unwrap();
            tunnel_copy(&mut client_side, &mut upstream).await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"ping").await.unwrap();

        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        // Client closes; the pump observes EOF and finishes
        drop(client);
        let result = pump.await.unwrap();
        assert_eq!(result.client_to_upstream, 4);
        assert_eq!(result.upstream_to_client, 4);
    }

    #[tokio::test]
    async fn test_tunnel_copy_ends_when_both_sides_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Upstream sends a greeting and closes immediately
        let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream_listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = upstream_listener.accept().await.unwrap();
            stream.write_all(b"bye").await.unwrap();
        });

        let pump = tokio::spawn(async move {
            let (mut client_side, _) = listener.accept().await.unwrap();
            let mut upstream = TcpStream::connect(upstream_addr).await.unwrap();
            tunnel_copy(&mut client_side, &mut upstream).await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 3];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"bye");

        // The client-to-upstream direction is still open; only once the
        // client closes do both directions finish
        drop(client);

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), pump)
            .await
            .expect("pump should end once both sides close")
            .unwrap();
        assert_eq!(result.upstream_to_client, 3);
        assert_eq!(result.client_to_upstream, 0);
    }

    #[tokio::test]
    async fn test_client_half_close_does_not_truncate_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Upstream reads the short request, then streams a response far
        // larger than any socket buffer and closes
        let payload: Vec<u8> = (0..256 * 1024usize).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();
        let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream_listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = upstream_listener.accept().await.unwrap();
            let mut request = [0u8; 4];
            stream.read_exact(&mut request).await.unwrap();
            assert_eq!(&request, b"ping");
            stream.write_all(&payload).await.unwrap();
        });

        let pump = tokio::spawn(async move {
            let (mut client_side, _) = listener.accept().await.unwrap();
            let mut upstream = TcpStream::connect(upstream_addr).await.unwrap();
            tunnel_copy(&mut client_side, &mut upstream).await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        // Half-close: the client finishes sending long before the
        // response has finished streaming back
        client.shutdown().await.unwrap();

        // Every response byte must still arrive after the half-close
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received.len(), expected.len());
        assert_eq!(received, expected);

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), pump)
            .await
            .expect("pump should end once the response is drained")
            .unwrap();
        assert_eq!(result.client_to_upstream, 4);
        assert_eq!(result.upstream_to_client, expected.len() as u64);
    }
}
