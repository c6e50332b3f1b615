//! DNS interception server, TCP transport
//!
//! DNS over TCP frames every message with a 2-byte length prefix
//! (RFC 1035). A client may issue several queries on one connection.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time;
use tracing::{debug, error, info, trace};

use super::handler::DnsHandler;
use super::upstream::Transport;
use crate::error::DnsProxyError;

/// TCP DNS server
pub struct DnsTcpServer {
    listener: TcpListener,
    handler: Arc<DnsHandler>,
}

impl DnsTcpServer {
    /// Bind to the given address
    ///
    /// # Errors
    ///
    /// Returns `DnsProxyError::Bind` when the listener cannot be bound.
    pub async fn bind(addr: SocketAddr, handler: Arc<DnsHandler>) -> Result<Self, DnsProxyError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DnsProxyError::bind("TCP", addr.to_string(), e.to_string()))?;
        Ok(Self { listener, handler })
    }

    /// Local address of the bound listener
    ///
    /// # Errors
    ///
    /// Returns an error if the listener has no local address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve connections until the shutdown signal fires
    pub async fn run_until_shutdown(self, mut shutdown: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(s) => s,
                        Err(err) => {
                            error!(error = %err, "DNS TCP accept error");
                            time::sleep(Duration::from_secs(1)).await;
                            continue;
                        }
                    };

                    trace!(peer = %peer_addr, "DNS TCP client accepted");

                    let handler = Arc::clone(&self.handler);
                    tokio::spawn(async move {
                        if let Err(err) = handle_client(stream, peer_addr, handler).await {
                            debug!(peer = %peer_addr, error = %err, "DNS TCP client error");
                        }
                    });
                }
                _ = &mut shutdown => {
                    info!("DNS TCP server shutting down");
                    break;
                }
            }
        }
    }
}

/// Serve one TCP client until EOF or error
async fn handle_client(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<DnsHandler>,
) -> std::io::Result<()> {
    let mut length_buf = [0u8; 2];
    let mut message_buf = BytesMut::new();

    loop {
        match stream.read_exact(&mut length_buf).await {
            Ok(..) => {}
            Err(ref err) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err),
        }

        let length = u16::from_be_bytes(length_buf) as usize;
        if length == 0 {
            debug!(peer = %peer_addr, "zero-length DNS frame skipped");
            continue;
        }

        message_buf.resize(length, 0);
        stream.read_exact(&mut message_buf).await?;

        let Some(response) = handler.handle(&message_buf, Transport::Tcp).await else {
            // Unparseable message, nothing sensible to answer
            return Err(std::io::Error::new(
                ErrorKind::InvalidData,
                "unparseable DNS message",
            ));
        };

        let mut out = Vec::with_capacity(2 + response.len());
        out.extend_from_slice(&(response.len() as u16).to_be_bytes());
        out.extend_from_slice(&response);
        stream.write_all(&out).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::pool::{parse_ip_range, LoopbackPool};
    use crate::dns::upstream::PrivateResolvers;
    use crate::rules::NoProxy;
    use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
    use hickory_proto::rr::{Name, RData, RecordType};
    use std::str::FromStr;

    fn test_handler() -> Arc<DnsHandler> {
        let pool = Arc::new(LoopbackPool::new(
            parse_ip_range("127.0.1.0-127.0.1.100").unwrap(),
        ));
        Arc::new(DnsHandler::new(
            pool,
            Arc::new(NoProxy::default()),
            PrivateResolvers::new(&[]),
        ))
    }

    fn build_query(domain: &str, id: u16) -> Vec<u8> {
        let mut msg = Message::new();
        msg.set_id(id);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        msg.set_recursion_desired(true);
        msg.add_query(Query::query(
            Name::from_str(domain).unwrap(),
            RecordType::A,
        ));
        msg.to_vec().unwrap()
    }

    async fn exchange(stream: &mut TcpStream, query: &[u8]) -> Message {
        stream
            .write_all(&(query.len() as u16).to_be_bytes())
            .await
            .unwrap();
        stream.write_all(query).await.unwrap();

        let mut len_buf = [0u8; 2];
        stream.read_exact(&mut len_buf).await.unwrap();
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await.unwrap();
        Message::from_vec(&buf).unwrap()
    }

    #[tokio::test]
    async fn test_tcp_server_bind() {
        let server = DnsTcpServer::bind("127.0.0.1:0".parse().unwrap(), test_handler())
            .await
            .unwrap();
        assert!(server.local_addr().is_ok());
    }

    #[tokio::test]
    async fn test_tcp_query_roundtrip() {
        let handler = test_handler();
        let server = DnsTcpServer::bind("127.0.0.1:0".parse().unwrap(), Arc::clone(&handler))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        let (_shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(server.run_until_shutdown(shutdown_rx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let response = exchange(&mut client, &build_query("example.com.", 1234)).await;

        assert_eq!(response.id(), 1234);
        assert_eq!(response.response_code(), ResponseCode::NoError);
        match response.answers().first().unwrap().data() {
            Some(RData::A(a)) => assert!(handler.pool().contains(a.0)),
            other => panic!("expected A record, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tcp_multiple_queries_one_connection() {
        let server = DnsTcpServer::bind("127.0.0.1:0".parse().unwrap(), test_handler())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        let (_shutdown_tx, shutdown_rx) = oneshot::channel();
        tokio::spawn(server.run_until_shutdown(shutdown_rx));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let first = exchange(&mut client, &build_query("one.example.", 1)).await;
        let second = exchange(&mut client, &build_query("two.example.", 2)).await;

        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
    }
}
