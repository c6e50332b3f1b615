//! DNS query handler
//!
//! Implements the per-query protocol shared by the UDP and TCP servers:
//! queries for no-proxy zones are forwarded verbatim to the private
//! resolvers, everything else is answered locally with a synthetic
//! loopback `A` record bound to the queried name.

use std::sync::Arc;

use hickory_proto::op::{Header, Message, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{DNSClass, RData, Record};
use tracing::{debug, error, info};

use super::pool::LoopbackPool;
use super::upstream::{PrivateResolvers, Transport};
use crate::rules::NoProxy;

/// TTL attached to every synthetic answer
pub const SYNTHETIC_TTL: u32 = 60;

/// Shared query handler
///
/// The servers invoke [`DnsHandler::handle`] concurrently for independent
/// queries; the pool serialises its own mutations internally.
pub struct DnsHandler {
    pool: Arc<LoopbackPool>,
    rules: Arc<NoProxy>,
    resolvers: PrivateResolvers,
}

impl DnsHandler {
    /// Create a handler over the shared pool, rule set and resolvers
    #[must_use]
    pub fn new(pool: Arc<LoopbackPool>, rules: Arc<NoProxy>, resolvers: PrivateResolvers) -> Self {
        Self {
            pool,
            rules,
            resolvers,
        }
    }

    /// The synthetic address pool backing this handler
    #[must_use]
    pub fn pool(&self) -> &Arc<LoopbackPool> {
        &self.pool
    }

    /// The no-proxy rule set consulted for every query
    #[must_use]
    pub fn rules(&self) -> &Arc<NoProxy> {
        &self.rules
    }

    /// The private resolver list used for no-proxy zones
    #[must_use]
    pub fn resolvers(&self) -> &PrivateResolvers {
        &self.resolvers
    }

    /// Handle one raw DNS message, returning the wire bytes to send back
    ///
    /// Returns `None` when the message cannot be parsed at all; the caller
    /// drops the datagram (UDP) or ends the connection (TCP).
    pub async fn handle(&self, raw: &[u8], transport: Transport) -> Option<Vec<u8>> {
        let req = match Message::from_vec(raw) {
            Ok(m) => m,
            Err(err) => {
                debug!(error = %err, "dropping unparseable DNS message");
                return None;
            }
        };

        if req.queries().is_empty() {
            debug!(id = req.id(), "query with empty question section");
            return failure_reply(&req);
        }

        let qname = req.queries()[0].name().to_string();

        if self.rules.matches_zone(&qname) {
            return self.handle_private(&req, raw, &qname, transport).await;
        }

        self.handle_public(&req, &qname)
    }

    /// Forward a no-proxy query verbatim and relay the response verbatim
    async fn handle_private(
        &self,
        req: &Message,
        raw: &[u8],
        qname: &str,
        transport: Transport,
    ) -> Option<Vec<u8>> {
        debug!(name = %qname, "routing query to private DNS");

        match self.resolvers.forward(raw, transport).await {
            Ok(response) => {
                info!(
                    name = %qname,
                    qtype = %req.queries()[0].query_type(),
                    "resolved by private DNS"
                );
                Some(response)
            }
            Err(err) => {
                debug!(name = %qname, error = %err, "all private resolvers failed");
                failure_reply(req)
            }
        }
    }

    /// Answer a public query with a synthetic loopback `A` record
    ///
    /// Every query type gets the same `A` answer; returning the synthetic
    /// address for `AAAA` and friends keeps clients from bypassing the
    /// pool through a different record type.
    fn handle_public(&self, req: &Message, qname: &str) -> Option<Vec<u8>> {
        let ip = self.pool.resolve(qname);

        let query = req.queries()[0].clone();
        let name = query.name().clone();

        let mut rsp = Message::new();
        rsp.set_header(Header::response_from_request(req.header()));
        rsp.set_authoritative(true);
        rsp.set_recursion_available(true);
        rsp.set_response_code(ResponseCode::NoError);
        rsp.add_query(query);

        let mut record = Record::from_rdata(name, SYNTHETIC_TTL, RData::A(A(ip)));
        record.set_dns_class(DNSClass::IN);
        rsp.add_answer(record);

        match rsp.to_vec() {
            Ok(bytes) => {
                info!(
                    name = %qname,
                    qtype = %req.queries()[0].query_type(),
                    answer = %ip,
                    "resolved by synthetic pool"
                );
                Some(bytes)
            }
            Err(err) => {
                error!(name = %qname, error = %err, "failed to encode synthetic answer");
                failure_reply(req)
            }
        }
    }
}

/// Build a `ServFail` reply for a request
fn failure_reply(req: &Message) -> Option<Vec<u8>> {
    let reply = Message::error_msg(req.id(), req.op_code(), ResponseCode::ServFail);
    match reply.to_vec() {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            error!(error = %err, "failed to encode failure reply");
            None
        }
    }
}
