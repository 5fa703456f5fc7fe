//! Per-request orchestration.
//!
//! Every question of a query is routed on its own, in order: answered from
//! the local table, left unanswered as a zone miss, or forwarded. Forwarded
//! questions each get their own upstream round trip carrying the whole
//! original query. The reply is built up across the loop and encoded once.
//!
//! Reply status: answers that were added are never removed. SERVFAIL, once
//! any question exhausts the upstream list, is final; otherwise the first
//! non-NOERROR code returned by an upstream is used.
//!
//! An upstream TC bit is carried into the reply. Replies are not trimmed to
//! 512 bytes; clients retrying truncated answers need TCP, which is not served.

use std::time::Instant;

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dns::{self, HEADER_LEN};
use crate::forwarder::Forwarder;
use crate::resolver::{LocalResolver, Route};
use crate::stats::Stats;

pub struct RequestHandler {
    local: LocalResolver,
    forwarder: Forwarder,
    stats: Stats,
}

impl RequestHandler {
    pub fn new(local: LocalResolver, forwarder: Forwarder) -> Self {
        Self {
            local,
            forwarder,
            stats: Stats::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            LocalResolver::from_config(&config.local),
            Forwarder::from_config(&config.upstream),
        )
    }

    pub fn local(&self) -> &LocalResolver {
        &self.local
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// Handle one datagram and return the encoded reply, if any.
    ///
    /// Datagrams that are too short or are responses get no reply.
    pub async fn handle(&self, packet: &[u8]) -> Option<Vec<u8>> {
        if packet.len() < HEADER_LEN || dns::is_response(packet) {
            return None;
        }

        let start = Instant::now();

        let reply = match Message::from_vec(packet) {
            Ok(request) if request.message_type() == MessageType::Response => return None,
            Ok(request) if request.op_code() != OpCode::Query => {
                debug!(opcode = ?request.op_code(), "Unsupported opcode");
                let mut reply = dns::reply_to(&request);
                reply.set_response_code(ResponseCode::NotImp);
                reply
            }
            Ok(request) => self.answer(&request, packet).await,
            Err(e) => {
                debug!(error = %e, "Malformed query");
                dns::error_reply(packet, ResponseCode::FormErr)?
            }
        };

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.stats.record_request(elapsed_ms);
        debug!(
            id = reply.id(),
            rcode = ?reply.response_code(),
            answers = reply.answers().len(),
            total_ms = elapsed_ms,
            "Reply ready"
        );

        match reply.to_vec() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!(id = reply.id(), error = %e, "Failed to encode reply");
                None
            }
        }
    }

    /// Build the reply for a decoded query. `packet` is the query as
    /// received and is what gets forwarded.
    pub async fn answer(&self, request: &Message, packet: &[u8]) -> Message {
        let mut reply = dns::reply_to(request);
        let mut rcode = ResponseCode::NoError;

        for query in request.queries() {
            info!(name = %query.name(), qtype = %query.query_type(), "Query");

            let outcome = self
                .answer_question(query, request.id(), packet, &mut reply)
                .await;
            if let Some(code) = outcome {
                rcode = dns::merge_response_code(rcode, code);
            }
        }

        reply.set_response_code(rcode);
        reply
    }

    /// Resolve one question into `reply`. Returns the status the question
    /// contributes, if any.
    async fn answer_question(
        &self,
        query: &Query,
        id: u16,
        packet: &[u8],
        reply: &mut Message,
    ) -> Option<ResponseCode> {
        let name = query.name();

        match self.local.route(name) {
            Route::Local(address) => {
                match dns::address_record(name, address, self.local.ttl()) {
                    Ok(record) => {
                        info!(name = %name, address = %address, "Answered from local records");
                        reply.add_answer(record);
                        self.stats.record_local();
                    }
                    Err(e) => {
                        warn!(name = %name, error = %e, "Dropping local answer");
                    }
                }
                None
            }
            Route::ZoneMiss => {
                info!(name = %name, "No local record inside zone, leaving unanswered");
                self.stats.record_zone_miss();
                None
            }
            Route::Forward => {
                info!(name = %name, "Not a local record, forwarding upstream");
                match self.forwarder.forward(packet, id).await {
                    Ok(mut response) => {
                        self.stats.record_forwarded();
                        if response.truncated() {
                            reply.set_truncated(true);
                        }
                        reply.add_answers(response.take_answers());
                        Some(response.response_code())
                    }
                    Err(e) => {
                        warn!(name = %name, error = %e, "Cannot answer query");
                        self.stats.record_server_failure();
                        Some(ResponseCode::ServFail)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Mutex};

    use hickory_proto::rr::{Name, RData, Record, RecordType};

    use crate::config::Strategy;
    use crate::config::normalize_zone;
    use crate::forwarder::tests::{MockUpstream, SHORT_TIMEOUT, closed_endpoint, reply};
    use crate::resolver::Scope;

    fn handler(records: &[(&str, &str)], scope: Scope, upstreams: Vec<String>) -> RequestHandler {
        RequestHandler::new(
            LocalResolver::new(records.iter().copied(), scope, 3600),
            Forwarder::new(upstreams, SHORT_TIMEOUT, Strategy::Sequential),
        )
    }

    fn request(id: u16, questions: &[(&str, RecordType)]) -> Vec<u8> {
        let mut message = Message::new();
        message
            .set_id(id)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true);
        for (name, qtype) in questions {
            message.add_query(Query::query(Name::from_ascii(name).unwrap(), *qtype));
        }
        message.to_vec().unwrap()
    }

    async fn send(handler: &RequestHandler, packet: &[u8]) -> Message {
        let bytes = handler.handle(packet).await.expect("reply");
        Message::from_vec(&bytes).unwrap()
    }

    fn address(record: &Record) -> Option<Ipv4Addr> {
        match record.data()? {
            RData::A(a) => Some(a.0),
            _ => None,
        }
    }

    #[tokio::test]
    async fn local_hit_answers_with_query_case_and_skips_upstream() {
        let upstream = MockUpstream::answering(Ipv4Addr::new(9, 9, 9, 9)).await;
        let handler = handler(&[("a.com.", "10.0.0.1")], Scope::Table, vec![upstream.endpoint()]);

        let reply = send(&handler, &request(1, &[("A.COM.", RecordType::A)])).await;

        assert_eq!(reply.id(), 1);
        assert_eq!(reply.message_type(), MessageType::Response);
        assert_eq!(reply.response_code(), ResponseCode::NoError);
        assert_eq!(reply.answers().len(), 1);
        let answer = &reply.answers()[0];
        assert_eq!(answer.name().to_ascii(), "A.COM.");
        assert_eq!(answer.record_type(), RecordType::A);
        assert_eq!(address(answer), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(upstream.hits(), 0);
        assert_eq!(handler.stats().local.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn table_miss_forwards_and_copies_upstream_answers() {
        let down = MockUpstream::silent().await;
        let up = MockUpstream::answering(Ipv4Addr::new(93, 184, 216, 34)).await;
        let handler = handler(&[], Scope::Table, vec![down.endpoint(), up.endpoint()]);

        let reply = send(&handler, &request(2, &[("example.com.", RecordType::A)])).await;

        assert_eq!(reply.response_code(), ResponseCode::NoError);
        assert_eq!(reply.answers().len(), 1);
        assert_eq!(reply.answers()[0].name().to_ascii(), "example.com.");
        assert_eq!(address(&reply.answers()[0]), Some(Ipv4Addr::new(93, 184, 216, 34)));
        assert_eq!(down.hits(), 1);
        assert_eq!(up.hits(), 1);
    }

    #[tokio::test]
    async fn all_upstreams_down_is_servfail_with_no_answers() {
        let handler = handler(
            &[],
            Scope::Table,
            vec![closed_endpoint().await, MockUpstream::silent().await.endpoint()],
        );

        let reply = send(&handler, &request(3, &[("example.com.", RecordType::A)])).await;

        assert_eq!(reply.response_code(), ResponseCode::ServFail);
        assert!(reply.answers().is_empty());
        assert_eq!(handler.stats().server_failures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn upstream_response_code_is_passed_through() {
        let nx = MockUpstream::with_code(ResponseCode::NXDomain).await;
        let handler = handler(&[], Scope::Table, vec![nx.endpoint()]);

        let reply = send(&handler, &request(4, &[("nope.example.", RecordType::A)])).await;

        assert_eq!(reply.response_code(), ResponseCode::NXDomain);
        assert!(reply.answers().is_empty());
    }

    #[tokio::test]
    async fn zone_miss_is_unanswered_and_not_forwarded() {
        let upstream = MockUpstream::answering(Ipv4Addr::new(9, 9, 9, 9)).await;
        let handler = handler(
            &[("nas.lan.", "192.168.1.10")],
            Scope::Zone(normalize_zone("lan.")),
            vec![upstream.endpoint()],
        );

        let reply = send(&handler, &request(5, &[("tv.lan.", RecordType::A)])).await;

        assert_eq!(reply.response_code(), ResponseCode::NoError);
        assert!(reply.answers().is_empty());
        assert_eq!(upstream.hits(), 0);
        assert_eq!(handler.stats().zone_misses.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn outside_zone_is_forwarded_even_if_in_table() {
        let upstream = MockUpstream::answering(Ipv4Addr::new(9, 9, 9, 9)).await;
        let handler = handler(
            &[("a.com.", "10.0.0.1")],
            Scope::Zone(normalize_zone("lan.")),
            vec![upstream.endpoint()],
        );

        let reply = send(&handler, &request(6, &[("a.com.", RecordType::A)])).await;

        assert_eq!(reply.answers().len(), 1);
        assert_eq!(address(&reply.answers()[0]), Some(Ipv4Addr::new(9, 9, 9, 9)));
        assert_eq!(upstream.hits(), 1);
    }

    #[tokio::test]
    async fn zone_hit_answers_locally() {
        let handler = handler(
            &[("nas.lan.", "192.168.1.10")],
            Scope::Zone(normalize_zone("lan.")),
            vec![closed_endpoint().await],
        );

        let reply = send(&handler, &request(7, &[("NAS.Lan.", RecordType::A)])).await;

        assert_eq!(reply.response_code(), ResponseCode::NoError);
        assert_eq!(reply.answers().len(), 1);
        assert_eq!(reply.answers()[0].name().to_ascii(), "NAS.Lan.");
        assert_eq!(address(&reply.answers()[0]), Some(Ipv4Addr::new(192, 168, 1, 10)));
    }

    #[tokio::test]
    async fn local_answer_survives_failure_of_a_later_question() {
        let handler = handler(
            &[("a.com.", "10.0.0.1")],
            Scope::Table,
            vec![closed_endpoint().await],
        );

        let reply = send(
            &handler,
            &request(8, &[("a.com.", RecordType::A), ("b.com.", RecordType::A)]),
        )
        .await;

        assert_eq!(reply.queries().len(), 2);
        assert_eq!(reply.response_code(), ResponseCode::ServFail);
        assert_eq!(reply.answers().len(), 1);
        assert_eq!(address(&reply.answers()[0]), Some(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[tokio::test]
    async fn every_forwarded_question_gets_its_own_round_trip() {
        let upstream = MockUpstream::answering(Ipv4Addr::new(9, 9, 9, 9)).await;
        let handler = handler(&[], Scope::Table, vec![upstream.endpoint()]);

        let reply = send(
            &handler,
            &request(9, &[("a.com.", RecordType::A), ("b.com.", RecordType::A)]),
        )
        .await;

        assert_eq!(upstream.hits(), 2);
        assert_eq!(reply.answers().len(), 2);
        assert_eq!(handler.stats().forwarded.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn forwards_the_whole_original_query() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let upstream = MockUpstream::spawn(move |request| {
            recorder.lock().unwrap().push(request.queries().len());
            reply(request, ResponseCode::NoError).to_vec().ok()
        })
        .await;
        let handler = handler(&[], Scope::Table, vec![upstream.endpoint()]);

        send(
            &handler,
            &request(11, &[("a.com.", RecordType::A), ("b.com.", RecordType::A)]),
        )
        .await;

        assert_eq!(*seen.lock().unwrap(), vec![2, 2]);
    }

    #[tokio::test]
    async fn upstream_truncation_is_passed_through() {
        let upstream = MockUpstream::spawn(|request| {
            let mut response = reply(request, ResponseCode::NoError);
            response.set_truncated(true);
            response.to_vec().ok()
        })
        .await;
        let handler = handler(&[], Scope::Table, vec![upstream.endpoint()]);

        let reply = send(&handler, &request(12, &[("big.com.", RecordType::A)])).await;

        assert!(reply.truncated());
        assert_eq!(reply.response_code(), ResponseCode::NoError);
    }

    #[tokio::test]
    async fn malformed_local_address_drops_only_that_answer() {
        let handler = handler(
            &[("bad.lan.", "not-an-ip"), ("good.lan.", "192.168.1.2")],
            Scope::Zone(normalize_zone("lan")),
            Vec::new(),
        );

        let reply = send(
            &handler,
            &request(10, &[("bad.lan.", RecordType::A), ("good.lan.", RecordType::A)]),
        )
        .await;

        assert_eq!(reply.response_code(), ResponseCode::NoError);
        assert_eq!(reply.answers().len(), 1);
        assert_eq!(address(&reply.answers()[0]), Some(Ipv4Addr::new(192, 168, 1, 2)));
    }

    #[tokio::test]
    async fn question_types_other_than_a_still_get_the_address() {
        let handler = handler(&[("a.com.", "10.0.0.1")], Scope::Table, Vec::new());

        let reply = send(&handler, &request(11, &[("a.com.", RecordType::AAAA)])).await;

        assert_eq!(reply.answers().len(), 1);
        assert_eq!(reply.answers()[0].record_type(), RecordType::A);
    }

    #[tokio::test]
    async fn non_query_opcode_is_not_implemented() {
        let handler = handler(&[], Scope::Table, Vec::new());
        let mut message = Message::new();
        message
            .set_id(12)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Status);

        let reply = send(&handler, &message.to_vec().unwrap()).await;

        assert_eq!(reply.id(), 12);
        assert_eq!(reply.response_code(), ResponseCode::NotImp);
    }

    #[tokio::test]
    async fn undecodable_query_is_formerr() {
        let handler = handler(&[], Scope::Table, Vec::new());
        // Header claims one question, body is truncated mid-label.
        let packet = [0x00, 0x0d, 0x01, 0x00, 0, 1, 0, 0, 0, 0, 0, 0, 5, b'a'];

        let reply = send(&handler, &packet).await;

        assert_eq!(reply.id(), 13);
        assert_eq!(reply.response_code(), ResponseCode::FormErr);
    }

    #[tokio::test]
    async fn short_packets_and_responses_are_ignored() {
        let handler = handler(&[], Scope::Table, Vec::new());

        assert!(handler.handle(&[0x00, 0x01, 0x01]).await.is_none());

        let mut response = Message::new();
        response.set_id(14).set_message_type(MessageType::Response);
        assert!(handler.handle(&response.to_vec().unwrap()).await.is_none());
    }
}
