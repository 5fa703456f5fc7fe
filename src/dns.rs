//! DNS message construction.
//!
//! Wire encoding and decoding is done by hickory-proto; this module only
//! builds the messages the handler sends back.

use std::net::Ipv4Addr;

use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{Name, RData, Record};

use crate::error::RecordError;

/// Size of the fixed DNS header.
pub const HEADER_LEN: usize = 12;

const QR_BIT: u8 = 0x80;

/// Start a reply to `request`: same ID, opcode, RD and CD bits and
/// questions, with the response and recursion-available bits set.
pub fn reply_to(request: &Message) -> Message {
    let mut reply = Message::new();
    reply
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_recursion_desired(request.recursion_desired())
        .set_recursion_available(true)
        .set_checking_disabled(request.checking_disabled())
        .set_response_code(ResponseCode::NoError);
    reply.add_queries(request.queries().iter().cloned());
    reply
}

/// Reply for a datagram that could not be decoded.
///
/// Only the header ID is trusted. Returns `None` when the packet is too
/// short to carry one or is itself a response.
pub fn error_reply(packet: &[u8], code: ResponseCode) -> Option<Message> {
    if packet.len() < HEADER_LEN || is_response(packet) {
        return None;
    }

    let mut reply = Message::new();
    reply
        .set_id(u16::from_be_bytes([packet[0], packet[1]]))
        .set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_response_code(code);
    Some(reply)
}

/// Whether the QR bit of a raw header is set.
pub fn is_response(packet: &[u8]) -> bool {
    packet.len() > 2 && packet[2] & QR_BIT != 0
}

/// Build the A record for a local answer.
///
/// `name` is the question's name as received, so the answer echoes the
/// client's capitalisation.
pub fn address_record(name: &Name, address: &str, ttl: u32) -> Result<Record, RecordError> {
    let ip: Ipv4Addr = address.parse().map_err(|source| RecordError::InvalidAddress {
        name: name.to_string(),
        address: address.to_string(),
        source,
    })?;
    Ok(Record::from_rdata(name.clone(), ttl, RData::A(A(ip))))
}

/// Combine the status accumulated so far with the outcome of one more
/// question.
///
/// SERVFAIL is final; otherwise the first non-NOERROR code is kept.
pub fn merge_response_code(current: ResponseCode, next: ResponseCode) -> ResponseCode {
    if current == ResponseCode::ServFail || next == ResponseCode::ServFail {
        ResponseCode::ServFail
    } else if current == ResponseCode::NoError {
        next
    } else {
        current
    }
}
