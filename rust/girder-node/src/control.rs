//! Distribution control plumbing.
//!
//! Outbound frames are `112` (pass-through) followed by a version-tagged
//! control tuple and, for SEND/REG_SEND, a version-tagged message term.
//! Inbound frames are split the same way; the control tuple selects the
//! delivery target and the message bytes travel onward undecoded so
//! consumers can decode lazily.

use girder_etf::{decode, encode, tags, DecodeError, EtfBuffer, Pid, Term};

use crate::node::call_id_of;
use crate::NodeError;

/// Pass-through marker opening every non-tick distribution frame.
pub(crate) const PASS_THROUGH: u8 = 112;

/// Control tuple operations this client speaks.
const OP_SEND: i64 = 2;
const OP_REG_SEND: i64 = 6;

/// Where an outbound message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dest {
    /// A remote registered name (REG_SEND).
    Name(String),
    /// A concrete pid (SEND).
    Pid(Pid),
}

impl From<&str> for Dest {
    fn from(name: &str) -> Dest {
        Dest::Name(name.to_string())
    }
}

impl From<Pid> for Dest {
    fn from(pid: Pid) -> Dest {
        Dest::Pid(pid)
    }
}

/// Build a SEND or REG_SEND frame around already-encoded message bytes.
///
/// `message` must be a version-tagged term buffer; `append_buffer`
/// strips the version byte as the frame interior carries its own.
pub(crate) fn build_frame(
    from: &Pid,
    dest: &Dest,
    message: &EtfBuffer,
) -> Result<Vec<u8>, NodeError> {
    let control = match dest {
        Dest::Pid(to) => Term::tuple(vec![
            Term::Int(OP_SEND),
            Term::atom(""),
            Term::Pid(to.clone()),
        ]),
        Dest::Name(name) => Term::tuple(vec![
            Term::Int(OP_REG_SEND),
            Term::Pid(from.clone()),
            Term::atom(""),
            Term::atom(name.clone()),
        ]),
    };

    let mut frame = EtfBuffer::new();
    frame.append_byte(PASS_THROUGH);
    frame.append_byte(tags::VERSION);
    encode(&control, &mut frame).map_err(|e| NodeError::SendFailed(e.to_string()))?;
    frame.append_byte(tags::VERSION);
    frame.append_buffer(message);
    Ok(frame.into_vec())
}

/// Wrap an encoded payload as `{sender_pid, payload}`, the shape every
/// outbound SEND carries.
pub(crate) fn wrap_message(from: &Pid, payload: &EtfBuffer) -> Result<EtfBuffer, NodeError> {
    let mut message = EtfBuffer::versioned();
    girder_etf::emit_tuple_header(2, &mut message);
    encode(&Term::Pid(from.clone()), &mut message)
        .map_err(|e| NodeError::SendFailed(e.to_string()))?;
    message.append_buffer(payload);
    Ok(message)
}

/// The classified interior of one inbound data frame.
#[derive(Debug)]
pub(crate) enum Inbound {
    /// A SEND/REG_SEND delivery: target plus undecoded message bytes
    /// (version-tagged).
    Delivery {
        to: DeliveryTarget,
        message: Vec<u8>,
    },
    /// A control message outside this client's surface (LINK, EXIT,
    /// ...). Observed and dropped.
    Ignored,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DeliveryTarget {
    Pid(Pid),
    Name(String),
}

/// Split an inbound frame into control + message and classify it.
pub(crate) fn classify_frame(payload: &[u8]) -> Result<Inbound, NodeError> {
    let bad = |error: DecodeError| NodeError::ReceiveFailed(format!("bad control frame: {error}"));

    if payload.first() != Some(&PASS_THROUGH) {
        return Err(NodeError::ReceiveFailed(format!(
            "unexpected distribution frame type {:?}",
            payload.first()
        )));
    }

    let mut buf = EtfBuffer::from_vec(payload[1..].to_vec());
    let control = decode(&mut buf).map_err(bad)?;
    let message = payload[1 + buf.position()..].to_vec();

    let Term::Tuple(elements) = control else {
        return Err(NodeError::ReceiveFailed(
            "control term is not a tuple".into(),
        ));
    };
    let op = elements.first().and_then(Term::as_int);

    match op {
        Some(OP_SEND) => {
            let to = match elements.get(2) {
                Some(Term::Pid(pid)) => DeliveryTarget::Pid(pid.clone()),
                _ => {
                    return Err(NodeError::ReceiveFailed(
                        "send control without target pid".into(),
                    ))
                }
            };
            Ok(Inbound::Delivery { to, message })
        }
        Some(OP_REG_SEND) => {
            let to = match elements.get(3) {
                Some(Term::Atom(name)) => DeliveryTarget::Name(name.clone()),
                _ => {
                    return Err(NodeError::ReceiveFailed(
                        "reg_send control without target name".into(),
                    ))
                }
            };
            Ok(Inbound::Delivery { to, message })
        }
        Some(_) => Ok(Inbound::Ignored),
        None => Err(NodeError::ReceiveFailed(
            "control tuple without an operation".into(),
        )),
    }
}

/// How a delivered message participates in the protocol.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum MessageKind {
    /// `{reference, result}` — an RPC reply correlated by the call id
    /// embedded in the reference.
    RpcReply { call_id: u64 },
    /// `{:rex, result}` — a legacy tag-only RPC reply; the oldest
    /// waiter wins.
    RexReply,
    /// `{:call, id, sender, args...}` — an inbound function call.
    InboundCall,
    /// Anything else: multicast to subscribers.
    Plain,
}

/// Peek a delivered message's protocol role without decoding it fully.
pub(crate) fn peek_kind(message: &[u8]) -> MessageKind {
    let mut buf = EtfBuffer::from_vec(message.to_vec());
    buf.consume_version();

    let Ok(tag) = buf.read_tag() else {
        return MessageKind::Plain;
    };
    let arity = match tag {
        tags::SMALL_TUPLE_EXT => {
            let _ = buf.read_u8();
            buf.read_u8().map(|a| a as usize)
        }
        tags::LARGE_TUPLE_EXT => {
            let _ = buf.read_u8();
            buf.read_u32().map(|a| a as usize)
        }
        _ => return MessageKind::Plain,
    };
    let Ok(arity) = arity else {
        return MessageKind::Plain;
    };
    if arity < 2 {
        return MessageKind::Plain;
    }

    match buf.read_tag() {
        Ok(tags::NEW_REFERENCE_EXT) | Ok(tags::NEWER_REFERENCE_EXT) | Ok(tags::REFERENCE_EXT) => {
            match decode(&mut buf) {
                Ok(Term::Reference(reference)) if arity == 2 => match call_id_of(&reference) {
                    Some(call_id) => MessageKind::RpcReply { call_id },
                    None => MessageKind::Plain,
                },
                _ => MessageKind::Plain,
            }
        }
        Ok(t)
            if t == tags::ATOM_EXT
                || t == tags::SMALL_ATOM_EXT
                || t == tags::ATOM_UTF8_EXT
                || t == tags::SMALL_ATOM_UTF8_EXT =>
        {
            match girder_etf::decode_atom(&mut buf) {
                Ok(name) if name == "rex" && arity == 2 => MessageKind::RexReply,
                Ok(name) if name == "call" && arity >= 3 => MessageKind::InboundCall,
                _ => MessageKind::Plain,
            }
        }
        _ => MessageKind::Plain,
    }
}

/// Build the `{:"$gen_call", {self, ref}, {:call, m, f, args, gl}}`
/// request the remote `:rex` server answers.
pub(crate) fn rpc_request(
    self_pid: &Pid,
    reference: &girder_etf::Reference,
    module: &str,
    function: &str,
    args: Vec<Term>,
) -> Result<EtfBuffer, NodeError> {
    let request = Term::tuple(vec![
        Term::atom("$gen_call"),
        Term::tuple(vec![
            Term::Pid(self_pid.clone()),
            Term::Reference(reference.clone()),
        ]),
        Term::tuple(vec![
            Term::atom("call"),
            Term::atom(module.to_string()),
            Term::atom(function.to_string()),
            Term::List(args),
            Term::Pid(self_pid.clone()),
        ]),
    ]);

    let mut message = EtfBuffer::versioned();
    encode(&request, &mut message).map_err(|e| NodeError::SendFailed(e.to_string()))?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(term: &Term) -> EtfBuffer {
        let mut buf = EtfBuffer::versioned();
        encode(term, &mut buf).unwrap();
        buf
    }

    fn pid(num: u32) -> Pid {
        Pid {
            node: "client@box".into(),
            num,
            serial: 1,
            creation: 9,
        }
    }

    #[test]
    fn send_frames_classify_back() {
        let message = encoded(&Term::atom("payload"));
        let frame = build_frame(&pid(0), &Dest::Pid(pid(4)), &message).unwrap();
        assert_eq!(frame[0], PASS_THROUGH);

        match classify_frame(&frame).unwrap() {
            Inbound::Delivery { to, message } => {
                assert_eq!(to, DeliveryTarget::Pid(pid(4)));
                let mut buf = EtfBuffer::from_vec(message);
                assert_eq!(decode(&mut buf).unwrap(), Term::atom("payload"));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn reg_send_frames_carry_the_name() {
        let message = encoded(&Term::Int(1));
        let frame = build_frame(&pid(0), &Dest::Name("rex".into()), &message).unwrap();
        match classify_frame(&frame).unwrap() {
            Inbound::Delivery { to, .. } => {
                assert_eq!(to, DeliveryTarget::Name("rex".into()));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn foreign_control_ops_are_ignored() {
        // A LINK control tuple {1, from, to}.
        let mut frame = EtfBuffer::new();
        frame.append_byte(PASS_THROUGH);
        frame.append_byte(tags::VERSION);
        encode(
            &Term::tuple(vec![
                Term::Int(1),
                Term::Pid(pid(1)),
                Term::Pid(pid(2)),
            ]),
            &mut frame,
        )
        .unwrap();
        assert!(matches!(
            classify_frame(frame.as_slice()).unwrap(),
            Inbound::Ignored
        ));
    }

    #[test]
    fn non_pass_through_frames_are_receive_failures() {
        assert!(matches!(
            classify_frame(&[99, 1, 2]),
            Err(NodeError::ReceiveFailed(_))
        ));
    }

    #[test]
    fn peek_finds_rpc_replies_and_calls() {
        let node = crate::Node::new("client@box", "c").unwrap();
        let reference = node.call_ref(77);

        let reply = encoded(&Term::tuple(vec![
            Term::Reference(reference),
            Term::atom("ok"),
        ]));
        assert_eq!(
            peek_kind(reply.as_slice()),
            MessageKind::RpcReply { call_id: 77 }
        );

        let rex = encoded(&Term::tuple(vec![Term::atom("rex"), Term::atom("ok")]));
        assert_eq!(peek_kind(rex.as_slice()), MessageKind::RexReply);

        let call = encoded(&Term::tuple(vec![
            Term::atom("call"),
            Term::Int(5),
            Term::Pid(pid(3)),
            Term::Int(40),
        ]));
        assert_eq!(peek_kind(call.as_slice()), MessageKind::InboundCall);

        let plain = encoded(&Term::tuple(vec![Term::atom("hello"), Term::Int(1)]));
        assert_eq!(peek_kind(plain.as_slice()), MessageKind::Plain);
    }

    #[test]
    fn wrapped_messages_carry_the_sender() {
        let payload = encoded(&Term::Int(42));
        let message = wrap_message(&pid(0), &payload).unwrap();
        let mut buf = EtfBuffer::from_vec(message.into_vec());
        assert_eq!(
            decode(&mut buf).unwrap(),
            Term::tuple(vec![Term::Pid(pid(0)), Term::Int(42)])
        );
    }
}
