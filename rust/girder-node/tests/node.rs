//! Connection behaviour against a scripted peer.
//!
//! The peer side speaks the wire format by hand (raw length-prefixed
//! frames over an in-memory duplex stream), so these tests check the
//! client's bytes independently of the client's own framing code.

use std::time::Duration;

use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

use girder_bridge::{Policy, StringPolicy};
use girder_etf::{encode, tags, EtfBuffer, Pid, Term};
use girder_node::{rpc, Connection, FramedTransport, Node, NodeError, RpcError};

const PASS_THROUGH: u8 = 112;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("girder_node=trace")
        .with_test_writer()
        .try_init();
}

async fn connect_pair() -> (Connection, DuplexStream) {
    let node = Node::new("client@box", "monster").expect("node identity");
    let (local, peer) = duplex(1 << 16);
    let connection = node
        .connect(FramedTransport::new(local), "server@box", None)
        .await
        .expect("connect");
    (connection, peer)
}

async fn peer_send_raw(stream: &mut DuplexStream, payload: &[u8]) {
    stream
        .write_all(&(payload.len() as u32).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(payload).await.unwrap();
    stream.flush().await.unwrap();
}

async fn peer_recv_raw(stream: &mut DuplexStream) -> Vec<u8> {
    let mut len = [0u8; 4];
    stream.read_exact(&mut len).await.unwrap();
    let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
    stream.read_exact(&mut payload).await.unwrap();
    payload
}

/// Build a distribution frame the way a remote node would.
fn dist_frame(control: &Term, message: Option<&Term>) -> Vec<u8> {
    let mut frame = EtfBuffer::new();
    frame.append_byte(PASS_THROUGH);
    frame.append_byte(tags::VERSION);
    encode(control, &mut frame).unwrap();
    if let Some(message) = message {
        frame.append_byte(tags::VERSION);
        encode(message, &mut frame).unwrap();
    }
    frame.into_vec()
}

/// Split a client frame into its control and message terms.
fn parse_frame(payload: &[u8]) -> (Term, Option<Term>) {
    assert_eq!(payload[0], PASS_THROUGH, "expected pass-through frame");
    let mut buf = EtfBuffer::from_vec(payload[1..].to_vec());
    let control = girder_etf::decode(&mut buf).unwrap();
    let message = if buf.remaining() > 0 {
        let mut rest = EtfBuffer::from_vec(payload[1 + buf.position()..].to_vec());
        Some(girder_etf::decode(&mut rest).unwrap())
    } else {
        None
    };
    (control, message)
}

fn peer_pid(num: u32) -> Pid {
    Pid {
        node: "server@box".into(),
        num,
        serial: 0,
        creation: 8,
    }
}

fn send_control(to: &Pid) -> Term {
    Term::tuple(vec![Term::Int(2), Term::atom(""), Term::Pid(to.clone())])
}

/// Pull the `{self_pid, ref}` pair and args out of a client rpc frame.
fn parse_rpc_request(payload: &[u8]) -> (Pid, Term, String, String, Vec<Term>) {
    let (control, message) = parse_frame(payload);

    // REG_SEND to :rex.
    let control = control.as_tuple().expect("control tuple");
    assert_eq!(control[0], Term::Int(6));
    assert_eq!(control[3], Term::atom("rex"));

    let message = message.expect("rpc frame carries a message");
    let gen_call = message.as_tuple().expect("message tuple");
    assert_eq!(gen_call[0], Term::atom("$gen_call"));

    let from = gen_call[1].as_tuple().expect("from tuple");
    let caller = from[0].as_pid().expect("caller pid").clone();
    let reference = from[1].clone();

    let call = gen_call[2].as_tuple().expect("call tuple");
    assert_eq!(call[0], Term::atom("call"));
    let module = call[1].as_atom().expect("module atom").to_string();
    let function = call[2].as_atom().expect("function atom").to_string();
    let args = call[3].as_list().expect("args list").to_vec();
    // Group leader rides along as a pid.
    assert!(call[4].as_pid().is_some());

    (caller, reference, module, function, args)
}

#[tokio::test]
async fn sends_are_wrapped_and_addressed() {
    init_tracing();
    let (connection, mut peer) = connect_pair().await;

    connection
        .send_term("logger", &Term::atom("ping"))
        .await
        .unwrap();

    let (control, message) = parse_frame(&peer_recv_raw(&mut peer).await);
    let control = control.as_tuple().unwrap();
    assert_eq!(control[0], Term::Int(6));
    assert_eq!(control[3], Term::atom("logger"));
    assert_eq!(
        message.unwrap(),
        Term::tuple(vec![
            Term::Pid(connection.self_pid()),
            Term::atom("ping"),
        ])
    );

    // Pid-addressed sends use the SEND control.
    let target = peer_pid(12);
    connection
        .send_term(target.clone(), &Term::Int(5))
        .await
        .unwrap();
    let (control, message) = parse_frame(&peer_recv_raw(&mut peer).await);
    let control = control.as_tuple().unwrap();
    assert_eq!(control[0], Term::Int(2));
    assert_eq!(control[2], Term::Pid(target));
    assert_eq!(
        message.unwrap(),
        Term::tuple(vec![Term::Pid(connection.self_pid()), Term::Int(5)])
    );
}

#[tokio::test]
async fn string_policy_decides_what_the_remote_sees() {
    let (connection, mut peer) = connect_pair().await;

    connection
        .send(
            "inbox",
            &"hi".to_string(),
            Policy::new().with_string(StringPolicy::Atom),
        )
        .await
        .unwrap();
    let (_, message) = parse_frame(&peer_recv_raw(&mut peer).await);
    let wrapped = message.unwrap();
    assert_eq!(wrapped.as_tuple().unwrap()[1], Term::atom("hi"));

    connection
        .send("inbox", &"hi".to_string(), Policy::new())
        .await
        .unwrap();
    let (_, message) = parse_frame(&peer_recv_raw(&mut peer).await);
    assert_eq!(
        message.unwrap().as_tuple().unwrap()[1],
        Term::binary(*b"hi")
    );
}

#[tokio::test]
async fn subscribers_see_frames_in_wire_order() {
    let (connection, mut peer) = connect_pair().await;
    let mut messages = connection.messages().await.unwrap();

    let target = connection.self_pid();
    for n in 0..3 {
        let frame = dist_frame(
            &send_control(&target),
            Some(&Term::tuple(vec![Term::atom("seq"), Term::Int(n)])),
        );
        peer_send_raw(&mut peer, &frame).await;
    }

    for n in 0..3 {
        let term = messages.next().await.unwrap().unwrap();
        assert_eq!(
            term,
            Term::tuple(vec![Term::atom("seq"), Term::Int(n)])
        );
    }
}

#[tokio::test]
async fn ticks_are_answered_and_invisible() {
    let (connection, mut peer) = connect_pair().await;
    let mut messages = connection.messages().await.unwrap();

    peer_send_raw(&mut peer, b"").await;

    // The transport answers with a tick of its own.
    let ack = peer_recv_raw(&mut peer).await;
    assert!(ack.is_empty());

    // Nothing reaches the subscriber.
    assert!(messages.recv(Some(Duration::from_millis(50))).await.is_none());
}

#[tokio::test]
async fn rpc_round_trips_by_reference() {
    let (connection, mut peer) = connect_pair().await;

    let call = {
        let connection = connection.clone();
        tokio::spawn(async move {
            rpc!(connection, Elixir.Kernel.is_atom(Term::atom("foo"))).await
        })
    };

    let (caller, reference, module, function, args) =
        parse_rpc_request(&peer_recv_raw(&mut peer).await);
    assert_eq!(module, "Elixir.Kernel");
    assert_eq!(function, "is_atom");
    assert_eq!(args, vec![Term::atom("foo")]);

    let reply = dist_frame(
        &send_control(&caller),
        Some(&Term::tuple(vec![reference, Term::atom("true")])),
    );
    peer_send_raw(&mut peer, &reply).await;

    assert_eq!(call.await.unwrap().unwrap(), Term::atom("true"));
}

#[tokio::test]
async fn concurrent_rpcs_get_their_own_replies() {
    let (connection, mut peer) = connect_pair().await;

    let first = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.rpc("m", "one", vec![]).await })
    };
    let (caller1, ref1, _, function1, _) = parse_rpc_request(&peer_recv_raw(&mut peer).await);
    assert_eq!(function1, "one");

    let second = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.rpc("m", "two", vec![]).await })
    };
    let (_, ref2, _, function2, _) = parse_rpc_request(&peer_recv_raw(&mut peer).await);
    assert_eq!(function2, "two");

    // Replies land in reverse order; each caller still gets its own.
    peer_send_raw(
        &mut peer,
        &dist_frame(
            &send_control(&caller1),
            Some(&Term::tuple(vec![ref2, Term::atom("for_two")])),
        ),
    )
    .await;
    peer_send_raw(
        &mut peer,
        &dist_frame(
            &send_control(&caller1),
            Some(&Term::tuple(vec![ref1, Term::atom("for_one")])),
        ),
    )
    .await;

    assert_eq!(first.await.unwrap().unwrap(), Term::atom("for_one"));
    assert_eq!(second.await.unwrap().unwrap(), Term::atom("for_two"));
}

#[tokio::test]
async fn legacy_rex_replies_serve_the_oldest_caller() {
    let (connection, mut peer) = connect_pair().await;

    let call = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.rpc("erlang", "node", vec![]).await })
    };
    let (caller, _reference, _, _, _) = parse_rpc_request(&peer_recv_raw(&mut peer).await);

    let reply = dist_frame(
        &send_control(&caller),
        Some(&Term::tuple(vec![
            Term::atom("rex"),
            Term::atom("server@box"),
        ])),
    );
    peer_send_raw(&mut peer, &reply).await;

    assert_eq!(call.await.unwrap().unwrap(), Term::atom("server@box"));
}

#[tokio::test]
async fn badrpc_replies_become_badrpc_errors() {
    let (connection, mut peer) = connect_pair().await;

    let call = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.rpc("m", "f", vec![]).await })
    };
    let (caller, reference, _, _, _) = parse_rpc_request(&peer_recv_raw(&mut peer).await);

    let badrpc = Term::tuple(vec![
        Term::atom("badrpc"),
        Term::tuple(vec![Term::atom("EXIT"), Term::atom("undef")]),
    ]);
    peer_send_raw(
        &mut peer,
        &dist_frame(
            &send_control(&caller),
            Some(&Term::tuple(vec![reference, badrpc.clone()])),
        ),
    )
    .await;

    match call.await.unwrap() {
        Err(RpcError::BadRpc(reason)) => {
            assert_eq!(
                reason,
                Term::tuple(vec![Term::atom("EXIT"), Term::atom("undef")])
            );
        }
        other => panic!("expected BadRpc, got {other:?}"),
    }
}

#[tokio::test]
async fn rpc_decoded_returns_typed_tuples() {
    let (connection, mut peer) = connect_pair().await;

    let call = {
        let connection = connection.clone();
        tokio::spawn(async move {
            connection
                .rpc_decoded::<(i64, String)>("m", "pair", vec![])
                .await
        })
    };
    let (caller, reference, _, _, _) = parse_rpc_request(&peer_recv_raw(&mut peer).await);

    let result = Term::tuple(vec![Term::Int(7), Term::binary(*b"seven")]);
    peer_send_raw(
        &mut peer,
        &dist_frame(
            &send_control(&caller),
            Some(&Term::tuple(vec![reference, result])),
        ),
    )
    .await;

    assert_eq!(call.await.unwrap().unwrap(), (7, "seven".to_string()));
}

#[tokio::test]
async fn cancelled_rpcs_release_their_reply_slot() {
    let (connection, mut peer) = connect_pair().await;

    // First call is abandoned before its reply.
    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        connection.rpc("m", "slow", vec![]),
    )
    .await;
    assert!(abandoned.is_err(), "expected the caller to give up");
    let _ = parse_rpc_request(&peer_recv_raw(&mut peer).await);

    let second = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.rpc("m", "fast", vec![]).await })
    };
    let (caller, _, _, function, _) = parse_rpc_request(&peer_recv_raw(&mut peer).await);
    assert_eq!(function, "fast");

    // A tag-only reply must reach the live caller, not the cancelled
    // one.
    peer_send_raw(
        &mut peer,
        &dist_frame(
            &send_control(&caller),
            Some(&Term::tuple(vec![Term::atom("rex"), Term::atom("ok")])),
        ),
    )
    .await;

    assert_eq!(second.await.unwrap().unwrap(), Term::atom("ok"));
}

#[tokio::test]
async fn rpc_deadlines_answer_no_response() {
    let (connection, mut peer) = connect_pair().await;

    let outcome = connection
        .rpc_with_timeout("m", "slow", vec![], Duration::from_millis(30))
        .await;
    assert_eq!(outcome, Err(RpcError::NoResponse));

    // The request still reached the wire; the remote computation is
    // not cancelled.
    let (_, _, _, function, _) = parse_rpc_request(&peer_recv_raw(&mut peer).await);
    assert_eq!(function, "slow");
}

#[tokio::test]
async fn malformed_frames_fan_an_error_and_the_stream_continues() {
    let (connection, mut peer) = connect_pair().await;
    let mut messages = connection.messages().await.unwrap();

    peer_send_raw(&mut peer, &[0xde, 0xad, 0xbe, 0xef]).await;
    match messages.next().await.unwrap() {
        Err(NodeError::ReceiveFailed(_)) => {}
        other => panic!("expected ReceiveFailed, got {other:?}"),
    }

    // The connection survives and keeps delivering.
    let frame = dist_frame(
        &send_control(&connection.self_pid()),
        Some(&Term::atom("still_alive")),
    );
    peer_send_raw(&mut peer, &frame).await;
    assert_eq!(
        messages.next().await.unwrap().unwrap(),
        Term::atom("still_alive")
    );
}

#[tokio::test]
async fn peer_disconnect_fails_in_flight_rpcs() {
    let (connection, mut peer) = connect_pair().await;

    let call = {
        let connection = connection.clone();
        tokio::spawn(async move { connection.rpc("m", "f", vec![]).await })
    };
    let _ = parse_rpc_request(&peer_recv_raw(&mut peer).await);

    drop(peer);

    match call.await.unwrap() {
        Err(RpcError::Node(NodeError::ReceiveFailed(_))) => {}
        other => panic!("expected ReceiveFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn closed_connections_reject_operations() {
    let (connection, _peer) = connect_pair().await;
    connection.close().await.unwrap();

    // The driver drains on its own schedule.
    tokio::task::yield_now().await;

    assert_eq!(
        connection.send_term("x", &Term::Int(1)).await,
        Err(NodeError::NotConnected)
    );
    match connection.rpc("m", "f", vec![]).await {
        Err(RpcError::Node(NodeError::NotConnected)) => {}
        other => panic!("expected NotConnected, got {other:?}"),
    }
}

#[tokio::test]
async fn connecting_to_a_down_node_fails_fast() {
    let node = Node::new("client@box", "monster").unwrap();

    // Grab a port the OS frees immediately.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let started = std::time::Instant::now();
    match node
        .connect_tcp(&addr.to_string(), "server@box", None)
        .await
    {
        Err(NodeError::ConnectionFailed(_)) => {}
        other => panic!("expected ConnectionFailed, got {other:?}"),
    }
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn global_registration_round_trips() {
    let node = Node::new("client@box", "monster").unwrap();
    let (local, mut peer) = duplex(1 << 16);

    // Answer the registration rpc like the :global server would.
    let peer_task = tokio::spawn(async move {
        let (caller, reference, module, function, args) =
            parse_rpc_request(&peer_recv_raw(&mut peer).await);
        assert_eq!(module, "global");
        assert_eq!(function, "register_name");
        assert_eq!(args[0], Term::atom("shell"));
        assert!(args[1].as_pid().is_some());

        let reply = dist_frame(
            &send_control(&caller),
            Some(&Term::tuple(vec![reference, Term::atom("yes")])),
        );
        peer_send_raw(&mut peer, &reply).await;
        peer
    });

    let connection = node
        .connect(FramedTransport::new(local), "server@box", Some("shell"))
        .await
        .expect("registered connect");
    assert_eq!(connection.remote_name(), "server@box");

    // A refusal surfaces as RegisterFailed.
    let _peer = peer_task.await.unwrap();
    let node2 = Node::new("other@box", "monster").unwrap();
    let (local2, mut peer2) = duplex(1 << 16);
    let refuse = tokio::spawn(async move {
        let (caller, reference, _, _, _) = parse_rpc_request(&peer_recv_raw(&mut peer2).await);
        let reply = dist_frame(
            &send_control(&caller),
            Some(&Term::tuple(vec![reference, Term::atom("no")])),
        );
        peer_send_raw(&mut peer2, &reply).await;
    });
    match node2
        .connect(FramedTransport::new(local2), "server@box", Some("shell"))
        .await
    {
        Err(NodeError::RegisterFailed(_)) => {}
        other => panic!("expected RegisterFailed, got {other:?}"),
    }
    refuse.await.unwrap();
}

#[tokio::test]
async fn inbound_calls_reach_the_handler_and_answer() {
    let (connection, mut peer) = connect_pair().await;

    let handler_pid = connection.node().make_pid();
    connection
        .register_handler(handler_pid.clone(), |args| async move {
            match args.first().and_then(Term::as_int) {
                Some(n) => Ok(Term::Int(n * 2)),
                None => Err("expected an integer".to_string()),
            }
        })
        .await
        .unwrap();

    let frame = dist_frame(
        &send_control(&handler_pid),
        Some(&Term::tuple(vec![
            Term::atom("call"),
            Term::Int(21),
            Term::Pid(peer_pid(3)),
            Term::Int(40),
        ])),
    );
    peer_send_raw(&mut peer, &frame).await;

    let (control, message) = parse_frame(&peer_recv_raw(&mut peer).await);
    let control = control.as_tuple().unwrap();
    assert_eq!(control[0], Term::Int(2));
    assert_eq!(control[2], Term::Pid(peer_pid(3)));
    // Reply rides the normal send wrapping: {self, {id, result}}.
    assert_eq!(
        message.unwrap(),
        Term::tuple(vec![
            Term::Pid(connection.self_pid()),
            Term::tuple(vec![Term::Int(21), Term::Int(80)]),
        ])
    );
}

#[tokio::test]
async fn handler_errors_and_missing_handlers_answer_error_tuples() {
    let (connection, mut peer) = connect_pair().await;

    // No handler registered for this pid at all.
    let unhandled = connection.node().make_pid();
    let frame = dist_frame(
        &send_control(&unhandled),
        Some(&Term::tuple(vec![
            Term::atom("call"),
            Term::Int(9),
            Term::Pid(peer_pid(5)),
            Term::nil(),
        ])),
    );
    peer_send_raw(&mut peer, &frame).await;

    let (_, message) = parse_frame(&peer_recv_raw(&mut peer).await);
    let wrapped = message.unwrap();
    let reply = wrapped.as_tuple().unwrap()[1].clone();
    let reply = reply.as_tuple().unwrap();
    assert_eq!(reply[0], Term::Int(9));
    let error = reply[1].as_tuple().unwrap();
    assert_eq!(error[0], Term::atom("error"));
    assert!(error[1].as_binary().is_some());
}

#[tokio::test]
async fn typed_message_streams_decode_lazily() {
    #[derive(Debug, PartialEq, serde::Deserialize)]
    struct Event {
        kind: String,
        value: i64,
    }

    let (connection, mut peer) = connect_pair().await;
    let mut events = connection.messages_as::<Event>().await.unwrap();

    let frame = dist_frame(
        &send_control(&connection.self_pid()),
        Some(&Term::map(vec![
            (Term::atom("kind"), Term::binary(*b"tick")),
            (Term::atom("value"), Term::Int(3)),
        ])),
    );
    peer_send_raw(&mut peer, &frame).await;

    assert_eq!(
        events.next().await.unwrap().unwrap(),
        Event {
            kind: "tick".into(),
            value: 3,
        }
    );
}
