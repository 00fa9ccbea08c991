//! Round-trip coverage across every term variant.

use girder_etf::{decode, encode, Closure, EtfBuffer, Fun, LegacyClosure, Pid, Port, Reference, Term};

fn pid(num: u32) -> Pid {
    Pid {
        node: "peer@host".into(),
        num,
        serial: 0,
        creation: 4,
    }
}

fn corpus() -> Vec<Term> {
    vec![
        Term::Int(0),
        Term::Int(255),
        Term::Int(-7),
        Term::Int(1 << 40),
        Term::Int(i64::MIN),
        Term::Float(0.0),
        Term::Float(-13.25),
        Term::Float(f64::MAX),
        Term::atom("ok"),
        Term::atom("with spaces and ünïcode"),
        Term::String("charlist".into()),
        Term::binary(*b""),
        Term::binary(vec![0, 1, 2, 254, 255]),
        Term::Bitstring(vec![0b1111_0000], 4),
        Term::Tuple(vec![]),
        Term::tuple(vec![Term::atom("error"), Term::binary(*b"reason")]),
        Term::nil(),
        Term::list(vec![Term::Int(1), Term::atom("two"), Term::Float(3.0)]),
        Term::map(vec![
            (Term::atom("name"), Term::binary(*b"bob")),
            (Term::Int(1), Term::list(vec![Term::Int(2)])),
            (
                Term::tuple(vec![Term::atom("composite"), Term::Int(9)]),
                Term::nil(),
            ),
        ]),
        Term::Pid(pid(77)),
        Term::Port(Port {
            node: "peer@host".into(),
            id: 5,
            creation: 4,
        }),
        Term::Port(Port {
            node: "peer@host".into(),
            id: u64::MAX,
            creation: 4,
        }),
        Term::Reference(Reference {
            node: "peer@host".into(),
            creation: 4,
            ids: vec![1, 2, 3, 4, 5],
        }),
        Term::Fun(Fun::Export {
            module: "Elixir.Enum".into(),
            function: "count".into(),
            arity: 1,
        }),
        Term::Fun(Fun::Closure(Box::new(Closure {
            arity: 2,
            uniq: *b"0123456789abcdef",
            index: 12,
            module: "Elixir.Demo".into(),
            old_index: 12,
            old_uniq: 66_102_930,
            pid: pid(8),
            free: vec![Term::map(vec![(Term::atom("k"), Term::Int(1))])],
        }))),
        Term::Fun(Fun::Legacy(Box::new(LegacyClosure {
            pid: pid(9),
            module: "demo".into(),
            index: 1,
            uniq: 99,
            free: vec![Term::atom("captured")],
        }))),
        // Deep nesting.
        Term::tuple(vec![Term::list(vec![Term::map(vec![(
            Term::atom("deep"),
            Term::tuple(vec![Term::Int(1), Term::nil()]),
        )])])]),
    ]
}

#[test]
fn every_variant_round_trips() {
    for term in corpus() {
        let mut buf = EtfBuffer::versioned();
        encode(&term, &mut buf).expect("encode");
        assert_eq!(buf.as_slice()[0], 131);

        let decoded = decode(&mut buf).expect("decode");
        assert_eq!(decoded, term, "round-trip mismatch for {term:?}");
        assert_eq!(buf.remaining(), 0, "trailing bytes after {term:?}");
    }
}

#[test]
fn skip_term_agrees_with_decode_lengths() {
    for term in corpus() {
        let mut buf = EtfBuffer::versioned();
        encode(&term, &mut buf).expect("encode");
        buf.consume_version();
        buf.skip_term().expect("skip");
        assert_eq!(buf.remaining(), 0, "skip length mismatch for {term:?}");
    }
}

#[test]
fn re_encode_is_byte_stable() {
    for term in corpus() {
        let mut first = EtfBuffer::versioned();
        encode(&term, &mut first).expect("encode");
        let bytes = first.as_slice().to_vec();

        let decoded = decode(&mut first).expect("decode");
        let mut second = EtfBuffer::versioned();
        encode(&decoded, &mut second).expect("re-encode");
        assert_eq!(second.as_slice(), &bytes[..], "unstable bytes for {term:?}");
    }
}
