use bytes::Bytes;
use proptest::prelude::*;
use rstest::rstest;

use super::*;

fn decode_one(input: &[u8]) -> Value {
    let (value, rest) = decode(input).expect("input should decode");
    assert!(rest.is_empty(), "unexpected trailing bytes: {rest:?}");
    value
}

#[test]
fn decodes_each_scalar_tag() {
    assert_eq!(decode_one(b"5:hello,"), Value::Str(Bytes::from("hello")));
    assert_eq!(decode_one(b"2:42#"), Value::Int(42));
    assert_eq!(decode_one(b"2:-7#"), Value::Int(-7));
    assert_eq!(decode_one(b"3:1.5^"), Value::Float(1.5));
    assert_eq!(decode_one(b"4:true!"), Value::Bool(true));
    assert_eq!(decode_one(b"5:false!"), Value::Bool(false));
    assert_eq!(decode_one(b"0:~"), Value::Null);
}

#[test]
fn decodes_nested_containers() {
    let value = decode_one(b"19:5:hello,5:12345#0:~]");
    assert_eq!(
        value,
        Value::List(vec![
            Value::Str(Bytes::from("hello")),
            Value::Int(12345),
            Value::Null,
        ])
    );

    let value = decode_one(b"20:4:PATH,1:/,3:two,0:,}");
    assert_eq!(
        value,
        Value::Dict(vec![
            ("PATH".into(), Value::Str(Bytes::from("/"))),
            ("two".into(), Value::Str(Bytes::new())),
        ])
    );
}

#[test]
fn decode_returns_remainder() {
    let (value, rest) = decode(b"1:a,2:bc,").expect("first value should decode");
    assert_eq!(value, Value::Str(Bytes::from("a")));
    assert_eq!(rest, b"2:bc,");
}

#[test]
fn duplicate_dict_keys_take_last_value() {
    let value = decode_one(b"23:1:k,1:a,1:x,0:,1:k,1:b,}");
    assert_eq!(
        value,
        Value::Dict(vec![
            ("k".into(), Value::Str(Bytes::from("b"))),
            ("x".into(), Value::Str(Bytes::new())),
        ])
    );
}

#[rstest]
#[case::empty_length(b":a,".as_slice(), TNetstringError::MalformedLength)]
#[case::alpha_length(b"x:a,".as_slice(), TNetstringError::MalformedLength)]
#[case::signed_length(b"-1:a,".as_slice(), TNetstringError::MalformedLength)]
#[case::oversized_length(
    b"1234567890:a,".as_slice(),
    TNetstringError::MalformedLength
)]
#[case::no_terminator(b"5".as_slice(), TNetstringError::UnterminatedLength)]
#[case::truncated(b"5:ab".as_slice(), TNetstringError::Truncated { need: 6, have: 2 })]
#[case::missing_tag(b"2:ab".as_slice(), TNetstringError::Truncated { need: 3, have: 2 })]
#[case::unknown_tag(b"1:a?".as_slice(), TNetstringError::UnknownTag { tag: b'?' })]
#[case::bad_integer(b"2:4x#".as_slice(), TNetstringError::InvalidInteger)]
#[case::junk_integer(b"3:4x5#".as_slice(), TNetstringError::InvalidInteger)]
#[case::junk_float(b"3:1..^".as_slice(), TNetstringError::InvalidFloat)]
#[case::junk_boolean(b"3:yes!".as_slice(), TNetstringError::InvalidBoolean)]
#[case::nonempty_null(b"1:x~".as_slice(), TNetstringError::NonEmptyNull)]
fn malformed_input_reports_precise_errors(
    #[case] input: &[u8],
    #[case] expected: TNetstringError,
) {
    assert_eq!(decode(input).expect_err("input is malformed"), expected);
}

#[test]
fn dict_key_must_be_a_string() {
    let err = decode(b"7:1:1#0:,}").expect_err("integer key is invalid");
    assert_eq!(err, TNetstringError::NonStringKey { found: "integer" });
}

#[test]
fn dict_key_without_value_is_rejected() {
    let err = decode(b"4:1:k,}").expect_err("dangling key is invalid");
    assert_eq!(err, TNetstringError::MissingDictValue { key: "k".into() });
}

#[test]
fn encodes_known_fixtures() {
    assert_eq!(encode(&Value::Str(Bytes::from("hello"))), b"5:hello,");
    assert_eq!(encode(&Value::Bool(false)), b"5:false!");
    assert_eq!(encode(&Value::Null), b"0:~");
    assert_eq!(
        encode(&Value::Dict(vec![(
            "PATH".into(),
            Value::Str(Bytes::from("/")),
        )])),
        b"11:4:PATH,1:/,}"
    );
}

fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        proptest::collection::vec(any::<u8>(), 0..32)
            .prop_map(|bytes| Value::Str(Bytes::from(bytes))),
        any::<i128>().prop_map(Value::Int),
        any::<f64>()
            .prop_filter("finite floats only", |f| f.is_finite())
            .prop_map(Value::Float),
        any::<bool>().prop_map(Value::Bool),
        Just(Value::Null),
    ];
    leaf.prop_recursive(3, 24, 6, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::List),
            proptest::collection::hash_map("[a-zA-Z0-9_-]{0,12}", inner, 0..6)
                .prop_map(|map| Value::Dict(map.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn round_trips_every_tag_type(value in value_strategy()) {
        let encoded = encode(&value);
        let (decoded, rest) = decode(&encoded).expect("encoded value should decode");
        prop_assert_eq!(decoded, value);
        prop_assert!(rest.is_empty());
    }
}
