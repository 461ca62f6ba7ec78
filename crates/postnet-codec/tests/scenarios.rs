use postnet_codec::{bit_length, decode, encode, Schema, Value};

/// Spec §8 scenario 1: a 3-field struct encodes to exactly 6 bytes and
/// round-trips.
#[test]
fn struct_size_and_round_trip() {
    let schema = Schema::Struct(vec![
        ("x".to_string(), Schema::UInt(20)),
        ("y".to_string(), Schema::UInt(20)),
        ("dir".to_string(), Schema::UInt(2)),
    ]);
    let value = Value::Struct(vec![
        ("x".to_string(), Value::UInt(123_456)),
        ("y".to_string(), Value::UInt(654_321)),
        ("dir".to_string(), Value::UInt(3)),
    ]);

    let bits = bit_length(&schema, &value).unwrap();
    assert_eq!(bits, 42);

    let bytes = encode(&schema, &value).unwrap();
    assert_eq!(bytes.len(), 6);

    let decoded = decode(&schema, &bytes).unwrap();
    assert_eq!(decoded, value);
}

/// Spec §8 scenario 2: union ordinals are assigned by alphabetical sort of
/// variant names, not declaration order.
#[test]
fn union_ordinal_follows_alphabetical_sort() {
    let schema = Schema::Union(vec![
        ("z".to_string(), Schema::UInt(1)),
        ("a".to_string(), Schema::UInt(1)),
    ]);

    let a = Value::Union {
        tag: "a".to_string(),
        value: Box::new(Value::UInt(1)),
    };
    let bytes_a = encode(&schema, &a).unwrap();
    assert_eq!(bytes_a[0] & 0b1, 0);

    let z = Value::Union {
        tag: "z".to_string(),
        value: Box::new(Value::UInt(1)),
    };
    let bytes_z = encode(&schema, &z).unwrap();
    assert_eq!(bytes_z[0] & 0b1, 1);

    assert_eq!(decode(&schema, &bytes_a).unwrap(), a);
    assert_eq!(decode(&schema, &bytes_z).unwrap(), z);
}

#[test]
fn single_variant_union_has_zero_width_tag() {
    let schema = Schema::Union(vec![("only".to_string(), Schema::UInt(8))]);
    let value = Value::Union {
        tag: "only".to_string(),
        value: Box::new(Value::UInt(200)),
    };
    assert_eq!(bit_length(&schema, &value).unwrap(), 8);
}

#[test]
fn empty_union_is_rejected() {
    let schema = Schema::Union(vec![]);
    let value = Value::Union {
        tag: "x".to_string(),
        value: Box::new(Value::UInt(0)),
    };
    assert!(encode(&schema, &value).is_err());
}

#[test]
fn list_round_trips_and_terminates() {
    let schema = Schema::list(Schema::UInt(8));
    let value = Value::List(vec![Value::UInt(1), Value::UInt(2), Value::UInt(3)]);
    let bytes = encode(&schema, &value).unwrap();
    // 3 * (1 tag + 8 bits) + 1 terminator = 28 bits -> 4 bytes
    assert_eq!(bytes.len(), 4);
    assert_eq!(decode(&schema, &bytes).unwrap(), value);
}

#[test]
fn vector_length_mismatch_is_an_error() {
    let schema = Schema::vector(3, Schema::UInt(8));
    let value = Value::Vector(vec![Value::UInt(1), Value::UInt(2)]);
    assert!(encode(&schema, &value).is_err());
}

#[test]
fn string_is_a_list_of_bytes() {
    let schema = Schema::Str;
    let value = Value::Str("hi".to_string());
    let bytes = encode(&schema, &value).unwrap();
    assert_eq!(decode(&schema, &bytes).unwrap(), value);
}

#[test]
fn signed_round_trip_negative_and_positive() {
    let schema = Schema::Int(9);
    for v in [-256i64, -1, 0, 1, 255] {
        let value = Value::Int(v);
        let bytes = encode(&schema, &value).unwrap();
        assert_eq!(decode(&schema, &bytes).unwrap(), value);
    }
}

#[test]
fn wide_integers_use_arbitrary_precision() {
    use num_bigint::BigUint;

    let schema = Schema::UInt(80);
    let big = BigUint::from(1u128 << 70);
    let value = Value::BigUInt(big.clone());
    let bytes = encode(&schema, &value).unwrap();
    assert_eq!(decode(&schema, &bytes).unwrap(), value);
}

#[test]
fn nat_is_unary() {
    let schema = Schema::Nat;
    let value = Value::Nat(5);
    let bits = bit_length(&schema, &value).unwrap();
    assert_eq!(bits, 6);
    let bytes = encode(&schema, &value).unwrap();
    assert_eq!(decode(&schema, &bytes).unwrap(), value);
}

#[test]
fn map_round_trips() {
    let schema = Schema::map(Schema::UInt(8), Schema::UInt(8));
    let value = Value::Map(vec![
        (Value::UInt(1), Value::UInt(10)),
        (Value::UInt(2), Value::UInt(20)),
    ]);
    let bytes = encode(&schema, &value).unwrap();
    assert_eq!(decode(&schema, &bytes).unwrap(), value);
}
