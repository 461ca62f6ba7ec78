use num_bigint::{BigInt, BigUint};

/// A decoded (or to-be-encoded) value matching some [`crate::Schema`].
///
/// Integers narrower than 65 bits use native `u64`/`i64`; wider ones use
/// arbitrary-precision `BigUint`/`BigInt` (see SPEC_FULL.md §13.4 for why the
/// native/arbitrary-precision line sits at 64 bits rather than spec.md's
/// 53-bit figure).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    UInt(u64),
    BigUInt(BigUint),
    Int(i64),
    BigInt(BigInt),
    Nat(u64),
    /// Field order need not match declaration order here; `encode` looks
    /// fields up by name against the schema's declared order.
    Struct(Vec<(String, Value)>),
    Tuple(Vec<Value>),
    Vector(Vec<Value>),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Union { tag: String, value: Box<Value> },
    Str(String),
}

impl Value {
    pub fn struct_field(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(fields) => fields.iter().find(|(n, _)| n == name).map(|(_, v)| v),
            _ => None,
        }
    }
}
