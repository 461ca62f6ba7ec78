use num_bigint::{BigInt, BigUint, Sign};

use crate::bits::{BitReader, BitWriter};
use crate::error::CodecError;
use crate::schema::{sorted_variants, union_tag_width, Schema};
use crate::value::Value;

/// Encodes `value` against `schema` into a minimal bitstream (spec §4.1).
/// First computes the exact bit length, then writes into a buffer of
/// `ceil(bits/8)` bytes — the decoder is the exact mirror of this pass.
pub fn encode(schema: &Schema, value: &Value) -> Result<Vec<u8>, CodecError> {
    let bits = bit_length(schema, value)?;
    let mut writer = BitWriter::with_bit_capacity(bits);
    write_value(&mut writer, schema, value)?;
    Ok(writer.finish())
}

/// Decodes `bytes` against `schema`. Not self-checking beyond bounds; the
/// caller must supply the schema that produced the bytes.
pub fn decode(schema: &Schema, bytes: &[u8]) -> Result<Value, CodecError> {
    let mut reader = BitReader::new(bytes);
    read_value(&mut reader, schema)
}

/// Exact bit length `encode` will produce for `(schema, value)`.
pub fn bit_length(schema: &Schema, value: &Value) -> Result<usize, CodecError> {
    match schema {
        Schema::UInt(width) => {
            check_uint_range(value, *width)?;
            Ok(*width as usize)
        }
        Schema::Int(width) => {
            check_int_range(value, *width)?;
            Ok(*width as usize)
        }
        Schema::Nat => match value {
            Value::Nat(n) => Ok(*n as usize + 1),
            other => Err(shape_mismatch("Nat", other)),
        },
        Schema::Struct(fields) => {
            let mut total = 0usize;
            for (name, field_schema) in fields {
                let field_value = value
                    .struct_field(name)
                    .ok_or_else(|| CodecError::ShapeMismatch(format!("missing field {name}")))?;
                total += bit_length(field_schema, field_value)?;
            }
            Ok(total)
        }
        Schema::Tuple(schemas) => {
            let Value::Tuple(values) = value else {
                return Err(shape_mismatch("Tuple", value));
            };
            if values.len() != schemas.len() {
                return Err(CodecError::ShapeMismatch(format!(
                    "tuple expects {} elements, value has {}",
                    schemas.len(),
                    values.len()
                )));
            }
            schemas
                .iter()
                .zip(values)
                .try_fold(0usize, |acc, (s, v)| Ok(acc + bit_length(s, v)?))
        }
        Schema::Vector { size, schema: elem } => {
            let Value::Vector(values) = value else {
                return Err(shape_mismatch("Vector", value));
            };
            if values.len() != *size {
                return Err(CodecError::VectorLengthMismatch {
                    expected: *size,
                    actual: values.len(),
                });
            }
            values
                .iter()
                .try_fold(0usize, |acc, v| Ok(acc + bit_length(elem, v)?))
        }
        Schema::List(elem) => {
            let Value::List(values) = value else {
                return Err(shape_mismatch("List", value));
            };
            let mut total = 1usize; // terminating zero tag
            for v in values {
                total += 1 + bit_length(elem, v)?;
            }
            Ok(total)
        }
        Schema::Map { key, value: vschema } => {
            let Value::Map(pairs) = value else {
                return Err(shape_mismatch("Map", value));
            };
            let mut total = 1usize;
            for (k, v) in pairs {
                total += 1 + bit_length(key, k)? + bit_length(vschema, v)?;
            }
            Ok(total)
        }
        Schema::Union(variants) => {
            let (tag, inner_schema, inner_value) = resolve_union(variants, value)?;
            let _ = tag;
            Ok(union_tag_width(variants.len()) as usize + bit_length(inner_schema, inner_value)?)
        }
        Schema::Str => {
            let Value::Str(s) = value else {
                return Err(shape_mismatch("Str", value));
            };
            Ok(s.len() * 9 + 1)
        }
    }
}

fn write_value(writer: &mut BitWriter, schema: &Schema, value: &Value) -> Result<(), CodecError> {
    match schema {
        Schema::UInt(width) => {
            check_uint_range(value, *width)?;
            match value {
                Value::UInt(v) => writer.write_bits_u64(*v, *width),
                Value::BigUInt(v) => writer.write_bits_uint(v, *width),
                other => return Err(shape_mismatch("UInt", other)),
            }
        }
        Schema::Int(width) => {
            check_int_range(value, *width)?;
            let repr = int_two_complement(value, *width)?;
            writer.write_bits_uint(&repr, *width);
        }
        Schema::Nat => {
            let Value::Nat(n) = value else {
                return Err(shape_mismatch("Nat", value));
            };
            for _ in 0..*n {
                writer.write_bit(true);
            }
            writer.write_bit(false);
        }
        Schema::Struct(fields) => {
            for (name, field_schema) in fields {
                let field_value = value
                    .struct_field(name)
                    .ok_or_else(|| CodecError::ShapeMismatch(format!("missing field {name}")))?;
                write_value(writer, field_schema, field_value)?;
            }
        }
        Schema::Tuple(schemas) => {
            let Value::Tuple(values) = value else {
                return Err(shape_mismatch("Tuple", value));
            };
            if values.len() != schemas.len() {
                return Err(CodecError::ShapeMismatch(format!(
                    "tuple expects {} elements, value has {}",
                    schemas.len(),
                    values.len()
                )));
            }
            for (s, v) in schemas.iter().zip(values) {
                write_value(writer, s, v)?;
            }
        }
        Schema::Vector { size, schema: elem } => {
            let Value::Vector(values) = value else {
                return Err(shape_mismatch("Vector", value));
            };
            if values.len() != *size {
                return Err(CodecError::VectorLengthMismatch {
                    expected: *size,
                    actual: values.len(),
                });
            }
            for v in values {
                write_value(writer, elem, v)?;
            }
        }
        Schema::List(elem) => {
            let Value::List(values) = value else {
                return Err(shape_mismatch("List", value));
            };
            for v in values {
                writer.write_bit(true);
                write_value(writer, elem, v)?;
            }
            writer.write_bit(false);
        }
        Schema::Map { key, value: vschema } => {
            let Value::Map(pairs) = value else {
                return Err(shape_mismatch("Map", value));
            };
            for (k, v) in pairs {
                writer.write_bit(true);
                write_value(writer, key, k)?;
                write_value(writer, vschema, v)?;
            }
            writer.write_bit(false);
        }
        Schema::Union(variants) => {
            let (tag, inner_schema, inner_value) = resolve_union(variants, value)?;
            let sorted = sorted_variants(variants);
            let ordinal = sorted
                .iter()
                .position(|(name, _)| name == tag)
                .ok_or_else(|| CodecError::UnknownVariant(tag.clone()))?;
            writer.write_bits_u64(ordinal as u64, union_tag_width(variants.len()));
            write_value(writer, inner_schema, inner_value)?;
        }
        Schema::Str => {
            let Value::Str(s) = value else {
                return Err(shape_mismatch("Str", value));
            };
            for byte in s.as_bytes() {
                writer.write_bit(true);
                writer.write_bits_u64(u64::from(*byte), 8);
            }
            writer.write_bit(false);
        }
    }
    Ok(())
}

fn read_value(reader: &mut BitReader, schema: &Schema) -> Result<Value, CodecError> {
    Ok(match schema {
        Schema::UInt(width) => {
            if *width <= 64 {
                Value::UInt(reader.read_bits_u64(*width)?)
            } else {
                Value::BigUInt(reader.read_bits_uint(*width)?)
            }
        }
        Schema::Int(width) => {
            let magnitude = reader.read_bits_uint(*width)?;
            from_two_complement(&magnitude, *width)
        }
        Schema::Nat => {
            let mut n = 0u64;
            while reader.read_bit()? {
                n += 1;
            }
            Value::Nat(n)
        }
        Schema::Struct(fields) => {
            let mut out = Vec::with_capacity(fields.len());
            for (name, field_schema) in fields {
                out.push((name.clone(), read_value(reader, field_schema)?));
            }
            Value::Struct(out)
        }
        Schema::Tuple(schemas) => {
            let mut out = Vec::with_capacity(schemas.len());
            for s in schemas {
                out.push(read_value(reader, s)?);
            }
            Value::Tuple(out)
        }
        Schema::Vector { size, schema: elem } => {
            let mut out = Vec::with_capacity(*size);
            for _ in 0..*size {
                out.push(read_value(reader, elem)?);
            }
            Value::Vector(out)
        }
        Schema::List(elem) => {
            let mut out = Vec::new();
            while reader.read_bit()? {
                out.push(read_value(reader, elem)?);
            }
            Value::List(out)
        }
        Schema::Map { key, value } => {
            let mut out = Vec::new();
            while reader.read_bit()? {
                let k = read_value(reader, key)?;
                let v = read_value(reader, value)?;
                out.push((k, v));
            }
            Value::Map(out)
        }
        Schema::Union(variants) => {
            if variants.is_empty() {
                return Err(CodecError::EmptyUnion);
            }
            let sorted = sorted_variants(variants);
            let ordinal = reader.read_bits_u64(union_tag_width(variants.len()))? as usize;
            let (name, variant_schema) = sorted
                .get(ordinal)
                .ok_or_else(|| CodecError::UnknownVariant(format!("ordinal {ordinal}")))?;
            let inner = read_value(reader, variant_schema)?;
            Value::Union {
                tag: name.clone(),
                value: Box::new(inner),
            }
        }
        Schema::Str => {
            let mut bytes = Vec::new();
            while reader.read_bit()? {
                bytes.push(reader.read_bits_u64(8)? as u8);
            }
            Value::Str(String::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?)
        }
    })
}

fn shape_mismatch(expected: &str, value: &Value) -> CodecError {
    CodecError::ShapeMismatch(format!("expected {expected}-shaped value, got {value:?}"))
}

/// Looks up the union variant named by `value`'s tag and returns
/// `(tag, variant_schema, inner_value)`. Handles the struct/non-struct
/// asymmetry in spec §4.1's "union value convention" at the boundary: for a
/// `Struct` variant the whole record is both the union payload and the
/// struct payload (`inner_value` is `value` itself reinterpreted), while for
/// any other variant the payload lives in `Value::Union.value`. Since
/// `Value::Union` always carries its payload in `.value` in this
/// implementation (see SPEC_FULL.md §13.3), both cases resolve identically
/// here; the asymmetry only matters for the foreign `{$, value}` record
/// convention this crate does not need to model directly.
fn resolve_union<'a>(
    variants: &'a [(String, Schema)],
    value: &'a Value,
) -> Result<(&'a String, &'a Schema, &'a Value), CodecError> {
    if variants.is_empty() {
        return Err(CodecError::EmptyUnion);
    }
    let Value::Union { tag, value: inner } = value else {
        return Err(shape_mismatch("Union", value));
    };
    let (name, schema) = variants
        .iter()
        .find(|(name, _)| name == tag)
        .ok_or_else(|| CodecError::UnknownVariant(tag.clone()))?;
    Ok((name, schema, inner))
}

fn check_uint_range(value: &Value, width: u32) -> Result<(), CodecError> {
    match value {
        Value::UInt(v) => {
            // A native `u64` can only ever represent widths up to 64; wider
            // schemas must carry their value as `Value::BigUInt` instead
            // (SPEC_FULL.md §13.4). `write_bits_u64`'s shift loop can't
            // safely handle widths beyond 64, so reject here rather than
            // let it silently overflow.
            if width > 64 {
                return Err(CodecError::OutOfRange { width });
            }
            if width < 64 && *v >= (1u64 << width) {
                return Err(CodecError::OutOfRange { width });
            }
            Ok(())
        }
        Value::BigUInt(v) => {
            if v.bits() > u64::from(width) {
                return Err(CodecError::OutOfRange { width });
            }
            Ok(())
        }
        other => Err(shape_mismatch("UInt", other)),
    }
}

fn check_int_range(value: &Value, width: u32) -> Result<(), CodecError> {
    int_two_complement(value, width).map(|_| ())
}

/// Two's-complement bit pattern for a signed value of `width` bits, or an
/// `OutOfRange`/shape error if `value` does not fit.
fn int_two_complement(value: &Value, width: u32) -> Result<BigUint, CodecError> {
    if width == 0 {
        return Err(CodecError::OutOfRange { width });
    }
    let as_bigint: BigInt = match value {
        Value::Int(v) => BigInt::from(*v),
        Value::BigInt(v) => v.clone(),
        other => return Err(shape_mismatch("Int", other)),
    };
    let half = BigInt::from(1) << (width - 1);
    if as_bigint < -half.clone() || as_bigint >= half {
        return Err(CodecError::OutOfRange { width });
    }
    let modulus = BigInt::from(1) << width;
    let wrapped = if as_bigint.sign() == Sign::Minus {
        &as_bigint + &modulus
    } else {
        as_bigint
    };
    let (_, magnitude) = wrapped.into_parts();
    Ok(magnitude)
}

fn from_two_complement(magnitude: &BigUint, width: u32) -> Value {
    if width == 0 {
        return Value::Int(0);
    }
    let half = BigUint::from(1u32) << (width - 1);
    let signed: BigInt = if width > 0 && *magnitude >= half {
        BigInt::from(magnitude.clone()) - (BigInt::from(1) << width)
    } else {
        BigInt::from(magnitude.clone())
    };
    if width <= 64 {
        Value::Int(signed.try_into().unwrap_or_default())
    } else {
        Value::BigInt(signed)
    }
}
