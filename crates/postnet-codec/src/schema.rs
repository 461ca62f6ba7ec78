/// A schema value (`Packed` in spec terms): a tagged recursive description of
/// a bit-level encoding. Mirrors the variants in spec §4.1 directly rather
/// than modeling them through inheritance, per spec §9 "dynamic dispatch in
/// the codec".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schema {
    /// Unsigned integer, `n` bits wide.
    UInt(u32),
    /// Signed two's-complement integer, `n` bits wide.
    Int(u32),
    /// Unary natural number: `n` one-bits then a zero-bit.
    Nat,
    /// Ordered fields, encoded in declared iteration order.
    Struct(Vec<(String, Schema)>),
    /// Fixed heterogeneous sequence.
    Tuple(Vec<Schema>),
    /// Fixed-length homogeneous sequence.
    Vector { size: usize, schema: Box<Schema> },
    /// Cons-list encoded homogeneous sequence (variable length).
    List(Box<Schema>),
    /// Cons-list encoded sequence of key/value pairs.
    Map { key: Box<Schema>, value: Box<Schema> },
    /// Tagged union. Variants are assigned ordinals by alphabetical sort of
    /// their names — this ordering is part of the wire contract.
    Union(Vec<(String, Schema)>),
    /// UTF-8 string, encoded as a `List` of 8-bit units.
    Str,
}

impl Schema {
    pub fn vector(size: usize, schema: Schema) -> Self {
        Self::Vector {
            size,
            schema: Box::new(schema),
        }
    }

    pub fn list(schema: Schema) -> Self {
        Self::List(Box::new(schema))
    }

    pub fn map(key: Schema, value: Schema) -> Self {
        Self::Map {
            key: Box::new(key),
            value: Box::new(value),
        }
    }
}

/// Variants of a [`Schema::Union`] sorted alphabetically by name — the order
/// ordinals are assigned in. This sort is part of the wire contract (spec
/// §4.1) so it is computed fresh at every encode/decode rather than cached,
/// keeping `Schema` a plain value type.
pub(crate) fn sorted_variants(variants: &[(String, Schema)]) -> Vec<&(String, Schema)> {
    let mut sorted: Vec<&(String, Schema)> = variants.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    sorted
}

/// `ceil(log2(variant_count))`, `0` when there is a single variant.
pub(crate) fn union_tag_width(variant_count: usize) -> u32 {
    if variant_count <= 1 {
        return 0;
    }
    let span = (variant_count - 1) as u64;
    u64::BITS - span.leading_zeros()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_width_matches_spec_examples() {
        assert_eq!(union_tag_width(0), 0);
        assert_eq!(union_tag_width(1), 0);
        assert_eq!(union_tag_width(2), 1);
        assert_eq!(union_tag_width(3), 2);
        assert_eq!(union_tag_width(4), 2);
        assert_eq!(union_tag_width(5), 3);
    }

    #[test]
    fn variants_sort_alphabetically() {
        let variants = vec![
            ("z".to_string(), Schema::UInt(1)),
            ("a".to_string(), Schema::UInt(1)),
        ];
        let sorted = sorted_variants(&variants);
        assert_eq!(sorted[0].0, "a");
        assert_eq!(sorted[1].0, "z");
    }
}
