use dbshift_types::value::Value;
use sha2::{Digest, Sha256};

/// Field separator inside the hash input. A 0xFF byte cannot appear in
/// UTF-8 text, so concatenated encodings cannot collide across column
/// boundaries.
const FIELD_SEPARATOR: u8 = 0xFF;

/// Deterministic hash over the canonical encodings of one row's values, in
/// column order. Both sides of a migration run this same function, so a
/// lossless mapping hashes identically on source and target.
pub fn hash_row(values: &[Value]) -> String {
    let mut buf = Vec::with_capacity(64);
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            buf.push(FIELD_SEPARATOR);
        }
        value.encode_canonical(&mut buf);
    }
    let digest = Sha256::digest(&buf);
    hex::encode(digest)
}

/// Display form of a (possibly composite) primary key, used as the `key`
/// side of a sample-hash entry.
pub fn key_display(values: &[Value]) -> String {
    let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    parts.join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_rows_hash_equal() {
        let row = vec![Value::Int(1), Value::Text("a".into())];
        assert_eq!(hash_row(&row), hash_row(&row.clone()));
    }

    #[test]
    fn field_boundaries_matter() {
        // ("ab", "c") must not collide with ("a", "bc").
        let left = vec![Value::Text("ab".into()), Value::Text("c".into())];
        let right = vec![Value::Text("a".into()), Value::Text("bc".into())];
        assert_ne!(hash_row(&left), hash_row(&right));
    }

    #[test]
    fn composite_key_display() {
        let key = vec![Value::Int(1), Value::Text("us-east".into())];
        assert_eq!(key_display(&key), "1|us-east");
    }
}
