//! Stable hash codes for set elements.

/// CRC32 (IEEE) of the string as a non-negative integer
pub fn string(value: &str) -> i64 {
    i64::from(crc32fast::hash(value.as_bytes())).abs()
}

/// Hashes the concatenation `"a-b-c-"` of the parts and renders it as a decimal string
pub fn strings<S: AsRef<str>>(parts: &[S]) -> String {
    let joined = parts
        .iter()
        .map(|part| format!("{}-", part.as_ref()))
        .collect::<String>();
    string(joined.as_str()).to_string()
}
