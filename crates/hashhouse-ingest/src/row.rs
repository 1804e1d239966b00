//! Row shape and line parsing.
//!
//! Both sources produce the same [`Row`]. Range responses carry only the hash
//! suffix (the key supplies the first five characters); file records carry
//! the full hash. Hashes are normalised to uppercase so every row lands in
//! one of the `00`..`FF` partitions.

use crate::error::ParseError;
use crate::keyspace::{KeyspaceUnit, KEY_WIDTH};

/// Separator between hash (or suffix) and count.
pub const FIELD_DELIMITER: char = ':';

/// Length of a full SHA-1 hash in hex characters.
pub const HASH_LEN: usize = 40;

/// Length of the suffix a range response carries for each hash.
pub const SUFFIX_LEN: usize = HASH_LEN - KEY_WIDTH;

/// One record destined for the partitioned table.
///
/// `hash` is 40 uppercase hex characters, `partition_prefix` is always
/// `hash[0..2]` and `prefix` is `hash[0..5]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub partition_prefix: String,
    pub prefix: String,
    pub hash: String,
    pub count: i32,
}

impl Row {
    /// Build a row from a complete hash, deriving both prefixes.
    pub fn from_hash(mut hash: String, count: i32) -> Result<Self, ParseError> {
        if !is_hex_of_len(&hash, HASH_LEN) {
            return Err(ParseError::InvalidHash(hash));
        }
        hash.make_ascii_uppercase();
        Ok(Self {
            partition_prefix: hash[..2].to_string(),
            prefix: hash[..KEY_WIDTH].to_string(),
            hash,
            count,
        })
    }
}

/// Parse one `suffix:count` line from the range response for `unit`.
pub fn parse_range_line(unit: KeyspaceUnit, line: &str) -> Result<Row, ParseError> {
    let (suffix, count) = split_fields(line)?;
    let count = parse_count(count)?;
    if !is_hex_of_len(suffix, SUFFIX_LEN) {
        return Err(ParseError::InvalidHash(suffix.to_string()));
    }
    Row::from_hash(format!("{}{}", unit, suffix), count)
}

/// Parse one `full_hash:count` line from a local file.
pub fn parse_record_line(line: &str) -> Result<Row, ParseError> {
    let (hash, count) = split_fields(line)?;
    let count = parse_count(count)?;
    Row::from_hash(hash.to_string(), count)
}

fn is_hex_of_len(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn split_fields(line: &str) -> Result<(&str, &str), ParseError> {
    let line = line.trim();
    let mut fields = line.split(FIELD_DELIMITER);
    match (fields.next(), fields.next(), fields.next()) {
        (Some(hash), Some(count), None) => Ok((hash, count)),
        _ => Err(ParseError::FieldCount(line.split(FIELD_DELIMITER).count())),
    }
}

fn parse_count(field: &str) -> Result<i32, ParseError> {
    match field.parse::<i32>() {
        Ok(count) if count >= 0 => Ok(count),
        _ => Err(ParseError::InvalidCount(field.to_string())),
    }
}
