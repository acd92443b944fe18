//! # Engine Constants
//!
//! Hardcoded limits and defaults for the modgraph engine.
//!
//! These are compiled into the binary and immutable at runtime.

/// Maximum length of a generated record identifier.
///
/// Generated names are `{model}_{seed}_r{N}`; the normalized seed is
/// truncated so the whole name fits this bound.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Characters reserved for the disambiguation suffix (`_r` plus a counter).
///
/// A counter above 10^8 candidates would indicate a pathological corpus,
/// so eight digits of headroom is enough.
pub const IDENTIFIER_SUFFIX_RESERVE: usize = 10;

/// Display width of a record field digest on the command line.
pub const DIGEST_WIDTH: usize = 80;

/// Maximum nesting depth accepted by the expression parser.
///
/// All parsing must be computationally bounded; this prevents stack
/// exhaustion from deeply nested expressions.
pub const MAX_EXPR_DEPTH: usize = 64;

/// Bookkeeping fields never exported from the record store.
pub const EXCLUDED_BOOKKEEPING_FIELDS: [&str; 4] =
    ["create_uid", "write_uid", "create_date", "write_date"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_reserve_fits_identifier_length() {
        assert!(IDENTIFIER_SUFFIX_RESERVE < MAX_IDENTIFIER_LENGTH);
    }
}
