//! Identifier gate.
//!
//! Table and column names cannot be bound as statement parameters, so they
//! are embedded into SQL text. Every such name goes through [`validate`]
//! and is then wrapped in the dialect's quote character by [`quote`]. No
//! other code path may splice caller input into SQL.

use crate::error::{IdentifierKind, ValidationError};

/// Longest logical table name. The full `u<owner>_` prefix fits beside it
/// for owner ids of up to eleven digits; larger ids lower the limit to
/// whatever [`MAX_IDENTIFIER_LEN`] leaves after the prefix.
pub const MAX_TABLE_NAME_LEN: usize = 50;

/// Longest column or physical table name (PostgreSQL's identifier limit).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Column names that collide with engine row identifiers.
const RESERVED_COLUMN_NAMES: &[&str] = &["rowid", "oid", "_rowid_"];

/// Prefix of the service's own metadata tables.
pub const RESERVED_TABLE_PREFIX: &str = "tabula_";

/// Validate a bare identifier.
///
/// Accepts ASCII letters, digits and underscore. Rejects empty names,
/// purely numeric names, over-long names and reserved column names.
pub fn validate(kind: IdentifierKind, name: &str) -> Result<&str, ValidationError> {
    let reject = |reason: &str| ValidationError::InvalidIdentifier {
        kind,
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(reject("name must not be empty"));
    }

    let max_len = match kind {
        IdentifierKind::Table => MAX_TABLE_NAME_LEN,
        IdentifierKind::Column | IdentifierKind::Physical => MAX_IDENTIFIER_LEN,
    };
    if name.len() > max_len {
        return Err(reject(&format!("name must be at most {} characters", max_len)));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(reject("only letters, digits and underscore are allowed"));
    }

    if name.chars().all(|c| c.is_ascii_digit()) {
        return Err(reject("name cannot be purely numeric"));
    }

    if kind == IdentifierKind::Column
        && RESERVED_COLUMN_NAMES
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(name))
    {
        return Err(reject("name is reserved for the row identifier"));
    }

    if kind == IdentifierKind::Table
        && name
            .get(..RESERVED_TABLE_PREFIX.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(RESERVED_TABLE_PREFIX))
    {
        return Err(reject("names starting with 'tabula_' are reserved"));
    }

    Ok(name)
}

/// Validate and quote an identifier with the given quote character.
pub fn quote(quote_char: char, kind: IdentifierKind, name: &str) -> Result<String, ValidationError> {
    let name = validate(kind, name)?;
    // Validated names never contain the quote character.
    Ok(format!("{q}{name}{q}", q = quote_char))
}

/// Case-insensitive identifier comparison, matching how both engines
/// resolve quoted names that differ only in case on SQLite.
pub fn same_identifier(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}
