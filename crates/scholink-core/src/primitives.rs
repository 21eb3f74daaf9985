//! # Primitives
//!
//! Hardcoded runtime constants for the scholink core.
//!
//! These values are compiled into the binary and are immutable at runtime.

/// Magic bytes for the canonical export header.
pub const MAGIC_BYTES: &[u8; 4] = b"SCLK";

/// Current canonical export format version.
///
/// Increment this when making breaking changes to the export layout.
pub const FORMAT_VERSION: u8 = 1;

/// `SubTypeSchema` value that makes a payload's `SubType` authoritative.
pub const DATACITE_SCHEMA: &str = "DataCite";

/// First value handed out by every id sequence.
pub const FIRST_ID: u64 = 1;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length of an identifier value.
///
/// Longer values are rejected by the event loader.
pub const MAX_IDENTIFIER_LENGTH: usize = 2048;

/// Maximum length of an identifier scheme name.
pub const MAX_SCHEME_LENGTH: usize = 32;

/// Maximum number of payloads carried by one event.
///
/// One event is one transaction, so this bounds the size of a write.
pub const MAX_PAYLOADS_PER_EVENT: usize = 1000;

/// Maximum length of the creator and source strings of an event.
pub const MAX_PROVENANCE_LENGTH: usize = 512;
