//! Prefixed ID generation for Coursepay entities.
//!
//! All IDs use a `cp_` brand prefix so they can never collide with provider
//! identifiers (T-Bank PaymentId is a bare number, order ids are ours).
//!
//! Format: `cp_{entity}_{uuid_simple}` (32 hex chars, no hyphens)

use uuid::Uuid;

/// All known entity prefixes for validation.
const ALL_PREFIXES: &[&str] = &["cp_pur_", "cp_ag_", "cp_crs_"];

/// Validate that a string is a valid Coursepay prefixed ID.
///
/// Cheap format check to reject garbage before hitting the database.
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

/// Entity types that have prefixed IDs in Coursepay.
#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Purchase,
    AccessGrant,
    Course,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Purchase => "cp_pur",
            Self::AccessGrant => "cp_ag",
            Self::Course => "cp_crs",
        }
    }

    /// Generates a new prefixed ID for this entity type.
    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}

/// Caller-generated order correlation key sent to the provider.
///
/// Unprefixed: T-Bank caps OrderId at 36 chars, and a bare simple UUID
/// (32 chars) stays under that.
pub fn gen_order_id() -> String {
    Uuid::new_v4().as_simple().to_string()
}
