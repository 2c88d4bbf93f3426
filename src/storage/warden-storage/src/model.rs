//! Rows read by the gateway.

use serde::{Deserialize, Serialize};

/// An application-provisioned employee.
///
/// Directory and federation identities map onto this row by email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    /// Primary key.
    pub id: i64,
    /// Directory user id.
    pub uid: String,
    /// Display name.
    pub name: Option<String>,
    /// Canonical email; unique.
    pub email: String,
}
