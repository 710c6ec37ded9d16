//! Shared-state key schema.
//!
//! Every key a unit owns is `"<id> <field>"`. A unit writes only its own keys
//! and reads only other units' `output` key.

use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnitField {
    /// Unit type name, written on start.
    Class,
    /// Last published scalar, rendered by [`format_output`].
    Output,
    /// Last decoded basis-state label (QUnit only).
    State,
    /// JSON array with the query vector (QUnit only).
    Query,
    /// JSON object `{dim: producer_id}` (QUnit only).
    InQunits,
}

impl UnitField {
    pub const ALL: [UnitField; 5] = [
        UnitField::Class,
        UnitField::Output,
        UnitField::State,
        UnitField::Query,
        UnitField::InQunits,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            UnitField::Class => "class",
            UnitField::Output => "output",
            UnitField::State => "state",
            UnitField::Query => "query",
            UnitField::InQunits => "in_qunits",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        UnitField::ALL.into_iter().find(|f| f.as_str() == name)
    }

    /// Render the store key of this field for unit `id`.
    pub fn key(self, id: &str) -> String {
        format!("{id} {}", self.as_str())
    }
}

impl fmt::Display for UnitField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render a published scalar. Whole numbers keep their fractional part
/// (`1.0`, not `1`) so every output reads as a float.
pub fn format_output(value: f64) -> String {
    format!("{value:?}")
}

/// Split a store key into unit id and field. Keys outside the schema yield `None`.
pub fn parse_key(key: &str) -> Option<(&str, UnitField)> {
    let (id, field) = key.rsplit_once(' ')?;
    if id.is_empty() {
        return None;
    }
    UnitField::from_name(field).map(|f| (id, f))
}
