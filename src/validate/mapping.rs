//! Translation between user-facing and wire-facing representations.

use crate::error::{DriverError, DriverResult};
use crate::value::Value;

/// Pairs of `(user value, wire value)`.
///
/// A symmetric mapping uses the same pairs in both directions. An asymmetric one
/// has distinct tables for setting and reading, for instruments that accept one
/// spelling but answer with another.
#[derive(Debug, Clone, PartialEq)]
pub struct Mapping {
    to_wire: Vec<(Value, Value)>,
    from_wire: Vec<(Value, Value)>,
}

impl Mapping {
    pub fn symmetric<I, U, W>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (U, W)>,
        U: Into<Value>,
        W: Into<Value>,
    {
        let to_wire: Vec<(Value, Value)> = pairs
            .into_iter()
            .map(|(u, w)| (u.into(), w.into()))
            .collect();
        let from_wire = to_wire.clone();
        Self { to_wire, from_wire }
    }

    /// `set_pairs` maps user → wire for writes, `get_pairs` maps user → wire for reads.
    pub fn asymmetric<I, J, U, W, V, X>(set_pairs: I, get_pairs: J) -> Self
    where
        I: IntoIterator<Item = (U, W)>,
        J: IntoIterator<Item = (V, X)>,
        U: Into<Value>,
        W: Into<Value>,
        V: Into<Value>,
        X: Into<Value>,
    {
        Self {
            to_wire: set_pairs
                .into_iter()
                .map(|(u, w)| (u.into(), w.into()))
                .collect(),
            from_wire: get_pairs
                .into_iter()
                .map(|(u, w)| (u.into(), w.into()))
                .collect(),
        }
    }

    /// User values accepted for writing, in declaration order.
    pub fn user_values(&self) -> impl Iterator<Item = &Value> {
        self.to_wire.iter().map(|(user, _)| user)
    }

    pub fn to_wire(&self, attribute: &str, value: &Value) -> DriverResult<Value> {
        self.to_wire
            .iter()
            .find(|(user, _)| user == value)
            .map(|(_, wire)| wire.clone())
            .ok_or_else(|| {
                DriverError::invalid_argument(
                    attribute,
                    format!("'{value}' has no mapping, expected one of {}", self.describe()),
                )
            })
    }

    pub fn from_wire(&self, attribute: &str, raw: &Value) -> DriverResult<Value> {
        self.from_wire
            .iter()
            .find(|(_, wire)| wire == raw)
            .map(|(user, _)| user.clone())
            .ok_or_else(|| {
                DriverError::invalid_response(attribute, format!("unmapped response '{raw}'"))
            })
    }

    fn describe(&self) -> String {
        let names: Vec<String> = self.user_values().map(ToString::to_string).collect();
        format!("[{}]", names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_round_trip() {
        let mapping = Mapping::symmetric([("Auto", "AUTO"), ("Manual", "MAN")]);
        assert_eq!(
            mapping.to_wire("mode", &Value::from("Manual")).unwrap(),
            Value::from("MAN")
        );
        assert_eq!(
            mapping.from_wire("mode", &Value::from("AUTO")).unwrap(),
            Value::from("Auto")
        );
    }

    #[test]
    fn test_asymmetric_tables() {
        let mapping = Mapping::asymmetric([(true, "ON")], [(true, "1"), (false, "0")]);
        assert_eq!(
            mapping.to_wire("output", &Value::Bool(true)).unwrap(),
            Value::from("ON")
        );
        assert_eq!(
            mapping.from_wire("output", &Value::from("0")).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_unmapped_values_are_classified() {
        let mapping = Mapping::symmetric([("Auto", "AUTO")]);
        assert!(matches!(
            mapping.to_wire("mode", &Value::from("Off")),
            Err(DriverError::InvalidArgument { .. })
        ));
        assert!(matches!(
            mapping.from_wire("mode", &Value::from("???")),
            Err(DriverError::InvalidResponse { .. })
        ));
    }
}
