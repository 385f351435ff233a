//! Configuration variable values.

use std::{
    collections::BTreeMap,
    fmt::{Display, Formatter},
};

use brig_types::PackageName;

/// A configuration variable value.
///
/// Values are weakly typed the way build-system variables are: a value
/// read from an override string is classified by shape.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Value {
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A string.
    String(String),
}

impl Value {
    /// Classifies an override string into a typed value.
    pub fn classify(text: &str) -> Self {
        match text {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => match text.parse::<i64>() {
                Ok(number) => Value::Int(number),
                Err(_) => Value::String(text.to_string()),
            },
        }
    }

    /// Returns the truthiness of the value.
    ///
    /// `false`, `0` and the empty string are falsy.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(value) => *value,
            Value::Int(value) => *value != 0,
            Value::String(value) => !value.is_empty(),
        }
    }
}

impl Display for Value {
    fn fmt(&self, fmt: &mut Formatter) -> std::fmt::Result {
        match self {
            Value::Bool(value) => write!(fmt, "{value}"),
            Value::Int(value) => write!(fmt, "{value}"),
            Value::String(value) => write!(fmt, "{value}"),
        }
    }
}

/// Where a configuration variable value came from, as classified by
/// [`Skeleton::reload_defaults`][crate::Skeleton::reload_defaults].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Origin {
    /// Defined by the package defaults (the root build fragment).
    Default,
    /// Overridden by the user or a dependent.
    Override,
    /// Computed by buildfile logic during the load.
    Buildfile,
    /// Known but currently undefined.
    Undefined,
}

/// One configuration variable: its value, where the value came from
/// and, for dependent-imposed values, which dependent imposed it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Variable {
    /// The value.
    pub value: Value,
    /// Where the value came from.
    pub origin: Origin,
    /// The dependent that imposed the value, if any.
    pub dependent: Option<PackageName>,
}

/// An ordered map of configuration variables by name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VariableMap {
    map: BTreeMap<String, Variable>,
}

impl VariableMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        VariableMap::default()
    }

    /// Returns the variable `name`, if defined.
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.map.get(name)
    }

    /// Returns the value of `name`, if defined.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.map.get(name).map(|v| &v.value)
    }

    /// Returns `true` if `name` is defined.
    pub fn is_defined(&self, name: &str) -> bool {
        self.map.contains_key(name)
    }

    /// Defines or overwrites `name`.
    pub fn set(&mut self, name: &str, value: Value, origin: Origin) {
        self.map.insert(
            name.to_string(),
            Variable {
                value,
                origin,
                dependent: None,
            },
        );
    }

    /// Defines or overwrites `name` as imposed by `dependent`.
    pub fn set_by_dependent(
        &mut self,
        name: &str,
        value: Value,
        origin: Origin,
        dependent: PackageName,
    ) {
        self.map.insert(
            name.to_string(),
            Variable {
                value,
                origin,
                dependent: Some(dependent),
            },
        );
    }

    /// Removes `name` from the map.
    pub fn unset(&mut self, name: &str) {
        self.map.remove(name);
    }

    /// Iterates over the variables in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Variable)> {
        self.map.iter()
    }

    /// Returns the number of variables.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the map holds no variables.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Returns the names whose values differ between `self` and
    /// `other` (added, removed or changed in value).
    pub fn changed_names(&self, other: &Self) -> Vec<String> {
        let mut names = Vec::new();
        for (name, variable) in &self.map {
            match other.map.get(name) {
                Some(previous) if previous.value == variable.value => {}
                _ => names.push(name.clone()),
            }
        }
        for name in other.map.keys() {
            if !self.map.contains_key(name) {
                names.push(name.clone());
            }
        }
        names.sort();
        names.dedup();
        names
    }
}

impl<'a> IntoIterator for &'a VariableMap {
    type Item = (&'a String, &'a Variable);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Variable>;

    fn into_iter(self) -> Self::IntoIter {
        self.map.iter()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("true", Value::Bool(true))]
    #[case("false", Value::Bool(false))]
    #[case("42", Value::Int(42))]
    #[case("-7", Value::Int(-7))]
    #[case("bar", Value::String("bar".to_string()))]
    #[case("", Value::String(String::new()))]
    fn classification(#[case] text: &str, #[case] expected: Value) {
        assert_eq!(Value::classify(text), expected);
    }

    #[rstest]
    #[case(Value::Bool(false), false)]
    #[case(Value::Bool(true), true)]
    #[case(Value::Int(0), false)]
    #[case(Value::Int(3), true)]
    #[case(Value::String(String::new()), false)]
    #[case(Value::String("x".to_string()), true)]
    fn truthiness(#[case] value: Value, #[case] expected: bool) {
        assert_eq!(value.truthy(), expected);
    }

    #[test]
    fn changed_names_are_symmetric_difference_by_value() {
        let mut a = VariableMap::new();
        a.set("config.x.same", Value::Int(1), Origin::Default);
        a.set("config.x.changed", Value::Int(1), Origin::Default);
        a.set("config.x.removed", Value::Int(1), Origin::Default);

        let mut b = VariableMap::new();
        b.set("config.x.same", Value::Int(1), Origin::Default);
        b.set("config.x.changed", Value::Int(2), Origin::Default);
        b.set("config.x.added", Value::Int(3), Origin::Default);

        assert_eq!(
            b.changed_names(&a),
            vec![
                "config.x.added".to_string(),
                "config.x.changed".to_string(),
                "config.x.removed".to_string(),
            ]
        );
    }
}
