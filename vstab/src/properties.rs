//! # Named tunables.
//!
//! Configuration values and strategies may expose their knobs by name, so that tools can list
//! and override them without knowing the concrete type.

use crate::prelude::v1::*;
use std::ops::{Deref, DerefMut};

/// Object with custom properties.
pub trait Properties {
    /// Get available properties.
    fn props_mut(&mut self) -> Vec<(&str, PropertyMut)> {
        vec![]
    }

    /// Get a snapshot of the available properties.
    fn props(&mut self) -> Vec<(&str, Property)> {
        self.props_mut()
            .into_iter()
            .map(|(n, p)| (n, p.into()))
            .collect()
    }

    /// Parse `value` and assign it to the property called `name`.
    ///
    /// Numeric values are clamped to the bounds of the property.
    fn set_prop(&mut self, name: &str, value: &str) -> Result<()> {
        let mut props = self.props_mut();

        let (_, prop) = props
            .iter_mut()
            .find(|(n, _)| *n == name)
            .ok_or_else(|| {
                Error::invalid_value("property", format!("no property named `{}`", name))
            })?;

        prop.parse_set(value)
    }
}

/// Property with a lower and upper bound.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub struct BoundedProp<T> {
    pub val: T,
    pub min: T,
    pub max: T,
}

impl<T> Deref for BoundedProp<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.val
    }
}

impl<'a, T: Copy> From<BoundedPropMut<'a, T>> for BoundedProp<T> {
    fn from(BoundedPropMut { val, min, max }: BoundedPropMut<'a, T>) -> Self {
        Self {
            val: *val,
            min,
            max,
        }
    }
}

/// Snapshot of a property value.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(::serde::Serialize, ::serde::Deserialize))]
pub enum Property {
    Bool(bool),
    Float(BoundedProp<f32>),
    Usize(BoundedProp<usize>),
}

impl std::fmt::Display for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Float(p) => write!(f, "{} [{}; {}]", p.val, p.min, p.max),
            Self::Usize(p) => write!(f, "{} [{}; {}]", p.val, p.min, p.max),
        }
    }
}

impl<'a> From<PropertyMut<'a>> for Property {
    fn from(prop: PropertyMut<'a>) -> Self {
        match prop {
            PropertyMut::Bool(b) => Self::Bool(*b),
            PropertyMut::Float(p) => Self::Float(p.into()),
            PropertyMut::Usize(p) => Self::Usize(p.into()),
        }
    }
}

/// Mutable property with a lower and upper bound.
pub struct BoundedPropMut<'a, T> {
    pub val: &'a mut T,
    pub min: T,
    pub max: T,
}

impl<'a, T> Deref for BoundedPropMut<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.val
    }
}

impl<'a, T> DerefMut for BoundedPropMut<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.val
    }
}

impl<'a, T: PartialOrd + Copy> BoundedPropMut<'a, T> {
    /// Assign a value, clamped between the lower and upper bounds.
    pub fn set_clamped(&mut self, val: T) {
        *self.val = if val < self.min {
            self.min
        } else if val > self.max {
            self.max
        } else {
            val
        };
    }
}

/// Reference to a mutable property.
pub enum PropertyMut<'a> {
    Bool(&'a mut bool),
    Float(BoundedPropMut<'a, f32>),
    Usize(BoundedPropMut<'a, usize>),
}

impl<'a> PropertyMut<'a> {
    /// Create a boolean property.
    ///
    /// # Arguments
    ///
    /// * `b` - reference to the underlying boolean to be mutated.
    pub fn bool(b: &'a mut bool) -> Self {
        Self::Bool(b)
    }

    /// Create a floating point property.
    ///
    /// # Arguments
    ///
    /// * `val` - reference to the underlying float to be mutated.
    /// * `min` - lowest value for the property.
    /// * `max` - highest value for the property.
    pub fn float(val: &'a mut f32, min: f32, max: f32) -> Self {
        Self::Float(BoundedPropMut { val, min, max })
    }

    /// Create an integer property.
    ///
    /// # Arguments
    ///
    /// * `val` - reference to the underlying usize to be mutated.
    /// * `min` - lowest value for the property.
    /// * `max` - highest value for the property.
    pub fn usize(val: &'a mut usize, min: usize, max: usize) -> Self {
        Self::Usize(BoundedPropMut { val, min, max })
    }

    /// Copy the value of a property snapshot of the same kind.
    pub fn set(&mut self, other: &Property) {
        match (self, other) {
            (Self::Bool(b), Property::Bool(ob)) => **b = *ob,
            (Self::Float(val), Property::Float(oval)) => val.set_clamped(oval.val),
            (Self::Usize(val), Property::Usize(oval)) => val.set_clamped(oval.val),
            _ => {}
        }
    }

    /// Parse a textual value into the property.
    pub fn parse_set(&mut self, value: &str) -> Result<()> {
        let value = value.trim();
        let bad = |kind: &str| {
            Error::invalid_value("property", format!("`{}` is not a valid {}", value, kind))
        };

        match self {
            Self::Bool(b) => **b = value.parse().map_err(|_| bad("boolean"))?,
            Self::Float(p) => {
                let v: f32 = value.parse().map_err(|_| bad("number"))?;
                if !v.is_finite() {
                    return Err(bad("finite number"));
                }
                p.set_clamped(v)
            }
            Self::Usize(p) => p.set_clamped(value.parse().map_err(|_| bad("integer"))?),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Knobs {
        on: bool,
        gain: f32,
        count: usize,
    }

    impl Properties for Knobs {
        fn props_mut(&mut self) -> Vec<(&str, PropertyMut)> {
            vec![
                ("On", PropertyMut::bool(&mut self.on)),
                ("Gain", PropertyMut::float(&mut self.gain, 0.0, 2.0)),
                ("Count", PropertyMut::usize(&mut self.count, 1, 10)),
            ]
        }
    }

    fn knobs() -> Knobs {
        Knobs {
            on: false,
            gain: 1.0,
            count: 5,
        }
    }

    #[test]
    fn snapshot() {
        let mut k = knobs();
        let props = k.props();
        assert_eq!(props[0], ("On", Property::Bool(false)));
        assert_eq!(props[2].1.to_string(), "5 [1; 10]");
    }

    #[test]
    fn parse_and_clamp() {
        let mut k = knobs();
        k.set_prop("On", "true").unwrap();
        k.set_prop("Gain", "0.25").unwrap();
        k.set_prop("Count", "42").unwrap();

        assert!(k.on);
        assert_eq!(k.gain, 0.25);
        assert_eq!(k.count, 10);
    }

    #[test]
    fn invalid_values() {
        let mut k = knobs();
        assert!(k.set_prop("Count", "-1").is_err());
        assert!(k.set_prop("Gain", "inf").is_err());
        assert!(k.set_prop("On", "maybe").is_err());
        assert!(k.set_prop("Missing", "1").is_err());
    }

    #[test]
    fn copy_from_snapshot() {
        let mut a = knobs();
        let mut b = knobs();
        b.gain = 1.5;

        for ((_, mut dst), (_, src)) in a.props_mut().into_iter().zip(b.props()) {
            dst.set(&src);
        }

        assert_eq!(a.gain, 1.5);
    }
}
