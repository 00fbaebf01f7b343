//! Component parameters.

use serde::{Deserialize, Serialize};

use crate::address::Entity;
use crate::factory::SpecFactory;
use crate::spec::Binding;

/// Validation and coercion rule for a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Field {
    Float {
        default: f64,
        minimum: f64,
        maximum: f64,
    },
    Integer {
        default: i64,
        minimum: i64,
        maximum: i64,
    },
    Boolean {
        default: bool,
    },
}

impl Field {
    pub fn gain() -> Self {
        Field::Float {
            default: 0.0,
            minimum: -96.0,
            maximum: 6.0,
        }
    }

    pub fn default_value(&self) -> f64 {
        match *self {
            Field::Float { default, .. } => default,
            Field::Integer { default, .. } => default as f64,
            Field::Boolean { default } => f64::from(u8::from(default)),
        }
    }

    pub fn coerce(&self, value: f64) -> f64 {
        match *self {
            Field::Float {
                minimum, maximum, ..
            } => value.clamp(minimum, maximum),
            Field::Integer {
                minimum, maximum, ..
            } => value.round().clamp(minimum as f64, maximum as f64),
            Field::Boolean { .. } => {
                if value >= 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub field: Field,
    /// Backed by a control bus rather than set on the synth directly.
    pub has_bus: bool,
    pub value: f64,
}

impl Parameter {
    pub fn new(name: &str, field: Field, has_bus: bool) -> Self {
        Self {
            name: name.to_string(),
            field,
            has_bus,
            value: field.default_value(),
        }
    }

    pub fn gain() -> Self {
        Self::new("gain", Field::gain(), true)
    }

    /// Coerce and store `value`, returning what was stored.
    pub fn set(&mut self, value: f64) -> f64 {
        self.value = self.field.coerce(value);
        self.value
    }

    pub fn resolve_specs(&self, factory: &mut SpecFactory) {
        if self.has_bus {
            factory.add_control_bus(&self.name, 1, self.value);
        }
    }

    /// How a synth reads this parameter.
    pub fn binding(&self, factory: &SpecFactory) -> Binding {
        if self.has_bus {
            Binding::Address(factory.address(Entity::ControlBuses, &self.name))
        } else {
            Binding::Value(self.value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_clamps() {
        let mut gain = Parameter::gain();
        assert_eq!(gain.value, 0.0);
        assert_eq!(gain.set(12.0), 6.0);
        assert_eq!(gain.set(-200.0), -96.0);
        assert_eq!(gain.set(-3.5), -3.5);
    }

    #[test]
    fn test_integer_rounds_then_clamps() {
        let field = Field::Integer {
            default: 1,
            minimum: 0,
            maximum: 8,
        };
        assert_eq!(field.coerce(2.6), 3.0);
        assert_eq!(field.coerce(99.0), 8.0);
        assert_eq!(field.default_value(), 1.0);
    }

    #[test]
    fn test_boolean_thresholds() {
        let field = Field::Boolean { default: true };
        assert_eq!(field.default_value(), 1.0);
        assert_eq!(field.coerce(0.49), 0.0);
        assert_eq!(field.coerce(0.5), 1.0);
    }
}
