//! Service identifiers used for publisher/subscriber matching

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{HermodError, Result};

/// Maximum length of one service identifier component in bytes
pub const SERVICE_COMPONENT_MAX: usize = 100;

/// The matching key for ports: a `(service, instance, event)` triple.
///
/// Matching is exact componentwise equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceId {
    service: String,
    instance: String,
    event: String,
}

impl ServiceId {
    /// Create a service identifier, validating component bounds
    pub fn new(
        service: impl Into<String>,
        instance: impl Into<String>,
        event: impl Into<String>,
    ) -> Result<Self> {
        let id = Self {
            service: service.into(),
            instance: instance.into(),
            event: event.into(),
        };

        for (name, component) in [
            ("service", &id.service),
            ("instance", &id.instance),
            ("event", &id.event),
        ] {
            if component.is_empty() {
                return Err(HermodError::invalid_parameter(
                    name,
                    "service identifier component must not be empty",
                ));
            }
            if component.len() > SERVICE_COMPONENT_MAX {
                return Err(HermodError::invalid_parameter(
                    name,
                    format!(
                        "service identifier component exceeds {} bytes",
                        SERVICE_COMPONENT_MAX
                    ),
                ));
            }
        }

        Ok(id)
    }

    /// Service component
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Instance component
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Event component
    pub fn event(&self) -> &str {
        &self.event
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.service, self.instance, self.event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_componentwise_equality() {
        let a = ServiceId::new("Radar", "FrontLeft", "Object").unwrap();
        let b = ServiceId::new("Radar", "FrontLeft", "Object").unwrap();
        let c = ServiceId::new("Radar", "FrontRight", "Object").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_component_bounds() {
        assert!(ServiceId::new("", "i", "e").is_err());
        assert!(ServiceId::new("s", "x".repeat(SERVICE_COMPONENT_MAX), "e").is_ok());
        assert!(ServiceId::new("s", "x".repeat(SERVICE_COMPONENT_MAX + 1), "e").is_err());
    }

    #[test]
    fn test_display() {
        let id = ServiceId::new("Radar", "FrontLeft", "Object").unwrap();
        assert_eq!(id.to_string(), "Radar/FrontLeft/Object");
    }
}
