//! Ordered user property list carried by MQTT 5 packets.

use super::MAX_STRING_LEN;
use crate::error::PacketError;

/// A single name/value user property.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserProperty {
    name: String,
    value: String,
}

impl UserProperty {
    /// Property name.
    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    /// Property value.
    #[must_use]
    pub fn value(&self) -> &str { &self.value }
}

/// User properties in wire order.
///
/// Names may repeat; the protocol treats the list as a multimap and
/// preserves insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserProperties(Vec<UserProperty>);

impl UserProperties {
    /// Create an empty property list.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Append a property.
    ///
    /// # Errors
    ///
    /// Returns [`PacketError::InvalidString`] when the name or value is not a
    /// valid MQTT UTF-8 string.
    pub fn add(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), PacketError> {
        let name = name.into();
        let value = value.into();
        validate_string("user property name", &name)?;
        validate_string("user property value", &value)?;
        self.0.push(UserProperty { name, value });
        Ok(())
    }

    /// Remove every property with the given name and value.
    pub fn remove(&mut self, name: &str, value: &str) {
        self.0.retain(|p| p.name != name || p.value != value);
    }

    /// Remove every property with the given name.
    pub fn remove_name(&mut self, name: &str) { self.0.retain(|p| p.name != name); }

    /// Remove all properties.
    pub fn clear(&mut self) { self.0.clear(); }

    /// Values stored under `name`, in insertion order.
    pub fn get<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// Iterate over all properties in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &UserProperty> { self.0.iter() }

    /// Number of properties.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

/// Check the MQTT UTF-8 string rules relevant to interceptor edits.
pub(crate) fn validate_string(field: &'static str, value: &str) -> Result<(), PacketError> {
    if value.len() > MAX_STRING_LEN {
        return Err(PacketError::InvalidString {
            field,
            reason: "longer than 65535 bytes",
        });
    }
    if value.contains('\0') {
        return Err(PacketError::InvalidString {
            field,
            reason: "contains U+0000",
        });
    }
    Ok(())
}
