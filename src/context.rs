//! User identity and device context sent along with every fetch.
use std::collections::{btree_map, BTreeMap};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::{identity::EnrollmentId, Error, Result};

/// Value of the `library` context field.
pub const LIBRARY: &str = concat!("skylab-rust/", env!("CARGO_PKG_VERSION"));

/// Enum representing possible values of a context attribute.
///
/// Conveniently implements `From` conversions for `String`, `&str`, `f64`, and `bool` types.
///
/// ```
/// # use skylab::AttributeValue;
/// let string_attr: AttributeValue = "example".into();
/// let number_attr: AttributeValue = 42.0.into();
/// ```
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// A numerical value.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// A null value or absence of value. Null attributes are left out of the context.
    Null,
}

impl AttributeValue {
    /// Returns the string value, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        if let AttributeValue::String(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// The user that variants are resolved for.
///
/// ```
/// # use skylab::SkylabUser;
/// let user = SkylabUser::new()
///     .user_id("user@company.com")
///     .attribute("plan", "enterprise")
///     .attribute("seats", 42.0);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkylabUser {
    attributes: BTreeMap<String, AttributeValue>,
}

impl SkylabUser {
    /// Create a user without attributes.
    pub fn new() -> SkylabUser {
        SkylabUser::default()
    }

    /// Set the `id` used for bucketing. Defaults to the enrollment id.
    pub fn id(self, id: impl Into<String>) -> SkylabUser {
        self.attribute("id", AttributeValue::String(id.into()))
    }

    /// Set the `user_id` field.
    pub fn user_id(self, user_id: impl Into<String>) -> SkylabUser {
        self.attribute("user_id", AttributeValue::String(user_id.into()))
    }

    /// Set the `device_id` field.
    pub fn device_id(self, device_id: impl Into<String>) -> SkylabUser {
        self.attribute("device_id", AttributeValue::String(device_id.into()))
    }

    /// Set an arbitrary attribute. It overrides any same-named field from the context provider.
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> SkylabUser {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Iterate over explicitly set attributes.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Source of device and platform attributes. Every accessor may return `None` when the value is
/// not available.
pub trait ContextProvider: Send + Sync {
    /// Identifier of the device.
    fn device_id(&self) -> Option<String> {
        None
    }
    /// Identifier of the logged-in user.
    fn user_id(&self) -> Option<String> {
        None
    }
    /// Application version.
    fn version(&self) -> Option<String> {
        None
    }
    /// Language or locale.
    fn language(&self) -> Option<String> {
        None
    }
    /// Platform name.
    fn platform(&self) -> Option<String> {
        None
    }
    /// Operating system name and version.
    fn os(&self) -> Option<String> {
        None
    }
    /// Device manufacturer.
    fn device_manufacturer(&self) -> Option<String> {
        None
    }
    /// Device model.
    fn device_model(&self) -> Option<String> {
        None
    }
}

/// Identity and context payload of a single fetch, keyed by attribute name.
///
/// Keys are kept sorted, so the JSON form is canonical.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserContext(BTreeMap<String, AttributeValue>);

impl UserContext {
    /// Get the value of `key`.
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.0.get(key)
    }

    /// Iterate over all fields in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, AttributeValue> {
        self.0.iter()
    }

    /// Whether the context carries either a `user_id` or a `device_id`.
    pub fn has_identity(&self) -> bool {
        self.0.contains_key("user_id") || self.0.contains_key("device_id")
    }

    /// Serialize to canonical JSON.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|err| Error::Serialization(err.into()))
    }

    /// Encode as URL-safe unpadded base64 of the canonical JSON, for use as a path segment.
    pub fn encode(&self) -> Result<String> {
        Ok(URL_SAFE_NO_PAD.encode(self.to_json()?))
    }

    /// Reverse of [`UserContext::encode`].
    pub fn decode(encoded: &str) -> Result<UserContext> {
        let json = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| Error::InvalidEncodedContext)?;
        serde_json::from_slice(&json).map_err(|_| Error::InvalidEncodedContext)
    }

    fn set(&mut self, key: &str, value: impl Into<AttributeValue>) {
        match value.into() {
            AttributeValue::Null => {}
            // JSON has no NaN or infinity, serde_json would write them as null.
            AttributeValue::Number(n) if !n.is_finite() => {}
            value => {
                self.0.insert(key.to_owned(), value);
            }
        }
    }

    fn set_opt(&mut self, key: &str, value: Option<String>) {
        if let Some(value) = value {
            self.set(key, value);
        }
    }
}

impl<'a> IntoIterator for &'a UserContext {
    type Item = (&'a String, &'a AttributeValue);
    type IntoIter = btree_map::Iter<'a, String, AttributeValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Assemble the context for a fetch.
///
/// Later layers win on key collision: the `library` constant and the enrollment id as `id`, then
/// context provider fields, then the user's explicit attributes. A provider `device_id` is also
/// used as `id`. Missing provider fields and null or non-finite user attributes are left out.
pub fn build_context(
    user: Option<&SkylabUser>,
    provider: Option<&dyn ContextProvider>,
    enrollment_id: &EnrollmentId,
) -> UserContext {
    let mut context = UserContext::default();
    context.set("library", LIBRARY);
    context.set("id", enrollment_id.as_str());

    if let Some(provider) = provider {
        if let Some(device_id) = provider.device_id() {
            context.set("id", device_id.as_str());
            context.set("device_id", device_id);
        }
        context.set_opt("user_id", provider.user_id());
        context.set_opt("version", provider.version());
        context.set_opt("language", provider.language());
        context.set_opt("platform", provider.platform());
        context.set_opt("os", provider.os());
        context.set_opt("device_manufacturer", provider.device_manufacturer());
        context.set_opt("device_model", provider.device_model());
    }

    if let Some(user) = user {
        for (key, value) in user.attributes() {
            context.set(key, value.clone());
        }
    }

    if !context.has_identity() {
        log::warn!(target: "skylab",
                   id:serde = context.get("id");
                   "user context has neither user_id nor device_id");
    }

    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::generate_enrollment_id;

    struct Provider;

    impl ContextProvider for Provider {
        fn device_id(&self) -> Option<String> {
            Some("d1".to_owned())
        }
        fn user_id(&self) -> Option<String> {
            Some("p1".to_owned())
        }
        fn platform(&self) -> Option<String> {
            Some("linux".to_owned())
        }
    }

    fn enrollment_id() -> EnrollmentId {
        generate_enrollment_id(&mut rand::thread_rng())
    }

    #[test]
    fn library_and_enrollment_id_without_user() {
        let id = enrollment_id();

        let context = build_context(None, None, &id);

        assert_eq!(context.get("library"), Some(&AttributeValue::from(LIBRARY)));
        assert_eq!(context.get("id"), Some(&AttributeValue::from(id.as_str())));
        assert!(!context.has_identity());
    }

    #[test]
    fn provider_fields_are_added_and_absent_ones_omitted() {
        let context = build_context(None, Some(&Provider), &enrollment_id());

        assert_eq!(context.get("device_id"), Some(&AttributeValue::from("d1")));
        assert_eq!(context.get("platform"), Some(&AttributeValue::from("linux")));
        assert_eq!(context.get("os"), None);
        assert_eq!(context.get("device_model"), None);
        assert!(context.has_identity());
    }

    #[test]
    fn user_attributes_override_provider() {
        let user = SkylabUser::new().user_id("u1").attribute("plan", "pro");

        let context = build_context(Some(&user), Some(&Provider), &enrollment_id());

        assert_eq!(context.get("user_id"), Some(&AttributeValue::from("u1")));
        assert_eq!(context.get("device_id"), Some(&AttributeValue::from("d1")));
        assert_eq!(context.get("plan"), Some(&AttributeValue::from("pro")));
    }

    #[test]
    fn explicit_id_overrides_enrollment_id() {
        let user = SkylabUser::new().id("custom");

        let context = build_context(Some(&user), None, &enrollment_id());

        assert_eq!(context.get("id"), Some(&AttributeValue::from("custom")));
    }

    #[test]
    fn provider_device_id_replaces_enrollment_id() {
        let context = build_context(Some(&SkylabUser::new()), Some(&Provider), &enrollment_id());

        assert_eq!(context.get("id"), Some(&AttributeValue::from("d1")));
        assert_eq!(context.get("device_id"), Some(&AttributeValue::from("d1")));
    }

    #[test]
    fn explicit_id_overrides_provider_device_id() {
        let user = SkylabUser::new().id("custom");

        let context = build_context(Some(&user), Some(&Provider), &enrollment_id());

        assert_eq!(context.get("id"), Some(&AttributeValue::from("custom")));
    }

    #[test]
    fn non_finite_numbers_are_omitted() {
        let user = SkylabUser::new()
            .user_id("u")
            .attribute("score", f64::NAN)
            .attribute("limit", f64::INFINITY)
            .attribute("seats", 3.0);

        let context = build_context(Some(&user), None, &enrollment_id());

        assert_eq!(context.get("score"), None);
        assert_eq!(context.get("limit"), None);
        assert_eq!(context.get("seats"), Some(&AttributeValue::Number(3.0)));
        assert!(!String::from_utf8(context.to_json().unwrap())
            .unwrap()
            .contains("null"));
        assert_eq!(UserContext::decode(&context.encode().unwrap()).unwrap(), context);
    }

    #[test]
    fn null_attributes_are_omitted() {
        let user = SkylabUser::new().attribute("language", AttributeValue::Null);

        let context = build_context(Some(&user), None, &enrollment_id());

        assert_eq!(context.get("language"), None);
    }

    #[test]
    fn encode_decode_reproduces_context() {
        let user = SkylabUser::new()
            .user_id("user@company.com")
            .attribute("seats", 42.0)
            .attribute("beta", true)
            .attribute("note", "a/b+c?");

        let context = build_context(Some(&user), Some(&Provider), &enrollment_id());
        let encoded = context.encode().unwrap();

        assert!(!encoded.contains(|c| matches!(c, '+' | '/' | '=')));
        assert_eq!(UserContext::decode(&encoded).unwrap(), context);
    }

    #[test]
    fn json_is_canonical() {
        let a = SkylabUser::new().attribute("b", "2").attribute("a", "1");
        let b = SkylabUser::new().attribute("a", "1").attribute("b", "2");
        let id = enrollment_id();

        assert_eq!(
            build_context(Some(&a), None, &id).to_json().unwrap(),
            build_context(Some(&b), None, &id).to_json().unwrap()
        );
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            UserContext::decode("!!not base64!!"),
            Err(Error::InvalidEncodedContext)
        ));
    }
}
