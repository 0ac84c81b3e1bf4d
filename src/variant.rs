use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A resolved flag variant: a value name plus optional opaque payload.
///
/// ```
/// # use skylab::Variant;
/// let variant: Variant = "treatment".into();
/// assert_eq!(variant.value, "treatment");
/// assert!(variant.payload.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VariantWire")]
pub struct Variant {
    /// Variant name, e.g., `"on"` or `"treatment"`.
    pub value: String,
    /// Arbitrary JSON attached to the variant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Variant {
    /// Create a variant without payload.
    pub fn new(value: impl Into<String>) -> Variant {
        Variant {
            value: value.into(),
            payload: None,
        }
    }

    /// Attach `payload` to the variant.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Variant {
        self.payload = Some(payload);
        self
    }
}

impl Default for Variant {
    fn default() -> Variant {
        Variant::new("")
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Variant {
        Variant::new(value)
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Variant {
        Variant::new(value)
    }
}

/// Wire representation of a variant. The name comes in `value` or `key`, and older servers send a
/// bare string per flag.
#[derive(Deserialize)]
#[serde(untagged)]
enum VariantWire {
    Object {
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        key: Option<String>,
        #[serde(default)]
        payload: Option<serde_json::Value>,
    },
    Legacy(String),
}

impl TryFrom<VariantWire> for Variant {
    type Error = &'static str;

    fn try_from(wire: VariantWire) -> Result<Variant, Self::Error> {
        match wire {
            VariantWire::Object {
                value,
                key,
                payload,
            } => {
                let value = value.or(key).ok_or("variant has neither value nor key")?;
                Ok(Variant { value, payload })
            }
            VariantWire::Legacy(value) => Ok(Variant::new(value)),
        }
    }
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum TryParse<T> {
    Parsed(T),
    ParseFailed(serde_json::Value),
}

/// Body of the variants endpoint: flag key to variant object.
#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub(crate) struct VariantsResponse(HashMap<String, TryParse<Variant>>);

impl VariantsResponse {
    /// Drop entries that failed to parse, logging each of them.
    pub(crate) fn into_variants(self) -> HashMap<String, Variant> {
        self.0
            .into_iter()
            .filter_map(|(flag_key, entry)| match entry {
                TryParse::Parsed(variant) => Some((flag_key, variant)),
                TryParse::ParseFailed(raw) => {
                    log::warn!(target: "skylab",
                               flag_key = flag_key.as_str(),
                               raw:serde;
                               "skipping variant that failed to parse");
                    None
                }
            })
            .collect()
    }
}
