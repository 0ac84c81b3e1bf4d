use std::{collections::HashMap, sync::Arc};

use crate::{
    context::ContextProvider,
    http::{HttpClient, ReqwestHttpClient},
    identity::{InMemoryKeyValueStore, KeyValueStore},
    storage::{InMemoryStorage, Storage},
    Client, Variant,
};

/// Configuration for [`Client`].
///
/// # Examples
/// ```
/// # use skylab::{ClientConfig, Variant};
/// let client = ClientConfig::from_api_key("api-key")
///     .fallback_variant("off")
///     .initial_flag("new-onboarding", Variant::new("control"))
///     .to_client();
/// ```
pub struct ClientConfig {
    pub(crate) api_key: String,
    pub(crate) server_url: String,
    pub(crate) fallback_variant: Variant,
    pub(crate) initial_flags: HashMap<String, Variant>,
    pub(crate) storage: Box<dyn Storage>,
    pub(crate) identity_storage: Arc<dyn KeyValueStore>,
    pub(crate) http_client: Arc<dyn HttpClient>,
    pub(crate) context_provider: Option<Arc<dyn ContextProvider>>,
}

impl ClientConfig {
    /// Create a default Skylab configuration using the specified API key.
    ///
    /// ```
    /// # use skylab::ClientConfig;
    /// ClientConfig::from_api_key("api-key");
    /// ```
    pub fn from_api_key(api_key: impl Into<String>) -> Self {
        ClientConfig {
            api_key: api_key.into(),
            server_url: ClientConfig::DEFAULT_SERVER_URL.to_owned(),
            fallback_variant: Variant::default(),
            initial_flags: HashMap::new(),
            storage: Box::new(InMemoryStorage::new()),
            identity_storage: Arc::new(InMemoryKeyValueStore::new()),
            http_client: Arc::new(ReqwestHttpClient::new()),
            context_provider: None,
        }
    }

    /// Default server URL for API calls.
    pub const DEFAULT_SERVER_URL: &'static str = "https://api.lab.amplitude.com";

    /// Override server URL for API calls. Clients should use the default setting in most cases.
    pub fn server_url(mut self, server_url: impl Into<String>) -> Self {
        self.server_url = server_url.into();
        self
    }

    /// Variant returned for flags that have no resolved, call-site or initial variant.
    ///
    /// Defaults to a variant with an empty value.
    pub fn fallback_variant(mut self, fallback_variant: impl Into<Variant>) -> Self {
        self.fallback_variant = fallback_variant.into();
        self
    }

    /// Set variants to use for flags before the first fetch completes.
    pub fn initial_flags(mut self, initial_flags: HashMap<String, Variant>) -> Self {
        self.initial_flags = initial_flags;
        self
    }

    /// Add a single initial variant. See [`ClientConfig::initial_flags`].
    pub fn initial_flag(mut self, flag_key: impl Into<String>, variant: impl Into<Variant>) -> Self {
        self.initial_flags.insert(flag_key.into(), variant.into());
        self
    }

    /// Persist resolved variants with `storage`. Defaults to
    /// [`InMemoryStorage`](crate::storage::InMemoryStorage).
    pub fn storage(mut self, storage: impl Storage + 'static) -> Self {
        self.storage = Box::new(storage);
        self
    }

    /// Keep the enrollment id in `identity_storage`. Defaults to
    /// [`InMemoryKeyValueStore`](crate::identity::InMemoryKeyValueStore), so use a durable store to
    /// keep the id across restarts.
    pub fn identity_storage(mut self, identity_storage: impl KeyValueStore + 'static) -> Self {
        self.identity_storage = Arc::new(identity_storage);
        self
    }

    /// Override the HTTP transport.
    pub fn http_client(mut self, http_client: impl HttpClient + 'static) -> Self {
        self.http_client = Arc::new(http_client);
        self
    }

    /// Set a provider of device and platform attributes.
    pub fn context_provider(mut self, context_provider: impl ContextProvider + 'static) -> Self {
        self.context_provider = Some(Arc::new(context_provider));
        self
    }

    /// Create a new [`Client`] using the specified configuration.
    ///
    /// ```
    /// # use skylab::{ClientConfig, Client};
    /// let client: Client = ClientConfig::from_api_key("api-key").to_client();
    /// ```
    pub fn to_client(self) -> Client {
        Client::new(self)
    }
}
