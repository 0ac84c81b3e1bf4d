use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Once, RwLock},
    time::Instant,
};

use crate::{
    context::{build_context, ContextProvider, SkylabUser, UserContext},
    fetch_handle::{completion, FetchHandle},
    fetcher::VariantFetcher,
    identity::{EnrollmentId, IdentityStore},
    variant_cache::VariantCache,
    ClientConfig, Variant,
};

/// A client for the Skylab API.
///
/// In order to create a client instance, first create [`ClientConfig`].
///
/// # Fetching
///
/// [`Client::start()`], [`Client::set_user()`] and [`Client::refetch_all()`] resolve all variants
/// for the current user in the background and return a [`FetchHandle`] to wait for the outcome.
/// Fetches run on the current Tokio runtime if there is one, or on a short-lived background thread
/// otherwise.
///
/// # Lookups
///
/// [`Client::get_variant()`] never blocks and never fails. A flag resolves to, in order:
/// 1. the variant fetched from the server,
/// 2. the fallback passed to [`Client::get_variant_or()`],
/// 3. the initial variant from [`ClientConfig::initial_flag()`],
/// 4. [`ClientConfig::fallback_variant()`].
///
/// # Examples
/// ```no_run
/// # use skylab::{ClientConfig, SkylabUser};
/// let client = ClientConfig::from_api_key("api-key").to_client();
/// client.start(SkylabUser::new().user_id("user@company.com")).blocking_wait();
///
/// let variant = client.get_variant_or("new-onboarding", "control");
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    fallback_variant: Variant,
    initial_flags: HashMap<String, Variant>,
    variant_cache: VariantCache,
    identity: IdentityStore,
    fetcher: VariantFetcher,
    user: RwLock<Option<SkylabUser>>,
    context_provider: RwLock<Option<Arc<dyn ContextProvider>>>,
    storage_loaded: Once,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    ///
    /// ```
    /// # use skylab::{ClientConfig, Client};
    /// let client = Client::new(ClientConfig::from_api_key("api-key"));
    /// ```
    pub fn new(config: ClientConfig) -> Self {
        let fetcher = VariantFetcher::new(config.http_client, config.server_url, config.api_key);

        Client {
            inner: Arc::new(ClientInner {
                fallback_variant: config.fallback_variant,
                initial_flags: config.initial_flags,
                variant_cache: VariantCache::new(config.storage),
                identity: IdentityStore::new(config.identity_storage),
                fetcher,
                user: RwLock::new(None),
                context_provider: RwLock::new(config.context_provider),
                storage_loaded: Once::new(),
            }),
        }
    }

    /// Load persisted variants and the enrollment id, then fetch variants for `user`.
    ///
    /// Loading happens only on the first call.
    pub fn start(&self, user: SkylabUser) -> FetchHandle {
        self.inner.storage_loaded.call_once(|| {
            if let Err(err) = self.inner.variant_cache.load() {
                log::warn!(target: "skylab", "failed to load variants from storage: {:?}", err);
            }
        });
        self.set_user(user)
    }

    /// Replace the current user and fetch variants for them.
    pub fn set_user(&self, user: SkylabUser) -> FetchHandle {
        *self
            .inner
            .user
            .write()
            .expect("thread holding user lock should not panic") = Some(user);
        self.refetch_all()
    }

    /// Fetch variants for the current user again.
    pub fn refetch_all(&self) -> FetchHandle {
        let (completion, handle) = completion();
        let inner = self.inner.clone();
        let context = inner.context();

        spawn(async move {
            let success = inner.fetch_and_store(&context).await;
            completion.complete(success);
        });

        handle
    }

    /// Fetch variants for the current user on the calling task.
    ///
    /// Returns `true` if the variants were replaced with the server response.
    pub async fn fetch_all(&self) -> bool {
        let context = self.inner.context();
        self.inner.fetch_and_store(&context).await
    }

    /// Get the variant for `flag_key`, falling back to the initial and then the default variant.
    pub fn get_variant(&self, flag_key: &str) -> Variant {
        self.inner.resolve(flag_key, None)
    }

    /// Get the variant for `flag_key`, using `fallback` if the server did not resolve one.
    ///
    /// ```
    /// # fn test(client: &skylab::Client) {
    /// let variant = client.get_variant_or("new-onboarding", "control");
    /// if variant.value == "treatment" {
    ///     // show new onboarding
    /// }
    /// # }
    /// ```
    pub fn get_variant_or(&self, flag_key: &str, fallback: impl Into<Variant>) -> Variant {
        self.inner.resolve(flag_key, Some(fallback.into()))
    }

    /// Get a copy of all variants resolved by the server. Fallbacks are not included.
    pub fn get_variants(&self) -> HashMap<String, Variant> {
        (*self.inner.variant_cache.snapshot()).clone()
    }

    /// Use `context_provider` for device and platform attributes in subsequent fetches.
    pub fn set_context_provider(&self, context_provider: impl ContextProvider + 'static) -> &Self {
        *self
            .inner
            .context_provider
            .write()
            .expect("thread holding context provider lock should not panic") =
            Some(Arc::new(context_provider));
        self
    }

    /// Get the current user.
    pub fn user(&self) -> Option<SkylabUser> {
        self.inner
            .user
            .read()
            .expect("thread holding user lock should not panic")
            .clone()
    }

    /// Get the anonymous enrollment id of this installation.
    pub fn enrollment_id(&self) -> EnrollmentId {
        self.inner.identity.get_or_create_enrollment_id()
    }
}

impl ClientInner {
    fn context(&self) -> UserContext {
        let enrollment_id = self.identity.get_or_create_enrollment_id();
        let user = self
            .user
            .read()
            .expect("thread holding user lock should not panic")
            .clone();
        let context_provider = self
            .context_provider
            .read()
            .expect("thread holding context provider lock should not panic")
            .clone();

        build_context(user.as_ref(), context_provider.as_deref(), &enrollment_id)
    }

    async fn fetch_and_store(&self, context: &UserContext) -> bool {
        let start = Instant::now();

        let Ok(variants) = self.fetcher.fetch_variants(context).await else {
            // The fetcher has logged the reason already.
            return false;
        };

        let count = variants.len();
        // A persistence failure is logged by the cache and does not undo the in-memory update.
        let _ = self.variant_cache.replace(variants);

        log::debug!(target: "skylab",
                    count,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    context:serde = context;
                    "fetched all variants");
        true
    }

    fn resolve(&self, flag_key: &str, fallback: Option<Variant>) -> Variant {
        let variant = self
            .variant_cache
            .get(flag_key)
            .or(fallback)
            .or_else(|| self.initial_flags.get(flag_key).cloned())
            .unwrap_or_else(|| self.fallback_variant.clone());

        log::trace!(target: "skylab",
                    flag_key,
                    variant:serde = variant;
                    "resolved variant");

        variant
    }
}

/// Run `task` on the current Tokio runtime, or on a dedicated thread if there is none.
fn spawn<F>(task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
        runtime.spawn(task);
        return;
    }

    let spawned = std::thread::Builder::new()
        .name("skylab-fetch".to_owned())
        .spawn(move || {
            match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(task),
                Err(err) => {
                    log::warn!(target: "skylab", "failed to start fetch runtime: {:?}", err);
                }
            }
        });

    if let Err(err) = spawned {
        log::warn!(target: "skylab", "failed to spawn fetch thread: {:?}", err);
    }
}
