use skylab::{identity::FileKeyValueStore, storage::FileStorage, ClientConfig, SkylabUser};

pub fn main() {
    env_logger::init();

    let api_key = std::env::var("SKYLAB_API_KEY").unwrap();
    let client = ClientConfig::from_api_key(api_key)
        .storage(FileStorage::new("skylab-variants.json"))
        .identity_storage(FileKeyValueStore::new("skylab-identity.json"))
        .fallback_variant("off")
        .to_client();

    // Fetch variants in the background. Until this completes, the client returns variants
    // persisted by a previous run or the fallback.
    let updated = client
        .start(SkylabUser::new().user_id("test-user"))
        .blocking_wait();
    println!("Fetched: {}", updated);

    let variant = client.get_variant_or("a-flag", "control");

    println!("Variant: {:?}", variant);
}
