// Copyright (c) 2025 Haven Developers
// Distributed under the MIT software license

use haven_core::model::SystemSettings;
use haven_core::store::WalletStore;

use crate::Error;

/// Load the recognized system settings, falling back to defaults for
/// anything unset or unparseable.
pub async fn load_system_settings(store: &dyn WalletStore) -> Result<SystemSettings, Error> {
    let mut settings = SystemSettings::default();
    if let Some(value) = store.setting(SystemSettings::DUST_THRESHOLD).await? {
        if let Ok(value) = value.parse() {
            settings.dust_threshold = value;
        }
    }
    if let Some(value) = store.setting(SystemSettings::CONFIRMATION_THRESHOLD).await? {
        if let Ok(value) = value.parse() {
            settings.confirmation_threshold = value;
        }
    }
    if let Some(value) = store
        .setting(SystemSettings::DEEP_CONFIRMATION_THRESHOLD)
        .await?
    {
        if let Ok(value) = value.parse() {
            settings.deep_confirmation_threshold = value;
        }
    }
    Ok(settings)
}

#[cfg(test)]
mod test {
    use haven_core::store::MemoryStore;

    use super::*;

    #[tokio::test]
    async fn unset_keys_fall_back_to_defaults() {
        let store = MemoryStore::new();
        let settings = load_system_settings(&store).await.unwrap();
        assert_eq!(settings, SystemSettings::default());
    }

    #[tokio::test]
    async fn stored_values_override_defaults() {
        let store = MemoryStore::new();
        store.set_setting(SystemSettings::DUST_THRESHOLD, "1000").await;
        store
            .set_setting(SystemSettings::CONFIRMATION_THRESHOLD, "2")
            .await;
        store
            .set_setting(SystemSettings::DEEP_CONFIRMATION_THRESHOLD, "not a number")
            .await;

        let settings = load_system_settings(&store).await.unwrap();
        assert_eq!(settings.dust_threshold, 1000);
        assert_eq!(settings.confirmation_threshold, 2);
        assert_eq!(settings.deep_confirmation_threshold, 3);
    }
}
