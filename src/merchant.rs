//! Merchant registration.

use std::sync::Arc;

use tracing::info;

use crate::clock::Clock;
use crate::error::{EngineError, Result};
use crate::ledger::Journal;
use crate::model::{MerchantAccount, MerchantId, Points, WalletOwner};
use crate::storage::LedgerStore;
use crate::utils::retry::{run_with_retry, RetryConfig};

/// Keeps merchant accounts and their wallets in place for releases.
pub struct MerchantRegistry {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
}

impl MerchantRegistry {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, retry: RetryConfig) -> Self {
        Self {
            store,
            clock,
            retry,
        }
    }

    /// Create or update a merchant account.
    ///
    /// Opens the merchant's wallet and its corporate wallet if they do not
    /// exist yet.
    #[tracing::instrument(
        name = "merchant.register",
        skip_all,
        fields(merchant = %account.id, corporate = %account.corporate_id)
    )]
    pub async fn register(&self, account: MerchantAccount) -> Result<MerchantAccount> {
        if let Some(percent) = account.reward_budget_percent {
            if percent < Points::ZERO || percent > Points::ONE_HUNDRED {
                return Err(EngineError::InvalidInput(format!(
                    "reward budget must be within 0..=100, got {}",
                    percent
                )));
            }
        }
        let registered = run_with_retry(&self.retry, "merchant.register", || {
            self.try_register(account.clone())
        })
        .await?;
        info!(version = registered.version, "Merchant registered");
        Ok(registered)
    }

    async fn try_register(&self, mut account: MerchantAccount) -> Result<MerchantAccount> {
        let store = self.store.as_ref();
        account.version = store
            .merchant(account.id)
            .await?
            .map(|stored| stored.version)
            .unwrap_or(0);

        let mut journal = Journal::new(store, self.clock.now());
        journal
            .wallet_or_open(WalletOwner::Merchant(account.id))
            .await?;
        journal
            .wallet_or_open(WalletOwner::Corporate(account.corporate_id))
            .await?;
        journal.put_merchant(account.clone());
        journal.commit().await?;

        account.version += 1;
        Ok(account)
    }

    pub async fn merchant(&self, id: MerchantId) -> Result<Option<MerchantAccount>> {
        Ok(self.store.merchant(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::clock::SystemClock;
    use crate::model::CorporateId;
    use crate::storage::MemoryLedgerStore;

    fn registry() -> (Arc<MemoryLedgerStore>, MerchantRegistry) {
        let store = Arc::new(MemoryLedgerStore::new());
        let registry =
            MerchantRegistry::new(store.clone(), Arc::new(SystemClock), RetryConfig::default());
        (store, registry)
    }

    #[tokio::test]
    async fn test_register_opens_wallets() {
        let (store, registry) = registry();
        let account = MerchantAccount::new(MerchantId::new(), CorporateId::new());

        let registered = registry.register(account.clone()).await.unwrap();
        assert_eq!(registered.version, 1);
        assert!(store
            .wallet(&WalletOwner::Merchant(account.id))
            .await
            .unwrap()
            .is_some());
        assert!(store
            .wallet(&WalletOwner::Corporate(account.corporate_id))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_reregister_updates_budget() {
        let (_, registry) = registry();
        let account = MerchantAccount::new(MerchantId::new(), CorporateId::new());
        registry.register(account.clone()).await.unwrap();

        let updated = registry
            .register(account.clone().with_reward_budget(Decimal::from(15)))
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        let stored = registry.merchant(account.id).await.unwrap().unwrap();
        assert_eq!(stored.reward_budget_percent, Some(Decimal::from(15)));
    }

    #[tokio::test]
    async fn test_budget_out_of_range() {
        let (_, registry) = registry();
        let account = MerchantAccount::new(MerchantId::new(), CorporateId::new())
            .with_reward_budget(Decimal::from(120));
        assert!(matches!(
            registry.register(account).await.unwrap_err(),
            EngineError::InvalidInput(_)
        ));
    }
}
