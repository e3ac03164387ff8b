//! The shared service graph: one store, one clock, every component wired to
//! both.

use std::sync::Arc;

use openescrow_ledger::Ledger;
use openescrow_market::{Matcher, OfferBook};
use openescrow_risk::{FraudEngine, KycService};
use openescrow_store::Store;
use openescrow_types::{Clock, EngineConfig, Result, UserId};
use tracing::warn;

use crate::notify::{self, Notification, Notifier};

pub struct Services {
    pub config: EngineConfig,
    pub store: Arc<Store>,
    pub clock: Arc<dyn Clock>,
    pub ledger: Ledger,
    pub offers: OfferBook,
    pub matcher: Matcher,
    pub fraud: FraudEngine,
    pub kyc: KycService,
    pub notifier: Arc<dyn Notifier>,
}

impl Services {
    /// Validate `config` and build every component over a fresh store.
    pub fn new(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let store = Arc::new(Store::from_config(&config.store));
        Ok(Arc::new(Self {
            ledger: Ledger::new(store.clone(), clock.clone()),
            offers: OfferBook::new(store.clone(), clock.clone(), config.orders.clone()),
            matcher: Matcher::new(store.clone(), config.matching.clone()),
            fraud: FraudEngine::new(store.clone(), clock.clone(), config.risk.clone()),
            kyc: KycService::new(store.clone(), clock.clone(), config.kyc.clone()),
            config,
            store,
            clock,
            notifier,
        }))
    }

    pub(crate) fn notify(&self, notifications: &[Notification]) {
        notify::dispatch(self.notifier.as_ref(), notifications);
    }

    /// Recompute risk profiles after a commit. Failures are logged; the
    /// next scheduled refresh catches up.
    pub(crate) fn refresh_risk(&self, users: &[UserId]) {
        for &user in users {
            if let Err(err) = self.fraud.update_risk_profile(user) {
                warn!(user = %user, error = %err, "risk profile refresh failed");
            }
        }
    }
}
