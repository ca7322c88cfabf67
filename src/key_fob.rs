/// Key Fob
///
/// Remote key-holder bound to one vehicle. It signs challenge strings with
/// the private key the vehicle's keypair store authorizes, loading it fresh
/// for every signature so a rotation is picked up immediately.
use std::path::Path;

use crate::hsm::crypto::sign_base64;
use crate::hsm::errors::Result;
use crate::hsm::keypair_store::KeypairStore;
use crate::hsm::performance::{Operation, SharedMetrics, track};

#[derive(Debug, Clone)]
pub struct KeyFob {
    store: KeypairStore,
    metrics: Option<SharedMetrics>,
}

impl KeyFob {
    /// Pair with the key set of `vehicle_id` under `keys_dir`
    pub fn new(keys_dir: impl AsRef<Path>, vehicle_id: &str) -> Result<Self> {
        Ok(Self::from_store(KeypairStore::open(keys_dir, vehicle_id)?))
    }

    pub fn from_store(store: KeypairStore) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn vehicle_id(&self) -> &str {
        self.store.vehicle_id()
    }

    /// Sign the UTF-8 bytes of `challenge`, returning base64 `r || s`
    pub fn sign_challenge(&self, challenge: &str) -> Result<String> {
        let key = self.store.authorize_signer()?;
        track(self.metrics.as_ref(), Operation::Sign, || {
            sign_base64(challenge.as_bytes(), &key)
        })
    }
}
