//! Crate entrypoint wiring together configuration, the FreeIPA client and
//! the per-kind reconcilers.

pub mod config;
pub mod error;
pub mod freeipa;
pub mod reconcile;
pub mod resources;
pub mod validation;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

use config::ProviderConfig;
use freeipa::IpaRpc;
use freeipa::client::FreeIpaClient;
use resources::{DnsZoneReconciler, GroupReconciler, MembershipReconciler, UserReconciler};

use std::sync::Arc;

/// One authenticated FreeIPA session shared by every reconciler.
#[derive(Clone)]
pub struct Provider {
    pub rpc: Arc<dyn IpaRpc>,
}

impl Provider {
    pub fn connect(config: &ProviderConfig) -> error::Result<Self> {
        Ok(Self::with_rpc(Arc::new(FreeIpaClient::new(config)?)))
    }

    pub fn with_rpc(rpc: Arc<dyn IpaRpc>) -> Self {
        Self { rpc }
    }

    pub fn users(&self) -> UserReconciler {
        UserReconciler::new(self.rpc.clone())
    }

    pub fn groups(&self) -> GroupReconciler {
        GroupReconciler::new(self.rpc.clone())
    }

    pub fn memberships(&self) -> MembershipReconciler {
        MembershipReconciler::new(self.rpc.clone())
    }

    pub fn dns_zones(&self) -> DnsZoneReconciler {
        DnsZoneReconciler::new(self.rpc.clone())
    }
}
