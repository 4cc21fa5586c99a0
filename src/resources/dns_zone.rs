//! Master DNS zones served by FreeIPA's integrated BIND.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, json};
use tracing::info;

use super::pull;
use crate::error::{ProviderError, Result};
use crate::freeipa::IpaRpc;
use crate::freeipa::types::Record;
use crate::reconcile::{self, Field, Reconciler, ResourceModel, diff};
use crate::validation;
use crate::value::Attr;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsZone {
    pub id: Attr<String>,
    /// Forward FQDN, or an address / network when `is_reverse_zone` is set.
    pub zone_name: String,
    pub is_reverse_zone: Attr<bool>,
    pub disable_zone: Attr<bool>,
    pub skip_overlap_check: Attr<bool>,
    pub skip_nameserver_check: Attr<bool>,
    pub authoritative_nameserver: Attr<String>,
    pub admin_email_address: Attr<String>,
    pub soa_serial_number: Attr<i64>,
    pub soa_refresh: Attr<i64>,
    pub soa_retry: Attr<i64>,
    pub soa_expire: Attr<i64>,
    pub soa_minimum: Attr<i64>,
    pub ttl: Attr<i64>,
    pub default_ttl: Attr<i64>,
    pub dynamic_updates: Attr<bool>,
    pub bind_update_policy: Attr<String>,
    /// Semicolon separated, e.g. `any;` or `192.0.2.0/24;!192.0.2.1;`.
    pub allow_query: Attr<String>,
    pub allow_transfer: Attr<String>,
    pub zone_forwarders: Attr<Vec<String>>,
    pub allow_ptr_sync: Attr<bool>,
    pub allow_inline_dnssec_signing: Attr<bool>,
    pub nsec3param_record: Attr<String>,
    /// Absolute zone name as the server spells it.
    pub computed_zone_name: Attr<String>,
}

/// Absolute name of a forward zone.
pub fn forward_zone_name(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    }
}

/// Reverse zone for an address or `address/prefix`.
///
/// IPv4 defaults to /24 and needs a prefix on an octet boundary, IPv6
/// defaults to /64 and needs a prefix on a nibble boundary.
pub fn reverse_zone_name(network: &str) -> Result<String> {
    let (addr, prefix) = match network.split_once('/') {
        Some((addr, prefix)) => {
            let prefix: u32 = prefix.trim().parse().map_err(|_| {
                ProviderError::validation(format!(
                    "reverse zone {network}: prefix length is not a number"
                ))
            })?;
            (addr, Some(prefix))
        }
        None => (network, None),
    };
    let ip: IpAddr = addr.trim().parse().map_err(|_| {
        ProviderError::validation(format!("reverse zone {network}: not an IPv4 or IPv6 address"))
    })?;

    match ip {
        IpAddr::V4(v4) => {
            let prefix = prefix.unwrap_or(24);
            if prefix == 0 || prefix > 32 || prefix % 8 != 0 {
                return Err(ProviderError::validation(format!(
                    "reverse zone {network}: IPv4 prefix must be 8, 16, 24 or 32"
                )));
            }
            let octets = v4.octets();
            let labels: Vec<String> = octets[..(prefix / 8) as usize]
                .iter()
                .rev()
                .map(u8::to_string)
                .collect();
            Ok(format!("{}.in-addr.arpa.", labels.join(".")))
        }
        IpAddr::V6(v6) => {
            let prefix = prefix.unwrap_or(64);
            if prefix == 0 || prefix > 128 || prefix % 4 != 0 {
                return Err(ProviderError::validation(format!(
                    "reverse zone {network}: IPv6 prefix must be a multiple of 4"
                )));
            }
            let nibbles: Vec<String> = v6
                .octets()
                .iter()
                .flat_map(|b| [b >> 4, b & 0x0f])
                .take((prefix / 4) as usize)
                .map(|n| format!("{n:x}"))
                .collect();
            let reversed: Vec<&str> = nibbles.iter().rev().map(String::as_str).collect();
            Ok(format!("{}.ip6.arpa.", reversed.join(".")))
        }
    }
}

impl DnsZone {
    pub fn new(zone_name: &str) -> Self {
        Self {
            zone_name: zone_name.to_string(),
            ..Default::default()
        }
    }

    /// Absolute zone name derived from the configuration alone.
    pub fn local_name(&self) -> Result<String> {
        if self.is_reverse_zone.is_true() {
            reverse_zone_name(&self.zone_name)
        } else {
            Ok(forward_zone_name(&self.zone_name))
        }
    }

    /// Name used to address the zone in RPCs once it exists.
    fn remote_name(&self) -> Result<String> {
        match self.id.known() {
            Some(id) => Ok(id.clone()),
            None => self.local_name(),
        }
    }

    fn apply_record(&mut self, record: &Record, adopt: bool) {
        pull(
            &mut self.disable_zone,
            "idnszoneactive",
            record.bool("idnszoneactive").map(|active| !active),
            adopt,
        );
        pull(
            &mut self.authoritative_nameserver,
            "idnssoamname",
            record.string("idnssoamname"),
            adopt,
        );
        pull(&mut self.admin_email_address, "idnssoarname", record.string("idnssoarname"), adopt);
        pull(&mut self.soa_serial_number, "idnssoaserial", record.int("idnssoaserial"), adopt);
        pull(&mut self.soa_refresh, "idnssoarefresh", record.int("idnssoarefresh"), adopt);
        pull(&mut self.soa_retry, "idnssoaretry", record.int("idnssoaretry"), adopt);
        pull(&mut self.soa_expire, "idnssoaexpire", record.int("idnssoaexpire"), adopt);
        pull(&mut self.soa_minimum, "idnssoaminimum", record.int("idnssoaminimum"), adopt);
        pull(&mut self.ttl, "dnsttl", record.int("dnsttl"), adopt);
        pull(&mut self.default_ttl, "dnsdefaultttl", record.int("dnsdefaultttl"), adopt);
        pull(
            &mut self.dynamic_updates,
            "idnsallowdynupdate",
            record.bool("idnsallowdynupdate"),
            adopt,
        );
        pull(
            &mut self.bind_update_policy,
            "idnsupdatepolicy",
            record.string("idnsupdatepolicy"),
            adopt,
        );
        pull(&mut self.allow_query, "idnsallowquery", record.string("idnsallowquery"), adopt);
        pull(
            &mut self.allow_transfer,
            "idnsallowtransfer",
            record.string("idnsallowtransfer"),
            adopt,
        );
        pull(&mut self.zone_forwarders, "idnsforwarders", record.strings("idnsforwarders"), adopt);
        pull(&mut self.allow_ptr_sync, "idnsallowsyncptr", record.bool("idnsallowsyncptr"), adopt);
        pull(
            &mut self.allow_inline_dnssec_signing,
            "idnssecinlinesigning",
            record.bool("idnssecinlinesigning"),
            adopt,
        );
        pull(
            &mut self.nsec3param_record,
            "nsec3paramrecord",
            record.string("nsec3paramrecord"),
            adopt,
        );
        // computed, always refreshed
        if let Some(name) = record.string("idnsname") {
            self.computed_zone_name = Attr::Known(name);
        }
    }
}

impl ResourceModel for DnsZone {
    const KIND: &'static str = "dns zone";

    fn id(&self) -> Option<&str> {
        self.id.known().map(String::as_str)
    }

    fn validate(&self) -> Result<()> {
        if self.is_reverse_zone.is_true() {
            reverse_zone_name(&self.zone_name)?;
        } else {
            validation::validate_fqdn_ascii(&self.zone_name)?;
        }
        Ok(())
    }

    fn fields(&self) -> Result<Vec<Field>> {
        Ok(vec![
            Field::scalar("idnssoamname", &self.authoritative_nameserver),
            Field::scalar("idnssoarname", &self.admin_email_address),
            Field::scalar("idnssoaserial", &self.soa_serial_number),
            Field::scalar("idnssoarefresh", &self.soa_refresh),
            Field::scalar("idnssoaretry", &self.soa_retry),
            Field::scalar("idnssoaexpire", &self.soa_expire),
            Field::scalar("idnssoaminimum", &self.soa_minimum),
            Field::scalar("dnsttl", &self.ttl),
            Field::scalar("dnsdefaultttl", &self.default_ttl),
            Field::scalar("idnsallowdynupdate", &self.dynamic_updates),
            Field::scalar("idnsupdatepolicy", &self.bind_update_policy),
            Field::scalar("idnsallowquery", &self.allow_query),
            Field::scalar("idnsallowtransfer", &self.allow_transfer),
            Field::list("idnsforwarders", &self.zone_forwarders),
            Field::scalar("idnsallowsyncptr", &self.allow_ptr_sync),
            Field::scalar("idnssecinlinesigning", &self.allow_inline_dnssec_signing),
            Field::scalar("nsec3paramrecord", &self.nsec3param_record),
        ])
    }

    fn replaced_fields(&self, prior: &Self) -> Vec<&'static str> {
        // The skip flags only steer `dnszone_add` and are kept in state as planned.
        let mut out = Vec::new();
        if self.zone_name != prior.zone_name {
            out.push("zone_name");
        }
        if self.is_reverse_zone.is_true() != prior.is_reverse_zone.is_true() {
            out.push("is_reverse_zone");
        }
        out
    }

    fn side_calls(&self, prior: &Self) -> Result<Vec<String>> {
        Ok(match diff::toggle(&self.disable_zone, &prior.disable_zone) {
            Some(true) => vec!["dnszone_disable".to_string()],
            Some(false) => vec!["dnszone_enable".to_string()],
            None => Vec::new(),
        })
    }
}

pub struct DnsZoneReconciler {
    rpc: Arc<dyn IpaRpc>,
}

impl DnsZoneReconciler {
    pub fn new(rpc: Arc<dyn IpaRpc>) -> Self {
        Self { rpc }
    }

    async fn set_enabled(&self, zone: &str, disable: bool) -> Result<()> {
        let method = if disable { "dnszone_disable" } else { "dnszone_enable" };
        reconcile::switch(self.rpc.as_ref(), method, vec![json!(zone)]).await
    }
}

#[async_trait]
impl Reconciler for DnsZoneReconciler {
    type Model = DnsZone;

    async fn create(&self, plan: DnsZone) -> Result<DnsZone> {
        plan.validate()?;
        let local = plan.local_name()?;

        let mut options = diff::create_options(&plan.fields()?);
        if plan.skip_overlap_check.is_true() {
            options.set("skip_overlap_check", true);
        }
        if plan.skip_nameserver_check.is_true() {
            options.set("skip_nameserver_check", true);
        }
        info!(zone = %local, reverse = plan.is_reverse_zone.is_true(), "creating dns zone");
        let res = self
            .rpc
            .call("dnszone_add", vec![json!(local)], options.into_options())
            .await?;
        let name = res.record().string("idnsname").unwrap_or(local);

        if plan.disable_zone.is_true() {
            self.set_enabled(&name, true).await?;
        }

        let mut state = reconcile::settle(plan)?;
        state.id = Attr::Known(name.clone());
        state.computed_zone_name = Attr::Known(name);
        Ok(state)
    }

    async fn read(&self, mut state: DnsZone) -> Result<Option<DnsZone>> {
        let name = state.remote_name()?;
        let args = vec![json!(name)];
        let Some(record) = reconcile::show(self.rpc.as_ref(), "dnszone_show", args).await? else {
            info!(zone = %name, "zone no longer exists, dropping from state");
            return Ok(None);
        };
        state.apply_record(&record, false);
        Ok(Some(state))
    }

    async fn update(&self, plan: DnsZone, prior: DnsZone) -> Result<DnsZone> {
        plan.validate()?;
        let replaced = plan.replaced_fields(&prior);
        if !replaced.is_empty() {
            return Err(ProviderError::validation(format!(
                "zone {}: {} cannot change in place, the zone must be replaced",
                prior.zone_name,
                replaced.join(", ")
            )));
        }

        let name = prior.remote_name()?;
        let changes = diff::diff(&plan.fields()?, &prior.fields()?);
        reconcile::modify(self.rpc.as_ref(), "dnszone_mod", vec![json!(name)], changes).await?;
        if let Some(disable) = diff::toggle(&plan.disable_zone, &prior.disable_zone) {
            self.set_enabled(&name, disable).await?;
        }

        let mut state = reconcile::settle(plan)?;
        state.id = prior.id;
        state.computed_zone_name = prior.computed_zone_name;
        Ok(state)
    }

    async fn delete(&self, state: &DnsZone) -> Result<()> {
        let name = state.remote_name()?;
        info!(zone = %name, "deleting dns zone");
        self.rpc.call("dnszone_del", vec![json!(name)], Map::new()).await?;
        Ok(())
    }

    async fn import(&self, id: &str) -> Result<Option<DnsZone>> {
        let name = forward_zone_name(id);
        let args = vec![json!(name)];
        let Some(record) = reconcile::show(self.rpc.as_ref(), "dnszone_show", args).await? else {
            return Ok(None);
        };
        // Adopted zones keep their absolute name, reverse zones included.
        let mut zone = DnsZone::new(id.trim_end_matches('.'));
        zone.apply_record(&record, true);
        zone.id = Attr::Known(zone.computed_zone_name.known().cloned().unwrap_or(name));
        Ok(Some(zone))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freeipa::types::RpcError;
    use crate::reconcile::PlannedAction;
    use crate::testing::{MockRpc, not_found};

    fn setup() -> (Arc<MockRpc>, DnsZoneReconciler) {
        let rpc = Arc::new(MockRpc::new());
        let zones = DnsZoneReconciler::new(rpc.clone());
        (rpc, zones)
    }

    #[test]
    fn forward_names_are_absolute() {
        assert_eq!(forward_zone_name("ipa.example.lan"), "ipa.example.lan.");
        assert_eq!(forward_zone_name("ipa.example.lan."), "ipa.example.lan.");
    }

    #[test]
    fn ipv4_reverse_names() {
        assert_eq!(reverse_zone_name("192.168.23.0").unwrap(), "23.168.192.in-addr.arpa.");
        assert_eq!(reverse_zone_name("10.1.0.0/16").unwrap(), "1.10.in-addr.arpa.");
        assert_eq!(reverse_zone_name("10.0.0.0/8").unwrap(), "10.in-addr.arpa.");
        assert!(reverse_zone_name("192.168.23.0/20").is_err());
        assert!(reverse_zone_name("not-an-ip").is_err());
    }

    #[test]
    fn ipv6_reverse_names() {
        assert_eq!(
            reverse_zone_name("2001:db8::").unwrap(),
            "0.0.0.0.0.0.0.0.8.b.d.0.1.0.0.2.ip6.arpa."
        );
        assert_eq!(reverse_zone_name("2001:db8::/32").unwrap(), "8.b.d.0.1.0.0.2.ip6.arpa.");
        assert!(reverse_zone_name("2001:db8::/30").is_err());
    }

    #[tokio::test]
    async fn create_reverse_zone() {
        let (rpc, zones) = setup();
        rpc.respond(
            "dnszone_add",
            json!({"idnsname": [{"__dns_name__": "23.168.192.in-addr.arpa."}]}),
        );
        let plan = DnsZone {
            is_reverse_zone: Attr::Known(true),
            skip_overlap_check: Attr::Known(true),
            ..DnsZone::new("192.168.23.0")
        };
        let state = zones.create(plan).await.unwrap();
        let call = &rpc.calls_to("dnszone_add")[0];
        assert_eq!(call.args, vec![json!("23.168.192.in-addr.arpa.")]);
        assert_eq!(call.options["skip_overlap_check"], json!(true));
        assert_eq!(state.computed_zone_name, Attr::Known("23.168.192.in-addr.arpa.".into()));
        assert_eq!(state.id, state.computed_zone_name);
    }

    #[tokio::test]
    async fn create_disabled_forward_zone() {
        let (rpc, zones) = setup();
        let plan = DnsZone {
            disable_zone: Attr::Known(true),
            soa_refresh: Attr::Known(3600),
            soa_retry: Attr::Known(900),
            ..DnsZone::new("ipa.example.lan")
        };
        let state = zones.create(plan).await.unwrap();
        assert_eq!(rpc.methods(), vec!["dnszone_add", "dnszone_disable"]);
        let add = &rpc.calls()[0];
        assert_eq!(add.options["idnssoarefresh"], json!(3600));
        assert_eq!(add.options["idnssoaretry"], json!(900));
        assert_eq!(state.id, Attr::Known("ipa.example.lan.".into()));
        assert_eq!(rpc.calls()[1].args, vec![json!("ipa.example.lan.")]);
    }

    #[tokio::test]
    async fn read_maps_booleans_without_inverting() {
        let (rpc, zones) = setup();
        rpc.respond("dnszone_show", json!({
            "idnsname": [{"__dns_name__": "ipa.example.lan."}],
            "idnszoneactive": ["TRUE"],
            "idnsallowdynupdate": ["TRUE"],
            "idnsallowsyncptr": ["FALSE"],
            "idnssoarefresh": ["3600"],
        }));
        let state = DnsZone {
            id: Attr::Known("ipa.example.lan.".into()),
            disable_zone: Attr::Known(true),
            dynamic_updates: Attr::Known(false),
            allow_ptr_sync: Attr::Known(false),
            soa_refresh: Attr::Known(7200),
            ..DnsZone::new("ipa.example.lan")
        };
        let read = zones.read(state).await.unwrap().unwrap();
        assert_eq!(read.disable_zone, Attr::Known(false));
        assert_eq!(read.dynamic_updates, Attr::Known(true));
        assert_eq!(read.allow_ptr_sync, Attr::Known(false));
        assert_eq!(read.soa_refresh, Attr::Known(3600));
        assert_eq!(read.ttl, Attr::Unset);
        assert_eq!(read.computed_zone_name, Attr::Known("ipa.example.lan.".into()));
    }

    #[tokio::test]
    async fn update_sends_diff_and_toggle() {
        let (rpc, zones) = setup();
        let prior = DnsZone {
            id: Attr::Known("ipa.example.lan.".into()),
            ttl: Attr::Known(300),
            allow_query: Attr::Known("any;".into()),
            ..DnsZone::new("ipa.example.lan")
        };
        let plan = DnsZone {
            ttl: Attr::Known(600),
            allow_query: Attr::Unset,
            disable_zone: Attr::Known(true),
            ..DnsZone::new("ipa.example.lan")
        };
        let state = zones.update(plan, prior).await.unwrap();
        assert_eq!(rpc.methods(), vec!["dnszone_mod", "dnszone_disable"]);
        let m = &rpc.calls()[0];
        assert_eq!(m.args, vec![json!("ipa.example.lan.")]);
        assert_eq!(m.options["dnsttl"], json!(600));
        assert_eq!(m.options["idnsallowquery"], json!(""));
        assert_eq!(m.options.len(), 2);
        assert_eq!(state.id, Attr::Known("ipa.example.lan.".into()));
    }

    #[tokio::test]
    async fn already_disabled_zone_is_fine() {
        let (rpc, zones) = setup();
        rpc.fail("dnszone_disable", RpcError {
            code: 4205,
            name: "AlreadyInactive".into(),
            message: "This entry is already disabled".into(),
        });
        let prior = DnsZone::new("ipa.example.lan");
        let plan = DnsZone {
            disable_zone: Attr::Known(true),
            ..DnsZone::new("ipa.example.lan")
        };
        zones.update(plan, prior).await.unwrap();
    }

    #[tokio::test]
    async fn missing_zone_leaves_state() {
        let (rpc, zones) = setup();
        rpc.fail("dnszone_show", not_found("ipa.example.lan."));
        assert!(zones.read(DnsZone::new("ipa.example.lan")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn import_reverse_zone() {
        let (rpc, zones) = setup();
        rpc.respond("dnszone_show", json!({
            "idnsname": [{"__dns_name__": "23.168.192.in-addr.arpa."}],
            "idnszoneactive": ["TRUE"],
            "dnsttl": ["300"],
        }));
        let zone = zones.import("23.168.192.in-addr.arpa.").await.unwrap().unwrap();
        assert_eq!(zone.zone_name, "23.168.192.in-addr.arpa");
        assert_eq!(zone.is_reverse_zone, Attr::Unset);
        assert!(zone.validate().is_ok());
        assert_eq!(zone.disable_zone, Attr::Known(false));
        assert_eq!(zone.ttl, Attr::Known(300));
        assert_eq!(zone.id, Attr::Known("23.168.192.in-addr.arpa.".into()));
    }

    #[tokio::test]
    async fn skip_flags_change_in_place() {
        let (rpc, zones) = setup();
        let prior = DnsZone {
            id: Attr::Known("ipa.example.lan.".into()),
            ..DnsZone::new("ipa.example.lan")
        };
        let plan = DnsZone {
            skip_overlap_check: Attr::Known(true),
            skip_nameserver_check: Attr::Known(true),
            ..DnsZone::new("ipa.example.lan")
        };
        assert_eq!(reconcile::plan(&plan, Some(&prior)).unwrap(), PlannedAction::NoOp);

        let state = zones.update(plan, prior).await.unwrap();
        assert!(rpc.calls().is_empty());
        assert_eq!(state.skip_overlap_check, Attr::Known(true));
        assert_eq!(state.skip_nameserver_check, Attr::Known(true));
        assert_eq!(state.id, Attr::Known("ipa.example.lan.".into()));
    }

    #[tokio::test]
    async fn delete_uses_the_absolute_name() {
        let (rpc, zones) = setup();
        let state = DnsZone {
            is_reverse_zone: Attr::Known(true),
            ..DnsZone::new("192.168.23.0")
        };
        zones.delete(&state).await.unwrap();
        assert_eq!(rpc.methods(), vec!["dnszone_del"]);
        assert_eq!(rpc.calls()[0].args, vec![json!("23.168.192.in-addr.arpa.")]);
    }

    #[tokio::test]
    async fn deleting_a_missing_zone_fails() {
        let (rpc, zones) = setup();
        rpc.fail("dnszone_del", not_found("ipa.example.lan."));
        let err = zones.delete(&DnsZone::new("ipa.example.lan")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn renaming_replaces() {
        let prior = DnsZone::new("ipa.example.lan");
        let plan = DnsZone::new("lab.example.lan");
        assert_eq!(
            reconcile::plan(&plan, Some(&prior)).unwrap(),
            PlannedAction::Replace { fields: vec!["zone_name"] }
        );
    }
}
