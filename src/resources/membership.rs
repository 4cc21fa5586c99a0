//! Members of a group: users, nested groups and external (trusted domain)
//! principals.
//!
//! Membership is kept apart from the group itself so several configurations
//! can manage members of one group. Only the members recorded in state are
//! ever touched; members added by other means are left alone.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::error::{ProviderError, Result};
use crate::freeipa::IpaRpc;
use crate::freeipa::types::Record;
use crate::reconcile::members::{self, MemberDelta};
use crate::reconcile::{self, Field, Reconciler, ResourceModel};
use crate::validation;
use crate::value::Attr;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupMembership {
    pub id: Attr<String>,
    /// Group the members belong to.
    pub name: String,
    pub users: Attr<Vec<String>>,
    pub groups: Attr<Vec<String>>,
    pub external_members: Attr<Vec<String>>,
}

/// Option name used by `group_add_member`, attribute reported by `group_show`.
const KINDS: [(&str, &str); 3] = [
    ("user", "member_user"),
    ("group", "member_group"),
    ("ipaexternalmember", "ipaexternalmember"),
];

impl GroupMembership {
    pub fn new(group: &str) -> Self {
        Self {
            name: group.to_string(),
            ..Default::default()
        }
    }

    fn sets(&self) -> [&Attr<Vec<String>>; 3] {
        [&self.users, &self.groups, &self.external_members]
    }

    fn sets_mut(&mut self) -> [&mut Attr<Vec<String>>; 3] {
        [&mut self.users, &mut self.groups, &mut self.external_members]
    }

    /// Per member kind, what to add and what to remove to get from `prior`
    /// to `self`. Pending sets are left untouched.
    fn deltas(&self, prior: Option<&Self>) -> [MemberDelta; 3] {
        let empty = Attr::Unset;
        let before = prior.map(Self::sets).unwrap_or([&empty, &empty, &empty]);
        let after = self.sets();
        std::array::from_fn(|i| {
            if after[i].is_pending() {
                return MemberDelta::default();
            }
            let had = before[i].known().map(Vec::as_slice).unwrap_or_default();
            let want = after[i].known().map(Vec::as_slice).unwrap_or_default();
            members::delta(had, want)
        })
    }

    fn apply_record(&mut self, record: &Record, adopt: bool) {
        let group = self.name.clone();
        for (set, (_, attr)) in self.sets_mut().into_iter().zip(KINDS) {
            let remote = record.strings(attr).unwrap_or_default();
            if adopt {
                *set = Attr::Known(remote);
            } else if let Attr::Known(tracked) = set {
                let kept = members::narrow(tracked, &remote);
                if kept.len() != tracked.len() {
                    debug!(
                        group = %group,
                        attribute = attr,
                        before = tracked.len(),
                        after = kept.len(),
                        "members removed remotely"
                    );
                }
                *tracked = kept;
            }
        }
    }
}

fn member_options(
    pick: impl Fn(&MemberDelta) -> &Vec<String>,
    deltas: &[MemberDelta; 3],
) -> Map<String, Value> {
    let mut options = Map::new();
    for (delta, (option, _)) in deltas.iter().zip(KINDS) {
        let names = pick(delta);
        if !names.is_empty() {
            options.insert(option.to_string(), json!(names));
        }
    }
    options
}

impl ResourceModel for GroupMembership {
    const KIND: &'static str = "group membership";

    fn id(&self) -> Option<&str> {
        self.id.known().map(String::as_str)
    }

    fn validate(&self) -> Result<()> {
        validation::validate_name("name", &self.name)?;
        Ok(())
    }

    /// Members are not set through a modify call.
    fn fields(&self) -> Result<Vec<Field>> {
        Ok(Vec::new())
    }

    fn replaced_fields(&self, prior: &Self) -> Vec<&'static str> {
        if self.name != prior.name {
            vec!["name"]
        } else {
            Vec::new()
        }
    }

    fn side_calls(&self, prior: &Self) -> Result<Vec<String>> {
        let deltas = self.deltas(Some(prior));
        let mut calls = Vec::new();
        if deltas.iter().any(|d| !d.add.is_empty()) {
            calls.push("group_add_member".to_string());
        }
        if deltas.iter().any(|d| !d.remove.is_empty()) {
            calls.push("group_remove_member".to_string());
        }
        Ok(calls)
    }
}

pub struct MembershipReconciler {
    rpc: Arc<dyn IpaRpc>,
}

impl MembershipReconciler {
    pub fn new(rpc: Arc<dyn IpaRpc>) -> Self {
        Self { rpc }
    }

    /// One add or remove call for every kind at once. Per-member failures
    /// come back in a successful reply and are turned into an error here.
    async fn change(&self, method: &str, group: &str, options: Map<String, Value>) -> Result<()> {
        if options.is_empty() {
            return Ok(());
        }
        debug!(group, method, kinds = ?options.keys().collect::<Vec<_>>(), "changing members");
        let res = self.rpc.call(method, vec![json!(group)], options).await?;
        let failures = res.failures();
        if !failures.is_empty() {
            return Err(ProviderError::Member {
                group: group.to_string(),
                failures,
            });
        }
        Ok(())
    }

    async fn apply(&self, plan: &GroupMembership, prior: Option<&GroupMembership>) -> Result<()> {
        let deltas = plan.deltas(prior);
        let add = member_options(|d| &d.add, &deltas);
        self.change("group_add_member", &plan.name, add).await?;
        let remove = member_options(|d| &d.remove, &deltas);
        self.change("group_remove_member", &plan.name, remove).await
    }
}

#[async_trait]
impl Reconciler for MembershipReconciler {
    type Model = GroupMembership;

    async fn create(&self, plan: GroupMembership) -> Result<GroupMembership> {
        plan.validate()?;
        info!(group = %plan.name, "adding group members");
        self.apply(&plan, None).await?;
        let mut state = reconcile::settle(plan)?;
        state.id = Attr::Known(state.name.clone());
        Ok(state)
    }

    async fn read(&self, mut state: GroupMembership) -> Result<Option<GroupMembership>> {
        let args = vec![json!(state.name)];
        let Some(record) = reconcile::show(self.rpc.as_ref(), "group_show", args).await? else {
            info!(group = %state.name, "group no longer exists, dropping membership from state");
            return Ok(None);
        };
        state.apply_record(&record, false);
        Ok(Some(state))
    }

    async fn update(
        &self,
        plan: GroupMembership,
        prior: GroupMembership,
    ) -> Result<GroupMembership> {
        plan.validate()?;
        if !plan.replaced_fields(&prior).is_empty() {
            return Err(ProviderError::validation(format!(
                "membership of {} cannot move to group {}",
                prior.name, plan.name
            )));
        }
        self.apply(&plan, Some(&prior)).await?;
        let mut state = reconcile::settle(plan)?;
        state.id = prior.id;
        Ok(state)
    }

    async fn delete(&self, state: &GroupMembership) -> Result<()> {
        info!(group = %state.name, "removing tracked group members");
        let deltas = GroupMembership::new(&state.name).deltas(Some(state));
        let remove = member_options(|d| &d.remove, &deltas);
        self.change("group_remove_member", &state.name, remove).await
    }

    async fn import(&self, id: &str) -> Result<Option<GroupMembership>> {
        let args = vec![json!(id)];
        let Some(record) = reconcile::show(self.rpc.as_ref(), "group_show", args).await? else {
            return Ok(None);
        };
        let mut membership = GroupMembership::new(id);
        membership.apply_record(&record, true);
        membership.id = Attr::Known(id.to_string());
        Ok(Some(membership))
    }
}
