//! FreeIPA user groups.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
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
pub struct Group {
    pub id: Attr<String>,
    pub name: String,
    pub description: Attr<String>,
    pub gid_number: Attr<i64>,
    /// Group for members of a trusted domain. Set at creation only.
    pub external: Attr<bool>,
    /// Group without a POSIX gid. Set at creation only.
    pub nonposix: Attr<bool>,
    pub addattr: Attr<Vec<String>>,
    pub setattr: Attr<Vec<String>>,
}

impl Group {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn apply_record(&mut self, record: &Record, adopt: bool) {
        pull(&mut self.description, "description", record.string("description"), adopt);
        pull(&mut self.gid_number, "gidnumber", record.int("gidnumber"), adopt);

        let classes: Vec<String> = record
            .strings("objectclass")
            .unwrap_or_default()
            .into_iter()
            .map(|c| c.to_ascii_lowercase())
            .collect();
        // Without object classes in the reply there is nothing to compare.
        if !classes.is_empty() {
            let external = classes.iter().any(|c| c == "ipaexternalgroup");
            let posix = classes.iter().any(|c| c == "posixgroup");
            pull(&mut self.external, "objectclass", Some(external), adopt);
            pull(&mut self.nonposix, "objectclass", Some(!posix && !external), adopt);
        }
    }
}

impl ResourceModel for Group {
    const KIND: &'static str = "group";

    fn id(&self) -> Option<&str> {
        self.id.known().map(String::as_str)
    }

    fn validate(&self) -> Result<()> {
        validation::validate_name("name", &self.name)?;
        if self.external.is_true() && self.gid_number.is_known() {
            return Err(ProviderError::validation(format!(
                "group {}: an external group cannot have a gid_number",
                self.name
            )));
        }
        Ok(())
    }

    fn fields(&self) -> Result<Vec<Field>> {
        Ok(vec![
            Field::scalar("description", &self.description),
            Field::scalar("gidnumber", &self.gid_number),
            Field::write_only("addattr", &self.addattr),
            Field::write_only("setattr", &self.setattr),
        ])
    }

    fn replaced_fields(&self, prior: &Self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.name != prior.name {
            out.push("name");
        }
        if self.external.is_true() != prior.external.is_true() {
            out.push("external");
        }
        if self.nonposix.is_true() != prior.nonposix.is_true() {
            out.push("nonposix");
        }
        out
    }
}

pub struct GroupReconciler {
    rpc: Arc<dyn IpaRpc>,
}

impl GroupReconciler {
    pub fn new(rpc: Arc<dyn IpaRpc>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl Reconciler for GroupReconciler {
    type Model = Group;

    async fn create(&self, plan: Group) -> Result<Group> {
        plan.validate()?;
        let mut options = diff::create_options(&plan.fields()?);
        if plan.external.is_true() {
            options.set("external", true);
        }
        if plan.nonposix.is_true() {
            options.set("nonposix", true);
        }
        info!(group = %plan.name, "creating group");
        self.rpc
            .call("group_add", vec![json!(plan.name)], options.into_options())
            .await?;

        let mut state = reconcile::settle(plan)?;
        state.id = Attr::Known(state.name.clone());
        Ok(state)
    }

    async fn read(&self, mut state: Group) -> Result<Option<Group>> {
        match reconcile::show(self.rpc.as_ref(), "group_show", vec![json!(state.name)]).await? {
            Some(record) => {
                state.apply_record(&record, false);
                Ok(Some(state))
            }
            None => {
                info!(group = %state.name, "group no longer exists, dropping from state");
                Ok(None)
            }
        }
    }

    async fn update(&self, plan: Group, prior: Group) -> Result<Group> {
        plan.validate()?;
        let replaced = plan.replaced_fields(&prior);
        if !replaced.is_empty() {
            return Err(ProviderError::validation(format!(
                "group {}: {} cannot change in place, the group must be replaced",
                prior.name,
                replaced.join(", ")
            )));
        }

        let changes = diff::diff(&plan.fields()?, &prior.fields()?);
        reconcile::modify(self.rpc.as_ref(), "group_mod", vec![json!(plan.name)], changes).await?;

        let mut state = reconcile::settle(plan)?;
        state.id = prior.id;
        Ok(state)
    }

    async fn delete(&self, state: &Group) -> Result<()> {
        info!(group = %state.name, "deleting group");
        self.rpc
            .call("group_del", vec![json!(state.name)], Map::new())
            .await?;
        Ok(())
    }

    async fn import(&self, id: &str) -> Result<Option<Group>> {
        let args = vec![Value::from(id)];
        let Some(record) = reconcile::show(self.rpc.as_ref(), "group_show", args).await? else {
            return Ok(None);
        };
        let mut group = Group::new(id);
        group.apply_record(&record, true);
        group.id = Attr::Known(id.to_string());
        Ok(Some(group))
    }
}
