//! FreeIPA user accounts.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use super::lifecycle::{self, Lifecycle, Step};
use super::pull;
use crate::error::{ProviderError, Result};
use crate::freeipa::IpaRpc;
use crate::freeipa::types::{Record, datetime_value};
use crate::reconcile::{self, Field, FieldKind, Reconciler, ResourceModel, diff};
use crate::validation::{self, ValidationError};
use crate::value::Attr;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: Attr<String>,
    pub name: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: Attr<String>,
    pub display_name: Attr<String>,
    pub initials: Attr<String>,
    pub home_directory: Attr<String>,
    pub gecos: Attr<String>,
    pub login_shell: Attr<String>,
    pub uid_number: Attr<i64>,
    pub gid_number: Attr<i64>,
    pub email_address: Attr<Vec<String>>,
    pub telephone_numbers: Attr<Vec<String>>,
    pub mobile_numbers: Attr<Vec<String>>,
    pub street_address: Attr<String>,
    pub city: Attr<String>,
    pub province: Attr<String>,
    pub postal_code: Attr<String>,
    pub organisation_unit: Attr<String>,
    pub job_title: Attr<String>,
    pub manager: Attr<String>,
    pub employee_number: Attr<String>,
    pub employee_type: Attr<String>,
    pub preferred_language: Attr<String>,
    pub krb_principal_name: Attr<Vec<String>>,
    /// RFC 3339.
    pub krb_principal_expiration: Attr<String>,
    /// RFC 3339.
    pub krb_password_expiration: Attr<String>,
    pub userpassword: Attr<String>,
    pub random_password: Attr<bool>,
    pub user_auth_types: Attr<Vec<String>>,
    pub radius_proxy_config: Attr<String>,
    pub radius_proxy_username: Attr<String>,
    pub idp_config: Attr<String>,
    pub idp_user: Attr<String>,
    pub ssh_public_key: Attr<Vec<String>>,
    /// Base64 DER.
    pub user_certificates: Attr<Vec<String>>,
    pub car_license: Attr<Vec<String>>,
    pub userclass: Attr<Vec<String>>,
    pub addattr: Attr<Vec<String>>,
    pub setattr: Attr<Vec<String>>,
    pub account_disabled: Attr<bool>,
    pub state: Attr<Lifecycle>,
}

impl User {
    pub fn new(name: &str, first_name: &str, last_name: &str) -> Self {
        Self {
            name: name.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            ..Default::default()
        }
    }

    /// Lifecycle recorded in state; untracked means active.
    fn lifecycle(&self) -> Lifecycle {
        self.state.known().copied().unwrap_or(Lifecycle::Active)
    }

    /// Lifecycle the plan asks for, keeping `current` when it does not say.
    fn target(&self, current: Lifecycle) -> Lifecycle {
        self.state.known().copied().unwrap_or(current)
    }

    fn update_steps(&self, prior: &User) -> Result<Vec<Step>> {
        lifecycle::steps(
            &self.name,
            prior.lifecycle(),
            self.target(prior.lifecycle()),
            diff::toggle(&self.account_disabled, &prior.account_disabled),
            self.account_disabled.is_true(),
        )
    }

    fn apply_record(&mut self, record: &Record, adopt: bool) -> Result<()> {
        if let Some(v) = record.string("givenname") {
            self.first_name = v;
        }
        if let Some(v) = record.string("sn") {
            self.last_name = v;
        }
        pull(&mut self.full_name, "cn", record.string("cn"), adopt);
        pull(&mut self.display_name, "displayname", record.string("displayname"), adopt);
        pull(&mut self.initials, "initials", record.string("initials"), adopt);
        pull(&mut self.home_directory, "homedirectory", record.string("homedirectory"), adopt);
        pull(&mut self.gecos, "gecos", record.string("gecos"), adopt);
        pull(&mut self.login_shell, "loginshell", record.string("loginshell"), adopt);
        pull(&mut self.uid_number, "uidnumber", record.int("uidnumber"), adopt);
        pull(&mut self.gid_number, "gidnumber", record.int("gidnumber"), adopt);
        pull(&mut self.email_address, "mail", record.strings("mail"), adopt);
        pull(
            &mut self.telephone_numbers,
            "telephonenumber",
            record.strings("telephonenumber"),
            adopt,
        );
        pull(&mut self.mobile_numbers, "mobile", record.strings("mobile"), adopt);
        pull(&mut self.street_address, "street", record.string("street"), adopt);
        pull(&mut self.city, "l", record.string("l"), adopt);
        pull(&mut self.province, "st", record.string("st"), adopt);
        pull(&mut self.postal_code, "postalcode", record.string("postalcode"), adopt);
        pull(&mut self.organisation_unit, "ou", record.string("ou"), adopt);
        pull(&mut self.job_title, "title", record.string("title"), adopt);
        pull(&mut self.manager, "manager", record.string("manager"), adopt);
        pull(&mut self.employee_number, "employeenumber", record.string("employeenumber"), adopt);
        pull(&mut self.employee_type, "employeetype", record.string("employeetype"), adopt);
        pull(
            &mut self.preferred_language,
            "preferredlanguage",
            record.string("preferredlanguage"),
            adopt,
        );
        pull(
            &mut self.krb_principal_name,
            "krbprincipalname",
            record.strings("krbprincipalname"),
            adopt,
        );
        pull(
            &mut self.user_auth_types,
            "ipauserauthtype",
            record.strings("ipauserauthtype"),
            adopt,
        );
        pull(
            &mut self.radius_proxy_config,
            "ipatokenradiusconfiglink",
            record.string("ipatokenradiusconfiglink"),
            adopt,
        );
        pull(
            &mut self.radius_proxy_username,
            "ipatokenradiususername",
            record.string("ipatokenradiususername"),
            adopt,
        );
        pull(&mut self.idp_config, "ipaidpconfiglink", record.string("ipaidpconfiglink"), adopt);
        pull(&mut self.idp_user, "ipaidpsub", record.string("ipaidpsub"), adopt);
        pull(&mut self.ssh_public_key, "ipasshpubkey", record.strings("ipasshpubkey"), adopt);
        pull(
            &mut self.user_certificates,
            "usercertificate",
            record.strings("usercertificate"),
            adopt,
        );
        pull(&mut self.car_license, "carlicense", record.strings("carlicense"), adopt);
        pull(&mut self.userclass, "userclass", record.strings("userclass"), adopt);
        pull(&mut self.account_disabled, "nsaccountlock", record.bool("nsaccountlock"), adopt);

        sync_timestamp(
            &mut self.krb_principal_expiration,
            record.timestamp("krbprincipalexpiration").map_err(ProviderError::protocol)?,
            adopt,
        );
        sync_timestamp(
            &mut self.krb_password_expiration,
            record.timestamp("krbpasswordexpiration").map_err(ProviderError::protocol)?,
            adopt,
        );

        let preserved = record.bool("preserved").unwrap_or(false);
        let remote_state = if preserved { Lifecycle::Preserved } else { Lifecycle::Active };
        pull(&mut self.state, "preserved", Some(remote_state), adopt);
        Ok(())
    }
}

/// Keep the recorded spelling when the server reports the same instant.
fn sync_timestamp(attr: &mut Attr<String>, remote: Option<DateTime<Utc>>, adopt: bool) {
    if !adopt && !attr.is_known() {
        return;
    }
    let recorded = attr
        .known()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));
    *attr = match remote {
        None => Attr::Unset,
        Some(at) if recorded == Some(at) => attr.clone(),
        Some(at) => Attr::Known(at.to_rfc3339_opts(SecondsFormat::Secs, true)),
    };
}

fn timestamp_field(
    option: &'static str,
    field: &'static str,
    attr: &Attr<String>,
) -> Result<Field> {
    let value = match attr {
        Attr::Known(raw) => {
            Attr::Known(datetime_value(&validation::parse_timestamp(field, raw)?))
        }
        Attr::Unset => Attr::Unset,
        Attr::Pending => Attr::Pending,
    };
    Ok(Field::new(option, FieldKind::Scalar, value))
}

fn certificate_field(attr: &Attr<Vec<String>>) -> Field {
    let value = attr.clone().map(|certs| {
        Value::Array(certs.iter().map(|c| json!({ "__base64__": c })).collect())
    });
    Field::new("usercertificate", FieldKind::List, value)
}

impl ResourceModel for User {
    const KIND: &'static str = "user";

    fn id(&self) -> Option<&str> {
        self.id.known().map(String::as_str)
    }

    fn validate(&self) -> Result<()> {
        validation::validate_name("name", &self.name)?;
        if self.first_name.is_empty() {
            return Err(ValidationError::Empty { field: "first_name" }.into());
        }
        if self.last_name.is_empty() {
            return Err(ValidationError::Empty { field: "last_name" }.into());
        }
        if let Attr::Known(certs) = &self.user_certificates {
            validation::validate_certificates(certs)?;
        }
        self.fields().map(|_| ())
    }

    fn fields(&self) -> Result<Vec<Field>> {
        Ok(vec![
            Field::scalar("givenname", &Attr::Known(self.first_name.clone())),
            Field::scalar("sn", &Attr::Known(self.last_name.clone())),
            Field::scalar("cn", &self.full_name),
            Field::scalar("displayname", &self.display_name),
            Field::scalar("initials", &self.initials),
            Field::scalar("homedirectory", &self.home_directory),
            Field::scalar("gecos", &self.gecos),
            Field::scalar("loginshell", &self.login_shell),
            Field::scalar("uidnumber", &self.uid_number),
            Field::scalar("gidnumber", &self.gid_number),
            Field::list("mail", &self.email_address),
            Field::list("telephonenumber", &self.telephone_numbers),
            Field::list("mobile", &self.mobile_numbers),
            Field::scalar("street", &self.street_address),
            Field::scalar("l", &self.city),
            Field::scalar("st", &self.province),
            Field::scalar("postalcode", &self.postal_code),
            Field::scalar("ou", &self.organisation_unit),
            Field::scalar("title", &self.job_title),
            Field::scalar("manager", &self.manager),
            Field::scalar("employeenumber", &self.employee_number),
            Field::scalar("employeetype", &self.employee_type),
            Field::scalar("preferredlanguage", &self.preferred_language),
            Field::list("krbprincipalname", &self.krb_principal_name),
            timestamp_field(
                "krbprincipalexpiration",
                "krb_principal_expiration",
                &self.krb_principal_expiration,
            )?,
            timestamp_field(
                "krbpasswordexpiration",
                "krb_password_expiration",
                &self.krb_password_expiration,
            )?,
            Field::write_only("userpassword", &self.userpassword),
            Field::write_only("random", &self.random_password),
            Field::list("ipauserauthtype", &self.user_auth_types),
            Field::scalar("ipatokenradiusconfiglink", &self.radius_proxy_config),
            Field::scalar("ipatokenradiususername", &self.radius_proxy_username),
            Field::scalar("ipaidpconfiglink", &self.idp_config),
            Field::scalar("ipaidpsub", &self.idp_user),
            Field::list("ipasshpubkey", &self.ssh_public_key),
            certificate_field(&self.user_certificates),
            Field::list("carlicense", &self.car_license),
            Field::list("userclass", &self.userclass),
            Field::write_only("addattr", &self.addattr),
            Field::write_only("setattr", &self.setattr),
        ])
    }

    fn replaced_fields(&self, prior: &Self) -> Vec<&'static str> {
        if self.name != prior.name {
            vec!["name"]
        } else {
            Vec::new()
        }
    }

    fn side_calls(&self, prior: &Self) -> Result<Vec<String>> {
        let from = prior.lifecycle();
        Ok(self
            .update_steps(prior)?
            .into_iter()
            .filter(|s| *s != Step::Modify)
            .map(|s| s.method(from).to_string())
            .collect())
    }
}

pub struct UserReconciler {
    rpc: Arc<dyn IpaRpc>,
}

impl UserReconciler {
    pub fn new(rpc: Arc<dyn IpaRpc>) -> Self {
        Self { rpc }
    }

    async fn run_step(
        &self,
        step: Step,
        from: Lifecycle,
        login: &str,
        changes: &mut Option<diff::ChangeSet>,
    ) -> Result<()> {
        let args = vec![json!(login)];
        let method = step.method(from);
        match step {
            Step::Modify => {
                let changes = changes.take().unwrap_or_default();
                reconcile::modify(self.rpc.as_ref(), method, args, changes).await?;
            }
            Step::Enable | Step::Disable => {
                reconcile::switch(self.rpc.as_ref(), method, args).await?
            }
            Step::Preserve => {
                info!(user = login, "preserving user");
                self.rpc
                    .call(method, args, reconcile::options(&[("preserve", Value::Bool(true))]))
                    .await?;
            }
            Step::Undelete | Step::Stage => {
                info!(user = login, method, "changing user lifecycle");
                self.rpc.call(method, args, Map::new()).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for UserReconciler {
    type Model = User;

    async fn create(&self, plan: User) -> Result<User> {
        plan.validate()?;
        let target = plan.lifecycle();
        if target != Lifecycle::Active {
            return Err(ProviderError::InvalidTransition {
                login: plan.name.clone(),
                from: "absent",
                to: target.as_str(),
            });
        }

        let options = diff::create_options(&plan.fields()?);
        info!(user = %plan.name, options = options.len(), "creating user");
        self.rpc
            .call("user_add", vec![json!(plan.name)], options.into_options())
            .await?;

        if plan.account_disabled.is_true() {
            reconcile::switch(self.rpc.as_ref(), "user_disable", vec![json!(plan.name)]).await?;
        }

        let mut state = reconcile::settle(plan)?;
        state.id = Attr::Known(state.name.clone());
        Ok(state)
    }

    async fn read(&self, mut state: User) -> Result<Option<User>> {
        let staged = state.lifecycle() == Lifecycle::Staged;
        let method = if staged { "stageuser_show" } else { "user_show" };
        let args = vec![json!(state.name)];
        let Some(record) = reconcile::show(self.rpc.as_ref(), method, args).await? else {
            info!(user = %state.name, "user no longer exists, dropping from state");
            return Ok(None);
        };
        state.apply_record(&record, false)?;
        if staged {
            state.state = Attr::Known(Lifecycle::Staged);
        }
        Ok(Some(state))
    }

    async fn update(&self, plan: User, prior: User) -> Result<User> {
        plan.validate()?;
        let replaced = plan.replaced_fields(&prior);
        if !replaced.is_empty() {
            return Err(ProviderError::validation(format!(
                "user {}: {} cannot change in place, the user must be replaced",
                prior.name,
                replaced.join(", ")
            )));
        }

        // Lifecycle legality is checked here, before anything is sent.
        let steps = plan.update_steps(&prior)?;
        let from = prior.lifecycle();
        let target = plan.target(from);
        let mut changes = Some(diff::diff(&plan.fields()?, &prior.fields()?));
        debug!(user = %plan.name, ?steps, "updating user");
        for step in steps {
            self.run_step(step, from, &plan.name, &mut changes).await?;
        }

        let mut state = reconcile::settle(plan)?;
        state.id = prior.id;
        // The next read picks its show method from the recorded lifecycle.
        if prior.state.is_known() || target != Lifecycle::Active {
            state.state = Attr::Known(target);
        }
        Ok(state)
    }

    async fn delete(&self, state: &User) -> Result<()> {
        let method = if state.lifecycle() == Lifecycle::Staged {
            "stageuser_del"
        } else {
            "user_del"
        };
        info!(user = %state.name, method, "deleting user");
        self.rpc.call(method, vec![json!(state.name)], Map::new()).await?;
        Ok(())
    }

    async fn import(&self, id: &str) -> Result<Option<User>> {
        let mut user = User {
            name: id.to_string(),
            ..Default::default()
        };
        let rpc = self.rpc.as_ref();
        let args = vec![json!(id)];
        if let Some(record) = reconcile::show(rpc, "user_show", args.clone()).await? {
            user.apply_record(&record, true)?;
        } else if let Some(record) = reconcile::show(rpc, "stageuser_show", args).await? {
            user.apply_record(&record, true)?;
            user.state = Attr::Known(Lifecycle::Staged);
        } else {
            return Ok(None);
        }
        user.id = Attr::Known(id.to_string());
        Ok(Some(user))
    }
}
