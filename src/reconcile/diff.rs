//! Field-level diffing between a plan and a recorded state.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::value::Attr;

/// How a cleared field is spelled on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    List,
    /// Sent when set, never read back and never cleared (passwords, addattr).
    WriteOnly,
}

/// One modify-able attribute of an entity, already in wire form.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub option: &'static str,
    pub kind: FieldKind,
    pub value: Attr<Value>,
}

impl Field {
    pub fn new(option: &'static str, kind: FieldKind, value: Attr<Value>) -> Self {
        Self {
            option,
            kind,
            value,
        }
    }

    pub fn scalar<T: Clone + Into<Value>>(option: &'static str, attr: &Attr<T>) -> Self {
        Self::new(option, FieldKind::Scalar, attr.clone().map(Into::into))
    }

    pub fn list(option: &'static str, attr: &Attr<Vec<String>>) -> Self {
        Self::new(option, FieldKind::List, attr.clone().map(Value::from))
    }

    /// FreeIPA deletes an attribute when it is set to an empty value.
    pub fn clear_value(&self) -> Option<Value> {
        match self.kind {
            FieldKind::Scalar => Some(Value::String(String::new())),
            FieldKind::List => Some(Value::Array(Vec::new())),
            FieldKind::WriteOnly => None,
        }
    }

    pub fn write_only<T: Clone + Into<Value>>(option: &'static str, attr: &Attr<T>) -> Self {
        Self::new(option, FieldKind::WriteOnly, attr.clone().map(Into::into))
    }
}

/// Options for one add/mod RPC.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ChangeSet {
    options: Map<String, Value>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, option: &str, value: impl Into<Value>) -> &mut Self {
        self.options.insert(option.to_string(), value.into());
        self
    }

    pub fn get(&self, option: &str) -> Option<&Value> {
        self.options.get(option)
    }

    pub fn contains(&self, option: &str) -> bool {
        self.options.contains_key(option)
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn options(&self) -> impl Iterator<Item = &str> {
        self.options.keys().map(String::as_str)
    }

    pub fn into_options(self) -> Map<String, Value> {
        self.options
    }
}

/// Options for a create call: every field with a known value, nothing else.
pub fn create_options(fields: &[Field]) -> ChangeSet {
    let mut changes = ChangeSet::new();
    for field in fields {
        if let Attr::Known(v) = &field.value {
            changes.set(field.option, v.clone());
        }
    }
    changes
}

/// Options for a modify call: only fields whose planned value differs from
/// the recorded one. A field dropped from the plan is cleared explicitly,
/// since leaving it out would keep the remote value.
pub fn diff(plan: &[Field], prior: &[Field]) -> ChangeSet {
    let mut changes = ChangeSet::new();
    for field in plan {
        let before = prior
            .iter()
            .find(|p| p.option == field.option)
            .map(|p| &p.value)
            .unwrap_or(&Attr::Unset);

        match (&field.value, before) {
            (Attr::Pending, _) => {}
            (after, before) if after == before => {}
            (Attr::Known(v), _) => {
                changes.set(field.option, v.clone());
            }
            (Attr::Unset, Attr::Known(_)) => {
                if let Some(empty) = field.clear_value() {
                    changes.set(field.option, empty);
                }
            }
            (Attr::Unset, _) => {}
        }
    }
    changes
}

/// Desired state of an enable/disable style flag when it changed, `None`
/// when no toggle RPC is needed. An unset flag means "not disabled".
pub fn toggle(plan: &Attr<bool>, prior: &Attr<bool>) -> Option<bool> {
    if plan.is_pending() {
        return None;
    }
    let want = plan.is_true();
    let had = prior.is_true();
    (want != had).then_some(want)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(name: Attr<String>, mail: Attr<Vec<String>>, uid: Attr<i64>) -> Vec<Field> {
        vec![
            Field::scalar("displayname", &name),
            Field::list("mail", &mail),
            Field::scalar("uidnumber", &uid),
        ]
    }

    #[test]
    fn create_skips_unset_and_pending() {
        let f = fields(Attr::Known("J".into()), Attr::Unset, Attr::Pending);
        let opts = create_options(&f);
        assert_eq!(opts.len(), 1);
        assert_eq!(opts.get("displayname"), Some(&json!("J")));
    }

    #[test]
    fn identical_plan_and_state_produce_no_changes() {
        let a = fields(
            Attr::Known("J".into()),
            Attr::Known(vec!["j@example.com".into()]),
            Attr::Known(1500),
        );
        assert!(diff(&a, &a.clone()).is_empty());
        let unset = fields(Attr::Unset, Attr::Unset, Attr::Unset);
        assert!(diff(&unset, &unset.clone()).is_empty());
    }

    #[test]
    fn only_changed_fields_are_sent() {
        let mail = Attr::Known(vec!["a@x".into()]);
        let prior = fields(Attr::Known("J".into()), mail.clone(), Attr::Known(1));
        let plan = fields(Attr::Known("Jo".into()), mail, Attr::Known(1));
        let changes = diff(&plan, &prior);
        assert_eq!(changes.options().collect::<Vec<_>>(), vec!["displayname"]);
    }

    #[test]
    fn dropped_fields_are_cleared_explicitly() {
        let mail = Attr::Known(vec!["a@x".into()]);
        let prior = fields(Attr::Known("J".into()), mail, Attr::Known(7));
        let plan = fields(Attr::Unset, Attr::Unset, Attr::Unset);
        let changes = diff(&plan, &prior);
        assert_eq!(changes.get("displayname"), Some(&json!("")));
        assert_eq!(changes.get("mail"), Some(&json!([])));
        assert_eq!(changes.get("uidnumber"), Some(&json!("")));
    }

    #[test]
    fn write_only_fields_are_never_cleared() {
        let prior = vec![Field::write_only("userpassword", &Attr::Known("s3cret".to_string()))];
        let plan = vec![Field::write_only("userpassword", &Attr::<String>::Unset)];
        assert!(diff(&plan, &prior).is_empty());
        let plan = vec![Field::write_only("userpassword", &Attr::Known("n3w".to_string()))];
        assert_eq!(diff(&plan, &prior).get("userpassword"), Some(&json!("n3w")));
    }

    #[test]
    fn pending_values_are_left_alone() {
        let prior = fields(Attr::Known("J".into()), Attr::Unset, Attr::Known(7));
        let plan = fields(Attr::Pending, Attr::Unset, Attr::Pending);
        assert!(diff(&plan, &prior).is_empty());
    }

    #[test]
    fn toggles_fire_only_on_change() {
        assert_eq!(toggle(&Attr::Known(true), &Attr::Unset), Some(true));
        assert_eq!(toggle(&Attr::Known(true), &Attr::Known(true)), None);
        assert_eq!(toggle(&Attr::Known(false), &Attr::Unset), None);
        assert_eq!(toggle(&Attr::Unset, &Attr::Known(true)), Some(false));
        assert_eq!(toggle(&Attr::Pending, &Attr::Known(true)), None);
    }
}
