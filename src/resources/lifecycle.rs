//! User lifecycle: active, staged and preserved (soft-deleted) accounts.

use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Active,
    #[serde(alias = "stage")]
    Staged,
    Preserved,
}

impl Lifecycle {
    pub fn as_str(self) -> &'static str {
        match self {
            Lifecycle::Active => "active",
            Lifecycle::Staged => "staged",
            Lifecycle::Preserved => "preserved",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Preserve,
    Activate,
    Stage,
}

/// Every lifecycle move a user may make. Anything not listed is rejected
/// before a single RPC goes out.
const TRANSITIONS: &[(Lifecycle, Lifecycle, Transition)] = &[
    (Lifecycle::Active, Lifecycle::Preserved, Transition::Preserve),
    (Lifecycle::Preserved, Lifecycle::Active, Transition::Activate),
    (Lifecycle::Preserved, Lifecycle::Staged, Transition::Stage),
];

pub fn transition(login: &str, from: Lifecycle, to: Lifecycle) -> Result<Option<Transition>> {
    if from == to {
        return Ok(None);
    }
    TRANSITIONS
        .iter()
        .find(|(f, t, _)| *f == from && *t == to)
        .map(|(_, _, step)| Some(*step))
        .ok_or_else(|| ProviderError::InvalidTransition {
            login: login.to_string(),
            from: from.as_str(),
            to: to.as_str(),
        })
}

/// One RPC of a user update, in the order it must be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Modify,
    Undelete,
    Enable,
    Disable,
    Preserve,
    Stage,
}

impl Step {
    pub fn method(self, from: Lifecycle) -> &'static str {
        match self {
            Step::Modify if from == Lifecycle::Staged => "stageuser_mod",
            Step::Modify => "user_mod",
            Step::Undelete => "user_undel",
            Step::Enable => "user_enable",
            Step::Disable => "user_disable",
            Step::Preserve => "user_del",
            Step::Stage => "user_stage",
        }
    }
}

/// RPC sequence for moving a user from `from` to `to`.
///
/// `toggle` is the changed value of `account_disabled`, if any. A restored
/// user is always enabled or disabled explicitly according to `disabled`,
/// since undelete leaves the account locked.
pub fn steps(
    login: &str,
    from: Lifecycle,
    to: Lifecycle,
    toggle: Option<bool>,
    disabled: bool,
) -> Result<Vec<Step>> {
    let mut out = Vec::new();
    match transition(login, from, to)? {
        Some(Transition::Activate) => {
            out.push(Step::Undelete);
            out.push(Step::Modify);
            out.push(if disabled { Step::Disable } else { Step::Enable });
        }
        other => {
            out.push(Step::Modify);
            if from == Lifecycle::Active {
                match toggle {
                    Some(true) => out.push(Step::Disable),
                    Some(false) => out.push(Step::Enable),
                    None => {}
                }
            }
            match other {
                Some(Transition::Preserve) => out.push(Step::Preserve),
                Some(Transition::Stage) => out.push(Step::Stage),
                _ => {}
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use Lifecycle::*;

    #[test]
    fn table() {
        assert_eq!(transition("jdoe", Active, Preserved).unwrap(), Some(Transition::Preserve));
        assert_eq!(transition("jdoe", Preserved, Active).unwrap(), Some(Transition::Activate));
        assert_eq!(transition("jdoe", Preserved, Staged).unwrap(), Some(Transition::Stage));
        for state in [Active, Staged, Preserved] {
            assert_eq!(transition("jdoe", state, state).unwrap(), None);
        }
    }

    #[test]
    fn illegal_moves_are_rejected() {
        for (from, to) in [(Active, Staged), (Staged, Active), (Staged, Preserved)] {
            let err = transition("jdoe", from, to).unwrap_err();
            assert_eq!(err.summary(), "Invalid lifecycle transition");
            assert!(err.to_string().contains(from.as_str()));
        }
    }

    #[test]
    fn restore_enables_explicitly() {
        let s = steps("jdoe", Preserved, Active, None, false).unwrap();
        assert_eq!(s, vec![Step::Undelete, Step::Modify, Step::Enable]);
        let s = steps("jdoe", Preserved, Active, None, true).unwrap();
        assert_eq!(s.last(), Some(&Step::Disable));
    }

    #[test]
    fn preserve_runs_after_pending_changes() {
        let s = steps("jdoe", Active, Preserved, Some(true), true).unwrap();
        assert_eq!(s, vec![Step::Modify, Step::Disable, Step::Preserve]);
    }

    #[test]
    fn preserved_users_are_never_toggled() {
        let s = steps("jdoe", Preserved, Preserved, Some(true), true).unwrap();
        assert_eq!(s, vec![Step::Modify]);
        assert_eq!(Step::Modify.method(Staged), "stageuser_mod");
    }

    #[test]
    fn serde_names() {
        let s: Lifecycle = serde_json::from_str("\"stage\"").unwrap();
        assert_eq!(s, Staged);
        assert_eq!(serde_json::to_string(&Preserved).unwrap(), "\"preserved\"");
    }
}
