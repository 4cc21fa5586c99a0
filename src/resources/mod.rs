pub mod dns_zone;
pub mod group;
pub mod lifecycle;
pub mod membership;
pub mod user;

use std::fmt;

use tracing::debug;

use crate::value::Attr;

pub use dns_zone::{DnsZone, DnsZoneReconciler};
pub use group::{Group, GroupReconciler};
pub use membership::{GroupMembership, MembershipReconciler};
pub use user::{User, UserReconciler};

/// Copy one attribute from a `*_show` reply into the model.
pub(crate) fn pull<T: fmt::Debug>(
    attr: &mut Attr<T>,
    key: &'static str,
    remote: Option<T>,
    adopt: bool,
) {
    if adopt || attr.is_known() {
        debug!(attribute = key, value = ?remote, "refreshed");
    }
    attr.sync(remote, adopt);
}
