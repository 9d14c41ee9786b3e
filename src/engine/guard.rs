//! Office preconditions. Each check is an independent read; an operation
//! runs all of its checks concurrently and only proceeds when none failed.
//!
//! A store error while checking is logged and treated as "record absent".

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use tracing::{debug, error};

use crate::model::*;
use crate::observability::GUARD_REJECTIONS_TOTAL;
use crate::store::{from_item, Item, Key};

use super::membership::MembershipRecord;
use super::{user_partition, Engine, GuardFailure};

pub type Check<'a> = BoxFuture<'a, Result<(), GuardFailure>>;

/// Run every check to completion and collect all failures, in check order.
pub async fn all_pass(checks: Vec<Check<'_>>) -> Result<(), Vec<GuardFailure>> {
    let failures: Vec<GuardFailure> = join_all(checks)
        .await
        .into_iter()
        .filter_map(Result::err)
        .collect();
    if failures.is_empty() {
        return Ok(());
    }
    for failure in &failures {
        metrics::counter!(GUARD_REJECTIONS_TOTAL, "guard" => failure.label()).increment(1);
        debug!("guard failed: {failure}");
    }
    Err(failures)
}

impl Engine {
    /// Presence read that treats a store failure as absence.
    pub(super) async fn peek(&self, table: &str, key: &Key) -> Option<Item> {
        match self.store.get(table, key).await {
            Ok(item) => item,
            Err(e) => {
                error!("guard read of {table}/{key} failed: {e}");
                None
            }
        }
    }

    async fn role_of(&self, office: OfficeId, user: UserId) -> Option<Role> {
        let key = Key::composite(user_partition(user), office.to_string());
        let item = self.peek(&self.tables().memberships, &key).await?;
        match from_item::<MembershipRecord>(item) {
            Ok(record) => Some(record.role),
            Err(e) => {
                error!("unreadable membership {key}: {e}");
                None
            }
        }
    }

    pub fn assert_office_exists(&self, office: OfficeId) -> Check<'_> {
        async move {
            let key = Key::new(office.to_string());
            match self.peek(&self.tables().offices, &key).await {
                Some(_) => Ok(()),
                None => Err(GuardFailure::OfficeNotFound(office)),
            }
        }
        .boxed()
    }

    /// `user` must hold one of `allowed` on `office`. `skip` passes unconditionally.
    pub fn assert_has_role(
        &self,
        office: OfficeId,
        user: UserId,
        allowed: &'static [Role],
        skip: bool,
    ) -> Check<'_> {
        async move {
            if skip {
                return Ok(());
            }
            match self.role_of(office, user).await {
                Some(role) if allowed.contains(&role) => Ok(()),
                _ => Err(GuardFailure::MissingRole { user, required: allowed.to_vec() }),
            }
        }
        .boxed()
    }

    pub fn assert_not_member(&self, office: OfficeId, user: UserId) -> Check<'_> {
        async move {
            let key = Key::composite(user_partition(user), office.to_string());
            match self.peek(&self.tables().memberships, &key).await {
                Some(_) => Err(GuardFailure::AlreadyMember { user, office }),
                None => Ok(()),
            }
        }
        .boxed()
    }

    pub fn assert_is_member(&self, office: OfficeId, user: UserId) -> Check<'_> {
        async move {
            let key = Key::composite(user_partition(user), office.to_string());
            match self.peek(&self.tables().memberships, &key).await {
                Some(_) => Ok(()),
                None => Err(GuardFailure::NotMember { user, office }),
            }
        }
        .boxed()
    }
}
