use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::model::*;
use crate::observability::{record_operation, Operation};
use crate::store::{from_item, to_item, Condition, Key, Query, StoreError, WriteOp};

use super::{all_pass, office_partition, parse_id, user_partition, Engine, ServiceError};

/// One half of an office membership as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MembershipRecord {
    pub pk: String,
    pub sk: String,
    pub role: Role,
}

impl Engine {
    /// Write both membership records in one transaction. Fails with a conflict if
    /// either record already exists.
    pub async fn create_membership(
        &self,
        office: OfficeId,
        user: UserId,
        role: Role,
    ) -> Result<Membership, ServiceError> {
        let started = Instant::now();
        let result = self.create_membership_inner(office, user, role).await;
        record_operation(Operation::CreateMembership, started, &result);
        result
    }

    async fn create_membership_inner(
        &self,
        office: OfficeId,
        user: UserId,
        role: Role,
    ) -> Result<Membership, ServiceError> {
        let table = &self.tables().memberships;
        let by_user = MembershipRecord { pk: user_partition(user), sk: office.to_string(), role };
        let by_office = MembershipRecord { pk: office_partition(office), sk: user.to_string(), role };

        let ops = vec![
            WriteOp::Put {
                table: table.clone(),
                item: to_item(&by_user)?,
                condition: Some(Condition::NotExists),
            },
            WriteOp::Put {
                table: table.clone(),
                item: to_item(&by_office)?,
                condition: Some(Condition::NotExists),
            },
        ];
        match self.store.transact_write(ops).await {
            Ok(()) => Ok(Membership { office_id: office, user_id: user, role }),
            Err(e @ StoreError::TransactionCanceled { .. }) => {
                error!("failed to create office membership: {e}");
                Err(ServiceError::Conflict("Membership already exists or conflict occurred.".into()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Add `user` to `office` on behalf of `added_by`. The office must exist,
    /// `added_by` must manage it (unless `override_role`), and `user` must not
    /// already be a member. All three are checked; all failures are reported.
    pub async fn add_member(
        &self,
        office: OfficeId,
        user: UserId,
        added_by: UserId,
        role: Role,
        override_role: bool,
    ) -> Result<Membership, ServiceError> {
        let started = Instant::now();
        let result = self.add_member_inner(office, user, added_by, role, override_role).await;
        record_operation(Operation::AddMember, started, &result);
        result
    }

    async fn add_member_inner(
        &self,
        office: OfficeId,
        user: UserId,
        added_by: UserId,
        role: Role,
        override_role: bool,
    ) -> Result<Membership, ServiceError> {
        all_pass(vec![
            self.assert_office_exists(office),
            self.assert_has_role(office, added_by, Role::MANAGERS, override_role),
            self.assert_not_member(office, user),
        ])
        .await
        .map_err(|failures| ServiceError::Rejected { action: "add member", failures })?;

        let membership = self.create_membership(office, user, role).await?;
        info!(
            "User {added_by} added user {user} to office {office} as {role} (override={override_role})"
        );
        Ok(membership)
    }

    /// Remove `user` from `office` on behalf of `removed_by`; both records go together.
    pub async fn remove_member(
        &self,
        office: OfficeId,
        user: UserId,
        removed_by: UserId,
        override_role: bool,
    ) -> Result<(), ServiceError> {
        let started = Instant::now();
        let result = self.remove_member_inner(office, user, removed_by, override_role).await;
        record_operation(Operation::RemoveMember, started, &result);
        result
    }

    async fn remove_member_inner(
        &self,
        office: OfficeId,
        user: UserId,
        removed_by: UserId,
        override_role: bool,
    ) -> Result<(), ServiceError> {
        all_pass(vec![
            self.assert_office_exists(office),
            self.assert_has_role(office, removed_by, Role::MANAGERS, override_role),
            self.assert_is_member(office, user),
        ])
        .await
        .map_err(|failures| ServiceError::Rejected { action: "remove member", failures })?;

        let table = &self.tables().memberships;
        let ops = vec![
            WriteOp::Delete {
                table: table.clone(),
                key: Key::composite(user_partition(user), office.to_string()),
                condition: Some(Condition::Exists),
            },
            WriteOp::Delete {
                table: table.clone(),
                key: Key::composite(office_partition(office), user.to_string()),
                condition: Some(Condition::Exists),
            },
        ];
        match self.store.transact_write(ops).await {
            Ok(()) => {
                info!(
                    "User {removed_by} removed user {user} from office {office} (override={override_role})"
                );
                Ok(())
            }
            Err(e @ StoreError::TransactionCanceled { .. }) => {
                error!("failed to remove office membership: {e}");
                Err(ServiceError::Conflict(
                    "Membership removal failed or membership does not exist.".into(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The user-keyed membership record, if any.
    pub async fn get_membership(
        &self,
        user: UserId,
        office: OfficeId,
    ) -> Result<Option<Membership>, ServiceError> {
        let key = Key::composite(user_partition(user), office.to_string());
        let Some(item) = self.store.get(&self.tables().memberships, &key).await? else {
            return Ok(None);
        };
        let record: MembershipRecord = from_item(item)?;
        Ok(Some(Membership { office_id: office, user_id: user, role: record.role }))
    }

    /// Offices `user` belongs to.
    pub async fn list_user_offices(&self, user: UserId) -> Result<Vec<Membership>, ServiceError> {
        let items = self
            .store
            .query(&self.tables().memberships, &Query::partition(user_partition(user)))
            .await?;
        items
            .into_iter()
            .map(|item| -> Result<Membership, ServiceError> {
                let record: MembershipRecord = from_item(item)?;
                Ok(Membership { office_id: parse_id(&record.sk)?, user_id: user, role: record.role })
            })
            .collect()
    }

    /// Members of `office`.
    pub async fn list_office_members(
        &self,
        office: OfficeId,
    ) -> Result<Vec<Membership>, ServiceError> {
        let items = self
            .store
            .query(&self.tables().memberships, &Query::partition(office_partition(office)))
            .await?;
        items
            .into_iter()
            .map(|item| -> Result<Membership, ServiceError> {
                let record: MembershipRecord = from_item(item)?;
                Ok(Membership { office_id: office, user_id: parse_id(&record.sk)?, role: record.role })
            })
            .collect()
    }
}
