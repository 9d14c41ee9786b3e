use std::time::Instant;

use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::{
    MAX_OFFICE_LONG_DESCRIPTION_LEN, MAX_OFFICE_NAME_LEN, MAX_OFFICE_SHORT_DESCRIPTION_LEN,
};
use crate::model::*;
use crate::observability::{record_operation, Operation};
use crate::store::{from_item, to_item, Condition, Key, StoreError};

use super::{Engine, ServiceError};

fn validate(office: &NewOffice) -> Result<(), ServiceError> {
    let name_len = office.name.trim().chars().count();
    if name_len == 0 || office.name.chars().count() > MAX_OFFICE_NAME_LEN {
        return Err(ServiceError::Validation(format!(
            "Office name must be between 1 and {MAX_OFFICE_NAME_LEN} characters."
        )));
    }
    let within = |text: &Option<String>, max: usize| {
        text.as_ref().is_none_or(|t| (1..=max).contains(&t.chars().count()))
    };
    if !within(&office.description.short, MAX_OFFICE_SHORT_DESCRIPTION_LEN) {
        return Err(ServiceError::Validation(format!(
            "Short description must be between 1 and {MAX_OFFICE_SHORT_DESCRIPTION_LEN} characters."
        )));
    }
    if !within(&office.description.long, MAX_OFFICE_LONG_DESCRIPTION_LEN) {
        return Err(ServiceError::Validation(format!(
            "Long description must be between 1 and {MAX_OFFICE_LONG_DESCRIPTION_LEN} characters."
        )));
    }
    let finite = |p: &Position| [p.x, p.y, p.z, p.length, p.width].iter().all(|v| v.is_finite());
    if !office.elements.iter().all(|e| finite(&e.position)) {
        return Err(ServiceError::Validation("Element positions must be finite numbers.".into()));
    }
    Ok(())
}

fn readme(office: OfficeId) -> String {
    format!("# Office {office}\n\nThis directory contains data related to the office with ID: {office}.")
}

impl Engine {
    /// Create an office owned by `owner`. The office record and the owner's
    /// membership are written concurrently; the README artifact afterwards is
    /// best effort.
    pub async fn create_office(&self, owner: UserId, new: NewOffice) -> Result<Office, ServiceError> {
        let started = Instant::now();
        let result = self.create_office_inner(owner, new).await;
        record_operation(Operation::CreateOffice, started, &result);
        result
    }

    async fn create_office_inner(
        &self,
        owner: UserId,
        new: NewOffice,
    ) -> Result<Office, ServiceError> {
        validate(&new)?;

        let now = now_ms();
        let office = Office {
            id: Ulid::new(),
            owner,
            created_at: now,
            last_modified: now,
            name: new.name,
            description: new.description,
            elements: new.elements,
        };

        let save = async {
            let item = to_item(&office).map_err(ServiceError::from)?;
            match self.store.put(&self.tables().offices, item, Some(Condition::NotExists)).await {
                Ok(()) => Ok(()),
                Err(StoreError::ConditionFailed { .. }) => Err(ServiceError::Conflict(format!(
                    "Office {} already exists.",
                    office.id
                ))),
                Err(e) => Err(ServiceError::from(e)),
            }
        };
        // Both writes always run to completion, even when one fails.
        let (saved, membership) =
            futures::join!(save, self.create_membership(office.id, owner, Role::Owner));
        saved?;
        membership?;

        let key = format!("offices/{}/README.md", office.id);
        match self
            .objects
            .put_object_if_absent(
                &self.config.offices_bucket,
                &key,
                readme(office.id).into_bytes(),
                "text/markdown",
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!("{key} already exists in {}", self.config.offices_bucket),
            Err(e) => warn!("failed to write {key}: {e}"),
        }

        info!("office {} created by {owner}", office.id);
        Ok(office)
    }

    pub async fn get_office(&self, office: OfficeId) -> Result<Office, ServiceError> {
        let key = Key::new(office.to_string());
        match self.store.get(&self.tables().offices, &key).await? {
            Some(item) => Ok(from_item(item)?),
            None => Err(ServiceError::NotFound(format!("Office {office} not found"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> NewOffice {
        NewOffice { name: name.into(), ..Default::default() }
    }

    #[test]
    fn names_are_bounded() {
        assert!(validate(&named("HQ")).is_ok());
        assert!(validate(&named("   ")).is_err());
        assert!(validate(&named(&"x".repeat(MAX_OFFICE_NAME_LEN + 1))).is_err());
    }

    #[test]
    fn descriptions_are_bounded_when_present() {
        let mut office = named("HQ");
        office.description.short = Some(String::new());
        assert!(validate(&office).is_err());
        office.description.short = Some("Ground floor".into());
        office.description.long = Some("y".repeat(MAX_OFFICE_LONG_DESCRIPTION_LEN + 1));
        assert!(validate(&office).is_err());
        office.description.long = None;
        assert!(validate(&office).is_ok());
    }

    #[test]
    fn readme_mentions_the_office() {
        let id = Ulid::new();
        assert!(readme(id).starts_with(&format!("# Office {id}\n\n")));
    }
}
