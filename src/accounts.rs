//! Registration, e-mail verification, login and bearer-token authentication.
//! Hashing, signing, mail delivery and secret storage go through [`crate::ports`].

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::config::Config;
use crate::engine::{ServiceError, EMAIL_INDEX};
use crate::limits::{MIN_BIRTH_YEAR, MIN_PASSWORD_LEN};
use crate::model::*;
use crate::observability::{record_operation, Operation};
use crate::ports::{EmailSender, PasswordHasher, TokenAuthority};
use crate::secrets::{random_secret, SecretCache};
use crate::store::{from_item, to_item, Condition, Key, Query, Store, StoreError, Update};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registered {
    pub user_id: UserId,
    pub verification_token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Verified,
    AlreadyVerified,
}

pub struct Accounts {
    store: Arc<dyn Store>,
    config: Config,
    hasher: Arc<dyn PasswordHasher>,
    tokens: Arc<dyn TokenAuthority>,
    mailer: Arc<dyn EmailSender>,
    secrets: Arc<SecretCache>,
}

/// Loose shape check: one `@`, non-empty local part, dotted domain, no spaces.
fn is_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else { return false };
    !local.is_empty()
        && !domain.contains('@')
        && domain.split('.').count() >= 2
        && domain.split('.').all(|label| !label.is_empty())
        && !email.chars().any(char::is_whitespace)
}

/// Gregorian year containing `ms` (Unix epoch milliseconds).
fn civil_year(ms: Ms) -> i32 {
    let days = ms.div_euclid(86_400_000);
    // Days-from-civil inverse, epoch shifted to 0000-03-01.
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    year as i32
}

fn validate_registration(reg: &Registration, now: Ms) -> Result<(), ServiceError> {
    let mut problems = Vec::new();
    if !is_email(&reg.email) {
        problems.push("Invalid email".to_string());
    }
    if reg.password.chars().count() < MIN_PASSWORD_LEN {
        problems.push(format!("Password must be at least {MIN_PASSWORD_LEN} characters"));
    }
    if reg.first_name.trim().is_empty() {
        problems.push("First name is required".to_string());
    }
    if reg.surname.trim().is_empty() {
        problems.push("Surname is required".to_string());
    }
    let dob = reg.date_of_birth;
    if !(1..=31).contains(&dob.day) || !(1..=12).contains(&dob.month) {
        problems.push("Invalid date of birth".to_string());
    } else if !(MIN_BIRTH_YEAR..=civil_year(now)).contains(&dob.year) {
        problems.push("Invalid year of birth".to_string());
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(ServiceError::Validation(format!(
            "Invalid registration data: {}",
            problems.join(", ")
        )))
    }
}

impl Accounts {
    pub fn new(
        store: Arc<dyn Store>,
        config: Config,
        hasher: Arc<dyn PasswordHasher>,
        tokens: Arc<dyn TokenAuthority>,
        mailer: Arc<dyn EmailSender>,
        secrets: Arc<SecretCache>,
    ) -> Self {
        Self { store, config, hasher, tokens, mailer, secrets }
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        let query = Query::partition(email).index(EMAIL_INDEX).page_size(1);
        let page = self.store.query_page(&self.config.tables.users, &query, None).await?;
        match page.items.into_iter().next() {
            Some(item) => Ok(Some(from_item(item)?)),
            None => Ok(None),
        }
    }

    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, ServiceError> {
        let key = Key::new(id.to_string());
        match self.store.get(&self.config.tables.users, &key).await? {
            Some(item) => Ok(Some(from_item(item)?)),
            None => Ok(None),
        }
    }

    async fn signing_secret(&self) -> String {
        self.secrets.fetch_or_create(&self.config.jwt_secret_name, random_secret).await
    }

    /// Create an unverified user and mail them a verification link.
    pub async fn register(&self, registration: Registration) -> Result<Registered, ServiceError> {
        let started = Instant::now();
        let result = self.register_inner(registration).await;
        record_operation(Operation::Register, started, &result);
        result
    }

    async fn register_inner(&self, reg: Registration) -> Result<Registered, ServiceError> {
        let now = now_ms();
        validate_registration(&reg, now)?;

        if self.user_by_email(&reg.email).await?.is_some() {
            return Err(ServiceError::Conflict("Email already in use".into()));
        }

        let token = Ulid::new().to_string();
        let user = User {
            id: Ulid::new(),
            email: reg.email,
            password_hash: self.hasher.hash(&reg.password)?,
            permissions: PERMISSIONS_NONE,
            first_name: reg.first_name,
            surname: reg.surname,
            email_verified: false,
            email_verification_token: Some(token.clone()),
            date_of_birth: reg.date_of_birth,
            address: None,
            phone_number: None,
            profile_picture_url: None,
            created_at: now,
        };

        let item = to_item(&user)?;
        match self.store.put(&self.config.tables.users, item, Some(Condition::NotExists)).await {
            Ok(()) => {}
            Err(StoreError::ConditionFailed { .. }) => {
                return Err(ServiceError::Conflict("Email already in use".into()));
            }
            Err(e) => return Err(e.into()),
        }
        info!("user {} registered", user.id);

        let link = format!("{}/verify-email?token={token}", self.config.frontend_url);
        self.mailer
            .send(
                &self.config.email_from,
                &user.email,
                "Verify your email",
                &format!("Please verify your email by clicking the link: {link}"),
            )
            .await?;

        Ok(Registered { user_id: user.id, verification_token: token })
    }

    /// Check `token` against the stored one. A mismatch burns the stored token.
    pub async fn verify_email(&self, email: &str, token: &str) -> Result<Verification, ServiceError> {
        let started = Instant::now();
        let result = self.verify_email_inner(email, token).await;
        record_operation(Operation::VerifyEmail, started, &result);
        result
    }

    async fn verify_email_inner(&self, email: &str, token: &str) -> Result<Verification, ServiceError> {
        let user = self
            .user_by_email(email)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".into()))?;
        if user.email_verified {
            return Ok(Verification::AlreadyVerified);
        }

        let key = Key::new(user.id.to_string());
        let users = &self.config.tables.users;
        if user.email_verification_token.as_deref() != Some(token) {
            let clear = Update::new().remove("emailVerificationToken");
            self.store.update(users, &key, clear, Some(Condition::Exists)).await?;
            warn!("verification token mismatch for user {}; token cleared", user.id);
            return Err(ServiceError::Validation("Invalid or expired verification token".into()));
        }

        let verify = Update::new().remove("emailVerificationToken").set("emailVerified", true);
        self.store.update(users, &key, verify, Some(Condition::Exists)).await?;
        info!("user {} verified", user.id);
        Ok(Verification::Verified)
    }

    /// Exchange credentials for a signed token.
    pub async fn login(&self, email: &str, password: &str) -> Result<String, ServiceError> {
        let started = Instant::now();
        let result = self.login_inner(email, password).await;
        record_operation(Operation::Login, started, &result);
        result
    }

    async fn login_inner(&self, email: &str, password: &str) -> Result<String, ServiceError> {
        if !is_email(email) || password.is_empty() {
            return Err(ServiceError::Validation("Invalid login data".into()));
        }
        let secret = self.signing_secret().await;

        let user = self
            .user_by_email(email)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".into()))?;
        if !self.hasher.verify(password, &user.password_hash) {
            return Err(ServiceError::Unauthenticated("Invalid password".into()));
        }

        let iat = now_ms();
        let lifetime = Ms::try_from(self.config.token_lifetime.as_millis()).unwrap_or(Ms::MAX);
        let claims = Claims {
            sub: user.id,
            permissions: user.permissions,
            iat,
            exp: iat.saturating_add(lifetime),
        };
        Ok(self.tokens.sign(&claims, &secret)?)
    }

    /// Validate an `Authorization` header. With `require_active_user` the
    /// token's user must still exist and have a verified e-mail.
    pub async fn authenticate(
        &self,
        header: Option<&str>,
        require_active_user: bool,
    ) -> Result<Claims, ServiceError> {
        let started = Instant::now();
        let result = self.authenticate_inner(header, require_active_user).await;
        record_operation(Operation::Authenticate, started, &result);
        result
    }

    async fn authenticate_inner(
        &self,
        header: Option<&str>,
        require_active_user: bool,
    ) -> Result<Claims, ServiceError> {
        let token = header
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ServiceError::Unauthenticated("Missing or invalid Authorization header".into())
            })?;

        let secret = self.signing_secret().await;
        let claims = self
            .tokens
            .verify(token, &secret)
            .filter(|c| c.exp > now_ms())
            .ok_or_else(|| ServiceError::Unauthenticated("Invalid or expired token".into()))?;

        if !require_active_user {
            return Ok(claims);
        }

        debug!("verifying active user {}", claims.sub);
        let user = self
            .user_by_id(claims.sub)
            .await?
            .ok_or_else(|| ServiceError::NotFound("User not found".into()))?;
        if !user.email_verified {
            return Err(ServiceError::Authorization("User email not verified".into()));
        }
        Ok(claims)
    }
}
