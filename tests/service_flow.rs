use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ulid::Ulid;

use desky::accounts::{Accounts, Verification};
use desky::config::Config;
use desky::engine::{table_schemas, Engine, ErrorKind};
use desky::model::*;
use desky::ports::{EmailSender, ObjectStore, PasswordHasher, PortError, SecretStore, TokenAuthority};
use desky::response::ServiceResponse;
use desky::secrets::SecretCache;
use desky::store::{MemoryStore, Store};

const SLOT: Ms = 900_000; // 15 minutes in ms
const DAY: Ms = 1_767_225_600_000;

// ── Test infrastructure ──────────────────────────────────────

#[derive(Default)]
struct Objects(Mutex<HashMap<String, Vec<u8>>>);

#[async_trait]
impl ObjectStore for Objects {
    async fn put_object_if_absent(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        _content_type: &str,
    ) -> Result<bool, PortError> {
        let mut objects = self.0.lock().unwrap();
        let path = format!("{bucket}/{key}");
        if objects.contains_key(&path) {
            return Ok(false);
        }
        objects.insert(path, body);
        Ok(true)
    }
}

#[derive(Default)]
struct Outbox(Mutex<Vec<(String, String)>>);

impl Outbox {
    fn last_token_for(&self, to: &str) -> Option<String> {
        let sent = self.0.lock().unwrap();
        let (_, body) = sent.iter().rev().find(|(recipient, _)| recipient == to)?;
        body.split("token=").nth(1).map(str::to_string)
    }
}

#[async_trait]
impl EmailSender for Outbox {
    async fn send(&self, _from: &str, to: &str, _subject: &str, body: &str) -> Result<(), PortError> {
        self.0.lock().unwrap().push((to.to_string(), body.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct Secrets(Mutex<HashMap<String, String>>);

#[async_trait]
impl SecretStore for Secrets {
    async fn get(&self, name: &str) -> Result<Option<String>, PortError> {
        Ok(self.0.lock().unwrap().get(name).cloned())
    }

    async fn create(&self, name: &str, value: &str) -> Result<(), PortError> {
        self.0.lock().unwrap().insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// `<claims json>|<secret>`; good enough to check the secret is threaded through.
struct JsonTokens;

impl TokenAuthority for JsonTokens {
    fn sign(&self, claims: &Claims, secret: &str) -> Result<String, PortError> {
        let json = serde_json::to_string(claims).map_err(|e| PortError::new("tokens", e.to_string()))?;
        Ok(format!("{json}|{secret}"))
    }

    fn verify(&self, token: &str, secret: &str) -> Option<Claims> {
        let (json, signed_with) = token.rsplit_once('|')?;
        if signed_with != secret {
            return None;
        }
        serde_json::from_str(json).ok()
    }
}

struct PrefixHasher;

impl PasswordHasher for PrefixHasher {
    fn hash(&self, password: &str) -> Result<String, PortError> {
        Ok(format!("hashed:{password}"))
    }

    fn verify(&self, password: &str, hash: &str) -> bool {
        hash.strip_prefix("hashed:") == Some(password)
    }
}

struct Harness {
    engine: Engine,
    accounts: Accounts,
    outbox: Arc<Outbox>,
    objects: Arc<Objects>,
}

fn setup_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness() -> Harness {
    setup_logging();
    let config = Config::default();
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new(table_schemas(&config.tables)));
    let objects = Arc::new(Objects::default());
    let outbox = Arc::new(Outbox::default());
    let secrets = Arc::new(SecretCache::new(Arc::new(Secrets::default())));

    let engine = Engine::new(store.clone(), objects.clone(), config.clone());
    let accounts = Accounts::new(
        store,
        config,
        Arc::new(PrefixHasher),
        Arc::new(JsonTokens),
        outbox.clone(),
        secrets,
    );
    Harness { engine, accounts, outbox, objects }
}

fn registration(email: &str) -> Registration {
    Registration {
        email: email.into(),
        password: "hunter22".into(),
        first_name: "Grace".into(),
        surname: "Hopper".into(),
        date_of_birth: DateOfBirth { day: 9, month: 12, year: 1986 },
    }
}

// ── Accounts ─────────────────────────────────────────────────

#[tokio::test]
async fn register_verify_login_authenticate() {
    let h = harness();
    let email = "grace@example.com";

    let registered = h.accounts.register(registration(email)).await.unwrap();
    let mailed = h.outbox.last_token_for(email).unwrap();
    assert_eq!(mailed, registered.verification_token);

    let token = h.accounts.login(email, "hunter22").await.unwrap();
    let header = format!("Bearer {token}");

    // Signed in, but not yet an active user.
    let claims = h.accounts.authenticate(Some(&header), false).await.unwrap();
    assert_eq!(claims.sub, registered.user_id);
    let err = h.accounts.authenticate(Some(&header), true).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);

    assert_eq!(h.accounts.verify_email(email, &mailed).await.unwrap(), Verification::Verified);
    assert_eq!(
        h.accounts.verify_email(email, &mailed).await.unwrap(),
        Verification::AlreadyVerified
    );
    assert_eq!(h.accounts.authenticate(Some(&header), true).await.unwrap(), claims);
}

#[tokio::test]
async fn wrong_verification_token_burns_the_real_one() {
    let h = harness();
    let email = "ada@example.com";
    let registered = h.accounts.register(registration(email)).await.unwrap();

    let err = h.accounts.verify_email(email, "not-the-token").await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid or expired verification token");

    let err = h
        .accounts
        .verify_email(email, &registered.verification_token)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn duplicate_email_rejected() {
    let h = harness();
    h.accounts.register(registration("dup@example.com")).await.unwrap();
    let err = h.accounts.register(registration("dup@example.com")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(err.to_string(), "Email already in use");
}

#[tokio::test]
async fn login_failures() {
    let h = harness();
    h.accounts.register(registration("kay@example.com")).await.unwrap();

    let err = h.accounts.login("kay@example.com", "wrong-pass").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    let err = h.accounts.login("nobody@example.com", "hunter22").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn authenticate_rejects_bad_headers() {
    let h = harness();
    for header in [None, Some(""), Some("Basic abc"), Some("Bearer "), Some("Bearer forged|secret")] {
        let err = h.accounts.authenticate(header, false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated, "{header:?}");
    }
}

// ── Offices and bookings ─────────────────────────────────────

#[tokio::test]
async fn office_booking_flow() {
    let h = harness();
    let owner = Ulid::new();
    let colleague = Ulid::new();

    let office = h
        .engine
        .create_office(
            owner,
            NewOffice { name: "Lisbon".into(), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(h.objects.0.lock().unwrap().len(), 1);

    h.engine.add_member(office.id, colleague, owner, Role::Member, false).await.unwrap();
    let members: Vec<UserId> = h
        .engine
        .list_office_members(office.id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.user_id)
        .collect();
    assert_eq!(members.len(), 2);
    assert!(members.contains(&owner) && members.contains(&colleague));

    let desk = Ulid::new();
    let booking = Booking::new(office.id, desk, owner, "Pairing", DAY, DAY + 4 * SLOT);
    h.engine.create_booking(booking.clone()).await.unwrap();
    h.engine
        .create_booking_attendee(booking.booking_id, colleague, AttendeeStatus::Pending)
        .await
        .unwrap();

    let clash = Booking::new(office.id, desk, colleague, "Focus", DAY + SLOT, DAY + 2 * SLOT);
    let response = ServiceResponse::from_result(h.engine.create_booking(clash).await, "Booking created.");
    assert_eq!(
        response,
        ServiceResponse::failure("Element is already booked for this time range.")
    );

    let after = Booking::new(office.id, desk, colleague, "Focus", DAY + 4 * SLOT, DAY + 5 * SLOT);
    let response = ServiceResponse::from_result(h.engine.create_booking(after).await, "Booking created.");
    assert!(response.success);

    let attending = h.engine.list_user_bookings(colleague).await.unwrap();
    assert_eq!(attending.len(), 1);
    assert_eq!(attending[0].booking_id, booking.booking_id);

    h.engine.remove_member(office.id, colleague, owner, false).await.unwrap();
    assert!(h.engine.get_membership(colleague, office.id).await.unwrap().is_none());
}

#[tokio::test]
async fn concurrent_membership_creation_leaves_one_pair() {
    let h = Arc::new(harness());
    let office = Ulid::new();
    let user = Ulid::new();

    let attempts = (0..8).map(|_| {
        let h = h.clone();
        tokio::spawn(async move { h.engine.create_membership(office, user, Role::Member).await })
    });
    let results = futures::future::join_all(attempts).await;
    let created = results.into_iter().filter(|r| matches!(r, Ok(Ok(_)))).count();

    assert_eq!(created, 1);
    assert_eq!(h.engine.list_office_members(office).await.unwrap().len(), 1);
    assert_eq!(h.engine.list_user_offices(user).await.unwrap().len(), 1);
}
