use std::time::Duration;

use thiserror::Error;

use crate::model::Ms;

pub const DEFAULT_SLOT_MINUTES: i64 = 15;
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;

/// Names of the five backing tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tables {
    pub users: String,
    pub offices: String,
    pub memberships: String,
    pub bookings: String,
    pub attendees: String,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            users: "users".into(),
            offices: "offices".into(),
            memberships: "office-memberships".into(),
            bookings: "office-bookings".into(),
            attendees: "office-bookings-attendees".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub tables: Tables,
    /// Booking boundaries must be multiples of this many minutes.
    pub slot_minutes: i64,
    pub offices_bucket: String,
    pub email_from: String,
    pub frontend_url: String,
    pub jwt_secret_name: String,
    pub token_lifetime: Duration,
    /// WAL appends tolerated before the compactor rewrites the log.
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tables: Tables::default(),
            slot_minutes: DEFAULT_SLOT_MINUTES,
            offices_bucket: "desky-offices".into(),
            email_from: "no-reply@desky.local".into(),
            frontend_url: "http://localhost:5173".into(),
            jwt_secret_name: "v1-desky-jwt".into(),
            token_lifetime: Duration::from_secs(60 * 60),
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("booking slot must be at least one minute, got {0}")]
    InvalidSlot(i64),
}

impl Config {
    /// Read overrides from `DESKY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source. Unset or unparsable
    /// values keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        let text = |name: &str, target: &mut String| {
            if let Some(value) = lookup(name).filter(|v| !v.trim().is_empty()) {
                *target = value;
            }
        };
        text("DESKY_USERS_TABLE", &mut config.tables.users);
        text("DESKY_OFFICES_TABLE", &mut config.tables.offices);
        text("DESKY_MEMBERSHIPS_TABLE", &mut config.tables.memberships);
        text("DESKY_BOOKINGS_TABLE", &mut config.tables.bookings);
        text("DESKY_ATTENDEES_TABLE", &mut config.tables.attendees);
        text("DESKY_OFFICES_BUCKET", &mut config.offices_bucket);
        text("DESKY_EMAIL_FROM", &mut config.email_from);
        text("DESKY_FRONTEND_URL", &mut config.frontend_url);
        text("DESKY_JWT_SECRET_NAME", &mut config.jwt_secret_name);

        let slot = lookup("DESKY_BOOKING_SLOT_MINUTES")
            .or_else(|| lookup("BASE_BOOKING_CHUNK"))
            .and_then(|s| s.trim().parse::<i64>().ok());
        if let Some(minutes) = slot {
            if minutes <= 0 {
                return Err(ConfigError::InvalidSlot(minutes));
            }
            config.slot_minutes = minutes;
        }

        config.compact_threshold = lookup("DESKY_COMPACT_THRESHOLD")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_COMPACT_THRESHOLD);

        Ok(config)
    }

    /// Slot granularity in milliseconds.
    pub fn slot_ms(&self) -> Ms {
        self.slot_minutes * 60 * 1000
    }
}
