use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub type UserId = Ulid;
pub type OfficeId = Ulid;
pub type BookingId = Ulid;
/// A bookable element (desk, chair, ...) inside an office.
pub type ElementId = Ulid;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    #[default]
    Confirmed,
    Cancelled,
    Pending,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Pending => "PENDING",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub booking_id: BookingId,
    pub office_id: OfficeId,
    pub element_id: ElementId,
    pub booking_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub user_id: UserId,
    pub start_time: Ms,
    pub end_time: Ms,
    pub created_at: Ms,
    #[serde(default)]
    pub status: BookingStatus,
}

impl Booking {
    /// A fresh confirmed booking with a new id, stamped now.
    pub fn new(
        office_id: OfficeId,
        element_id: ElementId,
        user_id: UserId,
        booking_name: impl Into<String>,
        start_time: Ms,
        end_time: Ms,
    ) -> Self {
        Self {
            booking_id: Ulid::new(),
            office_id,
            element_id,
            booking_name: booking_name.into(),
            description: None,
            user_id,
            start_time,
            end_time,
            created_at: now_ms(),
            status: BookingStatus::Confirmed,
        }
    }

    pub fn window(&self) -> Option<Span> {
        Span::try_new(self.start_time, self.end_time)
    }
}

/// Partial amendment of a booking. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingUpdate {
    pub booking_name: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<Ms>,
    pub end_time: Option<Ms>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendeeStatus {
    Confirmed,
    Cancelled,
    #[default]
    Pending,
}

impl AttendeeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Pending => "PENDING",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingAttendee {
    pub booking_id: BookingId,
    pub user_id: UserId,
    pub status: AttendeeStatus,
}

// ── Offices ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Owner,
    Admin,
    Member,
}

impl Role {
    /// Roles allowed to change an office's member list.
    pub const MANAGERS: &'static [Role] = &[Role::Admin, Role::Owner];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "OWNER",
            Self::Admin => "ADMIN",
            Self::Member => "MEMBER",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    pub office_id: OfficeId,
    pub user_id: UserId,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ElementKind {
    Desk,
    Wall,
    Chair,
    Plant,
}

fn unit() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default = "unit")]
    pub length: f64,
    #[serde(default = "unit")]
    pub width: f64,
}

impl Position {
    pub fn at(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z, length: 1.0, width: 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfficeElement {
    #[serde(rename = "type")]
    pub kind: ElementKind,
    pub position: Position,
    #[serde(default)]
    pub is_bookable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfficeDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Office {
    pub id: OfficeId,
    pub owner: UserId,
    pub created_at: Ms,
    pub last_modified: Ms,
    pub name: String,
    #[serde(default)]
    pub description: OfficeDescription,
    #[serde(default)]
    pub elements: Vec<OfficeElement>,
}

/// Caller-supplied part of an office; id, owner and timestamps are assigned on creation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewOffice {
    pub name: String,
    pub description: OfficeDescription,
    pub elements: Vec<OfficeElement>,
}

// ── Users ────────────────────────────────────────────────────────

/// Permission bits carried in a user's token. No bits are granted at registration.
pub const PERMISSIONS_NONE: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateOfBirth {
    pub day: u8,
    pub month: u8,
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub country: String,
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    pub county: String,
    pub postal_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneNumber {
    pub country_code: String,
    pub number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub password_hash: String,
    pub permissions: u32,
    pub first_name: String,
    pub surname: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub email_verification_token: Option<String>,
    pub date_of_birth: DateOfBirth,
    #[serde(default)]
    pub address: Option<Address>,
    #[serde(default)]
    pub phone_number: Option<PhoneNumber>,
    #[serde(default)]
    pub profile_picture_url: Option<String>,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub surname: String,
    pub date_of_birth: DateOfBirth,
}

/// Token payload. `sub` is the stable user id, never the e-mail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    pub permissions: u32,
    pub iat: Ms,
    pub exp: Ms,
}
