/// Maximum length of a booking's display name.
pub const MAX_BOOKING_NAME_LEN: usize = 100;

/// Maximum length of a booking description.
pub const MAX_BOOKING_DESCRIPTION_LEN: usize = 500;

pub const MAX_OFFICE_NAME_LEN: usize = 100;
pub const MAX_OFFICE_SHORT_DESCRIPTION_LEN: usize = 200;
pub const MAX_OFFICE_LONG_DESCRIPTION_LEN: usize = 1000;

/// Maximum number of operations in one transactional write.
pub const MAX_TRANSACT_ITEMS: usize = 100;

/// Items returned per page when a query does not set its own page size.
pub const DEFAULT_QUERY_PAGE_SIZE: usize = 100;

pub const MIN_PASSWORD_LEN: usize = 6;

pub const MIN_BIRTH_YEAR: i32 = 1900;
