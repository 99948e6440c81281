//! Downstream-specific wire constants.

/// Session token cookie the downstream authenticates with.
pub const SESSION_COOKIE: &str = "MMAUTHTOKEN";

/// User id companion cookie the downstream web client expects.
pub const USER_ID_COOKIE: &str = "MMUSERID";
