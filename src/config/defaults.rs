//! Default value helpers used by serde and the configuration structs.

/// Default bind address for the HTTP surface.
pub fn default_bind_address() -> Option<String> {
    Some("0.0.0.0:8088".to_string())
}

/// Default upstream identity provider name, informational only.
pub fn default_idp_name() -> String {
    "gitlab".to_string()
}

pub fn default_false() -> bool {
    false
}

pub fn default_true() -> bool {
    true
}
