//! Names of the properties the client registers for itself.
//!
//! Application properties must not reuse these names in the matching container.

/// Library version, device container, read-only.
pub const LIB_VERSION: &str = "LIB_VERSION";
/// Whether a firmware updater is installed, device container, read-only.
pub const OTA_CAP: &str = "OTA_CAP";
/// Result of the last update attempt, device container, read-only.
pub const OTA_ERROR: &str = "OTA_ERROR";
/// Checksum of the running image, device container, read-only.
pub const OTA_SHA256: &str = "OTA_SHA256";
/// Image location written by the cloud, device container.
pub const OTA_URL: &str = "OTA_URL";
/// Update request flag written by the cloud, device container.
pub const OTA_REQ: &str = "OTA_REQ";
/// Thing the device is attached to, device container.
pub const THING_ID: &str = "thing_id";
/// UTC offset in seconds, thing container.
pub const TZ_OFFSET: &str = "tz_offset";
/// Posix time of the next DST switch, thing container.
pub const TZ_DST_UNTIL: &str = "tz_dst_until";

/// Sent once per broker session.
pub(crate) const DEVICE_INFO: &[&str] = &[LIB_VERSION, OTA_CAP, OTA_ERROR, OTA_SHA256];
pub(crate) const OTA_FLAGS: &[&str] = &[OTA_REQ, OTA_ERROR];
pub(crate) const OTA_RESULT: &[&str] = &[OTA_ERROR];
