/// API path prefix
pub const API_PREFIX: &str = "/api";

/// Path appended to a service's base URL to probe its availability.
/// Every registered service must answer `GET` on it with its own descriptor.
pub const SERVICE_INFO_PATH: &str = "/service-info";

/// Header carrying the checking cycle a probe belongs to
pub const CHECK_CYCLE_HEADER: &str = "x-check-cycle";
