/// Component appended to a service group to form its sync group scope,
/// and inserted before the subscription markers below.
pub const NDNSD: &str = "NDNSD";

/// Marker of names carrying published service records:
/// `<node>/<service name>/NDNSD/service-info`
pub const SERVICE_INFO: &str = "service-info";

/// Marker of discovery broadcasts: `<node>/NDNSD/discovery`
pub const DISCOVERY: &str = "discovery";

/// Discovery requests closer together than this are answered once.
pub const DISCOVERY_DEBOUNCE_SECS: u64 = 5;

/// Fetch attempts per name before it is abandoned.
pub const RETRANSMISSION_COUNT: u32 = 3;

/// API path prefix
pub const API_PREFIX: &str = "/v1";

/// TLV type numbers of the service record encoding
pub mod tlv_type {
    pub const SERVICE_INFO: u64 = 129;
    pub const NAME: u64 = 131;
    pub const APPLICATION_PREFIX: u64 = 132;
    pub const SERVICE_LIFETIME: u64 = 133;
    pub const PUBLISH_TIMESTAMP: u64 = 134;
    pub const SERVICE_META_INFO: u64 = 135;
    pub const KEY: u64 = 136;
    pub const VALUE: u64 = 137;
    pub const KEY_VALUE_PAIR: u64 = 138;
}
