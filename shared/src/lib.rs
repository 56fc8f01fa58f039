pub mod protocol;
pub mod tlv;
pub mod types;
