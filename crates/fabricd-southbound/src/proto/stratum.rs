//! The Stratum role descriptor attached to mastership arbitration.

pub const P4_ROLE_CONFIG_TYPE_URL: &str = "type.googleapis.com/stratum.P4RoleConfig";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct P4RoleConfig {
    #[prost(uint32, repeated, tag = "1")]
    pub exclusive_p4_ids: ::prost::alloc::vec::Vec<u32>,
    #[prost(uint32, repeated, tag = "2")]
    pub shared_p4_ids: ::prost::alloc::vec::Vec<u32>,
    #[prost(uint64, tag = "3")]
    pub packet_in_filter_id: u64,
    #[prost(string, tag = "4")]
    pub packet_in_filter_value: ::prost::alloc::string::String,
    #[prost(bool, tag = "5")]
    pub receives_packet_ins: bool,
    #[prost(bool, tag = "6")]
    pub can_push_pipeline: bool,
}
