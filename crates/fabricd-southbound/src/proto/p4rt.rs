//! Trimmed `p4.v1` messages and a client for the three P4Runtime methods the
//! engine uses: StreamChannel, Get- and SetForwardingPipelineConfig.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Uint128 {
    #[prost(uint64, tag = "1")]
    pub high: u64,
    #[prost(uint64, tag = "2")]
    pub low: u64,
}

/// google.rpc.Status as carried on arbitration responses; details omitted.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RpcStatus {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Role {
    #[prost(uint64, tag = "1")]
    pub id: u64,
    #[prost(message, optional, tag = "2")]
    pub config: ::core::option::Option<::prost_types::Any>,
    #[prost(string, tag = "3")]
    pub name: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MasterArbitrationUpdate {
    #[prost(uint64, tag = "1")]
    pub device_id: u64,
    #[prost(message, optional, tag = "2")]
    pub role: ::core::option::Option<Role>,
    #[prost(message, optional, tag = "3")]
    pub election_id: ::core::option::Option<Uint128>,
    #[prost(message, optional, tag = "4")]
    pub status: ::core::option::Option<RpcStatus>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamMessageRequest {
    #[prost(oneof = "stream_message_request::Update", tags = "1")]
    pub update: ::core::option::Option<stream_message_request::Update>,
}

pub mod stream_message_request {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Update {
        #[prost(message, tag = "1")]
        Arbitration(super::MasterArbitrationUpdate),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StreamMessageResponse {
    #[prost(oneof = "stream_message_response::Update", tags = "1")]
    pub update: ::core::option::Option<stream_message_response::Update>,
}

pub mod stream_message_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Update {
        #[prost(message, tag = "1")]
        Arbitration(super::MasterArbitrationUpdate),
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ForwardingPipelineConfig {
    /// Binary-encoded `p4.config.v1.P4Info`, carried opaquely. A bytes field
    /// is wire-identical to the upstream message field.
    #[prost(bytes = "vec", tag = "1")]
    pub p4info: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "2")]
    pub p4_device_config: ::prost::alloc::vec::Vec<u8>,
    #[prost(message, optional, tag = "3")]
    pub cookie: ::core::option::Option<forwarding_pipeline_config::Cookie>,
}

pub mod forwarding_pipeline_config {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct Cookie {
        #[prost(uint64, tag = "1")]
        pub cookie: u64,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetForwardingPipelineConfigRequest {
    #[prost(uint64, tag = "1")]
    pub device_id: u64,
    #[prost(uint64, tag = "2")]
    pub role_id: u64,
    #[prost(string, tag = "6")]
    pub role: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "3")]
    pub election_id: ::core::option::Option<Uint128>,
    #[prost(
        enumeration = "set_forwarding_pipeline_config_request::Action",
        tag = "4"
    )]
    pub action: i32,
    #[prost(message, optional, tag = "5")]
    pub config: ::core::option::Option<ForwardingPipelineConfig>,
}

pub mod set_forwarding_pipeline_config_request {
    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
    )]
    #[repr(i32)]
    pub enum Action {
        Unspecified = 0,
        Verify = 1,
        VerifyAndSave = 2,
        VerifyAndCommit = 3,
        Commit = 4,
        ReconcileAndCommit = 5,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetForwardingPipelineConfigResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetForwardingPipelineConfigRequest {
    #[prost(uint64, tag = "1")]
    pub device_id: u64,
    #[prost(
        enumeration = "get_forwarding_pipeline_config_request::ResponseType",
        tag = "2"
    )]
    pub response_type: i32,
}

pub mod get_forwarding_pipeline_config_request {
    #[derive(
        Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration,
    )]
    #[repr(i32)]
    pub enum ResponseType {
        All = 0,
        CookieOnly = 1,
        P4infoAndCookie = 2,
        DeviceConfigAndCookie = 3,
    }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetForwardingPipelineConfigResponse {
    #[prost(message, optional, tag = "1")]
    pub config: ::core::option::Option<ForwardingPipelineConfig>,
}

/// `p4.config.v1.P4Info` package metadata. Only the header is modeled; the
/// schema sections are opaque to the engine, which embeds artifact bytes
/// verbatim.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct P4Info {
    #[prost(message, optional, tag = "1")]
    pub pkg_info: ::core::option::Option<PkgInfo>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PkgInfo {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub version: ::prost::alloc::string::String,
}

pub mod p4_runtime_client {
    use tonic::codegen::http;

    use super::*;

    /// P4Runtime client over a tonic channel, method shape as tonic-build
    /// would emit it.
    #[derive(Debug, Clone)]
    pub struct P4RuntimeClient {
        inner: tonic::client::Grpc<tonic::transport::Channel>,
    }

    impl P4RuntimeClient {
        pub fn new(channel: tonic::transport::Channel) -> Self {
            Self {
                inner: tonic::client::Grpc::new(channel),
            }
        }

        pub async fn connect(endpoint: String) -> Result<Self, tonic::transport::Error> {
            let channel = tonic::transport::Endpoint::new(endpoint)?.connect().await?;
            Ok(Self::new(channel))
        }

        async fn ready(&mut self) -> Result<(), tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(
                    tonic::Code::Unknown,
                    format!("Service was not ready: {}", e),
                )
            })
        }

        pub async fn stream_channel(
            &mut self,
            request: impl tonic::IntoStreamingRequest<Message = StreamMessageRequest>,
        ) -> Result<tonic::Response<tonic::codec::Streaming<StreamMessageResponse>>, tonic::Status>
        {
            self.ready().await?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/p4.v1.P4Runtime/StreamChannel");
            self.inner
                .streaming(request.into_streaming_request(), path, codec)
                .await
        }

        pub async fn get_forwarding_pipeline_config(
            &mut self,
            request: GetForwardingPipelineConfigRequest,
        ) -> Result<tonic::Response<GetForwardingPipelineConfigResponse>, tonic::Status> {
            self.ready().await?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/p4.v1.P4Runtime/GetForwardingPipelineConfig",
            );
            self.inner
                .unary(tonic::Request::new(request), path, codec)
                .await
        }

        pub async fn set_forwarding_pipeline_config(
            &mut self,
            request: SetForwardingPipelineConfigRequest,
        ) -> Result<tonic::Response<SetForwardingPipelineConfigResponse>, tonic::Status> {
            self.ready().await?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/p4.v1.P4Runtime/SetForwardingPipelineConfig",
            );
            self.inner
                .unary(tonic::Request::new(request), path, codec)
                .await
        }
    }
}
