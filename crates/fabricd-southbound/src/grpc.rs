//! Production southbound backends over tonic channels.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;
use tonic::codec::Streaming;
use tracing::debug;

use crate::error::SouthboundError;
use crate::proto::gnmi::{
    gnmi_client::GnmiClient as WireGnmiClient, typed_value, Path, SetRequest, TypedValue, Update,
};
use crate::proto::p4rt::{
    forwarding_pipeline_config, get_forwarding_pipeline_config_request::ResponseType,
    p4_runtime_client::P4RuntimeClient, stream_message_request, stream_message_response,
    ForwardingPipelineConfig, GetForwardingPipelineConfigRequest, MasterArbitrationUpdate,
    SetForwardingPipelineConfigRequest, StreamMessageRequest, StreamMessageResponse,
};
use crate::session::{
    action_to_proto, stratum_role, Destination, ElectionId, GnmiClient, GnmiConnector,
    P4rtConnector, P4rtSession, PipelineSpec,
};

const STREAM_BUFFER: usize = 16;

/// Endpoints in the topology come as `host:port`; tonic wants a URI.
fn endpoint_uri(endpoint: &str) -> String {
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{}", endpoint)
    }
}

fn transport_err(e: tonic::transport::Error) -> SouthboundError {
    SouthboundError::Transport(e.to_string())
}

// ── P4Runtime ────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct GrpcP4rtConnector;

impl GrpcP4rtConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl P4rtConnector for GrpcP4rtConnector {
    async fn open(&self, dest: &Destination) -> Result<Arc<dyn P4rtSession>, SouthboundError> {
        debug!(target_id = %dest.target_id, endpoint = %dest.endpoint, "dialing p4runtime");
        let mut client = P4RuntimeClient::connect(endpoint_uri(&dest.endpoint))
            .await
            .map_err(transport_err)?;

        let (requests, rx) = mpsc::channel(STREAM_BUFFER);
        let responses = client
            .stream_channel(ReceiverStream::new(rx))
            .await?
            .into_inner();

        Ok(Arc::new(GrpcP4rtSession {
            dest: dest.clone(),
            client: Mutex::new(client),
            requests: Mutex::new(Some(requests)),
            responses: Mutex::new(responses),
            election: std::sync::Mutex::new(None),
        }))
    }
}

struct GrpcP4rtSession {
    dest: Destination,
    client: Mutex<P4RuntimeClient>,
    requests: Mutex<Option<mpsc::Sender<StreamMessageRequest>>>,
    responses: Mutex<Streaming<StreamMessageResponse>>,
    election: std::sync::Mutex<Option<ElectionId>>,
}

impl GrpcP4rtSession {
    fn stream_closed(&self) -> SouthboundError {
        SouthboundError::Transport(format!("{}: stream closed", self.dest.target_id))
    }
}

#[async_trait]
impl P4rtSession for GrpcP4rtSession {
    async fn arbitrate(&self, election_id: ElectionId) -> Result<(), SouthboundError> {
        let update = MasterArbitrationUpdate {
            device_id: self.dest.device_id,
            role: Some(stratum_role(&self.dest.role_name)),
            election_id: Some(election_id.into()),
            status: None,
        };
        {
            let requests = self.requests.lock().await;
            let tx = requests.as_ref().ok_or_else(|| self.stream_closed())?;
            tx.send(StreamMessageRequest {
                update: Some(stream_message_request::Update::Arbitration(update)),
            })
            .await
            .map_err(|_| self.stream_closed())?;
        }

        // The device answers arbitration on the same stream; everything else
        // arriving in between is not ours to handle and is skipped.
        let mut responses = self.responses.lock().await;
        loop {
            let message = responses.message().await?.ok_or_else(|| {
                SouthboundError::Transport(format!(
                    "{}: stream ended during arbitration",
                    self.dest.target_id
                ))
            })?;
            let Some(stream_message_response::Update::Arbitration(arbitration)) = message.update
            else {
                continue;
            };
            return match arbitration.election_id {
                Some(ref wire) if election_id.matches(wire) => {
                    *self.election.lock().expect("election lock poisoned") = Some(election_id);
                    debug!(target_id = %self.dest.target_id, election_id = %election_id, "mastership granted");
                    Ok(())
                }
                _ => Err(SouthboundError::NotMaster(format!(
                    "{}: election {} not granted",
                    self.dest.target_id, election_id
                ))),
            };
        }
    }

    async fn pipeline_cookie(&self) -> Result<u64, SouthboundError> {
        let mut client = self.client.lock().await;
        let response = client
            .get_forwarding_pipeline_config(GetForwardingPipelineConfigRequest {
                device_id: self.dest.device_id,
                response_type: ResponseType::CookieOnly as i32,
            })
            .await?;
        Ok(response
            .into_inner()
            .config
            .and_then(|c| c.cookie)
            .map(|c| c.cookie)
            .unwrap_or(0))
    }

    async fn set_pipeline(&self, spec: PipelineSpec) -> Result<(), SouthboundError> {
        let election_id = self
            .election
            .lock()
            .expect("election lock poisoned")
            .ok_or_else(|| {
                SouthboundError::NotMaster(format!("{}: not arbitrated", self.dest.target_id))
            })?;

        let request = SetForwardingPipelineConfigRequest {
            device_id: self.dest.device_id,
            role_id: 0,
            role: self.dest.role_name.clone(),
            election_id: Some(election_id.into()),
            action: action_to_proto(spec.action) as i32,
            config: Some(ForwardingPipelineConfig {
                p4info: spec.p4info,
                p4_device_config: spec.p4bin,
                cookie: Some(forwarding_pipeline_config::Cookie {
                    cookie: spec.cookie,
                }),
            }),
        };
        let mut client = self.client.lock().await;
        client.set_forwarding_pipeline_config(request).await?;
        Ok(())
    }

    async fn close(&self) {
        // Dropping the sender half ends the stream on the device side.
        self.requests.lock().await.take();
    }
}

// ── gNMI ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct GrpcGnmiConnector;

impl GrpcGnmiConnector {
    pub fn new() -> Self {
        Self
    }
}

struct GrpcGnmiClient {
    client: WireGnmiClient,
}

#[async_trait]
impl GnmiClient for GrpcGnmiClient {
    async fn set_root(&mut self, config: &[u8]) -> Result<(), SouthboundError> {
        let request = SetRequest {
            replace: vec![Update {
                path: Some(Path::root()),
                val: Some(TypedValue {
                    value: Some(typed_value::Value::BytesVal(config.to_vec())),
                }),
            }],
            ..Default::default()
        };
        self.client.set(request).await?;
        Ok(())
    }
}

#[async_trait]
impl GnmiConnector for GrpcGnmiConnector {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn GnmiClient>, SouthboundError> {
        debug!(endpoint = %endpoint, "dialing gnmi");
        let client = WireGnmiClient::connect(endpoint_uri(endpoint))
            .await
            .map_err(transport_err)?;
        Ok(Box::new(GrpcGnmiClient { client }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_port_gets_a_scheme() {
        assert_eq!(endpoint_uri("fabric-sim:20000"), "http://fabric-sim:20000");
        assert_eq!(endpoint_uri("https://sw1:9339"), "https://sw1:9339");
    }
}
