pub mod conn;
pub mod error;
pub mod grpc;
pub mod proto;
pub mod session;
pub mod sim;

pub use conn::{
    Conn, ConnEvent, ConnEventKind, ConnManager, ConnWatch, ConnWatchError, ElectionClock,
};
pub use error::SouthboundError;
pub use grpc::{GrpcGnmiConnector, GrpcP4rtConnector};
pub use session::{
    decode_p4info, Destination, ElectionId, GnmiClient, GnmiConnector, P4rtConnector, P4rtSession,
    PipelineSpec,
};
pub use sim::{SimFabric, SimSwitch};
