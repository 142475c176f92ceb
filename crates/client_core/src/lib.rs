//! Capture-rig session core: frame socket, frame dispatch, command plane,
//! sensor feed and the session coordinator that ties them to the store.

pub mod command_client;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod sensor;
pub mod transport;
pub mod types;

pub use command_client::{CommandClient, CommandOp, CommandPlane, CommandResponse, RemoteCommand};
pub use coordinator::SessionCoordinator;
pub use dispatcher::FrameDispatcher;
pub use error::{CoreError, ErrorKind, FailureReport, RemoteCommandError};
pub use sensor::SensorSource;
pub use transport::{FrameTransport, TransportConfig, TransportEvent, DEFAULT_RECONNECT_DELAY};
pub use types::{ActiveSessionState, CoordinatorEvent, SensorSample};
