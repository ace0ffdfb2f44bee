pub mod config;
pub mod logging;
pub mod membership;
pub mod message;
pub mod node;
pub mod runtime;
pub mod testing;
pub mod timeout;
pub mod transport;

pub use config::SwimConfig;
pub use membership::{MembershipEvent, MembershipView, PeerId, Snapshot, Status, StatusKind};
pub use message::{CorrelationId, Message, Probe, ProbeKind, ProbeRelayRequest, ProbeResponse};
pub use node::{Event, NodeConfig, SwimNode};
pub use runtime::{ServiceHandle, SwimService};
pub use timeout::{Timeout, TimeoutContext, TimeoutId, Timer};
pub use transport::Transport;
