pub mod connection;
pub mod errors;
pub mod events;
pub mod identity;
pub mod ids;
pub mod periodic;
pub mod protocol;
pub mod route;
pub mod storage;
pub mod topic;

pub use connection::{Connection, ConnectionInfo, Outbound};
pub use identity::{AuthenticatedToken, Identity, IdentityToken};
pub use ids::ConnectionId;
pub use route::{PubSubRouter, Route, RouteDefinition};
pub use topic::{Topic, TopicArg};
