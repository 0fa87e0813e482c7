//! Gateway shard connection
//!
//! Wire protocol, codec, transport, and the per-shard lifecycle state
//! machine with heartbeat liveness and resume.

pub mod backoff;
pub mod codec;
pub mod guilds;
pub mod heartbeat;
pub mod protocol;
pub mod shard;
pub mod state;
pub mod transport;

pub use codec::{Codec, CodecError, JsonCodec};
pub use guilds::GuildRecord;
pub use shard::{ShardCommand, ShardConfig, ShardConnection, ShardHandle, ShardStage};
pub use state::{ShardHealth, ShardState, ShardStatus};
pub use transport::{GatewayStream, GatewayTransport, StreamEvent, WebSocketTransport};
