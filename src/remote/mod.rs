pub mod http_store;
pub mod reader;
pub mod session;
pub mod store;

pub use http_store::HttpRemoteStore;
pub use reader::{RangePlan, stream_range};
pub use session::{SessionLease, SessionPool};
pub use store::{CHUNK_SIZE, RemoteStore};
