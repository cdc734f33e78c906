pub mod error;
pub mod http;
pub mod mock;
pub mod ws;

pub use error::NetError;
pub use http::HttpChatApi;
pub use mock::{ApiCall, MockChatApi, MockConnector, MockRemote, MockReply};
pub use ws::WsConnector;
