pub mod call_session;
pub mod chat_session;
pub mod lessons;
pub mod presence_store;
pub mod realtime_channel;
pub mod rest_gateway;
pub mod ringer;
