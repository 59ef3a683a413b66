// livechat-common: wire protocol and shared types for stream chat

pub mod protocol;
pub mod types;
pub mod validation;
