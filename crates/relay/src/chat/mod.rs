pub mod bot;
pub mod bus;
pub mod gateway;
pub mod history;
pub mod moderation;
pub mod presence;
pub mod registry;
pub mod room;
pub mod session;
