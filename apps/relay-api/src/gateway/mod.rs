pub mod broadcast;
pub mod events;
pub mod handler;
pub mod hub;
pub mod notify;
pub mod rooms;
pub mod server;
pub mod session;
pub mod sessions;

#[cfg(test)]
pub(crate) mod testing;
