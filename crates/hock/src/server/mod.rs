//! HTTP surface: request dispatch and the TCP accept loop.

mod handler;
mod listener;

#[cfg(test)]
mod tests;

pub use handler::{dispatch, handle_request, Handler, HockBody};
pub use listener::{bind, spawn_accept_loop, ListenerHandle};
