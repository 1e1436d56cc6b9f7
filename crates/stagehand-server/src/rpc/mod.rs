//! Request dispatch: handler trait, dispatcher, and built-in handlers.

pub mod context;
pub mod dispatcher;
pub mod handlers;
