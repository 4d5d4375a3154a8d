pub mod action_queue;
pub mod captures;
pub mod memories;
