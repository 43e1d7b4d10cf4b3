//! Durable outbound mail delivery queue backed by SQLite.
//!
//! A producer hands a fully-rendered message to [`service::Service::send`];
//! the message is validated, its attachments are copied into a durable
//! cache, and a row is written to the queue table. Priority-0 messages are
//! delivered synchronously before `send` returns; everything else waits for
//! a periodic caller to run [`service::Service::drain_queue`], which claims
//! and processes batches until the queue is empty or a deadline passes.
//!
//! Rows that fail delivery three times become dead letters and stay
//! queryable until an operator sets their `force_resend` flag for one more
//! attempt. Transports, template rendering, validation and audit logging are
//! trait boundaries supplied by the embedding application.

pub mod audit;
pub mod config;
pub mod error;
pub mod message;
pub mod render;
pub mod service;
pub mod store;
pub mod transport;
pub mod validate;
pub mod worker;
