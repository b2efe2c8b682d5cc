//! Monitoring and control bridge for a networked aquarium controller.
//!
//! The device publishes temperature, pH and feed telemetry over MQTT and
//! accepts text commands.  [`bridge::Bridge`] is the single owner of the
//! device config and connection state; everything else talks to it through
//! [`bridge::BridgeEvent`]s.

pub mod bridge;
pub mod clock;
pub mod command;
pub mod config;
pub mod dashboard;
pub mod gate;
pub mod mqtt;
pub mod presenter;
pub mod schedule;
pub mod store;
pub mod telemetry;
pub mod transport;
pub mod web;
