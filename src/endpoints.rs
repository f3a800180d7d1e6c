//! The relay's own engine endpoints.

use std::sync::Arc;

use crate::engine::{short_name, GraphEngine, PortFlow};
use crate::error::{RelayError, Result};
use crate::stream::Direction;

/// Full names of the relay's endpoints, per direction and in channel order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EndpointNames {
    names: [Vec<String>; 3],
}

impl EndpointNames {
    /// Endpoint names for `direction`.
    pub fn get(&self, direction: Direction) -> &[String] {
        &self.names[direction.index()]
    }

    /// The relay endpoint for `direction` whose short name equals `short`.
    pub fn matching(&self, direction: Direction, short: &str) -> Option<&str> {
        self.get(direction)
            .iter()
            .find(|name| short_name(name) == short)
            .map(String::as_str)
    }

    pub(crate) fn push(&mut self, direction: Direction, full_name: String) {
        self.names[direction.index()].push(full_name);
    }
}

/// Endpoints registered on an engine. Dropping this unregisters them, last
/// registered first.
pub(crate) struct Registration<G: GraphEngine> {
    engine: Arc<G>,
    names: EndpointNames,
}

impl<G: GraphEngine> Registration<G> {
    /// Register `playback_N` inputs, then `capture_N` and `monitor_N` outputs.
    pub fn register(engine: Arc<G>, channels: u16) -> Result<Self> {
        let mut registration = Self {
            engine,
            names: EndpointNames::default(),
        };
        for direction in Direction::ALL {
            let flow = if direction.is_record() {
                PortFlow::Output
            } else {
                PortFlow::Input
            };
            for channel in 1..=channels {
                let port = format!("{}_{}", direction.port_prefix(), channel);
                // on error, dropping `registration` releases what was registered so far
                let full_name = registration
                    .engine
                    .register_port(&port, flow)
                    .map_err(|source| RelayError::PortRegistration { port, source })?;
                registration.names.push(direction, full_name);
            }
        }
        Ok(registration)
    }

    pub fn names(&self) -> &EndpointNames {
        &self.names
    }
}

impl<G: GraphEngine> Drop for Registration<G> {
    fn drop(&mut self) {
        for direction in Direction::ALL.into_iter().rev() {
            for name in self.names.get(direction).iter().rev() {
                if let Err(err) = self.engine.unregister_port(name) {
                    tracing::warn!(port = %name, %err, "unable to unregister port");
                }
            }
        }
    }
}
