//! Frame publishing over a ZeroMQ PUB socket.
//!
//! The publisher owns the messaging context and the socket with an explicit
//! init-at-startup, teardown-at-shutdown lifecycle; nothing transport-related
//! lives in ambient global state. One publisher binds one endpoint for the
//! life of the process.
//!
//! `send` is fire-and-forget: PUB sockets drop messages for slow or absent
//! subscribers, so there is no acknowledgment, retry, or backpressure here.

use anyhow::{anyhow, Context, Result};

/// Publishing side of the stream.
pub struct Publisher {
    endpoint: String,
    context: Option<zmq::Context>,
    socket: Option<zmq::Socket>,
}

impl Publisher {
    /// Bind `endpoint` (e.g. `tcp://*:5555`). Wildcard ports
    /// (`tcp://127.0.0.1:*`) are resolved, so `endpoint()` always reports the
    /// address subscribers can connect to.
    pub fn bind(endpoint: &str) -> Result<Self> {
        let context = zmq::Context::new();
        let socket = context
            .socket(zmq::PUB)
            .context("create publish socket")?;
        socket
            .bind(endpoint)
            .with_context(|| format!("bind publish endpoint {endpoint}"))?;

        let resolved = socket
            .get_last_endpoint()
            .ok()
            .and_then(|last| last.ok())
            .unwrap_or_else(|| endpoint.to_string());
        log::info!("publisher bound to {}", resolved);

        Ok(Self {
            endpoint: resolved,
            context: Some(context),
            socket: Some(socket),
        })
    }

    /// The bound endpoint, with wildcards resolved.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Broadcast one payload. Message boundaries come from the transport's
    /// framing; the payload goes out verbatim with no envelope.
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| anyhow!("publish socket is closed"))?;
        socket.send(payload, 0).context("publish frame")?;
        Ok(())
    }

    /// Close the socket. Returns whether this call performed the release.
    pub fn close_socket(&mut self) -> bool {
        let released = self.socket.take().is_some();
        if released {
            log::info!("publish socket on {} closed", self.endpoint);
        }
        released
    }

    /// Tear down the messaging context. Returns whether this call performed
    /// the release. The socket must be closed first or the context teardown
    /// would block on it.
    pub fn close_context(&mut self) -> bool {
        let released = self.context.take().is_some();
        if released {
            log::info!("messaging context terminated");
        }
        released
    }

    pub fn is_released(&self) -> bool {
        self.socket.is_none() && self.context.is_none()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_bind_resolves_a_concrete_port() {
        let publisher = Publisher::bind("tcp://127.0.0.1:*").unwrap();
        assert!(publisher.endpoint().starts_with("tcp://127.0.0.1:"));
        assert!(!publisher.endpoint().ends_with('*'));
    }

    #[test]
    fn send_is_fire_and_forget_without_subscribers() {
        let publisher = Publisher::bind("tcp://127.0.0.1:*").unwrap();
        publisher.send(b"frame").unwrap();
        publisher.send(b"frame").unwrap();
    }

    #[test]
    fn binding_a_taken_endpoint_fails() {
        let first = Publisher::bind("tcp://127.0.0.1:*").unwrap();
        assert!(Publisher::bind(first.endpoint()).is_err());
    }

    #[test]
    fn resources_release_exactly_once_each() {
        let mut publisher = Publisher::bind("tcp://127.0.0.1:*").unwrap();
        assert!(!publisher.is_released());

        assert!(publisher.close_socket());
        assert!(!publisher.close_socket());
        assert!(publisher.close_context());
        assert!(!publisher.close_context());
        assert!(publisher.is_released());

        assert!(publisher.send(b"frame").is_err());
    }
}
