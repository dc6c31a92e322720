//! Free host port allocation.
//!
//! The OS picks a free port for a loopback listener; the listener is held
//! until the container request is built and then dropped so Docker can bind
//! the same port. Another process can claim the port in between. That race is
//! accepted for test environments; a failed bind shows up as a container start
//! error.

use std::net::TcpListener;

/// A port held open by a bound listener until [`release`](Self::release).
#[derive(Debug)]
pub struct PortReservation {
    listener: TcpListener,
    port: u16,
}

impl PortReservation {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Close the listener and hand the port over to the caller.
    pub fn release(self) -> u16 {
        drop(self.listener);
        self.port
    }
}

/// Reserve an OS-assigned free port on `host`.
pub fn reserve_port(host: &str) -> std::io::Result<PortReservation> {
    let listener = TcpListener::bind((host, 0))?;
    let port = listener.local_addr()?.port();
    Ok(PortReservation { listener, port })
}
