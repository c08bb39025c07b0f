//! I/O adapters: a uniform poll/send/receive surface over a CAN raw socket
//! and a UDP multicast socket, so the scheduler's I/O step doesn't care
//! which transport backs a given interface.
//!
//! Frames are passed as `(arbitration id, payload)` pairs rather than plain
//! bytes: CAN needs the 29-bit identifier alongside the payload to hand back
//! to `cyphal::transport::can::CanFrame`, and the UDP transport simply
//! ignores it (its framing lives entirely in the payload header).

use std::io;
use std::net::UdpSocket;
use std::time::Duration;

use socketcan::{CanDataFrame, CanFrame, ExtendedId, Id, Socket};

pub trait IoAdapter {
    /// Send one outgoing frame/datagram. Non-blocking; `Capacity` is
    /// signalled to the caller as `Ok(false)` (the TX engine re-queues and
    /// tries again next tick) rather than as an error, matching §7's rule
    /// that transport-internal errors are absorbed, not propagated.
    fn send(&self, id: u32, payload: &[u8]) -> io::Result<bool>;

    /// Receive up to `batch_size` datagrams/frames, blocking no later than
    /// `deadline`. Returns the received `(id, payload)` pairs; an empty vec
    /// means nothing arrived before the deadline.
    fn receive(&self, deadline: Duration, batch_size: usize) -> io::Result<Vec<(u32, Vec<u8>)>>;
}

pub struct CanAdapter {
    socket: socketcan::CanSocket,
}

impl CanAdapter {
    pub fn open(interface: &str) -> io::Result<Self> {
        let socket = socketcan::CanSocket::open(interface).map_err(io::Error::other)?;
        Ok(Self { socket })
    }
}

impl IoAdapter for CanAdapter {
    fn send(&self, id: u32, payload: &[u8]) -> io::Result<bool> {
        let frame = CanFrame::new(
            ExtendedId::new(id).ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "id exceeds 29 bits"))?,
            payload,
        )
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "frame payload too large"))?;
        match self.socket.write_frame(&frame) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn receive(&self, deadline: Duration, batch_size: usize) -> io::Result<Vec<(u32, Vec<u8>)>> {
        self.socket.set_read_timeout(deadline)?;
        let mut out = Vec::new();
        for _ in 0..batch_size {
            match self.socket.read_frame() {
                Ok(CanFrame::Data(data)) => out.push((raw_id(&data), data.data().to_vec())),
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }
}

fn raw_id(frame: &CanDataFrame) -> u32 {
    match frame.id() {
        Id::Standard(id) => id.as_raw() as u32,
        Id::Extended(id) => id.as_raw(),
    }
}

pub struct UdpAdapter {
    socket: UdpSocket,
    destination: std::net::SocketAddrV4,
}

impl UdpAdapter {
    pub fn open(bind_addr: &str, destination: std::net::SocketAddrV4) -> io::Result<Self> {
        let socket = UdpSocket::bind(bind_addr)?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket, destination })
    }
}

impl IoAdapter for UdpAdapter {
    fn send(&self, _id: u32, payload: &[u8]) -> io::Result<bool> {
        match self.socket.send_to(payload, self.destination) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn receive(&self, deadline: Duration, batch_size: usize) -> io::Result<Vec<(u32, Vec<u8>)>> {
        let deadline = std::time::Instant::now() + deadline;
        let mut out = Vec::new();
        let mut buf = [0u8; 1500];
        while out.len() < batch_size && std::time::Instant::now() < deadline {
            match self.socket.recv_from(&mut buf) {
                Ok((n, _)) => out.push((0, buf[..n].to_vec())),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_adapter_round_trips_a_datagram() {
        let a = UdpAdapter::open("127.0.0.1:0", "127.0.0.1:0".parse().unwrap()).unwrap();
        let local_addr = a.socket.local_addr().unwrap();
        let std::net::SocketAddr::V4(local_v4) = local_addr else {
            panic!("expected ipv4 local addr");
        };

        let b = UdpAdapter::open("127.0.0.1:0", local_v4).unwrap();
        assert!(b.send(0, b"hello").unwrap());

        std::thread::sleep(Duration::from_millis(20));
        let received = a.receive(Duration::from_millis(100), 4).unwrap();
        assert_eq!(received, vec![(0, b"hello".to_vec())]);
    }
}
