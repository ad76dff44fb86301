use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use crate::net::protocol::{
    MAX_PACKET_SIZE, NETWORK_PING_TIMEOUT_MS, Packet, RawPacket,
};
use crate::net::stats::NetworkStats;

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Anything a single datagram can decode into.
#[derive(Debug)]
pub enum Datagram {
    Message(Packet),
    Raw(RawPacket),
}

/// Nonblocking UDP endpoint with bandwidth accounting. Both sides of the
/// connection use the same type; the server simply sends to many addresses.
pub struct NetworkEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    remote_addr: Option<SocketAddr>,
    stats: NetworkStats,
    recv_buffer: [u8; MAX_PACKET_SIZE],
    timeout: Duration,
    last_receive_time: Instant,
}

impl NetworkEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            remote_addr: None,
            stats: NetworkStats::default(),
            recv_buffer: [0u8; MAX_PACKET_SIZE],
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            last_receive_time: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn set_remote(&mut self, addr: SocketAddr) {
        self.remote_addr = Some(addr);
    }

    pub fn stats(&self) -> &NetworkStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut NetworkStats {
        &mut self.stats
    }

    pub fn send_to(&mut self, packet: &Packet, addr: SocketAddr) -> io::Result<usize> {
        let data = packet.serialize().map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("serialization error: {}", e))
        })?;

        if data.len() > MAX_PACKET_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "packet exceeds MTU",
            ));
        }

        let bytes = self.socket.send_to(&data, addr)?;
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes as u64;
        Ok(bytes)
    }

    pub fn send(&mut self, packet: &Packet) -> io::Result<usize> {
        let addr = self
            .remote_addr
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no remote address set"))?;
        self.send_to(packet, addr)
    }

    pub fn send_raw_to(&mut self, raw: &RawPacket, addr: SocketAddr) -> io::Result<usize> {
        let data = raw.encode();
        let bytes = self.socket.send_to(&data, addr)?;
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += bytes as u64;
        Ok(bytes)
    }

    pub fn send_raw(&mut self, raw: &RawPacket) -> io::Result<usize> {
        let addr = self
            .remote_addr
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no remote address set"))?;
        self.send_raw_to(raw, addr)
    }

    /// Drains every waiting datagram. Undecodable packets are skipped, not
    /// errors: this is an unreliable transport.
    pub fn receive(&mut self) -> io::Result<Vec<(Datagram, SocketAddr)>> {
        let mut datagrams = Vec::new();

        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    let data = &self.recv_buffer[..size];

                    if let Some(raw) = RawPacket::decode(data) {
                        match raw {
                            Ok(raw) => {
                                self.stats.packets_received += 1;
                                self.stats.bytes_received += size as u64;
                                self.last_receive_time = Instant::now();
                                datagrams.push((Datagram::Raw(raw), addr));
                            }
                            Err(e) => log::debug!("bad raw packet from {}: {}", addr, e),
                        }
                        continue;
                    }

                    match Packet::deserialize(data) {
                        Ok(packet) if packet.header.is_valid() => {
                            self.stats.packets_received += 1;
                            self.stats.bytes_received += size as u64;
                            self.last_receive_time = Instant::now();
                            datagrams.push((Datagram::Message(packet), addr));
                        }
                        Ok(_) => log::debug!("packet with bad magic from {}", addr),
                        Err(e) => log::debug!("undecodable packet from {}: {}", addr, e),
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }

        Ok(datagrams)
    }

    pub fn is_timed_out(&self) -> bool {
        self.last_receive_time.elapsed() > self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn mark_received(&mut self) {
        self.last_receive_time = Instant::now();
    }
}

/// In-flight ping bookkeeping and the RTT estimator fed by pongs.
#[derive(Debug)]
pub struct PingTracker {
    next_id: u16,
    in_flight: VecDeque<(u16, Instant)>,
    srtt: f32,
    rtt_var: f32,
    lost: u64,
    timeout: Duration,
}

impl Default for PingTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PingTracker {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            in_flight: VecDeque::new(),
            srtt: 100.0,
            rtt_var: 50.0,
            lost: 0,
            timeout: Duration::from_millis(NETWORK_PING_TIMEOUT_MS),
        }
    }

    /// Issues the next ping frame, counting overdue predecessors as lost.
    pub fn start_ping(&mut self) -> RawPacket {
        self.sweep_timed_out();

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.in_flight.push_back((id, Instant::now()));

        RawPacket::Ping { id }
    }

    /// Feeds a pong back in; returns the measured RTT in milliseconds when
    /// the id was still tracked.
    pub fn complete(&mut self, id: u16) -> Option<f32> {
        let index = self.in_flight.iter().position(|(p, _)| *p == id)?;
        let (_, sent) = self.in_flight.remove(index)?;

        let rtt = sent.elapsed().as_secs_f32() * 1000.0;
        self.update_rtt(rtt);
        Some(rtt)
    }

    fn sweep_timed_out(&mut self) {
        while let Some((id, sent)) = self.in_flight.front() {
            if sent.elapsed() <= self.timeout {
                break;
            }
            log::debug!("ping {} timed out", id);
            self.lost += 1;
            self.in_flight.pop_front();
        }
    }

    fn update_rtt(&mut self, rtt: f32) {
        const ALPHA: f32 = 0.125;
        const BETA: f32 = 0.25;

        let diff = (rtt - self.srtt).abs();
        self.rtt_var = (1.0 - BETA) * self.rtt_var + BETA * diff;
        self.srtt = (1.0 - ALPHA) * self.srtt + ALPHA * rtt;
    }

    pub fn srtt_ms(&self) -> f32 {
        self.srtt
    }

    pub fn srtt_seconds(&self) -> f32 {
        self.srtt / 1000.0
    }

    pub fn rtt_var_ms(&self) -> f32 {
        self.rtt_var
    }

    pub fn lost(&self) -> u64 {
        self.lost
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::protocol::{Message, PacketHeader};

    fn loopback_pair() -> (NetworkEndpoint, NetworkEndpoint) {
        let a = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
        let mut b = NetworkEndpoint::bind("127.0.0.1:0").unwrap();
        b.set_remote(a.local_addr());
        (a, b)
    }

    #[test]
    fn message_delivery_and_accounting() {
        let (mut a, mut b) = loopback_pair();

        let packet = Packet::new(PacketHeader::new(1), Message::Leave);
        b.send(&packet).unwrap();
        assert_eq!(b.stats().packets_sent, 1);

        // Nonblocking receive needs a moment on loopback.
        let mut received = Vec::new();
        for _ in 0..50 {
            received = a.receive().unwrap();
            if !received.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(received.len(), 1);
        assert!(matches!(
            received[0].0,
            Datagram::Message(Packet {
                message: Message::Leave,
                ..
            })
        ));
        assert_eq!(a.stats().packets_received, 1);
        assert!(a.stats().bytes_received > 0);
    }

    #[test]
    fn raw_ping_pong_delivery() {
        let (mut a, mut b) = loopback_pair();

        b.send_raw(&RawPacket::Ping { id: 3 }).unwrap();

        let mut received = Vec::new();
        for _ in 0..50 {
            received = a.receive().unwrap();
            if !received.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        assert!(matches!(
            received[0].0,
            Datagram::Raw(RawPacket::Ping { id: 3 })
        ));
    }

    #[test]
    fn ping_tracker_measures_rtt() {
        let mut tracker = PingTracker::new();
        let ping = tracker.start_ping();
        let RawPacket::Ping { id } = ping else {
            panic!("expected ping");
        };

        std::thread::sleep(Duration::from_millis(5));
        let rtt = tracker.complete(id).unwrap();
        assert!(rtt >= 5.0);
        assert_eq!(tracker.in_flight(), 0);

        // Unknown ids are ignored.
        assert!(tracker.complete(id).is_none());
    }

    #[test]
    fn stale_pings_count_as_lost() {
        let mut tracker = PingTracker::new();
        tracker.timeout = Duration::ZERO;

        tracker.start_ping();
        std::thread::sleep(Duration::from_millis(1));
        tracker.start_ping();

        assert_eq!(tracker.lost(), 1);
        assert_eq!(tracker.in_flight(), 1);
    }
}
