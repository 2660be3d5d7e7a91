pub mod logging {
    use std::sync::Once;

    use tracing_subscriber::EnvFilter;

    /// Ensures the test subscriber is installed only once per process
    static INIT: Once = Once::new();

    pub fn init() {
        INIT.call_once(|| {
            let filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("coapd=debug"));
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_test_writer()
                .try_init();
        });
    }
}

pub mod client {
    use std::net::{SocketAddr, UdpSocket};
    use std::time::Duration;

    use coap_lite::{CoapOption, MessageClass, MessageType, Packet, RequestType};

    const RECV_TIMEOUT: Duration = Duration::from_secs(2);

    /// A minimal blocking CoAP client for loopback exchanges.
    ///
    /// Builds packets with `coap-lite` directly so tests control every
    /// header field the server is expected to echo or replace.
    pub struct LoopbackClient {
        socket: UdpSocket,
        server: SocketAddr,
        next_mid: u16,
    }

    impl LoopbackClient {
        pub fn connect(server: SocketAddr) -> Self {
            let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
            socket.set_read_timeout(Some(RECV_TIMEOUT)).unwrap();
            Self {
                socket,
                server,
                next_mid: 0x100,
            }
        }

        /// Build a request packet without sending it. The message id doubles
        /// as the token so every exchange is distinguishable.
        pub fn build_request(
            &mut self,
            message_type: MessageType,
            method: RequestType,
            path: &str,
            payload: &[u8],
        ) -> Packet {
            let mid = self.next_mid;
            self.next_mid = self.next_mid.wrapping_add(1);

            let mut packet = Packet::new();
            packet.header.set_type(message_type);
            packet.header.code = MessageClass::Request(method);
            packet.header.message_id = mid;
            packet.set_token(mid.to_be_bytes().to_vec());
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                packet.add_option(CoapOption::UriPath, segment.as_bytes().to_vec());
            }
            packet.payload = payload.to_vec();
            packet
        }

        pub fn send(&self, packet: &Packet) {
            let bytes = packet.to_bytes().unwrap();
            self.socket.send_to(&bytes, self.server).unwrap();
        }

        /// Receive one packet, panicking with context on timeout.
        pub fn recv(&self) -> Packet {
            match self.try_recv() {
                Some(packet) => packet,
                None => panic!("no reply from {} within {:?}", self.server, RECV_TIMEOUT),
            }
        }

        /// Receive one packet, or `None` if the read times out.
        pub fn try_recv(&self) -> Option<Packet> {
            let mut buffer = [0u8; 2048];
            match self.socket.recv_from(&mut buffer) {
                Ok((len, _peer)) => Some(Packet::from_bytes(&buffer[..len]).unwrap()),
                Err(_) => None,
            }
        }

        /// Send `packet` and wait for the reply.
        pub fn exchange(&self, packet: &Packet) -> Packet {
            self.send(packet);
            self.recv()
        }

        /// One confirmable request/response round trip.
        pub fn request(&mut self, method: RequestType, path: &str, payload: &[u8]) -> Packet {
            let packet = self.build_request(MessageType::Confirmable, method, path, payload);
            self.exchange(&packet)
        }

        /// Empty message of the given type. Confirmable is a CoAP ping.
        pub fn build_empty(&mut self, message_type: MessageType) -> Packet {
            let mid = self.next_mid;
            self.next_mid = self.next_mid.wrapping_add(1);

            let mut packet = Packet::new();
            packet.header.set_type(message_type);
            packet.header.code = MessageClass::Empty;
            packet.header.message_id = mid;
            packet
        }
    }

    /// First value of `option` on `packet`, if any.
    pub fn option_value(packet: &Packet, option: CoapOption) -> Option<Vec<u8>> {
        packet
            .get_option(option)
            .and_then(|values| values.front().cloned())
    }
}
