#![no_main]

use libfuzzer_sys::fuzz_target;
use packet_handler::{HandlerMode, PacketHandler, PipelineConfig};
use std::net::SocketAddr;

fuzz_target!(|data: &[u8]| {
    // Connectionless handshake parsing on both sides
    let address = SocketAddr::from(([192, 0, 2, 10], 4000));
    let config = PipelineConfig::default();

    if let Ok(mut server) = PacketHandler::from_config(HandlerMode::Server, &config, |_, _, _| {}) {
        server.tick(1.0);
        let _ = server.incoming_connectionless(address, data);
    }

    if let Ok(mut client) = PacketHandler::from_config(HandlerMode::Client, &config, |_, _, _| {}) {
        let _ = client.incoming(data);
        client.tick(2.0);
    }
});
