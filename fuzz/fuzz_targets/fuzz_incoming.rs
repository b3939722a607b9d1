#![no_main]

use libfuzzer_sys::fuzz_target;
use packet_handler::config::ComponentKind;
use packet_handler::{HandlerMode, PacketHandler, PipelineConfig};

fuzz_target!(|data: &[u8]| {
    // Full connection chain on the receive path: must flag or drop, never panic
    let mut config = PipelineConfig::default();
    config.handler.components = vec![
        ComponentKind::Reliability,
        ComponentKind::Compression,
        ComponentKind::Encryption,
        ComponentKind::StatelessConnect,
    ];
    config.encryption.enabled = true;
    config.encryption.key = Some("11".repeat(32));

    if let Ok(mut handler) = PacketHandler::from_config(HandlerMode::Server, &config, |_, _, _| {}) {
        let result = handler.incoming(data);
        if result.error {
            assert_eq!(result.bit_count, 0);
        }
    }
});
