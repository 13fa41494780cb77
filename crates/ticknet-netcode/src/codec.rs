//! Packet encoding
//!
//! The decode side is the only place raw bytes become typed packets; anything
//! that does not decode into a known [`Packet`] is rejected here with
//! [`Error::MalformedPacket`].

use crate::protocol::Packet;
use crate::{Error, Result};
use bincode::Options;

/// Largest datagram the codec will produce or accept
pub const MAX_PACKET_BYTES: usize = 1200;

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_limit(MAX_PACKET_BYTES as u64)
        .reject_trailing_bytes()
}

/// Encode a packet into datagram bytes
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>> {
    options()
        .serialize(packet)
        .map_err(|e| Error::Serialization(e.to_string()))
}

/// Decode datagram bytes into a packet
pub fn decode_packet(bytes: &[u8]) -> Result<Packet> {
    if bytes.is_empty() {
        return Err(Error::MalformedPacket("empty datagram".to_string()));
    }
    options()
        .deserialize(bytes)
        .map_err(|e| Error::MalformedPacket(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{InputEnvelope, Message, MessageId, MovementInput, PeerId};
    use glam::Vec2;
    use ticknet_core::{EntityId, PlayerId};

    #[test]
    fn test_reliable_message_keeps_id() {
        let id = MessageId {
            sender: PeerId(1),
            counter: 9,
            timestamp: 4_000,
        };
        let packet = Packet::Message {
            reliable_id: Some(id),
            message: Message::PlayerJoined {
                player: PlayerId::new(4),
                entity: EntityId::new(40),
            },
        };

        let bytes = encode_packet(&packet).unwrap();
        assert_eq!(decode_packet(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_input_batch_preserves_order() {
        let inputs: Vec<_> = (0..5)
            .map(|tick| InputEnvelope {
                timestamp: 1_000 + tick * 16,
                input: MovementInput {
                    direction: Vec2::X,
                    rotation: 0.0,
                },
                client_game_tick: tick,
            })
            .collect();
        let packet = Packet::Message {
            reliable_id: None,
            message: Message::InputBatch {
                inputs: inputs.clone(),
            },
        };

        let decoded = decode_packet(&encode_packet(&packet).unwrap()).unwrap();
        match decoded {
            Packet::Message {
                message: Message::InputBatch { inputs: decoded },
                reliable_id: None,
            } => assert_eq!(decoded, inputs),
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            decode_packet(&[]),
            Err(Error::MalformedPacket(_))
        ));
        assert!(matches!(
            decode_packet(&[0xff, 0xff, 0xff, 0xff, 0x07]),
            Err(Error::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let packet = Packet::Message {
            reliable_id: None,
            message: Message::PlayerLeft {
                player: PlayerId::new(1),
            },
        };
        let mut bytes = encode_packet(&packet).unwrap();
        bytes.push(0);
        assert!(matches!(
            decode_packet(&bytes),
            Err(Error::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_oversized_batch_rejected() {
        let inputs = vec![
            InputEnvelope {
                timestamp: 0,
                input: MovementInput::default(),
                client_game_tick: 0,
            };
            200
        ];
        let packet = Packet::Message {
            reliable_id: None,
            message: Message::InputBatch { inputs },
        };
        assert!(matches!(
            encode_packet(&packet),
            Err(Error::Serialization(_))
        ));
    }
}
