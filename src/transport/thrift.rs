//! Binary framed RPC protocol (spec §4.2/§6): 4-byte big-endian length
//! prefix, opaque payload. The payload's leading 4 bytes are a big-endian
//! sequence id the dispatcher/outbound client correlate requests and
//! replies by; everything after that is opaque to the core (spec treats
//! Thrift payload encoding as out of scope).

use crate::buffer::ByteChain;
use crate::error::{ServiceError, ServiceResult};
use crate::transport::{Frame, IngressState, Transport};

const LEN_PREFIX_SIZE: usize = 4;
const SEQ_ID_SIZE: usize = 4;
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

pub struct ThriftTransport {
    state: IngressState,
    write_buf: ByteChain,
}

impl ThriftTransport {
    pub fn new() -> ThriftTransport {
        ThriftTransport {
            state: IngressState::Init,
            write_buf: ByteChain::new(),
        }
    }
}

impl Default for ThriftTransport {
    fn default() -> ThriftTransport {
        ThriftTransport::new()
    }
}

impl Transport for ThriftTransport {
    fn process_read_data(&mut self, input: &mut ByteChain) -> ServiceResult<Vec<Frame>> {
        let mut frames = Vec::new();

        loop {
            if input.len() < LEN_PREFIX_SIZE {
                self.state = IngressState::OnReading;
                break;
            }

            let mut cursor = input.cursor();
            let len_bytes: [u8; 4] = [
                cursor.next().unwrap(),
                cursor.next().unwrap(),
                cursor.next().unwrap(),
                cursor.next().unwrap(),
            ];
            let frame_len = u32::from_be_bytes(len_bytes) as usize;

            if frame_len > MAX_FRAME_SIZE {
                self.state = IngressState::Error;
                return Err(ServiceError::Protocol(format!(
                    "binary frame too large: {} bytes",
                    frame_len
                )));
            }
            if frame_len < SEQ_ID_SIZE {
                self.state = IngressState::Error;
                return Err(ServiceError::Protocol(
                    "binary frame shorter than sequence id".to_owned(),
                ));
            }

            if input.len() < LEN_PREFIX_SIZE + frame_len {
                self.state = IngressState::OnReading;
                break;
            }

            input.take(LEN_PREFIX_SIZE);
            let payload = input.take(frame_len);
            let sequence_id = u32::from_be_bytes(payload[..SEQ_ID_SIZE].try_into().unwrap());

            frames.push(Frame::Binary {
                sequence_id,
                payload,
            });
            self.state = IngressState::Finish;
        }

        Ok(frames)
    }

    fn send_header(&mut self, header: Vec<u8>) {
        self.write_buf.append(header);
    }

    fn send_body(&mut self, body: ByteChain) {
        let mut body = body;
        self.write_buf.append(body.take(body.len()));
    }

    fn write_buffer(&mut self) -> &mut ByteChain {
        &mut self.write_buf
    }

    fn ingress_state(&self) -> IngressState {
        self.state
    }

    fn reset(&mut self) {
        self.state = IngressState::Init;
    }
}

/// Encodes `sequence_id` followed by `body` as a length-prefixed binary
/// frame ready to hand to `send_header`/the socket.
pub fn encode_frame(sequence_id: u32, body: &[u8]) -> Vec<u8> {
    let payload_len = SEQ_ID_SIZE + body.len();
    let mut out = Vec::with_capacity(LEN_PREFIX_SIZE + payload_len);
    out.extend_from_slice(&(payload_len as u32).to_be_bytes());
    out.extend_from_slice(&sequence_id.to_be_bytes());
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_sequence_id() {
        let mut transport = ThriftTransport::new();
        let mut input = ByteChain::new();
        input.append(encode_frame(42, b"payload"));

        let frames = transport.process_read_data(&mut input).unwrap();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Binary { sequence_id, payload } => {
                assert_eq!(*sequence_id, 42);
                assert_eq!(&payload[SEQ_ID_SIZE..], b"payload");
            }
            _ => panic!("wrong frame kind"),
        }
    }

    #[test]
    fn rejects_frame_shorter_than_sequence_id() {
        let mut transport = ThriftTransport::new();
        let mut input = ByteChain::new();
        input.append(3u32.to_be_bytes().to_vec());
        input.append(vec![1, 2, 3]);

        assert!(transport.process_read_data(&mut input).is_err());
    }
}
