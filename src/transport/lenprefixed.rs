//! Custom length-prefixed framing (spec §4.2/§6): 4-byte big-endian length
//! prefix followed by an opaque payload, no sequence id.

use crate::buffer::ByteChain;
use crate::error::{ServiceError, ServiceResult};
use crate::transport::{Frame, IngressState, Transport};

const LEN_PREFIX_SIZE: usize = 4;
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

pub struct LenPrefixedTransport {
    state: IngressState,
    write_buf: ByteChain,
}

impl LenPrefixedTransport {
    pub fn new() -> LenPrefixedTransport {
        LenPrefixedTransport {
            state: IngressState::Init,
            write_buf: ByteChain::new(),
        }
    }
}

impl Default for LenPrefixedTransport {
    fn default() -> LenPrefixedTransport {
        LenPrefixedTransport::new()
    }
}

impl Transport for LenPrefixedTransport {
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
                    "length-prefixed frame too large: {} bytes",
                    frame_len
                )));
            }

            if input.len() < LEN_PREFIX_SIZE + frame_len {
                self.state = IngressState::OnReading;
                break;
            }

            input.take(LEN_PREFIX_SIZE);
            let payload = input.take(frame_len);
            frames.push(Frame::LenPrefixed(payload));
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

/// Builds the wire form of a length-prefixed frame: 4-byte BE length then
/// the payload.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(LEN_PREFIX_SIZE + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_complete_frame() {
        let mut transport = LenPrefixedTransport::new();
        let mut input = ByteChain::new();
        input.append(encode_frame(b"hello"));

        let frames = transport.process_read_data(&mut input).unwrap();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::LenPrefixed(payload) => assert_eq!(payload, b"hello"),
            _ => panic!("wrong frame kind"),
        }
        assert_eq!(transport.ingress_state(), IngressState::Finish);
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let mut transport = LenPrefixedTransport::new();
        let mut input = ByteChain::new();
        let mut full = encode_frame(b"hello world");
        full.truncate(6);
        input.append(full);

        let frames = transport.process_read_data(&mut input).unwrap();
        assert!(frames.is_empty());
        assert_eq!(transport.ingress_state(), IngressState::OnReading);
    }
}
