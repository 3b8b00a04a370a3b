// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Delimiter framing for the coordinator protocol

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::domain::config::ProcessConfig;
use crate::domain::protocol::ProtocolError;

#[derive(Debug, Clone)]
pub struct FrameCodec {
    delimiter: Vec<u8>,
    split_frames: bool,
    max_length: usize,
    /// Bytes already scanned without finding a delimiter
    next_index: usize,
}

impl FrameCodec {
    /// An empty `delimiter` turns splitting off: every read is one frame.
    pub fn new(delimiter: impl Into<Vec<u8>>, split_frames: bool, max_length: usize) -> Self {
        let delimiter = delimiter.into();
        Self {
            split_frames: split_frames && !delimiter.is_empty(),
            delimiter,
            max_length,
            next_index: 0,
        }
    }

    pub fn from_config(config: &ProcessConfig) -> Self {
        Self::new(
            config.package_eof.as_bytes().to_vec(),
            config.split_frames,
            config.max_frame_length,
        )
    }

    fn find_delimiter(&self, buf: &[u8]) -> Option<usize> {
        // Step back so a delimiter straddling two reads is still found
        let start = self.next_index.saturating_sub(self.delimiter.len() - 1);
        buf[start..]
            .windows(self.delimiter.len())
            .position(|w| w == self.delimiter.as_slice())
            .map(|pos| start + pos)
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        if src.is_empty() {
            return Ok(None);
        }

        if !self.split_frames {
            // Every read is one message
            let mut frame = src.split().freeze();
            if frame.ends_with(&self.delimiter) {
                frame.truncate(frame.len() - self.delimiter.len());
            }
            return Ok(Some(frame));
        }

        match self.find_delimiter(src) {
            Some(pos) => {
                self.next_index = 0;
                let frame = src.split_to(pos).freeze();
                src.advance(self.delimiter.len());
                Ok(Some(frame))
            }
            None if src.len() > self.max_length => {
                self.next_index = 0;
                src.clear();
                Err(ProtocolError::FrameTooLong {
                    limit: self.max_length,
                })
            }
            None => {
                self.next_index = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, ProtocolError> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                // A trailing partial frame without delimiter is dropped
                self.next_index = 0;
                src.clear();
                Ok(None)
            }
        }
    }
}

impl<T: AsRef<str>> Encoder<T> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, line: T, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let line = line.as_ref();
        dst.reserve(line.len() + self.delimiter.len());
        dst.put_slice(line.as_bytes());
        dst.put_slice(&self.delimiter);
        Ok(())
    }
}
