//! Length-delimited JSON framing.
//!
//! Each record is written as a 4-byte big-endian length followed by its JSON
//! body, so a queue connection is a plain stream of records with no further
//! envelope.

use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::{ProtocolError, MAX_RECORD_SIZE};

/// A codec for one record type over a byte stream.
///
/// ```ignore
/// use tokio_util::codec::{FramedRead, FramedWrite};
/// use synod_protocol::{JsonCodec, Promise};
///
/// let reader = FramedRead::new(read_half, JsonCodec::<Promise>::new());
/// let writer = FramedWrite::new(write_half, JsonCodec::<Promise>::new());
/// ```
#[derive(Debug)]
pub struct JsonCodec<T> {
    inner: LengthDelimitedCodec,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    /// Creates a codec limited to [`MAX_RECORD_SIZE`] bytes per record.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: LengthDelimitedCodec::builder()
                .max_frame_length(MAX_RECORD_SIZE)
                .new_codec(),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder for JsonCodec<T> {
    type Item = T;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<T>, ProtocolError> {
        match self.inner.decode(src)? {
            Some(frame) => Ok(Some(serde_json::from_slice(&frame)?)),
            None => Ok(None),
        }
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec<T> {
    type Error = ProtocolError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let body = serde_json::to_vec(&item)?;
        if body.len() > MAX_RECORD_SIZE {
            return Err(ProtocolError::TooLarge {
                size: body.len(),
                max: MAX_RECORD_SIZE,
            });
        }
        self.inner.encode(Bytes::from(body), dst)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Learn, ProposalNumber, ProposalValue, Promise};
    use bytes::BufMut;

    #[test]
    fn decodes_back_to_back_records() {
        let mut codec = JsonCodec::<Promise>::new();
        let mut buf = BytesMut::new();

        for id in 0..3 {
            let promise = Promise {
                id,
                prop_num: (id > 0).then_some(ProposalNumber(u64::from(id))),
            };
            codec.encode(promise, &mut buf).unwrap();
        }

        let mut decoded = Vec::new();
        while let Some(promise) = codec.decode(&mut buf).unwrap() {
            decoded.push(promise);
        }

        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[0].prop_num, None);
        assert_eq!(decoded[2].prop_num, Some(ProposalNumber(2)));
    }

    #[test]
    fn waits_for_complete_frame() {
        let mut codec = JsonCodec::<Learn>::new();
        let mut full = BytesMut::new();
        codec
            .encode(
                Learn {
                    id: 0,
                    prop_num: ProposalNumber(3),
                    prop_val: ProposalValue::text("x"),
                },
                &mut full,
            )
            .unwrap();

        let mut partial = full.split_to(full.len() - 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(full);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn rejects_malformed_body() {
        let mut codec = JsonCodec::<Promise>::new();
        let body = br#"{"id": "zero"}"#;
        let mut buf = BytesMut::new();
        buf.put_u32(body.len() as u32);
        buf.put_slice(body);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn rejects_oversized_frame_header() {
        let mut codec = JsonCodec::<Promise>::new();
        let mut buf = BytesMut::new();
        buf.put_u32((MAX_RECORD_SIZE + 1) as u32);
        buf.put_slice(&[0u8; 16]);

        assert!(matches!(codec.decode(&mut buf), Err(ProtocolError::Io(_))));
    }

    proptest::proptest! {
        #[test]
        fn any_accept_survives_a_split_stream(
            num in proptest::prelude::any::<u64>(),
            val in "[a-z0-9 ]{0,64}",
            cut in 0usize..128,
        ) {
            let mut codec = JsonCodec::<crate::Accept>::new();
            let accept = crate::Accept { num: ProposalNumber(num), val: ProposalValue::text(val) };
            let mut full = BytesMut::new();
            codec.encode(accept.clone(), &mut full).unwrap();

            let cut = cut.min(full.len());
            let rest = full.split_off(cut);
            let first = codec.decode(&mut full).unwrap();
            full.unsplit(rest);
            let decoded = match first {
                Some(record) => record,
                None => codec.decode(&mut full).unwrap().unwrap(),
            };
            proptest::prop_assert_eq!(decoded, accept);
        }
    }
}
