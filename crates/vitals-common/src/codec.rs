//! Gzip compression and protobuf batch framing.

use crate::pool::Pool;
use crate::proto::MetricProto;
use crate::types::Metric;
use flate2::read::GzDecoder;
use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};
use prost::Message;
use std::io::{self, Read, Write};

const WRITER_POOL_CAPACITY: usize = 16;

/// Minimal gzip member header: deflate, no flags, no mtime, unknown OS.
const GZIP_HEADER: [u8; 10] = [0x1f, 0x8b, 0x08, 0, 0, 0, 0, 0, 0, 0xff];

/// Gzip compressor with pooled deflate writers.
pub struct Gzipper {
    writers: Pool<DeflateEncoder<Vec<u8>>>,
    level: Compression,
}

impl Default for Gzipper {
    fn default() -> Self {
        Self::new(Compression::default())
    }
}

impl Gzipper {
    pub fn new(level: Compression) -> Self {
        Self {
            // `compress` resets each writer onto its own output buffer.
            writers: Pool::new(WRITER_POOL_CAPACITY, move || DeflateEncoder::new(Vec::new(), level), |_| {}),
            level,
        }
    }

    /// Compresses into a fresh buffer that is handed back as is.
    pub fn compress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(GZIP_HEADER.len() + data.len() / 2 + 8);
        out.extend_from_slice(&GZIP_HEADER);

        let mut writer = self.writers.acquire();
        writer.reset(out)?;
        writer.write_all(data)?;
        let mut out = writer.reset(Vec::new())?;

        let mut crc = Crc::new();
        crc.update(data);
        out.extend_from_slice(&crc.sum().to_le_bytes());
        out.extend_from_slice(&crc.amount().to_le_bytes());
        Ok(out)
    }

    pub fn decompress(&self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len().saturating_mul(4));
        GzDecoder::new(data).read_to_end(&mut out)?;
        Ok(out)
    }
}

impl std::fmt::Debug for Gzipper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gzipper").field("level", &self.level).finish()
    }
}

/// Encodes a batch as consecutive length-delimited `MetricProto` messages.
pub fn encode_batch(metrics: &[Metric]) -> Vec<u8> {
    let mut out = Vec::new();
    for metric in metrics {
        let proto = MetricProto::from(metric);
        proto.encode_length_delimited(&mut out).unwrap_or_else(|_| unreachable!("Vec grows on demand"));
    }
    out
}

pub fn decode_batch(mut data: &[u8]) -> Result<Vec<Metric>, prost::DecodeError> {
    let mut metrics = Vec::new();
    while !data.is_empty() {
        let proto = MetricProto::decode_length_delimited(&mut data)?;
        metrics.push(Metric::from(proto));
    }
    Ok(metrics)
}
