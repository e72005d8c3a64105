//! Zstandard backend, one frame per stream.

use super::{CompressorFactory, Encoder, OUTPUT_CHUNK_SIZE, ZstdSettings};
use crate::codec::FlushMode;
use crate::error::ConfigError;
use bytes::BytesMut;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use zstd::dict::EncoderDictionary;
use zstd::stream::raw::{CParameter, Encoder as RawEncoder, InBuffer, Operation, OutBuffer};
use zstd::zstd_safe::Strategy;

/// Factory for Zstandard frame encoders.
///
/// A dictionary, when configured, is digested once at the factory's level and
/// the prepared dictionary is shared by every stream's encoder.
#[derive(Clone)]
pub struct ZstdCompressorFactory {
    level: i32,
    strategy: u32,
    enable_checksum: bool,
    dictionary: Option<Arc<EncoderDictionary<'static>>>,
}

impl ZstdCompressorFactory {
    /// Creates a factory without a dictionary.
    pub fn new(level: i32, strategy: u32, enable_checksum: bool) -> Result<Self, ConfigError> {
        ZstdSettings {
            level,
            strategy,
            enable_checksum,
            dictionary: None,
        }
        .validate()?;

        Ok(Self {
            level,
            strategy,
            enable_checksum,
            dictionary: None,
        })
    }

    /// Validates `settings` and creates the factory, reading the dictionary
    /// file if one is configured.
    pub fn from_settings(settings: &ZstdSettings) -> Result<Self, ConfigError> {
        let factory = Self::new(settings.level, settings.strategy, settings.enable_checksum)?;
        match &settings.dictionary {
            Some(path) => factory.with_dictionary(&read_dictionary(path)?),
            None => Ok(factory),
        }
    }

    /// Attaches a pre-trained (or raw content) dictionary, prepared at this
    /// factory's compression level.
    pub fn with_dictionary(mut self, dictionary: &[u8]) -> Result<Self, ConfigError> {
        if dictionary.is_empty() {
            return Err(ConfigError::EmptyDictionary);
        }
        self.dictionary = Some(Arc::new(EncoderDictionary::copy(dictionary, self.level)));
        Ok(self)
    }
}

impl fmt::Debug for ZstdCompressorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZstdCompressorFactory")
            .field("level", &self.level)
            .field("strategy", &self.strategy)
            .field("enable_checksum", &self.enable_checksum)
            .field("dictionary", &self.dictionary.is_some())
            .finish()
    }
}

impl CompressorFactory for ZstdCompressorFactory {
    fn create_encoder(&self) -> io::Result<Box<dyn Encoder>> {
        let mut context = match &self.dictionary {
            Some(dictionary) => RawEncoder::with_prepared_dictionary(&**dictionary)?,
            None => RawEncoder::new(self.level)?,
        };

        if self.enable_checksum {
            context.set_parameter(CParameter::ChecksumFlag(true))?;
        }
        if let Some(strategy) = strategy_from_value(self.strategy) {
            context.set_parameter(CParameter::Strategy(strategy))?;
        }

        Ok(Box::new(ZstdEncoder {
            context,
            buffer: vec![0u8; OUTPUT_CHUNK_SIZE].into_boxed_slice(),
            _dictionary: self.dictionary.clone(),
        }))
    }

    fn content_encoding(&self) -> &str {
        "zstd"
    }

    fn stats_token(&self) -> &str {
        "zstd"
    }
}

fn read_dictionary(path: &Path) -> Result<Vec<u8>, ConfigError> {
    let bytes = std::fs::read(path).map_err(|source| ConfigError::DictionaryFile {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), len = bytes.len(), "loaded zstd dictionary");
    Ok(bytes)
}

/// Maps the configured tuning value onto a zstd strategy; 0 means default.
fn strategy_from_value(value: u32) -> Option<Strategy> {
    match value {
        1 => Some(Strategy::ZSTD_fast),
        2 => Some(Strategy::ZSTD_dfast),
        3 => Some(Strategy::ZSTD_greedy),
        4 => Some(Strategy::ZSTD_lazy),
        5 => Some(Strategy::ZSTD_lazy2),
        6 => Some(Strategy::ZSTD_btlazy2),
        7 => Some(Strategy::ZSTD_btopt),
        8 => Some(Strategy::ZSTD_btultra),
        9 => Some(Strategy::ZSTD_btultra2),
        _ => None,
    }
}

/// Streaming zstd encoder writing one frame per stream.
pub(crate) struct ZstdEncoder {
    context: RawEncoder<'static>,
    buffer: Box<[u8]>,
    // The context references this dictionary; declared after it so it drops last.
    _dictionary: Option<Arc<EncoderDictionary<'static>>>,
}

impl ZstdEncoder {
    fn drain<F>(&mut self, output: &mut BytesMut, mut step: F) -> io::Result<()>
    where
        F: FnMut(&mut RawEncoder<'static>, &mut OutBuffer<'_, [u8]>) -> io::Result<usize>,
    {
        loop {
            let mut out = OutBuffer::around(&mut self.buffer[..]);
            let remaining = step(&mut self.context, &mut out)?;
            let written = out.pos();
            output.extend_from_slice(&self.buffer[..written]);
            if remaining == 0 {
                return Ok(());
            }
        }
    }
}

impl Encoder for ZstdEncoder {
    fn encode(&mut self, data: &[u8], mode: FlushMode, output: &mut BytesMut) -> io::Result<()> {
        let mut input = InBuffer::around(data);
        while input.pos() < data.len() {
            let mut out = OutBuffer::around(&mut self.buffer[..]);
            self.context.run(&mut input, &mut out)?;
            let written = out.pos();
            output.extend_from_slice(&self.buffer[..written]);
        }

        match mode {
            FlushMode::None => Ok(()),
            FlushMode::Sync => self.drain(output, |context, out| context.flush(out)),
            FlushMode::Finish => self.drain(output, |context, out| context.finish(out, true)),
        }
    }
}
