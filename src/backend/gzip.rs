//! DEFLATE family backend, gzip or zlib framed, on zlib's `deflateInit2`.

use super::{
    CompressorFactory, Encoder, GzipFormat, GzipLevel, GzipSettings, GzipStrategy,
    OUTPUT_CHUNK_SIZE,
};
use crate::codec::FlushMode;
use crate::error::ConfigError;
use bytes::BytesMut;
use libz_rs_sys::{
    Z_BEST_COMPRESSION, Z_BEST_SPEED, Z_BUF_ERROR, Z_DEFAULT_COMPRESSION, Z_DEFAULT_STRATEGY,
    Z_DEFLATED, Z_FILTERED, Z_FINISH, Z_FIXED, Z_HUFFMAN_ONLY, Z_NO_FLUSH, Z_OK, Z_RLE,
    Z_STREAM_END, Z_SYNC_FLUSH, z_stream,
};
use std::ffi::c_int;
use std::io;

/// zlib adds this to the window bits to select gzip framing.
const GZIP_WINDOW_OFFSET: c_int = 16;

/// Factory for DEFLATE family encoders.
#[derive(Debug, Clone)]
pub struct GzipCompressorFactory {
    settings: GzipSettings,
}

impl GzipCompressorFactory {
    /// Validates `settings` and creates the factory.
    pub fn new(settings: GzipSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self { settings })
    }
}

impl CompressorFactory for GzipCompressorFactory {
    fn create_encoder(&self) -> io::Result<Box<dyn Encoder>> {
        Ok(Box::new(GzipEncoder::new(&self.settings)?))
    }

    fn content_encoding(&self) -> &str {
        match self.settings.format {
            GzipFormat::Gzip => "gzip",
            GzipFormat::Zlib => "deflate",
        }
    }

    fn stats_token(&self) -> &str {
        self.content_encoding()
    }
}

/// An initialized zlib deflate stream.
struct DeflateStream {
    // zlib keeps a pointer back to the stream, so it is boxed to stay put
    stream: Box<z_stream>,
}

// SAFETY: the stream and the zlib state behind it are owned by this value
// alone and are only touched through `&mut self`.
unsafe impl Send for DeflateStream {}

impl DeflateStream {
    fn new(level: c_int, window_bits: c_int, memory_level: c_int, strategy: c_int) -> io::Result<Self> {
        // SAFETY: an all-zero `z_stream` is the documented initial state, with
        // null allocator hooks selecting the default allocator.
        let mut stream = Box::new(unsafe { std::mem::zeroed::<z_stream>() });

        // SAFETY: `stream` is zeroed and outlives the deflate state it owns.
        let code = unsafe {
            libz_rs_sys::deflateInit2_(
                &mut *stream,
                level,
                Z_DEFLATED,
                window_bits,
                memory_level,
                strategy,
                libz_rs_sys::zlibVersion(),
                std::mem::size_of::<z_stream>() as c_int,
            )
        };
        if code != Z_OK {
            return Err(zlib_error("deflateInit2", code));
        }
        Ok(Self { stream })
    }

    /// Runs one `deflate` call and returns the bytes consumed, the bytes
    /// written and zlib's return code.
    fn deflate(&mut self, input: &[u8], output: &mut [u8], flush: c_int) -> (usize, usize, c_int) {
        let avail_in = input.len().min(u32::MAX as usize);
        let avail_out = output.len().min(u32::MAX as usize);

        self.stream.next_in = input.as_ptr() as _;
        self.stream.avail_in = avail_in as _;
        self.stream.next_out = output.as_mut_ptr() as _;
        self.stream.avail_out = avail_out as _;

        // SAFETY: the stream was initialized by `deflateInit2_` and both
        // buffers are valid for the lengths handed to zlib.
        let code = unsafe { libz_rs_sys::deflate(&mut *self.stream, flush) };

        let consumed = avail_in - self.stream.avail_in as usize;
        let written = avail_out - self.stream.avail_out as usize;

        // Don't leave pointers into caller buffers behind.
        self.stream.next_in = std::ptr::null::<u8>() as _;
        self.stream.avail_in = 0;
        self.stream.next_out = std::ptr::null_mut::<u8>() as _;
        self.stream.avail_out = 0;

        (consumed, written, code)
    }
}

impl Drop for DeflateStream {
    fn drop(&mut self) {
        // SAFETY: initialized in `new` and ended exactly once here.
        unsafe {
            libz_rs_sys::deflateEnd(&mut *self.stream);
        }
    }
}

fn zlib_error(call: &str, code: c_int) -> io::Error {
    io::Error::other(format!("zlib {call} failed with code {code}"))
}

/// Streaming DEFLATE encoder.
pub(crate) struct GzipEncoder {
    stream: DeflateStream,
    buffer: Box<[u8]>,
}

impl GzipEncoder {
    fn new(settings: &GzipSettings) -> io::Result<Self> {
        let level = match settings.level {
            GzipLevel::Fastest => Z_BEST_SPEED,
            GzipLevel::Default => Z_DEFAULT_COMPRESSION,
            GzipLevel::Best => Z_BEST_COMPRESSION,
        };
        let strategy = match settings.strategy {
            GzipStrategy::Default => Z_DEFAULT_STRATEGY,
            GzipStrategy::Filtered => Z_FILTERED,
            GzipStrategy::HuffmanOnly => Z_HUFFMAN_ONLY,
            GzipStrategy::Rle => Z_RLE,
            GzipStrategy::Fixed => Z_FIXED,
        };
        let window_bits = match settings.format {
            GzipFormat::Gzip => c_int::from(settings.window_bits) + GZIP_WINDOW_OFFSET,
            GzipFormat::Zlib => c_int::from(settings.window_bits),
        };

        Ok(Self {
            stream: DeflateStream::new(
                level,
                window_bits,
                c_int::from(settings.memory_level),
                strategy,
            )?,
            buffer: vec![0u8; OUTPUT_CHUNK_SIZE].into_boxed_slice(),
        })
    }
}

impl Encoder for GzipEncoder {
    fn encode(&mut self, input: &[u8], mode: FlushMode, output: &mut BytesMut) -> io::Result<()> {
        let flush = match mode {
            FlushMode::None => Z_NO_FLUSH,
            FlushMode::Sync => Z_SYNC_FLUSH,
            FlushMode::Finish => Z_FINISH,
        };

        let mut input = input;
        loop {
            let (consumed, written, code) = self.stream.deflate(input, &mut self.buffer, flush);
            if !matches!(code, Z_OK | Z_STREAM_END | Z_BUF_ERROR) {
                return Err(zlib_error("deflate", code));
            }

            input = &input[consumed..];
            output.extend_from_slice(&self.buffer[..written]);

            // A full scratch buffer means zlib may still hold pending output.
            let drained = match mode {
                FlushMode::None => input.is_empty(),
                FlushMode::Sync => input.is_empty() && written < self.buffer.len(),
                FlushMode::Finish => code == Z_STREAM_END,
            };
            if drained {
                return Ok(());
            }

            if consumed == 0 && written == 0 {
                // zlib reports a buffer error when a sync flush has nothing left to emit
                if mode != FlushMode::Finish && input.is_empty() && code == Z_BUF_ERROR {
                    return Ok(());
                }
                return Err(io::Error::other("deflate stream made no progress"));
            }
        }
    }
}
