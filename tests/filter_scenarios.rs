//! Drives the compressor filter with synthetic header events and body chunk
//! sequences, then checks the output and the stats counters.

#![cfg(all(feature = "gzip", feature = "zstd"))]

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderValue, header};
use proptest::prelude::*;
use proxy_compressor::backend::{GzipFormat, GzipLevel, GzipSettings, GzipStrategy, ZstdSettings};
use proxy_compressor::{
    BackendConfig, CompressorConfig, CompressorFactory, CompressorFilter, DEFAULT_RUNTIME_KEY,
    Encoder, FilterConfig, FilterStatus, FlushMode, RuntimeFlags, StatsStore,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::{self, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const TEST_DATA_LEN: usize = 122_880;

/// Wraps a real factory and counts the encoders it hands out.
struct CountingFactory {
    inner: Arc<dyn CompressorFactory>,
    created: AtomicUsize,
}

impl CompressorFactory for CountingFactory {
    fn create_encoder(&self) -> io::Result<Box<dyn Encoder>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.inner.create_encoder()
    }

    fn content_encoding(&self) -> &str {
        self.inner.content_encoding()
    }

    fn stats_token(&self) -> &str {
        self.inner.stats_token()
    }
}

struct Fixture {
    store: StatsStore,
    runtime: Arc<RuntimeFlags>,
    factory: Arc<CountingFactory>,
    config: Arc<FilterConfig>,
}

impl Fixture {
    fn new(backend: BackendConfig, configure: impl FnOnce(&mut CompressorConfig)) -> Self {
        let mut config = CompressorConfig::new(backend);
        config.stats_prefix = "test".to_string();
        configure(&mut config);

        let store = StatsStore::new();
        let runtime = Arc::new(RuntimeFlags::new());
        let factory = Arc::new(CountingFactory {
            inner: config.backend.build().unwrap(),
            created: AtomicUsize::new(0),
        });
        let filter_config =
            FilterConfig::with_factory(&config, factory.clone(), &store, runtime.clone()).unwrap();

        Self {
            store,
            runtime,
            factory,
            config: Arc::new(filter_config),
        }
    }

    fn gzip(configure: impl FnOnce(&mut CompressorConfig)) -> Self {
        Self::new(BackendConfig::Gzip(GzipSettings::default()), configure)
    }

    fn zstd(configure: impl FnOnce(&mut CompressorConfig)) -> Self {
        Self::new(BackendConfig::Zstd(ZstdSettings::default()), configure)
    }

    fn token(&self) -> &str {
        self.config.content_encoding()
    }

    fn counter(&self, name: &str) -> u64 {
        self.store
            .counter(&format!("test.{}.{name}", self.token()))
            .value()
    }

    fn encoders_created(&self) -> usize {
        self.factory.created.load(Ordering::SeqCst)
    }

    /// Runs request and response headers through a fresh filter.
    fn start(&self, accept_encoding: &str, response: &mut HeaderMap) -> CompressorFilter {
        let mut filter = CompressorFilter::new(self.config.clone());
        let mut request = HeaderMap::new();
        request.insert(
            header::ACCEPT_ENCODING,
            HeaderValue::from_str(accept_encoding).unwrap(),
        );
        assert_eq!(filter.on_request_headers(&request), FilterStatus::Continue);
        assert_eq!(
            filter.on_response_headers(response, false),
            FilterStatus::Continue
        );
        filter
    }
}

fn random_data(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; len];
    rng.fill(&mut data[..]);
    data
}

/// Text-like data that compresses well.
fn text_data(len: usize) -> Vec<u8> {
    b"The quick brown fox jumps over the lazy dog. "
        .iter()
        .copied()
        .cycle()
        .take(len)
        .collect()
}

/// Feeds `data` in chunks of `chunk_size`, marking the last one end of stream.
fn feed(filter: &mut CompressorFilter, data: &[u8], chunk_size: usize) -> Vec<u8> {
    let chunks: Vec<&[u8]> = data.chunks(chunk_size).collect();
    let mut output = Vec::new();
    for (i, chunk) in chunks.iter().enumerate() {
        let mut buffer = Bytes::copy_from_slice(chunk);
        let status = filter
            .encode_data(&mut buffer, i + 1 == chunks.len())
            .unwrap();
        assert_eq!(status, FilterStatus::Continue);
        output.extend_from_slice(&buffer);
    }
    output
}

fn decode(encoding: &str, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    match encoding {
        "gzip" => {
            flate2::read::GzDecoder::new(data)
                .read_to_end(&mut out)
                .unwrap();
        }
        "deflate" => {
            flate2::read::ZlibDecoder::new(data)
                .read_to_end(&mut out)
                .unwrap();
        }
        "zstd" => out = zstd::stream::decode_all(data).unwrap(),
        other => panic!("unexpected encoding {other}"),
    }
    out
}

#[test]
fn short_response_passes_through() {
    let fixture = Fixture::gzip(|config| config.min_content_length = 1024);
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("500"));
    let mut filter = fixture.start("gzip", &mut headers);

    let body = text_data(500);
    let mut data = Bytes::from(body.clone());
    filter.encode_data(&mut data, true).unwrap();

    assert_eq!(data, body);
    assert!(headers.get(header::CONTENT_ENCODING).is_none());
    assert_eq!(headers.get(header::CONTENT_LENGTH).unwrap(), "500");
    assert_eq!(fixture.counter("not_compressed"), 1);
    assert_eq!(fixture.counter("compressed"), 0);
    assert_eq!(fixture.encoders_created(), 0);
}

#[test]
fn allowed_content_type_is_compressed() {
    for fixture in [
        Fixture::gzip(|c| c.content_types = Some(vec!["application/json".to_string()])),
        Fixture::zstd(|c| c.content_types = Some(vec!["application/json".to_string()])),
    ] {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let token = fixture.token().to_string();
        let mut filter = fixture.start(&token, &mut headers);

        let body = random_data(TEST_DATA_LEN, 1);
        let output = feed(&mut filter, &body, 40_960);

        assert_eq!(headers.get(header::CONTENT_ENCODING).unwrap(), token.as_str());
        assert_eq!(fixture.counter("compressed"), 1);
        assert_eq!(fixture.counter("total_uncompressed_bytes"), TEST_DATA_LEN as u64);
        assert_eq!(fixture.counter("total_compressed_bytes"), output.len() as u64);
        assert_eq!(fixture.encoders_created(), 1);
        assert_eq!(decode(&token, &output), body);
    }
}

#[test]
fn runtime_flag_disables_compression() {
    let fixture = Fixture::gzip(|c| c.content_types = Some(vec!["application/json".to_string()]));
    fixture.runtime.set(DEFAULT_RUNTIME_KEY, false);

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    let mut filter = fixture.start("gzip", &mut headers);

    let body = text_data(4096);
    let output = feed(&mut filter, &body, 1024);

    assert_eq!(output, body);
    assert!(headers.get(header::CONTENT_ENCODING).is_none());
    assert_eq!(fixture.counter("not_compressed"), 1);
    assert_eq!(fixture.encoders_created(), 0);

    // The flag is read per stream.
    fixture.runtime.clear(DEFAULT_RUNTIME_KEY);
    let mut headers = HeaderMap::new();
    let _filter = fixture.start("gzip", &mut headers);
    assert_eq!(headers.get(header::CONTENT_ENCODING).unwrap(), "gzip");
}

#[test]
fn round_trip_across_chunkings() {
    let body = random_data(TEST_DATA_LEN, 42);
    let chunk_sizes = [TEST_DATA_LEN, 16_384, 8192, 4096, 1024];

    let backends = [
        BackendConfig::Gzip(GzipSettings::default()),
        BackendConfig::Gzip(GzipSettings {
            level: GzipLevel::Best,
            strategy: GzipStrategy::Filtered,
            window_bits: 15,
            memory_level: 9,
            format: GzipFormat::Gzip,
        }),
        BackendConfig::Gzip(GzipSettings {
            level: GzipLevel::Fastest,
            window_bits: 9,
            memory_level: 1,
            format: GzipFormat::Zlib,
            ..Default::default()
        }),
        BackendConfig::Zstd(ZstdSettings::default()),
        BackendConfig::Zstd(ZstdSettings {
            level: 19,
            strategy: 9,
            enable_checksum: true,
            dictionary: None,
        }),
    ];

    for backend in backends {
        for chunk_size in chunk_sizes {
            let fixture = Fixture::new(backend.clone(), |_| {});
            let token = fixture.token().to_string();
            let mut filter = fixture.start(&token, &mut HeaderMap::new());

            let output = feed(&mut filter, &body, chunk_size);
            assert_eq!(
                decode(&token, &output),
                body,
                "{token} with {chunk_size}-byte chunks"
            );
            assert_eq!(filter.total_uncompressed_bytes(), TEST_DATA_LEN as u64);
            assert_eq!(filter.total_compressed_bytes(), output.len() as u64);
        }
    }
}

#[test]
fn deflate_settings_reach_the_stream() {
    let run = |settings: &str, body: &[u8]| {
        let backend: BackendConfig = serde_json::from_str(settings).unwrap();
        let fixture = Fixture::new(backend, |_| {});
        let token = fixture.token().to_string();
        let mut filter = fixture.start(&token, &mut HeaderMap::new());
        let output = feed(&mut filter, body, 8192);
        assert_eq!(decode(&token, &output), body);
        output
    };

    let text = text_data(60_000);
    let default = run(r#"{"type": "gzip"}"#, &text);
    let huffman = run(r#"{"type": "gzip", "strategy": "huffman_only"}"#, &text);
    assert!(huffman.len() > default.len() * 10);

    // Varied records so the literal buffer size shapes the blocks.
    let records: Vec<u8> = (0..3000)
        .flat_map(|i| format!("{{\"id\":{i},\"value\":{}}}\n", i * 7919 % 10007).into_bytes())
        .collect();
    let small_memory = run(r#"{"type": "gzip", "memory_level": 1}"#, &records);
    let large_memory = run(r#"{"type": "gzip", "memory_level": 9}"#, &records);
    assert_ne!(small_memory, large_memory);

    let zlib = run(r#"{"type": "gzip", "format": "zlib", "window_bits": 11}"#, &text);
    assert_eq!(zlib[0], 0x38);
}

#[test]
fn compressible_body_shrinks() {
    let fixture = Fixture::zstd(|_| {});
    let mut filter = fixture.start("zstd", &mut HeaderMap::new());
    let body = text_data(TEST_DATA_LEN);

    let output = feed(&mut filter, &body, 8192);

    assert!(output.len() < body.len() / 10);
    assert_eq!(decode("zstd", &output), body);
}

#[test]
fn no_double_compression() {
    let fixture = Fixture::gzip(|_| {});
    let body = text_data(8192);

    let mut first_headers = HeaderMap::new();
    let mut first = fixture.start("gzip", &mut first_headers);
    let compressed = feed(&mut first, &body, 2048);

    // A second hop sees the already encoded response.
    let mut second_headers = first_headers.clone();
    let mut second = fixture.start("gzip", &mut second_headers);
    let output = feed(&mut second, &compressed, 2048);

    assert_eq!(output, compressed);
    assert_eq!(second_headers.get_all(header::CONTENT_ENCODING).iter().count(), 1);
    assert_eq!(fixture.counter("compressed"), 1);
    assert_eq!(fixture.counter("not_compressed"), 1);
    assert_eq!(decode("gzip", &output), body);
}

#[test]
fn byte_totals_accumulate_across_streams() {
    let fixture = Fixture::gzip(|_| {});
    let mut emitted = 0;

    for seed in 0..4 {
        let mut filter = fixture.start("gzip", &mut HeaderMap::new());
        let output = feed(&mut filter, &random_data(10_000, seed), 3000);
        emitted += output.len() as u64;
    }

    assert_eq!(fixture.counter("compressed"), 4);
    assert_eq!(fixture.counter("total_uncompressed_bytes"), 40_000);
    assert_eq!(fixture.counter("total_compressed_bytes"), emitted);
    assert_eq!(fixture.encoders_created(), 4);
}

#[test]
fn wildcard_accept_and_rejections() {
    let fixture = Fixture::zstd(|_| {});

    let cases = [
        ("*", true),
        ("gzip, *;q=0.5", true),
        ("zstd;q=0", false),
        ("*, zstd;q=0", false),
        ("gzip, br", false),
        ("ZSTD", true),
    ];

    for (accept, expected) in cases {
        let mut headers = HeaderMap::new();
        let filter = fixture.start(accept, &mut headers);
        assert_eq!(filter.is_compressing(), expected, "accept-encoding: {accept}");
    }
}

#[test]
fn concurrent_streams_share_config() {
    let fixture = Fixture::gzip(|_| {});
    let body = Arc::new(text_data(32_768));

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let body = body.clone();
            let config = fixture.config.clone();
            scope.spawn(move || {
                let mut filter = CompressorFilter::new(config);
                let mut request = HeaderMap::new();
                request.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
                filter.on_request_headers(&request);
                filter.on_response_headers(&mut HeaderMap::new(), false);

                let output = feed(&mut filter, &body, 4096);
                assert_eq!(decode("gzip", &output), *body);
            });
        }
    });

    assert_eq!(fixture.counter("compressed"), 8);
    assert_eq!(fixture.counter("total_uncompressed_bytes"), 8 * 32_768);
}

#[test]
fn encoder_output_is_appended_in_order() {
    let factory = BackendConfig::Gzip(GzipSettings::default()).build().unwrap();
    let mut encoder = factory.create_encoder().unwrap();
    let mut output = BytesMut::new();

    encoder.encode(b"first ", FlushMode::Sync, &mut output).unwrap();
    let prefix = output.len();
    encoder.encode(b"second", FlushMode::Finish, &mut output).unwrap();

    assert!(output.len() > prefix);
    assert_eq!(decode("gzip", &output), b"first second");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn chunks_decode_in_order(
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..2048), 1..16),
        use_zstd in any::<bool>(),
        flush_each_chunk in any::<bool>(),
    ) {
        let configure = |c: &mut CompressorConfig| c.flush_each_chunk = flush_each_chunk;
        let fixture = if use_zstd { Fixture::zstd(configure) } else { Fixture::gzip(configure) };
        let token = fixture.token().to_string();
        let mut filter = fixture.start(&token, &mut HeaderMap::new());

        let mut output = Vec::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let mut data = Bytes::copy_from_slice(chunk);
            filter.encode_data(&mut data, i + 1 == chunks.len()).unwrap();
            output.extend_from_slice(&data);
        }

        let expected: Vec<u8> = chunks.concat();
        prop_assert_eq!(decode(&token, &output), expected.clone());
        prop_assert_eq!(fixture.counter("total_uncompressed_bytes"), expected.len() as u64);
        prop_assert_eq!(fixture.counter("total_compressed_bytes"), output.len() as u64);
    }
}
