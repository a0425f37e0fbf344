//! Benchmarks for stream filters, object encryption and document reading
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pdf_engine::crypto::PDFCryptoEngine;
use pdf_engine::pdf::{Dictionary, FilterRegistry, ObjectId, PDFReader, PDFWriter, ReaderOptions, Stream};
use pdf_engine::EncryptionAlgorithm;

const SIZES: [usize; 3] = [4 * 1024, 64 * 1024, 1024 * 1024];

/// Repeating text, compresses well
fn text_bytes(size: usize) -> Vec<u8> {
    b"BT /F1 12 Tf 72 712 Td (The quick brown fox) Tj ET\n"
        .iter()
        .copied()
        .cycle()
        .take(size)
        .collect()
}

/// Pseudo-random bytes from a fixed seed
fn noise_bytes(size: usize) -> Vec<u8> {
    let mut seed: u64 = 42;
    (0..size)
        .map(|_| {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as u8
        })
        .collect()
}

fn bench_filters(c: &mut Criterion) {
    let registry = FilterRegistry::standard();
    let dict = Dictionary::new();

    for filter in ["FlateDecode", "LZWDecode", "ASCII85Decode", "ASCIIHexDecode", "RunLengthDecode"] {
        let mut group = c.benchmark_group(filter);
        for size in SIZES {
            let plain = text_bytes(size);
            let encoded = registry
                .encode(filter.as_bytes(), None, &plain, &dict)
                .expect("encode");
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(BenchmarkId::new("encode", size), &plain, |b, data| {
                b.iter(|| registry.encode(filter.as_bytes(), None, black_box(data), &dict))
            });
            group.bench_with_input(BenchmarkId::new("decode", size), &encoded, |b, data| {
                b.iter(|| registry.decode(filter.as_bytes(), None, black_box(data), &dict))
            });
        }
        group.finish();
    }
}

fn bench_encryption(c: &mut Criterion) {
    let id = ObjectId::new(12, 0);
    for (algorithm, key_len) in [
        (EncryptionAlgorithm::RC4_128, 16),
        (EncryptionAlgorithm::AES_128, 16),
        (EncryptionAlgorithm::AES_256, 32),
    ] {
        let engine = PDFCryptoEngine::new(algorithm, &vec![7u8; key_len]).expect("engine");
        let mut group = c.benchmark_group(format!("encrypt_{}", algorithm));
        for size in SIZES {
            let data = noise_bytes(size);
            let encrypted = engine.encrypt_bytes(id, &data).expect("encrypt");
            group.throughput(Throughput::Bytes(size as u64));
            group.bench_with_input(BenchmarkId::new("encrypt", size), &data, |b, data| {
                b.iter(|| engine.encrypt_bytes(id, black_box(data)))
            });
            group.bench_with_input(BenchmarkId::new("decrypt", size), &encrypted, |b, data| {
                b.iter(|| engine.decrypt_bytes(id, black_box(data)))
            });
        }
        group.finish();
    }
}

fn bench_document(c: &mut Criterion) {
    let mut writer = PDFWriter::default();
    for _ in 0..200 {
        let mut content = Stream::new(Dictionary::new(), text_bytes(2048));
        content.dict.set("Filter", pdf_engine::pdf::PDFValue::name("FlateDecode"));
        let content = writer.add(content);
        let mut page = Dictionary::with_type("Page");
        page.set_reference("Contents", content);
        writer.add_page(page);
    }
    let document = writer.write_to(Vec::new()).expect("write");

    let mut group = c.benchmark_group("document");
    group.throughput(Throughput::Bytes(document.len() as u64));
    group.bench_function("open_and_walk_pages", |b| {
        b.iter(|| {
            let mut reader =
                PDFReader::from_bytes(black_box(document.clone()), ReaderOptions::default()).expect("open");
            reader.page_count().expect("pages")
        })
    });
    group.finish();
}

criterion_group!(benches, bench_filters, bench_encryption, bench_document);
criterion_main!(benches);
