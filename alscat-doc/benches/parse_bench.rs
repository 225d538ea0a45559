// Benchmark codec and heuristic parsing throughput on synthetic sets.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use alscat_doc::{DEFAULT_MAX_DECOMPRESSED, DocumentParser, HeuristicParser, decode, encode};

fn generate_set(tracks: usize) -> String {
    use std::fmt::Write;
    let mut src = String::from("<Ableton><LiveSet><Tracks>");
    for i in 0..tracks {
        let _ = write!(
            src,
            "<AudioTrack Id=\"{i}\"><DeviceChain><Device DeviceName=\"Eq Eight\" />\
             <Device PluginName=\"Comp {i}\" /><AudioClip Time=\"{i}\">\
             <Path Value=\"/Samples/loop_{i}.wav\" /><Ram Value=\"false\" /></AudioClip>\
             </DeviceChain></AudioTrack>"
        );
    }
    src.push_str("</Tracks><Tempo Value=\"124\" /></LiveSet></Ableton>");
    src
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("heuristic_parse");
    for tracks in [10, 100, 1000] {
        let text = generate_set(tracks);
        group.bench_with_input(BenchmarkId::new("tracks", tracks), &text, |b, text| {
            b.iter(|| HeuristicParser.parse(text));
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec_decode");
    for tracks in [100, 1000] {
        let bytes = encode(&generate_set(tracks)).unwrap();
        group.bench_with_input(BenchmarkId::new("tracks", tracks), &bytes, |b, bytes| {
            b.iter(|| decode(bytes, DEFAULT_MAX_DECOMPRESSED).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse, bench_decode);
criterion_main!(benches);
