use chapter_splitter::chapters::{chapters_from_description, parse_timestamp};
use chapter_splitter::sanitize_filename;
use chapter_splitter::SourceRef;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn long_description(chapters: usize) -> String {
    let mut description = String::from("Thanks for watching! Links below.\n\n");
    for i in 0..chapters {
        let seconds = i * 95;
        description.push_str(&format!(
            "{}:{:02}:{:02} - Section {}: setup | details\n",
            seconds / 3600,
            (seconds / 60) % 60,
            seconds % 60,
            i + 1
        ));
        description.push_str("Some commentary without a timestamp.\n");
    }
    description
}

fn bench_description_parsing(c: &mut Criterion) {
    let short = "0:00 Intro\n1:05 Setup\n4:30 Main part\n12:00 Q&A";
    c.bench_function("chapters_short_description", |b| {
        b.iter(|| black_box(chapters_from_description(black_box(short), 900.0)))
    });

    let long = long_description(120);
    c.bench_function("chapters_long_description", |b| {
        b.iter(|| black_box(chapters_from_description(black_box(&long), 12_000.0)))
    });

    c.bench_function("parse_timestamp", |b| {
        b.iter(|| {
            black_box(parse_timestamp("1:05"));
            black_box(parse_timestamp("1:02:03"));
            black_box(parse_timestamp("not a time"));
        })
    });
}

fn bench_names_and_sources(c: &mut Criterion) {
    c.bench_function("sanitize_filename", |b| {
        b.iter(|| {
            black_box(sanitize_filename("Q&A: what's \"next\"? <part 1/2>"));
            black_box(sanitize_filename("Plain chapter title"));
        })
    });

    c.bench_function("source_ref_parse", |b| {
        b.iter(|| {
            black_box(SourceRef::parse("https://www.youtube.com/watch?v=AAAAAAAAAAA&t=42s").is_ok());
            black_box(SourceRef::parse("https://example.com/nope").is_err());
        })
    });
}

criterion_group!(benches, bench_description_parsing, bench_names_and_sources);
criterion_main!(benches);
