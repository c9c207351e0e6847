use criterion::{Criterion, black_box, criterion_group, criterion_main};
use groundrag_core::brain::parse_structured;
use groundrag_core::config::{RetrievalConfig, SplitterConfig};
use groundrag_core::embeddings::LocalEmbedder;
use groundrag_core::prompts::{GENERATOR, REFUSAL_SENTENCE};
use groundrag_core::splitter::{Document, Splitter, TokenSplitter};
use groundrag_core::{HybridIndex, Passage, PassageMetadata};
use std::sync::Arc;

const PARAGRAPH: &str = "Scope 3 emissions are all indirect emissions, not included in scope 2, \
that occur in the value chain of the reporting company, including both upstream and downstream \
emissions. They often represent the majority of a company's total greenhouse gas footprint.";

fn bench_splitter(c: &mut Criterion) {
    let splitter = TokenSplitter::new(&SplitterConfig::default()).unwrap();
    let text = [PARAGRAPH; 200].join("\n\n");
    let document = Document::new("report.md", text);

    c.bench_function("split_long_document", |b| {
        b.iter(|| splitter.split(black_box(&document)))
    });
}

fn bench_hybrid_search(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let index = HybridIndex::new(Arc::new(LocalEmbedder::new(256)), &RetrievalConfig::default())
        .unwrap();
    let passages = (0..1_000)
        .map(|i| {
            Passage::new(
                format!("doc{}.md#{}", i / 10, i % 10),
                format!("{PARAGRAPH} Section {i} covers supplier number {i}."),
                PassageMetadata {
                    document_id: format!("doc{}.md", i / 10),
                    position: i % 10,
                },
            )
        })
        .collect();
    runtime.block_on(index.add_passages(passages)).unwrap();

    c.bench_function("hybrid_search_1k_passages", |b| {
        b.iter(|| {
            runtime
                .block_on(index.search_scored(black_box("value chain emissions supplier"), 14))
                .unwrap()
        })
    });
}

fn bench_prompts(c: &mut Criterion) {
    let documents = format!("<doc id=\"p1\">\n{PARAGRAPH}\n</doc>\n").repeat(14);

    c.bench_function("render_generator_prompt", |b| {
        b.iter(|| {
            GENERATOR.render(black_box(&[
                ("refusal", REFUSAL_SENTENCE),
                ("documents", &documents),
                ("question", "What is Scope 3?"),
            ]))
        })
    });

    let fenced = "Here you go:\n```json\n{\"relevant\": true, \"rationale\": \"mentions scope 3\"}\n```";
    c.bench_function("parse_fenced_json", |b| {
        b.iter(|| parse_structured(black_box(fenced)))
    });
}

criterion_group!(benches, bench_splitter, bench_hybrid_search, bench_prompts);
criterion_main!(benches);
