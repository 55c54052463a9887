use arbor_xpath::parser::{Language, parse};
use arbor_xpath::simple_node::{attr, doc as simple_doc, elem, text};
use arbor_xpath::{DomFacade, Engine, Options, SimpleNode, SimpleTree, SuspendingTree, XdmItem};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::rc::Rc;

fn sample_queries() -> Vec<&'static str> {
    vec![
        "1 + 2 * 3",
        "string-length('Lorem ipsum dolor sit amet, consectetur adipiscing elit.')",
        "/root/section/item[@type='a'][position() < 5]/@id",
        "for $n in 1 to 100 return $n * $n",
        "if (exists(/root/section/item[@featured='true'])) then 'featured' else 'none'",
    ]
}

fn benchmark_parser(c: &mut Criterion) {
    let queries = sample_queries();
    c.bench_function("parser/parse", |b| {
        b.iter(|| {
            for q in &queries {
                let ast = parse(black_box(q), Language::XPath31).expect("parse failure");
                black_box(ast);
            }
        })
    });
}

fn build_sample_document() -> SimpleNode {
    let section = |name: &str, first: usize| {
        (first..first + 50).fold(elem("section").attr(attr("name", name)), |section, i| {
            section.child(
                elem("item")
                    .attr(attr("id", &format!("item-{i}")))
                    .attr(attr("type", if i % 2 == 0 { "a" } else { "b" }))
                    .attr(attr("featured", if i % 7 == 0 { "true" } else { "false" }))
                    .child(text(&format!("Item {i}"))),
            )
        })
    };
    simple_doc().child(elem("root").child(section("alpha", 0)).child(section("beta", 50))).build()
}

fn benchmark_evaluator(c: &mut Criterion) {
    let document = build_sample_document();
    let queries = sample_queries();
    let mut group = c.benchmark_group("evaluator");
    for (cached, label) in [(false, "uncached"), (true, "cached")] {
        let engine = Engine::<SimpleNode>::new();
        let options = Options::default().with_cache_disabled(!cached);
        group.bench_with_input(BenchmarkId::new("evaluate_xpath_to_strings", label), &queries, |b, queries| {
            b.iter(|| {
                for q in queries {
                    let context = Some(XdmItem::Node(document.clone()));
                    let out = engine.evaluate_xpath_to_strings(black_box(q), context, Rc::new(SimpleTree), &options);
                    black_box(out.expect("evaluation failure"));
                }
            })
        });
    }
    group.finish();
}

fn benchmark_suspending_facade(c: &mut Criterion) {
    let document = build_sample_document();
    let engine = Engine::<SimpleNode>::new();
    let options = Options::default();
    c.bench_function("evaluator/suspending_facade", |b| {
        b.iter(|| {
            // a fresh facade suspends again on every read
            let facade: Rc<dyn DomFacade<SimpleNode>> = Rc::new(SuspendingTree::new());
            let count = engine.evaluate_xpath_to_number(
                "count(//item[@featured = 'true'])",
                Some(XdmItem::Node(document.clone())),
                facade,
                &options,
            );
            black_box(count.expect("evaluation failure"));
        })
    });
}

fn benchmark_streaming(c: &mut Criterion) {
    let engine = Engine::<SimpleNode>::new();
    let options = Options::default();
    c.bench_function("evaluator/first_items_of_large_range", |b| {
        b.iter(|| {
            let mut stream = engine
                .evaluate_xpath_to_async_iterator("(1 to 100000000) ! (. * 2)", None, Rc::new(SimpleTree), &options)
                .expect("evaluation failure");
            futures_lite::future::block_on(async {
                for _ in 0..100 {
                    black_box(stream.next_item().await);
                }
            });
        })
    });
}

criterion_group!(
    benches,
    benchmark_parser,
    benchmark_evaluator,
    benchmark_suspending_facade,
    benchmark_streaming
);
criterion_main!(benches);
