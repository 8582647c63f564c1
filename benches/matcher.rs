//! Benchmarks for the match engine.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use jsgf::{ExpansionTree, Grammar, Rule};

fn command_grammar() -> Grammar {
    let mut grammar = Grammar::new("commands").unwrap();
    grammar
        .add_rule(
            Rule::private(
                "thing",
                ExpansionTree::alternative_set(vec![
                    ExpansionTree::literal("door"),
                    ExpansionTree::literal("window"),
                    ExpansionTree::literal("garage"),
                    ExpansionTree::literal("front gate"),
                ]),
            )
            .unwrap(),
        )
        .unwrap();
    grammar
        .add_rule(
            Rule::public(
                "command",
                ExpansionTree::sequence(vec![
                    ExpansionTree::optional(ExpansionTree::literal("please")),
                    ExpansionTree::alternative_set(vec![
                        ExpansionTree::literal("open"),
                        ExpansionTree::literal("close"),
                    ]),
                    ExpansionTree::repeat(ExpansionTree::named_rule_ref("thing")),
                ]),
            )
            .unwrap(),
        )
        .unwrap();
    grammar
}

fn bench_find_matching_rules(c: &mut Criterion) {
    let grammar = command_grammar();
    c.bench_function("find_matching_rules", |bench| {
        bench.iter(|| {
            black_box(
                grammar
                    .find_matching_rules(black_box("please open front gate door"))
                    .unwrap(),
            )
        })
    });
}

fn bench_repeat_backtracking(c: &mut Criterion) {
    let rule = Rule::public(
        "r",
        ExpansionTree::sequence(vec![
            ExpansionTree::repeat(ExpansionTree::literal("a")),
            ExpansionTree::literal("a b"),
        ]),
    )
    .unwrap();
    let speech = "a ".repeat(30) + "b";
    c.bench_function("repeat_backtracking_30", |bench| {
        bench.iter(|| black_box(rule.matches(black_box(&speech)).unwrap()))
    });
}

fn bench_dictation_anchor(c: &mut Criterion) {
    let rule = Rule::public(
        "r",
        ExpansionTree::sequence(vec![
            ExpansionTree::literal("call"),
            ExpansionTree::dictation(),
            ExpansionTree::literal("now"),
        ]),
    )
    .unwrap();
    let mut speech = String::from("call");
    for _ in 0..40 {
        speech.push_str(" word");
    }
    speech.push_str(" now");
    c.bench_function("dictation_anchor_40", |bench| {
        bench.iter(|| black_box(rule.matches(black_box(&speech)).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_find_matching_rules,
    bench_repeat_backtracking,
    bench_dictation_anchor
);
criterion_main!(benches);
