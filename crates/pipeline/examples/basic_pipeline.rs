//! A three-stage word-count pipeline: split a block of text into words,
//! normalize casing, then count occurrences.

use stagepipe::{Pipeline, Stage};
use std::collections::HashMap;

fn main() {
    tracing_subscriber::fmt::init();

    let text = "the quick brown fox the lazy dog the fox ran";

    let words: Stage<(), String> = Stage::producer("split_words", move || {
        text.split_whitespace()
            .map(|w| Ok(w.to_string()))
            .collect::<Vec<_>>()
            .into_iter()
    });

    let lowercase = Stage::transform("lowercase", |seq: stagepipe::InputSequence<String>| {
        seq.map(|w| Ok(w.to_lowercase()))
    })
    .workers(2);

    let counted = Stage::transform(
        "count",
        |seq: stagepipe::InputSequence<String>| {
            let mut counts: HashMap<String, usize> = HashMap::new();
            for word in seq {
                *counts.entry(word).or_insert(0) += 1;
            }
            std::iter::once(Ok(counts))
        },
    );

    let pipeline = Pipeline::from_producer(words).pipe(lowercase).pipe(counted);

    match pipeline.execute() {
        Ok(counts) => {
            let mut pairs: Vec<_> = counts.into_iter().collect();
            pairs.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            for (word, count) in pairs {
                println!("{word}: {count}");
            }
        }
        Err(err) => eprintln!("pipeline failed: {err}"),
    }
}
