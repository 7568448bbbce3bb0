use super::*;

fn config(chunk_size: usize, overlap: usize) -> ChunkingConfig {
    ChunkingConfig {
        chunk_size,
        overlap,
    }
}

fn long_text() -> String {
    (0..40)
        .map(|i| format!("Sentence number {i} talks about content strategy."))
        .collect::<Vec<_>>()
        .join(" ")
}

#[test]
fn short_text_is_single_identical_chunk() {
    let texts = [
        "One sentence only.",
        "  padded text with no punctuation  ",
        "First. Second! Third?",
    ];
    for text in texts {
        let chunks = chunk_text(text, &config(100, 0));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, text);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].total, 1);
    }
}

#[test]
fn text_exactly_at_limit_is_not_split() {
    let text = "a".repeat(50);
    let chunks = chunk_text(&text, &config(50, 0));
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, text);
}

#[test]
fn empty_text_produces_no_chunks() {
    assert!(chunk_text("", &ChunkingConfig::default()).is_empty());
    assert!(chunk_text(" \n\t ", &ChunkingConfig::default()).is_empty());
}

#[test]
fn chunks_never_exceed_limit() {
    let text = long_text();
    for size in [60, 100, 250] {
        let chunks = chunk_text(&text, &config(size, 0));
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(
                chunk.text.chars().count() <= size,
                "chunk of {} chars exceeds {}",
                chunk.text.chars().count(),
                size
            );
        }
    }
}

#[test]
fn chunks_preserve_all_sentences_in_order() {
    let text = long_text();
    let chunks = chunk_text(&text, &config(120, 0));
    let rejoined = chunks
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    assert_eq!(rejoined, text);

    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.index, i);
        assert_eq!(chunk.total, chunks.len());
    }
}

#[test]
fn oversized_sentence_is_emitted_as_is() {
    let giant = format!("{}.", "word ".repeat(40).trim_end());
    let text = format!("Short intro. {giant} Short outro.");
    let chunks = chunk_text(&text, &config(60, 0));

    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0].text, "Short intro.");
    assert_eq!(chunks[1].text, giant);
    assert_eq!(chunks[2].text, "Short outro.");
}

#[test]
fn no_split_inside_abbreviation_without_whitespace() {
    let sentences = split_sentences("Version 1.5 shipped. Next is 2.0! Done?");
    assert_eq!(sentences, vec!["Version 1.5 shipped.", "Next is 2.0!", "Done?"]);
}

#[test]
fn cjk_punctuation_splits_without_whitespace() {
    let sentences = split_sentences("今天发布新内容。明天复盘数据！效果如何？");
    assert_eq!(sentences, vec!["今天发布新内容。", "明天复盘数据！", "效果如何？"]);

    let text = "今天发布新内容。明天复盘数据！效果如何？".repeat(3);
    let chunks = chunk_text(&text, &config(20, 0));
    assert!(chunks.len() > 1);
    for chunk in &chunks {
        assert!(!chunk.text.contains(' '));
        assert!(chunk.text.chars().count() <= 20);
    }
}

#[test]
fn overlap_repeats_trailing_sentences() {
    let text = "Alpha one. Bravo two. Charlie three. Delta four. Echo five.";
    let chunks = chunk_text(text, &config(30, 12));

    // "Charlie three." is longer than the overlap budget, so it is not carried
    assert_eq!(
        chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>(),
        vec![
            "Alpha one. Bravo two.",
            "Bravo two. Charlie three.",
            "Delta four. Echo five."
        ]
    );
    for chunk in &chunks {
        assert!(chunk.text.chars().count() <= 30);
    }
}

#[test]
fn zero_overlap_keeps_chunks_disjoint() {
    let text = "Alpha one. Bravo two. Charlie three. Delta four. Echo five.";
    let chunks = chunk_text(text, &config(30, 0));
    assert_eq!(
        chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>(),
        vec!["Alpha one. Bravo two.", "Charlie three. Delta four.", "Echo five."]
    );
}
