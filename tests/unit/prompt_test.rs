//! Unit tests for prompt composition under the encoded-length budget

use artgen_orchestrator::models::{StyleMetadata, StyleSelection};
use artgen_orchestrator::prompt::{compose, encoded_len, PromptBudget, PromptParts, TruncationStep};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn budget(max: usize) -> PromptBudget {
    PromptBudget {
        max_encoded_len: max,
        overhead_margin: 5,
        hard_limit_ratio: 0.8,
        style_field_max_chars: 200,
        style_collapse_threshold: 20,
    }
}

fn ink_style(description_len: usize) -> StyleSelection {
    StyleSelection {
        name: "Ink".to_string(),
        metadata: Some(StyleMetadata {
            description: Some("d".repeat(description_len)),
            ..Default::default()
        }),
    }
}

fn parts(base: &str, style: StyleSelection, place_len: usize, negative_len: usize) -> PromptParts {
    PromptParts {
        base: base.to_string(),
        style,
        place: Some("p".repeat(place_len)),
        negative: Some("n".repeat(negative_len)),
    }
}

#[test]
fn test_collapse_alone_is_enough() {
    let composed = compose(&parts("fox", ink_style(150), 10, 10), &budget(200));
    assert_eq!(composed.steps, vec![TruncationStep::CollapseStyle]);
    assert!(composed.truncated);
    assert!(composed.text.contains("Ink style"));
    assert!(composed.text.contains(&"p".repeat(10)));
    assert!(composed.text.contains(&"n".repeat(10)));
}

#[test]
fn test_place_dropped_after_collapse() {
    let composed = compose(&parts("fox", ink_style(150), 150, 10), &budget(200));
    assert_eq!(
        composed.steps,
        vec![TruncationStep::CollapseStyle, TruncationStep::DropPlace]
    );
    assert!(!composed.text.contains("set in"));
    assert!(composed.text.contains("avoiding"));
}

#[test]
fn test_negative_dropped_after_place() {
    let composed = compose(&parts("fox", ink_style(150), 150, 170), &budget(200));
    assert_eq!(
        composed.steps,
        vec![
            TruncationStep::CollapseStyle,
            TruncationStep::DropPlace,
            TruncationStep::DropNegative
        ]
    );
    assert_eq!(composed.text, "fox, Ink style");
}

#[test]
fn test_base_truncated_last() {
    let base = vec!["abcd"; 60].join(" ");
    let composed = compose(&parts(&base, ink_style(150), 150, 170), &budget(200));
    assert_eq!(
        composed.steps,
        vec![
            TruncationStep::CollapseStyle,
            TruncationStep::DropPlace,
            TruncationStep::DropNegative,
            TruncationStep::TruncateBase
        ]
    );
    let expected_base = format!("{}...", vec!["abcd"; 25].join(" "));
    assert_eq!(composed.text, format!("{}, Ink style", expected_base));
    assert!(encoded_len(&composed.text) <= 200);
}

#[test]
fn test_plain_style_is_never_collapsed() {
    let composed = compose(
        &parts("fox", StyleSelection::named("Ink"), 200, 10),
        &budget(200),
    );
    assert_eq!(composed.steps, vec![TruncationStep::DropPlace]);
}

#[test]
fn test_budget_never_exceeded() {
    let alphabet: Vec<char> = "abc xyz,.-é漢🙂 \t".chars().collect();
    let mut rng = StdRng::seed_from_u64(7);
    let random_text = |rng: &mut StdRng, max_len: usize| -> String {
        let len = rng.gen_range(0..max_len);
        (0..len)
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
            .collect()
    };

    for _ in 0..300 {
        let max = rng.gen_range(30..600);
        let parts = PromptParts {
            base: format!("a{}", random_text(&mut rng, 400)),
            style: StyleSelection {
                name: random_text(&mut rng, 30),
                metadata: rng.gen_bool(0.5).then(|| StyleMetadata {
                    description: Some(random_text(&mut rng, 300)),
                    keywords: Some(random_text(&mut rng, 100)),
                    inspiration: None,
                    characteristics: Some(random_text(&mut rng, 100)),
                }),
            },
            place: Some(random_text(&mut rng, 80)),
            negative: Some(random_text(&mut rng, 80)),
        };
        let composed = compose(&parts, &budget(max));
        assert!(
            encoded_len(&composed.text) <= max,
            "encoded length {} exceeds {}",
            encoded_len(&composed.text),
            max
        );
        assert_eq!(composed.truncated, !composed.steps.is_empty());
    }
}
