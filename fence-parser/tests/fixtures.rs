use pretty_assertions::assert_eq;
use serde_json::Value;

use fence_parser::{parse_blocks, TrailingPolicy};

#[test]
fn fixtures_match_expected_blocks() {
    let cases = [
        (
            "rating-with-chatter",
            include_str!("fixtures/replies/rating-with-chatter.txt"),
            include_str!("fixtures/expected/rating-with-chatter.json"),
        ),
        (
            "two-blocks-inline-ticks",
            include_str!("fixtures/replies/two-blocks-inline-ticks.txt"),
            include_str!("fixtures/expected/two-blocks-inline-ticks.json"),
        ),
        (
            "no-fence",
            include_str!("fixtures/replies/no-fence.txt"),
            include_str!("fixtures/expected/no-fence.json"),
        ),
        (
            "unterminated",
            include_str!("fixtures/replies/unterminated.txt"),
            include_str!("fixtures/expected/unterminated.json"),
        ),
    ];

    for (name, reply, expected) in cases {
        let actual =
            serde_json::to_value(parse_blocks(reply, TrailingPolicy::Flush)).expect("serialize");
        let expected: Value = serde_json::from_str(expected).expect("expected json");
        assert_eq!(actual, expected, "fixture mismatch: {name}");
    }
}

#[test]
fn discard_policy_drops_unterminated_tail() {
    let blocks = parse_blocks(
        include_str!("fixtures/replies/unterminated.txt"),
        TrailingPolicy::Discard,
    );
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].body, "-2\nThe figures contradict each other");
}
