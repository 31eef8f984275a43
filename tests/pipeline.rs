use chat_speaker::filter::{apply_exclusions, MarkerPairSet, RuleSet, TextFilter};
use chat_speaker::{filter_for_speech, ExclusionRule, SpeakDecision};

fn speak(text: &str) -> SpeakDecision {
    SpeakDecision::Speak { text: text.into() }
}

#[test]
fn no_rules_no_markers_only_tidies() {
    let raw = "  line one\n\n\n\nline two  ";
    assert_eq!(
        filter_for_speech(raw, &[], "", ""),
        speak("line one\n\nline two")
    );
}

#[test]
fn exclusions_apply_left_to_right() {
    let forward = [ExclusionRule::new("a", "XY"), ExclusionRule::new("b", "Y")];
    assert_eq!(apply_exclusions("aXYb", &forward), "ab");

    let reversed = [ExclusionRule::new("b", "Y"), ExclusionRule::new("a", "XY")];
    assert_eq!(apply_exclusions("aXYb", &reversed), "aXb");
}

#[test]
fn same_delimiter_pairs_toggle() {
    assert_eq!(filter_for_speech(r#"A"one"B"two"C"#, &[], "\"", "\""), speak("one two"));
}

#[test]
fn unterminated_same_delimiter_span_is_silent() {
    assert_eq!(
        filter_for_speech(r#"A"onlyone"#, &[], "\"", "\""),
        SpeakDecision::Silent
    );
}

#[test]
fn different_delimiters_capture_between() {
    assert_eq!(
        filter_for_speech("he said (hello) then (world)", &[], "(", ")"),
        speak("hello world")
    );
}

#[test]
fn pairs_pool_in_declaration_order() {
    assert_eq!(filter_for_speech("[b] and (a)", &[], "(,[", "),]"), speak("a b"));
}

#[test]
fn markers_without_match_speak_nothing() {
    assert_eq!(
        filter_for_speech("no parens here", &[], "(", ")"),
        SpeakDecision::Silent
    );
}

#[test]
fn marker_tokens_are_literal() {
    assert_eq!(filter_for_speech("a.b.c", &[], ".", "."), speak("b"));
    assert_eq!(filter_for_speech("x.*y*.z", &[], ".*", "*."), speak("y"));
}

#[test]
fn exclusions_run_before_markers() {
    let rules = [ExclusionRule::new("ooc", r"\(OOC:[^)]*\)")];
    assert_eq!(
        filter_for_speech("(OOC: brb) “Welcome back.”", &rules, "“", "”"),
        speak("Welcome back.")
    );
}

#[test]
fn message_emptied_by_rules_is_silent() {
    let rules = [ExclusionRule::new("all", "(?s).*")];
    assert_eq!(filter_for_speech("anything", &rules, "", ""), SpeakDecision::Silent);
}

#[test]
fn mismatched_marker_lists_use_shorter_length() {
    let markers = MarkerPairSet::parse("(, [", ")");
    assert_eq!(markers.pairs().count(), 1);
    assert_eq!(
        filter_for_speech("(a) [b]", &[], "(, [", ")"),
        speak("a")
    );
}

#[test]
fn compiled_filter_agrees_with_one_shot_call() {
    let rules = vec![
        ExclusionRule::new("stars", r"\*[^*]*\*"),
        ExclusionRule::new("tags", r"<[^>]+>").disabled(),
    ];
    let filter = TextFilter::new(RuleSet::from_rules(rules.clone()), MarkerPairSet::parse("“", "”"));

    for text in [
        "*nods* “Sure.” <b>",
        "nothing quoted",
        "“one” *two* “three”",
        "",
    ] {
        assert_eq!(filter.decide(text), filter_for_speech(text, &rules, "“", "”"), "{text}");
    }
}

#[test]
fn decision_serializes_as_tagged_object() {
    let speak = serde_json::to_value(speak("hi")).unwrap();
    assert_eq!(speak, serde_json::json!({"kind": "speak", "text": "hi"}));
    let silent = serde_json::to_value(SpeakDecision::Silent).unwrap();
    assert_eq!(silent, serde_json::json!({"kind": "silent"}));
}
