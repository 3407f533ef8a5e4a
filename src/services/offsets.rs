//! Reconciles model-proposed character offsets against the literal answer
//! text. Models routinely count tokens or words instead of characters, so a
//! literal `quote` anchor, when present and found, always wins over the
//! numeric offsets.

/// Maximum distance (in characters) between the proposed start and the chosen
/// quote occurrence before a warning is logged. The quote still wins.
const QUOTE_DISTANCE_TOLERANCE: usize = 300;

#[derive(Debug, Clone, Default)]
pub(crate) struct ProposedSpan {
    pub(crate) start_index: Option<f64>,
    pub(crate) end_index: Option<f64>,
    pub(crate) quote: Option<String>,
}

/// Character offsets into the answer text, `start < end <= chars(text)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Span {
    pub(crate) start_index: usize,
    pub(crate) end_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reconciliation {
    /// A quote occurrence anchored the span; numeric offsets were overridden.
    QuoteAnchored(Span),
    /// No quote was supplied; the clamped numeric offsets stand.
    Numeric(Span),
    /// A quote was supplied but does not occur in the text. The clamped
    /// numeric offsets are carried so callers can decide whether to trust
    /// them.
    QuoteNotFound(Span),
    /// The span was empty or inverted after all adjustments.
    Rejected,
}

impl Reconciliation {
    pub(crate) fn span(self) -> Option<Span> {
        match self {
            Self::QuoteAnchored(span) | Self::Numeric(span) | Self::QuoteNotFound(span) => {
                Some(span)
            }
            Self::Rejected => None,
        }
    }
}

pub(crate) fn reconcile(answer_text: &str, proposed: &ProposedSpan) -> Reconciliation {
    let char_len = answer_text.chars().count();
    let mut start = clamp_index(proposed.start_index, char_len);
    let mut end = clamp_index(proposed.end_index, char_len);

    let quote = proposed.quote.as_deref().filter(|quote| !quote.is_empty());
    let mut anchored = false;
    let mut quote_missing = false;

    if let Some(quote) = quote {
        let occurrences = quote_start_offsets(answer_text, quote);
        if let Some(matched) = closest_occurrence(&occurrences, start) {
            let distance = matched.abs_diff(start);
            if distance > QUOTE_DISTANCE_TOLERANCE {
                tracing::warn!(
                    suggested_start = start,
                    quote_start = matched,
                    tolerance = QUOTE_DISTANCE_TOLERANCE,
                    "Inline comment offsets far from quote match; anchoring to quote"
                );
            }
            start = matched;
            end = (matched + quote.chars().count()).min(char_len);
            anchored = true;
        } else {
            quote_missing = true;
        }
    }

    if end <= start {
        return Reconciliation::Rejected;
    }

    let span = Span { start_index: start, end_index: end };
    if anchored {
        Reconciliation::QuoteAnchored(span)
    } else if quote_missing {
        Reconciliation::QuoteNotFound(span)
    } else {
        Reconciliation::Numeric(span)
    }
}

fn clamp_index(value: Option<f64>, char_len: usize) -> usize {
    let value = value.unwrap_or(0.0);
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    (value as usize).min(char_len)
}

/// Character offsets of every occurrence of `quote`, including overlapping
/// ones, in ascending order.
fn quote_start_offsets(text: &str, quote: &str) -> Vec<usize> {
    let mut byte_offsets = Vec::new();
    let mut from = 0;
    while from <= text.len() {
        let Some(relative) = text[from..].find(quote) else {
            break;
        };
        let at = from + relative;
        byte_offsets.push(at);
        let step = text[at..].chars().next().map(char::len_utf8).unwrap_or(1);
        from = at + step;
    }

    let mut offsets = Vec::with_capacity(byte_offsets.len());
    let mut chars_seen = 0;
    let mut cursor = 0;
    for byte_offset in byte_offsets {
        chars_seen += text[cursor..byte_offset].chars().count();
        cursor = byte_offset;
        offsets.push(chars_seen);
    }
    offsets
}

fn closest_occurrence(occurrences: &[usize], suggested_start: usize) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    for &occurrence in occurrences {
        let distance = occurrence.abs_diff(suggested_start);
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((occurrence, distance)),
        }
    }
    best.map(|(occurrence, _)| occurrence)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proposed(start: f64, end: f64, quote: Option<&str>) -> ProposedSpan {
        ProposedSpan {
            start_index: Some(start),
            end_index: Some(end),
            quote: quote.map(|value| value.to_string()),
        }
    }

    #[test]
    fn quote_match_overrides_numeric_offsets() {
        let text = "the mitochondria is the powerhouse of the cell";
        let outcome = reconcile(text, &proposed(0.0, 3.0, Some("powerhouse")));
        let span = outcome.span().expect("span");
        assert_eq!(outcome, Reconciliation::QuoteAnchored(span));
        assert_eq!(span.start_index, text.find("powerhouse").unwrap());
        assert_eq!(span.end_index - span.start_index, "powerhouse".chars().count());
    }

    #[test]
    fn quote_match_is_deterministic_for_any_suggested_start() {
        let text = "alpha beta gamma beta delta";
        for suggested in [0.0, 3.0, 11.0, 20.0, 26.0, 1000.0] {
            let outcome = reconcile(text, &proposed(suggested, suggested + 1.0, Some("beta")));
            let span = outcome.span().expect("span");
            assert_eq!(span.end_index - span.start_index, 4);
            assert!(text.chars().skip(span.start_index).take(4).collect::<String>() == "beta");
        }
    }

    #[test]
    fn closest_occurrence_wins_with_first_on_ties() {
        // "aa" occurs at character positions 5, 40 and 41.
        let text = format!("{}aa{}aaa", "b".repeat(5), "c".repeat(33));
        let outcome = reconcile(&text, &proposed(39.0, 41.0, Some("aa")));
        assert_eq!(outcome.span().unwrap().start_index, 40);

        // Equidistant between 40 and 42 would pick the earlier one; here the
        // tie between 40 and 41 from a suggestion of 40 keeps 40.
        let outcome = reconcile(&text, &proposed(40.0, 42.0, Some("aa")));
        assert_eq!(outcome.span().unwrap().start_index, 40);

        let outcome = reconcile(&text, &proposed(4.0, 6.0, Some("aa")));
        assert_eq!(outcome.span().unwrap().start_index, 5);
    }

    #[test]
    fn numeric_offsets_are_clamped_into_text_bounds() {
        let text = "short answer";
        let len = text.chars().count();
        let outcome = reconcile(text, &proposed(-50.0, 9999.0, None));
        let span = outcome.span().expect("span");
        assert_eq!(span, Span { start_index: 0, end_index: len });

        let outcome = reconcile(text, &proposed(f64::NAN, 4.0, None));
        assert_eq!(outcome.span().unwrap().start_index, 0);
    }

    #[test]
    fn missing_indices_default_to_zero() {
        let text = "some text";
        let outcome =
            reconcile(text, &ProposedSpan { start_index: None, end_index: None, quote: None });
        assert_eq!(outcome, Reconciliation::Rejected);
    }

    #[test]
    fn quote_not_found_keeps_clamped_numerics() {
        let text = "the quick brown fox";
        let outcome = reconcile(text, &proposed(4.0, 9.0, Some("zebra")));
        assert_eq!(
            outcome,
            Reconciliation::QuoteNotFound(Span { start_index: 4, end_index: 9 })
        );
    }

    #[test]
    fn empty_or_inverted_spans_are_rejected() {
        let text = "abcdef";
        assert_eq!(reconcile(text, &proposed(3.0, 3.0, None)), Reconciliation::Rejected);
        assert_eq!(reconcile(text, &proposed(5.0, 2.0, None)), Reconciliation::Rejected);
        assert_eq!(reconcile("", &proposed(0.0, 10.0, None)), Reconciliation::Rejected);
    }

    #[test]
    fn multibyte_text_uses_character_offsets() {
        let text = "héllo wörld, héllo again";
        let outcome = reconcile(text, &proposed(0.0, 0.0, Some("héllo")));
        let span = outcome.span().expect("span");
        assert_eq!(span.start_index, 0);
        assert_eq!(span.end_index, "héllo".chars().count());

        let outcome = reconcile(text, &proposed(12.0, 13.0, Some("héllo")));
        assert_eq!(outcome.span().unwrap().start_index, 13);
    }

    #[test]
    fn far_quote_match_is_still_accepted() {
        let needle = "needle";
        let text = format!("{}{}", "x".repeat(400), needle);
        let outcome = reconcile(&text, &proposed(0.0, 6.0, Some(needle)));
        let span = outcome.span().expect("span");
        assert_eq!(span.start_index, 400);
        assert_eq!(span.end_index, 406);
    }

    #[test]
    fn overlapping_occurrences_are_all_candidates() {
        let offsets = quote_start_offsets("aaaa", "aa");
        assert_eq!(offsets, vec![0, 1, 2]);
    }
}
