//! Context assembly: ranked retrieval matches to a bounded, JSON-array
//! shaped text block.
//!
//! # Determinism
//!
//! Identical matches always produce identical output. Ordering is a stable
//! sort on score, so ties keep retrieval order.

use ragline_core::vector::ScoredVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One retrieved chunk, normalized for the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Native vector id, or a synthesized `C001`-style sequence id.
    pub chunk_id: String,
    pub source_file: String,
    pub section_heading: String,
    pub text: String,
    pub similarity: f32,
}

/// Output of [`ContextAssembler::build_context`].
#[derive(Debug, Clone)]
pub struct BuiltContext {
    /// Always parses as a JSON array.
    pub serialized: String,
    /// Entries present in `serialized`, best match first.
    pub entries: Vec<ContextEntry>,
    /// Trailing entries cut to respect the token budget.
    pub dropped: usize,
}

/// Approximate token count: one token per four bytes.
pub fn estimate_tokens(text: &str) -> usize {
    text.len() / 4
}

pub struct ContextAssembler {
    max_tokens: usize,
}

impl ContextAssembler {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Rank, normalize and serialize `matches`.
    ///
    /// Never fails: missing metadata becomes empty fields.
    pub fn build_context(&self, matches: &[ScoredVector]) -> BuiltContext {
        let mut ranked: Vec<&ScoredVector> = matches.iter().collect();
        ranked.sort_by(|a, b| sort_key(b.score).total_cmp(&sort_key(a.score)));

        let entries: Vec<ContextEntry> = ranked
            .into_iter()
            .enumerate()
            .map(|(i, m)| normalize(m, i))
            .collect();

        let (serialized, kept) = self.serialize(&entries);
        let dropped = entries.len() - kept;
        let mut entries = entries;
        entries.truncate(kept);

        if dropped > 0 {
            info!(
                kept,
                dropped,
                budget = self.max_tokens,
                "Context truncated to token budget"
            );
        } else {
            debug!(entries = kept, tokens = estimate_tokens(&serialized), "Context built");
        }

        BuiltContext {
            serialized,
            entries,
            dropped,
        }
    }

    /// Serialize all entries, then cut back to the last entry that ends
    /// inside the budget. Returns the text and how many entries it holds.
    fn serialize(&self, entries: &[ContextEntry]) -> (String, usize) {
        let mut out = String::from("[\n");
        // Byte offset just past each entry's closing brace
        let mut ends = Vec::with_capacity(entries.len());

        for (i, entry) in entries.iter().enumerate() {
            if i > 0 {
                out.push_str(",\n");
            }
            write_entry(&mut out, entry);
            ends.push(out.len());
        }
        out.push_str("\n]");

        if estimate_tokens(&out) <= self.max_tokens {
            return (out, entries.len());
        }

        let limit = self.max_tokens.saturating_mul(4);
        let kept = ends.iter().take_while(|&&end| end <= limit).count();
        let cut = if kept == 0 { 1 } else { ends[kept - 1] };

        out.truncate(cut);
        out.push_str("\n]");
        (out, kept)
    }
}

/// Non-finite scores rank as 0.
fn sort_key(score: f32) -> f32 {
    if score.is_finite() { score } else { 0.0 }
}

fn normalize(m: &ScoredVector, index: usize) -> ContextEntry {
    let chunk_id = match m.id.as_deref() {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => format!("C{:03}", index + 1),
    };

    ContextEntry {
        chunk_id,
        source_file: metadata_string(m, "source_file"),
        section_heading: metadata_string(m, "section_heading"),
        text: metadata_string(m, "text"),
        similarity: sort_key(m.score),
    }
}

/// Strings as-is, numbers and bools via display, anything else empty.
fn metadata_string(m: &ScoredVector, key: &str) -> String {
    match m.metadata.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn write_entry(out: &mut String, entry: &ContextEntry) {
    let similarity = if entry.similarity.is_finite() {
        entry.similarity
    } else {
        0.0
    };

    out.push_str("  {\"chunk_id\":\"");
    escape_into(out, &entry.chunk_id);
    out.push_str("\",\"source_file\":\"");
    escape_into(out, &entry.source_file);
    out.push_str("\",\"section_heading\":\"");
    escape_into(out, &entry.section_heading);
    out.push_str("\",\"text\":\"");
    escape_into(out, &entry.text);
    out.push_str(&format!("\",\"similarity\":{similarity:.6}}}"));
}

/// Escapes backslash, double quote, `\n`, `\r` and `\t` only. Other
/// control characters pass through unescaped.
fn escape_into(out: &mut String, s: &str) {
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn scored(id: Option<&str>, score: f32, metadata: Value) -> ScoredVector {
        ScoredVector {
            id: id.map(String::from),
            score,
            metadata: metadata.as_object().cloned().unwrap_or_default(),
        }
    }

    fn parse(serialized: &str) -> Vec<Value> {
        serde_json::from_str::<Vec<Value>>(serialized).unwrap()
    }

    #[test]
    fn orders_by_score_descending() {
        let matches = vec![
            scored(Some("a"), 0.9, json!({})),
            scored(Some("b"), 0.3, json!({})),
            scored(Some("c"), 0.7, json!({})),
        ];
        let built = ContextAssembler::new(4000).build_context(&matches);

        let scores: Vec<f32> = built.entries.iter().map(|e| e.similarity).collect();
        assert_eq!(scores, vec![0.9, 0.7, 0.3]);
    }

    #[test]
    fn ties_keep_retrieval_order() {
        let matches = vec![
            scored(Some("first"), 0.5, json!({})),
            scored(Some("top"), 0.8, json!({})),
            scored(Some("second"), 0.5, json!({})),
        ];
        let built = ContextAssembler::new(4000).build_context(&matches);
        let ids: Vec<&str> = built.entries.iter().map(|e| e.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["top", "first", "second"]);
    }

    #[test]
    fn missing_ids_are_synthesized_after_ranking() {
        let matches = vec![
            scored(None, 0.2, json!({})),
            scored(Some(""), 0.9, json!({})),
            scored(Some("native"), 0.5, json!({})),
        ];
        let built = ContextAssembler::new(4000).build_context(&matches);
        let ids: Vec<&str> = built.entries.iter().map(|e| e.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["C001", "native", "C003"]);
    }

    #[test]
    fn metadata_is_lenient() {
        let matches = vec![scored(
            Some("x"),
            0.5,
            json!({
                "source_file": "Metoprolol_Drug_information.md",
                "section_heading": 12,
                "text": true,
                "extra": {"nested": 1}
            }),
        )];
        let entry = &ContextAssembler::new(4000).build_context(&matches).entries[0];
        assert_eq!(entry.source_file, "Metoprolol_Drug_information.md");
        assert_eq!(entry.section_heading, "12");
        assert_eq!(entry.text, "true");

        let bare = scored(Some("y"), 0.1, json!({"text": ["list"]}));
        let entry = &ContextAssembler::new(4000).build_context(&[bare]).entries[0];
        assert_eq!(entry.source_file, "");
        assert_eq!(entry.text, "");
    }

    #[test]
    fn serialized_context_parses_and_round_trips_text() {
        let matches = vec![scored(
            Some("c-1"),
            0.87654321,
            json!({"text": "line one\nsaid \"hi\"\tC:\\path\r", "source_file": "A.md"}),
        )];
        let built = ContextAssembler::new(4000).build_context(&matches);

        let parsed = parse(&built.serialized);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["text"], "line one\nsaid \"hi\"\tC:\\path\r");
        assert_eq!(parsed[0]["source_file"], "A.md");
        assert!(built.serialized.contains("\"similarity\":0.876543"));
    }

    #[test]
    fn empty_matches_serialize_to_empty_array() {
        let built = ContextAssembler::new(4000).build_context(&[]);
        assert!(parse(&built.serialized).is_empty());
        assert!(built.entries.is_empty());
    }

    #[test]
    fn non_finite_scores_serialize_as_zero() {
        let matches = vec![scored(Some("n"), f32::NAN, json!({}))];
        let built = ContextAssembler::new(4000).build_context(&matches);
        assert!(built.serialized.contains("\"similarity\":0.000000"));
        assert_eq!(parse(&built.serialized).len(), 1);
    }

    #[test]
    fn nan_score_ranks_as_zero() {
        let matches = vec![
            scored(Some("nan"), f32::NAN, json!({})),
            scored(Some("good"), 0.9, json!({})),
            scored(Some("low"), -0.2, json!({})),
        ];
        let built = ContextAssembler::new(4000).build_context(&matches);

        let ids: Vec<&str> = built.entries.iter().map(|e| e.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["good", "nan", "low"]);
        assert_eq!(built.entries[1].similarity, 0.0);

        let parsed = parse(&built.serialized);
        assert_eq!(parsed[0]["chunk_id"], "good");
        assert_eq!(parsed[1]["chunk_id"], "nan");
    }

    #[test]
    fn truncation_drops_trailing_entries_and_stays_parseable() {
        let matches: Vec<ScoredVector> = (0..40)
            .map(|i| {
                scored(
                    Some(format!("chunk-{i}").as_str()),
                    1.0 - i as f32 / 100.0,
                    json!({"text": "x".repeat(200), "source_file": format!("doc{i}.md")}),
                )
            })
            .collect();

        let built = ContextAssembler::new(500).build_context(&matches);

        let parsed = parse(&built.serialized);
        assert!(built.dropped > 0);
        assert_eq!(parsed.len(), built.entries.len());
        assert_eq!(built.entries.len() + built.dropped, 40);
        assert_eq!(parsed[0]["chunk_id"], "chunk-0");
        assert!(built.serialized.len() <= 500 * 4 + 2);
    }

    #[test]
    fn truncation_survives_braces_inside_text() {
        let matches: Vec<ScoredVector> = (0..10)
            .map(|i| {
                scored(
                    Some(format!("b{i}").as_str()),
                    0.5,
                    json!({"text": format!("{{}} }} {} {{", "y".repeat(100))}),
                )
            })
            .collect();

        for budget in [1, 10, 40, 80, 150, 300] {
            let built = ContextAssembler::new(budget).build_context(&matches);
            let parsed = parse(&built.serialized);
            assert_eq!(parsed.len(), built.entries.len(), "budget {budget}");
        }
    }

    #[test]
    fn budget_too_small_for_any_entry_yields_empty_array() {
        let matches = vec![scored(Some("big"), 0.9, json!({"text": "z".repeat(400)}))];
        let built = ContextAssembler::new(10).build_context(&matches);
        assert!(parse(&built.serialized).is_empty());
        assert_eq!(built.dropped, 1);
    }

    #[test]
    fn estimate_is_length_over_four() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 0);
        assert_eq!(estimate_tokens(&"a".repeat(100)), 25);
    }
}
