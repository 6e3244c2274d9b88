//! Term-weighted relevance scoring and excerpts.
//!
//! A candidate's raw score is the weighted sum of its matches against the
//! query terms. The sum is divided by `ln(len + 1)` of the body (floored at
//! 1.0) so long documents are not favoured for sheer size, then by the term
//! count, then clamped to [0, 1].

use noesis_core::config::RelevanceConfig;
use noesis_core::knowledge::clamp_score;

/// Something that can be scored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Candidate {
    /// Stable identifier, usually the vault path.
    pub id: String,
    pub title: String,
    pub path: String,
    pub tags: Vec<String>,
    pub body: String,
}

impl Candidate {
    /// A candidate with only a body, as for remote results.
    pub fn text(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            ..Self::default()
        }
    }
}

/// A candidate that survived filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub candidate: Candidate,
    pub score: f64,
}

/// Split a query into lower-cased whitespace-delimited terms.
pub fn query_terms(query: &str) -> Vec<String> {
    query.split_whitespace().map(str::to_lowercase).collect()
}

/// Scores, filters and ranks candidates.
#[derive(Debug, Clone, Default)]
pub struct RelevanceEngine {
    config: RelevanceConfig,
}

impl RelevanceEngine {
    pub fn new(config: RelevanceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RelevanceConfig {
        &self.config
    }

    /// Score one candidate against pre-split terms.
    pub fn score(&self, terms: &[String], candidate: &Candidate) -> f64 {
        if terms.is_empty() {
            return 0.0;
        }

        let title = candidate.title.to_lowercase();
        let path = candidate.path.to_lowercase();
        let tags: Vec<String> = candidate.tags.iter().map(|t| t.to_lowercase()).collect();
        let body = candidate.body.to_lowercase();

        let mut raw = 0.0;
        for term in terms {
            if title.contains(term.as_str()) {
                raw += self.config.title_weight;
            }
            if path.contains(term.as_str()) {
                raw += self.config.path_weight;
            }
            if tags.iter().any(|tag| tag.contains(term.as_str())) {
                raw += self.config.tag_weight;
            }
            raw += self.config.body_weight * body.matches(term.as_str()).count() as f64;
        }

        let length_norm = ((candidate.body.chars().count() + 1) as f64).ln().max(1.0);
        clamp_score(raw / length_norm / terms.len() as f64)
    }

    /// Score every candidate, drop those below `min_score`, and return the
    /// rest best first, at most `max_results` of them.
    ///
    /// Equal scores keep their input order.
    pub fn rank(&self, query: &str, candidates: Vec<Candidate>, min_score: f64) -> Vec<Scored> {
        let terms = query_terms(query);
        let mut scored: Vec<Scored> = candidates
            .into_iter()
            .filter_map(|candidate| {
                let score = self.score(&terms, &candidate);
                (score >= min_score).then_some(Scored { candidate, score })
            })
            .collect();

        // sort_by is stable
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(self.config.max_results);
        scored
    }

    /// Excerpt around the first line mentioning any term.
    pub fn excerpt(&self, content: &str, terms: &[String]) -> String {
        excerpt(content, terms, self.config.excerpt_lines, self.config.excerpt_chars)
    }
}

/// A window of `context` lines either side of the first line containing a
/// term, cut to `max_chars` characters. Falls back to a prefix of the
/// content when no line matches.
pub fn excerpt(content: &str, terms: &[String], context: usize, max_chars: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let hit = lines.iter().position(|line| {
        let line = line.to_lowercase();
        terms.iter().any(|term| line.contains(term.as_str()))
    });

    let window = match hit {
        Some(index) => {
            let start = index.saturating_sub(context);
            let end = (index + context + 1).min(lines.len());
            lines[start..end].join("\n")
        }
        None => content.to_string(),
    };
    truncate_chars(window.trim(), max_chars)
}

/// Cut to at most `max_chars` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> RelevanceEngine {
        RelevanceEngine::default()
    }

    #[test]
    fn test_reference_texts_against_search_threshold() {
        let engine = engine();
        let terms = query_terms("machine learning");

        let on_topic = Candidate::text(
            "a",
            "machine learning artificial intelligence deep learning neural networks machine learning",
        );
        let off_topic = Candidate::text("b", "cooking recipes and food");

        let high = engine.score(&terms, &on_topic);
        let low = engine.score(&terms, &off_topic);
        assert!(high > low);
        assert!(high >= 0.3, "on-topic score {high}");
        assert!(low < 0.3, "off-topic score {low}");
    }

    #[test]
    fn test_title_path_and_tags_count() {
        let engine = engine();
        let terms = query_terms("rust");
        let body = "nothing relevant in here at all";

        let plain = Candidate {
            body: body.to_string(),
            ..Candidate::default()
        };
        let titled = Candidate {
            title: "Learning Rust".to_string(),
            ..plain.clone()
        };
        let tagged = Candidate {
            tags: vec!["lang/rust".to_string()],
            ..plain.clone()
        };
        let pathed = Candidate {
            path: "code/rust-notes.md".to_string(),
            ..plain.clone()
        };

        assert_eq!(engine.score(&terms, &plain), 0.0);
        let title = engine.score(&terms, &titled);
        let tag = engine.score(&terms, &tagged);
        let path = engine.score(&terms, &pathed);
        assert!(title > tag && tag > path && path > 0.0);
    }

    #[test]
    fn test_empty_body_and_empty_query() {
        let engine = engine();
        let candidate = Candidate {
            title: "ideas".to_string(),
            ..Candidate::default()
        };
        // ln(1) would be zero; the floor keeps the score finite.
        assert_eq!(engine.score(&query_terms("ideas"), &candidate), 1.0);
        assert_eq!(engine.score(&[], &candidate), 0.0);
    }

    #[test]
    fn test_rank_filters_sorts_and_truncates() {
        let engine = RelevanceEngine::new(RelevanceConfig {
            max_results: 2,
            ..RelevanceConfig::default()
        });
        let candidates = vec![
            Candidate::text("weak", "a long note that mentions tokio once among many other words"),
            Candidate::text("none", "nothing to see"),
            Candidate::text("strong", "tokio tokio tokio"),
            Candidate::text("medium", "tokio runtime and tokio tasks"),
        ];

        let ranked = engine.rank("tokio", candidates, 0.1);
        let ids: Vec<&str> = ranked.iter().map(|s| s.candidate.id.as_str()).collect();
        assert_eq!(ids, vec!["strong", "medium"]);
        assert!(ranked[0].score >= ranked[1].score);
    }

    #[test]
    fn test_equal_scores_keep_input_order() {
        let engine = engine();
        let candidates = vec![
            Candidate::text("first", "graph theory"),
            Candidate::text("second", "graph theory"),
            Candidate::text("third", "graph theory"),
        ];
        let ranked = engine.rank("graph", candidates, 0.0);
        let ids: Vec<&str> = ranked.iter().map(|s| s.candidate.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_excerpt_window() {
        let content = "one\ntwo\nthree\nfour about Tokio\nfive\nsix\nseven";
        let text = excerpt(content, &query_terms("tokio"), 1, 300);
        assert_eq!(text, "three\nfour about Tokio\nfive");
    }

    #[test]
    fn test_excerpt_at_document_start() {
        let content = "tokio first\nsecond\nthird\nfourth";
        assert_eq!(excerpt(content, &query_terms("tokio"), 2, 300), "tokio first\nsecond\nthird");
    }

    #[test]
    fn test_excerpt_truncates_and_falls_back_to_prefix() {
        let content = "é".repeat(500);
        let text = excerpt(&content, &query_terms("missing"), 2, 300);
        assert!(text.ends_with("..."));
        assert_eq!(text.chars().count(), 303);

        assert_eq!(excerpt("short note", &query_terms("absent"), 2, 300), "short note");
    }
}
