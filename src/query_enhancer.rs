//! Query understanding: intent classification, entity extraction, query
//! rewriting/variation generation, and exact procedure-code detection.
//!
//! Every step prefers a cheap deterministic heuristic and only falls back
//! to an LLM call when the heuristic is inconclusive; LLM failures never
//! propagate — they fall back again to a fixed default.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;

use crate::chunk::ChunkType;
use crate::llm::{LlmClient, extract_json_array, extract_json_object};

/// The caller's underlying information need, driving both retrieval
/// filtering and context assembly shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    /// What documents/paperwork are required.
    Documents,
    /// Eligibility requirements.
    Requirements,
    /// The procedural steps to follow.
    Process,
    /// Legal basis and citations.
    Legal,
    /// How long the procedure takes.
    Timeline,
    /// Fees involved.
    Fees,
    /// Where/which agency handles the procedure.
    Location,
    /// No specific facet detected; general overview.
    Overview,
}

impl Intent {
    const ALL_SPECIFIC: [Self; 7] = [
        Self::Documents,
        Self::Requirements,
        Self::Process,
        Self::Legal,
        Self::Timeline,
        Self::Fees,
        Self::Location,
    ];

    fn as_str(self) -> &'static str {
        match self {
            Self::Documents => "documents",
            Self::Requirements => "requirements",
            Self::Process => "process",
            Self::Legal => "legal",
            Self::Timeline => "timeline",
            Self::Fees => "fees",
            Self::Location => "location",
            Self::Overview => "overview",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        Self::ALL_SPECIFIC
            .into_iter()
            .chain(std::iter::once(Self::Overview))
            .find(|i| i.as_str() == s)
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Documents => &[
                "giấy tờ cần",
                "hồ sơ cần",
                "cần những giấy tờ gì",
                "thành phần hồ sơ",
                "tài liệu cần nộp",
                "cần chuẩn bị gì",
            ],
            Self::Requirements => &[
                "điều kiện",
                "yêu cầu gì",
                "ai được phép",
                "đối tượng áp dụng",
                "điều kiện thực hiện",
            ],
            Self::Process => &[
                "quy trình",
                "các bước",
                "thủ tục thực hiện",
                "trình tự thực hiện",
                "làm thế nào để",
            ],
            Self::Legal => &[
                "căn cứ pháp lý",
                "quy định tại",
                "văn bản pháp luật",
                "cơ sở pháp lý",
                "theo luật nào",
            ],
            Self::Timeline => &["thời gian giải quyết", "bao lâu", "thời hạn", "mất bao nhiêu ngày"],
            Self::Fees => &["lệ phí", "phí là bao nhiêu", "chi phí", "mức phí"],
            Self::Location => &["nộp ở đâu", "cơ quan nào", "địa điểm nộp", "nơi thực hiện", "ủy ban nào"],
            Self::Overview => &[],
        }
    }

    /// Exclusion phrases that zero out this intent's score even if a
    /// keyword matched, avoiding confusion with a neighboring intent.
    fn exclusions(self) -> &'static [&'static str] {
        match self {
            Self::Documents => &["thời gian", "bao lâu", "thời hạn", "hình thức thông báo", "thông báo"],
            _ => &[],
        }
    }

    /// The chunk-type filter this intent narrows retrieval to, or `None`
    /// for intents with no dedicated filter (fees, location, overview).
    #[must_use]
    pub fn chunk_type_filter(self) -> Option<Vec<ChunkType>> {
        match self {
            Self::Documents => Some(vec![ChunkType::Documents]),
            Self::Requirements => Some(vec![ChunkType::Requirements]),
            Self::Process => Some(vec![ChunkType::Process]),
            Self::Timeline => Some(vec![ChunkType::Process, ChunkType::FeesTiming]),
            Self::Legal => Some(vec![ChunkType::Legal]),
            Self::Fees | Self::Location | Self::Overview => None,
        }
    }
}

/// Entities pulled out of a question by the language model, best-effort.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryEntities {
    /// The procedure name mentioned, if any.
    pub procedure_name: String,
    /// The administrative domain mentioned, if any.
    pub domain: String,
    /// Free-form keywords extracted from the question.
    pub keywords: Vec<String>,
}

#[derive(Deserialize, Default)]
struct RawEntities {
    #[serde(default)]
    thu_tuc_name: String,
    #[serde(default)]
    linh_vuc: String,
    #[serde(default)]
    keywords: Vec<String>,
}

/// The fully enhanced description of a caller's question, ready to drive
/// every downstream retrieval stage.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    /// The question exactly as the caller supplied it.
    pub original_query: String,
    /// The classified intent.
    pub intent: Intent,
    /// Paraphrases/variations to widen recall, always non-empty.
    pub query_variations: Vec<String>,
    /// Best-effort extracted entities.
    pub entities: QueryEntities,
    /// Chunk-type filter implied by `intent`, if any.
    pub chunk_type_filter: Option<Vec<ChunkType>>,
    /// An exact administrative procedure code detected in the question.
    pub exact_code: Option<String>,
}

static PROCEDURE_CODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+\.\d{5,6}\b").expect("static pattern is valid"));

struct FillerPattern {
    regex: Regex,
    replacement: &'static str,
}

static FILLER_PATTERNS: LazyLock<Vec<FillerPattern>> = LazyLock::new(|| {
    let specs: &[(&str, &str)] = &[
        (r"(?i)^nếu\s+(tôi|mình|em)\s+", ""),
        (r"(?i)\s+thì\s+", " "),
        (r"(?i)\s+có\s+", " "),
        (r"(?i)(khác\s+gì|khác\s+nhau\s+như\s+thế\s+nào|sự\s+khác\s+biệt)", ""),
        (r"(?i)(so\s+với|với)", ""),
        (r"(?i)(bằng\s+cách\s+nào|như\s+thế\s+nào)", ""),
        (r"\?+\s*$", ""),
    ];
    specs
        .iter()
        .map(|(pattern, replacement)| FillerPattern {
            regex: Regex::new(pattern).expect("static pattern is valid"),
            replacement,
        })
        .collect()
});

/// Performs query understanding: intent classification, entity extraction,
/// rewriting, variation generation, and exact-code detection.
pub struct QueryEnhancer {
    llm: Arc<dyn LlmClient>,
}

impl QueryEnhancer {
    /// Creates a new enhancer backed by `llm` for its fallback paths.
    #[must_use]
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Runs the full query-understanding pipeline over `question`.
    #[must_use]
    pub fn enhance_query(&self, question: &str) -> QueryDescriptor {
        let exact_code = Self::extract_procedure_code(question);
        let rewritten = Self::rewrite_query(question);
        let query_for_processing = if rewritten.to_lowercase() != question.to_lowercase() {
            rewritten.clone()
        } else {
            question.to_string()
        };

        let intent = self.detect_intent(question);
        let entities = self.extract_entities(question);

        let query_variations = if query_for_processing != question {
            let mut variations = vec![query_for_processing];
            variations.extend(self.generate_query_variations(question, intent, 2));
            variations
        } else {
            self.generate_query_variations(question, intent, 3)
        };

        QueryDescriptor {
            original_query: question.to_string(),
            intent,
            query_variations,
            entities,
            chunk_type_filter: intent.chunk_type_filter(),
            exact_code,
        }
    }

    /// Extracts the first administrative procedure code found in `question`.
    #[must_use]
    pub fn extract_procedure_code(question: &str) -> Option<String> {
        PROCEDURE_CODE_PATTERN.find(question).map(|m| m.as_str().to_string())
    }

    /// Strips filler words/phrases that don't change the question's search
    /// intent. Returns the original question unchanged if stripping would
    /// leave fewer than 3 whitespace-separated tokens, since at that point
    /// too much signal has been removed to trust the rewrite.
    #[must_use]
    pub fn rewrite_query(question: &str) -> String {
        let mut rewritten = question.to_lowercase();
        for pattern in FILLER_PATTERNS.iter() {
            rewritten = pattern.regex.replace_all(&rewritten, pattern.replacement).into_owned();
        }
        let normalized: String = rewritten.split_whitespace().collect::<Vec<_>>().join(" ");

        if normalized.split_whitespace().count() < 3 {
            question.to_string()
        } else {
            normalized
        }
    }

    /// Classifies `question`'s intent via keyword scoring, falling back to
    /// the configured language model when no keyword list scores positive.
    #[must_use]
    pub fn detect_intent(&self, question: &str) -> Intent {
        let lowered = question.to_lowercase();

        let mut best: Option<(Intent, usize)> = None;
        for intent in Intent::ALL_SPECIFIC {
            if intent.exclusions().iter().any(|ex| lowered.contains(ex)) {
                continue;
            }
            let score = intent.keywords().iter().filter(|kw| lowered.contains(*kw)).count();
            if score > 0 && best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((intent, score));
            }
        }

        if let Some((intent, _)) = best {
            return intent;
        }

        self.detect_intent_via_llm(question).unwrap_or(Intent::Overview)
    }

    fn detect_intent_via_llm(&self, question: &str) -> Option<Intent> {
        let prompt = format!(
            "Xác định ý định của câu hỏi sau thuộc một trong các loại: \
             documents, requirements, process, legal, timeline, fees, location, overview.\n\
             Câu hỏi: \"{question}\"\n\
             Chỉ trả lời đúng một từ là tên loại ý định."
        );
        let response = self.llm.generate(&prompt, None).ok()?;
        Intent::from_str(response.trim().trim_matches('"').to_lowercase().as_str())
    }

    /// Extracts `{thu_tuc_name, linh_vuc, keywords}`-shaped entities from
    /// `question` via the language model, defaulting to empty on failure.
    #[must_use]
    pub fn extract_entities(&self, question: &str) -> QueryEntities {
        let prompt = format!(
            "Trích xuất thông tin từ câu hỏi sau dưới dạng JSON với các trường \
             thu_tuc_name, linh_vuc, keywords (mảng chuỗi).\nCâu hỏi: \"{question}\""
        );

        let Ok(response) = self.llm.generate(&prompt, None) else {
            return QueryEntities::default();
        };
        let Some(json) = extract_json_object(&response) else {
            return QueryEntities::default();
        };
        let Ok(raw) = serde_json::from_str::<RawEntities>(json) else {
            return QueryEntities::default();
        };

        QueryEntities {
            procedure_name: raw.thu_tuc_name,
            domain: raw.linh_vuc,
            keywords: raw.keywords,
        }
    }

    /// Generates up to `num_variations` paraphrases of `question` via the
    /// language model, falling back to a fixed set of mechanical
    /// substitutions if the model call fails or returns unparsable output.
    #[must_use]
    pub fn generate_query_variations(&self, question: &str, intent: Intent, num_variations: usize) -> Vec<String> {
        let prompt = format!(
            "Viết {num_variations} cách diễn đạt khác cho câu hỏi sau, giữ nguyên ý định \"{}\", \
             trả về dưới dạng mảng JSON các chuỗi.\nCâu hỏi: \"{question}\"",
            intent.as_str()
        );

        let variations = self
            .llm
            .generate(&prompt, None)
            .ok()
            .and_then(|response| extract_json_array(&response).map(str::to_string))
            .and_then(|json| serde_json::from_str::<Vec<String>>(&json).ok());

        match variations {
            Some(mut v) => {
                v.truncate(num_variations);
                v
            }
            None => {
                let fallback = [
                    question.to_string(),
                    question.replace("cần gì", "bao gồm những gì"),
                    question.replace("làm thế nào", "quy trình"),
                ];
                fallback.into_iter().take(num_variations).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::NullLlmClient;
    use test_case::test_case;

    fn enhancer() -> QueryEnhancer {
        QueryEnhancer::new(Arc::new(NullLlmClient))
    }

    #[test_case("thành phần hồ sơ gồm những gì", Intent::Documents; "documents keyword")]
    #[test_case("điều kiện thực hiện là gì", Intent::Requirements; "requirements keyword")]
    #[test_case("các bước thực hiện thủ tục", Intent::Process; "process keyword")]
    #[test_case("căn cứ pháp lý theo luật nào", Intent::Legal; "legal keyword")]
    #[test_case("thời hạn giải quyết là bao lâu", Intent::Timeline; "timeline keyword")]
    #[test_case("mức phí là bao nhiêu", Intent::Fees; "fees keyword")]
    #[test_case("nộp ở đâu", Intent::Location; "location keyword")]
    fn detect_intent_matches_each_keyword_list(query: &str, expected: Intent) {
        assert_eq!(enhancer().detect_intent(query), expected);
    }

    #[test]
    fn extract_procedure_code_finds_match() {
        assert_eq!(
            QueryEnhancer::extract_procedure_code("thủ tục 1.001234 cần giấy tờ gì"),
            Some("1.001234".to_string())
        );
    }

    #[test]
    fn extract_procedure_code_absent_is_none() {
        assert_eq!(QueryEnhancer::extract_procedure_code("đăng ký khai sinh cần giấy tờ gì"), None);
    }

    #[test]
    fn detect_intent_documents_by_keyword() {
        let e = enhancer();
        assert_eq!(e.detect_intent("hồ sơ cần những giấy tờ gì"), Intent::Documents);
    }

    #[test]
    fn detect_intent_exclusion_blocks_documents() {
        let e = enhancer();
        // "thời gian" is a documents exclusion; with no other intent keyword
        // matching, this falls through to the (failing) LLM and defaults
        // to overview rather than misclassifying as documents.
        assert_eq!(e.detect_intent("thời gian giải quyết"), Intent::Timeline);
    }

    #[test]
    fn detect_intent_falls_back_to_overview_on_llm_failure() {
        let e = enhancer();
        assert_eq!(e.detect_intent("xin chào"), Intent::Overview);
    }

    #[test]
    fn rewrite_query_strips_filler_and_trailing_question_mark() {
        let rewritten = QueryEnhancer::rewrite_query("Nếu tôi mất giấy khai sinh thì làm thế nào?");
        assert!(!rewritten.contains('?'));
        assert!(!rewritten.starts_with("nếu"));
    }

    #[test]
    fn rewrite_query_returns_original_when_too_short_after_stripping() {
        let rewritten = QueryEnhancer::rewrite_query("có thì?");
        assert_eq!(rewritten, "có thì?");
    }

    #[test]
    fn extract_entities_defaults_on_llm_failure() {
        let e = enhancer();
        assert_eq!(e.extract_entities("bất kỳ câu hỏi nào"), QueryEntities::default());
    }

    #[test]
    fn generate_variations_falls_back_on_llm_failure() {
        let e = enhancer();
        let variations = e.generate_query_variations("cần gì để đăng ký khai sinh", Intent::Documents, 3);
        assert_eq!(variations.len(), 3);
        assert!(variations[1].contains("bao gồm những gì"));
    }

    #[test]
    fn generate_variations_respects_num_variations_cap() {
        let e = enhancer();
        let variations = e.generate_query_variations("làm thế nào để đăng ký", Intent::Process, 1);
        assert_eq!(variations.len(), 1);
    }

    #[test]
    fn chunk_type_filter_timeline_covers_two_types() {
        assert_eq!(
            Intent::Timeline.chunk_type_filter(),
            Some(vec![ChunkType::Process, ChunkType::FeesTiming])
        );
    }

    #[test]
    fn chunk_type_filter_fees_has_no_filter() {
        assert_eq!(Intent::Fees.chunk_type_filter(), None);
    }

    #[test]
    fn enhance_query_overview_has_no_filter_and_picks_up_exact_code() {
        let e = enhancer();
        let descriptor = e.enhance_query("thủ tục 1.001234 là gì");
        assert_eq!(descriptor.exact_code, Some("1.001234".to_string()));
        assert!(!descriptor.query_variations.is_empty());
    }
}
