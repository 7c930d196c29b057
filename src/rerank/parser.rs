//! 리랭커 응답 파서
//!
//! 리랭커 서버마다 응답 형식이 다르므로, 알려진 형식을 고정된 우선순위로 시도하고
//! 항목을 하나 이상 얻은 첫 형식을 사용합니다.

use serde_json::Value;

/// 원래 후보 위치와 관련도 점수
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedIndex {
    pub index: usize,
    pub score: f64,
}

/// 이름 붙은 응답 형식 파서
pub struct ResponseShape {
    pub name: &'static str,
    parse: fn(&Value) -> Option<Vec<RankedIndex>>,
}

impl ResponseShape {
    /// 이 형식으로 파싱 (항목이 없으면 None)
    pub fn parse(&self, response: &Value) -> Option<Vec<RankedIndex>> {
        (self.parse)(response).filter(|entries| !entries.is_empty())
    }
}

/// 우선순위 순 응답 형식
pub const RESPONSE_SHAPES: [ResponseShape; 5] = [
    ResponseShape {
        name: "ranked_documents",
        parse: parse_ranked_documents,
    },
    ResponseShape {
        name: "results",
        parse: parse_results,
    },
    ResponseShape {
        name: "data",
        parse: parse_data,
    },
    ResponseShape {
        name: "array",
        parse: parse_array,
    },
    ResponseShape {
        name: "nested_result",
        parse: parse_nested_result,
    },
];

/// 첫 번째로 성공한 형식의 이름과 항목
pub fn parse_response(response: &Value) -> Option<(&'static str, Vec<RankedIndex>)> {
    RESPONSE_SHAPES
        .iter()
        .find_map(|shape| shape.parse(response).map(|entries| (shape.name, entries)))
}

// ============================================================================
// Shapes
// ============================================================================

const SCORE_FIRST: [&str; 2] = ["score", "relevance_score"];
const RELEVANCE_FIRST: [&str; 2] = ["relevance_score", "score"];

/// {"ranked_documents": [{"index": 0, "score": 0.9, "document": "..."}]}
fn parse_ranked_documents(response: &Value) -> Option<Vec<RankedIndex>> {
    entries(response.get("ranked_documents")?, &SCORE_FIRST)
}

/// {"results": [{"index": 0, "relevance_score": 0.9}]}
fn parse_results(response: &Value) -> Option<Vec<RankedIndex>> {
    entries(response.get("results")?, &RELEVANCE_FIRST)
}

/// {"data": [{"index": 0, "score": 0.9}]}
fn parse_data(response: &Value) -> Option<Vec<RankedIndex>> {
    entries(response.get("data")?, &SCORE_FIRST)
}

/// [{"index": 0, "score": 0.9}]
fn parse_array(response: &Value) -> Option<Vec<RankedIndex>> {
    entries(response, &SCORE_FIRST)
}

/// {"result": [...]} 또는 {"result": {"results": [...]}}
fn parse_nested_result(response: &Value) -> Option<Vec<RankedIndex>> {
    let nested = response.get("result")?;
    match nested {
        Value::Array(_) => entries(nested, &SCORE_FIRST),
        Value::Object(_) => entries(nested.get("results")?, &RELEVANCE_FIRST),
        _ => None,
    }
}

/// 배열의 객체 항목들을 (index, score)로 변환
///
/// index는 `index` → `rank` → 파싱된 항목 수 순으로 정합니다.
/// 키는 있지만 음이 아닌 정수가 아니면 그 항목은 버립니다.
fn entries(value: &Value, score_keys: &[&str]) -> Option<Vec<RankedIndex>> {
    let items = value.as_array()?;
    let mut parsed = Vec::with_capacity(items.len());

    for item in items.iter().filter(|item| item.is_object()) {
        let position = parsed.len();
        let index = match item.get("index").or_else(|| item.get("rank")) {
            Some(raw) => match as_index(raw) {
                Some(index) => index,
                None => continue,
            },
            None => position,
        };

        let score = score_keys
            .iter()
            .find_map(|key| item.get(*key).and_then(as_score))
            .unwrap_or(0.0);

        parsed.push(RankedIndex { index, score });
    }

    Some(parsed)
}

fn as_index(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().map(|i| i as usize).or_else(|| {
            n.as_f64()
                .filter(|f| *f >= 0.0 && f.fract() == 0.0)
                .map(|f| f as usize)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_score(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|f| f.is_finite())
}

// ============================================================================
// Tests
// ============================================================================
