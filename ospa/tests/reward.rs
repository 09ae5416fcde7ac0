//! End-to-end reward judgments against a scripted provider.

use std::sync::Arc;

use ospa::prelude::*;

fn service_for(mock: &Arc<MockProvider>) -> RewardService {
    let engine = Arc::new(LlmEngine::with_provider(
        Arc::clone(mock) as Arc<dyn ChatProvider>,
        "mock-model",
    ));
    RewardService::new(engine).expect("service")
}

#[tokio::test]
async fn blue_whale_scenario() {
    let mock = Arc::new(MockProvider::new());
    mock.push_text(
        r#"[
            {"index": 0, "label": "equivalent", "confidence": 0.97, "reason": "与目标一致"},
            {"index": 1, "label": "equivalent", "confidence": 0.93, "reason": "仅语序不同"},
            {"index": 2, "label": "different", "confidence": 0.95, "reason": "大象并非最大"}
        ]"#,
    );
    let service = service_for(&mock);

    let candidates = vec![
        "蓝鲸是最大的哺乳动物。".to_owned(),
        "最大的哺乳动物是蓝鲸。".to_owned(),
        "大象是最大的哺乳动物。".to_owned(),
    ];
    let result = service
        .compare_answer(
            "地球上最大的哺乳动物是什么？",
            &candidates,
            "蓝鲸是最大的哺乳动物。",
            None,
        )
        .await
        .expect("compare");

    let labels: Vec<JudgeLabel> = result.results.iter().map(|j| j.label).collect();
    assert_eq!(
        labels,
        vec![
            JudgeLabel::Equivalent,
            JudgeLabel::Equivalent,
            JudgeLabel::Different
        ]
    );
    assert_eq!(result.results[2].label, JudgeLabel::Different);
    assert!(result.results.iter().all(|j| j.confidence >= 0.7));
}

#[tokio::test]
async fn zero_candidates_yield_empty_results() {
    let mock = Arc::new(MockProvider::new());
    let service = service_for(&mock);

    let result = service
        .compare_answer("问题", &[], "目标答案", None)
        .await
        .expect("compare");

    assert!(result.results.is_empty());
    assert_eq!(mock.request_count(), 0);
}

#[tokio::test]
async fn ambiguous_labels_and_confidences_are_normalized() {
    let mock = Arc::new(MockProvider::new());
    mock.push_text(
        r#"{"results": [
            {"index": 0, "label": "equivalent / different", "confidence": 1.7, "reason": "矛盾"},
            {"index": 1, "label": "partially equivalent", "confidence": "0.6", "reason": "范围更窄"}
        ]}"#,
    );
    let service = service_for(&mock);

    let result = service
        .compare_answer(
            "q",
            &["a".to_owned(), "b".to_owned()],
            "target",
            None,
        )
        .await
        .expect("compare");

    assert_eq!(result.results[0].label, JudgeLabel::Different);
    assert!((result.results[0].confidence - 1.0).abs() < f64::EPSILON);
    assert_eq!(result.results[1].label, JudgeLabel::PartiallyEquivalent);
    assert!((result.results[1].confidence - 0.6).abs() < f64::EPSILON);
}
