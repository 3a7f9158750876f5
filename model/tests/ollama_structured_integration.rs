//! Live checks against a local Ollama server. Run with `cargo test -- --ignored`.

use model::{
    provider_from_config, ConversationState, GenerationRequest, ModelProvider, OllamaProvider,
    ProviderConfig, ProviderKind, StructuredGenerator, Turn,
};
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(120);

fn make_config() -> ProviderConfig {
    ProviderConfig::new(ProviderKind::Ollama).with_timeout(TIMEOUT)
}

fn opening_request() -> GenerationRequest {
    GenerationRequest::new(
        "You want to know the opening hours of the store on Saturday.",
        "The assistant states the Saturday opening hours.",
        ConversationState {
            history: vec![],
            turn_count: 1,
            max_turns: 3,
            fulfilled: false,
        },
    )
}

#[tokio::test]
#[ignore]
async fn test_next_action_is_schema_valid() {
    let provider = OllamaProvider::new(make_config()).expect("provider creation");
    assert_eq!(provider.model(), "qwen3:0.6b");

    let action = tokio::time::timeout(
        TIMEOUT,
        provider.generate_next_action(
            "You are a user testing a store assistant. Reply with the requested JSON object.",
            &opening_request(),
        ),
    )
    .await
    .expect("generation timed out")
    .expect("generation failed");

    assert!(
        !action.next_message.trim().is_empty() || action.fulfilled,
        "an unfulfilled opening turn must carry a message"
    );
}

#[tokio::test]
#[ignore]
async fn test_judgment_scores_in_range() {
    let generator = provider_from_config(make_config()).expect("provider creation");
    let conversation = vec![Turn {
        turn: 1,
        user: "What time do you open on Saturday?".to_string(),
        assistant: "We open at 9 AM on Saturdays.".to_string(),
    }];

    let judgment = tokio::time::timeout(
        TIMEOUT,
        generator.generate_judgment(
            "Judge whether the scenario was completed. Reply with the requested JSON object.",
            &conversation,
            "Find the Saturday opening hours",
        ),
    )
    .await
    .expect("judgment timed out")
    .expect("judgment failed");

    assert!((0.0..=1.0).contains(&judgment.scenario_completion_score));
    assert!((0.0..=1.0).contains(&judgment.conversation_quality_score));
}
