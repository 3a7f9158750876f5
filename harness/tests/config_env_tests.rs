use harness::{AppConfig, ConfigError, ConfigOverrides};
use model::ProviderKind;
use serial_test::serial;
use std::env;

const VARS: [&str; 8] = [
    "EVALUATOR_PROVIDER",
    "EVALUATOR_MODEL",
    "EVALUATOR_BASE_URL",
    "EVALUATOR_STRUCTURED_OUTPUT",
    "OPENAI_API_KEY",
    "RESPONDENT_MESSAGE_URL",
    "RESPONDENT_CLIENT_ID",
    "RESPONDENT_CLIENT_SECRET",
];

fn clear() {
    for var in VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn test_from_env_reads_process_environment() {
    clear();
    env::set_var("EVALUATOR_PROVIDER", "OpenAI");
    env::set_var("OPENAI_API_KEY", "sk-env");
    env::set_var("EVALUATOR_BASE_URL", "http://localhost:4000");
    env::set_var("EVALUATOR_STRUCTURED_OUTPUT", "false");
    env::set_var("RESPONDENT_MESSAGE_URL", "http://localhost:3978/messages");

    let config = AppConfig::from_env(&ConfigOverrides::default()).unwrap();
    assert_eq!(config.provider.kind, ProviderKind::OpenAi);
    assert_eq!(config.provider.base_url, "http://localhost:4000");
    assert!(!config.provider.structured_output);
    assert_eq!(config.provider.api_key.as_deref(), Some("sk-env"));

    let printed = serde_json::to_string(&config).unwrap();
    assert!(!printed.contains("sk-env"));
    clear();
}

#[test]
#[serial]
fn test_from_env_requires_message_url() {
    clear();
    env::set_var("EVALUATOR_PROVIDER", "openai");
    env::set_var("OPENAI_API_KEY", "sk-env");

    match AppConfig::from_env(&ConfigOverrides::default()) {
        Err(ConfigError::Missing { key }) => assert_eq!(key, "RESPONDENT_MESSAGE_URL"),
        other => panic!("expected missing message url, got {:?}", other),
    }
    clear();
}
