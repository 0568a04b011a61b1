use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;
use tempfile::TempDir;

use kira_expression_vault::config::ConfigLoader;
use kira_expression_vault::domain::SymbolPolicy;
use kira_expression_vault::error::KiraError;

fn write_config(dir: &TempDir, content: &str) -> String {
    let path = dir.path().join("kira-ev.json");
    fs::write(&path, content).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn load_explicit_config() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"{
            "schema_version": 1,
            "database": "data/vault.sqlite",
            "batch_size": 250,
            "min_match_rate": 0.8,
            "busy_timeout_ms": 500,
            "symbol_policy": "require_unique",
            "fuzzy": { "max_distance": 1 }
        }"#,
    );

    let resolved = ConfigLoader::resolve(Some(&path)).unwrap();
    assert_eq!(resolved.database.as_str(), "data/vault.sqlite");
    assert_eq!(resolved.store.batch_size, 250);
    assert_eq!(resolved.store.busy_timeout, Duration::from_millis(500));
    assert_eq!(resolved.resolver.min_match_rate, 0.8);
    assert_eq!(resolved.resolver.symbol_policy, SymbolPolicy::RequireUnique);
    assert_eq!(resolved.resolver.fuzzy.max_distance, 1);
    assert_eq!(resolved.resolver.fuzzy.length_tolerance, 2);
}

#[test]
fn missing_explicit_config_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(Some(path.to_str().unwrap())),
        Err(KiraError::ConfigRead(_))
    );
}

#[test]
fn malformed_config_is_a_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "{ \"batch_size\": \"many\" }");
    assert_matches!(
        ConfigLoader::resolve(Some(&path)),
        Err(KiraError::ConfigParse(_))
    );
}

#[test]
fn out_of_range_values_are_rejected() {
    let dir = TempDir::new().unwrap();
    for content in [
        r#"{ "database": "v.sqlite", "min_match_rate": 1.5 }"#,
        r#"{ "database": "v.sqlite", "batch_size": 0 }"#,
        r#"{ "database": "v.sqlite", "baseline_epsilon": -1.0 }"#,
        r#"{ "database": "v.sqlite", "schema_version": 2 }"#,
    ] {
        let path = write_config(&dir, content);
        assert_matches!(
            ConfigLoader::resolve(Some(&path)),
            Err(KiraError::InvalidConfig(_)),
            "{content}"
        );
    }
}
