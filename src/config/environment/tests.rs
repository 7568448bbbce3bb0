use super::*;
use std::path::PathBuf;

fn create_test_config() -> Config {
    let mut config = Config {
        base_dir: PathBuf::from("/srv/kb"),
        ..Config::default()
    };
    config.environments.insert(
        "production".to_string(),
        EnvironmentConfig {
            endpoint: "https://milvus.prod.internal:19530".to_string(),
            token: Some("prod-token".to_string()),
            database: Some("social".to_string()),
            options: BTreeMap::new(),
        },
    );
    config.environments.insert(
        "staging".to_string(),
        EnvironmentConfig {
            endpoint: "memory://staging".to_string(),
            token: Some("  ".to_string()),
            database: None,
            options: BTreeMap::new(),
        },
    );
    config
}

#[test]
fn resolves_known_environment() {
    let resolver = EnvironmentResolver::new(&create_test_config());
    let env = resolver.resolve("production");

    assert_eq!(env.name, "production");
    assert_eq!(env.endpoint, "https://milvus.prod.internal:19530");
    assert_eq!(env.credential.as_deref(), Some("prod-token"));
    assert_eq!(env.database, "social");
}

#[test]
fn unknown_or_empty_name_falls_back_to_default() {
    let resolver = EnvironmentResolver::new(&create_test_config());

    for name in ["", "   ", "qa", "PRODUCTION"] {
        let env = resolver.resolve(name);
        assert_eq!(env.name, "local", "name {name:?} should fall back");
        assert_eq!(env.endpoint, "/srv/kb/vectors");
        assert_eq!(env.database, EnvironmentDescriptor::DEFAULT_DATABASE);
    }
}

#[test]
fn blank_credentials_and_database_are_normalized() {
    let resolver = EnvironmentResolver::new(&create_test_config());
    let env = resolver.resolve("staging");

    assert_eq!(env.endpoint, "memory://staging");
    assert!(env.credential.is_none());
    assert_eq!(env.database, "default");
}

#[test]
fn resolution_is_deterministic() {
    let resolver = EnvironmentResolver::new(&create_test_config());
    assert_eq!(resolver.resolve("production"), resolver.resolve("production"));
    assert_ne!(resolver.resolve("production"), resolver.resolve("staging"));
}

#[test]
fn absolute_paths_are_kept() {
    let mut config = create_test_config();
    config
        .environments
        .insert("archive".to_string(), EnvironmentConfig::new("/data/archive"));
    let resolver = EnvironmentResolver::new(&config);

    assert_eq!(resolver.resolve("archive").endpoint, "/data/archive");
    assert_eq!(
        resolver.names(),
        vec!["archive", "local", "production", "staging"]
    );
    assert_eq!(resolver.default_name(), "local");
}

#[test]
fn credential_is_not_serialized() {
    let resolver = EnvironmentResolver::new(&create_test_config());
    let json = serde_json::to_string(&resolver.resolve("production"))
        .expect("should serialize descriptor");
    assert!(!json.contains("prod-token"));
    assert!(json.contains("social"));
}
