//! Layered configuration loaded from YAML files

mod fixtures;

use axum::http::StatusCode;
use fixtures::{column, product_store, test_server};
use restshape::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

const YAML: &str = r#"
defaults:
  pageSize: 2
  page_size: 50
  metaShowOrdering: true
operations:
  search:
    page_size: 1
contexts:
  public:
    blockFilteringOn: [secret]
    block_ordering_on: [secret]
    blocked_fields: [owner]
"#;

fn config_file(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(content.as_bytes()).expect("write config");
    file
}

fn server(file: &NamedTempFile) -> axum_test::TestServer {
    test_server(
        ServerBuilder::new()
            .with_store(product_store())
            .with_config_file(file.path())
            .expect("load config")
            .mount("products", "product")
            .mount_with(Mount::new("public/products", "product").context("public")),
    )
}

// =============================================================================
// Layering Tests
// =============================================================================

mod layering_tests {
    use super::*;

    #[tokio::test]
    async fn test_snake_case_wins_within_a_layer() {
        let file = config_file(YAML);
        let server = server(&file);

        let body: Value = server.get("/products").await.json();
        assert_eq!(body["meta"]["paging"]["size"], 50);
        assert_eq!(
            body["meta"]["ordering"],
            json!([{"order_by": "id", "direction": "ASC"}])
        );
    }

    #[tokio::test]
    async fn test_operation_layer_overrides_defaults() {
        let file = config_file(YAML);
        let server = server(&file);

        let body: Value = server
            .post("/products/search")
            .json(&json!({}))
            .await
            .json();
        assert_eq!(column(&body, "name"), vec!["Widget"]);
        assert_eq!(body["meta"]["paging"]["total_pages"], 3);
    }

    #[tokio::test]
    async fn test_context_applies_only_to_its_mount() {
        let file = config_file(YAML);
        let server = server(&file);

        server
            .get("/products")
            .add_query_param("secret", "a")
            .await
            .assert_status_ok();
        server
            .get("/public/products")
            .add_query_param("secret", "a")
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        server
            .get("/public/products")
            .add_query_param("api:order_by", "secret")
            .await
            .assert_status(StatusCode::BAD_REQUEST);
        server
            .post("/public/products")
            .json(&json!({"name": "Hammer", "owner": "mallory"}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_override_layer_wins_over_file() {
        let file = config_file(YAML);
        let server = test_server(
            ServerBuilder::new()
                .with_store(product_store())
                .with_config_file(file.path())
                .expect("load config")
                .mount_with(
                    Mount::new("products", "product")
                        .context("public")
                        .with_override(OperationKind::List, ConfigLayer::new().set("pageSize", 1)),
                ),
        );

        let body: Value = server.get("/products").await.json();
        assert_eq!(body["meta"]["paging"]["size"], 1);
    }
}

// =============================================================================
// Error Tests
// =============================================================================

mod error_tests {
    use super::*;

    #[test]
    fn test_malformed_yaml_names_the_file() {
        let file = config_file("defaults: [unclosed");
        let err = ConfigStack::from_yaml_file(file.path()).unwrap_err();
        match err {
            ConfigError::ParseError { file: Some(path), .. } => {
                assert_eq!(path, file.path().display().to_string());
            }
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = ConfigStack::from_yaml_file("/nonexistent/restshape.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError { .. }));
    }

    #[test]
    fn test_unknown_context_fails_at_build_time() {
        let file = config_file(YAML);
        let result = ServerBuilder::new()
            .with_store(product_store())
            .with_config_file(file.path())
            .expect("load config")
            .mount_with(Mount::new("products", "product").context("internal"))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_option_type_fails_at_build_time() {
        let result = ServerBuilder::new()
            .with_store(product_store())
            .with_config(
                ConfigStack::new().with_defaults(ConfigLayer::new().set("page_size", "lots")),
            )
            .mount("products", "product")
            .build();
        assert!(result.is_err());
    }
}
