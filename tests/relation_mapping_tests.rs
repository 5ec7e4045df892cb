//! Relation id mapping and include tests over the music catalogue

mod fixtures;

use axum::http::StatusCode;
use fixtures::{column, music_store, test_server};
use restshape::prelude::*;

fn song_server(store: InMemoryStore, overrides: ConfigLayer) -> axum_test::TestServer {
    test_server(
        ServerBuilder::new()
            .with_store(store)
            .mount_with(Mount::new("songs", "song").with_overrides(overrides)),
    )
}

// =============================================================================
// Outbound Mapping Tests
// =============================================================================

mod outbound_tests {
    use super::*;

    #[tokio::test]
    async fn test_foreign_keys_discovered_from_associations() {
        let server = song_server(music_store(), ConfigLayer::new());

        let body: Value = server.get("/songs").await.json();
        assert_eq!(column(&body, "artist_id"), vec!["art-nina", "art-fela", "art-nina"]);
        assert_eq!(
            column(&body, "album_id"),
            vec!["alb-pastel", "alb-zombie", "alb-pastel"]
        );
        assert_eq!(body["data"][0]["id"], 1);
    }

    #[tokio::test]
    async fn test_explicit_mapping_without_discovery() {
        let server = song_server(
            music_store(),
            ConfigLayer::new()
                .set("auto_relation_id_mapping", false)
                .set(
                    "relationIdMapping",
                    json!([
                        {"foreignKey": "artist_id", "relatedEntity": "artist", "externalField": "external_id"},
                        {"association": "album"}
                    ]),
                ),
        );

        let body: Value = server.get("/songs/2").await.json();
        assert_eq!(body["record"]["artist_id"], "art-fela");
        assert_eq!(body["record"]["album_id"], "alb-zombie");
    }

    #[tokio::test]
    async fn test_discovery_disabled_keeps_internal_keys() {
        let server = song_server(
            music_store(),
            ConfigLayer::new().set("auto_relation_id_mapping", false),
        );

        let body: Value = server.get("/songs/1").await.json();
        assert_eq!(body["record"]["artist_id"], 1);
        assert_eq!(body["record"]["album_id"], 10);
    }

    #[tokio::test]
    async fn test_unknown_related_entity_is_skipped() {
        let server = song_server(
            music_store(),
            ConfigLayer::new()
                .set("auto_relation_id_mapping", false)
                .set(
                    "relation_id_mapping",
                    json!([{"foreign_key": "artist_id", "related_entity": "band"}]),
                ),
        );

        let response = server.get("/songs/1").await;
        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["record"]["artist_id"], 1);
    }

    #[tokio::test]
    async fn test_missing_external_field_is_internal_error() {
        let server = song_server(
            music_store(),
            ConfigLayer::new().set(
                "relation_id_mapping",
                json!([{"foreign_key": "artist_id", "external_field": "isni"}]),
            ),
        );

        let response = server.get("/songs").await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.json::<Value>(),
            json!({"success": false, "error": "Internal Error"})
        );
    }

    #[tokio::test]
    async fn test_included_association_uses_its_external_id() {
        let server = song_server(
            music_store(),
            ConfigLayer::new().set("include", json!([{"association": "artist"}])),
        );

        let body: Value = server.get("/songs/1").await.json();
        let artist = &body["record"]["artist"];
        assert_eq!(artist["id"], "art-nina");
        assert_eq!(artist["name"], "Nina Simone");
        assert!(artist.get("external_id").is_none());
    }
}

// =============================================================================
// Inbound Mapping Tests
// =============================================================================

mod inbound_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_round_trips_external_ids() {
        let store = music_store();
        let server = song_server(store.clone(), ConfigLayer::new());

        let response = server
            .post("/songs")
            .json(&json!({
                "title": "Feeling Good",
                "artist_id": "art-nina",
                "album_id": "alb-pastel"
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let id = response.json::<Value>()["id"].clone();
        assert_eq!(id, 4);

        let body: Value = server.get("/songs/4").await.json();
        assert_eq!(body["record"]["artist_id"], "art-nina");
        assert_eq!(body["record"]["album_id"], "alb-pastel");

        let stored = store
            .find_by_key("song", &json!(4), &StoreQuery::new(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored["artist_id"], 1);
        assert_eq!(stored["album_id"], 10);
    }

    #[tokio::test]
    async fn test_create_with_unknown_related_id_is_not_found() {
        let store = music_store();
        let server = song_server(store.clone(), ConfigLayer::new());

        let response = server
            .post("/songs")
            .json(&json!({"title": "Lost", "artist_id": "art-nobody"}))
            .await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(store.count("song").unwrap(), 3);
    }

    #[tokio::test]
    async fn test_patch_moves_song_to_other_artist() {
        let server = song_server(music_store(), ConfigLayer::new());

        server
            .patch("/songs/3")
            .json(&json!({"artist_id": "art-fela"}))
            .await
            .assert_status_ok();

        let body: Value = server.get("/songs/3").await.json();
        assert_eq!(body["record"]["artist_id"], "art-fela");
        assert_eq!(body["record"]["title"], "Be My Husband");
    }

    #[tokio::test]
    async fn test_filters_on_mapped_foreign_keys() {
        let server = song_server(music_store(), ConfigLayer::new());

        let body: Value = server
            .get("/songs")
            .add_query_param("artist_id", "art-fela")
            .await
            .json();
        assert_eq!(column(&body, "title"), vec!["Zombie"]);

        let body: Value = server
            .get("/songs")
            .add_query_param("album_id:in", "alb-pastel,alb-nowhere")
            .await
            .json();
        assert_eq!(column(&body, "title"), vec!["Sinnerman", "Be My Husband"]);
    }

    #[tokio::test]
    async fn test_unresolvable_filter_ids() {
        let server = song_server(music_store(), ConfigLayer::new());

        let body: Value = server
            .get("/songs")
            .add_query_param("artist_id", "art-nobody")
            .await
            .json();
        assert_eq!(body["data"], json!([]));
        assert_eq!(body["meta"]["paging"]["count"], 0);

        let body: Value = server
            .get("/songs")
            .add_query_param("artist_id:neq", "art-nobody")
            .await
            .json();
        assert_eq!(body["data"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_range_operators_on_mapped_keys_are_rejected() {
        let server = song_server(music_store(), ConfigLayer::new());

        server
            .get("/songs")
            .add_query_param("artist_id:gt", "art-fela")
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }
}
