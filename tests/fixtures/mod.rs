//! Shared schemas, seed data and server construction for integration tests

#![allow(dead_code)]

use axum_test::TestServer;
use restshape::prelude::*;

/// `Item{id, external_id unique, name}` exposed by its external id
pub fn item_registry() -> EntityRegistry {
    EntityRegistry::new().with(
        EntityDescriptor::new("item")
            .attribute(Attribute::primary_key("id", AttributeType::Integer))
            .attribute(Attribute::new("external_id", AttributeType::String).unique())
            .attribute(Attribute::new("name", AttributeType::String).required())
            .defaults(ConfigLayer::new().set("id_mapping", "external_id")),
    )
}

/// `product{id, name, price, secret}` with an owner column for scoping hooks
pub fn product_registry() -> EntityRegistry {
    EntityRegistry::new()
        .with(
            EntityDescriptor::new("product")
                .attribute(Attribute::primary_key("id", AttributeType::Integer))
                .attribute(Attribute::new("name", AttributeType::String).required())
                .attribute(Attribute::new("price", AttributeType::Float))
                .attribute(Attribute::new("secret", AttributeType::String))
                .attribute(Attribute::new("owner", AttributeType::String)),
        )
        .with(
            EntityDescriptor::new("audit")
                .attribute(Attribute::primary_key("id", AttributeType::Integer))
                .attribute(Attribute::new("message", AttributeType::String)),
        )
}

pub fn product_store() -> InMemoryStore {
    let store = InMemoryStore::new(product_registry());
    store
        .seed(
            "product",
            vec![
                json!({"id": 1, "name": "Widget", "price": 9.5, "secret": "a", "owner": "alice"}),
                json!({"id": 2, "name": "Anvil", "price": 120.0, "secret": "b", "owner": "bob"}),
                json!({"id": 3, "name": "Gizmo", "price": 42.0, "secret": "c", "owner": "alice"}),
            ],
        )
        .expect("seed products");
    store
}

/// Artists and albums exposed by external ids, songs referencing both,
/// tags joined to songs through `song_tag`
pub fn music_registry() -> EntityRegistry {
    EntityRegistry::new()
        .with(
            EntityDescriptor::new("artist")
                .attribute(Attribute::primary_key("id", AttributeType::Integer))
                .attribute(Attribute::new("external_id", AttributeType::String).unique())
                .attribute(Attribute::new("name", AttributeType::String).required())
                .attribute(Attribute::new("country", AttributeType::String))
                .association(Association::has_many("songs", "song", "artist_id"))
                .defaults(ConfigLayer::new().set("id_mapping", "external_id")),
        )
        .with(
            EntityDescriptor::new("album")
                .attribute(Attribute::primary_key("id", AttributeType::Integer))
                .attribute(Attribute::new("external_id", AttributeType::String).unique())
                .attribute(Attribute::new("title", AttributeType::String).required())
                .defaults(ConfigLayer::new().set("idMapping", "external_id")),
        )
        .with(
            EntityDescriptor::new("tag")
                .attribute(Attribute::primary_key("id", AttributeType::Integer))
                .attribute(Attribute::new("label", AttributeType::String)),
        )
        .with(
            EntityDescriptor::new("song_tag")
                .attribute(Attribute::primary_key("id", AttributeType::Integer))
                .attribute(Attribute::new("song_id", AttributeType::Integer))
                .attribute(Attribute::new("tag_id", AttributeType::Integer))
                .attribute(Attribute::new("weight", AttributeType::Integer)),
        )
        .with(
            EntityDescriptor::new("song")
                .attribute(Attribute::primary_key("id", AttributeType::Integer))
                .attribute(Attribute::new("title", AttributeType::String).required())
                .attribute(Attribute::new("artist_id", AttributeType::Integer))
                .attribute(Attribute::new("album_id", AttributeType::Integer))
                .association(Association::belongs_to("artist", "artist", "artist_id"))
                .association(Association::belongs_to("album", "album", "album_id"))
                .association(Association::belongs_to_many(
                    "tags",
                    "tag",
                    Through {
                        entity: "song_tag".to_string(),
                        source_key: "song_id".to_string(),
                        target_key: "tag_id".to_string(),
                    },
                )),
        )
}

pub fn music_store() -> InMemoryStore {
    let store = InMemoryStore::new(music_registry());
    store
        .seed(
            "artist",
            vec![
                json!({"id": 1, "external_id": "art-nina", "name": "Nina Simone", "country": "US"}),
                json!({"id": 2, "external_id": "art-fela", "name": "Fela Kuti", "country": "NG"}),
            ],
        )
        .expect("seed artists");
    store
        .seed(
            "album",
            vec![
                json!({"id": 10, "external_id": "alb-pastel", "title": "Pastel Blues"}),
                json!({"id": 11, "external_id": "alb-zombie", "title": "Zombie"}),
            ],
        )
        .expect("seed albums");
    store
        .seed(
            "song",
            vec![
                json!({"id": 1, "title": "Sinnerman", "artist_id": 1, "album_id": 10}),
                json!({"id": 2, "title": "Zombie", "artist_id": 2, "album_id": 11}),
                json!({"id": 3, "title": "Be My Husband", "artist_id": 1, "album_id": 10}),
            ],
        )
        .expect("seed songs");
    store
        .seed(
            "tag",
            vec![
                json!({"id": 1, "label": "jazz"}),
                json!({"id": 2, "label": "afrobeat"}),
                json!({"id": 3, "label": "live"}),
            ],
        )
        .expect("seed tags");
    store
        .seed(
            "song_tag",
            vec![
                json!({"id": 1, "song_id": 1, "tag_id": 1, "weight": 5}),
                json!({"id": 2, "song_id": 1, "tag_id": 3, "weight": 1}),
                json!({"id": 3, "song_id": 2, "tag_id": 2, "weight": 5}),
            ],
        )
        .expect("seed song tags");
    store
}

pub fn test_server(builder: ServerBuilder) -> TestServer {
    let app = builder.build().expect("Failed to build app");
    TestServer::new(app).expect("Failed to create test server")
}

/// Extract a string column from a list response
pub fn column<'a>(body: &'a Value, field: &str) -> Vec<&'a str> {
    body["data"]
        .as_array()
        .expect("data array")
        .iter()
        .filter_map(|row| row[field].as_str())
        .collect()
}
