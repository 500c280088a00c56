//! Generation flows end to end against mock providers.

use crate::integration::test_utils::{generation_context, png_base64, PNG_BYTES, WAV_BYTES};
use gamiforge::dispatch::DispatchConfig;
use gamiforge::generation::{
    analyze_state, asset_requests, describe, generate_sections, generate_sounds,
    generate_visuals, hotload, regenerate_block, AssetRequest, BlockKind, GenerationContext,
    LedgerOperation,
};
use gamiforge::job::ErrorKind;
use gamiforge::merge::{StateDocument, StateRecord};
use gamiforge::provider::SoundType;
use gamiforge::store::Ledger;
use serde_json::{json, Value};
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn section_response(section: &str) -> Value {
    match section {
        "player" => json!({
            "name": "Whiskers", "speed": 4.5, "jump_height": 3.0, "health": 3,
            "abilities": ["double_jump"]
        }),
        "world" => json!({
            "theme": "rooftops", "gravity": 9.8, "width": 4000, "background_color": "#223344"
        }),
        "objects" => json!({"objects": [{"name": "fish", "role": "collectable", "points": 10}]}),
        "spawn" => json!({
            "rules": [{"object": "fish", "frequency": 0.3, "min_height": 1.0, "max_height": 4.0}]
        }),
        other => panic!("no fixture for {}", other),
    }
}

async fn mount_section(server: &MockServer, section: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/llm"))
        .and(body_partial_json(
            json!({"response_format": {"json_schema": {"name": section}}}),
        ))
        .respond_with(response)
        .mount(server)
        .await;
}

async fn mount_image(server: &MockServer, endpoint: &str, body: Value) {
    Mock::given(method("POST"))
        .and(path(endpoint))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn context(workspace: &TempDir, server: &MockServer) -> GenerationContext {
    generation_context(workspace, &server.uri(), DispatchConfig::default())
}

#[tokio::test]
async fn test_sections_not_written_on_partial_failure() {
    let server = MockServer::start().await;
    for section in ["player", "world"] {
        mount_section(
            &server,
            section,
            ResponseTemplate::new(200).set_body_json(section_response(section)),
        )
        .await;
    }
    mount_section(&server, "objects", ResponseTemplate::new(500)).await;

    let workspace = TempDir::new().unwrap();
    let ctx = context(&workspace, &server);
    let result = generate_sections(&ctx, "a cat on rooftops").await.unwrap();

    assert_eq!(result.report.success_count, 2);
    assert_eq!(
        result.report.by_label("objects").unwrap().failure().unwrap().kind,
        ErrorKind::Transport
    );
    assert!(result.written.is_none());
    assert!(ctx.store.read_config().unwrap().is_none());
}

#[tokio::test]
async fn test_sections_written_when_all_succeed() {
    let server = MockServer::start().await;
    for section in ["player", "world", "objects"] {
        mount_section(
            &server,
            section,
            ResponseTemplate::new(200).set_body_json(section_response(section)),
        )
        .await;
    }

    let workspace = TempDir::new().unwrap();
    let ctx = context(&workspace, &server);
    let result = generate_sections(&ctx, "a cat on rooftops").await.unwrap();

    assert!(result.report.all_succeeded());
    assert_eq!(result.written.as_deref(), Some(ctx.store.config_path().as_path()));
    let config = ctx.store.read_config().unwrap().unwrap();
    assert_eq!(config["player"]["name"], "Whiskers");
    assert_eq!(config["world"]["theme"], "rooftops");
    assert_eq!(config["objects"]["objects"][0]["points"], 10);
}

fn description_doc(player: &str) -> Value {
    json!({
        "player": {"description": player, "asset_ref": "N/A", "need_update": true},
        "world": {"description": "rooftops", "asset_ref": "N/A", "need_update": false},
        "platforms": [{
            "name": "chimney", "description": "brick chimney", "behavior": "static",
            "effect": "none", "asset_ref": "N/A", "need_update": false
        }],
        "collectables": [{
            "name": "fish", "description": "silver fish", "behavior": "floats",
            "effect": "+10 points", "asset_ref": "N/A", "need_update": false
        }],
        "narrative": {"transition": "", "current_story": "a cat", "next_story": ""},
        "visual_style": "pixel art"
    })
}

async fn mount_description(server: &MockServer, operation: &str, doc: Value) {
    Mock::given(method("POST"))
        .and(path("/llm"))
        .and(body_string_contains(format!("Operation: {}", operation)))
        .and(body_partial_json(
            json!({"response_format": {"json_schema": {"name": "game_description"}}}),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(doc))
        .mount(server)
        .await;
}

fn seed_ledger(ctx: &GenerationContext) {
    let mut ledger = ctx.store.open_ledger().unwrap();
    ledger.append("initialize:cats", description_doc("a cat")).unwrap();
    ledger.append("add night:make it night", description_doc("a night cat")).unwrap();
}

#[tokio::test]
async fn test_describe_operations_update_ledger() {
    let server = MockServer::start().await;
    mount_description(&server, "initialize", description_doc("a cat")).await;
    mount_description(&server, "add night", description_doc("a night cat")).await;
    mount_description(&server, "regenerate", description_doc("a moonlit cat")).await;

    let workspace = TempDir::new().unwrap();
    let ctx = context(&workspace, &server);

    describe(&ctx, &LedgerOperation::Initialize, "cats").await.unwrap();
    describe(&ctx, &LedgerOperation::parse("add night"), "make it night")
        .await
        .unwrap();
    let entries = Ledger::read_entries(&ctx.store.ledger_path()).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].id, "initialize:cats");
    assert_eq!(entries[1].id, "add night:make it night");

    describe(&ctx, &LedgerOperation::Regenerate, "again").await.unwrap();
    let entries = Ledger::read_entries(&ctx.store.ledger_path()).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].id, "regenerate:again");
    assert_eq!(entries[1].content["player"]["description"], "a moonlit cat");
    assert!(ctx
        .current_description()
        .unwrap()
        .unwrap()
        .contains("a moonlit cat"));

    // Initialize starts over.
    describe(&ctx, &LedgerOperation::Initialize, "dogs").await.unwrap();
    let entries = Ledger::read_entries(&ctx.store.ledger_path()).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, "initialize:dogs");
}

#[tokio::test]
async fn test_failed_description_leaves_ledger_unchanged() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/llm"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let workspace = TempDir::new().unwrap();
    let ctx = context(&workspace, &server);
    seed_ledger(&ctx);
    let before = Ledger::read_entries(&ctx.store.ledger_path()).unwrap();

    for operation in [
        LedgerOperation::parse("revise"),
        LedgerOperation::Regenerate,
        LedgerOperation::Initialize,
    ] {
        let report = describe(&ctx, &operation, "more fish").await.unwrap();
        assert_eq!(report.failure_count, 1, "{}", operation);
        assert_eq!(
            Ledger::read_entries(&ctx.store.ledger_path()).unwrap(),
            before,
            "{}",
            operation
        );
    }
    // The claim is released after each call.
    assert!(ctx.store.open_ledger().is_ok());
}

#[tokio::test]
async fn test_description_not_matching_schema_is_not_recorded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/llm"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"player": "a cat"})))
        .mount(&server)
        .await;

    let workspace = TempDir::new().unwrap();
    let ctx = context(&workspace, &server);
    seed_ledger(&ctx);

    let report = describe(&ctx, &LedgerOperation::Regenerate, "again").await.unwrap();
    assert_eq!(
        report.by_label("description").unwrap().failure().unwrap().kind,
        ErrorKind::Validation
    );
    assert_eq!(Ledger::read_entries(&ctx.store.ledger_path()).unwrap().len(), 2);
}

#[tokio::test]
async fn test_hotload_selects_recorded_entry() {
    let server = MockServer::start().await;
    let workspace = TempDir::new().unwrap();
    let ctx = context(&workspace, &server);
    assert!(hotload(&ctx, "").is_err());

    seed_ledger(&ctx);
    assert_eq!(hotload(&ctx, "").unwrap().id, "add night:make it night");
    assert_eq!(hotload(&ctx, "0").unwrap().id, "initialize:cats");
    assert_eq!(hotload(&ctx, "-2").unwrap().id, "initialize:cats");
    assert!(hotload(&ctx, "2").is_err());
    assert!(hotload(&ctx, "latest").is_err());
    assert!(matches!(
        describe(&ctx, &LedgerOperation::Hotload, "0").await,
        Err(gamiforge::error::ForgeError::GenerationFailed(_))
    ));
    assert_eq!(Ledger::read_entries(&ctx.store.ledger_path()).unwrap().len(), 2);
}

#[tokio::test]
async fn test_asset_requests_follow_need_update_flags() {
    let server = MockServer::start().await;
    let workspace = TempDir::new().unwrap();
    let ctx = context(&workspace, &server);

    let mut doc = description_doc("a cat");
    doc["player"]["need_update"] = json!(false);
    doc["collectables"] = json!([
        {"name": "fish", "description": "silver fish", "behavior": "floats",
         "effect": "+10", "asset_ref": "N/A", "need_update": false},
        {"name": "Golden Bell", "description": "a golden bell", "behavior": "rings",
         "effect": "+50", "asset_ref": "N/A", "need_update": true}
    ]);

    let requests = asset_requests(&ctx, &doc).unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].name, "golden_bell");
    assert!(requests[0].prompt.contains("a golden bell; pixel art"));
    assert!(requests[0].reference.is_none());

    // Plain text regenerates the default set.
    let names: Vec<String> = asset_requests(&ctx, &json!("a cat game"))
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["player", "world", "platforms", "collectables"]);
}

#[tokio::test]
async fn test_asset_ref_points_at_state_record_file() {
    let server = MockServer::start().await;
    let workspace = TempDir::new().unwrap();
    let ctx = context(&workspace, &server);
    ctx.store
        .state()
        .save(&StateDocument::new(vec![StateRecord::new("img-1", json!("raw"))
            .with_field("dataType", json!("image"))
            .with_field("fileUrl", json!("http://localhost:8000/files/cat_photo.png"))]))
        .unwrap();

    let mut doc = description_doc("a cat");
    doc["player"]["asset_ref"] = json!("img-1");
    let requests = asset_requests(&ctx, &doc).unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].reference.as_deref(),
        Some(ctx.assets.primary().join("cat_photo.png").as_path())
    );
}

#[tokio::test]
async fn test_analysis_writes_results_and_error_markers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/llm"))
        .and(body_string_contains("cdn.example/a.png"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "description": "a red fish", "colors": ["red"], "role": "collectable"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/llm"))
        .and(body_string_contains("cdn.example/b.png"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let workspace = TempDir::new().unwrap();
    let ctx = context(&workspace, &server);
    let image = |id: &str, content: Value| {
        StateRecord::new(id, content).with_field("dataType", json!("image"))
    };
    ctx.store
        .state()
        .save(&StateDocument::new(vec![
            image("a", json!("raw")).with_field("url", json!("https://cdn.example/a.png")),
            image("b", json!("raw")).with_field("url", json!("https://cdn.example/b.png")),
            image("c", json!("raw")),
            image("d", json!({"description": "done"}))
                .with_field("url", json!("https://cdn.example/d.png")),
            StateRecord::new("t", json!("notes")).with_field("dataType", json!("text")),
        ]))
        .unwrap();

    let report = analyze_state(&ctx).await.unwrap();

    assert_eq!(report.len(), 3);
    assert_eq!(report.success_count, 1);
    let state = ctx.store.state().load().unwrap();
    assert_eq!(state.get("a").unwrap().content["role"], "collectable");
    assert!(state.get("b").unwrap().content.get("error").is_some());
    assert!(state.get("c").unwrap().content.get("error").is_some());
    assert_eq!(state.get("d").unwrap().content, json!({"description": "done"}));
    assert_eq!(state.get("t").unwrap().content, json!("notes"));

    // Nothing is claimed after the run.
    assert!(ctx.store.state().begin_update().is_ok());
}

#[tokio::test]
async fn test_visuals_persist_final_stages_only() {
    let server = MockServer::start().await;
    mount_image(&server, "/txt2img", json!({"images": [png_base64()]})).await;
    Mock::given(method("POST"))
        .and(path("/rembg"))
        .and(body_partial_json(json!({"input_image": png_base64()})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"image": png_base64()})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/img2img"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let workspace = TempDir::new().unwrap();
    let ctx = context(&workspace, &server);
    let requests = vec![
        AssetRequest {
            name: "player".to_string(),
            prompt: "an orange cat".to_string(),
            reference: None,
        },
        AssetRequest {
            name: "world".to_string(),
            prompt: "night rooftops".to_string(),
            reference: None,
        },
    ];

    let report = generate_visuals(&ctx, &requests, Some("v2")).await.unwrap();

    assert_eq!(report.len(), 4);
    assert!(report.by_label("world.base").unwrap().is_success());
    assert_eq!(
        report.by_label("world.final").unwrap().failure().unwrap().kind,
        ErrorKind::Transport
    );
    assert_eq!(report.persisted.len(), 1);

    let mut files: Vec<String> = std::fs::read_dir(ctx.assets.primary())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    files.sort();
    assert_eq!(files, vec!["player_v2.png".to_string()]);
    assert_eq!(
        std::fs::read(ctx.assets.primary().join("player_v2.png")).unwrap(),
        PNG_BYTES
    );
}

#[tokio::test]
async fn test_unreadable_reference_fails_only_its_chain() {
    let server = MockServer::start().await;
    mount_image(&server, "/txt2img", json!({"images": [png_base64()]})).await;
    mount_image(&server, "/img2img", json!({"images": [png_base64()]})).await;

    let workspace = TempDir::new().unwrap();
    let ctx = context(&workspace, &server);
    let requests = vec![
        AssetRequest {
            name: "player".to_string(),
            prompt: "an orange cat".to_string(),
            reference: Some(workspace.path().join("missing_reference.png")),
        },
        AssetRequest {
            name: "world".to_string(),
            prompt: "night rooftops".to_string(),
            reference: None,
        },
    ];

    let report = generate_visuals(&ctx, &requests, None).await.unwrap();

    assert_eq!(
        report.by_label("player.base").unwrap().failure().unwrap().kind,
        ErrorKind::Validation
    );
    assert_eq!(
        report.by_label("player.final").unwrap().failure().unwrap().kind,
        ErrorKind::UpstreamFailed
    );
    assert!(report.by_label("world.final").unwrap().is_success());
    assert!(ctx.assets.primary().join("world.png").exists());
    assert!(!ctx.assets.primary().join("player.png").exists());
}

#[tokio::test]
async fn test_sounds_fall_back_when_prompt_derivation_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/llm"))
        .and(body_string_contains("AMBIENT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!("soft night wind")))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/llm"))
        .and(body_string_contains("JUMP"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/audio"))
        .and(body_partial_json(json!({"prompt": "soft night wind", "length": "6"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(WAV_BYTES.to_vec(), "audio/wav"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/audio"))
        .and(body_partial_json(json!({"prompt": "jump sound effect", "length": "1"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(WAV_BYTES.to_vec(), "audio/wav"))
        .expect(1)
        .mount(&server)
        .await;

    let workspace = TempDir::new().unwrap();
    let ctx = context(&workspace, &server);
    let report = generate_sounds(
        &ctx,
        "a cat on rooftops",
        &[SoundType::Ambient, SoundType::Jump],
    )
    .await
    .unwrap();

    assert_eq!(report.prompts.failure_count, 1);
    assert!(report.audio.all_succeeded());
    assert_eq!(report.audio.persisted.len(), 2);
    assert!(ctx.assets.primary().join("ambient.wav").exists());
    assert!(ctx.assets.primary().join("jump.wav").exists());
}

#[tokio::test]
async fn test_object_block_runs_spawn_after_config() {
    let server = MockServer::start().await;
    for section in ["objects", "spawn"] {
        mount_section(
            &server,
            section,
            ResponseTemplate::new(200).set_body_json(section_response(section)),
        )
        .await;
    }
    mount_image(&server, "/txt2img", json!({"images": [png_base64()]})).await;
    mount_image(&server, "/rembg", json!({"image": png_base64()})).await;

    let workspace = TempDir::new().unwrap();
    let mut ctx = context(&workspace, &server);
    ctx.soft_wait = Duration::from_secs(5);
    ctx.store
        .write_config(&json!({"player": {"name": "Whiskers"}}))
        .unwrap();

    let report = regenerate_block(&ctx, BlockKind::Object, "golden fish worth more", None)
        .await
        .unwrap();

    assert!(report.all_succeeded(), "{:?}", report.failures().collect::<Vec<_>>());
    assert!(ctx.assets.primary().join("object.png").exists());
    let config = ctx.store.read_config().unwrap().unwrap();
    assert_eq!(config["player"]["name"], "Whiskers");
    assert_eq!(config["objects"]["objects"][0]["name"], "fish");
    assert_eq!(config["spawn"]["rules"][0]["object"], "fish");
}

#[tokio::test]
async fn test_object_block_spawn_skipped_when_config_fails() {
    let server = MockServer::start().await;
    mount_section(&server, "objects", ResponseTemplate::new(400)).await;
    mount_section(
        &server,
        "spawn",
        ResponseTemplate::new(200).set_body_json(section_response("spawn")),
    )
    .await;
    mount_image(&server, "/txt2img", json!({"images": [png_base64()]})).await;
    mount_image(&server, "/rembg", json!({"image": png_base64()})).await;

    let workspace = TempDir::new().unwrap();
    let ctx = context(&workspace, &server);
    let report = regenerate_block(&ctx, BlockKind::Object, "spiky crates", None)
        .await
        .unwrap();

    assert_eq!(
        report.by_label("object.spawn").unwrap().failure().unwrap().kind,
        ErrorKind::UpstreamFailed
    );
    // The asset chain is independent of the config.
    assert!(report.by_label("object.final").unwrap().is_success());
    assert!(ctx.store.read_config().unwrap().is_none());
}

#[tokio::test]
async fn test_flows_require_configured_providers() {
    let workspace = TempDir::new().unwrap();
    let ctx = GenerationContext::from_config(
        &gamiforge::config::ForgeConfig::default(),
        workspace.path(),
        "bare",
    )
    .unwrap();
    assert!(matches!(
        generate_sections(&ctx, "anything").await,
        Err(gamiforge::error::ForgeError::ProviderError(_))
    ));
}
