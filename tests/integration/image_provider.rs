//! Image client against mock endpoints.

use crate::integration::test_utils::{png_base64, PNG_BYTES};
use gamiforge::job::ErrorKind;
use gamiforge::provider::image::encode_base64;
use gamiforge::provider::{ImageClient, ImageEndpoints, ImageModels, ImageOp};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> ImageClient {
    let base = server.uri();
    ImageClient::new(
        ImageEndpoints {
            txt2img: Some(format!("{}/txt2img", base)),
            img2img: Some(format!("{}/img2img", base)),
            rembg: Some(format!("{}/rembg", base)),
            edit: None,
            generate: Some(format!("{}/generate", base)),
        },
        ImageModels {
            sd_checkpoint: Some("sdxl.safetensors".to_string()),
            skybox_checkpoint: Some("sky.safetensors".to_string()),
            generate_model: Some("dall-e-3".to_string()),
        },
        None,
        Duration::from_secs(5),
        Duration::from_secs(10),
    )
    .unwrap()
}

#[tokio::test]
async fn test_skybox_txt2img_decodes_first_image() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/txt2img"))
        .and(body_partial_json(json!({
            "prompt": "panorama, misty forest",
            "width": 512,
            "override_settings": {"sd_model_checkpoint": "sky.safetensors"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"images": [png_base64()]})))
        .expect(1)
        .mount(&server)
        .await;

    let payload = client(&server)
        .run(&ImageOp::Txt2Img {
            prompt: "misty forest".to_string(),
            skybox: true,
        })
        .await
        .unwrap();
    let media = payload.as_media().unwrap();
    assert_eq!(media.content_type, "image/png");
    assert_eq!(media.bytes, PNG_BYTES);
}

#[tokio::test]
async fn test_background_removal_reads_image_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rembg"))
        .and(body_partial_json(json!({"model": "isnet-general-use", "input_image": "AAAA"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"image": png_base64()})))
        .mount(&server)
        .await;

    let payload = client(&server)
        .run(&ImageOp::RemoveBackground {
            image: "AAAA".to_string(),
        })
        .await
        .unwrap();
    assert!(payload.as_media().is_some());
}

#[tokio::test]
async fn test_generate_reads_data_array() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .and(body_partial_json(json!({"model": "dall-e-3", "size": "1024x1024", "n": 1})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": [{"b64_json": png_base64()}]})),
        )
        .mount(&server)
        .await;

    let payload = client(&server)
        .run(&ImageOp::Generate {
            prompt: "grass tile".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(payload.as_media().unwrap().bytes, PNG_BYTES);
}

#[tokio::test]
async fn test_non_image_payload_is_validation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/txt2img"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"images": [encode_base64(b"<html>error</html>")]})),
        )
        .mount(&server)
        .await;

    let failure = client(&server)
        .run(&ImageOp::Sprite {
            prompt: "cat".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(failure.kind, ErrorKind::Validation);
}

#[tokio::test]
async fn test_missing_image_field_is_validation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/txt2img"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"images": []})))
        .mount(&server)
        .await;

    let failure = client(&server)
        .run(&ImageOp::Sprite {
            prompt: "cat".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(failure.kind, ErrorKind::Validation);
    assert!(failure.message.contains("/images/0"));
}

#[tokio::test]
async fn test_unconfigured_endpoint() {
    let server = MockServer::start().await;
    let images = client(&server);
    let op = ImageOp::Edit {
        prompt: "make it red".to_string(),
        image: "AAAA".to_string(),
    };
    assert!(!images.supports(&op));
    let failure = images.run(&op).await.unwrap_err();
    assert_eq!(failure.kind, ErrorKind::Validation);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_server_error_is_transport() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/img2img"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let failure = client(&server)
        .run(&ImageOp::Outpaint {
            prompt: "wider".to_string(),
            image: "AAAA".to_string(),
        })
        .await
        .unwrap_err();
    assert_eq!(failure.kind, ErrorKind::Transport);
}
