//! Upload manager against an in-process fake detection service.
//!
//! Run with:
//!   cargo test --test upload

mod common;

use common::{accept, frame_success, FakeService, Reply};
use formula_capture::{
    CandidateFile, ClientConfig, Endpoint, UploadError, UploadManager, UploadState,
};
use std::time::Duration;
use tokio_stream::StreamExt;

const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0xFF, 0xD9];

// ── Encodings ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn camera_frame_is_sent_as_raw_jpeg() {
    let service = FakeService::always(frame_success("a^2+b^2=c^2")).await;
    let uploads = UploadManager::new(&service.config()).unwrap();

    let file = accept(CandidateFile::camera_frame(JPEG.to_vec()), 0).await;
    let task = uploads.submit(file);
    assert_eq!(task.endpoint(), Endpoint::Frame);

    let UploadState::Succeeded(result) = task.outcome().await else {
        panic!("expected success, got {:?}", task.state());
    };
    assert_eq!(result.entries[0].formula, "a^2+b^2=c^2");
    assert!(result.entries[0].rendered_image.is_some());

    let requests = service.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/api/procesar_fotograma/");
    assert_eq!(requests[0].content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(&requests[0].body[..], JPEG);
}

#[tokio::test]
async fn user_image_is_sent_as_multipart_imagen() {
    let service = FakeService::always(Reply::json(
        200,
        serde_json::json!({
            "message": "Imagen procesada",
            "problema": {"formula": "y=mx+b", "tipo": "lineal", "latex_image": ""}
        }),
    ))
    .await;
    let uploads = UploadManager::new(&service.config()).unwrap();

    let file = accept(
        CandidateFile::user_file("photo.png", "image/png", vec![7u8; 2048]),
        0,
    )
    .await;
    let state = uploads.submit(file).outcome().await;
    assert!(matches!(state, UploadState::Succeeded(ref r) if r.entries[0].kind == "lineal"));

    let req = &service.requests()[0];
    assert_eq!(req.path, "/api/procesar_imagen/");
    assert!(req
        .content_type
        .as_deref()
        .unwrap()
        .starts_with("multipart/form-data"));
    assert!(req.body_contains(r#"name="imagen""#));
    assert!(req.body_contains(r#"filename="photo.png""#));
    assert!(req.body_contains("Content-Type: image/png"));
}

#[tokio::test]
async fn user_document_is_sent_as_multipart_pdf() {
    let service = FakeService::always(Reply::json(
        200,
        serde_json::json!({"message": "ok", "problemas": []}),
    ))
    .await;
    let uploads = UploadManager::new(&service.config()).unwrap();

    let file = accept(
        CandidateFile::user_file("sheet.pdf", "application/pdf", b"%PDF-1.7 ...".to_vec()),
        2,
    )
    .await;
    assert_eq!(file.page_count(), Some(2));
    let state = uploads.submit(file).outcome().await;
    assert!(matches!(state, UploadState::Succeeded(ref r) if r.entries.is_empty()));

    let req = &service.requests()[0];
    assert_eq!(req.path, "/api/procesar_pdf/");
    assert!(req.body_contains(r#"name="pdf""#));
}

// ── Classification ───────────────────────────────────────────────────────────

#[tokio::test]
async fn not_found_is_a_soft_no_detection() {
    let service =
        FakeService::always(Reply::text(404, "No se detectó ninguna fórmula en el fotograma"))
            .await;
    let uploads = UploadManager::new(&service.config()).unwrap();

    let state = uploads
        .submit(accept(CandidateFile::camera_frame(JPEG.to_vec()), 0).await)
        .outcome()
        .await;
    assert_eq!(
        state,
        UploadState::NoDetection {
            message: "No se detectó ninguna fórmula en el fotograma".into()
        }
    );
}

#[tokio::test]
async fn server_error_is_failed_with_its_message() {
    let service = FakeService::always(Reply::json(
        500,
        serde_json::json!({"error": "Error al procesar la imagen"}),
    ))
    .await;
    let uploads = UploadManager::new(&service.config()).unwrap();

    let state = uploads
        .submit(accept(CandidateFile::user_file("a.jpg", "image/jpeg", JPEG.to_vec()), 0).await)
        .outcome()
        .await;
    let UploadState::Failed(err) = state else {
        panic!("expected failure");
    };
    assert_eq!(err.user_message(), "Error al procesar la imagen");
}

#[tokio::test]
async fn unreachable_service_is_a_transport_failure() {
    // Bind and drop to get a port nothing listens on.
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let config = ClientConfig::builder()
        .base_url(format!("http://127.0.0.1:{port}"))
        .build()
        .unwrap();
    let uploads = UploadManager::new(&config).unwrap();

    let state = uploads
        .submit(accept(CandidateFile::camera_frame(JPEG.to_vec()), 0).await)
        .outcome()
        .await;
    assert!(matches!(state, UploadState::Failed(UploadError::Transport { .. })));
}

// ── Progress, supersede, credentials ─────────────────────────────────────────

#[tokio::test]
async fn progress_is_monotonic_and_ends_complete() {
    let service = FakeService::always(Reply::json(
        200,
        serde_json::json!({"problemas": [{"formula": "x", "tipo": "t"}]}),
    ))
    .await;
    let config = ClientConfig::builder()
        .base_url(service.base_url.clone())
        .upload_chunk_size(1024)
        .build()
        .unwrap();
    let uploads = UploadManager::new(&config).unwrap();

    let file = accept(
        CandidateFile::user_file("big.pdf", "application/pdf", vec![1u8; 256 * 1024]),
        1,
    )
    .await;
    let task = uploads.submit(file);

    let mut seen = Vec::new();
    let mut updates = task.updates();
    while let Some(state) = updates.next().await {
        let terminal = state.is_terminal();
        seen.push(state.progress());
        if terminal {
            break;
        }
    }
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {seen:?}");
    assert_eq!(seen.last().copied(), Some(1.0));
    assert!(service.requests()[0].body.len() > 256 * 1024);
}

#[tokio::test]
async fn new_submit_cancels_the_previous_upload() {
    let service = FakeService::start(|_, index| {
        let reply = frame_success(if index == 0 { "old" } else { "new" });
        if index == 0 {
            reply.delayed(Duration::from_secs(30))
        } else {
            reply
        }
    })
    .await;
    let uploads = UploadManager::new(&service.config()).unwrap();

    let first = uploads.submit(accept(CandidateFile::camera_frame(JPEG.to_vec()), 0).await);
    // Let the first request reach the service.
    for _ in 0..100 {
        if !service.requests().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let second = uploads.submit(accept(CandidateFile::camera_frame(JPEG.to_vec()), 0).await);
    assert_eq!(first.outcome().await, UploadState::Cancelled);
    let UploadState::Succeeded(result) = second.outcome().await else {
        panic!("second upload should succeed");
    };
    assert_eq!(result.entries[0].formula, "new");
    // The cancelled task stays cancelled.
    assert_eq!(first.state(), UploadState::Cancelled);
}

#[tokio::test]
async fn session_cookie_goes_out_with_every_request() {
    let service = FakeService::always(frame_success("z")).await;
    let config = ClientConfig::builder()
        .base_url(service.base_url.clone())
        .session_cookie("sessionid=abc123")
        .build()
        .unwrap();
    let uploads = UploadManager::new(&config).unwrap();

    uploads
        .submit(accept(CandidateFile::camera_frame(JPEG.to_vec()), 0).await)
        .outcome()
        .await;
    uploads.text_to_latex("equis").await.ok();

    let requests = service.requests();
    assert_eq!(requests.len(), 2);
    for req in requests {
        assert!(
            req.cookie.as_deref().unwrap_or("").contains("sessionid=abc123"),
            "missing cookie on {}",
            req.path
        );
    }
}

#[tokio::test]
async fn text_is_converted_to_latex() {
    let service = FakeService::start(|req, _| {
        assert_eq!(req.path, "/api/procesar_texto/");
        Reply::json(200, serde_json::json!({"latex": "x^{2}"}))
    })
    .await;
    let uploads = UploadManager::new(&service.config()).unwrap();

    let latex = uploads.text_to_latex("x al cuadrado").await.unwrap();
    assert_eq!(latex, "x^{2}");

    let req = &service.requests()[0];
    let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
    assert_eq!(body["texto"], "x al cuadrado");
}
