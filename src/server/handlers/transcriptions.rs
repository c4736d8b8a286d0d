use std::sync::Arc;

use axum::Json;
use axum::extract::{Request, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::GatewayError;
use crate::providers::{Transcript, TranscriptionParams, UploadFile, UploadSource};
use crate::server::AppState;
use crate::server::body::{FormFields, UploadedFilePart, is_multipart, read_multipart};
use crate::server::payload::{ControlFields, form_security_key, to_safe_filename};
use crate::server::request_logging::{finish, record_success, track};

const AUDIO_FIELDS: [&str; 2] = ["file", "audio"];

/// 音频取名为 file / audio 的部分，否则取第一个文件
fn pick_audio(mut files: Vec<UploadedFilePart>) -> Option<UploadedFilePart> {
    let idx = files
        .iter()
        .position(|f| AUDIO_FIELDS.contains(&f.field_name.as_str()))
        .or((!files.is_empty()).then_some(0))?;
    Some(files.swap_remove(idx))
}

fn transcription_params(fields: &FormFields, default_model: &str) -> TranscriptionParams {
    let text = |name: &str| fields.first_non_empty(&[name]).map(str::to_string);
    let timestamp_granularities = fields
        .get_all("timestamp_granularities[]")
        .iter()
        .chain(fields.get_all("timestamp_granularities"))
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect();
    TranscriptionParams {
        model: text("model").unwrap_or_else(|| default_model.to_string()),
        language: text("language"),
        prompt: text("prompt"),
        response_format: text("response_format"),
        temperature: text("temperature"),
        timestamp_granularities,
    }
}

pub async fn transcribe(State(app_state): State<Arc<AppState>>, req: Request) -> Response {
    let result = transcribe_inner(&app_state, req).await;
    finish(&app_state.diagnostics, "transcriptions", result)
}

async fn transcribe_inner(app_state: &AppState, req: Request) -> Result<Response, GatewayError> {
    if !is_multipart(req.headers()) {
        return Err(GatewayError::bad_request("expected multipart/form-data"));
    }
    let form = read_multipart(req).await?;
    app_state.guard.require(form_security_key(&form.fields).as_deref())?;

    let audio = pick_audio(form.files).ok_or_else(|| GatewayError::bad_request("no audio file in request"))?;
    let opts = ControlFields::from_form(&form.fields).call_options(&app_state.config.upstream)?;
    let params = transcription_params(&form.fields, &app_state.config.defaults.transcription_model);
    let filename = to_safe_filename(&audio.filename, "audio");
    let summary = json!({
        "model": params.model,
        "filename": filename,
        "size": audio.size(),
        "response_format": params.response_format,
    });

    let upstream = app_state.upstream.as_ref();
    let diag = app_state.diagnostics.as_ref();
    let transcript = if app_state.config.uploads.transcription_via_temp_file {
        app_state
            .temp
            .with_temp_file(&filename, &audio.bytes, |tmp| {
                let file = UploadFile {
                    filename: filename.clone(),
                    mime_type: audio.mime_type.clone(),
                    source: UploadSource::File {
                        file: tmp.file,
                        len: tmp.len,
                    },
                };
                async move { track(diag, upstream.transcribe_audio(&opts, file, params)).await }
            })
            .await?
    } else {
        let file = UploadFile {
            filename: filename.clone(),
            mime_type: audio.mime_type.clone(),
            source: UploadSource::Memory(audio.bytes),
        };
        track(diag, upstream.transcribe_audio(&opts, file, params)).await?
    };

    match transcript {
        Transcript::Json(value) => {
            record_success(diag, "transcriptions", &summary, &value, None);
            Ok(Json(value).into_response())
        }
        Transcript::Text(text) => {
            record_success(diag, "transcriptions", &summary, &json!(text), None);
            Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::routes;
    use super::*;
    use crate::server::body::tests::{TestPart, multipart_request};
    use crate::server::test_support::*;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    fn audio_part<'a>(name: &'a str, bytes: &'a [u8]) -> TestPart<'a> {
        TestPart::File {
            name,
            filename: Some("clip.m4a"),
            mime: Some("audio/mp4"),
            bytes,
        }
    }

    #[test]
    fn prefers_named_audio_part() {
        let part = |field: &str| UploadedFilePart {
            field_name: field.to_string(),
            filename: format!("{field}.bin"),
            mime_type: "audio/mpeg".to_string(),
            bytes: vec![1],
        };
        let picked = pick_audio(vec![part("attachment"), part("audio")]).unwrap();
        assert_eq!(picked.field_name, "audio");
        let picked = pick_audio(vec![part("attachment"), part("other")]).unwrap();
        assert_eq!(picked.field_name, "attachment");
        assert!(pick_audio(Vec::new()).is_none());
    }

    #[test]
    fn collects_params_with_defaults() {
        let mut fields = FormFields::default();
        fields.insert("language", "de");
        fields.insert("timestamp_granularities[]", "word");
        fields.insert("timestamp_granularities", "segment, word");
        let params = transcription_params(&fields, "whisper-1");
        assert_eq!(params.model, "whisper-1");
        assert_eq!(params.language.as_deref(), Some("de"));
        assert_eq!(params.prompt, None);
        assert_eq!(params.timestamp_granularities, vec!["word", "segment", "word"]);
    }

    #[tokio::test]
    async fn json_transcript_via_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockUpstream::default());
        let state = test_state(tmp.path(), mock.clone());
        let app = routes().with_state(state.clone());

        let req = multipart_request(
            "/transcriptions",
            &[
                TestPart::Text("security_key", SECRET),
                TestPart::Text("language", "en"),
                audio_part("file", b"RIFFdata"),
            ],
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["text"], "hello world");

        let (audio, params) = mock.transcriptions().remove(0);
        assert!(audio.streamed);
        assert_eq!(audio.filename, "clip.m4a");
        assert_eq!(audio.bytes, b"RIFFdata");
        assert_eq!(params.model, "whisper-1");
        assert_eq!(params.language.as_deref(), Some("en"));
        assert_eq!(temp_entries(tmp.path()), 0);
        assert_eq!(state.diagnostics.metrics.snapshot().request_count, 1);
    }

    #[tokio::test]
    async fn text_format_is_plain_text_and_can_skip_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockUpstream::default());
        let mut settings = test_settings(tmp.path());
        settings.uploads.transcription_via_temp_file = false;
        let state = Arc::new(crate::server::AppState::new(settings, mock.clone()));
        let app = routes().with_state(state);

        let req = multipart_request(
            "/transcriptions",
            &[
                TestPart::Text("security_key", SECRET),
                TestPart::Text("response_format", "srt"),
                audio_part("audio", b"ID3"),
            ],
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let ct = resp.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
        assert!(ct.starts_with("text/plain"));
        assert_eq!(body_text(resp).await, "hello world");
        assert!(!mock.transcriptions()[0].0.streamed);
        assert!(!tmp.path().join("uploads").exists());
    }

    #[tokio::test]
    async fn upstream_failure_cleans_up_and_relays() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockUpstream::failing(
            400,
            json!({"error": {"message": "Invalid file format."}}),
        ));
        let app = routes().with_state(test_state(tmp.path(), mock.clone()));

        let req = multipart_request(
            "/transcriptions",
            &[TestPart::Text("security_key", SECRET), audio_part("file", b"nope")],
        );
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["message"], "Invalid file format.");
        assert_eq!(temp_entries(tmp.path()), 0);
    }

    #[tokio::test]
    async fn missing_audio_or_secret_or_json_body() {
        let tmp = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockUpstream::default());
        let app = routes().with_state(test_state(tmp.path(), mock.clone()));

        let resp = app
            .clone()
            .oneshot(json_request("POST", "/transcriptions", json!({"security_key": SECRET})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .clone()
            .oneshot(multipart_request(
                "/transcriptions",
                &[TestPart::Text("security_key", SECRET), TestPart::Text("model", "whisper-1")],
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .oneshot(multipart_request("/transcriptions", &[audio_part("file", b"x")]))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(mock.total_calls(), 0);
        assert!(!tmp.path().join("uploads").exists());
    }
}
