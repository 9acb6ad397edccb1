//! HTTP loader against a mock server.

mod common;

use assert_matches::assert_matches;
use tsforged::io::{
    self, DataSource, FetchLoader, Loader, LoaderError, LoaderRange, LoaderResponse,
    ParamSeekHandler, RangeSeekHandler,
};
use std::time::Duration;
use tsforged::transmux::{
    MediaDataSource, MediaSegmentSource, TransmuxCommand, TransmuxEvent, TransmuxingController,
};
use tsforged_common::TransmuxConfig;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn range_loader(config: &TransmuxConfig) -> FetchLoader {
    FetchLoader::new(config, Box::new(RangeSeekHandler::new(false))).unwrap()
}

async fn read_all(response: &mut Box<dyn LoaderResponse>) -> Vec<u8> {
    let mut body = Vec::new();
    while let Some(chunk) = response.next_chunk().await.unwrap() {
        body.extend_from_slice(&chunk);
    }
    body
}

#[tokio::test]
async fn range_request_carries_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/video.ts"))
        .and(header("Range", "bytes=100-"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![7u8; 50]))
        .expect(1)
        .mount(&server)
        .await;

    let loader = range_loader(&TransmuxConfig::default());
    let source = DataSource::new(format!("{}/video.ts", server.uri()));
    let mut response = loader.open(&source, LoaderRange::from(100)).await.unwrap();

    assert_eq!(response.content_length(), Some(50));
    assert_eq!(response.redirected_url(), None);
    assert_eq!(read_all(&mut response).await, vec![7u8; 50]);
}

#[tokio::test]
async fn configured_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/video.ts"))
        .and(header("Authorization", "Bearer abc"))
        .and(header("Referrer-Policy", "no-referrer"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 10]))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = TransmuxConfig {
        referrer_policy: Some("no-referrer".to_string()),
        ..Default::default()
    };
    config
        .headers
        .insert("Authorization".to_string(), "Bearer abc".to_string());

    let loader = range_loader(&config);
    let source = DataSource::new(format!("{}/video.ts", server.uri()));
    let mut response = loader.open(&source, LoaderRange::default()).await.unwrap();
    assert_eq!(read_all(&mut response).await.len(), 10);
}

#[tokio::test]
async fn error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.ts"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let loader = range_loader(&TransmuxConfig::default());
    let source = DataSource::new(format!("{}/missing.ts", server.uri()));
    let result = loader.open(&source, LoaderRange::default()).await;

    assert_matches!(
        result.err(),
        Some(LoaderError::HttpStatusCodeInvalid { code: 404, .. })
    );
}

#[tokio::test]
async fn redirect_is_detected_and_cleaned() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old.ts"))
        .and(query_param("bstart", "188"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", format!("{}/new.ts?bstart=188", server.uri()).as_str()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new.ts"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x47u8; 188]))
        .mount(&server)
        .await;

    let loader = FetchLoader::new(
        &TransmuxConfig::default(),
        Box::new(ParamSeekHandler::new("bstart", "bend")),
    )
    .unwrap();
    let source = DataSource::new(format!("{}/old.ts", server.uri()));
    let mut response = loader.open(&source, LoaderRange::from(188)).await.unwrap();

    let expected = format!("{}/new.ts", server.uri());
    assert_eq!(response.redirected_url(), Some(expected.as_str()));
    assert_eq!(read_all(&mut response).await.len(), 188);
}

#[tokio::test]
async fn http_source_runs_through_the_pipeline() {
    let server = MockServer::start().await;
    let stream = common::adts_program(20);
    Mock::given(method("GET"))
        .and(path("/live/audio.ts"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(stream.clone()))
        .mount(&server)
        .await;

    let url = format!("{}/live/audio.ts", server.uri());
    let config = TransmuxConfig::default();
    let loader = io::loader_for(&url, &config).unwrap();
    assert_eq!(loader.loader_type(), "fetch-stream-loader");

    let source = MediaDataSource::single(MediaSegmentSource::new(url.as_str()));
    let (mut controller, mut events) = TransmuxingController::new(source, config, loader).unwrap();
    controller.start();

    let mut saw_init = false;
    let mut complete = false;
    for _ in 0..100 {
        controller.step().await;
        while let Ok(event) = events.try_recv() {
            match event {
                TransmuxEvent::InitSegment(..) => saw_init = true,
                TransmuxEvent::LoadingComplete => complete = true,
                TransmuxEvent::IoError(e) => panic!("unexpected IO error: {}", e),
                TransmuxEvent::DemuxError(kind, msg) => panic!("unexpected {}: {}", kind, msg),
                _ => {}
            }
        }
        if complete {
            break;
        }
    }

    assert!(saw_init);
    assert!(complete);
    assert!(!controller.is_loading());
}

#[tokio::test]
async fn slow_response_survives_statistics_ticks() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow/audio.ts"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(common::adts_program(20))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let url = format!("{}/slow/audio.ts", server.uri());
    let config = TransmuxConfig {
        statistics_info_report_interval_ms: 50,
        ..Default::default()
    };
    let loader = io::loader_for(&url, &config).unwrap();
    let source = MediaDataSource::single(MediaSegmentSource::new(url.as_str()));
    let (controller, mut events) = TransmuxingController::new(source, config, loader).unwrap();
    let handle = controller.spawn();
    assert!(handle.send(TransmuxCommand::Start).await);

    let mut statistics = 0;
    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            match event {
                TransmuxEvent::StatisticsInfo(_) => statistics += 1,
                TransmuxEvent::LoadingComplete => return true,
                TransmuxEvent::IoError(_) | TransmuxEvent::DemuxError(..) => return false,
                _ => {}
            }
        }
        false
    })
    .await;
    handle.shutdown().await;

    assert_eq!(outcome, Ok(true));
    assert!(statistics >= 2);
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
}
