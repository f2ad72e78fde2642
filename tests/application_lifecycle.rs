//! Cross-module test exercising [`Application::start`]/[`Application::shutdown`]
//! end to end against a real config file, the way the teacher's own
//! `tests/storage_test.rs` builds real component instances rather than
//! mocking the thing under test. No destinations are configured, so the
//! router must come up IDLE and shutdown must be safe to call twice.

use std::io::Write;

use vistterstream_core::app::Application;
use vistterstream_core::config::AppConfig;
use vistterstream_core::model::RouterMode;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().expect("tempfile");
    f.write_all(contents.as_bytes()).expect("write");
    f
}

#[tokio::test]
async fn starts_idle_and_shuts_down_idempotently() {
    let f = write_config(
        r#"
        [[cameras]]
        id = "cam1"
        name = "Front door"
        stream_url = "rtsp://127.0.0.1/cam1"
        relay_eager = false
        "#,
    );
    let config = AppConfig::from_file(f.path()).expect("config parses");

    let app = Application::start(config).await.expect("application starts");
    assert_eq!(app.router.status().mode, RouterMode::Idle);
    assert_eq!(app.cameras.len(), 1);

    app.shutdown().await;
    // Idempotent: a second shutdown while already torn down must not panic.
    app.shutdown().await;
    assert_eq!(app.router.status().mode, RouterMode::Idle);
}
