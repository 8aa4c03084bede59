use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use quotagate::telemetry::MemorySink;
use quotagate::{DecisionEngine, LimitPer, ManualClock, QuotaStore};
use tracing_subscriber::fmt::MakeWriter;

/// Engine on a manual clock with a memory sink attached.
pub fn engine_at(start_millis: u64) -> (DecisionEngine, ManualClock, MemorySink) {
    let clock = ManualClock::starting_at(start_millis);
    let sink = MemorySink::new();
    let engine = DecisionEngine::in_memory().with_clock(clock.clone()).with_sink(sink.clone());
    (engine, clock, sink)
}

/// Configure `user_id` directly on the quota store.
pub fn configure(engine: &DecisionEngine, user_id: &str, limit: u32, per: LimitPer) {
    engine.quotas().set(user_id, limit, per).expect("quota set");
}

pub fn put_json(uri: &str, json: &str) -> Request<Body> {
    Request::put(uri)
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .expect("request")
}

pub fn upload_as(user_id: &str) -> Request<Body> {
    Request::post("/images")
        .header("cookie", format!("user_id={user_id}"))
        .body(Body::from("image-bytes"))
        .expect("request")
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.expect("body").to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}

/// Collects formatted tracing output for assertions.
#[derive(Clone, Default)]
pub struct SharedWriter(pub Arc<Mutex<Vec<u8>>>);

impl SharedWriter {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedGuard;
    fn make_writer(&'a self) -> Self::Writer {
        SharedGuard(self.0.clone())
    }
}

pub struct SharedGuard(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
