use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Client;
use stampede::{
    CallContext, Config, Generator, Gun, LoadType, LogConfig, Response, StdoutSink, logging,
    schedule,
};

struct HttpGun {
    // NEVER create the client per call, connection reuse matters a lot here
    client: Client,
    url: String,
}

#[async_trait]
impl Gun for HttpGun {
    async fn call(&self, _ctx: &CallContext) -> Response {
        match self.client.get(&self.url).send().await {
            Ok(res) => {
                let status = res.status();
                let mut out = if status.is_success() {
                    Response::ok(status.as_u16())
                } else {
                    Response::failed(format!("unexpected status {status}"))
                };
                out.status_code = Some(status.as_str().to_string());
                out.path = Some(self.url.clone());
                out
            }
            Err(err) => Response::failed(err.to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> stampede::Result<()> {
    logging::init(&LogConfig::default());

    let generator = Generator::new(
        Config::builder()
            .gen_name("http")
            .load_type(LoadType::Rps)
            // Warm up, spike 10 times harder, then go back to normal
            .schedule(schedule::combine([
                schedule::plain(10, Duration::from_secs(5)),
                schedule::plain(100, Duration::from_secs(5)),
                schedule::plain(10, Duration::from_secs(5)),
            ]))
            .call_timeout(Duration::from_secs(2))
            .gun(Arc::new(HttpGun {
                client: Client::new(),
                url: "http://localhost:3000".into(),
            }))
            .sink(Arc::new(StdoutSink))
            .build(),
    )?;

    let result = generator.run_and_wait().await;
    println!(
        "ok: {}, failed: {}, run failed: {}",
        result.data.ok_responses().len(),
        result.data.fail_responses().len(),
        result.failed
    );
    Ok(())
}
