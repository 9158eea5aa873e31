use std::time::Duration;

use fetch_service::{transform, CallConfig, Endpoint, GlobalConfig, Service, TransformerPipeline};
use reqwest::header::HeaderValue;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let global = GlobalConfig::from_env()?
        .with_retry(2, Duration::from_millis(250))
        .with_cancel_repeated_requests(true);

    let service = Service::new(
        global,
        [
            (
                "user",
                Endpoint::get("users").transform_response(
                    TransformerPipeline::new().map(transform::camel_to_snake),
                ),
            ),
            ("create_user", Endpoint::post("users")),
        ],
    );

    if let Ok(token) = std::env::var("FETCH_SERVICE_TOKEN") {
        service.interceptors().request().add(move |mut config| {
            let token = token.clone();
            async move {
                let value = HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|err| fetch_service::Error::interceptor(err.to_string()))?;
                config.headers.insert("authorization", value);
                Ok(config)
            }
        });
    }
    service
        .interceptors()
        .response()
        .on_error(|err| eprintln!("request failed ({}): {err}", err.code()));

    let created = service
        .endpoint("create_user", CallConfig::new())?
        .send(CallConfig::new().body(serde_json::json!({"name": "Kit"})))
        .await?;
    println!("created: {}", created.data);

    let user = service
        .endpoint("user", CallConfig::new().path("1"))?
        .send(CallConfig::new())
        .await?;
    println!("user: {}", user.data);

    Ok(())
}
