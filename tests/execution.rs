use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use fetch_service::{
    retry_with_exponential_backoff, transform, AbortReason, AbortToken, BoxError, BoxFuture,
    CallConfig, Endpoint, Error, ErrorKind, ErrorReporter, Exchange, ExchangeRequest,
    ExchangeResponse, GlobalConfig, RequestConfig, Response, Service, StatusValidator,
};
use reqwest::{header::HeaderValue, Method, StatusCode};
use serde_json::{json, Value as JsonValue};

enum Step {
    Reply { status: StatusCode, body: String, delay: Duration },
    Fail(&'static str),
    Hang,
}

impl Step {
    fn json(status: u16, body: JsonValue) -> Self {
        Self::Reply {
            status: StatusCode::from_u16(status).expect("valid test status"),
            body: body.to_string(),
            delay: Duration::ZERO,
        }
    }

    fn raw(status: u16, body: &str) -> Self {
        Self::Reply {
            status: StatusCode::from_u16(status).expect("valid test status"),
            body: body.to_owned(),
            delay: Duration::ZERO,
        }
    }

    fn delayed(self, delay: Duration) -> Self {
        match self {
            Self::Reply { status, body, .. } => Self::Reply { status, body, delay },
            other => other,
        }
    }
}

/// In-process exchange that replays a fixed script and records what it saw.
#[derive(Clone, Default)]
struct Script {
    steps: Arc<Mutex<VecDeque<Step>>>,
    seen: Arc<Mutex<Vec<ExchangeRequest>>>,
    tokens: Arc<Mutex<Vec<AbortToken>>>,
}

impl Script {
    fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Arc::new(Mutex::new(steps.into())),
            ..Self::default()
        }
    }

    fn exchanges(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    fn request(&self, index: usize) -> ExchangeRequest {
        self.seen.lock().unwrap()[index].clone()
    }

    fn token(&self, index: usize) -> AbortToken {
        self.tokens.lock().unwrap()[index].clone()
    }
}

impl Exchange for Script {
    fn perform(
        &self,
        request: ExchangeRequest,
        token: AbortToken,
    ) -> BoxFuture<'static, Result<ExchangeResponse, BoxError>> {
        self.seen.lock().unwrap().push(request);
        self.tokens.lock().unwrap().push(token.clone());
        let step = self.steps.lock().unwrap().pop_front();

        Box::pin(async move {
            match step {
                Some(Step::Reply { status, body, delay }) => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    Ok(ExchangeResponse::new(status, body))
                }
                Some(Step::Fail(message)) => Err(BoxError::from(message)),
                Some(Step::Hang) => {
                    token.aborted().await;
                    Err(BoxError::from("exchange aborted"))
                }
                None => Err(BoxError::from("script exhausted")),
            }
        })
    }
}

fn service(global: GlobalConfig, script: &Script) -> Service {
    Service::with_exchange(
        global,
        [
            ("users", Endpoint::get("users")),
            ("create", Endpoint::post("users").body(json!({"role": "user"}))),
        ],
        script.clone(),
    )
}

fn base() -> GlobalConfig {
    GlobalConfig::new("https://api.test")
}

fn count_response_errors(service: &Service) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    service.interceptors().response().on_error(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    count
}

#[tokio::test(start_paused = true)]
async fn successful_round_trip_decodes_json() {
    let script = Script::new(vec![Step::json(200, json!({"id": 1, "name": "Kit"}))]);
    let service = service(base(), &script);

    let response = service
        .endpoint("users", CallConfig::new().path("1"))
        .unwrap()
        .send(CallConfig::new())
        .await
        .expect("call must succeed");

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.status_text, "OK");
    assert_eq!(response.data, json!({"id": 1, "name": "Kit"}));
    assert_eq!(response.config.url, "https://api.test/users/1");
    assert_eq!(script.exchanges(), 1);
    assert_eq!(script.request(0).method, Method::GET);
}

#[tokio::test(start_paused = true)]
async fn rejected_status_carries_response_details() {
    let script = Script::new(vec![Step::json(404, json!({"message": "missing"}))]);
    let service = service(base(), &script);
    let errors = count_response_errors(&service);

    let err = service
        .endpoint("users", CallConfig::new())
        .unwrap()
        .send(CallConfig::new())
        .await
        .unwrap_err();

    assert!(err.is_status());
    assert_eq!(err.status(), Some(StatusCode::NOT_FOUND));
    assert_eq!(err.code(), "ERR_HTTP_404");
    assert_eq!(err.to_string(), "Request failed with status 404: Not Found");
    assert_eq!(err.response().unwrap().data, json!({"message": "missing"}));
    assert_eq!(err.config().unwrap().url, "https://api.test/users");
    assert_eq!(errors.load(Ordering::SeqCst), 1);
    assert_eq!(script.exchanges(), 1);
}

#[tokio::test(start_paused = true)]
async fn custom_status_validator_accepts_listed_status() {
    let script = Script::new(vec![Step::json(404, json!(null))]);
    let service = service(base(), &script);

    let response = service
        .endpoint(
            "users",
            CallConfig::new().validate_status(StatusValidator::only(&[200, 404])),
        )
        .unwrap()
        .send(CallConfig::new())
        .await
        .expect("404 is accepted");

    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn call_level_false_disables_global_retry() {
    let script = Script::new(vec![Step::Fail("down"), Step::Fail("down"), Step::Fail("down")]);
    let global = base().with_retry(3, Duration::from_millis(10));
    let service = service(global, &script);

    let err = service
        .endpoint("users", CallConfig::new().retry(false))
        .unwrap()
        .send(CallConfig::new())
        .await
        .unwrap_err();

    assert!(err.is_network());
    assert_eq!(script.exchanges(), 1);
}

#[tokio::test(start_paused = true)]
async fn failure_retry_waits_interval_and_recovers() {
    let script = Script::new(vec![
        Step::Fail("reset"),
        Step::json(503, json!({})),
        Step::json(200, json!({"ok": true})),
    ]);
    let global = base().with_retry(2, Duration::from_millis(100));
    let service = service(global, &script);
    let started = tokio::time::Instant::now();

    let response = service
        .endpoint("users", CallConfig::new())
        .unwrap()
        .send(CallConfig::new())
        .await
        .expect("third exchange succeeds");

    assert_eq!(response.data, json!({"ok": true}));
    assert_eq!(script.exchanges(), 3);
    assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_surface_last_error_and_notify_once() {
    let script = Script::new(vec![
        Step::Fail("reset"),
        Step::Fail("reset"),
        Step::json(502, json!({"attempt": 3})),
    ]);
    let global = base().with_retry(2, Duration::from_millis(10));
    let service = service(global, &script);
    let errors = count_response_errors(&service);

    let err = service
        .endpoint("users", CallConfig::new())
        .unwrap()
        .send(CallConfig::new())
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(StatusCode::BAD_GATEWAY));
    assert_eq!(script.exchanges(), 3);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn always_failing_exchange_surfaces_network_error() {
    let script = Script::new(vec![
        Step::Fail("connection refused"),
        Step::Fail("connection refused"),
        Step::Fail("connection refused"),
    ]);
    let global = base().with_retry(2, Duration::from_millis(10));
    let service = service(global, &script);
    let errors = count_response_errors(&service);

    let err = service
        .endpoint("users", CallConfig::new())
        .unwrap()
        .send(CallConfig::new())
        .await
        .unwrap_err();

    assert!(err.is_network());
    assert_eq!(err.code(), "ERR_NETWORK");
    assert!(err.to_string().contains("connection refused"));
    assert!(err.is_retryable());
    assert_eq!(script.exchanges(), 3);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_retry_issues_fresh_exchanges_and_recovers() {
    let script = Script::new(vec![Step::Hang, Step::Hang, Step::json(200, json!("late"))]);
    let global = base()
        .with_timeout(Duration::from_millis(100))
        .with_timeout_retry(2);
    let service = service(global, &script);

    let response = service
        .endpoint("users", CallConfig::new())
        .unwrap()
        .send(CallConfig::new())
        .await
        .expect("third exchange succeeds");

    assert_eq!(response.data, json!("late"));
    assert_eq!(script.exchanges(), 3);
    assert_eq!(script.token(0).reason(), Some(AbortReason::Timeout));
    assert_eq!(script.token(1).reason(), Some(AbortReason::Timeout));
    assert!(!script.token(2).is_aborted());
}

#[tokio::test(start_paused = true)]
async fn timeouts_do_not_consume_failure_budget() {
    let script = Script::new(vec![Step::Hang, Step::Hang, Step::Hang, Step::Hang]);
    let global = base()
        .with_timeout(Duration::from_millis(50))
        .with_timeout_retry(2)
        .with_retry(5, Duration::from_millis(10));
    let service = service(global, &script);

    let err = service
        .endpoint("users", CallConfig::new())
        .unwrap()
        .send(CallConfig::new())
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(matches!(err.kind(), ErrorKind::Timeout { timeout_ms: 50 }));
    assert_eq!(script.exchanges(), 3);
}

#[tokio::test(start_paused = true)]
async fn timeout_and_failure_budgets_are_independent() {
    let script = Script::new(vec![
        Step::Hang,
        Step::Fail("reset"),
        Step::json(200, json!({"ok": true})),
    ]);
    let global = base()
        .with_timeout(Duration::from_millis(50))
        .with_timeout_retry(1)
        .with_retry(1, Duration::from_millis(10));
    let service = service(global, &script);

    let response = service
        .endpoint("users", CallConfig::new())
        .unwrap()
        .send(CallConfig::new())
        .await
        .expect("each budget covers one failure");

    assert_eq!(response.data, json!({"ok": true}));
    assert_eq!(script.exchanges(), 3);
}

#[tokio::test(start_paused = true)]
async fn abort_in_flight_rejects_without_retry() {
    let script = Script::new(vec![Step::Hang, Step::json(200, json!({}))]);
    let global = base()
        .with_timeout(Duration::from_millis(500))
        .with_timeout_retry(3)
        .with_retry(3, Duration::from_millis(10));
    let service = service(global, &script);
    let errors = count_response_errors(&service);
    let call = service.endpoint("users", CallConfig::new()).unwrap();

    let in_flight = tokio::spawn(call.send(CallConfig::new()));
    tokio::time::sleep(Duration::from_millis(1)).await;
    call.abort();

    let err = in_flight.await.unwrap().unwrap_err();
    assert!(err.is_aborted());
    assert_eq!(err.code(), "ERR_CANCELED");
    assert!(matches!(err.kind(), ErrorKind::Aborted(AbortReason::User)));
    assert_eq!(script.exchanges(), 1);
    assert_eq!(errors.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn abort_before_first_poll_issues_one_exchange() {
    let script = Script::new(vec![Step::json(200, json!({})), Step::json(200, json!({}))]);
    let global = base()
        .with_timeout_retry(3)
        .with_retry(3, Duration::from_millis(10))
        .with_cancel_repeated_requests(true);
    let service = service(global, &script);
    let errors = count_response_errors(&service);
    let call = service.endpoint("users", CallConfig::new()).unwrap();

    let pending_send = call.send(CallConfig::new());
    call.abort();
    let err = pending_send.await.unwrap_err();

    assert!(matches!(err.kind(), ErrorKind::Aborted(AbortReason::User)));
    assert_eq!(script.exchanges(), 1);
    assert!(script.token(0).is_aborted());
    assert!(service.pending().is_empty());
    assert_eq!(errors.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_call_does_not_evict_live_identical_request() {
    let script = Script::new(vec![
        Step::json(200, json!("live")).delayed(Duration::from_millis(50)),
        Step::json(200, json!("cancelled")),
    ]);
    let service = service(base().with_cancel_repeated_requests(true), &script);

    let live = tokio::spawn(
        service
            .endpoint("users", CallConfig::new())
            .unwrap()
            .send(CallConfig::new()),
    );
    tokio::time::sleep(Duration::from_millis(1)).await;

    let cancelled_call = service.endpoint("users", CallConfig::new()).unwrap();
    let cancelled = cancelled_call.send(CallConfig::new());
    cancelled_call.abort();
    assert!(cancelled.await.unwrap_err().is_aborted());

    let response = live.await.unwrap().expect("live request is not superseded");
    assert_eq!(response.data, json!("live"));
    assert_eq!(script.exchanges(), 2);
}

#[tokio::test(start_paused = true)]
async fn abort_outside_a_send_is_inert() {
    let script = Script::new(vec![Step::json(200, json!(1)), Step::json(200, json!(2))]);
    let service = service(base(), &script);
    let call = service.endpoint("users", CallConfig::new()).unwrap();

    call.abort();
    let first = call.send(CallConfig::new()).await.expect("abort before send is a no-op");
    call.abort();
    let second = call.send(CallConfig::new()).await.expect("abort after settle is inert");

    assert_eq!(first.data, json!(1));
    assert_eq!(second.data, json!(2));
}

#[tokio::test(start_paused = true)]
async fn repeated_request_supersedes_in_flight_one() {
    let script = Script::new(vec![Step::Hang, Step::json(200, json!({"winner": 2}))]);
    let global = base().with_cancel_repeated_requests(true);
    let service = service(global, &script);
    let errors = count_response_errors(&service);

    let first = tokio::spawn(
        service
            .endpoint("users", CallConfig::new())
            .unwrap()
            .send(CallConfig::new()),
    );
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(service.pending().len(), 1);
    assert!(service.pending().contains("https://api.test/users+GET"));

    let second = service
        .endpoint("users", CallConfig::new())
        .unwrap()
        .send(CallConfig::new())
        .await
        .expect("newest call wins");

    let superseded = first.await.unwrap().unwrap_err();
    assert!(matches!(superseded.kind(), ErrorKind::Aborted(AbortReason::Superseded)));
    assert_eq!(second.data, json!({"winner": 2}));
    assert_eq!(script.exchanges(), 2);
    assert!(service.pending().is_empty());
    assert_eq!(errors.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn identical_requests_run_independently_without_dedup() {
    let script = Script::new(vec![
        Step::json(200, json!("a")).delayed(Duration::from_millis(50)),
        Step::json(200, json!("b")).delayed(Duration::from_millis(50)),
    ]);
    let service = service(base(), &script);
    let call = service.endpoint("users", CallConfig::new()).unwrap();

    let (a, b) = tokio::join!(call.send(CallConfig::new()), call.send(CallConfig::new()));

    assert_eq!(a.unwrap().data, json!("a"));
    assert_eq!(b.unwrap().data, json!("b"));
    assert!(service.pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn interceptors_run_in_registration_order() {
    let script = Script::new(vec![Step::json(200, json!({"steps": []}))]);
    let service = service(base(), &script);

    for step in ["first", "second"] {
        service.interceptors().request().add(move |mut config| async move {
            let trail = config
                .headers
                .get("x-trail")
                .map(|value| format!("{},{step}", value.to_str().unwrap()))
                .unwrap_or_else(|| step.to_owned());
            config
                .headers
                .insert("x-trail", HeaderValue::from_str(&trail).unwrap());
            Ok(config)
        });
        service.interceptors().response().add(move |mut response| async move {
            response.data["steps"]
                .as_array_mut()
                .unwrap()
                .push(json!(step));
            Ok(response)
        });
    }

    let response = service
        .endpoint("users", CallConfig::new())
        .unwrap()
        .send(CallConfig::new())
        .await
        .unwrap();

    assert_eq!(script.request(0).headers["x-trail"], "first,second");
    assert_eq!(response.data, json!({"steps": ["first", "second"]}));
}

#[tokio::test(start_paused = true)]
async fn request_interceptor_rejection_is_never_sent() {
    let script = Script::new(vec![Step::json(200, json!({}))]);
    let global = base().with_retry(3, Duration::from_millis(10));
    let service = service(global, &script);
    let request_errors = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&request_errors);
    service.interceptors().request().add_with_error(
        |_config| async { Err::<RequestConfig, _>(Error::interceptor("no session")) },
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        },
    );

    let err = service
        .endpoint("users", CallConfig::new())
        .unwrap()
        .send(CallConfig::new())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "ERR_INTERCEPTOR");
    assert_eq!(script.exchanges(), 0);
    assert_eq!(request_errors.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn response_interceptor_rejection_fails_without_retry() {
    let script = Script::new(vec![Step::json(200, json!({})), Step::json(200, json!({}))]);
    let global = base().with_retry(3, Duration::from_millis(10));
    let service = service(global, &script);
    let errors = count_response_errors(&service);
    service
        .interceptors()
        .response()
        .add(|_response| async { Err::<Response, _>(Error::interceptor("rejected")) });

    let err = service
        .endpoint("users", CallConfig::new())
        .unwrap()
        .send(CallConfig::new())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "ERR_INTERCEPTOR");
    assert!(err.config().is_some());
    assert_eq!(script.exchanges(), 1);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn undecodable_body_is_terminal() {
    let script = Script::new(vec![Step::raw(200, "<html>"), Step::json(200, json!({}))]);
    let global = base().with_retry(3, Duration::from_millis(10));
    let service = service(global, &script);

    let err = service
        .endpoint("users", CallConfig::new())
        .unwrap()
        .send(CallConfig::new())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "ERR_DECODE");
    assert_eq!(script.exchanges(), 1);
}

#[tokio::test(start_paused = true)]
async fn endpoint_body_merges_with_send_overrides() {
    let script = Script::new(vec![Step::json(201, json!({"id": 9}))]);
    let service = service(base(), &script);

    service
        .endpoint("create", CallConfig::new().body(json!({"name": "Kit"})))
        .unwrap()
        .send(CallConfig::new().body(json!({"name": "Ada"})))
        .await
        .unwrap();

    let sent = script.request(0);
    let body: JsonValue = serde_json::from_slice(sent.body.as_deref().unwrap()).unwrap();
    assert_eq!(body, json!({"role": "user", "name": "Ada"}));
    assert_eq!(sent.headers["content-type"], "application/json;charset=UTF-8");
}

#[tokio::test(start_paused = true)]
async fn convenience_verbs_share_the_engine() {
    let script = Script::new(vec![Step::json(200, json!({"saved": true}))]);
    let service = service(base(), &script);
    let errors = count_response_errors(&service);

    let response = service
        .post("/notes", json!({"text": "hi"}), CallConfig::new())
        .await
        .unwrap();

    let sent = script.request(0);
    assert_eq!(sent.method, Method::POST);
    assert_eq!(sent.url, "https://api.test/notes");
    assert_eq!(sent.body.as_deref(), Some(&br#"{"text":"hi"}"#[..]));
    assert_eq!(response.data, json!({"saved": true}));
    assert_eq!(errors.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn reporter_attached_as_observer_sees_final_failure() {
    let script = Script::new(vec![Step::json(404, json!({"missing": true}))]);
    let service = service(base(), &script);
    let reporter = ErrorReporter::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    reporter.add_handler(move |err| {
        let url = err.config().map(|config| config.url.clone()).unwrap_or_default();
        log.lock().unwrap().push(format!("{} {}", err.code(), url));
    });
    service.interceptors().response().on_error(reporter.observer());

    let err = service
        .endpoint("users", CallConfig::new())
        .unwrap()
        .send(CallConfig::new())
        .await
        .unwrap_err();

    assert!(err.is_client_error());
    assert!(!err.is_retryable());
    assert_eq!(*seen.lock().unwrap(), ["ERR_HTTP_404 https://api.test/users"]);
}

#[tokio::test(start_paused = true)]
async fn backoff_helper_repeats_whole_sends() {
    let script = Script::new(vec![
        Step::Fail("reset"),
        Step::json(503, json!({})),
        Step::json(200, json!({"ok": true})),
    ]);
    let service = service(base(), &script);
    let call = service.endpoint("users", CallConfig::new()).unwrap();
    let started = tokio::time::Instant::now();

    let response = retry_with_exponential_backoff(3, Duration::from_millis(100), || {
        call.send(CallConfig::new())
    })
    .await
    .expect("third send succeeds");

    assert_eq!(response.data, json!({"ok": true}));
    assert_eq!(script.exchanges(), 3);
    assert_eq!(started.elapsed(), Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
async fn paginated_list_pipeline_shapes_response_data() {
    let script = Script::new(vec![Step::json(
        200,
        json!({"items": [{"user_id": 1, "created_at": "1970-01-01T00:00:02Z"}], "total": 1, "per_page": 20}),
    )]);
    let service = service(base(), &script);

    let response = service
        .endpoint("users", CallConfig::new().transform_response(transform::paginated_list()))
        .unwrap()
        .send(CallConfig::new())
        .await
        .unwrap();

    assert_eq!(
        response.data,
        json!({
            "items": [{"userId": 1, "createdAt": 2000}],
            "pagination": {"total": 1, "page": 1, "pageSize": 20},
        })
    );
}

#[tokio::test]
async fn unknown_endpoint_is_a_build_error() {
    let service = service(base(), &Script::default());
    let err = service.endpoint("missing", CallConfig::new()).unwrap_err();
    assert!(err.is_build());
}
