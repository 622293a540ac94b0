use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use topaz::{
    deferred::DirectExecutor,
    http::{HeaderMap, Request as RawRequest},
    hyper::{body::to_bytes, Body as RawBody},
    prelude::*,
};

#[derive(Debug, thiserror::Error)]
#[error("boom")]
struct Boom;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn get(uri: &str) -> RawRequest<RawBody> {
    RawRequest::builder().uri(uri).body(RawBody::empty()).unwrap()
}

fn request(method: Method, uri: &str, headers: &[(&str, &str)], body: &'static str) -> RawRequest<RawBody> {
    let mut builder = RawRequest::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(RawBody::from(body)).unwrap()
}

async fn call(router: &Router, req: RawRequest<RawBody>) -> (StatusCode, HeaderMap, String) {
    let res = router.dispatch_raw(req, None).await;
    let status = res.status();
    let headers = res.headers().clone();
    let body = to_bytes(res.into_body()).await.unwrap();
    (status, headers, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn glob_matches_the_bare_prefix() {
    init();
    let router = Router::builder().get("/m/**", |req: &mut Request| req.path().to_string()).build().unwrap();

    assert_eq!(call(&router, get("/m")).await.2, "/m");
    assert_eq!(call(&router, get("/m/a/b")).await.2, "/m/a/b");
    assert_eq!(call(&router, get("/mobile")).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn path_variables_are_captured() {
    init();
    let router = Router::builder()
        .get("/user/:id", |req: &mut Request| req.param_as::<u32>("id").map(|id| format!("user {}", id)))
        .get("/file/{name:[a-z]+}.txt", |req: &mut Request| req.param("name").map(str::to_string))
        .build()
        .unwrap();

    assert_eq!(call(&router, get("/user/42")).await.2, "user 42");
    assert_eq!(call(&router, get("/user/abc")).await.0, StatusCode::BAD_REQUEST);
    assert_eq!(call(&router, get("/file/notes.txt")).await.2, "notes");
    assert_eq!(call(&router, get("/file/Notes.txt")).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn case_insensitive_routing() {
    init();
    let router = Router::builder().case_sensitive(false).get("/Hello", |_: &mut Request| "hi").build().unwrap();

    assert_eq!(call(&router, get("/hello")).await.2, "hi");
    assert_eq!(call(&router, get("/HELLO")).await.2, "hi");
}

#[tokio::test]
async fn error_handlers_render_errors() {
    init();
    let router = Router::builder()
        .get("/boom", |_: &mut Request| Err::<&str, _>(Boom))
        .error_handler(|ctx, _| ctx.send("err"))
        .build()
        .unwrap();

    let (status, _, body) = call(&router, get("/boom")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "err");

    let router = Router::builder()
        .get("/boom", |_: &mut Request| Err::<&str, _>(Boom))
        .map_error::<Boom>(StatusCode::CONFLICT)
        .error_handler(|ctx, _| ctx.send("err"))
        .build()
        .unwrap();

    let (status, _, body) = call(&router, get("/boom")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body, "err");
}

#[tokio::test]
async fn failing_error_handler_falls_through() {
    init();
    let router = Router::builder()
        .error_handler(|_, _| Err(TopazError::Other("nope".to_string())))
        .error_handler(|_, _| Ok(()))
        .error_handler(|ctx, e| ctx.send(format!("second: {}", e)))
        .build()
        .unwrap();

    let (status, _, body) = call(&router, get("/missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "second: no route matches /missing");
}

#[tokio::test]
async fn builtin_error_page_follows_accept() {
    init();
    let router = Router::builder().build().unwrap();

    let (status, headers, body) = call(&router, request(Method::GET, "/nope", &[("Accept", "text/html")], "")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(headers["content-type"].to_str().unwrap().starts_with("text/html"));
    assert!(body.contains("404 Not Found"));

    #[cfg(feature = "json")]
    {
        let (_, headers, body) = call(&router, request(Method::GET, "/nope", &[("Accept", "application/json")], "")).await;
        assert_eq!(headers["content-type"], "application/json");
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["status"], 404);
        assert_eq!(value["reason"], "Not Found");
    }
}

#[tokio::test]
async fn method_not_allowed_vs_not_found() {
    init();
    let router = Router::builder()
        .get("/x", |_: &mut Request| "x")
        .get("/g/*", |_: &mut Request| "g")
        .build()
        .unwrap();

    assert_eq!(call(&router, request(Method::POST, "/x", &[], "")).await.0, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(call(&router, request(Method::POST, "/y", &[], "")).await.0, StatusCode::NOT_FOUND);
    assert_eq!(call(&router, request(Method::POST, "/g/a", &[], "")).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn negotiation_failures() {
    init();
    let definition = RouteDefinition::new(Method::POST, "/items", RouteHandler::one_arg(|_: &mut Request| "created"))
        .unwrap()
        .with_consumes([MediaType::json()])
        .with_produces([MediaType::json()]);
    let router = Router::builder().add(definition).build().unwrap();

    let post = |content_type: &str, accept: &str| {
        let headers = [("Content-Type", content_type), ("Accept", accept)];
        request(Method::POST, "/items", &headers, "{}")
    };

    assert_eq!(call(&router, post("application/json", "application/json")).await.2, "created");
    assert_eq!(call(&router, post("application/json", "*/*")).await.2, "created");

    assert_eq!(call(&router, post("application/json", "text/html")).await.0, StatusCode::NOT_ACCEPTABLE);
    assert_eq!(call(&router, post("application/xml", "application/json")).await.0, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(call(&router, post("application/xml", "text/html")).await.0, StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn path_filters_do_not_hide_negotiation_failures() {
    init();
    let definition = RouteDefinition::new(Method::POST, "/items", RouteHandler::one_arg(|_: &mut Request| "created"))
        .unwrap()
        .with_consumes([MediaType::json()]);
    let router = Router::builder()
        .before(Method::any(), "/items", |_| Ok(()))
        .after(Method::POST, "/items", |_, _| Ok(()))
        .add(definition)
        .build()
        .unwrap();

    let xml = request(Method::POST, "/items", &[("Content-Type", "application/xml")], "<a/>");
    assert_eq!(call(&router, xml).await.0, StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let json = request(Method::POST, "/items", &[("Content-Type", "application/json")], "{}");
    assert_eq!(call(&router, json).await.2, "created");

    assert_eq!(call(&router, get("/items")).await.0, StatusCode::METHOD_NOT_ALLOWED);

    let router = Router::builder().before(Method::GET, "/only-filter", |_| Ok(())).build().unwrap();
    assert_eq!(call(&router, request(Method::POST, "/only-filter", &[], "")).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn routes_run_in_order_with_after_and_complete() {
    init();
    let trace = Arc::new(Mutex::new(Vec::new()));
    let (t1, t2, t3, t4) = (trace.clone(), trace.clone(), trace.clone(), trace.clone());
    let (o1, o2, o3) = (trace.clone(), trace.clone(), trace.clone());

    let router = Router::builder()
        .before(Method::POST, "*", move |_| {
            o1.lock().push("post before");
            Ok(())
        })
        .after(Method::any(), "*", move |_, res| {
            t1.lock().push("after");
            res.set_header("X-After", "yes")
        })
        .get("/other", move |_: &mut Request| {
            o2.lock().push("other");
            "other"
        })
        .before(Method::any(), "*", move |_| {
            t2.lock().push("before");
            Ok(())
        })
        .after(Method::any(), "/elsewhere", move |_, _| {
            o3.lock().push("elsewhere");
            Ok(())
        })
        .get("/", move |_: &mut Request| {
            t3.lock().push("handler");
            "done"
        })
        .complete(Method::any(), "*", move |_, res, error| {
            assert!(error.is_none());
            assert!(res.committed());
            t4.lock().push("complete");
        })
        .build()
        .unwrap();

    let (status, headers, body) = call(&router, get("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "done");
    assert_eq!(headers["x-after"], "yes");
    assert_eq!(*trace.lock(), vec!["before", "handler", "after", "complete"]);
}

#[tokio::test]
async fn complete_listener_sees_errors_once() {
    init();
    let seen = Arc::new(AtomicUsize::new(0));
    let s = seen.clone();

    let router = Router::builder()
        .complete(Method::any(), "*", move |_, res, error| {
            assert_eq!(res.status(), Some(StatusCode::NOT_FOUND));
            assert!(matches!(error, Some(TopazError::NotFound(_))));
            s.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    assert_eq!(call(&router, get("/none")).await.0, StatusCode::NOT_FOUND);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn filter_can_short_circuit() {
    init();
    let reached = Arc::new(AtomicBool::new(false));
    let r = reached.clone();

    let router = Router::builder()
        .filter(Method::any(), "/admin/**", |ctx, chain| {
            Box::pin(async move {
                if ctx.request.header("Authorization").is_none() {
                    return ctx.send(StatusCode::UNAUTHORIZED);
                }
                chain.next(ctx).await
            })
        })
        .get("/admin/panel", move |_: &mut Request| {
            r.store(true, Ordering::SeqCst);
            "panel"
        })
        .build()
        .unwrap();

    assert_eq!(call(&router, get("/admin/panel")).await.0, StatusCode::UNAUTHORIZED);
    assert!(!reached.load(Ordering::SeqCst));

    let (status, _, body) = call(&router, request(Method::GET, "/admin/panel", &[("Authorization", "x")], "")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "panel");
    assert!(reached.load(Ordering::SeqCst));
}

#[tokio::test]
async fn second_send_is_ignored() {
    init();
    let router = Router::builder()
        .before(Method::any(), "*", |ctx| {
            ctx.send("first")?;
            ctx.send("second")
        })
        .get("/", |_: &mut Request| "handler")
        .build()
        .unwrap();

    assert_eq!(call(&router, get("/")).await.2, "first");
}

#[tokio::test]
async fn panics_become_server_errors() {
    init();
    let router = Router::builder()
        .get("/panic", |_: &mut Request| -> &'static str { panic!("kaboom") })
        .build()
        .unwrap();

    assert_eq!(call(&router, get("/panic")).await.0, StatusCode::INTERNAL_SERVER_ERROR);
}

#[cfg(feature = "json")]
#[tokio::test]
async fn model_is_rendered_for_the_negotiated_type() {
    init();
    let definition = RouteDefinition::new(
        Method::GET,
        "/model",
        RouteHandler::no_arg(|| Model(serde_json::json!({ "a": 1 }))),
    )
    .unwrap()
    .with_produces([MediaType::json(), MediaType::plain()]);
    let router = Router::builder().add(definition).build().unwrap();

    let accept = |value: &str| request(Method::GET, "/model", &[("Accept", value)], "");

    let (status, headers, body) = call(&router, accept("application/json")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["content-type"], "application/json");
    assert_eq!(body, r#"{"a":1}"#);

    let (_, headers, _) = call(&router, accept("text/plain")).await;
    assert!(headers["content-type"].to_str().unwrap().starts_with("text/plain"));

    assert_eq!(call(&router, accept("image/png")).await.0, StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn deferred_resolves_once_from_another_thread() {
    init();
    let second_accepted = Arc::new(AtomicBool::new(true));
    let flag = second_accepted.clone();

    let router = Router::builder()
        .get("/late", move |_: &mut Request| {
            let deferred = Deferred::new();
            let handle = deferred.clone();
            let flag = flag.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(10));
                handle.resolve("late");
                flag.store(handle.resolve("again"), Ordering::SeqCst);
            });
            deferred
        })
        .build()
        .unwrap();

    let (status, _, body) = call(&router, get("/late")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "late");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!second_accepted.load(Ordering::SeqCst));
}

#[tokio::test]
async fn deferred_work_runs_on_executors() {
    init();
    let router = Router::builder()
        .executor("direct", Arc::new(DirectExecutor))
        .map_error::<Boom>(StatusCode::CONFLICT)
        .get("/default", |_: &mut Request| Deferred::run(|| Ok::<_, TopazError>("default")))
        .get("/named", |_: &mut Request| Deferred::run_named("direct", || Ok::<_, TopazError>("named")))
        .get("/unknown", |_: &mut Request| Deferred::run_named("nope", || Ok::<_, TopazError>("never")))
        .get("/rejected", |_: &mut Request| Deferred::run(|| Err::<&str, _>(Boom)))
        .get("/spawned", |_: &mut Request| Deferred::spawn(async { Ok::<_, TopazError>("spawned") }))
        .build()
        .unwrap();

    assert_eq!(call(&router, get("/default")).await.2, "default");
    assert_eq!(call(&router, get("/named")).await.2, "named");
    assert_eq!(call(&router, get("/spawned")).await.2, "spawned");
    assert_eq!(call(&router, get("/unknown")).await.0, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(call(&router, get("/rejected")).await.0, StatusCode::CONFLICT);
}

#[tokio::test]
async fn dropped_deferred_is_a_server_error() {
    init();
    let router = Router::builder().get("/dropped", |_: &mut Request| Deferred::new()).build().unwrap();

    assert_eq!(call(&router, get("/dropped")).await.0, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn routes_live_under_the_context_path() {
    init();
    let router = Router::builder().context_path("/app").get("/a", |req: &mut Request| req.path().to_string()).build().unwrap();

    assert_eq!(call(&router, get("/app/a")).await.2, "/a");
    assert_eq!(call(&router, get("/a")).await.0, StatusCode::NOT_FOUND);
    assert_eq!(call(&router, get("/application/a")).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn method_can_be_overridden() {
    init();
    let router = Router::builder()
        .method_override(MethodOverride::default())
        .delete("/x", |_: &mut Request| "deleted")
        .build()
        .unwrap();

    assert_eq!(call(&router, request(Method::POST, "/x?_method=delete", &[], "")).await.2, "deleted");

    let form = [("Content-Type", "application/x-www-form-urlencoded")];
    assert_eq!(call(&router, request(Method::POST, "/x", &form, "_method=DELETE")).await.2, "deleted");
    assert_eq!(call(&router, request(Method::POST, "/x?_method=no%20way", &[], "")).await.0, StatusCode::BAD_REQUEST);

    let router = Router::builder()
        .method_override(MethodOverride::Header("X-HTTP-Method-Override".to_string()))
        .delete("/x", |_: &mut Request| "deleted")
        .build()
        .unwrap();

    let headers = [("X-HTTP-Method-Override", "DELETE")];
    assert_eq!(call(&router, request(Method::POST, "/x", &headers, "")).await.2, "deleted");
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    init();
    let router = Router::builder()
        .max_body_size(Some(4))
        .post("/upload", |req: &mut Request| req.take_body_as::<String>())
        .build()
        .unwrap();

    assert_eq!(call(&router, request(Method::POST, "/upload", &[], "0123456789")).await.0, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(call(&router, request(Method::POST, "/upload", &[], "abc")).await.2, "abc");
}

#[tokio::test]
async fn upgrades_are_handed_to_socket_routes() {
    init();
    let router = Router::builder()
        .web_socket("/ws", |ctx| ctx.send(StatusCode::SWITCHING_PROTOCOLS))
        .get("/ws", |_: &mut Request| "plain")
        .build()
        .unwrap();

    let headers = [("Connection", "Upgrade"), ("Upgrade", "websocket")];
    assert_eq!(call(&router, request(Method::GET, "/ws", &headers, "")).await.0, StatusCode::SWITCHING_PROTOCOLS);
    assert_eq!(call(&router, get("/ws")).await.2, "plain");
}

#[tokio::test]
async fn after_filters_skip_error_responses() {
    init();
    let router = Router::builder()
        .after(Method::any(), "*", |_, res| res.set_header("X-After", "yes"))
        .get("/ok", |_: &mut Request| "ok")
        .build()
        .unwrap();

    assert_eq!(call(&router, get("/ok")).await.1["x-after"], "yes");
    assert!(call(&router, get("/ko")).await.1.get("x-after").is_none());
}

#[tokio::test]
async fn body_primitives() {
    init();
    let router = Router::builder()
        .before(Method::GET, "/stream", |ctx| {
            ctx.send_stream(futures::stream::iter(vec![Ok::<_, std::io::Error>("a"), Ok("b")]))
        })
        .before(Method::GET, "/buffer", |ctx| ctx.send_buffer(&b"buf"[..]))
        .before(Method::GET, "/old", |ctx| ctx.redirect("/new"))
        .build()
        .unwrap();

    assert_eq!(call(&router, get("/stream")).await.2, "ab");
    assert_eq!(call(&router, get("/buffer")).await.2, "buf");

    let (status, headers, _) = call(&router, get("/old")).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers["location"], "/new");
}
