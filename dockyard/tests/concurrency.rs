//! Many tasks sharing one client across every transport.

mod common;

use std::time::Duration;

use http::StatusCode;

use common::{TestServer, respond, self_signed, serve_tcp, serve_tls, serve_unix};
use dockyard::{Client, ClientConfig, HijackOptions, Method, RequestOptions, StreamOptions};

const TASKS: usize = 50;

async fn stress(client: Client, server: &TestServer) {
    let mut expected = Vec::new();
    let mut tasks = Vec::new();

    for i in 0..TASKS {
        let path = format!("/{i:05}");
        expected.push(format!("GET{path}"));
        expected.push(format!("POST{path}"));
        expected.push(format!("HEAD{path}"));

        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            client
                .request(Method::GET, &path, RequestOptions::new())
                .await?;
            client
                .stream(Method::POST, &path, StreamOptions::default())
                .await?;
            client
                .hijack(Method::HEAD, &path, HijackOptions::default())
                .await
        }));
    }

    let mut waiters = Vec::new();
    for task in tasks {
        waiters.push(task.await.unwrap().unwrap());
    }
    for waiter in waiters {
        waiter.wait().await.unwrap();
        waiter.close();
    }

    expected.sort();
    assert_eq!(server.log.entries(), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_http() {
    let server = serve_tcp(respond(StatusCode::OK, "")).await;
    stress(Client::new(&server.endpoint).unwrap(), &server).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_unix() {
    let server = serve_unix(respond(StatusCode::OK, "")).await;
    stress(Client::new(&server.endpoint).unwrap(), &server).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_http_with_timeout() {
    let server = serve_tcp(respond(StatusCode::OK, "")).await;
    let config = ClientConfig::new(server.endpoint.clone()).timeout(Duration::from_secs(60));
    stress(Client::with_config(config).unwrap(), &server).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_unix_with_timeout() {
    let server = serve_unix(respond(StatusCode::OK, "")).await;
    let config = ClientConfig::new(server.endpoint.clone()).timeout(Duration::from_secs(60));
    stress(Client::with_config(config).unwrap(), &server).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tls() {
    let server = serve_tls(respond(StatusCode::OK, "")).await;
    let client =
        Client::new_tls_from_pem(&server.endpoint, &server.cert_pem, &server.key_pem, None)
            .unwrap();
    stress(client, &server).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_unix_with_tls_client() {
    let server = serve_unix(respond(StatusCode::OK, "")).await;
    let (cert, key) = self_signed();
    let client = Client::new_tls_from_pem(&server.endpoint, &cert, &key, None).unwrap();
    stress(client, &server).await;
}
