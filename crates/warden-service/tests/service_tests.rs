//! End-to-end runs of the service against a real socket in a temp directory.

#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;
use warden_core::command::CommandResult;
use warden_core::ipc::IpcResponse;
use warden_core::ipc_client::IpcClient;
use warden_core::persist::read_catalog;
use warden_core::router::RouterMode;
use warden_core::settings::WardenSettings;
use warden_core::shutdown::ShutdownKind;
use warden_service::{ServiceContext, ServiceExit, ServiceOptions};

const PASSWORD: &str = "testPassword";

fn options(dir: &Path, mode: RouterMode) -> ServiceOptions {
    ServiceOptions {
        settings: WardenSettings {
            shutdown_grace_ms: 100,
            ..WardenSettings::default()
        },
        socket_path: dir.join("warden.sock"),
        catalog_path: dir.join("protectedPaths.json"),
        mode,
    }
}

async fn wait_until_up(client: &IpcClient) {
    for _ in 0..100 {
        if client.ping().await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("service never came up");
}

fn results(response: IpcResponse) -> Vec<CommandResult> {
    match response {
        IpcResponse::Results { results } => results,
        other => panic!("expected results, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn encrypting_the_catalog_stops_the_service() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    fs::write(&a, "contents of a").unwrap();
    fs::write(&b, "contents of b").unwrap();
    let (a, b) = (fs::canonicalize(&a).unwrap(), fs::canonicalize(&b).unwrap());

    let opts = options(dir.path(), RouterMode::Normal);
    let catalog_path = opts.catalog_path.clone();
    let client = IpcClient::new(opts.socket_path.clone(), Duration::from_secs(10));
    let service = tokio::spawn(ServiceContext::build(opts).run());
    wait_until_up(&client).await;

    let added = results(
        client
            .execute(
                vec![format!("-a={}", a.display()), format!("-a={}", b.display())],
                None,
            )
            .await
            .unwrap(),
    );
    assert!(added.iter().all(|r| matches!(r, CommandResult::Success(_))));

    let encrypted = results(
        client
            .execute(vec!["-c".to_string()], Some(PASSWORD.to_string()))
            .await
            .unwrap(),
    );
    assert_eq!(encrypted.len(), 1);
    assert!(encrypted[0]
        .message()
        .contains("Protected paths list successfully encrypted"));

    let exit = tokio::time::timeout(Duration::from_secs(5), service)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(exit, ServiceExit::Clean);
    assert!(client.ping().await.is_err());

    assert_ne!(fs::read(&a).unwrap(), b"contents of a");
    assert_ne!(fs::read(&b).unwrap(), b"contents of b");
    let mut saved = read_catalog(&catalog_path).unwrap();
    saved.sort();
    assert_eq!(saved, vec![a.display().to_string(), b.display().to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn no_shutdown_mode_keeps_serving_and_restart_restores_the_catalog() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.txt");
    fs::write(&a, "contents of a").unwrap();
    let a = fs::canonicalize(&a).unwrap();

    let opts = options(dir.path(), RouterMode::NoShutdown);
    let client = IpcClient::new(opts.socket_path.clone(), Duration::from_secs(10));
    let context = ServiceContext::build(opts.clone());
    let signal = context.shutdown_signal();
    let service = tokio::spawn(context.run());
    wait_until_up(&client).await;

    client
        .execute(vec![format!("-a={}", a.display())], None)
        .await
        .unwrap();
    let encrypted = results(
        client
            .execute(vec!["-c".to_string()], Some(PASSWORD.to_string()))
            .await
            .unwrap(),
    );
    assert!(matches!(encrypted[0], CommandResult::Success(_)));
    assert_eq!(client.ping().await.unwrap(), "warden-service:ready");

    let decrypted = results(
        client
            .execute(vec!["-p".to_string()], Some(PASSWORD.to_string()))
            .await
            .unwrap(),
    );
    assert!(matches!(decrypted[0], CommandResult::Success(_)));
    assert_eq!(fs::read_to_string(&a).unwrap(), "contents of a");

    signal.trigger(ShutdownKind::Graceful);
    let exit = tokio::time::timeout(Duration::from_secs(5), service)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(exit, ServiceExit::Clean);

    let context = ServiceContext::build(opts);
    let signal = context.shutdown_signal();
    let service = tokio::spawn(context.run());
    wait_until_up(&client).await;
    let listed = results(client.execute(vec!["-vp".to_string()], None).await.unwrap());
    assert_eq!(listed, vec![CommandResult::Success(format!("[{}]", a.display()))]);

    signal.trigger(ShutdownKind::Graceful);
    let exit = tokio::time::timeout(Duration::from_secs(5), service)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(exit, ServiceExit::Clean);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fatal_shutdown_saves_and_reports_failure() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.txt");
    fs::write(&a, "x").unwrap();
    let a = fs::canonicalize(&a).unwrap();

    let opts = options(dir.path(), RouterMode::Normal);
    let catalog_path = opts.catalog_path.clone();
    let client = IpcClient::new(opts.socket_path.clone(), Duration::from_secs(10));
    let context = ServiceContext::build(opts);
    let signal = context.shutdown_signal();
    let service = tokio::spawn(context.run());
    wait_until_up(&client).await;

    client
        .execute(vec![format!("-a={}", a.display())], None)
        .await
        .unwrap();
    signal.trigger(ShutdownKind::Fatal);

    let exit = tokio::time::timeout(Duration::from_secs(5), service)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(exit, ServiceExit::Fatal);
    assert_eq!(exit.code(), 1);
    assert_eq!(read_catalog(&catalog_path).unwrap(), vec![a.display().to_string()]);
    assert!(!dir.path().join("warden.sock").exists());
}
