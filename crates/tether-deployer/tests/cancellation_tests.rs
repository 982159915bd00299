// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Cancellation and release paths: however a session ends, the Pod it
//! created is deleted exactly once.

mod support;

use tether_deployer::{Phase, Session, SessionError, Workload};
use tokio_util::sync::CancellationToken;

use support::{config, FakeCluster};

fn assert_cancelled(result: Result<Session, SessionError>) -> Phase {
	match result {
		Err(SessionError::Cancelled { phase }) => phase,
		other => panic!("expected Cancelled, got {other:?}"),
	}
}

#[tokio::test]
async fn test_cancelled_before_start_creates_nothing() {
	let cluster = FakeCluster::new();
	let config = config();
	let handle = cluster.handle(&config).await;
	let cancel = CancellationToken::new();
	cancel.cancel();

	let phase = assert_cancelled(Session::start(&handle, &config, Workload::default(), cancel).await);
	assert_eq!(phase, Phase::Created);
	assert_eq!(cluster.creates(), 0);
	assert_eq!(cluster.deletes(), 0);
}

#[tokio::test]
async fn test_run_checks_cancellation_before_connecting() {
	let config = config();
	let cancel = CancellationToken::new();
	cancel.cancel();
	let phase = assert_cancelled(Session::run(&config, Workload::default(), cancel).await);
	assert_eq!(phase, Phase::Created);
}

#[tokio::test]
async fn test_cancel_while_submitting_deletes_once() {
	let cluster = FakeCluster::new();
	let config = config();
	let handle = cluster.handle(&config).await;
	let cancel = CancellationToken::new();
	cluster.cancel_on_create(cancel.clone());

	let phase = assert_cancelled(Session::start(&handle, &config, Workload::default(), cancel).await);
	assert_eq!(phase, Phase::Pending);
	assert_eq!(cluster.creates(), 1);
	assert_eq!(cluster.deletes(), 1);
	assert_eq!(cluster.pod_count(), 0);
}

#[tokio::test]
async fn test_cancel_while_watching_deletes_once() {
	let cluster = FakeCluster::new();
	let config = config();
	let handle = cluster.handle(&config).await;
	let cancel = CancellationToken::new();

	{
		let cluster = cluster.clone();
		let cancel = cancel.clone();
		tokio::spawn(async move {
			cluster.wait_for_pod().await;
			cluster.wait_for_watches(1).await;
			cancel.cancel();
		});
	}

	assert_cancelled(Session::start(&handle, &config, Workload::default(), cancel).await);
	assert_eq!(cluster.attaches(), 0);
	assert_eq!(cluster.deletes(), 1);
	assert_eq!(cluster.pod_count(), 0);
}

#[tokio::test]
async fn test_cancel_while_attaching_deletes_once() {
	let cluster = FakeCluster::new();
	let config = config();
	let handle = cluster.handle(&config).await;
	let cancel = CancellationToken::new();
	cluster.block_attach();

	{
		let cluster = cluster.clone();
		let cancel = cancel.clone();
		tokio::spawn(async move {
			let pod = cluster.wait_for_pod().await;
			cluster.run_main(&pod);
			cluster.wait_for_attach_calls(1).await;
			cancel.cancel();
		});
	}

	let phase = assert_cancelled(Session::start(&handle, &config, Workload::default(), cancel).await);
	assert_eq!(phase, Phase::Running);
	assert_eq!(cluster.attaches(), 1);
	assert_eq!(cluster.deletes(), 1);
}

#[tokio::test]
async fn test_cancel_while_attached_closes_channel_and_deletes_once() {
	let cluster = FakeCluster::new();
	let config = config();
	let handle = cluster.handle(&config).await;
	let cancel = CancellationToken::new();

	let driver = {
		let cluster = cluster.clone();
		tokio::spawn(async move {
			let pod = cluster.wait_for_pod().await;
			cluster.run_main(&pod);
			// Keep the container side open so only cancellation can end the read.
			cluster.take_io().await
		})
	};

	let mut session = Session::start(&handle, &config, Workload::default(), cancel.clone())
		.await
		.unwrap();
	let _io = driver.await.unwrap();

	cancel.cancel();
	let mut output = Vec::new();
	session
		.channel()
		.unwrap()
		.read_to_end(&mut output)
		.await
		.unwrap();
	assert!(output.is_empty());

	match session.finish().await {
		Err(SessionError::Cancelled { phase }) => assert_eq!(phase, Phase::Running),
		other => panic!("expected Cancelled, got {other:?}"),
	}
	assert_eq!(cluster.deletes(), 1);
	assert_eq!(cluster.pod_count(), 0);
}

#[tokio::test]
async fn test_closing_the_channel_releases_the_pod() {
	let cluster = FakeCluster::new();
	let config = config();
	let handle = cluster.handle(&config).await;

	let driver = {
		let cluster = cluster.clone();
		tokio::spawn(async move {
			let pod = cluster.wait_for_pod().await;
			cluster.run_main(&pod);
			cluster.take_io().await
		})
	};

	let mut session = Session::start(&handle, &config, Workload::default(), CancellationToken::new())
		.await
		.unwrap();
	let _io = driver.await.unwrap();

	session.take_channel().unwrap().close();
	cluster.wait_for_deletes(1).await;

	session.close().await;
	assert_eq!(cluster.deletes(), 1);
}

#[tokio::test]
async fn test_close_deletes_once() {
	let cluster = FakeCluster::new();
	let config = config();
	let handle = cluster.handle(&config).await;

	let driver = {
		let cluster = cluster.clone();
		tokio::spawn(async move {
			let pod = cluster.wait_for_pod().await;
			cluster.run_main(&pod);
			cluster.take_io().await
		})
	};

	let session = Session::start(&handle, &config, Workload::default(), CancellationToken::new())
		.await
		.unwrap();
	let _io = driver.await.unwrap();

	assert_eq!(session.close().await, Phase::Running);
	assert_eq!(cluster.deletes(), 1);
	assert_eq!(cluster.pod_count(), 0);
}

#[tokio::test]
async fn test_dropping_the_session_releases_the_pod() {
	let cluster = FakeCluster::new();
	let config = config();
	let handle = cluster.handle(&config).await;

	let driver = {
		let cluster = cluster.clone();
		tokio::spawn(async move {
			let pod = cluster.wait_for_pod().await;
			cluster.run_main(&pod);
			cluster.take_io().await
		})
	};

	let session = Session::start(&handle, &config, Workload::default(), CancellationToken::new())
		.await
		.unwrap();
	let _io = driver.await.unwrap();

	drop(session);
	cluster.wait_for_deletes(1).await;
	tokio::task::yield_now().await;
	assert_eq!(cluster.deletes(), 1);
	assert_eq!(cluster.pod_count(), 0);
}

#[tokio::test]
async fn test_dropping_start_midway_releases_the_pod() {
	let cluster = FakeCluster::new();
	let config = config();
	let handle = cluster.handle(&config).await;
	cluster.block_attach();

	let start = {
		let config = config.clone();
		tokio::spawn(async move {
			Session::start(&handle, &config, Workload::default(), CancellationToken::new()).await
		})
	};
	let pod = cluster.wait_for_pod().await;
	cluster.run_main(&pod);
	cluster.wait_for_attach_calls(1).await;

	start.abort();
	cluster.wait_for_deletes(1).await;
	assert_eq!(cluster.pod_count(), 0);
}
