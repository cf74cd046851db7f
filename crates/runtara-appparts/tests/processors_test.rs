// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for background processor reconciliation.

mod common;

use std::time::Duration;

use common::{TestContext, partition_ids, wait_until};
use runtara_appparts::processors::ProcessorState;
use runtara_appparts::{AppDef, AppQName, CallerKind, PartitionId, PoolSizes, QName};

const PARTS: u16 = 10;

fn app() -> AppQName {
    AppQName::from("acme/shop")
}

fn names(list: &[&str]) -> Vec<QName> {
    list.iter().map(|n| QName::from(*n)).collect()
}

/// First definition: one actualizer and one job.
fn def_p1() -> AppDef {
    AppDef::new()
        .with_command("shop.Order")
        .with_projector("shop.Stock", false)
        .with_job("shop.Cleanup", "0 * * * * *")
}

/// Second definition: actualizer replaced, job kept, new job added.
fn def_p2() -> AppDef {
    AppDef::new()
        .with_command("shop.Order")
        .with_projector("shop.Prices", false)
        .with_projector("shop.Stock", true)
        .with_job("shop.Cleanup", "0 * * * * *")
        .with_job("shop.Report", "0 0 * * * *")
}

async fn deploy_all(ctx: &TestContext, def: AppDef) {
    ctx.parts
        .deploy_app(app(), def, PARTS, PoolSizes::uniform(2), PARTS as usize)
        .unwrap();
    ctx.parts
        .deploy_app_partitions(&app(), &partition_ids(PARTS))
        .await
        .unwrap();
}

fn tracked_names(ctx: &TestContext, partition: PartitionId) -> Vec<QName> {
    ctx.parts
        .partition_processors(&app(), partition)
        .unwrap()
        .enumerate()
        .into_iter()
        .map(|(name, _)| name)
        .collect()
}

// ============================================================================
// Reconciliation
// ============================================================================

#[tokio::test]
async fn test_deploy_starts_declared_processors() {
    let ctx = TestContext::new();
    deploy_all(&ctx, def_p1()).await;

    let workers = ctx.parts.workers(&app()).unwrap();
    assert_eq!(workers.len(), PARTS as usize);
    for (_, list) in &workers {
        assert_eq!(
            list,
            &vec![
                (QName::from("shop.Cleanup"), CallerKind::Scheduler),
                (QName::from("shop.Stock"), CallerKind::Actualizer),
            ]
        );
    }

    // One actualizer per partition, one job run per owned workspace.
    assert!(
        wait_until(Duration::from_secs(5), || {
            ctx.actualizers.running.total() == PARTS as usize
                && ctx.schedulers.running.total() == PARTS as usize
        })
        .await
    );

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_redeploy_with_same_def_is_idempotent() {
    let ctx = TestContext::new();
    deploy_all(&ctx, def_p1()).await;
    assert!(
        wait_until(Duration::from_secs(5), || ctx.actualizers.running.total()
            == PARTS as usize)
        .await
    );
    let before = ctx.parts.workers(&app()).unwrap();
    let started = ctx.actualizers.running.started_total();

    for _ in 0..3 {
        ctx.parts
            .deploy_app_partitions(&app(), &partition_ids(PARTS))
            .await
            .unwrap();
    }

    assert_eq!(ctx.parts.workers(&app()).unwrap(), before);
    assert_eq!(ctx.actualizers.running.started_total(), started);
    assert_eq!(ctx.actualizers.running.max_instances(), 1);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_upgrade_then_redeploy_odd_partitions() {
    let ctx = TestContext::new();
    deploy_all(&ctx, def_p1()).await;

    ctx.parts.upgrade_app_def(&app(), def_p2()).unwrap();

    // Upgrade alone does not touch processors.
    for id in partition_ids(PARTS) {
        assert_eq!(
            tracked_names(&ctx, id),
            names(&["shop.Cleanup", "shop.Stock"])
        );
    }

    let odd: Vec<PartitionId> = partition_ids(PARTS)
        .into_iter()
        .filter(|p| p.0 % 2 == 1)
        .collect();
    ctx.parts.deploy_app_partitions(&app(), &odd).await.unwrap();

    for id in partition_ids(PARTS) {
        let expected = if id.0 % 2 == 1 {
            names(&["shop.Cleanup", "shop.Prices", "shop.Report"])
        } else {
            names(&["shop.Cleanup", "shop.Stock"])
        };
        assert_eq!(tracked_names(&ctx, id), expected, "partition {}", id);

        // Stopped processors have finished by the time deploy returns.
        if id.0 % 2 == 1 {
            assert!(
                !ctx.actualizers
                    .running
                    .names(&app(), id)
                    .contains(&QName::from("shop.Stock"))
            );
        }
    }

    assert!(
        wait_until(Duration::from_secs(5), || {
            odd.iter().all(|id| {
                ctx.actualizers.running.names(&app(), *id) == names(&["shop.Prices"])
                    && ctx.schedulers.running.names(&app(), *id)
                        == names(&["shop.Cleanup", "shop.Report"])
            })
        })
        .await
    );

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_removed_job_is_stopped() {
    let ctx = TestContext::new();
    deploy_all(&ctx, def_p1()).await;

    ctx.parts
        .upgrade_app_def(&app(), AppDef::new().with_command("shop.Order"))
        .unwrap();
    ctx.parts
        .deploy_app_partitions(&app(), &partition_ids(PARTS))
        .await
        .unwrap();

    for id in partition_ids(PARTS) {
        assert!(tracked_names(&ctx, id).is_empty());
        let processors = ctx.parts.partition_processors(&app(), id).unwrap();
        assert_eq!(processors.count(), 0);
        assert_eq!(processors.state(&"shop.Cleanup".into()), None);
    }
    assert_eq!(ctx.actualizers.running.total(), 0);
    assert_eq!(ctx.schedulers.running.total(), 0);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_started_processor_state() {
    let ctx = TestContext::new();
    deploy_all(&ctx, def_p1()).await;

    let processors = ctx
        .parts
        .partition_processors(&app(), PartitionId(0))
        .unwrap();
    assert_eq!(
        processors.state(&"shop.Stock".into()),
        Some(ProcessorState::Started)
    );

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_job_without_owned_workspaces_idles() {
    let ctx = TestContext::new();
    ctx.parts
        .deploy_app(app(), def_p1(), 4, PoolSizes::uniform(1), 1)
        .unwrap();
    ctx.parts
        .deploy_app_partitions(&app(), &partition_ids(4))
        .await
        .unwrap();

    // Every partition tracks the job, only the owner of the single workspace runs it.
    for id in partition_ids(4) {
        assert!(tracked_names(&ctx, id).contains(&QName::from("shop.Cleanup")));
    }
    assert!(
        wait_until(Duration::from_secs(5), || ctx.schedulers.running.total() == 1).await
    );
    assert_eq!(
        ctx.schedulers.running.names(&app(), PartitionId(0)),
        names(&["shop.Cleanup"])
    );

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_deploys_of_one_partition() {
    let ctx = TestContext::new();
    ctx.parts
        .deploy_app(app(), def_p1(), 1, PoolSizes::uniform(1), 1)
        .unwrap();

    let deploys: Vec<_> = (0..8)
        .map(|_| {
            let parts = ctx.parts.clone();
            tokio::spawn(async move {
                parts
                    .deploy_app_partitions(&app(), &[PartitionId(0)])
                    .await
                    .unwrap();
            })
        })
        .collect();
    for d in deploys {
        d.await.unwrap();
    }

    assert_eq!(
        tracked_names(&ctx, PartitionId(0)),
        names(&["shop.Cleanup", "shop.Stock"])
    );
    assert!(
        wait_until(Duration::from_secs(5), || ctx.actualizers.running.total() == 1).await
    );
    assert_eq!(ctx.actualizers.running.started_total(), 1);

    ctx.shutdown().await;
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_stops_every_processor() {
    let ctx = TestContext::new();
    deploy_all(&ctx, def_p1()).await;
    ctx.parts.upgrade_app_def(&app(), def_p2()).unwrap();
    ctx.parts
        .deploy_app_partitions(&app(), &[PartitionId(3)])
        .await
        .unwrap();

    ctx.shutdown().await;

    for id in partition_ids(PARTS) {
        let processors = ctx.parts.partition_processors(&app(), id).unwrap();
        assert_eq!(processors.count(), 0, "partition {}", id);
    }
    assert_eq!(ctx.actualizers.running.total(), 0);
    assert_eq!(ctx.schedulers.running.total(), 0);
    assert!(
        ctx.parts
            .workers(&app())
            .unwrap()
            .values()
            .all(|list| list.is_empty())
    );
}
