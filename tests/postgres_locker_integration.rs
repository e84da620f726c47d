use async_trait::async_trait;
use forge_lock::application::usecases::run_worker_once::WorkerConfig;
use forge_lock::domain::entities::job::Job;
use forge_lock::domain::value_objects::priority::PriorityThreshold;
use forge_lock::infrastructure::db::postgres::{PostgresConfig, PostgresDatabase};
use forge_lock::infrastructure::db::repositories::Repositories;
use forge_lock::{AppContext, HandlerRegistry, JobError, JobHandler, Locker, LockerOptions, Resolution};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

const SCHEMA: &str = include_str!("../sql/schema.sql");

fn test_db_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok()
}

struct Finishes;

#[async_trait]
impl JobHandler for Finishes {
    async fn run(&self, _job: &Job) -> Result<Resolution, JobError> {
        Ok(Resolution::Finish)
    }
}

async fn setup(url: &str) -> (PgPool, Arc<AppContext>) {
    let db = Arc::new(
        PostgresDatabase::connect(&PostgresConfig::new(url))
            .await
            .unwrap(),
    );
    sqlx::raw_sql(SCHEMA).execute(db.pool()).await.unwrap();
    let handlers = HandlerRegistry::new().register("Finishes", Finishes);
    let ctx = AppContext::with_tracing_notifier(Repositories::postgres(db.clone()), handlers);
    (db.pool().clone(), Arc::new(ctx))
}

fn options(queue: &str) -> LockerOptions {
    LockerOptions {
        queues: vec![queue.to_string()],
        poll_interval: Duration::from_secs(60),
        wait_period: Duration::from_millis(10),
        worker_priorities: vec![PriorityThreshold::AtMost(10), PriorityThreshold::Any],
        worker: WorkerConfig {
            store_retry_delay: Duration::from_millis(10),
            ..WorkerConfig::default()
        },
        ..LockerOptions::default()
    }
}

async fn insert_job(pool: &PgPool, queue: &str, priority: i16) -> i64 {
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO jobs (queue, priority, job_class)
        VALUES ($1, $2, 'Finishes')
        RETURNING id",
    )
    .bind(queue)
    .bind(priority)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn wait_until_finished(pool: &PgPool, id: i64) -> bool {
    for _ in 0..500 {
        let finished = sqlx::query_scalar::<_, bool>(
            "SELECT finished_at IS NOT NULL FROM jobs WHERE id = $1",
        )
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap();
        if finished {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn advisory_locks_on(pool: &PgPool, ids: &[i64]) -> i64 {
    sqlx::query_scalar::<_, i64>(
        "SELECT count(*)
        FROM pg_locks
        WHERE locktype = 'advisory'
          AND ((classid::bigint << 32) | objid::bigint) = ANY($1)",
    )
    .bind(ids)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn cleanup(pool: &PgPool, queue: &str) {
    sqlx::query("DELETE FROM jobs WHERE queue = $1")
        .bind(queue)
        .execute(pool)
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_due_job_before_start_when_locker_runs_should_poll_and_finish_it() {
    let Some(url) = test_db_url() else {
        return;
    };
    let (pool, ctx) = setup(&url).await;
    let queue = format!("it_poll_{}", std::process::id());
    let id = insert_job(&pool, &queue, 5).await;

    let locker = Locker::connect(ctx, &url, options(&queue)).await.unwrap();
    let finished = wait_until_finished(&pool, id).await;
    locker.stop_and_wait().await.unwrap();

    assert!(finished);
    assert_eq!(advisory_locks_on(&pool, &[id]).await, 0);
    cleanup(&pool, &queue).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_running_locker_when_job_inserted_should_be_notified_and_finish_it() {
    let Some(url) = test_db_url() else {
        return;
    };
    let (pool, ctx) = setup(&url).await;
    let queue = format!("it_notify_{}", std::process::id());

    let locker = Locker::connect(ctx, &url, options(&queue)).await.unwrap();
    let registered = sqlx::query_scalar::<_, i64>(
        "SELECT count(*) FROM lockers WHERE $1 = ANY(queues)",
    )
    .bind(&queue)
    .fetch_one(&pool)
    .await
    .unwrap();
    let ids = [
        insert_job(&pool, &queue, 1).await,
        insert_job(&pool, &queue, 40).await,
    ];
    let mut finished = true;
    for id in ids {
        finished &= wait_until_finished(&pool, id).await;
    }
    locker.stop_and_wait().await.unwrap();

    assert_eq!(registered, 1);
    assert!(finished);
    assert_eq!(advisory_locks_on(&pool, &ids).await, 0);
    let remaining = sqlx::query_scalar::<_, i64>(
        "SELECT count(*) FROM lockers WHERE $1 = ANY(queues)",
    )
    .bind(&queue)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(remaining, 0);
    cleanup(&pool, &queue).await;
}
