//! SQL run by the locker's dedicated session.

/// Highest priority ceiling that still has unmet demand, or `NULL` when none has.
pub const CREATE_HIGHEST_REMAINING_PRIORITY: &str = "
CREATE OR REPLACE FUNCTION pg_temp.highest_remaining_priority(priorities jsonb)
RETURNS smallint AS $$
    SELECT max(key::smallint)
    FROM jsonb_each(priorities)
    WHERE value::text::integer > 0
$$
STABLE
LANGUAGE SQL";

/// Try to lock `job`; on success decrement the demand of the tightest ceiling
/// that admits its priority. Volatile, since it takes a lock.
pub const CREATE_LOCK_AND_UPDATE_PRIORITIES: &str = "
CREATE OR REPLACE FUNCTION pg_temp.lock_and_update_priorities(
    priorities jsonb,
    job jobs,
    OUT remaining_priorities jsonb,
    OUT locked boolean
) AS $$
    WITH
        lock_taken AS (
            SELECT pg_try_advisory_lock((job).id) AS taken
        ),
        relevant AS (
            SELECT key AS ceiling, value::text::integer AS demand
            FROM jsonb_each(priorities)
            WHERE key::smallint >= (job).priority
              AND value::text::integer > 0
            ORDER BY key::smallint ASC
            LIMIT 1
        )
    SELECT
        CASE
            WHEN (SELECT taken FROM lock_taken) AND EXISTS (SELECT 1 FROM relevant) THEN
                priorities || jsonb_build_object(
                    (SELECT ceiling FROM relevant),
                    (SELECT demand FROM relevant) - 1
                )
            ELSE priorities
        END,
        (SELECT taken FROM lock_taken)
$$
VOLATILE
LANGUAGE SQL";

/// Walk the queue in `(priority, run_at, id)` order one row at a time, locking
/// as it goes, until every ceiling's demand is met or the queue runs dry.
/// The lateral join evaluates the lock function once per candidate row.
///
/// `$1` queue, `$2` ids already held, `$3` demand per ceiling, `$4` schema version.
pub fn poll_jobs(columns: &str) -> String {
    format!(
        "WITH RECURSIVE polled AS (
            SELECT (t.job).*, l.locked, l.remaining_priorities
            FROM (
                SELECT j AS job
                FROM jobs AS j
                WHERE j.queue = $1::text
                  AND j.job_schema_version = $4
                  AND NOT j.id = ANY($2::bigint[])
                  AND j.priority <= pg_temp.highest_remaining_priority($3::jsonb)
                  AND j.run_at <= now()
                  AND j.finished_at IS NULL
                  AND j.expired_at IS NULL
                ORDER BY j.priority, j.run_at, j.id
                LIMIT 1
            ) AS t
            JOIN LATERAL (
                SELECT * FROM pg_temp.lock_and_update_priorities($3::jsonb, t.job)
            ) AS l ON true
            UNION ALL (
                SELECT (t.job).*, l.locked, l.remaining_priorities
                FROM (
                    SELECT
                        polled.remaining_priorities AS priorities,
                        (
                            SELECT j
                            FROM jobs AS j
                            WHERE j.queue = $1::text
                              AND j.job_schema_version = $4
                              AND NOT j.id = ANY($2::bigint[])
                              AND j.priority <= pg_temp.highest_remaining_priority(
                                  polled.remaining_priorities
                              )
                              AND j.run_at <= now()
                              AND j.finished_at IS NULL
                              AND j.expired_at IS NULL
                              AND (j.priority, j.run_at, j.id)
                                  > (polled.priority, polled.run_at, polled.id)
                            ORDER BY j.priority, j.run_at, j.id
                            LIMIT 1
                        ) AS job
                    FROM polled
                    WHERE polled.id IS NOT NULL
                      AND pg_temp.highest_remaining_priority(polled.remaining_priorities)
                          IS NOT NULL
                    LIMIT 1
                ) AS t
                JOIN LATERAL (
                    SELECT * FROM pg_temp.lock_and_update_priorities(t.priorities, t.job)
                ) AS l ON true
                WHERE (t.job).id IS NOT NULL
            )
        )
        SELECT {columns}
        FROM polled
        WHERE locked"
    )
}

pub fn fetch_live_jobs(columns: &str) -> String {
    format!(
        "SELECT {columns}
        FROM jobs
        WHERE id = ANY($1::bigint[])
          AND finished_at IS NULL
          AND expired_at IS NULL"
    )
}

pub const CLEAN_LOCKERS: &str = "
DELETE FROM lockers
WHERE pid = pg_backend_pid()
   OR pid NOT IN (SELECT pid FROM pg_stat_activity)";

pub const REGISTER_LOCKER: &str = "
INSERT INTO lockers (
    pid,
    worker_count,
    worker_priorities,
    process_id,
    hostname,
    listening,
    queues,
    job_schema_version
)
VALUES (pg_backend_pid(), $1, $2::smallint[], $3, $4, $5, $6::text[], $7)";

pub const UNREGISTER_LOCKER: &str = "DELETE FROM lockers WHERE pid = pg_backend_pid()";
