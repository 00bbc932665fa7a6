use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m001_metric_tables"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let conn = manager.get_connection();
        for sql in UP_SQL {
            conn.execute_unprepared(sql).await?;
        }
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let conn = manager.get_connection();
        for sql in DOWN_SQL {
            conn.execute_unprepared(sql).await?;
        }
        Ok(())
    }
}

// Plain DDL that both PostgreSQL and SQLite accept.
const UP_SQL: [&str; 2] = [
    "CREATE TABLE IF NOT EXISTS gauge (
        name TEXT PRIMARY KEY,
        value DOUBLE PRECISION NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS counter (
        name TEXT PRIMARY KEY,
        value BIGINT NOT NULL
    )",
];

const DOWN_SQL: [&str; 2] = ["DROP TABLE IF EXISTS counter", "DROP TABLE IF EXISTS gauge"];
