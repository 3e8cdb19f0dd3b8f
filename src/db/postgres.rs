use super::{ConnectTarget, CopyCommand, Credentials, Destination, LoadSession, TableRef};
use log::LevelFilter;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};

/// Opens one dedicated PostgreSQL connection per import.
#[derive(Debug, Clone, Default)]
pub struct PgDestination;

impl PgDestination {
    pub fn new() -> Self {
        Self
    }

    pub fn connect_options(target: &ConnectTarget, credentials: &Credentials) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .username(&credentials.user)
            .password(&credentials.password)
            .database(&credentials.database)
            .application_name("gcs-pg-import");

        let options = match target {
            ConnectTarget::Socket(dir) => options.socket(dir),
            ConnectTarget::Tcp { host, port } => options.host(host).port(*port),
        };

        options.log_statements(LevelFilter::Debug)
    }
}

#[rocket::async_trait]
impl Destination for PgDestination {
    async fn connect(
        &self,
        target: &ConnectTarget,
        credentials: &Credentials,
    ) -> Result<Box<dyn LoadSession>, sqlx::Error> {
        let options = Self::connect_options(target, credentials);
        let conn = PgConnection::connect_with(&options).await?;
        Ok(Box::new(PgSession { conn }))
    }
}

struct PgSession {
    conn: PgConnection,
}

#[rocket::async_trait]
impl LoadSession for PgSession {
    async fn table_columns(&mut self, table: &TableRef) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT column_name::text
            FROM information_schema.columns
            WHERE table_schema = $1 AND table_name = $2
            ORDER BY ordinal_position
            "#,
        )
        .bind(&table.schema)
        .bind(&table.table)
        .fetch_all(&mut self.conn)
        .await
    }

    async fn probe_table(&mut self, table: &TableRef) -> Result<(), sqlx::Error> {
        let probe = format!("SELECT * FROM {} LIMIT 0", table.quoted());
        sqlx::query(&probe).execute(&mut self.conn).await?;
        Ok(())
    }

    async fn begin(&mut self) -> Result<(), sqlx::Error> {
        sqlx::query("BEGIN").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn copy_in(&mut self, copy: &CopyCommand, frames: Vec<Vec<u8>>) -> Result<u64, sqlx::Error> {
        let mut stream = self.conn.copy_in_raw(&copy.statement).await?;

        for frame in frames {
            let sent = stream.send(frame).await.map(|_| ());
            if let Err(err) = sent {
                if let Err(abort_err) = stream.abort(err.to_string()).await {
                    log::debug!("COPY abort after send failure: {}", abort_err);
                }
                return Err(err);
            }
        }

        stream.finish().await
    }

    async fn commit(&mut self) -> Result<(), sqlx::Error> {
        sqlx::query("COMMIT").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), sqlx::Error> {
        sqlx::query("ROLLBACK").execute(&mut self.conn).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), sqlx::Error> {
        let session = *self;
        session.conn.close().await
    }
}
