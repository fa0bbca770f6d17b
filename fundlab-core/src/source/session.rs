//! A single authenticated Postgres session.
//!
//! The session is an owned value: callers pass `&mut Session` to the steps
//! that need it and finish with `close()`. Dropping an open session still
//! tears the socket down, but skips the graceful terminate message.

use super::credentials::Credentials;
use super::decode::{ColumnBuffer, PgKind};
use super::{FetchError, QuerySource, SourceError};
use crate::config::{ConnectionConfig, SslMode};
use crate::query::Query;
use polars::prelude::{Column, DataFrame};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::{Column as _, ConnectOptions, Connection, Executor, Row, Statement, TypeInfo};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

fn pg_ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyCa => PgSslMode::VerifyCa,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

/// Connection options for `config` and `credentials`.
pub fn connect_options(config: &ConnectionConfig, credentials: &Credentials) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .database(&config.database)
        .username(&credentials.username)
        .password(credentials.password.expose())
        .ssl_mode(pg_ssl_mode(config.sslmode))
        .application_name("fundlab")
}

/// An open session against the remote database.
pub struct Session {
    conn: Option<PgConnection>,
    target: String,
}

impl Session {
    /// Open and authenticate a session.
    pub async fn connect(
        config: &ConnectionConfig,
        credentials: &Credentials,
    ) -> Result<Self, SourceError> {
        let target = format!("{}:{}/{}", config.host, config.port, config.database);
        info!(%target, user = %credentials.username, sslmode = ?config.sslmode, "connecting");

        let options = connect_options(config, credentials);
        let timeout = Duration::from_secs(config.connect_timeout_secs);
        let conn = match tokio::time::timeout(timeout, options.connect()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                return Err(SourceError::Connect {
                    target,
                    cause: e.to_string(),
                })
            }
            Err(_) => {
                return Err(SourceError::ConnectTimeout {
                    target,
                    secs: config.connect_timeout_secs,
                })
            }
        };

        info!(%target, "connected");
        Ok(Self {
            conn: Some(conn),
            target,
        })
    }

    /// `host:port/database` of this session.
    pub fn target(&self) -> &str {
        &self.target
    }

    fn conn(&mut self) -> &mut PgConnection {
        self.conn
            .as_mut()
            .unwrap_or_else(|| unreachable!("connection is only taken by close()"))
    }

    /// Tables and views in `schema`, sorted by name.
    pub async fn list_tables(&mut self, schema: &str) -> Result<Vec<String>, SourceError> {
        let sql = "SELECT table_name FROM information_schema.tables \
                   WHERE table_schema = $1 ORDER BY table_name";
        let rows = sqlx::query(sql)
            .bind(schema)
            .fetch_all(self.conn())
            .await
            .map_err(|e| SourceError::Query {
                sql: sql.to_string(),
                cause: e.to_string(),
            })?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>(0).map_err(|e| SourceError::Decode {
                    column: "table_name".into(),
                    cause: e.to_string(),
                })
            })
            .collect()
    }

    /// Execute one statement and decode the full result set.
    pub async fn fetch_frame(&mut self, sql: &str) -> Result<DataFrame, SourceError> {
        let started = Instant::now();
        let query_err = |e: sqlx::Error| SourceError::Query {
            sql: sql.to_string(),
            cause: e.to_string(),
        };

        // Preparing first yields column metadata even for empty results.
        let statement = self.conn().prepare(sql).await.map_err(query_err)?;
        let mut columns: Vec<(String, PgKind)> = Vec::with_capacity(statement.columns().len());
        for column in statement.columns() {
            let type_name = column.type_info().name().to_string();
            let kind = PgKind::from_type_name(&type_name).ok_or_else(|| {
                SourceError::UnsupportedType {
                    column: column.name().to_string(),
                    type_name: type_name.clone(),
                }
            })?;
            columns.push((column.name().to_string(), kind));
        }
        debug!(columns = columns.len(), "statement prepared");

        let rows = sqlx::query(sql)
            .fetch_all(self.conn())
            .await
            .map_err(query_err)?;
        info!(
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "result set received"
        );

        let mut buffers: Vec<ColumnBuffer> = columns
            .iter()
            .map(|(_, kind)| ColumnBuffer::with_capacity(*kind, rows.len()))
            .collect();
        for row in &rows {
            for (i, ((name, kind), buffer)) in columns.iter().zip(buffers.iter_mut()).enumerate() {
                buffer.push_cell(row, i, *kind, name)?;
            }
        }
        drop(rows);

        let frame_columns = columns
            .iter()
            .zip(buffers)
            .map(|((name, _), buffer)| buffer.into_column(name))
            .collect::<Result<Vec<Column>, _>>()?;
        DataFrame::new(frame_columns).map_err(|e| SourceError::Frame(e.to_string()))
    }

    /// Terminate the session gracefully.
    pub async fn close(mut self) -> Result<(), SourceError> {
        match self.conn.take() {
            Some(conn) => {
                conn.close().await.map_err(|e| SourceError::Connect {
                    target: self.target.clone(),
                    cause: format!("close failed: {e}"),
                })?;
                info!(target = %self.target, "session closed");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.conn.is_some() {
            warn!(target = %self.target, "session dropped without close()");
        }
    }
}

impl QuerySource for Session {
    fn name(&self) -> String {
        format!("postgres {}", self.target)
    }

    async fn fetch(&mut self, query: &Query) -> Result<DataFrame, FetchError> {
        let sql = query.to_sql();
        debug!(%sql, "executing");
        Ok(self.fetch_frame(&sql).await?)
    }
}
