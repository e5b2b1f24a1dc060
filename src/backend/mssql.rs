//! SQL Server connectivity with connection pooling.
//!
//! Connections are tiberius clients driven through a tokio runtime owned by
//! the pool, so the public API is blocking. Do not call it from inside an
//! async task; use `tokio::task::spawn_blocking` there.

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tiberius::numeric::Numeric;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, ToSql};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use super::{BackendError, BoundParam, Connector, Session};
use crate::types::TypeDescriptor;
use crate::value::BindValue;

pub type Pool = r2d2::Pool<MssqlConnectionManager>;
pub type PooledConnection = r2d2::PooledConnection<MssqlConnectionManager>;

const DEFAULT_PORT: u16 = 1433;
const APPLICATION_NAME: &str = "insertmap";

/// Where and how to connect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionOptions {
    pub user: String,
    pub password: String,
    pub server: String,
    pub database: String,
    pub port: Option<u16>,
    /// When set, authenticate as `DOMAIN\user` over NTLM
    pub domain: Option<String>,
    pub encrypt: bool,
    pub trust_server_certificate: bool,
}

impl ConnectionOptions {
    fn tiberius_config(&self) -> Result<Config, BackendError> {
        let mut config = Config::new();
        config.host(&self.server);
        config.port(self.port.unwrap_or(DEFAULT_PORT));
        config.database(&self.database);
        config.application_name(APPLICATION_NAME);
        config.authentication(self.auth_method()?);

        if self.encrypt {
            config.encryption(EncryptionLevel::Required);
        } else {
            // login packet only
            config.encryption(EncryptionLevel::Off);
        }
        if self.trust_server_certificate {
            config.trust_cert();
        }

        Ok(config)
    }

    #[cfg(windows)]
    fn auth_method(&self) -> Result<AuthMethod, BackendError> {
        match &self.domain {
            Some(domain) if !domain.is_empty() => Ok(AuthMethod::windows(
                format!("{}\\{}", domain, self.user),
                self.password.clone(),
            )),
            _ => Ok(AuthMethod::sql_server(&self.user, &self.password)),
        }
    }

    #[cfg(not(windows))]
    fn auth_method(&self) -> Result<AuthMethod, BackendError> {
        match &self.domain {
            Some(domain) if !domain.is_empty() => Err(BackendError::Connect(format!(
                "Windows authentication for domain '{}' is only available on Windows",
                domain
            ))),
            _ => Ok(AuthMethod::sql_server(&self.user, &self.password)),
        }
    }

    /// `server:port/database`, without credentials
    pub fn display_target(&self) -> String {
        format!(
            "{}:{}/{}",
            self.server,
            self.port.unwrap_or(DEFAULT_PORT),
            self.database
        )
    }
}

/// A pooled SQL Server client
pub struct MssqlConnection {
    client: Client<Compat<TcpStream>>,
    runtime: Arc<Runtime>,
    in_transaction: bool,
    broken: bool,
}

impl MssqlConnection {
    fn simple(&mut self, sql: &str) -> Result<(), BackendError> {
        let runtime = Arc::clone(&self.runtime);
        let client = &mut self.client;
        runtime.block_on(async {
            client
                .simple_query(sql)
                .await
                .map_err(query_error)?
                .into_results()
                .await
                .map_err(query_error)?;
            Ok::<(), BackendError>(())
        })
    }

    /// Run `sql` through `sp_executesql` so the server sees the statement
    /// with its own `@pN` names and declared types.
    fn execute_declared(&mut self, sql: &str, params: &[BoundParam]) -> Result<u64, BackendError> {
        let (outer, declarations) = sp_executesql_call(params);
        let statement = sql.to_string();

        let mut args: Vec<&dyn ToSql> = Vec::with_capacity(params.len() + 2);
        args.push(&statement);
        args.push(&declarations);
        for param in params {
            args.push(&param.value);
        }

        let runtime = Arc::clone(&self.runtime);
        let client = &mut self.client;
        runtime.block_on(async {
            let result = client.execute(outer, &args).await.map_err(query_error)?;
            Ok::<u64, BackendError>(result.rows_affected().first().copied().unwrap_or(0))
        })
    }
}

fn query_error(e: tiberius::error::Error) -> BackendError {
    BackendError::Query(e.to_string())
}

/// Build `EXEC sp_executesql @P1, @P2, @p0 = @P3, ...` and the matching
/// declaration list. `@P1` carries the statement and `@P2` the declarations.
fn sp_executesql_call(params: &[BoundParam]) -> (String, String) {
    let mut outer = String::from("EXEC sp_executesql @P1, @P2");
    for (idx, param) in params.iter().enumerate() {
        outer.push_str(&format!(", @{} = @P{}", param.name, idx + 3));
    }

    let declarations = params
        .iter()
        .map(|p| format!("@{} {}", p.name, p.descriptor.declaration()))
        .collect::<Vec<_>>()
        .join(", ");

    (outer, declarations)
}

impl ToSql for BindValue {
    fn to_sql(&self) -> ColumnData<'_> {
        match self {
            BindValue::Null(descriptor) => typed_null(descriptor),
            BindValue::String(s) => ColumnData::String(Some(Cow::Borrowed(s.as_str()))),
            BindValue::Int(i) => ColumnData::I32(Some(*i)),
            BindValue::BigInt(i) => ColumnData::I64(Some(*i)),
            BindValue::Float(f) => ColumnData::F64(Some(*f)),
            BindValue::Decimal(d) => {
                // scale never exceeds 28 for rust_decimal
                let scale = u8::try_from(d.scale()).unwrap_or(28);
                ColumnData::Numeric(Some(Numeric::new_with_scale(d.mantissa(), scale)))
            }
            BindValue::Bit(b) => ColumnData::Bit(Some(*b)),
            BindValue::Date(d) => d.to_sql(),
            BindValue::DateTime2(dt) => dt.to_sql(),
            BindValue::Guid(g) => ColumnData::Guid(Some(*g)),
        }
    }
}

fn typed_null(descriptor: &TypeDescriptor) -> ColumnData<'static> {
    match descriptor {
        TypeDescriptor::VarChar(_) | TypeDescriptor::NVarChar(_) => ColumnData::String(None),
        TypeDescriptor::Int => ColumnData::I32(None),
        TypeDescriptor::BigInt => ColumnData::I64(None),
        TypeDescriptor::Float => ColumnData::F64(None),
        TypeDescriptor::Decimal { .. } => ColumnData::Numeric(None),
        TypeDescriptor::Bit => ColumnData::Bit(None),
        TypeDescriptor::Date => ColumnData::Date(None),
        TypeDescriptor::DateTime2 => ColumnData::DateTime2(None),
        TypeDescriptor::UniqueIdentifier => ColumnData::Guid(None),
    }
}

/// r2d2 connection manager for tiberius clients
pub struct MssqlConnectionManager {
    options: ConnectionOptions,
    runtime: Arc<Runtime>,
}

impl MssqlConnectionManager {
    pub fn new(options: ConnectionOptions, runtime: Arc<Runtime>) -> Self {
        Self { options, runtime }
    }
}

impl r2d2::ManageConnection for MssqlConnectionManager {
    type Connection = MssqlConnection;
    type Error = BackendError;

    fn connect(&self) -> Result<MssqlConnection, BackendError> {
        let config = self.options.tiberius_config()?;
        let addr = config.get_addr();

        let client = self.runtime.block_on(async {
            let tcp = TcpStream::connect(&addr)
                .await
                .map_err(|e| BackendError::Connect(format!("{}: {}", addr, e)))?;
            tcp.set_nodelay(true).ok();

            Client::connect(config, tcp.compat_write())
                .await
                .map_err(|e| BackendError::Connect(e.to_string()))
        })?;

        tracing::debug!("Opened SQL Server connection to {}", self.options.display_target());

        Ok(MssqlConnection {
            client,
            runtime: Arc::clone(&self.runtime),
            in_transaction: false,
            broken: false,
        })
    }

    fn is_valid(&self, conn: &mut MssqlConnection) -> Result<(), BackendError> {
        conn.simple("SELECT 1")
    }

    fn has_broken(&self, conn: &mut MssqlConnection) -> bool {
        // never hand out a connection that may still hold a transaction
        conn.broken || conn.in_transaction
    }
}

#[derive(Debug)]
struct TracingErrorHandler;

impl r2d2::HandleError<BackendError> for TracingErrorHandler {
    fn handle_error(&self, error: BackendError) {
        tracing::warn!("SQL Server pool error: {}", error);
    }
}

/// Database connection pool manager
#[derive(Clone)]
pub struct Database {
    pool: Arc<Pool>,
    target: String,
}

impl Database {
    /// Create a pool with the fixed default policy
    ///
    /// # Example
    /// ```ignore
    /// let db = Database::new(ConnectionOptions {
    ///     user: "sa".to_string(),
    ///     password: "secret".to_string(),
    ///     server: "localhost".to_string(),
    ///     database: "people".to_string(),
    ///     port: None,
    ///     domain: None,
    ///     encrypt: true,
    ///     trust_server_certificate: true,
    /// })?;
    /// ```
    pub fn new(options: ConnectionOptions) -> Result<Self, BackendError> {
        Self::new_with_config(options, DatabaseConfig::default())
    }

    /// Create a new database with custom configuration
    pub fn new_with_config(
        options: ConnectionOptions,
        config: DatabaseConfig,
    ) -> Result<Self, BackendError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.runtime_threads)
            .thread_name("insertmap-io")
            .enable_all()
            .build()
            .map_err(|e| BackendError::Runtime(format!("Failed to create async runtime: {}", e)))?;

        let target = options.display_target();
        let manager = MssqlConnectionManager::new(options, Arc::new(runtime));

        // with no idle minimum this returns without connecting
        let pool = r2d2::Pool::builder()
            .max_size(config.max_connections)
            .min_idle(Some(config.min_idle))
            .connection_timeout(Duration::from_secs(config.connection_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .error_handler(Box::new(TracingErrorHandler))
            .build(manager)
            .map_err(|e| BackendError::Pool(e.to_string()))?;

        Ok(Database {
            pool: Arc::new(pool),
            target,
        })
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<PooledConnection, BackendError> {
        self.pool
            .get()
            .map_err(|e| BackendError::Pool(e.to_string()))
    }

    /// Check that the server accepts a login and a trivial query
    pub fn test_connection(&self) -> Result<(), BackendError> {
        let mut conn = self.get_connection()?;
        conn.simple("SELECT 1")
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Connector for Database {
    type Session = MssqlSession;

    fn connect(&self) -> Result<MssqlSession, BackendError> {
        let conn = self.get_connection()?;
        tracing::debug!("Acquired pooled connection to {}", self.target);
        Ok(MssqlSession { conn })
    }
}

/// A run's hold on one pooled connection
pub struct MssqlSession {
    conn: PooledConnection,
}

impl Session for MssqlSession {
    fn execute(&mut self, sql: &str, params: &[BoundParam]) -> Result<u64, BackendError> {
        self.conn.execute_declared(sql, params)
    }

    fn begin_transaction(&mut self) -> Result<(), BackendError> {
        self.conn.simple("BEGIN TRANSACTION")?;
        self.conn.in_transaction = true;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), BackendError> {
        self.conn.simple("COMMIT TRANSACTION")?;
        self.conn.in_transaction = false;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), BackendError> {
        // the server may already have aborted the transaction
        match self.conn.simple("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION") {
            Ok(()) => {
                self.conn.in_transaction = false;
                Ok(())
            }
            Err(e) => {
                self.conn.broken = true;
                Err(e)
            }
        }
    }

    fn close(mut self) -> Result<(), BackendError> {
        if self.conn.in_transaction {
            tracing::warn!("Discarding connection that still holds an open transaction");
            self.conn.broken = true;
        }
        // dropping the pooled connection returns it to the pool
        Ok(())
    }
}

/// Database configuration options
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub min_idle: u32,
    pub connection_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub runtime_threads: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            max_connections: 10,         // Max connections in pool
            min_idle: 0,                 // Connect lazily
            connection_timeout_secs: 15, // Wait up to 15s for a connection
            idle_timeout_secs: 30,       // Close idle connections after 30s
            runtime_threads: 2,
        }
    }
}
