//! The shell's per-session state: the connection, the display
//! settings, and the identity fields the prompt can substitute.

use std::io::Write;
use std::time::Instant;

use tracing::{error, info};

use msql::{Connection, Error};

use crate::shell::outputs;

/// Output format selected with `--format`, `\f` or `\x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Raw,
    Sql,
    Expanded,
    Trash,
}

impl Format {
    pub fn parse(name: &str) -> Option<Format> {
        match name.to_lowercase().as_str() {
            "raw" => Some(Format::Raw),
            "sql" => Some(Format::Sql),
            "expanded" => Some(Format::Expanded),
            "trash" => Some(Format::Trash),
            _ => None,
        }
    }
}

pub struct ShellContext {
    pub conn: Connection,
    pub format: Format,
    pub timing: bool,
    pub exit_on_error: bool,
    user: String,
    role: String,
    schema: String,
    host: String,
    port: String,
    database: String,
    version: String,
    release: String,
}

impl ShellContext {
    /// Builds the context, bootstrapping the identity fields with
    /// scalar queries. Failures fall back to placeholders; a shell
    /// with an ugly prompt beats no shell.
    pub fn new(mut conn: Connection) -> ShellContext {
        let user = extract_scalar(&mut conn, "select current_user", "unknown");
        let role = extract_scalar(&mut conn, "select current_role", "unknown");
        let schema = extract_scalar(&mut conn, "select current_schema", "unknown");
        let version = extract_scalar(
            &mut conn,
            "select value from sys.env() where name = 'monet_version'",
            "unknown",
        );
        let release = extract_scalar(
            &mut conn,
            "select value from sys.env() where name = 'monet_release'",
            "unknown",
        );
        let uri = extract_scalar(
            &mut conn,
            "select value from sys.env() where name = 'merovingian_uri'",
            "//unknown/unknown",
        );
        let (host, port, database) = split_uri(&uri);

        ShellContext {
            conn,
            format: Format::Sql,
            timing: false,
            exit_on_error: false,
            user,
            role,
            schema,
            host,
            port,
            database,
            version,
            release,
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn release(&self) -> &str {
        &self.release
    }

    /// Substitutes the `${...}` identity placeholders.
    pub fn template(&self, text: &str) -> String {
        text.replace("${user}", &self.user)
            .replace("${role}", &self.role)
            .replace("${schema}", &self.schema)
            .replace("${host}", &self.host)
            .replace("${port}", &self.port)
            .replace("${database}", &self.database)
    }

    pub fn write(&self, text: &str) {
        let stdout = std::io::stdout();
        let _ = stdout.lock().write_all(text.as_bytes());
    }

    /// Sends a complete statement and renders its reply with the
    /// selected output, followed by the row count and timing footer.
    pub fn run_sql(&mut self, statement: &str) {
        if let Err(err) = self.conn.execute(statement) {
            self.handle_error(err);
            return;
        }

        let start = Instant::now();
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        let rendered = match self.format {
            Format::Raw => outputs::raw(&mut self.conn, &mut out),
            Format::Expanded => outputs::expanded(&mut self.conn, &mut out),
            Format::Trash => outputs::trash(&mut self.conn),
            Format::Sql => outputs::sql(&mut self.conn, &mut out),
        };
        let elapsed = start.elapsed();

        let meta = match rendered {
            Ok(meta) => meta,
            Err(err) => {
                drop(out);
                self.handle_error(err);
                return;
            }
        };

        if let Some(meta) = meta {
            if meta.row_count == 1 {
                let _ = writeln!(out, "(1 row)");
            } else {
                let _ = writeln!(out, "({} rows)", meta.row_count);
            }
            let _ = writeln!(
                out,
                "\nsql:{:.3} opt:{:.3} run:{:.3} clk:{:?}",
                meta.sql_time as f64 / 1000.0,
                meta.opt_time as f64 / 1000.0,
                meta.run_time as f64 / 1000.0,
                elapsed,
            );
        } else if self.timing {
            let _ = writeln!(out, "\nclk:{elapsed:?}");
        }
    }

    fn handle_error(&self, err: Error) {
        error!("{err}");
        if err.is_network() || self.exit_on_error {
            std::process::exit(1);
        }
    }
}

fn extract_scalar(conn: &mut Connection, sql: &str, default: &str) -> String {
    info!(context = "building context", "executing {sql}");
    match conn.query_row(sql) {
        Ok(Some(row)) => row.into_iter().next().unwrap_or_else(|| default.to_string()),
        Ok(None) => default.to_string(),
        Err(err) => {
            error!(context = "building context", "{err}");
            default.to_string()
        }
    }
}

/// Splits a `mapi:monetdb://host:port/database` URI into its pieces,
/// tolerating the `//unknown/unknown` placeholder shape.
fn split_uri(uri: &str) -> (String, String, String) {
    let rest = uri.strip_prefix("mapi:").unwrap_or(uri);
    let rest = match rest.find("://") {
        Some(cut) => &rest[cut + 3..],
        None => rest.trim_start_matches("//"),
    };
    let (authority, path) = match rest.find('/') {
        Some(cut) => (&rest[..cut], &rest[cut + 1..]),
        None => (rest, ""),
    };
    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => (host, port),
        None => (authority, "???"),
    };
    (host.to_string(), port.to_string(), path.to_string())
}
