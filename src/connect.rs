//! Connection establishment and the MAPI login handshake.
//!
//! Opening a connection dials TCP, answers the server's salted
//! challenge with a hashed password digest, follows merovingian proxy
//! redirects, applies the configured schema/role, and switches off
//! server-side reply chunking before handing the connection over.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::error::{Error, Result};
use crate::mapi_stream::MapiStream;
use crate::reply::Reply;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const CONFIGURE_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_LOGIN_ATTEMPTS: u8 = 10;

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct Config {
    /// `host:port` in one field, so a redirect can replace it wholesale.
    pub host: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub schema: Option<String>,
    pub role: Option<String>,
}

/// An authenticated, configured MAPI connection.
pub struct Connection {
    stream: MapiStream<TcpStream>,
}

impl Connection {
    /// Dials and logs in, chasing proxy redirects onto fresh sockets.
    pub fn connect(config: &Config) -> Result<Connection> {
        let addr = config
            .host
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::driver_detailed("unresolvable host", &*config.host))?;

        let socket = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        set_deadline(&socket, Some(HANDSHAKE_TIMEOUT))?;
        let mut stream = MapiStream::from_stream(socket);

        if let Some(redirect) = authenticate(&mut stream, config, 0)? {
            let mut config = config.clone();
            config.host = redirect;
            return Connection::connect(&config);
        }

        set_deadline(stream.get_ref(), Some(CONFIGURE_TIMEOUT))?;
        configure(&mut stream, config)?;
        disable_reply_size(&mut stream)?;
        set_deadline(stream.get_ref(), None)?;

        Ok(Connection { stream })
    }

    /// Sends the concatenation of `parts` as one message. The first
    /// part carries the mode byte (`s`, `X`, ...).
    pub fn send(&mut self, parts: &[&str]) -> Result<()> {
        self.stream.send(parts)
    }

    /// Sends a complete statement as produced by the assembler, the
    /// terminating semicolon included.
    pub fn execute(&mut self, statement: &str) -> Result<()> {
        self.stream.send(&["s", statement])
    }

    pub fn read_frame(&mut self) -> Result<(&[u8], bool)> {
        self.stream.read_frame()
    }

    pub fn read_message(&mut self) -> Result<String> {
        self.stream.read_message()
    }

    pub fn read_reply(&mut self) -> Result<Reply<'_, TcpStream>> {
        self.stream.read_reply()
    }

    /// Runs `sql` and drains the full result table. Non-tabular
    /// replies come back as an empty table.
    pub fn query_rows(&mut self, sql: &str) -> Result<Vec<Vec<String>>> {
        self.stream.send(&["s", sql, ";"])?;
        match self.stream.read_reply()? {
            Reply::Query(rows) => rows.rows(),
            _ => Ok(Vec::new()),
        }
    }

    pub fn query_row(&mut self, sql: &str) -> Result<Option<Vec<String>>> {
        Ok(self.query_rows(sql)?.into_iter().next())
    }

    /// Prepares `sql`, executes it with `params`, and deallocates the
    /// handle, returning the rows the execution produced.
    ///
    /// The exec reply is drained in full before the deallocate goes
    /// out, so the three exchanges never interleave on the wire.
    pub fn prepare_rows(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Vec<Vec<String>>> {
        self.stream.send(&["sprepare ", sql, ";"])?;
        let response = self.stream.read_message()?;

        let mut fields = response.splitn(3, ' ');
        let id = match (fields.next(), fields.next(), fields.next()) {
            (Some(_), Some(id), Some(_)) => id.to_string(),
            _ => return Err(Error::driver_detailed("invalid prepare response", response)),
        };

        let args = params
            .iter()
            .map(Param::encode)
            .collect::<Vec<_>>()
            .join(", ");
        self.stream.send(&["sexec ", &id, "(", &args, ");"])?;
        let rows = match self.stream.read_reply()? {
            Reply::Query(rows) => rows.rows()?,
            _ => Vec::new(),
        };

        self.stream.send(&["sdeallocate ", &id, ";"])?;
        self.stream.read_message()?;

        Ok(rows)
    }

    pub fn prepare_row(&mut self, sql: &str, params: &[Param<'_>]) -> Result<Option<Vec<String>>> {
        Ok(self.prepare_rows(sql, params)?.into_iter().next())
    }
}

/// A scalar bound to a prepared statement.
///
/// Only what the shell needs; richer types simply do not exist here,
/// so they cannot be encoded wrongly.
pub enum Param<'a> {
    Int(i64),
    Text(&'a str),
}

impl Param<'_> {
    fn encode(&self) -> String {
        match self {
            Param::Int(n) => n.to_string(),
            Param::Text(s) => {
                let mut out = String::with_capacity(s.len() + 2);
                out.push('\'');
                for c in s.chars() {
                    if c == '\\' || c == '\'' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push('\'');
                out
            }
        }
    }
}

fn set_deadline(socket: &TcpStream, timeout: Option<Duration>) -> Result<()> {
    socket.set_read_timeout(timeout)?;
    socket.set_write_timeout(timeout)?;
    Ok(())
}

/// Runs the challenge/response exchange once. Returns the `host:port`
/// to re-dial when the server answered with a redirect.
fn authenticate<S: Read + Write>(
    stream: &mut MapiStream<S>,
    config: &Config,
    attempts: u8,
) -> Result<Option<String>> {
    if attempts == MAX_LOGIN_ATTEMPTS {
        return Err(Error::driver("too many proxy login iterations"));
    }

    let challenge = stream.read_message()?;
    let parts: Vec<&str> = challenge.split(':').collect();
    if parts.len() != 7 {
        return Err(Error::driver_detailed(
            "invalid challenge response",
            challenge.clone(),
        ));
    }
    if parts[2] != "9" {
        return Err(Error::driver_detailed("invalid challenge version", parts[2]));
    }

    let salt = parts[0];
    let auth = pick_auth_type(parts[3])
        .ok_or_else(|| Error::driver_detailed("no supported auth types", parts[3]))?;
    let algo = HashAlgo::parse(parts[5])
        .ok_or_else(|| Error::driver_detailed("unsupported hash algorithm", parts[5]))?;

    let password = algo.hex_digest(&[config.password.as_bytes()]);
    let digest = auth.hex_digest(&[password.as_bytes(), salt.as_bytes()]);

    stream.send(&[
        "LIT:",
        &config.user,
        ":{",
        auth.name(),
        "}",
        &digest,
        ":sql:",
        &config.database,
        ":",
    ])?;

    let reply = stream.read_message()?;
    if reply.is_empty() {
        return Ok(None);
    }
    if reply.starts_with("^mapi:merovingian:") {
        // benign proxy challenge, the real server is one hop further
        return authenticate(stream, config, attempts + 1);
    }
    if let Some(rest) = reply.strip_prefix("^mapi:") {
        let url = rest.lines().next().unwrap_or(rest);
        return match parse_redirect(url) {
            Some(host) => Ok(Some(host)),
            None => Err(Error::driver_detailed("invalid login redirect", reply.clone())),
        };
    }

    Err(Error::driver_detailed("invalid login response", reply))
}

fn parse_redirect(url: &str) -> Option<String> {
    let rest = url.strip_prefix("mapi://")?;
    let host = rest.split('/').next().unwrap_or(rest);
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

fn configure<S: Read + Write>(stream: &mut MapiStream<S>, config: &Config) -> Result<()> {
    if let Some(schema) = config.schema.as_deref().filter(|s| !s.is_empty()) {
        set(stream, "schema", schema)?;
    }
    if let Some(role) = config.role.as_deref().filter(|r| !r.is_empty()) {
        set(stream, "role", role)?;
    }
    Ok(())
}

fn set<S: Read + Write>(stream: &mut MapiStream<S>, field: &str, value: &str) -> Result<()> {
    stream.send(&["sset ", field, " ", value, ";"])?;
    let reply = stream.read_message()?;
    if !reply.starts_with("&3 ") {
        return Err(Error::driver_detailed(
            "invalid response to SET command",
            reply,
        ));
    }
    Ok(())
}

fn disable_reply_size<S: Read + Write>(stream: &mut MapiStream<S>) -> Result<()> {
    stream.send(&["Xreply_size -1\n"])?;
    stream.read_message()?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HashAlgo {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgo {
    fn parse(name: &str) -> Option<HashAlgo> {
        match name {
            "SHA224" => Some(HashAlgo::Sha224),
            "SHA256" => Some(HashAlgo::Sha256),
            "SHA384" => Some(HashAlgo::Sha384),
            "SHA512" => Some(HashAlgo::Sha512),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            HashAlgo::Sha224 => "SHA224",
            HashAlgo::Sha256 => "SHA256",
            HashAlgo::Sha384 => "SHA384",
            HashAlgo::Sha512 => "SHA512",
        }
    }

    fn hex_digest(self, inputs: &[&[u8]]) -> String {
        match self {
            HashAlgo::Sha224 => hex_digest::<Sha224>(inputs),
            HashAlgo::Sha256 => hex_digest::<Sha256>(inputs),
            HashAlgo::Sha384 => hex_digest::<Sha384>(inputs),
            HashAlgo::Sha512 => hex_digest::<Sha512>(inputs),
        }
    }
}

fn hex_digest<D: Digest>(inputs: &[&[u8]]) -> String {
    let mut hasher = D::new();
    for input in inputs {
        hasher.update(input);
    }
    hex::encode(hasher.finalize())
}

/// Picks the strongest client auth hash the server offers.
fn pick_auth_type(supported: &str) -> Option<HashAlgo> {
    for candidate in [HashAlgo::Sha512, HashAlgo::Sha256, HashAlgo::Sha224] {
        if supported.split(',').any(|t| t == candidate.name()) {
            return Some(candidate);
        }
    }
    None
}
