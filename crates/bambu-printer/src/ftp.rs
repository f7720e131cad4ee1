//! Implicit FTPS client for the printer's storage.
//!
//! The printer runs an implicit-TLS FTP server on port 990. Each
//! operation opens its own control session, logs in, and requests
//! protected passive data connections. Data connections reuse the control
//! session's TLS configuration so the server can resume the session.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::ClientConfig;

use crate::error::{BambuError, Result};
use crate::tls::{self, TlsStream};

/// Default implicit FTPS port.
pub const DEFAULT_FTP_PORT: u16 = 990;

/// The four storage operations the rest of the crate relies on.
pub trait FileTransfer {
    /// Names of the entries in `dir`.
    fn list(&self, dir: &str) -> Result<Vec<String>>;

    /// Store `reader` as `remote`. Returns the number of bytes sent.
    fn upload_from(&self, reader: &mut dyn Read, remote: &str) -> Result<u64>;

    /// Copy `remote` into `out`. Returns the number of bytes received.
    fn download(&self, remote: &str, out: &mut dyn Write) -> Result<u64>;

    /// Delete `remote`.
    fn delete(&self, remote: &str) -> Result<()>;

    /// Store a local file as `remote`.
    fn upload(&self, local: &Path, remote: &str) -> Result<u64> {
        let mut file = File::open(local)?;
        self.upload_from(&mut file, remote)
    }
}

/// FTPS connection settings.
#[derive(Debug, Clone)]
pub struct FtpConfig {
    /// Printer host or IP.
    pub host: String,
    /// Implicit FTPS port.
    pub port: u16,
    /// Username (always `bblp` on current firmware).
    pub username: String,
    /// LAN access code, used as the password.
    pub access_code: String,
    /// Connect and per-read timeout.
    pub timeout: Duration,
}

impl FtpConfig {
    /// Settings with default port, username and timeout.
    pub fn new(host: impl Into<String>, access_code: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_FTP_PORT,
            username: crate::DEFAULT_USERNAME.to_string(),
            access_code: access_code.into(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Blocking implicit FTPS client.
#[derive(Debug, Clone)]
pub struct FtpClient {
    config: FtpConfig,
    tls: Arc<ClientConfig>,
}

impl FtpClient {
    /// Create a client. No connection is made until an operation runs.
    pub fn new(config: FtpConfig) -> Self {
        Self {
            config,
            tls: tls::client_config(),
        }
    }

    fn with_session<T>(&self, op: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
        let stream = TlsStream::connect(
            Arc::clone(&self.tls),
            &self.config.host,
            self.config.port,
            self.config.timeout,
        )?;
        let mut session = Session {
            control: Control::new(stream),
            client: self,
        };
        session.login()?;
        let result = op(&mut session);
        session.quit();
        result
    }
}

impl FileTransfer for FtpClient {
    fn list(&self, dir: &str) -> Result<Vec<String>> {
        let command = if dir.is_empty() {
            "LIST".to_string()
        } else {
            format!("LIST {dir}")
        };
        self.with_session(|session| {
            let mut listing = Vec::new();
            session.transfer(&command, |data| copy_until_close(data, &mut listing))?;
            Ok(parse_list_names(&String::from_utf8_lossy(&listing)))
        })
    }

    fn upload_from(&self, reader: &mut dyn Read, remote: &str) -> Result<u64> {
        self.with_session(|session| {
            session.transfer(&format!("STOR {remote}"), |data| {
                let sent = io::copy(reader, data)?;
                data.flush()?;
                Ok(sent)
            })
        })
    }

    fn download(&self, remote: &str, out: &mut dyn Write) -> Result<u64> {
        self.with_session(|session| {
            session.transfer(&format!("RETR {remote}"), |data| copy_until_close(data, out))
        })
    }

    fn delete(&self, remote: &str) -> Result<()> {
        self.with_session(|session| {
            session.control.command(&format!("DELE {remote}"), &[250])?;
            Ok(())
        })
    }
}

struct Session<'a> {
    control: Control<TlsStream>,
    client: &'a FtpClient,
}

impl Session<'_> {
    fn login(&mut self) -> Result<()> {
        let config = &self.client.config;
        self.control.expect_reply(&[220])?;

        let user = self
            .control
            .command(&format!("USER {}", config.username), &[230, 331])?;
        if user.code == 331 {
            self.control
                .command(&format!("PASS {}", config.access_code), &[230])?;
        }
        self.control.command("PBSZ 0", &[200])?;
        self.control.command("PROT P", &[200])?;
        self.control.command("TYPE I", &[200])?;
        tracing::debug!(host = %config.host, "FTPS login complete");
        Ok(())
    }

    /// Run one data-channel command. `exchange` gets the protected data stream.
    fn transfer<T>(
        &mut self,
        command: &str,
        exchange: impl FnOnce(&mut TlsStream) -> io::Result<T>,
    ) -> Result<T> {
        let config = &self.client.config;
        let pasv = self.control.command("PASV", &[227])?;
        // Printers may advertise an address other than the one we reached
        // them on; the control host is always right.
        let port = parse_pasv_port(&pasv.text)?;

        let tcp = tls::connect_tcp(&config.host, port, config.timeout)?;
        tcp.set_read_timeout(Some(config.timeout))?;
        tcp.set_write_timeout(Some(config.timeout))?;

        self.control.command(command, &[125, 150])?;
        let result = {
            let mut data = open_data(Arc::clone(&self.client.tls), &config.host, tcp)?;
            exchange(&mut data)
        };
        let value = result?;
        self.control.expect_reply(&[226, 250])?;
        Ok(value)
    }

    fn quit(&mut self) {
        if let Err(e) = self.control.command("QUIT", &[221]) {
            tracing::debug!(error = %e, "QUIT failed");
        }
    }
}

fn open_data(config: Arc<ClientConfig>, host: &str, tcp: TcpStream) -> Result<TlsStream> {
    TlsStream::wrap(config, host, tcp)
}

/// Copy until the peer closes the stream. A close without `close_notify`
/// counts as a normal end of data.
fn copy_until_close<R: Read + ?Sized, W: Write + ?Sized>(reader: &mut R, out: &mut W) -> io::Result<u64> {
    let mut buf = [0u8; 8192];
    let mut total = 0u64;
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => {
                out.write_all(&buf[..n])?;
                total += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(total),
            Err(e) => return Err(e),
        }
    }
}

/// One FTP reply, possibly spanning several lines.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Reply {
    code: u16,
    text: String,
}

/// FTP control connection over any duplex stream.
struct Control<S: Read + Write> {
    stream: BufReader<S>,
}

impl<S: Read + Write> Control<S> {
    fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    fn command(&mut self, command: &str, expected: &[u16]) -> Result<Reply> {
        let verb = command.split(' ').next().unwrap_or(command);
        tracing::trace!(verb, "FTP command");

        let writer = self.stream.get_mut();
        writer.write_all(command.as_bytes())?;
        writer.write_all(b"\r\n")?;
        writer.flush()?;
        self.expect_reply(expected)
    }

    fn expect_reply(&mut self, expected: &[u16]) -> Result<Reply> {
        let reply = read_reply(&mut self.stream)?;
        if expected.contains(&reply.code) {
            Ok(reply)
        } else {
            Err(BambuError::Ftp {
                code: reply.code,
                message: reply.text,
            })
        }
    }
}

fn read_reply<R: BufRead>(reader: &mut R) -> Result<Reply> {
    let first = read_line(reader)?;
    let code = reply_code(&first)?;
    let mut text = first.get(4..).unwrap_or_default().to_string();

    if first.as_bytes().get(3) == Some(&b'-') {
        let terminator = format!("{code} ");
        loop {
            let line = read_line(reader)?;
            if line.starts_with(&terminator) || line == code.to_string() {
                text.push('\n');
                text.push_str(line.get(4..).unwrap_or_default());
                break;
            }
            text.push('\n');
            text.push_str(&line);
        }
    }

    Ok(Reply { code, text })
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<String> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(BambuError::InvalidResponse(
            "FTP control connection closed".into(),
        ));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn reply_code(line: &str) -> Result<u16> {
    line.get(..3)
        .filter(|code| code.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| BambuError::InvalidResponse(format!("malformed FTP reply: {line:?}")))
}

/// Data port from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
fn parse_pasv_port(text: &str) -> Result<u16> {
    let malformed = || BambuError::InvalidResponse(format!("malformed PASV reply: {text:?}"));

    let start = text.find('(').ok_or_else(malformed)?;
    let end = text[start..].find(')').ok_or_else(malformed)? + start;
    let fields: Vec<u8> = text[start + 1..end]
        .split(',')
        .map(|f| f.trim().parse::<u8>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| malformed())?;

    match fields.as_slice() {
        [_, _, _, _, hi, lo] => Ok(u16::from(*hi) << 8 | u16::from(*lo)),
        _ => Err(malformed()),
    }
}

/// Entry names from a `LIST` response.
///
/// Unix-style lines keep everything after the eighth field, so names with
/// spaces survive. Lines with fewer fields are taken as bare names.
fn parse_list_names(listing: &str) -> Vec<String> {
    listing
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty() && !line.starts_with("total "))
        .filter_map(|line| {
            let name = unix_list_name(line).unwrap_or(line.trim());
            (name != "." && name != "..").then(|| name.to_string())
        })
        .collect()
}

fn unix_list_name(line: &str) -> Option<&str> {
    let mut rest = line.trim_start();
    for _ in 0..8 {
        let end = rest.find(char::is_whitespace)?;
        rest = rest[end..].trim_start();
    }
    (!rest.is_empty()).then_some(rest)
}
