//! Modem command channel
//!
//! Half-duplex command/response exchange with the cellular modem over a
//! serial port. A command line is written, then bytes are accumulated until
//! the expected substring shows up or the timeout elapses. The accumulated
//! response is returned either way; callers decide what counts as success.

use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, Instant};
use tracing::debug;

/// One AT command with its success marker and timeout
#[derive(Debug, Clone, Copy)]
pub struct AtCommand {
    pub text: &'static str,
    pub expect: &'static str,
    pub timeout: Duration,
}

impl AtCommand {
    pub const fn new(text: &'static str, expect: &'static str, timeout_ms: u64) -> Self {
        Self {
            text,
            expect,
            timeout: Duration::from_millis(timeout_ms),
        }
    }
}

/// Modem command surface used during bring-up and teardown
pub mod at {
    use super::AtCommand;
    use std::time::Duration;

    pub const PROBE: AtCommand = AtCommand::new("AT", "OK", 2_000);
    pub const ECHO_OFF: AtCommand = AtCommand::new("ATE0", "OK", 2_000);
    pub const VERBOSE_ERRORS: AtCommand = AtCommand::new("AT+CMEE=2", "OK", 2_000);
    pub const SIM_READY: AtCommand = AtCommand::new("AT+CPIN?", "READY", 3_000);
    pub const REGISTRATION: AtCommand = AtCommand::new("AT+CREG?", "OK", 2_000);

    pub const BEARER_CONTYPE: AtCommand =
        AtCommand::new("AT+SAPBR=3,1,\"Contype\",\"GPRS\"", "OK", 2_000);
    pub const BEARER_USER: AtCommand = AtCommand::new("AT+SAPBR=3,1,\"USER\",\"\"", "OK", 2_000);
    pub const BEARER_PWD: AtCommand = AtCommand::new("AT+SAPBR=3,1,\"PWD\",\"\"", "OK", 2_000);
    pub const BEARER_OPEN: AtCommand = AtCommand::new("AT+SAPBR=1,1", "OK", 10_000);
    pub const BEARER_CLOSE: AtCommand = AtCommand::new("AT+SAPBR=0,1", "OK", 5_000);

    pub const SINGLE_CONNECTION: AtCommand = AtCommand::new("AT+CIPMUX=0", "OK", 2_000);
    pub const NON_TRANSPARENT: AtCommand = AtCommand::new("AT+CIPMODE=0", "OK", 2_000);
    pub const BRING_UP: AtCommand = AtCommand::new("AT+CIICR", "OK", 5_000);
    // Answers with the bare address, no OK
    pub const LOCAL_ADDRESS: AtCommand = AtCommand::new("AT+CIFSR", ".", 3_000);

    pub const CLOSE: AtCommand = AtCommand::new("AT+CIPCLOSE", "OK", 2_000);
    pub const SHUTDOWN: AtCommand = AtCommand::new("AT+CIPSHUT", "SHUT OK", 3_000);

    pub const TCP_OPEN_TIMEOUT: Duration = Duration::from_millis(10_000);
    pub const DATA_ENTRY_TIMEOUT: Duration = Duration::from_millis(2_000);
    pub const TASK_TIMEOUT: Duration = Duration::from_millis(2_000);

    pub const OK: &str = "OK";
    pub const ERROR: &str = "ERROR";
    pub const PROMPT: &str = ">";
    pub const CONNECT_OK: &str = "CONNECT OK";
    pub const REGISTERED_HOME: &str = "+CREG: 0,1";
    pub const REGISTERED_ROAMING: &str = "+CREG: 0,5";

    /// Bearer access point name
    pub fn bearer_apn(apn: &str) -> String {
        format!("AT+SAPBR=3,1,\"APN\",\"{}\"", apn)
    }

    /// Start the IP task with the access point name and empty credentials
    pub fn start_task(apn: &str) -> String {
        format!("AT+CSTT=\"{}\",\"\",\"\"", apn)
    }

    /// Open a TCP stream to the broker
    pub fn tcp_open(host: &str, port: u16) -> String {
        format!("AT+CIPSTART=\"TCP\",\"{}\",{}", host, port)
    }

    /// Enter data mode for exactly `len` raw bytes
    pub fn data_entry(len: usize) -> String {
        format!("AT+CIPSEND={}", len)
    }
}

/// Serial command channel to the modem
pub struct ModemChannel<P> {
    port: P,
}

impl<P> ModemChannel<P>
where
    P: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(port: P) -> Self {
        Self { port }
    }

    /// Send a command line and collect the response
    ///
    /// Returns as soon as `expected` appears, otherwise after `timeout`.
    /// Stale input left over from earlier exchanges is discarded first.
    pub async fn send(
        &mut self,
        command: &str,
        timeout: Duration,
        expected: &str,
    ) -> io::Result<String> {
        self.discard_pending().await?;

        self.port.write_all(command.as_bytes()).await?;
        self.port.write_all(b"\r\n").await?;
        self.port.flush().await?;

        let expected = expected.as_bytes();
        let raw = self.read_until(timeout, |buf| contains(buf, expected)).await?;
        let response = String::from_utf8_lossy(&raw).into_owned();

        debug!("[MODEM] AT >> {} | {}", command, response.trim());
        Ok(response)
    }

    /// Send one of the fixed commands
    pub async fn exchange(&mut self, command: &AtCommand) -> io::Result<String> {
        self.send(command.text, command.timeout, command.expect).await
    }

    /// Write raw bytes, used after the data-entry prompt
    pub async fn write_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes).await?;
        self.port.flush().await
    }

    /// Accumulate input until `done` accepts the buffer or `window` elapses
    pub async fn read_until<F>(&mut self, window: Duration, done: F) -> io::Result<Vec<u8>>
    where
        F: Fn(&[u8]) -> bool,
    {
        let deadline = Instant::now() + window;
        let mut buf = Vec::with_capacity(128);
        let mut chunk = [0u8; 256];

        while !done(&buf) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, self.port.read(&mut chunk)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => buf.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => return Err(e),
                Err(_) => break,
            }
        }

        Ok(buf)
    }

    async fn discard_pending(&mut self) -> io::Result<()> {
        let mut scratch = [0u8; 256];
        loop {
            match timeout(Duration::ZERO, self.port.read(&mut scratch)).await {
                Ok(Ok(0)) | Err(_) => return Ok(()),
                Ok(Ok(n)) => debug!("[MODEM] Discarded {} stale bytes", n),
                Ok(Err(e)) => return Err(e),
            }
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    async fn read_line(port: &mut DuplexStream) -> String {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        while !line.ends_with(b"\r\n") {
            port.read_exact(&mut byte).await.expect("read failed");
            line.push(byte[0]);
        }
        String::from_utf8(line).expect("not utf8")
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_returns_on_match() {
        let (device, mut modem) = duplex(1024);
        let mut channel = ModemChannel::new(device);

        let responder = tokio::spawn(async move {
            let line = read_line(&mut modem).await;
            modem.write_all(b"\r\nOK\r\n").await.expect("write failed");
            (line, modem)
        });

        let start = Instant::now();
        let response = channel
            .send("AT", Duration::from_secs(2), "OK")
            .await
            .expect("send failed");

        assert!(response.contains("OK"));
        assert!(start.elapsed() < Duration::from_secs(2));

        let (line, _modem) = responder.await.expect("responder panicked");
        assert_eq!(line, "AT\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_times_out_with_partial_response() {
        let (device, mut modem) = duplex(1024);
        let mut channel = ModemChannel::new(device);

        let responder = tokio::spawn(async move {
            read_line(&mut modem).await;
            modem.write_all(b"\r\nERROR\r\n").await.expect("write failed");
            modem
        });

        let start = Instant::now();
        let response = channel
            .send("AT+SAPBR=1,1", Duration::from_secs(10), "OK")
            .await
            .expect("send failed");

        assert!(response.contains("ERROR"));
        assert!(start.elapsed() >= Duration::from_secs(10));
        let _modem = responder.await.expect("responder panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_input_discarded_before_command() {
        let (device, mut modem) = duplex(1024);
        let mut channel = ModemChannel::new(device);

        // Late reply to an earlier command
        modem.write_all(b"\r\nOK\r\n").await.expect("write failed");

        let responder = tokio::spawn(async move {
            read_line(&mut modem).await;
            modem
                .write_all(b"\r\n+CREG: 0,1\r\n\r\nOK\r\n")
                .await
                .expect("write failed");
            modem
        });

        let response = channel
            .exchange(&at::REGISTRATION)
            .await
            .expect("send failed");
        assert!(response.contains(at::REGISTERED_HOME));
        let _modem = responder.await.expect("responder panicked");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_until_stops_on_predicate() {
        let (device, mut modem) = duplex(1024);
        let mut channel = ModemChannel::new(device);

        modem.write_all(&[0x20, 0x02, 0x00, 0x00]).await.expect("write failed");

        let start = Instant::now();
        let buf = channel
            .read_until(Duration::from_secs(3), |b| b.len() >= 4)
            .await
            .expect("read failed");
        assert_eq!(buf, vec![0x20, 0x02, 0x00, 0x00]);
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_command_builders() {
        assert_eq!(at::data_entry(21), "AT+CIPSEND=21");
        assert_eq!(
            at::tcp_open("broker.local", 1883),
            "AT+CIPSTART=\"TCP\",\"broker.local\",1883"
        );
        assert_eq!(at::bearer_apn("internet"), "AT+SAPBR=3,1,\"APN\",\"internet\"");
        assert_eq!(at::start_task("internet"), "AT+CSTT=\"internet\",\"\",\"\"");
    }
}
