//! Cellular modem control (SIM800-class AT command set).
//!
//! One command interface carries three logical channels: text messages,
//! voice calls, and HTTP over the GPRS bearer. This module owns the AT
//! choreography for all three on top of the narrow [`ModemLink`] transport
//! trait, so the full conversation can be scripted in tests without
//! hardware. Callers serialize access by holding `&mut CellularModem`;
//! nothing here interleaves channels.

use std::time::Duration;

use tracing::{debug, info};

use crate::hal::{ModemError, ModemLink};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
const SMS_SEND_TIMEOUT: Duration = Duration::from_secs(10);
const HTTP_ACTION_TIMEOUT: Duration = Duration::from_secs(30);
/// Terminates the SMS body in text mode
const CTRL_Z: u8 = 0x1A;

pub struct CellularModem<M: ModemLink> {
    link: M,
    bearer_up: bool,
}

impl<M: ModemLink> CellularModem<M> {
    pub fn new(link: M) -> Self {
        Self {
            link,
            bearer_up: false,
        }
    }

    /// Liveness check, echo off, SMS text mode
    pub async fn init(&mut self) -> Result<(), ModemError> {
        self.command("AT").await?;
        self.command("ATE0").await?;
        self.command("AT+CMGF=1").await?;
        info!("Modem ready in text mode");
        Ok(())
    }

    /// One command line, wait for OK
    async fn command(&mut self, cmd: &str) -> Result<String, ModemError> {
        self.link.send_line(cmd).await?;
        self.link.wait_for("OK", COMMAND_TIMEOUT).await
    }

    /// Text-mode SMS: address, body after the prompt, CTRL-Z terminator
    pub async fn send_sms(&mut self, number: &str, body: &str) -> Result<(), ModemError> {
        self.link
            .send_line(&format!("AT+CMGS=\"{}\"", number))
            .await?;
        self.link.wait_for(">", COMMAND_TIMEOUT).await?;
        self.link.write_raw(body.as_bytes()).await?;
        self.link.write_raw(&[CTRL_Z]).await?;
        // The send confirm can take several seconds on a congested cell
        self.link.wait_for("+CMGS", SMS_SEND_TIMEOUT).await?;
        info!("📤 SMS sent to {}", number);
        Ok(())
    }

    /// Start an outbound voice call; returns once the dial is accepted,
    /// not when it is answered
    pub async fn dial(&mut self, number: &str) -> Result<(), ModemError> {
        self.link.send_line(&format!("ATD{};", number)).await?;
        self.link.wait_for("OK", COMMAND_TIMEOUT).await?;
        info!("Dialing {}", number);
        Ok(())
    }

    /// True when the call list shows an active (answered) call
    pub async fn call_answered(&mut self) -> Result<bool, ModemError> {
        self.link.send_line("AT+CLCC").await?;
        let response = self.link.wait_for("OK", COMMAND_TIMEOUT).await?;
        Ok(parse_clcc_active(&response))
    }

    pub async fn hangup(&mut self) -> Result<(), ModemError> {
        self.command("ATH").await?;
        Ok(())
    }

    /// Fetch unread text messages, returning their bodies in arrival order.
    /// Listing marks them read on the modem side.
    pub async fn read_unread_sms(&mut self) -> Result<Vec<String>, ModemError> {
        self.link.send_line("AT+CMGL=\"REC UNREAD\"").await?;
        let response = self.link.wait_for("OK", COMMAND_TIMEOUT).await?;
        Ok(parse_cmgl_bodies(&response))
    }

    /// Bring up the GPRS bearer if it is not already up: attach check, APN
    /// configuration, bearer activation, status verification
    pub async fn ensure_bearer(&mut self, apn: &str) -> Result<(), ModemError> {
        if self.bearer_up {
            return Ok(());
        }

        let attach = self.command("AT+CGATT?").await?;
        if !attach.contains("+CGATT: 1") {
            self.command("AT+CGATT=1").await?;
        }
        self.command("AT+SAPBR=3,1,\"CONTYPE\",\"GPRS\"").await?;
        self.command(&format!("AT+SAPBR=3,1,\"APN\",\"{}\"", apn))
            .await?;
        // Opening an already-open bearer reports ERROR; the status query
        // below is authoritative either way
        if let Err(e) = self.command("AT+SAPBR=1,1").await {
            debug!("Bearer open reported {}, checking status", e);
        }
        let status = self.command("AT+SAPBR=2,1").await?;
        if !parse_bearer_connected(&status) {
            return Err(ModemError::Unexpected(format!(
                "bearer not connected: {}",
                status.trim()
            )));
        }

        self.bearer_up = true;
        info!("📡 GPRS bearer up");
        Ok(())
    }

    /// POST a JSON body through the modem's HTTP stack, returning the HTTP
    /// status code. The HTTP session is torn down on every path; a failed
    /// exchange also marks the bearer down so the next delivery re-checks it.
    pub async fn http_post(&mut self, url: &str, body: &str) -> Result<u16, ModemError> {
        let result = self.http_exchange(url, body).await;
        if let Err(e) = self.command("AT+HTTPTERM").await {
            debug!("HTTP teardown reported {}", e);
        }
        if result.is_err() {
            self.bearer_up = false;
        }
        result
    }

    async fn http_exchange(&mut self, url: &str, body: &str) -> Result<u16, ModemError> {
        self.command("AT+HTTPINIT").await?;
        self.command("AT+HTTPPARA=\"CID\",1").await?;
        self.command(&format!("AT+HTTPPARA=\"URL\",\"{}\"", url))
            .await?;
        self.command("AT+HTTPPARA=\"CONTENT\",\"application/json\"")
            .await?;

        self.link
            .send_line(&format!("AT+HTTPDATA={},10000", body.len()))
            .await?;
        self.link.wait_for("DOWNLOAD", COMMAND_TIMEOUT).await?;
        self.link.write_raw(body.as_bytes()).await?;
        self.link.wait_for("OK", COMMAND_TIMEOUT).await?;

        self.link.send_line("AT+HTTPACTION=1").await?;
        let report = self
            .link
            .wait_for("+HTTPACTION:", HTTP_ACTION_TIMEOUT)
            .await?;
        parse_httpaction_status(&report)
    }

    pub fn bearer_up(&self) -> bool {
        self.bearer_up
    }
}

/// `+CLCC: <id>,<dir>,<stat>,...` lines; stat 0 is an active call
fn parse_clcc_active(response: &str) -> bool {
    for line in response.lines() {
        if let Some(rest) = line.trim().strip_prefix("+CLCC:") {
            let fields: Vec<&str> = rest.split(',').map(str::trim).collect();
            if fields.len() > 2 && fields[2] == "0" {
                return true;
            }
        }
    }
    false
}

/// Each `+CMGL:` header line is followed by the message body
fn parse_cmgl_bodies(response: &str) -> Vec<String> {
    let mut bodies = Vec::new();
    let mut lines = response.lines();
    while let Some(line) = lines.next() {
        if line.trim_start().starts_with("+CMGL:") {
            if let Some(body) = lines.next() {
                let body = body.trim();
                if !body.is_empty() && body != "OK" {
                    bodies.push(body.to_string());
                }
            }
        }
    }
    bodies
}

/// `+HTTPACTION: <method>,<status>,<len>` -> status
fn parse_httpaction_status(report: &str) -> Result<u16, ModemError> {
    for line in report.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("+HTTPACTION:") {
            let fields: Vec<&str> = rest.split(',').map(str::trim).collect();
            if fields.len() >= 2 {
                return fields[1]
                    .parse::<u16>()
                    .map_err(|_| ModemError::Unexpected(format!("bad status in '{}'", line)));
            }
        }
    }
    Err(ModemError::Unexpected(format!(
        "no action report in '{}'",
        report.trim()
    )))
}

/// `+SAPBR: <cid>,<status>,<ip>`; status 1 is connected
fn parse_bearer_connected(status: &str) -> bool {
    for line in status.lines() {
        if let Some(rest) = line.trim().strip_prefix("+SAPBR:") {
            let fields: Vec<&str> = rest.split(',').map(str::trim).collect();
            if fields.len() >= 2 && fields[1] == "1" {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays a canned response per `wait_for` call and records everything
    /// the driver sends, so each test can assert the exact AT conversation.
    struct ScriptedLink {
        responses: VecDeque<Result<String, ModemError>>,
        sent_lines: Vec<String>,
        raw_writes: Vec<Vec<u8>>,
    }

    impl ScriptedLink {
        fn new(responses: Vec<Result<&'static str, ModemError>>) -> Self {
            Self {
                responses: responses
                    .into_iter()
                    .map(|r| r.map(str::to_string))
                    .collect(),
                sent_lines: Vec::new(),
                raw_writes: Vec::new(),
            }
        }
    }

    impl ModemLink for ScriptedLink {
        async fn send_line(&mut self, line: &str) -> Result<(), ModemError> {
            self.sent_lines.push(line.to_string());
            Ok(())
        }

        async fn write_raw(&mut self, data: &[u8]) -> Result<(), ModemError> {
            self.raw_writes.push(data.to_vec());
            Ok(())
        }

        async fn wait_for(&mut self, token: &str, _timeout: Duration) -> Result<String, ModemError> {
            match self.responses.pop_front() {
                Some(Ok(text)) if text.contains(token) => Ok(text),
                Some(Ok(text)) => Err(ModemError::Unexpected(format!(
                    "script expected '{}' in '{}'",
                    token, text
                ))),
                Some(Err(e)) => Err(e),
                None => Err(ModemError::Timeout {
                    expected: token.to_string(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_sms_sequence_addresses_then_terminates() {
        let link = ScriptedLink::new(vec![Ok(">"), Ok("+CMGS: 12\r\nOK")]);
        let mut modem = CellularModem::new(link);

        modem.send_sms("+15550100", "CRITICAL VITALS").await.unwrap();

        assert_eq!(modem.link.sent_lines, vec!["AT+CMGS=\"+15550100\""]);
        assert_eq!(modem.link.raw_writes[0], b"CRITICAL VITALS".to_vec());
        assert_eq!(modem.link.raw_writes[1], vec![0x1A], "body must end with CTRL-Z");
    }

    #[tokio::test]
    async fn test_http_post_success_and_teardown() {
        let link = ScriptedLink::new(vec![
            Ok("OK"),                           // HTTPINIT
            Ok("OK"),                           // CID
            Ok("OK"),                           // URL
            Ok("OK"),                           // CONTENT
            Ok("DOWNLOAD"),                     // HTTPDATA prompt
            Ok("OK"),                           // body accepted
            Ok("OK\r\n+HTTPACTION: 1,200,34"),  // action report after the interim OK
            Ok("OK"),                           // HTTPTERM
        ]);
        let mut modem = CellularModem::new(link);
        modem.bearer_up = true;

        let status = modem
            .http_post("http://ingest.example/v1/readings", "{\"spo2\":97}")
            .await
            .unwrap();

        assert_eq!(status, 200);
        assert!(modem.bearer_up(), "success keeps the bearer up");
        assert_eq!(
            modem.link.sent_lines.last().map(String::as_str),
            Some("AT+HTTPTERM")
        );
        assert_eq!(modem.link.raw_writes[0], b"{\"spo2\":97}".to_vec());
    }

    #[tokio::test]
    async fn test_http_failure_still_tears_down_and_drops_bearer() {
        let link = ScriptedLink::new(vec![
            Ok("OK"),
            Ok("OK"),
            Ok("OK"),
            Ok("OK"),
            Ok("DOWNLOAD"),
            Ok("OK"),
            Err(ModemError::Timeout {
                expected: "+HTTPACTION:".into(),
            }),
            Ok("OK"), // HTTPTERM still runs
        ]);
        let mut modem = CellularModem::new(link);
        modem.bearer_up = true;

        let result = modem.http_post("http://ingest.example", "{}").await;

        assert!(result.is_err());
        assert!(!modem.bearer_up(), "failed exchange must drop the bearer");
        assert_eq!(
            modem.link.sent_lines.last().map(String::as_str),
            Some("AT+HTTPTERM")
        );
    }

    #[tokio::test]
    async fn test_bearer_sequence_configures_apn() {
        let link = ScriptedLink::new(vec![
            Ok("+CGATT: 1\r\nOK"),
            Ok("OK"),
            Ok("OK"),
            Ok("OK"),
            Ok("+SAPBR: 1,1,\"10.64.2.7\"\r\nOK"),
        ]);
        let mut modem = CellularModem::new(link);

        modem.ensure_bearer("iot.carrier").await.unwrap();

        assert!(modem.bearer_up());
        assert!(modem
            .link
            .sent_lines
            .contains(&"AT+SAPBR=3,1,\"APN\",\"iot.carrier\"".to_string()));

        // Second call is a no-op on an up bearer
        let before = modem.link.sent_lines.len();
        modem.ensure_bearer("iot.carrier").await.unwrap();
        assert_eq!(modem.link.sent_lines.len(), before);
    }

    #[tokio::test]
    async fn test_call_answered_reads_clcc_state() {
        let link = ScriptedLink::new(vec![
            Ok("+CLCC: 1,0,3,0,0,\"+15550100\",145\r\nOK"),
            Ok("+CLCC: 1,0,0,0,0,\"+15550100\",145\r\nOK"),
        ]);
        let mut modem = CellularModem::new(link);

        assert!(!modem.call_answered().await.unwrap(), "stat 3 is still ringing");
        assert!(modem.call_answered().await.unwrap(), "stat 0 is answered");
    }

    #[tokio::test]
    async fn test_unread_sms_bodies_extracted() {
        let link = ScriptedLink::new(vec![Ok(concat!(
            "+CMGL: 1,\"REC UNREAD\",\"+15550100\",,\"24/03/01,10:00:00\"\r\n",
            "ACK\r\n",
            "+CMGL: 2,\"REC UNREAD\",\"+15550199\",,\"24/03/01,10:05:00\"\r\n",
            "weather update\r\n",
            "OK"
        ))]);
        let mut modem = CellularModem::new(link);

        let bodies = modem.read_unread_sms().await.unwrap();
        assert_eq!(bodies, vec!["ACK".to_string(), "weather update".to_string()]);
    }

    #[test]
    fn test_httpaction_parse_rejects_garbage() {
        assert_eq!(parse_httpaction_status("+HTTPACTION: 1,200,34").unwrap(), 200);
        assert_eq!(parse_httpaction_status("+HTTPACTION: 1,601,0").unwrap(), 601);
        assert!(parse_httpaction_status("+HTTPACTION: nonsense").is_err());
        assert!(parse_httpaction_status("").is_err());
    }
}
