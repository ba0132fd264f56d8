//! SOAP 1.1 binding of the eight Web Connector operations.
//!
//! Canonical shape: lowerCamelCase operation elements directly inside
//! `Body`, parameters as child elements, responses in the
//! `http://developer.intuit.com/` namespace. Namespace prefixes on the
//! request are ignored; only local names matter.
//!
//! ```text
//! <soap:Envelope>
//!   <soap:Body>
//!     <sendRequestXML xmlns="http://developer.intuit.com/">
//!       <ticket>…</ticket>
//!       <strHCPResponse>…</strHCPResponse>
//!       …
//!     </sendRequestXML>
//!   </soap:Body>
//! </soap:Envelope>
//! ```

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use thiserror::Error;

use qbwc_core::{HostContext, ProtocolEngine, Ticket};

/// Namespace of the Web Connector service contract.
pub const SERVICE_NS: &str = "http://developer.intuit.com/";
/// SOAP 1.1 envelope namespace.
pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Transport-level envelope problems. Protocol operations never fault.
#[derive(Debug, Error)]
pub enum SoapError {
    #[error("malformed envelope: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("envelope has no Body")]
    MissingBody,

    #[error("envelope Body names no operation")]
    MissingOperation,

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("request body rejected: {0}")]
    BodyRejected(String),
}

// ── SoapCall ─────────────────────────────────────────────────────

/// A decoded remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoapCall {
    ClientVersion {
        version: String,
    },
    ServerVersion,
    Authenticate {
        username: String,
        password: String,
    },
    SendRequestXml {
        ticket: String,
        host: HostContext,
    },
    ReceiveResponseXml {
        ticket: String,
        response: String,
        hresult: String,
        message: String,
    },
    ConnectionError {
        ticket: String,
        hresult: String,
        message: String,
    },
    GetLastError {
        ticket: String,
    },
    CloseConnection {
        ticket: String,
    },
}

impl SoapCall {
    /// Wire name of the operation.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::ClientVersion { .. } => "clientVersion",
            Self::ServerVersion => "serverVersion",
            Self::Authenticate { .. } => "authenticate",
            Self::SendRequestXml { .. } => "sendRequestXML",
            Self::ReceiveResponseXml { .. } => "receiveResponseXML",
            Self::ConnectionError { .. } => "connectionError",
            Self::GetLastError { .. } => "getLastError",
            Self::CloseConnection { .. } => "closeConnection",
        }
    }

    /// Run the call against `engine`.
    pub fn execute(self, engine: &ProtocolEngine) -> SoapReply {
        match self {
            Self::ClientVersion { version } => SoapReply::Text(engine.client_version(&version)),
            Self::ServerVersion => SoapReply::Text(engine.server_version()),
            Self::Authenticate { username, password } => {
                let reply = engine.authenticate(&username, &password);
                SoapReply::Strings(reply.into_array().to_vec())
            }
            Self::SendRequestXml { ticket, host } => {
                SoapReply::Text(engine.next_payload_with(&Ticket::from(ticket), &host))
            }
            Self::ReceiveResponseXml {
                ticket,
                response,
                hresult,
                message,
            } => SoapReply::Int(engine.receive_result(
                &Ticket::from(ticket),
                response,
                &hresult,
                &message,
            )),
            Self::ConnectionError {
                ticket,
                hresult,
                message,
            } => SoapReply::Text(engine.report_connection_error(
                &Ticket::from(ticket),
                &hresult,
                &message,
            )),
            Self::GetLastError { ticket } => {
                SoapReply::Text(engine.last_error(&Ticket::from(ticket)))
            }
            Self::CloseConnection { ticket } => {
                SoapReply::Text(engine.close_session(&Ticket::from(ticket)))
            }
        }
    }
}

/// The value carried in an operation's `…Result` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoapReply {
    Text(String),
    Int(i32),
    /// Serialised as repeated `<string>` children.
    Strings(Vec<String>),
}

// ── Parsing ──────────────────────────────────────────────────────

struct RawCall {
    operation: String,
    params: HashMap<String, String>,
}

/// Decode a SOAP request envelope.
///
/// Missing parameters read as empty strings and unparsable integers as 0.
pub fn parse_envelope(body: &str) -> Result<SoapCall, SoapError> {
    let RawCall {
        operation,
        mut params,
    } = read_envelope(body)?;
    let mut take = |key: &str| params.remove(key).unwrap_or_default();

    let call = match operation.as_str() {
        "clientVersion" => SoapCall::ClientVersion {
            version: take("strVersion"),
        },
        "serverVersion" => SoapCall::ServerVersion,
        "authenticate" => SoapCall::Authenticate {
            username: take("strUserName"),
            password: take("strPassword"),
        },
        "sendRequestXML" => SoapCall::SendRequestXml {
            ticket: take("ticket"),
            host: HostContext {
                prev_response_hash: take("strHCPResponse"),
                company_file: take("strCompanyFileName"),
                country: take("qbXMLCountry"),
                major_version: take("qbXMLMajorVers").trim().parse().unwrap_or(0),
                minor_version: take("qbXMLMinorVers").trim().parse().unwrap_or(0),
            },
        },
        "receiveResponseXML" => SoapCall::ReceiveResponseXml {
            ticket: take("ticket"),
            response: take("response"),
            hresult: take("hresult"),
            message: take("message"),
        },
        "connectionError" => SoapCall::ConnectionError {
            ticket: take("ticket"),
            hresult: take("hresult"),
            message: take("message"),
        },
        "getLastError" => SoapCall::GetLastError {
            ticket: take("ticket"),
        },
        "closeConnection" => SoapCall::CloseConnection {
            ticket: take("ticket"),
        },
        other => return Err(SoapError::UnknownOperation(other.to_string())),
    };
    Ok(call)
}

fn local_name(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

/// Walk the envelope, collecting the operation element and the text of
/// each of its direct children.
fn read_envelope(body: &str) -> Result<RawCall, SoapError> {
    let mut reader = Reader::from_str(body);

    let mut depth = 0usize;
    let mut body_depth: Option<usize> = None;
    let mut seen_body = false;
    let mut operation: Option<String> = None;
    let mut params = HashMap::new();
    let mut current: Option<(String, String)> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                depth += 1;
                let name = local_name(e.local_name().as_ref());
                match body_depth {
                    None if !seen_body && name == "Body" => {
                        body_depth = Some(depth);
                        seen_body = true;
                    }
                    Some(b) if depth == b + 1 && operation.is_none() => operation = Some(name),
                    Some(b) if depth == b + 2 && operation.is_some() => {
                        current = Some((name, String::new()))
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => {
                let name = local_name(e.local_name().as_ref());
                match body_depth {
                    None if !seen_body && name == "Body" => seen_body = true,
                    Some(b) if depth == b && operation.is_none() => operation = Some(name),
                    Some(b) if depth == b + 1 && operation.is_some() => {
                        params.insert(name, String::new());
                    }
                    _ => {}
                }
            }
            Event::Text(t) => {
                if let Some((_, value)) = current.as_mut() {
                    value.push_str(&t.unescape()?);
                }
            }
            Event::CData(c) => {
                if let Some((_, value)) = current.as_mut() {
                    value.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(_) => {
                if let Some(b) = body_depth {
                    if depth == b + 2 {
                        if let Some((name, value)) = current.take() {
                            params.insert(name, value);
                        }
                    } else if depth == b {
                        break;
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_body {
        return Err(SoapError::MissingBody);
    }
    let operation = operation.ok_or(SoapError::MissingOperation)?;
    Ok(RawCall { operation, params })
}

// ── Rendering ────────────────────────────────────────────────────

fn envelope(inner: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<soap:Envelope xmlns:soap="{soap}" "#,
            r#"xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" "#,
            r#"xmlns:xsd="http://www.w3.org/2001/XMLSchema">"#,
            "<soap:Body>{inner}</soap:Body></soap:Envelope>"
        ),
        soap = SOAP_ENV_NS,
        inner = inner
    )
}

/// Render the response envelope for `operation`.
pub fn render_response(operation: &str, reply: &SoapReply) -> String {
    let result = match reply {
        SoapReply::Text(text) => escape(text.as_str()).into_owned(),
        SoapReply::Int(value) => value.to_string(),
        SoapReply::Strings(values) => values
            .iter()
            .map(|v| format!("<string>{}</string>", escape(v.as_str())))
            .collect(),
    };
    envelope(&format!(
        r#"<{operation}Response xmlns="{SERVICE_NS}"><{operation}Result>{result}</{operation}Result></{operation}Response>"#
    ))
}

/// Render a SOAP fault for an envelope that could not be decoded.
pub fn render_fault(error: &SoapError) -> String {
    envelope(&format!(
        "<soap:Fault><faultcode>soap:Client</faultcode><faultstring>{}</faultstring></soap:Fault>",
        escape(error.to_string().as_str())
    ))
}

// ── Tests ────────────────────────────────────────────────────────
