//! Server response interpretation.
//!
//! Gateway responses arrive in one of two formats: an XML document, or
//! a pseudo-JavaScript snippet carrying a challenge or error. A single
//! entry point classifies the body, maps the known error strings onto
//! the rejection taxonomy, and hands well-formed XML to an optional
//! caller-supplied callback (the config fetcher's XML walker).

use crate::error::{GpstError, RejectReason};
use crate::transport::HttpError;
use crate::xml::{self, Element};
use tracing::{debug, error, info, trace};

const ERR_GATEWAY_MISSING: &str = "GlobalProtect gateway does not exist";
const ERR_PORTAL_MISSING: &str = "GlobalProtect portal does not exist";
const ERR_BAD_COOKIE: &str = "Invalid authentication cookie";

/// A challenge prompt extracted from a pseudo-JavaScript response,
/// returned to callers that opted in (the external login flow).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub prompt: String,
    pub input_label: String,
}

/// Successful outcome of interpreting a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// The response parsed; any supplied callback ran to completion.
    Done,
    /// The server issued a challenge and the caller asked to see it.
    NeedsInput(Challenge),
}

/// Raw classification of a response body, before error mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerResponse {
    Xml(Element),
    JsChallenge { prompt: String, input_label: String },
    JsError { message: String },
    Malformed,
}

/// Classify a body as XML, pseudo-JavaScript, or neither.
pub fn classify(body: &str) -> ServerResponse {
    if let Some(root) = xml::parse(body) {
        return ServerResponse::Xml(root);
    }
    match parse_javascript(body) {
        Some(js) => js,
        None => ServerResponse::Malformed,
    }
}

/// Interpret an HTTP result and response body.
///
/// HTTP-layer failures with a known meaning surface immediately
/// without inspecting the body. Otherwise the body is classified and:
/// `<response status="error">` documents map their `<error>` text onto
/// [`RejectReason`]; other XML goes to `xml_cb` when supplied; a
/// JavaScript challenge becomes [`ResponseOutcome::NeedsInput`] when
/// `want_challenge` is set and is otherwise only logged; a JavaScript
/// error is surfaced as a server rejection.
pub fn interpret(
    result: Result<String, HttpError>,
    want_challenge: bool,
    xml_cb: Option<&mut dyn FnMut(&Element) -> Result<(), GpstError>>,
) -> Result<ResponseOutcome, GpstError> {
    let body = match result {
        Ok(body) => body,
        Err(HttpError::PermissionDenied) => {
            error!("Invalid username or password");
            return Err(GpstError::ServerRejected(RejectReason::InvalidCredentials));
        }
        Err(HttpError::BadMessage) => {
            error!("Invalid client certificate");
            return Err(GpstError::ServerRejected(RejectReason::InvalidCertificate));
        }
        Err(HttpError::Interrupted) => return Err(GpstError::Interrupted),
        Err(HttpError::Other(message)) => return Err(GpstError::Transport(message)),
    };

    if body.is_empty() {
        debug!("Empty response from server");
        return Err(GpstError::ParseFailure);
    }

    match classify(&body) {
        ServerResponse::Xml(root) => {
            if root.name == "response" && root.attr("status") == Some("error") {
                return match root.child_text("error") {
                    Some(text) => Err(classify_error_text(text)),
                    None => Err(bad_xml(&body)),
                };
            }
            if let Some(cb) = xml_cb {
                match cb(&root) {
                    Ok(()) => {}
                    Err(GpstError::ParseFailure) => return Err(bad_xml(&body)),
                    Err(e) => return Err(e),
                }
            }
            Ok(ResponseOutcome::Done)
        }
        ServerResponse::JsChallenge {
            prompt,
            input_label,
        } => {
            info!("Challenge: {}", prompt);
            if want_challenge {
                Ok(ResponseOutcome::NeedsInput(Challenge {
                    prompt,
                    input_label,
                }))
            } else {
                Ok(ResponseOutcome::Done)
            }
        }
        ServerResponse::JsError { message } => {
            error!("{}", message);
            Err(GpstError::ServerRejected(RejectReason::Server(message)))
        }
        ServerResponse::Malformed => Err(bad_xml(&body)),
    }
}

fn bad_xml(body: &str) -> GpstError {
    error!("Failed to parse server response");
    trace!("Response was: {}", body);
    GpstError::ParseFailure
}

/// Map `<error>` text onto the rejection taxonomy. Missing gateway and
/// portal are expected during gateway probing and log at debug only.
fn classify_error_text(text: &str) -> GpstError {
    if text == ERR_GATEWAY_MISSING || text == ERR_PORTAL_MISSING {
        debug!("{}", text);
        return GpstError::ServerRejected(RejectReason::GatewayOrPortalMissing);
    }
    error!("{}", text);
    if text == ERR_BAD_COOKIE {
        GpstError::ServerRejected(RejectReason::InvalidAuthCookie)
    } else {
        GpstError::ServerRejected(RejectReason::Server(text.to_string()))
    }
}

/// Parse the pseudo-JavaScript response grammar:
///
/// ```text
/// var respStatus = "<Challenge|Error>";
/// var respMsg = "<prompt>";
/// thisForm.inputStr.value = "<input>";
/// ```
///
/// Whitespace is tolerated between statements; each statement must end
/// with `";` followed by a newline, the status token must be exactly
/// `Challenge` or `Error`, and only whitespace may follow the third
/// statement.
fn parse_javascript(body: &str) -> Option<ServerResponse> {
    let (status, rest) = js_statement(body, "var respStatus = \"")?;
    let (prompt, rest) = js_statement(rest, "var respMsg = \"")?;
    let (input, rest) = js_statement(rest, "thisForm.inputStr.value = \"")?;

    if !rest.trim_start().is_empty() {
        return None;
    }

    match status {
        "Challenge" => Some(ServerResponse::JsChallenge {
            prompt: prompt.to_string(),
            input_label: input.to_string(),
        }),
        "Error" => Some(ServerResponse::JsError {
            message: prompt.to_string(),
        }),
        _ => None,
    }
}

/// Match one `<prefix><content>";\n` statement, returning the content
/// between the quotes and the remainder after the newline.
fn js_statement<'a>(input: &'a str, prefix: &str) -> Option<(&'a str, &'a str)> {
    let rest = input.trim_start().strip_prefix(prefix)?;
    let newline = rest.find('\n')?;
    let content = rest[..newline].strip_suffix("\";")?;
    Some((content, &rest[newline + 1..]))
}
